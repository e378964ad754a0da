//! End-to-end encrypted clipboard bundles and the relay that carries them.
//!
//! A sender seals content for one paired peer with [`bundle::encrypt_bundle`];
//! the relay in [`relay`] holds it for a bounded time and hands it out once;
//! the recipient opens it with [`bundle::decrypt_bundle`].

pub mod bundle;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod relay_transport;
