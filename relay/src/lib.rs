//! The rendezvous relay for Caesar-Transfer.
//!
//! The relay pairs a sender and a receiver into a room keyed by their
//! shared transfer name, then forwards opaque frames between them until
//! either side disconnects. It holds no key material, parses nothing
//! past the rendezvous records, and persists nothing: rooms are cheap
//! and any anomaly closes them.
pub mod config;
pub mod registry;
pub mod service;

pub use config::RelayConfig;
pub use registry::Registry;
