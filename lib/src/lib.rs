//! The protocol library for Caesar-Transfer - an end-to-end encrypted file transfer system
//!
//! This crate enables a consumer to:
//!
//! - Generate short mnemonic transfer names and rendezvous through a relay by name
//! - Negotiate a symmetric session key with a peer using [SPAKE2](https://docs.rs/spake2),
//!   with the transfer name as the shared low-entropy secret
//! - Stream files as framed [Chacha20-Poly1305](https://docs.rs/chacha20poly1305)
//!   encrypted chunks, verified per-chunk by tag and per-file by SHA-256
//!
//! The library is broken up into two abstractions:
//!
//! - A higher level API, the [`Sender`] and [`Receiver`] sessions, to drive a
//!   whole transfer end-to-end
//! - Lower level building blocks in [`protocol`] and [`transport`], if you need
//!   access to the packet codec, framing, or crypto directly
//!
//! The relay between the two peers only ever sees the rendezvous control
//! records and opaque encrypted frames; it holds no key material.
//!
//! ```no_run
//! use caesar_lib::{CaesarConfig, Sender, NO_PROGRESS_CALLBACK};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), caesar_lib::CaesarError> {
//! let mut sender = Sender::new(CaesarConfig::default(), None)?;
//! println!("tell your peer the transfer name is: {}", sender.name());
//!
//! let mut stream = sender.connect()?;
//! sender.transfer(
//!     &mut stream,
//!     &[PathBuf::from("/etc/hostname")],
//!     NO_PROGRESS_CALLBACK,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod name;
pub mod protocol;
pub mod receiver;
pub mod sender;
mod session;
pub mod transport;


pub use config::CaesarConfig;
pub use errors::CaesarError;
pub use protocol::control::{ControlMessage, JoinStatus, Role};
pub use protocol::{FileEntry, Packet, PROTOCOL_VERSION};
pub use receiver::{Receiver, NO_VERIFY_CALLBACK};
pub use sender::{Sender, TransferSummary, NO_PROGRESS_CALLBACK};
pub use transport::{Frame, Transport};

/// Arbitrary port for the Caesar protocol.
pub const DEFAULT_PORT: u16 = 13265;

/// Default sender chunk size.
pub const CHUNK_SIZE: usize = 65536;
