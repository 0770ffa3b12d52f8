use crate::errors::CaesarError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest permitted sender chunk size (16 KiB).
pub const MIN_CHUNK_SIZE: usize = 16 * 1024;

/// Largest permitted sender chunk size (1 MiB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// The configuration record consumed by the core. Front ends are
/// expected to populate this from whatever persistence or UI they
/// carry; the core itself never reads it from disk or the environment.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct CaesarConfig {
    /// Where peers connect, as `host:port`.
    pub relay_url: String,
    /// Where the relay binds (relay mode only).
    pub listen_addr: String,
    /// Bound port (relay mode only).
    pub listen_port: u16,
    /// Sender chunk size in bytes, within [`MIN_CHUNK_SIZE`]..=[`MAX_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Receiver output root.
    pub destination_dir: PathBuf,
    /// Permit overwriting existing files at the destination.
    pub overwrite: bool,
    /// Ceiling on the total announced transfer size in bytes.
    pub max_list_bytes: u64,
    /// Protocol version spoken by this build.
    pub protocol_version: u16,
}

impl Default for CaesarConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("127.0.0.1:{}", crate::DEFAULT_PORT),
            listen_addr: String::from("0.0.0.0"),
            listen_port: crate::DEFAULT_PORT,
            chunk_size: crate::CHUNK_SIZE,
            destination_dir: PathBuf::from("."),
            overwrite: false,
            max_list_bytes: 4 * 1024 * 1024 * 1024,
            protocol_version: crate::protocol::PROTOCOL_VERSION,
        }
    }
}

impl CaesarConfig {
    /// Check the record for values the protocol cannot honor.
    pub fn validate(&self) -> Result<(), CaesarError> {
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(CaesarError::InvalidConfig(
                "chunk_size outside 16 KiB..=1 MiB",
            ));
        }
        if self.relay_url.is_empty() {
            return Err(CaesarError::InvalidConfig("relay_url is empty"));
        }
        if self.max_list_bytes == 0 {
            return Err(CaesarError::InvalidConfig("max_list_bytes is zero"));
        }
        Ok(())
    }
}
