use std::env;

/// Relay process settings. The binary fills this from the environment;
/// tests and embedders construct it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Interface to bind.
    pub listen_addr: String,
    /// Port to bind.
    pub listen_port: u16,
    /// Connection handler threads.
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::from("0.0.0.0"),
            listen_port: caesar_lib::DEFAULT_PORT,
            workers: 32,
        }
    }
}

impl RelayConfig {
    /// Build a config from `CAESAR_LISTEN_ADDR` / `CAESAR_LISTEN_PORT`,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let listen_addr = env::var("CAESAR_LISTEN_ADDR").unwrap_or(defaults.listen_addr);
        let listen_port = env::var("CAESAR_LISTEN_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.listen_port);
        Self {
            listen_addr,
            listen_port,
            workers: defaults.workers,
        }
    }
}
