use anyhow::Result;
use caesar_relay::config::RelayConfig;
use caesar_relay::registry::Registry;
use caesar_relay::service;
use std::net::TcpListener;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let config = RelayConfig::from_env();
    let listener = TcpListener::bind((config.listen_addr.as_str(), config.listen_port))?;
    log::info!("caesar-relay listening on {}", listener.local_addr()?);

    service::serve(listener, Arc::new(Registry::new()), &config)?;
    Ok(())
}
