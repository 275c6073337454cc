#![forbid(unsafe_code)]

mod config;
mod guest;

use std::net::TcpListener;

use anyhow::Context;
use c2w_bridge::backend::TcpTransport;
use c2w_bridge::{request_channel, Backends, Regions, StreamBridge};
use c2w_shim::{ControlClient, DataPath, SocketShim};

use crate::config::RelayConfig;

const LISTEN_FD: u32 = 4;
const CONN_FD: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("invalid config: {err}");
            return Err(err.into());
        }
    };

    let regions = Regions::allocate(&config.bridge)?;
    let backends = Backends::native()?.with_transport(TcpTransport::new(config.connect.clone()));
    let bridge = StreamBridge::new(&regions, &config.bridge, backends);
    let (requests, inbox) = request_channel();

    let listener = TcpListener::bind(&config.listen)
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(
        listen = %listener.local_addr()?,
        upstream = %config.connect,
        "c2w-net-relay ready"
    );

    let sock = SocketShim::new(
        ControlClient::new(regions.control.clone(), requests),
        &regions,
        DataPath::Ring,
        LISTEN_FD,
        CONN_FD,
    );
    let guest = std::thread::Builder::new()
        .name("c2w-guest".to_string())
        .spawn(move || guest::serve(sock, listener))?;

    tokio::select! {
        // The guest dropped its request sender, so it has exited.
        _ = bridge.run(inbox) => {
            match guest.join() {
                Ok(result) => result?,
                Err(_) => anyhow::bail!("guest thread panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}
