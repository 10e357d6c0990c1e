use std::fmt::Debug;

use lnh::{BitcoindClient, Config, LightningNode};
use tracing::{info, info_span, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub struct ExitMessage(String);

#[tokio::main]
pub async fn main() -> Result<(), ExitMessage> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .try_init()
        .map_err(|err| ExitMessage(format!("failed to initialize logger: {}", err)))?;

    let _span = info_span!("node", node = lnh::get_node_prefix()).entered();

    let config = Config::parse().map_err(|err| ExitMessage(err.to_string()))?;
    info!(
        "Supervising {} in {:?}",
        config.node.binary,
        config.node.base_dir()
    );

    let initial_funding_sats = config.node.initial_funding_sats;
    let mut node = LightningNode::with_lnd(config.node)
        .map_err(|err| ExitMessage(format!("failed to create node: {}", err)))?;
    node.start()
        .await
        .map_err(|err| ExitMessage(format!("node failed to start: {}", err)))?;

    let node_info = node
        .info()
        .await
        .map_err(|err| ExitMessage(format!("failed to get node info: {}", err)))?;
    info!(
        "Node {} is ready at block height {}, rpc port {}",
        node_info.identity_pubkey,
        node_info.block_height,
        node.daemon().rpc_port()
    );

    if initial_funding_sats > 0 {
        let funded = match BitcoindClient::new(&config.bitcoind) {
            Ok(bitcoind) => node.fund_wallet(&bitcoind, initial_funding_sats).await,
            Err(err) => Err(err),
        };
        match funded {
            Ok(balance) => info!("Wallet balance: {:?}", balance),
            Err(err) => {
                // The daemon must not outlive the harness.
                if let Err(stop_err) = node.stop().await {
                    warn!("Failed to stop node: {}", stop_err);
                }
                return ExitMessage::err(format!("failed to fund wallet: {}", err));
            }
        }
    }

    signal_listener().await;
    node.stop()
        .await
        .map_err(|err| ExitMessage(format!("failed to stop node: {}", err)))?;

    Ok(())
}

impl Debug for ExitMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Exit because {}", self.0)
    }
}

impl ExitMessage {
    pub fn err(message: String) -> Result<(), ExitMessage> {
        Err(ExitMessage(message))
    }
}

#[cfg(target_family = "unix")]
async fn signal_listener() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("listen for SIGTERM");
    let mut sigint = signal(SignalKind::interrupt()).expect("listen for SIGINT");

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
    };
}

#[cfg(not(target_family = "unix"))]
async fn signal_listener() {
    tokio::signal::ctrl_c()
        .await
        .expect("listen for Ctrl-c signal");
    info!("Ctrl-c received, shutting down");
}
