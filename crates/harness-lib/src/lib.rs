mod config;
pub use config::{BitcoindConfig, Config, NodeConfig};


pub mod bitcoind;
pub use bitcoind::{BitcoindClient, FundingSource};

pub mod node;
pub use node::{LightningNode, NodeDaemon};

pub mod process;
pub use process::{LogBuffer, LogMatch, SupervisedProcess};

pub mod rpc;
pub use rpc::{LightningRpc, LndConnector, RpcConnector, RpcEndpoint, RpcError};

mod errors;
pub use errors::{Error, Result};

pub fn get_node_prefix() -> &'static str {
    static INSTANCE: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    INSTANCE.get_or_init(|| std::env::var("LOG_PREFIX").unwrap_or_else(|_| "".to_string()))
}
