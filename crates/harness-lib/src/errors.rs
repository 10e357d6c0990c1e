use std::time::Duration;

use thiserror::Error;

use crate::rpc::RpcError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Process {0} is already running")]
    AlreadyRunning(String),
    #[error("Timed out after {timeout:?} waiting for log pattern {pattern:?}")]
    Timeout { pattern: String, timeout: Duration },
    #[error("Invalid log pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("Unexpected log line: {0}")]
    UnexpectedLogLine(String),
    #[error("Peer not found error: {0}")]
    PeerNotFound(String),
    #[error("Invalid pubkey {0}: {1}")]
    InvalidPubkey(String, hex::FromHexError),
    #[error("Send payment error: {0}")]
    Payment(String),
    #[error("Lnd RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("Lnd channel error: {0}")]
    LndChannel(#[from] lnd_grpc_tonic_client::channel::Error),
    #[error("RPC client is not connected, start the node first")]
    RpcNotConnected,
    #[error("Funding source error: {0}")]
    Funding(String),
    #[error("Wallet balance stayed at {balance} sats after {attempts} attempts")]
    WalletBalanceUnchanged { balance: i64, attempts: u32 },
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
