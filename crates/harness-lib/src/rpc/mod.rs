//! Typed access to the node's RPC service.
//!
//! [`LightningRpc`] is the seam between the node facade and the transport.
//! [`LndConnector`] builds the gRPC implementation; tests plug in in-memory
//! implementations through [`RpcConnector`].

mod error;
pub use error::{
    RpcError, RpcResult, GRPC_CODE_INVALID_ARGUMENT, GRPC_CODE_UNAVAILABLE, GRPC_CODE_UNKNOWN,
};

mod lnd;
pub use lnd::{LndConnector, LndRpc};

mod types;
pub use types::*;

use async_trait::async_trait;

use crate::Result;

/// Calls exposed by the node, grouped as the service groups of the daemon.
#[async_trait]
pub trait LightningRpc: Send {
    // Routing and graph
    async fn get_info(&mut self) -> RpcResult<NodeInfo>;
    async fn list_peers(&mut self) -> RpcResult<Vec<PeerInfo>>;
    async fn connect_peer(&mut self, address: PeerAddress, perm: bool) -> RpcResult<()>;
    async fn describe_graph(&mut self) -> RpcResult<ChannelGraph>;
    async fn query_routes(&mut self, destination: &str, amount_sats: u64)
        -> RpcResult<Vec<Route>>;

    // Channels
    async fn list_channels(&mut self) -> RpcResult<Vec<ChannelInfo>>;
    async fn open_channel(&mut self, request: OpenChannelRequest) -> RpcResult<ChannelPoint>;

    // Payments
    async fn add_invoice(&mut self, amount_sats: u64) -> RpcResult<String>;
    async fn send_payment_sync(&mut self, payment_request: &str) -> RpcResult<SendPaymentResult>;

    // Wallet
    async fn new_address(&mut self) -> RpcResult<String>;
    async fn wallet_balance(&mut self) -> RpcResult<WalletBalance>;
}

/// Builds RPC clients bound to an endpoint.
#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn connect(&self, endpoint: &RpcEndpoint) -> Result<Box<dyn LightningRpc>>;
}
