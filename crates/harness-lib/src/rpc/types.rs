use std::fmt;

/// Everything needed to reach the RPC service of one running node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
    /// PEM encoded TLS certificate of the node.
    pub tls_cert: Option<Vec<u8>>,
    pub macaroon: Option<Vec<u8>>,
}

impl RpcEndpoint {
    pub fn uri(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub identity_pubkey: String,
    pub block_height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub pub_key: String,
    pub address: String,
}

/// A peer to connect to, `host` being `ip:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAddress {
    pub pubkey: String,
    pub host: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub remote_pubkey: String,
    pub active: bool,
    pub channel_point: String,
    pub capacity_sats: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenChannelRequest {
    /// Raw compressed public key of the remote node.
    pub node_pubkey: Vec<u8>,
    pub local_funding_amount_sats: u64,
    pub push_amount_sats: u64,
}

/// Funding outpoint of a channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelPoint {
    pub funding_txid: String,
    pub output_index: u32,
}

impl fmt::Display for ChannelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.funding_txid, self.output_index)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphNode {
    pub pub_key: String,
    pub alias: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub channel_id: u64,
    pub node1_pub: String,
    pub node2_pub: String,
    pub capacity_sats: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub total_amount_sats: i64,
    pub total_fees_sats: i64,
    pub hops: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendPaymentResult {
    /// Error reported by the remote side, empty on success.
    pub payment_error: String,
    pub payment_preimage: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalletBalance {
    pub total_balance: i64,
    pub confirmed_balance: i64,
    pub unconfirmed_balance: i64,
}
