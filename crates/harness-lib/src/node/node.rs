use std::collections::HashSet;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::NodeDaemon;
use crate::bitcoind::{sats_to_btc, FundingSource};
use crate::process::LogMatch;
use crate::rpc::{
    ChannelPoint, LightningRpc, LndConnector, NodeInfo, OpenChannelRequest, PeerAddress,
    RpcConnector, WalletBalance,
};
use crate::{Error, NodeConfig, Result};

/// Logged when the wallet sees the funding transaction in the mempool.
pub const UNCONFIRMED_TX_SEEN_LOG: &str = "Inserting unconfirmed transaction";
/// Logged when the funding transaction got its first confirmation.
pub const UNCONFIRMED_TX_CONFIRMED_LOG: &str = "Marking unconfirmed transaction";

/// A Lightning node under test: the daemon process plus an RPC client bound to it.
pub struct LightningNode {
    daemon: NodeDaemon,
    connector: Box<dyn RpcConnector>,
    rpc: Option<Box<dyn LightningRpc>>,
    identity: Option<String>,
}

impl LightningNode {
    pub fn new(config: NodeConfig, connector: impl RpcConnector + 'static) -> Result<Self> {
        Ok(Self {
            daemon: NodeDaemon::new(config)?,
            connector: Box::new(connector),
            rpc: None,
            identity: None,
        })
    }

    /// A node reached over gRPC.
    pub fn with_lnd(config: NodeConfig) -> Result<Self> {
        Self::new(config, LndConnector)
    }

    pub fn daemon(&self) -> &NodeDaemon {
        &self.daemon
    }

    pub fn config(&self) -> &NodeConfig {
        self.daemon.config()
    }

    fn rpc(&mut self) -> Result<&mut Box<dyn LightningRpc>> {
        self.rpc.as_mut().ok_or(Error::RpcNotConnected)
    }

    /// Starts the daemon, waits until it is ready and connects the RPC client.
    pub async fn start(&mut self) -> Result<()> {
        self.daemon.start().await?;
        self.connect_rpc().await
    }

    /// Stops the daemon. The RPC client is dropped with it.
    pub async fn stop(&mut self) -> Result<()> {
        self.rpc = None;
        self.daemon.stop().await
    }

    /// Builds a fresh RPC client against the daemon's current endpoint.
    pub async fn connect_rpc(&mut self) -> Result<()> {
        let endpoint = self.daemon.rpc_endpoint().await?;
        debug!("Connecting rpc client to {}", endpoint.uri());
        self.rpc = Some(self.connector.connect(&endpoint).await?);
        Ok(())
    }

    /// Restarts the daemon and rebuilds the RPC client, which may now target
    /// a different port. The cached identity is resolved again on next use.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        sleep(self.config().restart_settle_delay()).await;
        self.identity = None;
        self.start().await
    }

    /// Whether the node answers RPC calls. Never fails.
    pub async fn ping(&mut self) -> bool {
        let Ok(rpc) = self.rpc() else {
            return false;
        };
        match rpc.get_info().await {
            Ok(_) => true,
            Err(err) => {
                debug!("Ping failed: {}", err);
                false
            }
        }
    }

    pub async fn info(&mut self) -> Result<NodeInfo> {
        Ok(self.rpc()?.get_info().await?)
    }

    /// The node's identity public key in hex, resolved once.
    pub async fn identity(&mut self) -> Result<String> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }
        let identity = self.info().await?.identity_pubkey;
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    pub async fn list_peers(&mut self) -> Result<HashSet<String>> {
        let peers = self.rpc()?.list_peers().await?;
        Ok(peers.into_iter().map(|peer| peer.pub_key).collect())
    }

    /// Whether there is an active channel with `remote_id`. A missing channel
    /// is not an error.
    pub async fn has_active_channel(&mut self, remote_id: &str) -> Result<bool> {
        let self_id = self.identity().await?;
        let channels: Vec<_> = self
            .rpc()?
            .list_channels()
            .await?
            .into_iter()
            .filter(|channel| channel.remote_pubkey == remote_id)
            .collect();
        if channels.is_empty() {
            warn!("Channel {} -> {} not found", self_id, remote_id);
            return Ok(false);
        }
        debug!("Channels {} -> {} state: {:?}", self_id, remote_id, channels);
        Ok(channels.iter().any(|channel| channel.active))
    }

    pub async fn wallet_balance(&mut self) -> Result<WalletBalance> {
        Ok(self.rpc()?.wallet_balance().await?)
    }

    /// Funds the on-chain wallet from `funding_source` and waits until the
    /// balance reflects it.
    ///
    /// The balance must change within the polling budget. If it does not,
    /// [`Error::WalletBalanceUnchanged`] is returned: funding is expected to
    /// always succeed against a regtest chain, so this is a broken environment
    /// rather than a slow one.
    pub async fn fund_wallet(
        &mut self,
        funding_source: &dyn FundingSource,
        amount_sats: u64,
    ) -> Result<WalletBalance> {
        let address = self.rpc()?.new_address().await?;
        let initial_balance = self.wallet_balance().await?.total_balance;
        let timeout = self.config().startup_timeout();

        funding_source
            .send_to_address(&address, sats_to_btc(amount_sats))
            .await?;
        self.daemon
            .wait_for_log(UNCONFIRMED_TX_SEEN_LOG, timeout)
            .await?;
        funding_source.generate_blocks(1).await?;
        self.daemon
            .wait_for_log(UNCONFIRMED_TX_CONFIRMED_LOG, timeout)
            .await?;

        // The confirmation log does not mean the balance is updated yet.
        let attempts = self.config().balance_poll_max_attempts;
        let interval = self.config().balance_poll_interval();
        for _ in 0..attempts {
            let balance = self.wallet_balance().await?;
            if balance.total_balance != initial_balance {
                info!(
                    "Wallet funded with {} sats, balance is now {}",
                    amount_sats, balance.total_balance
                );
                return Ok(balance);
            }
            sleep(interval).await;
        }
        Err(Error::WalletBalanceUnchanged {
            balance: initial_balance,
            attempts,
        })
    }

    /// Opens a channel with the connected peer `peer_id`, funded with `amount_sats`.
    ///
    /// The peer must already be connected, see [`Self::connect_to_peer`].
    pub async fn open_channel(
        &mut self,
        peer_id: &str,
        host: &str,
        port: u16,
        amount_sats: u64,
    ) -> Result<ChannelPoint> {
        let peers = self.rpc()?.list_peers().await?;
        let peer = peers
            .into_iter()
            .find(|peer| peer.pub_key == peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))?;
        let node_pubkey =
            hex::decode(&peer.pub_key).map_err(|err| Error::InvalidPubkey(peer.pub_key, err))?;

        debug!("Opening channel with {} at {}:{}", peer_id, host, port);
        let channel_point = self
            .rpc()?
            .open_channel(OpenChannelRequest {
                node_pubkey,
                local_funding_amount_sats: amount_sats,
                push_amount_sats: 0,
            })
            .await?;

        sleep(self.config().channel_open_settle_delay()).await;
        Ok(channel_point)
    }

    /// Every channel of the network graph, once in each direction.
    pub async fn list_channel_graph_edges(&mut self) -> Result<HashSet<(String, String)>> {
        let graph = self.rpc()?.describe_graph().await?;
        let mut edges = HashSet::with_capacity(graph.edges.len() * 2);
        for edge in graph.edges {
            edges.insert((edge.node2_pub.clone(), edge.node1_pub.clone()));
            edges.insert((edge.node1_pub, edge.node2_pub));
        }
        Ok(edges)
    }

    /// Every node of the network graph except this one.
    pub async fn list_graph_nodes(&mut self) -> Result<HashSet<String>> {
        let self_id = self.identity().await?;
        let graph = self.rpc()?.describe_graph().await?;
        Ok(graph
            .nodes
            .into_iter()
            .map(|node| node.pub_key)
            .filter(|pub_key| *pub_key != self_id)
            .collect())
    }

    /// Returns a payment request for `amount_sats`.
    pub async fn create_invoice(&mut self, amount_sats: u64) -> Result<String> {
        Ok(self.rpc()?.add_invoice(amount_sats).await?)
    }

    /// Pays `payment_request` and returns the preimage in hex.
    pub async fn pay_invoice(&mut self, payment_request: &str) -> Result<String> {
        let result = self.rpc()?.send_payment_sync(payment_request).await?;
        if !result.payment_error.is_empty() {
            return Err(Error::Payment(result.payment_error));
        }
        Ok(hex::encode(result.payment_preimage))
    }

    /// Connects to `peer_id` at `host:port`, keeping the connection persistent.
    pub async fn connect_to_peer(&mut self, host: &str, port: u16, peer_id: &str) -> Result<()> {
        let address = PeerAddress {
            pubkey: peer_id.to_string(),
            host: format!("{}:{}", host, port),
        };
        self.rpc()?.connect_peer(address, true).await?;
        debug!("Connected to peer {} at {}:{}", peer_id, host, port);
        Ok(())
    }

    /// Whether a route for `amount_msat` to `destination` exists.
    ///
    /// The no-path failure yields `false`, any other failure is returned.
    pub async fn query_route(&mut self, destination: &str, amount_msat: u64) -> Result<bool> {
        match self
            .rpc()?
            .query_routes(destination, amount_msat / 1000)
            .await
        {
            Ok(routes) => Ok(!routes.is_empty()),
            Err(err) if err.is_no_route() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Waits until the daemon has processed the block `block_hash`, returns its height.
    pub async fn wait_for_block(&self, block_hash: &str) -> Result<u32> {
        self.daemon.wait_for_block(block_hash).await
    }

    pub async fn wait_for_log(&self, pattern: &str) -> Result<LogMatch> {
        self.daemon
            .wait_for_log(pattern, self.config().startup_timeout())
            .await
    }
}
