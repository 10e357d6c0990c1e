use async_trait::async_trait;
use lnd_grpc_tonic_client::{create_lightning_client, lnrpc, LightningClient, Uri};
use tracing::debug;

use super::{
    ChannelGraph, ChannelInfo, ChannelPoint, GraphEdge, GraphNode, LightningRpc, NodeInfo,
    OpenChannelRequest, PeerAddress, PeerInfo, Route, RpcConnector, RpcEndpoint, RpcError,
    RpcResult, SendPaymentResult, WalletBalance,
};
use crate::{Error, Result};

/// Converts a failed gRPC call, keeping its status code.
macro_rules! status_to_rpc_error {
    () => {
        |status| RpcError::new(status.code() as i32, status.message())
    };
}

/// Connects to the daemon through `lnd-grpc-tonic-client`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LndConnector;

#[async_trait]
impl RpcConnector for LndConnector {
    async fn connect(&self, endpoint: &RpcEndpoint) -> Result<Box<dyn LightningRpc>> {
        let rpc = LndRpc::connect(endpoint).await?;
        Ok(Box::new(rpc))
    }
}

/// gRPC client of one running node.
pub struct LndRpc {
    client: LightningClient,
}

impl LndRpc {
    pub async fn connect(endpoint: &RpcEndpoint) -> Result<Self> {
        let uri = Uri::try_from(endpoint.uri())
            .map_err(|err| Error::Config(format!("invalid rpc uri {}: {}", endpoint.uri(), err)))?;
        debug!("Connecting rpc client to {}", uri);
        let client = create_lightning_client(
            uri,
            endpoint.tls_cert.as_deref(),
            endpoint.macaroon.as_deref(),
        )
        .await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LightningRpc for LndRpc {
    async fn get_info(&mut self) -> RpcResult<NodeInfo> {
        let info = self
            .client
            .get_info(lnrpc::GetInfoRequest::default())
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        Ok(NodeInfo {
            identity_pubkey: info.identity_pubkey,
            block_height: info.block_height,
        })
    }

    async fn list_peers(&mut self) -> RpcResult<Vec<PeerInfo>> {
        let peers = self
            .client
            .list_peers(lnrpc::ListPeersRequest::default())
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner()
            .peers;
        Ok(peers
            .into_iter()
            .map(|peer| PeerInfo {
                pub_key: peer.pub_key,
                address: peer.address,
            })
            .collect())
    }

    async fn connect_peer(&mut self, address: PeerAddress, perm: bool) -> RpcResult<()> {
        let request = lnrpc::ConnectPeerRequest {
            addr: Some(lnrpc::LightningAddress {
                pubkey: address.pubkey,
                host: address.host,
            }),
            perm,
            ..Default::default()
        };
        let response = self
            .client
            .connect_peer(request)
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        debug!("ConnectPeer response: {:?}", response);
        Ok(())
    }

    async fn describe_graph(&mut self) -> RpcResult<ChannelGraph> {
        let graph = self
            .client
            .describe_graph(lnrpc::ChannelGraphRequest::default())
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        Ok(ChannelGraph {
            nodes: graph
                .nodes
                .into_iter()
                .map(|node| GraphNode {
                    pub_key: node.pub_key,
                    alias: node.alias,
                })
                .collect(),
            edges: graph
                .edges
                .into_iter()
                .map(|edge| GraphEdge {
                    channel_id: edge.channel_id,
                    node1_pub: edge.node1_pub,
                    node2_pub: edge.node2_pub,
                    capacity_sats: edge.capacity,
                })
                .collect(),
        })
    }

    async fn query_routes(
        &mut self,
        destination: &str,
        amount_sats: u64,
    ) -> RpcResult<Vec<Route>> {
        let request = lnrpc::QueryRoutesRequest {
            pub_key: destination.to_string(),
            amt: to_lnd_amount("route amount", amount_sats)?,
            ..Default::default()
        };
        let routes = self
            .client
            .query_routes(request)
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner()
            .routes;
        Ok(routes
            .into_iter()
            .map(|route| Route {
                total_amount_sats: route.total_amt_msat / 1000,
                total_fees_sats: route.total_fees_msat / 1000,
                hops: route.hops.len(),
            })
            .collect())
    }

    async fn list_channels(&mut self) -> RpcResult<Vec<ChannelInfo>> {
        let channels = self
            .client
            .list_channels(lnrpc::ListChannelsRequest::default())
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner()
            .channels;
        Ok(channels
            .into_iter()
            .map(|channel| ChannelInfo {
                remote_pubkey: channel.remote_pubkey,
                active: channel.active,
                channel_point: channel.channel_point,
                capacity_sats: channel.capacity,
            })
            .collect())
    }

    async fn open_channel(&mut self, request: OpenChannelRequest) -> RpcResult<ChannelPoint> {
        let request = lnrpc::OpenChannelRequest {
            node_pubkey: request.node_pubkey,
            local_funding_amount: to_lnd_amount(
                "funding amount",
                request.local_funding_amount_sats,
            )?,
            push_sat: to_lnd_amount("push amount", request.push_amount_sats)?,
            ..Default::default()
        };
        let channel_point = self
            .client
            .open_channel_sync(request)
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        to_channel_point(channel_point)
    }

    async fn add_invoice(&mut self, amount_sats: u64) -> RpcResult<String> {
        let request = lnrpc::Invoice {
            value: to_lnd_amount("invoice amount", amount_sats)?,
            ..Default::default()
        };
        let response = self
            .client
            .add_invoice(request)
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        Ok(response.payment_request)
    }

    #[allow(deprecated)]
    async fn send_payment_sync(&mut self, payment_request: &str) -> RpcResult<SendPaymentResult> {
        let request = lnrpc::SendRequest {
            payment_request: payment_request.to_string(),
            ..Default::default()
        };
        let response = self
            .client
            .send_payment_sync(request)
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        Ok(SendPaymentResult {
            payment_error: response.payment_error,
            payment_preimage: response.payment_preimage,
        })
    }

    async fn new_address(&mut self) -> RpcResult<String> {
        let mut request = lnrpc::NewAddressRequest::default();
        request.set_type(lnrpc::AddressType::WitnessPubkeyHash);
        let response = self
            .client
            .new_address(request)
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        Ok(response.address)
    }

    async fn wallet_balance(&mut self) -> RpcResult<WalletBalance> {
        let response = self
            .client
            .wallet_balance(lnrpc::WalletBalanceRequest::default())
            .await
            .map_err(status_to_rpc_error!())?
            .into_inner();
        Ok(WalletBalance {
            total_balance: response.total_balance,
            confirmed_balance: response.confirmed_balance,
            unconfirmed_balance: response.unconfirmed_balance,
        })
    }
}

// lnrpc carries amounts as signed integers.
fn to_lnd_amount(what: &str, sats: u64) -> RpcResult<i64> {
    i64::try_from(sats)
        .map_err(|_| RpcError::invalid_argument(format!("{} {} sats is too large", what, sats)))
}

fn to_channel_point(channel_point: lnrpc::ChannelPoint) -> RpcResult<ChannelPoint> {
    let funding_txid = match channel_point
        .funding_txid
        .ok_or_else(|| RpcError::unknown("channel point without funding txid"))?
    {
        lnrpc::channel_point::FundingTxid::FundingTxidBytes(mut bytes) => {
            // The bytes are in internal order while the string form is reversed.
            bytes.reverse();
            hex::encode(bytes)
        }
        lnrpc::channel_point::FundingTxid::FundingTxidStr(txid) => txid,
    };
    Ok(ChannelPoint {
        funding_txid,
        output_index: channel_point.output_index,
    })
}
