//! The chain controller used to fund node wallets.

use async_trait::async_trait;
use base64::Engine as _;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use tracing::debug;

use crate::{BitcoindConfig, Error, Result};

pub const SATS_PER_BTC: u64 = 100_000_000;

pub fn sats_to_btc(sats: u64) -> f64 {
    sats as f64 / SATS_PER_BTC as f64
}

/// Something that can send coins to an address and mine blocks.
#[async_trait]
pub trait FundingSource: Send + Sync {
    /// Sends `amount_btc` to `address`, returns the transaction id.
    async fn send_to_address(&self, address: &str, amount_btc: f64) -> Result<String>;

    /// Mines `count` blocks, returns their hashes.
    async fn generate_blocks(&self, count: u64) -> Result<Vec<String>>;
}

/// JSON-RPC client of a regtest bitcoind.
pub struct BitcoindClient {
    client: HttpClient,
}

impl BitcoindClient {
    pub fn new(config: &BitcoindConfig) -> Result<Self> {
        let mut client_builder = HttpClientBuilder::default();
        match config.credentials()? {
            Some((user, password)) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    "Authorization",
                    HeaderValue::from_str(&basic_auth_header(&user, &password)).map_err(
                        |err| Error::Config(format!("invalid bitcoind credentials: {}", err)),
                    )?,
                );
                client_builder = client_builder.set_headers(headers);
            }
            None => debug!("create bitcoind rpc client without credentials"),
        }
        let client = client_builder
            .build(&config.rpc_url)
            .map_err(|err| Error::Funding(format!("failed to create bitcoind client: {}", err)))?;
        Ok(Self { client })
    }

    async fn call<R>(&self, method: &str, params: jsonrpsee::core::params::ArrayParams) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        self.client
            .request(method, params)
            .await
            .map_err(|err| Error::Funding(format!("{} failed: {}", method, err)))
    }
}

#[async_trait]
impl FundingSource for BitcoindClient {
    async fn send_to_address(&self, address: &str, amount_btc: f64) -> Result<String> {
        let txid: String = self
            .call("sendtoaddress", rpc_params![address, amount_btc])
            .await?;
        debug!("Sent {} BTC to {} in {}", amount_btc, address, txid);
        Ok(txid)
    }

    async fn generate_blocks(&self, count: u64) -> Result<Vec<String>> {
        let address: String = self.call("getnewaddress", rpc_params![]).await?;
        self.call("generatetoaddress", rpc_params![count, address])
            .await
    }
}

fn basic_auth_header(user: &str, password: &str) -> String {
    let credentials = format!("{}:{}", user, password);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sats_to_btc() {
        assert_eq!(sats_to_btc(SATS_PER_BTC), 1.0);
        assert_eq!(sats_to_btc(1_000_000), 0.01);
        assert_eq!(sats_to_btc(0), 0.0);
    }

    #[test]
    fn test_basic_auth_header() {
        // base64("user:pass")
        assert_eq!(basic_auth_header("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[tokio::test]
    async fn test_client_builds_without_connecting() {
        let config = BitcoindConfig {
            rpc_user: Some("user".to_string()),
            rpc_password: Some("pass".to_string()),
            ..Default::default()
        };
        assert!(BitcoindClient::new(&config).is_ok());
    }
}
