use std::{fs::File, io::BufReader, path::PathBuf, time::Duration};

use clap_serde_derive::{
    clap::{self, Parser},
    ClapSerde,
};
use home::home_dir;
use serde::Deserialize;

use crate::{Error, Result};

/// Default readiness milestones printed by the daemon during startup.
pub const DEFAULT_READY_LOG_PATTERNS: [&str; 2] =
    ["RPC server listening on", "Done catching up block hashes"];
pub const DEFAULT_STARTUP_TIMEOUT_SECONDS: u64 = 60;
/// Wait after the readiness milestones before the node is considered usable.
pub const DEFAULT_STARTUP_SETTLE_DELAY_MS: u64 = 5000;
/// Wait between stopping and starting again on restart.
pub const DEFAULT_RESTART_SETTLE_DELAY_MS: u64 = 5000;
/// Broadcasting the funding transaction is slow from time to time.
pub const DEFAULT_CHANNEL_OPEN_SETTLE_DELAY_MS: u64 = 5000;
pub const DEFAULT_STOP_GRACE_PERIOD_MS: u64 = 3000;
pub const DEFAULT_BALANCE_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_BALANCE_POLL_MAX_ATTEMPTS: u32 = 30;

const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";
const DEFAULT_NODE_DIR_NAME: &str = "node";

fn get_base_dir() -> PathBuf {
    let mut path = home_dir().unwrap_or_default();
    path.push(".lnh");
    path
}

fn get_default_config_file() -> PathBuf {
    let mut path = get_base_dir();
    path.push(DEFAULT_CONFIG_FILE_NAME);
    path
}

// Use prefix `node-`/`NODE_`
#[derive(ClapSerde, Debug, Clone)]
pub struct NodeConfig {
    /// node working directory
    #[arg(
        name = "NODE_BASE_DIR",
        long = "node-base-dir",
        env,
        help = "working directory of the node [default: $BASE_DIR/node]"
    )]
    pub base_dir: Option<PathBuf>,

    /// display name used in logs
    #[default("lnd".to_string())]
    #[arg(name = "NODE_NAME", long = "node-name", env)]
    pub name: String,

    /// path to the daemon executable
    #[default("lnd".to_string())]
    #[arg(name = "NODE_BINARY", long = "node-binary", env)]
    pub binary: String,

    /// extra arguments passed to the daemon before the rpc listening flag (separated by `,`)
    #[arg(
        name = "NODE_EXTRA_ARGS",
        long = "node-extra-args",
        env,
        value_parser,
        num_args = 0..,
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    pub extra_args: Vec<String>,

    #[default("127.0.0.1".to_string())]
    #[arg(name = "NODE_RPC_HOST", long = "node-rpc-host", env)]
    pub rpc_host: String,

    /// rpc port, a free local port is reserved on every start when absent
    #[arg(name = "NODE_RPC_PORT", long = "node-rpc-port", env)]
    pub rpc_port: Option<u16>,

    #[default("--rpclisten".to_string())]
    #[arg(
        name = "NODE_RPC_LISTEN_FLAG",
        long = "node-rpc-listen-flag",
        env,
        allow_hyphen_values = true
    )]
    pub rpc_listen_flag: String,

    /// TLS certificate of the rpc server, relative paths are resolved against the base dir
    #[default("tls.cert".to_string())]
    #[arg(name = "NODE_TLS_CERT_PATH", long = "node-tls-cert-path", env)]
    pub tls_cert_path: String,

    /// macaroon for the rpc server, relative paths are resolved against the base dir
    #[arg(name = "NODE_MACAROON_PATH", long = "node-macaroon-path", env)]
    pub macaroon_path: Option<String>,

    /// log lines to wait for, in order, before the node is ready (separated by `,`)
    #[default(DEFAULT_READY_LOG_PATTERNS.map(String::from).to_vec())]
    #[arg(
        name = "NODE_READY_LOG_PATTERNS",
        long = "node-ready-log-patterns",
        env,
        value_parser,
        num_args = 0..,
        value_delimiter = ','
    )]
    pub ready_log_patterns: Vec<String>,

    #[default(DEFAULT_STARTUP_TIMEOUT_SECONDS)]
    #[arg(
        name = "NODE_STARTUP_TIMEOUT_SECONDS",
        long = "node-startup-timeout-seconds",
        env,
        help = format!("timeout of every readiness and funding log wait, default is {}", DEFAULT_STARTUP_TIMEOUT_SECONDS)
    )]
    pub startup_timeout_seconds: u64,

    #[default(DEFAULT_STARTUP_SETTLE_DELAY_MS)]
    #[arg(
        name = "NODE_STARTUP_SETTLE_DELAY_MS",
        long = "node-startup-settle-delay-ms",
        env
    )]
    pub startup_settle_delay_ms: u64,

    #[default(DEFAULT_RESTART_SETTLE_DELAY_MS)]
    #[arg(
        name = "NODE_RESTART_SETTLE_DELAY_MS",
        long = "node-restart-settle-delay-ms",
        env
    )]
    pub restart_settle_delay_ms: u64,

    #[default(DEFAULT_CHANNEL_OPEN_SETTLE_DELAY_MS)]
    #[arg(
        name = "NODE_CHANNEL_OPEN_SETTLE_DELAY_MS",
        long = "node-channel-open-settle-delay-ms",
        env
    )]
    pub channel_open_settle_delay_ms: u64,

    #[default(DEFAULT_STOP_GRACE_PERIOD_MS)]
    #[arg(
        name = "NODE_STOP_GRACE_PERIOD_MS",
        long = "node-stop-grace-period-ms",
        env
    )]
    pub stop_grace_period_ms: u64,

    #[default(DEFAULT_BALANCE_POLL_INTERVAL_MS)]
    #[arg(
        name = "NODE_BALANCE_POLL_INTERVAL_MS",
        long = "node-balance-poll-interval-ms",
        env
    )]
    pub balance_poll_interval_ms: u64,

    #[default(DEFAULT_BALANCE_POLL_MAX_ATTEMPTS)]
    #[arg(
        name = "NODE_BALANCE_POLL_MAX_ATTEMPTS",
        long = "node-balance-poll-max-attempts",
        env
    )]
    pub balance_poll_max_attempts: u32,

    #[default(crate::process::DEFAULT_LOG_FILE_NAME.to_string())]
    #[arg(name = "NODE_LOG_FILE_NAME", long = "node-log-file-name", env)]
    pub log_file_name: String,

    /// fund the wallet with this amount from bitcoind after startup, 0 to skip
    #[default(0)]
    #[arg(name = "NODE_INITIAL_FUNDING_SATS", long = "node-initial-funding-sats", env)]
    pub initial_funding_sats: u64,
}

impl NodeConfig {
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| get_base_dir().join(DEFAULT_NODE_DIR_NAME))
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_relative() {
            self.base_dir().join(path)
        } else {
            path
        }
    }

    pub fn resolve_tls_cert_path(&self) -> PathBuf {
        self.resolve_path(&self.tls_cert_path)
    }

    pub fn resolve_macaroon_path(&self) -> Option<PathBuf> {
        self.macaroon_path
            .as_deref()
            .map(|macaroon_path| self.resolve_path(macaroon_path))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn startup_settle_delay(&self) -> Duration {
        Duration::from_millis(self.startup_settle_delay_ms)
    }

    pub fn restart_settle_delay(&self) -> Duration {
        Duration::from_millis(self.restart_settle_delay_ms)
    }

    pub fn channel_open_settle_delay(&self) -> Duration {
        Duration::from_millis(self.channel_open_settle_delay_ms)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_interval_ms)
    }
}

// Use prefix `bitcoind-`/`BITCOIND_`
#[derive(ClapSerde, Debug, Clone)]
pub struct BitcoindConfig {
    #[default("http://127.0.0.1:18443".to_string())]
    #[arg(name = "BITCOIND_RPC_URL", long = "bitcoind-rpc-url", env)]
    pub rpc_url: String,

    #[arg(name = "BITCOIND_RPC_USER", long = "bitcoind-rpc-user", env)]
    pub rpc_user: Option<String>,

    #[arg(name = "BITCOIND_RPC_PASSWORD", long = "bitcoind-rpc-password", env)]
    pub rpc_password: Option<String>,

    /// cookie file, used when user and password are absent
    #[arg(name = "BITCOIND_COOKIE_FILE", long = "bitcoind-cookie-file", env)]
    pub cookie_file: Option<PathBuf>,
}

impl BitcoindConfig {
    /// User and password for the rpc server, from the config or the cookie file.
    pub fn credentials(&self) -> Result<Option<(String, String)>> {
        if let (Some(user), Some(password)) = (&self.rpc_user, &self.rpc_password) {
            return Ok(Some((user.clone(), password.clone())));
        }
        let Some(cookie_file) = &self.cookie_file else {
            return Ok(None);
        };
        let cookie = std::fs::read_to_string(cookie_file)?;
        let (user, password) = cookie.trim().split_once(':').ok_or_else(|| {
            Error::Config(format!("malformed bitcoind cookie file {:?}", cookie_file))
        })?;
        Ok(Some((user.to_string(), password.to_string())))
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// config file
    #[arg(short, long = "config", help = format!("config file [default: {:?} or $BASE_DIR/config.yml]", get_default_config_file()))]
    config_path: Option<std::path::PathBuf>,

    /// base directory
    #[arg(short = 'd', long = "dir", help = format!("base directory for all [default: {:?}]", get_base_dir()))]
    base_dir: Option<std::path::PathBuf>,

    /// config for the supervised node
    #[command(flatten)]
    pub node: <NodeConfig as ClapSerde>::Opt,

    /// config for the bitcoind used to fund the node
    #[command(flatten)]
    pub bitcoind: <BitcoindConfig as ClapSerde>::Opt,
}

#[derive(Deserialize)]
struct SerializedConfig {
    node: Option<<NodeConfig as ClapSerde>::Opt>,
    bitcoind: Option<<BitcoindConfig as ClapSerde>::Opt>,
}

#[derive(Debug)]
pub struct Config {
    pub base_dir: PathBuf,
    pub node: NodeConfig,
    pub bitcoind: BitcoindConfig,
}

impl Config {
    /// Merges command line arguments over the YAML config file.
    pub fn parse() -> Result<Self> {
        let mut args = Args::parse();

        let base_dir = args.base_dir.clone().unwrap_or_else(get_base_dir);

        let config_file = args
            .config_path
            .take()
            .or(args.base_dir.map(|x| x.join(DEFAULT_CONFIG_FILE_NAME)))
            .unwrap_or_else(get_default_config_file);

        let config_from_file = match File::open(&config_file) {
            Ok(file) => Some(
                serde_yaml::from_reader::<_, SerializedConfig>(BufReader::new(file)).map_err(
                    |err| Error::Config(format!("invalid config file {:?}: {}", config_file, err)),
                )?,
            ),
            Err(_) => None,
        };

        if args.node.base_dir.is_none() {
            args.node.base_dir = Some(Some(base_dir.join(DEFAULT_NODE_DIR_NAME)));
        }

        let (node, bitcoind) = match config_from_file {
            Some(SerializedConfig { node, bitcoind }) => (
                node.map(|c| NodeConfig::from(c).merge(&mut args.node)),
                bitcoind.map(|c| BitcoindConfig::from(c).merge(&mut args.bitcoind)),
            ),
            None => (None, None),
        };

        Ok(Self {
            base_dir,
            node: node.unwrap_or_else(|| NodeConfig::from(&mut args.node)),
            bitcoind: bitcoind.unwrap_or_else(|| BitcoindConfig::from(&mut args.bitcoind)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.binary, "lnd");
        assert_eq!(config.rpc_listen_flag, "--rpclisten");
        assert_eq!(config.rpc_port, None);
        assert_eq!(
            config.ready_log_patterns,
            vec!["RPC server listening on", "Done catching up block hashes"]
        );
        assert_eq!(config.startup_settle_delay(), Duration::from_secs(5));
        assert_eq!(config.stop_grace_period(), Duration::from_secs(3));
        assert_eq!(config.balance_poll_max_attempts, 30);
    }

    #[test]
    fn test_relative_paths_resolve_against_base_dir() {
        let config = NodeConfig {
            base_dir: Some(PathBuf::from("/tmp/lnh-node")),
            macaroon_path: Some("data/admin.macaroon".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_tls_cert_path(),
            PathBuf::from("/tmp/lnh-node/tls.cert")
        );
        assert_eq!(
            config.resolve_macaroon_path(),
            Some(PathBuf::from("/tmp/lnh-node/data/admin.macaroon"))
        );

        let config = NodeConfig {
            tls_cert_path: "/etc/lnd/tls.cert".to_string(),
            ..config
        };
        assert_eq!(
            config.resolve_tls_cert_path(),
            PathBuf::from("/etc/lnd/tls.cert")
        );
    }

    #[test]
    fn test_bitcoind_credentials_from_cookie_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let cookie_file = dir.path().join(".cookie");
        std::fs::write(&cookie_file, "__cookie__:secret\n").expect("write cookie");

        let config = BitcoindConfig {
            cookie_file: Some(cookie_file),
            ..Default::default()
        };
        assert_eq!(
            config.credentials().expect("read credentials"),
            Some(("__cookie__".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_bitcoind_credentials_prefer_user_and_password() {
        let config = BitcoindConfig {
            rpc_user: Some("user".to_string()),
            rpc_password: Some("pass".to_string()),
            cookie_file: Some(PathBuf::from("/nonexistent/.cookie")),
            ..Default::default()
        };
        assert_eq!(
            config.credentials().expect("read credentials"),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert_eq!(BitcoindConfig::default().credentials().expect("none"), None);
    }

    #[test]
    fn test_node_config_from_yaml() {
        let yaml = r#"
node:
  binary: /usr/local/bin/lnd
  rpc_port: 10009
  extra_args:
    - --bitcoin.regtest
    - --bitcoind.rpchost=127.0.0.1:18443
"#;
        let serialized: SerializedConfig = serde_yaml::from_str(yaml).expect("parse yaml");
        let node = NodeConfig::from(serialized.node.expect("node section"));
        assert_eq!(node.binary, "/usr/local/bin/lnd");
        assert_eq!(node.rpc_port, Some(10009));
        assert_eq!(node.extra_args.len(), 2);
        assert_eq!(node.rpc_host, "127.0.0.1");
        assert!(serialized.bitcoind.is_none());
    }
}
