use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::process::{LogBuffer, LogMatch, SupervisedProcess};
use crate::rpc::RpcEndpoint;
use crate::{Error, NodeConfig, Result};

/// Reserves a free local port by binding to port 0 and releasing it.
pub fn reserve_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn display_name(config: &NodeConfig, rpc_port: u16) -> String {
    format!("{}({})", config.name, rpc_port)
}

/// The daemon process of one node, listening for RPC on an assigned port.
pub struct NodeDaemon {
    config: NodeConfig,
    process: SupervisedProcess,
    rpc_port: u16,
    // An ephemeral port is released on stop and must be reserved again.
    port_released: bool,
}

impl NodeDaemon {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let rpc_port = match config.rpc_port {
            Some(port) => port,
            None => reserve_port()?,
        };
        let process = SupervisedProcess::new(
            display_name(&config, rpc_port),
            config.base_dir(),
            &config.binary,
            Vec::new(),
        )
        .with_grace_period(config.stop_grace_period())
        .with_log_file_name(config.log_file_name.clone());
        Ok(Self {
            config,
            process,
            rpc_port,
            port_released: false,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn process(&self) -> &SupervisedProcess {
        &self.process
    }

    pub fn log(&self) -> Arc<LogBuffer> {
        self.process.log()
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.push(format!(
            "{}={}:{}",
            self.config.rpc_listen_flag, self.config.rpc_host, self.rpc_port
        ));
        args
    }

    /// Starts the daemon and waits until every readiness milestone was logged.
    pub async fn start(&mut self) -> Result<()> {
        if self.port_released {
            self.rpc_port = reserve_port()?;
            self.port_released = false;
            self.process.set_name(display_name(&self.config, self.rpc_port));
        }
        self.process.set_args(self.command_args());
        self.process.start().await?;

        let timeout = self.config.startup_timeout();
        for pattern in &self.config.ready_log_patterns {
            self.process.wait_for_log(pattern, timeout).await?;
        }
        sleep(self.config.startup_settle_delay()).await;

        info!(
            "{} started (pid: {:?}, rpc port: {})",
            self.process.name(),
            self.process.pid(),
            self.rpc_port
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if !self.process.is_running() {
            return Ok(());
        }
        // The process is gone even when stopping it reported an error.
        let stopped = self.process.stop().await;
        if self.config.rpc_port.is_none() {
            self.port_released = true;
        }
        stopped
    }

    pub async fn wait_for_log(&self, pattern: &str, timeout: Duration) -> Result<LogMatch> {
        self.process.wait_for_log(pattern, timeout).await
    }

    /// Waits until the daemon has processed the block `block_hash`, returns its height.
    pub async fn wait_for_block(&self, block_hash: &str) -> Result<u32> {
        debug!("Waiting for {} to learn about {}", self.process.name(), block_hash);
        let pattern = format!(
            "NTFN: New block: height=([0-9]+), sha={}",
            regex::escape(block_hash)
        );
        let found = self
            .wait_for_log(&pattern, self.config.startup_timeout())
            .await?;
        found
            .capture(1)
            .and_then(|height| height.parse().ok())
            .ok_or(Error::UnexpectedLogLine(found.line))
    }

    /// Where the RPC server of the running daemon can be reached.
    pub async fn rpc_endpoint(&self) -> Result<RpcEndpoint> {
        let tls_cert = tokio::fs::read(self.config.resolve_tls_cert_path()).await?;
        let macaroon = match self.config.resolve_macaroon_path() {
            Some(path) => Some(tokio::fs::read(path).await?),
            None => None,
        };
        Ok(RpcEndpoint {
            host: self.config.rpc_host.clone(),
            port: self.rpc_port,
            tls_cert: Some(tls_cert),
            macaroon,
        })
    }
}
