use std::net::TcpListener;
use std::time::{Duration, Instant};

use crate::node::{reserve_port, LightningNode, NodeDaemon};
use crate::tests::mock_rpc::{new_mock_network, MockConnector};
use crate::tests::test_utils::{
    get_fake_node_config, init_tracing, TempDir, FAKE_LND_SCRIPT, FAKE_TLS_CERT,
};
use crate::Error;

const NODE_A: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const NODE_B: &str = "03bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const BLOCK_HASH: &str = "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206";

#[test]
fn test_reserve_port() {
    let port = reserve_port().expect("reserve port");
    assert_ne!(port, 0);
    TcpListener::bind(("127.0.0.1", port)).expect("port is free again");
}

#[tokio::test]
async fn test_daemon_command_line() {
    init_tracing();
    let dir = TempDir::new("test-daemon-command-line");
    let mut daemon = NodeDaemon::new(get_fake_node_config(&dir, FAKE_LND_SCRIPT))
        .expect("create daemon");
    daemon.start().await.expect("start daemon");

    let listen = format!("--rpclisten=127.0.0.1:{}", daemon.rpc_port());
    assert_eq!(
        daemon.process().args(),
        ["-c".to_string(), FAKE_LND_SCRIPT.to_string(), listen.clone()]
    );
    let found = daemon
        .wait_for_log("RPC server listening on", Duration::from_secs(1))
        .await
        .expect("listening line");
    assert_eq!(found.line, format!("RPC server listening on {}", listen));

    daemon.stop().await.expect("stop daemon");
    assert!(!daemon.is_running());
    assert!(daemon.process().log_path().exists());
}

#[tokio::test]
async fn test_fixed_rpc_port_is_kept() {
    let dir = TempDir::new("test-daemon-fixed-port");
    let port = reserve_port().expect("reserve port");
    let config = crate::NodeConfig {
        rpc_port: Some(port),
        ..get_fake_node_config(&dir, FAKE_LND_SCRIPT)
    };
    let mut daemon = NodeDaemon::new(config).expect("create daemon");
    assert_eq!(daemon.process().name(), format!("fake-lnd({})", port));

    daemon.start().await.expect("start daemon");
    daemon.stop().await.expect("stop daemon");
    daemon.start().await.expect("start daemon again");
    assert_eq!(daemon.rpc_port(), port);
    daemon.stop().await.expect("stop daemon");
}

#[tokio::test]
async fn test_new_port_is_reserved_after_stop() {
    let dir = TempDir::new("test-daemon-new-port");
    let mut daemon = NodeDaemon::new(get_fake_node_config(&dir, FAKE_LND_SCRIPT))
        .expect("create daemon");
    daemon.start().await.expect("start daemon");
    daemon.stop().await.expect("stop daemon");

    let old_port = daemon.rpc_port();
    let _taken = TcpListener::bind(("127.0.0.1", old_port)).expect("take the old port");
    daemon.start().await.expect("start daemon again");
    let new_port = daemon.rpc_port();
    assert_ne!(new_port, old_port);
    assert_eq!(daemon.process().name(), format!("fake-lnd({})", new_port));
    daemon
        .wait_for_log(
            &regex::escape(&format!("--rpclisten=127.0.0.1:{}", new_port)),
            Duration::from_secs(1),
        )
        .await
        .expect("new port on the command line");
    daemon.stop().await.expect("stop daemon");
}

#[tokio::test]
async fn test_port_is_released_when_stop_fails() {
    let dir = TempDir::new("test-daemon-failed-stop");
    let config = crate::NodeConfig {
        log_file_name: "missing/daemon.log".to_string(),
        ..get_fake_node_config(&dir, FAKE_LND_SCRIPT)
    };
    let mut daemon = NodeDaemon::new(config).expect("create daemon");
    daemon.start().await.expect("start daemon");
    assert!(matches!(daemon.stop().await, Err(Error::IO(_))));
    assert!(!daemon.is_running());

    let old_port = daemon.rpc_port();
    let _taken = TcpListener::bind(("127.0.0.1", old_port)).expect("take the old port");
    daemon.start().await.expect("start daemon again");
    assert_ne!(daemon.rpc_port(), old_port);

    std::fs::create_dir(dir.path_buf().join("missing")).expect("create log dir");
    daemon.stop().await.expect("stop daemon");
}

#[tokio::test]
async fn test_start_connects_to_the_daemon_endpoint() {
    let dir = TempDir::new("test-node-start");
    let network = new_mock_network(NODE_A);
    let connector = MockConnector::new(network.clone());
    let endpoints = connector.endpoints.clone();
    let mut node = LightningNode::new(get_fake_node_config(&dir, FAKE_LND_SCRIPT), connector)
        .expect("create node");

    node.start().await.expect("start node");
    assert!(node.daemon().is_running());
    assert!(node.ping().await);
    assert_eq!(node.identity().await.expect("identity"), NODE_A);

    {
        let endpoints = endpoints.lock().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].host, "127.0.0.1");
        assert_eq!(endpoints[0].port, node.daemon().rpc_port());
        assert_eq!(endpoints[0].tls_cert.as_deref(), Some(FAKE_TLS_CERT));
        assert_eq!(endpoints[0].macaroon, None);
    }

    node.stop().await.expect("stop node");
    assert!(!node.ping().await);
    node.stop().await.expect("second stop is a no-op");
}

#[tokio::test]
async fn test_restart_rebuilds_the_rpc_client() {
    let dir = TempDir::new("test-node-restart");
    let network = new_mock_network(NODE_A);
    let connector = MockConnector::new(network.clone());
    let endpoints = connector.endpoints.clone();
    let mut node = LightningNode::new(get_fake_node_config(&dir, FAKE_LND_SCRIPT), connector)
        .expect("create node");

    node.start().await.expect("start node");
    assert_eq!(node.identity().await.expect("identity"), NODE_A);

    // A restarted node comes back with whatever identity the daemon reports.
    network.lock().unwrap().identity_pubkey = NODE_B.to_string();
    node.restart().await.expect("restart node");
    assert!(node.daemon().is_running());
    assert_eq!(node.identity().await.expect("identity"), NODE_B);

    {
        let endpoints = endpoints.lock().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].port, node.daemon().rpc_port());
    }
    assert_eq!(
        node.daemon().process().name(),
        format!("fake-lnd({})", node.daemon().rpc_port())
    );
    let listen = format!("--rpclisten=127.0.0.1:{}", node.daemon().rpc_port());
    node.wait_for_log(&regex::escape(&listen))
        .await
        .expect("current port in the log");

    node.stop().await.expect("stop node");
}

#[tokio::test]
async fn test_wait_for_block() {
    let dir = TempDir::new("test-node-wait-for-block");
    let script = format!(
        r#"{}
echo "[INF] CRTR: NTFN: New block: height=120, sha={}"
exec sleep 60"#,
        FAKE_LND_SCRIPT.trim_end_matches("exec sleep 60").trim_end(),
        BLOCK_HASH
    );
    let mut node = LightningNode::new(
        get_fake_node_config(&dir, &script),
        MockConnector::new(new_mock_network(NODE_A)),
    )
    .expect("create node");

    node.start().await.expect("start node");
    assert_eq!(node.wait_for_block(BLOCK_HASH).await.expect("block"), 120);
    node.stop().await.expect("stop node");
}

#[tokio::test]
async fn test_startup_times_out_without_readiness() {
    let dir = TempDir::new("test-node-startup-timeout");
    let config = crate::NodeConfig {
        ready_log_patterns: vec!["never ready".to_string()],
        startup_timeout_seconds: 1,
        ..get_fake_node_config(&dir, FAKE_LND_SCRIPT)
    };
    let mut node =
        LightningNode::new(config, MockConnector::new(new_mock_network(NODE_A))).expect("create node");

    let now = Instant::now();
    assert!(matches!(
        node.start().await,
        Err(Error::Timeout { pattern, .. }) if pattern == "never ready"
    ));
    assert!(now.elapsed() >= Duration::from_secs(1));
    assert!(!node.ping().await);

    node.stop().await.expect("stop node");
    assert!(!node.daemon().is_running());
}
