//! End-to-end tests against real relays on loopback ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use dotsync::network::{Ledger, RelayServer, RelayServerError, ServerConfig, TransportError};
use dotsync::{
    member_path, Patch, Position, Snapshot, SnapshotStore, Transaction, TransportAdapter,
    TransportConfig,
};

const WAIT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: SocketAddr,
    server: Arc<RelayServer>,
    handle: JoinHandle<Result<(), RelayServerError>>,
}

impl TestRelay {
    async fn start(name: &str, peers: Vec<String>) -> Self {
        Self::start_on(bind().await, name, peers)
    }

    fn start_on(listener: TcpListener, name: &str, peers: Vec<String>) -> Self {
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig {
            bind_addr: addr,
            name: name.to_string(),
            peers,
            replication_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let server = Arc::new(RelayServer::new(config));
        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });
        Self { addr, server, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn replace(&self, body: &str) -> reqwest::StatusCode {
        reqwest::Client::new()
            .post(self.url("/replace"))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn get_json(&self, path: &str) -> Value {
        reqwest::get(self.url(path)).await.unwrap().json().await.unwrap()
    }

    async fn stop(self) {
        self.server.shutdown();
        let result = tokio::time::timeout(WAIT, self.handle).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}

async fn bind() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

fn add(player: &str, x: i64, y: i64) -> String {
    Patch::add(member_path(player), json!({ "x": x, "y": y }))
        .to_json()
        .unwrap()
}

async fn next_transaction<S>(ws: &mut S) -> Transaction
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => return Transaction::from_json(&text).unwrap(),
            _ => continue,
        }
    }
}

fn adapter_for(relay: &TestRelay, store: Arc<SnapshotStore>) -> Arc<TransportAdapter> {
    Arc::new(TransportAdapter::new(
        TransportConfig::for_host(&relay.addr.to_string()),
        store,
    ))
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_replace_updates_document_and_clock() {
    let relay = TestRelay::start("alpha", Vec::new()).await;

    assert_eq!(relay.replace(&add("alice", 20, 20)).await, reqwest::StatusCode::OK);
    assert_eq!(relay.replace(&add("alice", 20, 19)).await, reqwest::StatusCode::OK);

    assert_eq!(relay.get_json("/get").await, json!({ "alice": { "x": 20, "y": 19 } }));
    assert_eq!(relay.get_json("/vclock").await, json!({ "alpha": 2 }));

    relay.stop().await;
}

#[tokio::test]
async fn test_bad_patch_is_rejected() {
    let relay = TestRelay::start("alpha", Vec::new()).await;

    assert_eq!(relay.replace("not json").await, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(
        relay.replace(r#"[{"op":"remove","path":"/ghost"}]"#).await,
        reqwest::StatusCode::BAD_REQUEST
    );
    assert_eq!(relay.get_json("/get").await, json!({}));

    relay.stop().await;
}

#[tokio::test]
async fn test_subscriber_receives_backlog_then_live() {
    let relay = TestRelay::start("alpha", Vec::new()).await;
    relay.replace(&add("alice", 1, 1)).await;
    relay.replace(&add("bob", 2, 2)).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", relay.addr)).await.unwrap();

    let first = next_transaction(&mut ws).await;
    let second = next_transaction(&mut ws).await;
    assert_eq!((first.source.as_str(), first.id), ("alpha", 1));
    assert_eq!((second.source.as_str(), second.id), ("alpha", 2));

    relay.replace(&add("carol", 3, 3)).await;
    let third = next_transaction(&mut ws).await;
    assert_eq!(third.id, 3);
    assert_eq!(third.payload, add("carol", 3, 3));

    relay.stop().await;
}

#[tokio::test]
async fn test_adapter_sees_own_move_after_echo() {
    let relay = TestRelay::start("alpha", Vec::new()).await;
    let store = Arc::new(SnapshotStore::new());
    let adapter = adapter_for(&relay, store.clone());
    let running = adapter.clone();
    let transport = tokio::spawn(async move { running.run().await });

    adapter.submit(Patch::add(member_path("alice"), json!({ "x": 20, "y": 20 })));

    let watched = store.clone();
    eventually(|| {
        let store = watched.clone();
        async move { store.current().get("alice") == Some(Position::new(20.0, 20.0)) }
    })
    .await;

    adapter.shutdown();
    tokio::time::timeout(WAIT, transport).await.unwrap().unwrap();
    relay.stop().await;
}

#[tokio::test]
async fn test_peered_relays_converge() {
    let (la, lb) = (bind().await, bind().await);
    let (addr_a, addr_b) = (la.local_addr().unwrap(), lb.local_addr().unwrap());
    let a = TestRelay::start_on(la, "alpha", vec![addr_b.to_string()]);
    let b = TestRelay::start_on(lb, "beta", vec![addr_a.to_string()]);

    assert_eq!(a.replace(&add("alice", 20, 20)).await, reqwest::StatusCode::OK);
    assert_eq!(b.replace(&add("bob", 5, 5)).await, reqwest::StatusCode::OK);

    let expected = json!({ "alice": { "x": 20, "y": 20 }, "bob": { "x": 5, "y": 5 } });
    for relay in [&a, &b] {
        let expected = expected.clone();
        eventually(move || {
            let expected = expected.clone();
            async move { relay.get_json("/get").await == expected }
        })
        .await;
        assert_eq!(relay.get_json("/vclock").await, json!({ "alpha": 1, "beta": 1 }));
    }

    // Each relay re-broadcasts what it learned; the clock stops the echo.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.server.ledger().log_len().await, 2);
    assert_eq!(b.server.ledger().log_len().await, 2);

    b.stop().await;
    a.stop().await;
}

#[tokio::test]
async fn test_client_replica_matches_relay_document() {
    let ledger = Ledger::default();
    let store = SnapshotStore::new();
    let payloads = [
        r#"[{"op":"add","path":"/alice","value":{"x":20.5,"y":20}}]"#,
        r#"[{"op":"add","path":"/bob","value":{"x":1,"y":2,"hp":3}}]"#,
        r#"[{"op":"replace","path":"/bob/hp","value":4}]"#,
        r#"[{"op":"add","path":"/banner","value":"hello"}]"#,
        r#"[{"op":"remove","path":"/ghost"}]"#,
    ];

    for payload in payloads {
        let relay_ok = ledger.submit("alpha", payload.to_string()).await.is_ok();
        let client_ok = store.apply(&Patch::from_json(payload).unwrap()).is_ok();
        assert_eq!(relay_ok, client_ok, "diverged on {}", payload);
    }

    assert_eq!(store.current().document(), &ledger.document().await);
    assert_eq!(store.current().get("alice"), Some(Position::new(20.5, 20.0)));
    assert_eq!(store.current().get("bob"), Some(Position::new(1.0, 2.0)));
}

#[tokio::test]
async fn test_adapter_reports_rejected_patch() {
    let relay = TestRelay::start("alpha", Vec::new()).await;
    let store = Arc::new(SnapshotStore::new());
    let adapter = adapter_for(&relay, store.clone());
    let before = store.current();

    let result = adapter.post_patch(&Patch::remove(member_path("ghost"))).await;
    assert!(matches!(
        result,
        Err(TransportError::Status(status)) if status == reqwest::StatusCode::BAD_REQUEST
    ));

    // The fire-and-forget path logs the same failure and returns nothing.
    adapter.submit(Patch::remove(member_path("ghost")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(Arc::ptr_eq(&before, &store.current()));
    assert_eq!(relay.get_json("/get").await, json!({}));

    relay.stop().await;
}

#[tokio::test]
async fn test_connect_replaces_stale_snapshot() {
    let relay = TestRelay::start("alpha", Vec::new()).await;
    relay.replace(&add("alice", 1, 1)).await;

    let stale: Snapshot = [("ghost".to_string(), Position::new(9.0, 9.0))].into_iter().collect();
    let store = Arc::new(SnapshotStore::with_snapshot(stale));
    let adapter = adapter_for(&relay, store.clone());
    let running = adapter.clone();
    let transport = tokio::spawn(async move { running.run().await });

    let watched = store.clone();
    eventually(|| {
        let store = watched.clone();
        async move { store.current().get("alice").is_some() }
    })
    .await;
    assert_eq!(store.current().document(), &json!({ "alice": { "x": 1, "y": 1 } }));

    adapter.shutdown();
    tokio::time::timeout(WAIT, transport).await.unwrap().unwrap();
    relay.stop().await;
}
