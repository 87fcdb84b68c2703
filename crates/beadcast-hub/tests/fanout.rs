//! Fan-out behaviour of the hub against fake sinks and real WebSocket clients.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beadcast_core::types::{MutationEvent, Operation};
use beadcast_hub::{
    ClientRegistry, ClientSink, HubConfig, HubError, Payload, PushServer, WsRegistry,
    broadcast_queue,
};
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

// ─── Fakes ───────────────────────────────────────────────────────────

/// Records payloads. Can be told to fail on one specific payload, or to
/// wait for a permit before every write.
#[derive(Default)]
struct FakeSink {
    /// Writes started, including ones still waiting on the gate.
    started: AtomicUsize,
    received: Mutex<Vec<String>>,
    fail_on: Option<String>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeSink {
    fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing_on(payload: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(payload.to_owned()),
            ..Self::default()
        })
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

struct Shared(Arc<FakeSink>);

impl ClientSink for Shared {
    async fn deliver(&self, payload: &Payload) -> Result<(), HubError> {
        self.0.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.0.gate {
            gate.acquire()
                .await
                .map_err(|e| HubError::Delivery(e.to_string()))?
                .forget();
        }
        if self.0.fail_on.as_deref() == Some(&**payload) {
            return Err(HubError::Delivery("connection reset".into()));
        }
        self.0.received.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    async fn close(&self) {}
}

async fn wait_for<F>(what: &str, mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─── Hub with fake sinks ─────────────────────────────────────────────

#[tokio::test]
async fn every_client_gets_every_event_in_order() {
    let registry = Arc::new(ClientRegistry::new());
    let sinks: Vec<Arc<FakeSink>> = (0..3).map(|_| FakeSink::healthy()).collect();
    for s in &sinks {
        registry.register(Shared(Arc::clone(s))).await;
    }

    let (tx, hub) = broadcast_queue(HubConfig::default(), Arc::clone(&registry));
    let cancel = CancellationToken::new();
    let hub_task = tokio::spawn(hub.run(cancel.clone()));

    let expected: Vec<String> = (0..20).map(|i| format!("e{i}")).collect();
    for p in &expected {
        tx.send(Payload::from(p.as_str())).await.unwrap();
    }
    drop(tx);
    assert_eq!(hub_task.await.unwrap(), 20);

    for s in &sinks {
        assert_eq!(s.received(), expected);
    }
}

#[tokio::test]
async fn write_failure_on_one_client_isolated() {
    let registry = Arc::new(ClientRegistry::new());
    let a = FakeSink::failing_on("E");
    let b = FakeSink::healthy();
    let a_handle = registry.register(Shared(Arc::clone(&a))).await;
    registry.register(Shared(Arc::clone(&b))).await;

    let (tx, hub) = broadcast_queue(HubConfig::default(), Arc::clone(&registry));
    tokio::spawn(hub.run(CancellationToken::new()));

    tx.send(Payload::from("D")).await.unwrap();
    tx.send(Payload::from("E")).await.unwrap();
    wait_for("eviction of A", async || !registry.contains(a_handle.id()).await).await;

    // A late joiner registered before the next event receives it normally.
    let c = FakeSink::healthy();
    registry.register(Shared(Arc::clone(&c))).await;
    tx.send(Payload::from("F")).await.unwrap();

    wait_for("B to get F", async || b.received().len() == 3).await;
    wait_for("C to get F", async || c.received().len() == 1).await;

    assert_eq!(a.received(), vec!["D"]);
    assert!(a_handle.is_closed());
    assert_eq!(b.received(), vec!["D", "E", "F"]);
    assert_eq!(c.received(), vec!["F"]);
}

#[tokio::test]
async fn full_queue_blocks_producer_without_loss() {
    let registry = Arc::new(ClientRegistry::new());
    let gate = Arc::new(Semaphore::new(0));
    let sink = FakeSink::gated(Arc::clone(&gate));
    registry.register(Shared(Arc::clone(&sink))).await;

    let config = HubConfig {
        queue_capacity: 2,
        write_timeout: Duration::from_secs(30),
    };
    let (tx, hub) = broadcast_queue(config, Arc::clone(&registry));
    tokio::spawn(hub.run(CancellationToken::new()));

    let sent = Arc::new(AtomicUsize::new(0));
    let producer = {
        let sent = Arc::clone(&sent);
        tokio::spawn(async move {
            for i in 0..6 {
                tx.send(Payload::from(format!("e{i}").as_str())).await.unwrap();
                sent.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    // One payload held by the stalled dispatch, two queued, the fourth blocked.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sent.load(Ordering::SeqCst), 3);
    assert!(!producer.is_finished());

    gate.add_permits(6);
    tokio::time::timeout(Duration::from_secs(5), producer)
        .await
        .expect("producer should finish once drained")
        .unwrap();
    wait_for("all deliveries", async || sink.received().len() == 6).await;
    assert_eq!(sink.received(), vec!["e0", "e1", "e2", "e3", "e4", "e5"]);
}

#[tokio::test]
async fn stalled_client_times_out_and_is_evicted() {
    let registry = Arc::new(ClientRegistry::new());
    let stalled = FakeSink::gated(Arc::new(Semaphore::new(0)));
    let healthy = FakeSink::healthy();
    let stalled_handle = registry.register(Shared(Arc::clone(&stalled))).await;
    registry.register(Shared(Arc::clone(&healthy))).await;

    let config = HubConfig {
        queue_capacity: 8,
        write_timeout: Duration::from_millis(50),
    };
    let (_tx, hub) = broadcast_queue(config, Arc::clone(&registry));
    let report = hub.dispatch_one(&Payload::from("x")).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.evicted, vec![stalled_handle.id()]);
    assert_eq!(healthy.received(), vec!["x"]);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn registry_stays_writable_during_stuck_dispatch() {
    let registry = Arc::new(ClientRegistry::new());
    let stuck = FakeSink::gated(Arc::new(Semaphore::new(0)));
    let stuck_handle = registry.register(Shared(Arc::clone(&stuck))).await;

    let config = HubConfig {
        queue_capacity: 8,
        write_timeout: Duration::from_secs(60),
    };
    let (tx, hub) = broadcast_queue(config, Arc::clone(&registry));
    tokio::spawn(hub.run(CancellationToken::new()));
    tx.send(Payload::from("x")).await.unwrap();
    wait_for("dispatch in flight", async || {
        stuck.started.load(Ordering::SeqCst) == 1
    })
    .await;

    let bound = Duration::from_millis(200);
    let joiner = tokio::time::timeout(bound, registry.register(Shared(FakeSink::healthy())))
        .await
        .expect("register blocked by an in-flight dispatch");
    assert!(registry.contains(joiner.id()).await);

    tokio::time::timeout(bound, registry.deregister(joiner.id()))
        .await
        .expect("deregister blocked by an in-flight dispatch")
        .expect("joiner was registered");
    tokio::time::timeout(bound, registry.deregister(stuck_handle.id()))
        .await
        .expect("deregister of the stuck client blocked")
        .expect("stuck client was registered");

    assert!(stuck_handle.is_closed());
    assert!(registry.is_empty().await);
    assert!(stuck.received().is_empty());
}

// ─── Real WebSocket clients ──────────────────────────────────────────

async fn start_push_server(registry: Arc<WsRegistry>) -> (SocketAddr, CancellationToken) {
    let cancel = CancellationToken::new();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = PushServer::new(addr, registry, cancel.clone())
        .with_drain_timeout(Duration::from_millis(200));
    let (listener, local_addr) = server.bind().await.unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    (local_addr, cancel)
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for push")
        .expect("stream ended")
        .expect("read error");
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {msg:?}");
    };
    text
}

#[tokio::test]
async fn websocket_clients_receive_serialized_events() {
    let registry = Arc::new(WsRegistry::new());
    let (addr, cancel) = start_push_server(Arc::clone(&registry)).await;
    let url = format!("ws://127.0.0.1:{}/ws", addr.port());

    let (mut ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    wait_for("two registrations", async || registry.len().await == 2).await;

    let (tx, hub) = broadcast_queue(HubConfig::default(), Arc::clone(&registry));
    tokio::spawn(hub.run(cancel.clone()));

    let event = MutationEvent::new("X-1", "issue", Operation::Updated, 1000);
    tx.send_event(&event).await.unwrap();

    for ws in [&mut ws1, &mut ws2] {
        let text = next_text(ws).await;
        let got: MutationEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(got, event);
    }
    cancel.cancel();
}

#[tokio::test]
async fn disconnecting_client_is_deregistered() {
    let registry = Arc::new(WsRegistry::new());
    let (addr, cancel) = start_push_server(Arc::clone(&registry)).await;
    let url = format!("ws://127.0.0.1:{}", addr.port());

    let (mut ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    wait_for("two registrations", async || registry.len().await == 2).await;

    ws1.close(None).await.unwrap();
    wait_for("deregistration", async || registry.len().await == 1).await;
    drop(ws2);
    wait_for("second deregistration", async || registry.is_empty().await).await;
    cancel.cancel();
}

#[tokio::test]
async fn close_all_disconnects_websocket_clients() {
    let registry = Arc::new(WsRegistry::new());
    let (addr, cancel) = start_push_server(Arc::clone(&registry)).await;
    let url = format!("ws://127.0.0.1:{}", addr.port());

    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    wait_for("registration", async || registry.len().await == 1).await;

    assert_eq!(registry.close_all().await, 1);
    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for close");
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "expected close, got {next:?}"
    );
    cancel.cancel();
}

#[tokio::test]
async fn handshake_after_shut_down_is_closed_at_once() {
    let registry = Arc::new(WsRegistry::new());
    let (addr, cancel) = start_push_server(Arc::clone(&registry)).await;
    let url = format!("ws://127.0.0.1:{}", addr.port());

    assert_eq!(registry.shut_down().await, 0);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("late client should be closed without waiting for a drain");
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "expected close, got {next:?}"
    );
    assert!(registry.is_empty().await);
    cancel.cancel();
}

#[tokio::test]
async fn connection_limit_enforced() {
    let registry = Arc::new(WsRegistry::new());
    let cancel = CancellationToken::new();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = PushServer::new(addr, Arc::clone(&registry), cancel.clone()).with_max_connections(1);
    let (listener, local) = server.bind().await.unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    let url = format!("ws://127.0.0.1:{}", local.port());

    let (_ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    wait_for("first registration", async || registry.len().await == 1).await;

    let second = tokio_tungstenite::connect_async(&url).await;
    assert!(second.is_err(), "second connection should be rejected");
    assert_eq!(registry.len().await, 1);
    cancel.cancel();
}

#[tokio::test]
async fn remote_origin_rejected() {
    let registry = Arc::new(WsRegistry::new());
    let (addr, cancel) = start_push_server(Arc::clone(&registry)).await;

    let mut req = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        format!("ws://127.0.0.1:{}", addr.port()),
    )
    .unwrap();
    req.headers_mut()
        .insert("Origin", "https://evil.example.com".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(req).await.is_err());
    assert!(registry.is_empty().await);
    cancel.cancel();
}
