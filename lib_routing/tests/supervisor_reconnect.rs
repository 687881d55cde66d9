//! Supervisor lifecycle tests against a loopback WebSocket backend.
//!
//! Each test plays the backend itself: bind an ephemeral port, accept the
//! supervisor's connection, and script the conversation. The retry interval
//! is shortened so reconnection scenarios run in milliseconds.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message, WebSocketStream};

use lib_routing::backend::link::SubscribeRequest;
use lib_routing::{
    routing_channel, BackendLinkConfig, ConnectionSupervisor, LinkState, SupervisorHandle,
};

const WAIT: Duration = Duration::from_secs(5);
const RETRY: Duration = Duration::from_millis(100);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    timeout(WAIT, accept_async(stream)).await.unwrap().unwrap()
}

/// Reads frames until the next subscribe request and returns its topics.
async fn read_subscribe(ws: &mut WebSocketStream<TcpStream>) -> Vec<String> {
    loop {
        let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            let request: SubscribeRequest = serde_json::from_str(&text).unwrap();
            return request.subscribe;
        }
    }
}

async fn wait_for_state(handle: &SupervisorHandle, want: LinkState) {
    timeout(WAIT, async {
        loop {
            if handle.state().await == want {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("supervisor never reached {:?}", want));
}

fn start(
    config: BackendLinkConfig,
) -> (
    SupervisorHandle,
    tokio::sync::mpsc::UnboundedReceiver<lib_routing::RoutedMessage>,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let (router_tx, router_rx) = routing_channel();
    let (supervisor, handle) = ConnectionSupervisor::new(config, router_tx);
    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));
    (handle, router_rx, shutdown_tx, task)
}

#[tokio::test]
async fn connects_subscribes_and_routes_frames() {
    let (listener, url) = bind().await;
    let config = BackendLinkConfig::new("price", url)
        .with_static_topics(["prices.spx", "prices.condor"])
        .with_retry_interval(RETRY);
    let (handle, mut router_rx, shutdown_tx, task) = start(config);

    let mut backend = accept(&listener).await;
    let mut topics = read_subscribe(&mut backend).await;
    topics.sort();
    assert_eq!(topics, vec!["prices.condor", "prices.spx"]);
    wait_for_state(&handle, LinkState::Connected).await;

    backend
        .send(Message::Text(
            r#"{"topic":"prices.spx","payload":"5000.1"}"#.into(),
        ))
        .await
        .unwrap();

    let routed = timeout(WAIT, router_rx.recv()).await.unwrap().unwrap();
    assert_eq!(routed.topic, "prices.spx");
    assert_eq!(routed.payload, "5000.1");

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn reconnects_and_resubscribes_static_and_dynamic_in_one_batch() {
    let (listener, url) = bind().await;
    let config = BackendLinkConfig::new("portfolio", url)
        .with_static_topics(["prices.condor"])
        .with_dynamic_prefix("prices.condor.portfolio.")
        .with_retry_interval(RETRY);
    let (handle, _router_rx, shutdown_tx, task) = start(config);

    let mut backend = accept(&listener).await;
    assert_eq!(read_subscribe(&mut backend).await, vec!["prices.condor"]);

    // A subscriber shows up for a portfolio condor tick.
    handle.subscribe_topic("prices.condor.portfolio.77");
    assert_eq!(
        read_subscribe(&mut backend).await,
        vec!["prices.condor.portfolio.77"]
    );

    // Backend goes away.
    drop(backend);
    wait_for_state(&handle, LinkState::Retrying).await;

    // One retry interval later the supervisor is back, resubscribing
    // everything it accumulated in a single batch.
    let mut backend = accept(&listener).await;
    let topics = read_subscribe(&mut backend).await;
    assert_eq!(topics, vec!["prices.condor", "prices.condor.portfolio.77"]);
    wait_for_state(&handle, LinkState::Connected).await;

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn duplicate_dynamic_subscribe_sends_one_upstream_request() {
    let (listener, url) = bind().await;
    let config = BackendLinkConfig::new("portfolio", url)
        .with_dynamic_prefix("prices.condor.portfolio.")
        .with_retry_interval(RETRY);
    let (handle, _router_rx, shutdown_tx, task) = start(config);

    let mut backend = accept(&listener).await;
    wait_for_state(&handle, LinkState::Connected).await;

    handle.subscribe_topic("prices.condor.portfolio.42");
    handle.subscribe_topic("prices.condor.portfolio.42");

    assert_eq!(
        read_subscribe(&mut backend).await,
        vec!["prices.condor.portfolio.42"]
    );
    // The duplicate must not produce a second subscribe frame.
    assert!(
        timeout(Duration::from_millis(300), backend.next())
            .await
            .is_err(),
        "duplicate dynamic subscribe reached the backend"
    );

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn malformed_frames_do_not_tear_the_connection_down() {
    let (listener, url) = bind().await;
    let config = BackendLinkConfig::new("trading", url)
        .with_static_topics(["trading.state"])
        .with_retry_interval(RETRY);
    let (handle, mut router_rx, shutdown_tx, task) = start(config);

    let mut backend = accept(&listener).await;
    read_subscribe(&mut backend).await;
    wait_for_state(&handle, LinkState::Connected).await;

    backend
        .send(Message::Text("this is not a frame".into()))
        .await
        .unwrap();
    backend
        .send(Message::Text(
            r#"{"topic":"trading.state","payload":"OPEN"}"#.into(),
        ))
        .await
        .unwrap();

    // The bad frame was dropped, the good one still flows.
    let routed = timeout(WAIT, router_rx.recv()).await.unwrap().unwrap();
    assert_eq!(routed.topic, "trading.state");
    assert_eq!(routed.payload, "OPEN");
    assert_eq!(handle.state().await, LinkState::Connected);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn recovers_once_the_backend_becomes_reachable() {
    // Reserve a port, then release it so the first connect attempt fails.
    let (listener, url) = bind().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = BackendLinkConfig::new("price", url)
        .with_static_topics(["prices.spx"])
        .with_retry_interval(RETRY);
    let (handle, _router_rx, shutdown_tx, task) = start(config);

    wait_for_state(&handle, LinkState::Retrying).await;

    // Backend comes up; the supervisor finds it within a retry interval.
    let listener = TcpListener::bind(addr).await.unwrap();
    let mut backend = accept(&listener).await;
    assert_eq!(read_subscribe(&mut backend).await, vec!["prices.spx"]);
    wait_for_state(&handle, LinkState::Connected).await;

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}
