//! # Backend Connection Supervisor
//!
//! One supervisor instance owns one point-to-point backend link (pricing,
//! trading, or portfolio) for the lifetime of the process. It is the only
//! writer of the link's state and of the pending retry handle.
//!
//! The lifecycle is a straight loop: `Connecting` -> `Connected` (subscribe
//! to everything accumulated so far in one batch) -> read until the
//! connection dies -> `Disconnected` -> `Retrying` (fixed interval, no cap)
//! -> `Connecting` again. Malformed frames never tear the connection down;
//! only transport-level failures do. There is no terminal state: the
//! supervisor retries for as long as the process runs and picks up where it
//! left off when the backend returns, resubscribing static and dynamic
//! topics together.
//!
//! Dynamic topics (portfolio condor ticks) arrive as commands from the
//! subscription gateway. A topic already in the accumulated set is not
//! subscribed a second time; one that arrives while the link is down is
//! remembered and joins the next resubscribe batch.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use crate::backend::link::{
    parse_frame, BackendLinkConfig, LinkError, LinkState, SubscribeRequest, SupervisorCommand,
};
use crate::core::gateway::DynamicTopicHandle;
use crate::core::router::RoutedMessage;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Why an established connection stopped being driven.
enum Disconnect {
    Shutdown,
    ConnectionLost(String),
    ReconnectRequested,
}

/// Cheap cloneable view of a running supervisor: observe its state, request
/// a reconnect, or feed it dynamic topics.
#[derive(Clone)]
pub struct SupervisorHandle {
    service_name: String,
    dynamic_prefix: Option<String>,
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    state: Arc<RwLock<LinkState>>,
}

impl SupervisorHandle {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Externally-raised reconnect request.
    pub fn request_reconnect(&self) {
        let _ = self.commands.send(SupervisorCommand::Reconnect);
    }

    /// Asks the supervisor to subscribe to a dynamically-discovered topic.
    pub fn subscribe_topic(&self, topic: &str) {
        let _ = self
            .commands
            .send(SupervisorCommand::SubscribeTopic(topic.to_string()));
    }

    /// The gateway-facing handle for this supervisor's dynamic namespace,
    /// if it has one.
    pub fn dynamic_handle(&self) -> Option<DynamicTopicHandle> {
        self.dynamic_prefix
            .as_ref()
            .map(|prefix| DynamicTopicHandle::new(prefix.clone(), self.commands.clone()))
    }
}

/// Owns the lifecycle of one point-to-point backend connection.
pub struct ConnectionSupervisor {
    config: BackendLinkConfig,
    router_tx: mpsc::UnboundedSender<RoutedMessage>,
    state: Arc<RwLock<LinkState>>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    // Topics learned from subscriber demand, kept across reconnects.
    dynamic_topics: HashSet<String>,
    // Pending retry handle; taken and cancelled when a reconnect succeeds.
    retry: Option<CancellationToken>,
}

impl ConnectionSupervisor {
    pub fn new(
        config: BackendLinkConfig,
        router_tx: mpsc::UnboundedSender<RoutedMessage>,
    ) -> (Self, SupervisorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(LinkState::Disconnected));
        let handle = SupervisorHandle {
            service_name: config.service_name.clone(),
            dynamic_prefix: config.dynamic_prefix.clone(),
            commands: cmd_tx,
            state: Arc::clone(&state),
        };
        let supervisor = Self {
            config,
            router_tx,
            state,
            commands: cmd_rx,
            dynamic_topics: HashSet::new(),
            retry: None,
        };
        (supervisor, handle)
    }

    /// Primary execution loop. Spawn this once the rest of the system --
    /// notably the front-end channel -- is up; the first subscribe goes out
    /// as soon as the first connect succeeds.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }

            self.set_state(LinkState::Connecting).await;
            log::info!(
                "Connecting to {} server: {}",
                self.config.service_name,
                self.config.endpoint_url
            );

            match connect_async(&self.config.endpoint_url).await {
                Ok((ws_stream, _)) => {
                    if let Some(token) = self.retry.take() {
                        token.cancel();
                        log::info!("{} server was successfully reconnected", self.config.service_name);
                    }
                    self.set_state(LinkState::Connected).await;

                    match self.drive_connection(ws_stream, &mut shutdown).await {
                        Disconnect::Shutdown => break,
                        Disconnect::ConnectionLost(why) => {
                            log::warn!(
                                "Transport error on {} link: {}",
                                self.config.service_name,
                                why
                            );
                            self.set_state(LinkState::Disconnected).await;
                        }
                        Disconnect::ReconnectRequested => {
                            self.set_state(LinkState::Disconnected).await;
                            continue;
                        }
                    }
                }
                Err(e) => {
                    log::warn!(
                        "Could not connect to {} server: {}",
                        self.config.service_name,
                        e
                    );
                    self.set_state(LinkState::Disconnected).await;
                }
            }

            if !self.wait_for_retry(&mut shutdown).await {
                break;
            }
        }

        self.set_state(LinkState::Disconnected).await;
        log::info!("{} supervisor shut down", self.config.service_name);
    }

    /// Drives one established connection: batched (re)subscribe, then a
    /// select loop over shutdown, gateway commands, and the socket.
    async fn drive_connection(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Disconnect {
        let (mut write, mut read): (WsSink, WsSource) = ws_stream.split();

        // Everything accumulated so far goes out in one batch.
        let mut topics: Vec<String> = self.config.static_topics.iter().cloned().collect();
        topics.extend(self.dynamic_topics.iter().cloned());
        topics.sort();
        if !topics.is_empty() {
            let count = topics.len();
            if let Err(e) = send_subscribe(&mut write, topics).await {
                return Disconnect::ConnectionLost(e.to_string());
            }
            log::info!(
                "Subscribed to {} topic(s) on the {} server",
                count,
                self.config.service_name
            );
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("{} supervisor shutting down...", self.config.service_name);
                    let _ = write.close().await;
                    return Disconnect::Shutdown;
                }
                Some(cmd) = self.commands.recv() => match cmd {
                    SupervisorCommand::SubscribeTopic(topic) => {
                        if self.register_dynamic(&topic) {
                            if let Err(e) = send_subscribe(&mut write, vec![topic]).await {
                                return Disconnect::ConnectionLost(e.to_string());
                            }
                        }
                    }
                    SupervisorCommand::Reconnect => {
                        log::info!("Reconnect requested for the {} server", self.config.service_name);
                        let _ = write.close().await;
                        return Disconnect::ReconnectRequested;
                    }
                },
                msg = read.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text),
                    Some(Ok(WsMessage::Binary(_))) => {
                        log::warn!("Ignoring unexpected binary frame from the {} server", self.config.service_name);
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Disconnect::ConnectionLost("Connection closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Disconnect::ConnectionLost(e.to_string()),
                }
            }
        }
    }

    /// One fixed-interval wait between reconnect attempts. Commands keep
    /// being serviced while the link is down: dynamic topics accumulate for
    /// the resubscribe batch, and a reconnect request short-circuits the
    /// wait. Returns false on shutdown.
    async fn wait_for_retry(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        self.set_state(LinkState::Retrying).await;
        let token = match &self.retry {
            Some(existing) => existing.clone(),
            None => {
                let token = CancellationToken::new();
                self.retry = Some(token.clone());
                token
            }
        };
        log::info!(
            "{} server disconnected, will attempt to reconnect in {} seconds",
            self.config.service_name,
            self.config.retry_interval.as_secs()
        );

        let wait = tokio::time::sleep(self.config.retry_interval);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return false,
                _ = token.cancelled() => return true,
                _ = &mut wait => return true,
                Some(cmd) = self.commands.recv() => match cmd {
                    SupervisorCommand::SubscribeTopic(topic) => {
                        // Can't reach upstream right now; remember it for
                        // the resubscribe batch.
                        self.register_dynamic(&topic);
                    }
                    SupervisorCommand::Reconnect => return true,
                }
            }
        }
    }

    /// Records a dynamic topic. Returns true only when the topic is new to
    /// this link, so a duplicate request never produces a second upstream
    /// subscription.
    fn register_dynamic(&mut self, topic: &str) -> bool {
        let prefix = match &self.config.dynamic_prefix {
            Some(prefix) => prefix,
            None => {
                log::debug!(
                    "{} link has no dynamic namespace; ignoring {}",
                    self.config.service_name,
                    topic
                );
                return false;
            }
        };
        if !topic.starts_with(prefix.as_str()) {
            return false;
        }
        if self.config.static_topics.contains(topic) {
            return false;
        }
        if !self.dynamic_topics.insert(topic.to_string()) {
            log::debug!("Already subscribed to {}", topic);
            return false;
        }
        log::info!("Adding dynamic topic {} on the {} link", topic, self.config.service_name);
        true
    }

    fn handle_frame(&self, text: &str) {
        match parse_frame(text) {
            Ok(msg) => {
                log::trace!("{}: frame on {}", self.config.service_name, msg.topic);
                if self.router_tx.send(msg).is_err() {
                    log::error!(
                        "Router channel closed; dropping frame from the {} server",
                        self.config.service_name
                    );
                }
            }
            // Malformed frames are logged and dropped; the connection stays up.
            Err(e) => log::warn!(
                "Dropping bad frame from the {} server: {}",
                self.config.service_name,
                e
            ),
        }
    }

    async fn set_state(&self, next: LinkState) {
        let mut state = self.state.write().await;
        if *state != next {
            log::debug!(
                "{} link state: {:?} -> {:?}",
                self.config.service_name,
                *state,
                next
            );
            *state = next;
        }
    }
}

async fn send_subscribe(write: &mut WsSink, topics: Vec<String>) -> Result<(), LinkError> {
    let request = SubscribeRequest { subscribe: topics };
    let msg = serde_json::to_string(&request).map_err(|e| LinkError::Protocol(e.to_string()))?;
    log::debug!("Sending upstream: {}", msg);
    write.send(WsMessage::Text(msg.into())).await?;
    Ok(())
}
