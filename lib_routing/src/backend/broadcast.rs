//! # Broadcast Transport (Redis pub/sub)
//!
//! One wildcard subscription (`*`) on the Redis bus carries every topic the
//! backends publish. Each message arrives already addressed: the channel
//! name is the topic, the payload is forwarded untouched. Topics are never
//! configured on this transport; they exist the moment the first message
//! for them appears, and each first sight is logged and remembered.
//!
//! A fixed list of backend-internal bookkeeping topics is dropped before
//! anything else happens -- those never reach the router at all. A lost bus
//! connection is retried on the same fixed interval as the point-to-point
//! links, indefinitely.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};

use crate::backend::link::LinkError;
use crate::backend::transport::MessagingOperations;
use crate::core::router::RoutedMessage;

pub struct RedisBroadcastTransport {
    client: redis::Client,
    excluded: Arc<HashSet<String>>,
    // Topics seen at least once on the bus.
    known_topics: Mutex<HashSet<String>>,
    router_tx: mpsc::UnboundedSender<RoutedMessage>,
    retry_interval: Duration,
    publisher: tokio::sync::Mutex<Option<redis::aio::ConnectionManager>>,
}

impl RedisBroadcastTransport {
    pub fn new(
        redis_url: &str,
        excluded: Arc<HashSet<String>>,
        router_tx: mpsc::UnboundedSender<RoutedMessage>,
        retry_interval: Duration,
    ) -> Result<Self, LinkError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            excluded,
            known_topics: Mutex::new(HashSet::new()),
            router_tx,
            retry_interval,
            publisher: tokio::sync::Mutex::new(None),
        })
    }

    /// Primary execution loop with reconnection logic.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }

            match self.client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(e) = pubsub.psubscribe("*").await {
                        log::warn!("Wildcard subscribe on the bus failed: {}", e);
                    } else {
                        log::info!("Subscribed to the broadcast bus with pattern *");
                        let mut stream = pubsub.on_message();
                        loop {
                            tokio::select! {
                                _ = shutdown.recv() => {
                                    log::info!("Broadcast transport shutting down");
                                    return;
                                }
                                msg = stream.next() => match msg {
                                    Some(msg) => self.handle_message(msg),
                                    None => {
                                        log::warn!("Broadcast bus subscription ended");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!(
                        "Could not connect to the broadcast bus: {}. Retrying in {}s",
                        e,
                        self.retry_interval.as_secs()
                    );
                }
            }

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    fn handle_message(&self, msg: redis::Msg) {
        let topic = msg.get_channel_name().to_string();
        if !self.admit(&topic) {
            return;
        }
        match msg.get_payload::<String>() {
            Ok(payload) => {
                if self.router_tx.send(RoutedMessage { topic, payload }).is_err() {
                    log::error!("Router channel closed; dropping broadcast message");
                }
            }
            // Payload problems never take the subscription down.
            Err(e) => log::warn!("Dropping undecodable payload on {}: {}", topic, e),
        }
    }

    /// Applies the exclusion list and records first sightings. Returns
    /// false when the message must go no further.
    fn admit(&self, topic: &str) -> bool {
        if self.excluded.contains(topic) {
            log::trace!("Dropping excluded topic {}", topic);
            return false;
        }
        let mut known = self.known_topics.lock().expect("known_topics lock poisoned");
        if known.insert(topic.to_string()) {
            log::info!("Adding new topic {}", topic);
        }
        true
    }
}

#[async_trait]
impl MessagingOperations for RedisBroadcastTransport {
    /// Publishes on the bus. The update reaches the front end when the
    /// wildcard subscription hears it back -- one delivery, no direct path.
    async fn publish_message(&self, topic: &str, payload: &str) -> Result<(), LinkError> {
        let mut guard = self.publisher.lock().await;
        let conn = match &mut *guard {
            Some(conn) => conn,
            slot => slot.insert(self.client.get_connection_manager().await?),
        };
        let _: () = redis::AsyncCommands::publish(conn, topic, payload).await?;
        Ok(())
    }
}
