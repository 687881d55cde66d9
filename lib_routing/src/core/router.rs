//! # Topic Router
//!
//! Every message bound for the front end funnels through
//! [`TopicRouter::publish`], no matter which transport heard it: forward to
//! the current subscribers of the topic, then overwrite the last-value
//! cache slot. The router is the only component that ever writes to the
//! front end, which is what makes double delivery across the two transports
//! structurally impossible.
//!
//! Transport adapters do not call the router directly; they push
//! [`RoutedMessage`]s onto an explicit channel drained by [`run_router`],
//! so the hand-off between "received from backend" and "sent to front end"
//! is a visible queue rather than an implicit event broadcast.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::core::frontend::FrontendBus;
use crate::core::last_value::LastValueCache;

/// One inbound message on the adapter-to-router channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub topic: String,
    /// Opaque serialized payload; the router never inspects it.
    pub payload: String,
}

/// Creates the adapter-to-router channel.
pub fn routing_channel() -> (
    mpsc::UnboundedSender<RoutedMessage>,
    mpsc::UnboundedReceiver<RoutedMessage>,
) {
    mpsc::unbounded_channel()
}

/// Routes inbound messages to front-end subscribers and the last-value cache.
pub struct TopicRouter {
    bus: Arc<FrontendBus>,
    cache: Arc<LastValueCache>,
    // Backend-internal topics that must never reach the front end.
    excluded: Arc<HashSet<String>>,
}

impl TopicRouter {
    pub fn new(
        bus: Arc<FrontendBus>,
        cache: Arc<LastValueCache>,
        excluded: Arc<HashSet<String>>,
    ) -> Self {
        Self { bus, cache, excluded }
    }

    /// Forwards `payload` to every current subscriber of `topic`, then
    /// stores it as the topic's last value.
    ///
    /// Excluded topics are dropped silently: no fan-out, no cache write.
    /// Publishing to a topic nobody is subscribed to still updates the
    /// cache, so a later subscriber gets the value replayed.
    pub fn publish(&self, topic: &str, payload: &str) {
        if self.excluded.contains(topic) {
            log::trace!("Dropping excluded topic {}", topic);
            return;
        }
        self.bus.publish(topic, payload);
        self.cache.put(topic, payload);
        log::debug!("Routed message on {} to {} subscriber(s)", topic, self.bus.subscriber_count(topic));
    }

    pub fn cache(&self) -> &Arc<LastValueCache> {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<FrontendBus> {
        &self.bus
    }
}

/// Drains the adapter-to-router channel until shutdown or until every
/// sender is gone.
pub async fn run_router(
    router: Arc<TopicRouter>,
    mut rx: mpsc::UnboundedReceiver<RoutedMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Router task shutting down");
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => router.publish(&msg.topic, &msg.payload),
                None => {
                    log::warn!("All transport adapters dropped the routing channel");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with_exclusions(excluded: &[&str]) -> (Arc<TopicRouter>, Arc<FrontendBus>, Arc<LastValueCache>) {
        let bus = Arc::new(FrontendBus::new());
        let cache = Arc::new(LastValueCache::new());
        let excluded: HashSet<String> = excluded.iter().map(|t| t.to_string()).collect();
        let router = Arc::new(TopicRouter::new(
            Arc::clone(&bus),
            Arc::clone(&cache),
            Arc::new(excluded),
        ));
        (router, bus, cache)
    }

    #[tokio::test]
    async fn publish_fans_out_and_caches() {
        let (router, bus, cache) = router_with_exclusions(&[]);
        let (id, mut rx) = bus.add_client();
        bus.subscribe(id, "prices.spx");

        router.publish("prices.spx", "5000.1");

        assert_eq!(rx.recv().await.unwrap().payload, "5000.1");
        assert_eq!(cache.get("prices.spx").unwrap().payload, "5000.1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_caches() {
        let (router, _bus, cache) = router_with_exclusions(&[]);
        router.publish("trading.state", "OPEN");
        assert_eq!(cache.get("trading.state").unwrap().payload, "OPEN");
    }

    #[tokio::test]
    async fn excluded_topic_never_reaches_a_subscriber() {
        let (router, bus, cache) = router_with_exclusions(&["prices.current.condor.full"]);
        let (id, mut rx) = bus.add_client();
        bus.subscribe(id, "prices.current.condor.full");

        router.publish("prices.current.condor.full", "{\"legs\":[]}");

        assert!(rx.try_recv().is_err());
        assert!(cache.get("prices.current.condor.full").is_none());
    }

    #[tokio::test]
    async fn router_task_drains_the_channel() {
        let (router, bus, cache) = router_with_exclusions(&[]);
        let (id, mut client_rx) = bus.add_client();
        bus.subscribe(id, "prices.spx");

        let (tx, rx) = routing_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(run_router(Arc::clone(&router), rx, shutdown_tx.subscribe()));

        tx.send(RoutedMessage {
            topic: "prices.spx".to_string(),
            payload: "5000.1".to_string(),
        })
        .unwrap();

        assert_eq!(client_rx.recv().await.unwrap().payload, "5000.1");
        assert_eq!(cache.get("prices.spx").unwrap().payload, "5000.1");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
