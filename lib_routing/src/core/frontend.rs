//! # Front-End Bus
//!
//! The subscriber registry and fan-out machinery the router delegates
//! delivery to. Each connected front-end session registers here and gets a
//! dedicated unbounded channel; frames are wrapped in an `Arc` so a fan-out
//! to many subscribers never clones the payload.
//!
//! The bus tracks which client is subscribed to which topic, but knows
//! nothing about where messages come from or what they mean. Clients whose
//! receiving half has gone away are pruned on the next send that touches
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Identifies one connected front-end session.
pub type ClientId = usize;

/// A frame on its way to a front-end client.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub topic: String,
    pub payload: String,
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<Arc<OutboundFrame>>,
}

/// Subscriber registry plus per-client delivery channels.
pub struct FrontendBus {
    next_id: AtomicUsize,
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    // topic -> ids of clients currently subscribed to it
    topics: Mutex<HashMap<String, HashSet<ClientId>>>,
}

impl FrontendBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            clients: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new client and returns its id together with the receiving
    /// half of its delivery channel. The caller (the WebSocket session task)
    /// drains the receiver and writes frames to the socket.
    pub fn add_client(&self) -> (ClientId, mpsc::UnboundedReceiver<Arc<OutboundFrame>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock().expect("FrontendBus lock poisoned");
        clients.insert(id, ClientHandle { sender: tx });
        log::info!("Client {} registered on the front-end bus", id);
        (id, rx)
    }

    /// Removes a client and all of its topic subscriptions. Called by the
    /// session task when the socket closes; there is no per-topic
    /// unsubscribe on the wire.
    pub fn remove_client(&self, id: ClientId) {
        {
            let mut clients = self.clients.lock().expect("FrontendBus lock poisoned");
            clients.remove(&id);
        }
        let mut topics = self.topics.lock().expect("FrontendBus lock poisoned");
        for subscribers in topics.values_mut() {
            subscribers.remove(&id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
        log::info!("Client {} removed from the front-end bus", id);
    }

    /// Adds `id` to the subscriber set of `topic`. Returns false if the
    /// client was already subscribed.
    pub fn subscribe(&self, id: ClientId, topic: &str) -> bool {
        let mut topics = self.topics.lock().expect("FrontendBus lock poisoned");
        topics.entry(topic.to_string()).or_default().insert(id)
    }

    /// Fans `payload` out to every current subscriber of `topic`.
    ///
    /// Publishing to a topic with no subscribers is a no-op delivery, not an
    /// error. Clients whose channel is closed are dropped from the registry.
    pub fn publish(&self, topic: &str, payload: &str) {
        let subscribers: Vec<ClientId> = {
            let topics = self.topics.lock().expect("FrontendBus lock poisoned");
            match topics.get(topic) {
                Some(set) => set.iter().copied().collect(),
                None => return,
            }
        };
        if subscribers.is_empty() {
            return;
        }

        let frame = Arc::new(OutboundFrame {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });

        let mut dead = Vec::new();
        {
            let clients = self.clients.lock().expect("FrontendBus lock poisoned");
            for id in subscribers {
                if let Some(client) = clients.get(&id) {
                    if client.sender.send(Arc::clone(&frame)).is_err() {
                        dead.push(id);
                    }
                }
            }
        }
        for id in dead {
            log::info!("Client {} disconnected, pruning from the bus", id);
            self.remove_client(id);
        }
    }

    /// Delivers `payload` to a single client, bypassing the subscriber set.
    /// This is the last-value replay path: only the newly-subscribed client
    /// receives the cached message.
    pub fn send_to(&self, id: ClientId, topic: &str, payload: &str) {
        let frame = Arc::new(OutboundFrame {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        let failed = {
            let clients = self.clients.lock().expect("FrontendBus lock poisoned");
            match clients.get(&id) {
                Some(client) => client.sender.send(frame).is_err(),
                None => false,
            }
        };
        if failed {
            log::info!("Client {} disconnected, pruning from the bus", id);
            self.remove_client(id);
        }
    }

    /// Number of clients currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().expect("FrontendBus lock poisoned");
        topics.get(topic).map_or(0, |set| set.len())
    }
}

impl Default for FrontendBus {
    fn default() -> Self {
        Self::new()
    }
}
