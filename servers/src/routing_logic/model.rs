use serde::{Deserialize, Serialize};

/// What front-end clients send us. There is no unsubscribe on the wire;
/// cleanup happens when the socket closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub subscribe: Option<Vec<String>>,
}

/// What we send front-end clients: the bare topic plus the opaque payload.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a str,
}
