use crate::core::errors::OpenApiError;
use crate::core::types::Topic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// A decoded server frame on the push channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Reply to a subscribe/unsubscribe request, correlated by `id`
    Ack {
        id: u64,
        #[serde(default)]
        code: i64,
        #[serde(default)]
        message: String,
    },
    /// Asynchronous event; `data` is decoded by the dispatcher
    Push {
        topic: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Connection-level error reported by the server
    Error {
        #[serde(default)]
        code: i64,
        #[serde(default)]
        message: String,
    },
}

/// Subscription operation sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionOp {
    Subscribe,
    Unsubscribe,
}

/// Codec trait for the push channel's wire format
///
/// Converts subscription requests to WebSocket messages and raw messages to
/// [`Frame`]s. Control messages (ping, pong, close) are handled by the
/// transport and never reach the codec.
pub trait PushCodec: Send + Sync + 'static {
    /// Encode a subscribe or unsubscribe request
    ///
    /// # Arguments
    /// * `op` - The operation
    /// * `id` - Request id echoed back in the server's ack
    /// * `topics` - Topics the request applies to
    fn encode_request(
        &self,
        op: SubscriptionOp,
        id: u64,
        topics: &[Topic],
    ) -> Result<Message, OpenApiError>;

    /// Decode a raw WebSocket message
    ///
    /// # Returns
    /// - `Ok(Some(frame))` - Successfully decoded frame
    /// - `Ok(None)` - Message carries no frame and was ignored
    /// - `Err(error)` - Malformed message
    fn decode_message(&self, message: Message) -> Result<Option<Frame>, OpenApiError>;
}

/// JSON text-frame codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPushCodec;

#[derive(Serialize)]
struct RequestFrame<'a> {
    op: SubscriptionOp,
    id: u64,
    topics: &'a [Topic],
}

impl PushCodec for JsonPushCodec {
    fn encode_request(
        &self,
        op: SubscriptionOp,
        id: u64,
        topics: &[Topic],
    ) -> Result<Message, OpenApiError> {
        let text = serde_json::to_string(&RequestFrame { op, id, topics })?;
        Ok(Message::Text(text))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Frame>, OpenApiError> {
        let frame = match message {
            Message::Text(text) => serde_json::from_str(&text),
            Message::Binary(bytes) => serde_json::from_slice(&bytes),
            _ => return Ok(None),
        };

        frame
            .map(Some)
            .map_err(|e| OpenApiError::Protocol(format!("Malformed push frame: {}", e)))
    }
}
