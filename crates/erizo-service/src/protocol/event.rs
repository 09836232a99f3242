//! Outbound payloads: endpoint lifecycle events and command acknowledgements.

use crate::errors::ErizoError;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle event type as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    PublisherAnswer,
    SubscriberAnswer,
    Ready,
}

impl EventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::PublisherAnswer => "publisher_answer",
            EventType::SubscriberAnswer => "subscriber_answer",
            EventType::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub agent_id: String,
    pub erizo_id: String,
    pub stream_id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// `type` marker on correlated envelopes.
const CALLBACK: &str = "callback";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventEnvelope {
    pub data: EventData,
    #[serde(rename = "corrID", skip_serializing_if = "Option::is_none")]
    pub corr_id: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl EventEnvelope {
    /// Wrap event data, adding `corrID` and `type: "callback"` when correlated.
    pub fn new(data: EventData, corr_id: Option<i64>) -> Self {
        Self {
            data,
            corr_id,
            kind: corr_id.map(|_| CALLBACK),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplyData {
    Ack {
        method: String,
    },
    Error {
        method: String,
        code: i32,
        message: String,
    },
}

/// Synchronous acknowledgement for a correlated command.
///
/// `corrID` is echoed as received, which is not always an integer when the
/// envelope itself is being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    #[serde(rename = "corrID")]
    pub corr_id: Value,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: ReplyData,
}

impl CommandReply {
    pub fn ack(corr_id: impl Into<Value>, method: &str) -> Self {
        Self {
            corr_id: corr_id.into(),
            kind: CALLBACK,
            data: ReplyData::Ack {
                method: method.to_string(),
            },
        }
    }

    /// Error reply carrying only the caller-safe message.
    pub fn error(corr_id: impl Into<Value>, method: &str, error: &ErizoError) -> Self {
        Self {
            corr_id: corr_id.into(),
            kind: CALLBACK,
            data: ReplyData::Error {
                method: method.to_string(),
                code: error.error_code(),
                message: error.client_message(),
            },
        }
    }
}

/// A serialized payload addressed to one reply destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub reply_to: String,
    pub payload: String,
}

impl OutboundMessage {
    pub fn encode<T: Serialize>(reply_to: &str, body: &T) -> Result<Self, ErizoError> {
        let payload = serde_json::to_string(body)
            .map_err(|e| ErizoError::Internal(format!("payload serialization failed: {e}")))?;
        Ok(Self {
            reply_to: reply_to.to_string(),
            payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn data(event_type: EventType, sdp: Option<&str>) -> EventData {
        EventData {
            event_type,
            agent_id: "agent-1".to_string(),
            erizo_id: "erizo-1".to_string(),
            stream_id: "s1".to_string(),
            client_id: "c1".to_string(),
            sdp: sdp.map(str::to_string),
            room_id: None,
        }
    }

    fn to_json<T: Serialize>(value: &T) -> Value {
        serde_json::to_value(value).unwrap()
    }

    #[test]
    fn test_uncorrelated_ready_event() {
        let envelope = EventEnvelope::new(data(EventType::Ready, None), None);

        assert_eq!(
            to_json(&envelope),
            json!({"data": {
                "type": "ready",
                "agentId": "agent-1",
                "erizoId": "erizo-1",
                "streamId": "s1",
                "clientId": "c1"
            }})
        );
    }

    #[test]
    fn test_correlated_answer_event() {
        let mut event = data(EventType::PublisherAnswer, Some("v=0\r\n"));
        event.room_id = Some("room1".to_string());
        let envelope = EventEnvelope::new(event, Some(9));

        let value = to_json(&envelope);
        assert_eq!(value["corrID"], 9);
        assert_eq!(value["type"], "callback");
        assert_eq!(value["data"]["type"], "publisher_answer");
        assert_eq!(value["data"]["sdp"], "v=0\r\n");
        assert_eq!(value["data"]["roomId"], "room1");
    }

    #[test]
    fn test_event_type_names_match_serialization() {
        for event_type in [
            EventType::Started,
            EventType::PublisherAnswer,
            EventType::SubscriberAnswer,
            EventType::Ready,
        ] {
            assert_eq!(to_json(&event_type), json!(event_type.as_str()));
        }
    }

    #[test]
    fn test_ack_and_error_replies() {
        let ack = CommandReply::ack(3, "addPublisher");
        assert_eq!(
            to_json(&ack),
            json!({"corrID": 3, "type": "callback", "data": {"type": "ack", "method": "addPublisher"}})
        );

        let err = ErizoError::StreamAlreadyPublished("s1".to_string());
        let reply = CommandReply::error(4, "addPublisher", &err);
        assert_eq!(
            to_json(&reply),
            json!({"corrID": 4, "type": "callback", "data": {
                "type": "error",
                "method": "addPublisher",
                "code": 5,
                "message": "Stream is already published"
            }})
        );
    }

    #[test]
    fn test_outbound_message_encode() {
        let message = OutboundMessage::encode("r1", &CommandReply::ack(1, "keepAlive")).unwrap();

        assert_eq!(message.reply_to, "r1");
        assert!(message.payload.contains("\"corrID\":1"));
    }
}
