//! Inbound command decoding.
//!
//! Decoding happens in two steps. [`Envelope::parse`] checks the JSON shape and
//! extracts the correlation data, so that even a command with bad arguments can
//! be answered with an error acknowledgement. [`Command::decode`] then turns the
//! method name and positional arguments into a typed command.

use crate::engine::IceCandidate;
use crate::errors::ErizoError;
use serde::Deserialize;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};

/// Request/response correlation carried by wrapped envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub corr_id: i64,
    pub reply_to: Option<String>,
}

/// Where to answer an envelope that [`Envelope::parse`] rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEnvelope {
    /// `corrID` exactly as the caller sent it.
    pub corr_id: Value,
    pub reply_to: String,
    /// The method name when one can be read, otherwise empty.
    pub method: String,
}

impl RejectedEnvelope {
    /// Recover the reply coordinates of an unparseable envelope.
    ///
    /// Returns `None` unless the payload is a JSON object carrying a non-null
    /// `corrID` and a string `replyTo`.
    #[must_use]
    pub fn recover(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let corr_id = value.get("corrID").filter(|id| !id.is_null())?.clone();
        let reply_to = value.get("replyTo")?.as_str()?.to_string();
        let method = value
            .get("data")
            .and_then(|data| data.get("method"))
            .or_else(|| value.get("method"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(Self {
            corr_id,
            reply_to,
            method,
        })
    }
}

/// Shape-checked inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub correlation: Option<Correlation>,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Deserialize)]
struct RawCall {
    method: String,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "corrID")]
    corr_id: Option<Value>,
    #[serde(rename = "replyTo")]
    reply_to: Option<String>,
    data: Option<RawCall>,
    method: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
}

impl Envelope {
    /// Parse either `{method, args}` or `{corrID?, replyTo?, data: {method, args}}`.
    pub fn parse(raw: &str) -> Result<Self, ErizoError> {
        let envelope: RawEnvelope = serde_json::from_str(raw)
            .map_err(|e| ErizoError::MalformedCommand(format!("invalid envelope: {e}")))?;

        let correlation = match envelope.corr_id {
            None | Some(Value::Null) => None,
            Some(value) => {
                let corr_id = value.as_i64().ok_or_else(|| {
                    ErizoError::MalformedCommand(format!("corrID must be an integer, got {value}"))
                })?;
                Some(Correlation {
                    corr_id,
                    reply_to: envelope.reply_to.clone(),
                })
            }
        };

        let (method, args) = match (envelope.data, envelope.method) {
            (Some(call), _) => (call.method, call.args),
            (None, Some(method)) => (method, envelope.args),
            (None, None) => {
                return Err(ErizoError::MalformedCommand(
                    "envelope has neither data nor method".to_string(),
                ))
            }
        };

        Ok(Self {
            correlation,
            method,
            args,
        })
    }
}

/// Arguments of `addPublisher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPublisher {
    pub room_id: Option<String>,
    pub client_id: String,
    pub stream_id: String,
    pub label: String,
    pub reply_to: String,
    pub isp: Option<String>,
}

/// Arguments of `addSubscriber`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSubscriber {
    pub client_id: String,
    pub stream_id: String,
    pub label: String,
    pub reply_to: String,
    pub isp: Option<String>,
}

/// Arguments of `addVirtualPublisher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddVirtualPublisher {
    pub bridge_stream_id: String,
    pub src_stream_id: String,
    pub target: SocketAddr,
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
}

/// Arguments of `addVirtualSubscriber`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddVirtualSubscriber {
    pub bridge_stream_id: String,
    pub src_stream_id: String,
    pub target: SocketAddr,
}

/// Payload of `processSignaling`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Candidate { candidate: IceCandidate },
}

/// Every supported inbound method with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddPublisher(AddPublisher),
    AddSubscriber(AddSubscriber),
    RemovePublisher {
        client_id: String,
        stream_id: String,
    },
    RemoveSubscriber {
        client_id: String,
        stream_id: String,
    },
    AddVirtualPublisher(AddVirtualPublisher),
    RemoveVirtualPublisher {
        bridge_stream_id: String,
    },
    AddVirtualSubscriber(AddVirtualSubscriber),
    RemoveVirtualSubscriber {
        bridge_stream_id: String,
        src_stream_id: Option<String>,
    },
    ProcessSignaling {
        client_id: String,
        stream_id: String,
        message: SignalingMessage,
    },
    KeepAlive,
}

/// Wire names of every supported method, used as bounded metric labels.
pub const METHODS: [&str; 10] = [
    "addPublisher",
    "addSubscriber",
    "removePublisher",
    "removeSubscriber",
    "addVirtualPublisher",
    "removeVirtualPublisher",
    "addVirtualSubscriber",
    "removeVirtualSubscriber",
    "processSignaling",
    "keepAlive",
];

/// Positional argument reader with typed accessors.
struct Args<'a> {
    method: &'static str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    fn new(method: &'static str, values: &'a [Value], min: usize) -> Result<Self, ErizoError> {
        if values.len() < min {
            return Err(ErizoError::MalformedCommand(format!(
                "{method} expects at least {min} arguments, got {}",
                values.len()
            )));
        }
        Ok(Self { method, values })
    }

    fn value(&self, index: usize, name: &str) -> Result<&'a Value, ErizoError> {
        self.values.get(index).ok_or_else(|| {
            ErizoError::MalformedCommand(format!("{}: missing argument {index} ({name})", self.method))
        })
    }

    fn mistyped(&self, index: usize, name: &str, expected: &str) -> ErizoError {
        ErizoError::MalformedCommand(format!(
            "{}: argument {index} ({name}) must be {expected}",
            self.method
        ))
    }

    fn string(&self, index: usize, name: &str) -> Result<String, ErizoError> {
        self.value(index, name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mistyped(index, name, "a string"))
    }

    fn optional_string(&self, index: usize, name: &str) -> Result<Option<String>, ErizoError> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.string(index, name).map(Some),
        }
    }

    fn u32(&self, index: usize, name: &str) -> Result<u32, ErizoError> {
        self.value(index, name)?
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.mistyped(index, name, "an unsigned 32-bit integer"))
    }

    fn target(&self, ip_index: usize, port_index: usize) -> Result<SocketAddr, ErizoError> {
        let ip: IpAddr = self
            .string(ip_index, "ip")?
            .parse()
            .map_err(|_| self.mistyped(ip_index, "ip", "an IP address"))?;
        let port = self
            .value(port_index, "port")?
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .filter(|port| *port != 0)
            .ok_or_else(|| self.mistyped(port_index, "port", "an integer in 1..=65535"))?;
        Ok(SocketAddr::new(ip, port))
    }

    fn signaling(&self, index: usize) -> Result<SignalingMessage, ErizoError> {
        let value = self.value(index, "message")?;
        SignalingMessage::deserialize(value).map_err(|e| {
            ErizoError::MalformedCommand(format!(
                "{}: argument {index} (message) is invalid: {e}",
                self.method
            ))
        })
    }
}

impl Command {
    /// Decode a method name and positional arguments into a typed command.
    pub fn decode(method: &str, args: &[Value]) -> Result<Self, ErizoError> {
        match method {
            "addPublisher" => {
                let a = Args::new("addPublisher", args, 4)?;
                // 4 and 5 argument forms omit the room id; 6+ carries it first
                let publisher = if args.len() >= 6 {
                    AddPublisher {
                        room_id: Some(a.string(0, "roomId")?),
                        client_id: a.string(1, "clientId")?,
                        stream_id: a.string(2, "streamId")?,
                        label: a.string(3, "label")?,
                        reply_to: a.string(4, "replyTo")?,
                        isp: a.optional_string(5, "isp")?,
                    }
                } else {
                    AddPublisher {
                        room_id: None,
                        client_id: a.string(0, "clientId")?,
                        stream_id: a.string(1, "streamId")?,
                        label: a.string(2, "label")?,
                        reply_to: a.string(3, "replyTo")?,
                        isp: a.optional_string(4, "isp")?,
                    }
                };
                Ok(Command::AddPublisher(publisher))
            }
            "addSubscriber" => {
                let a = Args::new("addSubscriber", args, 4)?;
                Ok(Command::AddSubscriber(AddSubscriber {
                    client_id: a.string(0, "clientId")?,
                    stream_id: a.string(1, "streamId")?,
                    label: a.string(2, "label")?,
                    reply_to: a.string(3, "replyTo")?,
                    isp: a.optional_string(4, "isp")?,
                }))
            }
            "removePublisher" => {
                let a = Args::new("removePublisher", args, 2)?;
                Ok(Command::RemovePublisher {
                    client_id: a.string(0, "clientId")?,
                    stream_id: a.string(1, "streamId")?,
                })
            }
            "removeSubscriber" => {
                let a = Args::new("removeSubscriber", args, 2)?;
                Ok(Command::RemoveSubscriber {
                    client_id: a.string(0, "clientId")?,
                    stream_id: a.string(1, "streamId")?,
                })
            }
            "addVirtualPublisher" => {
                let a = Args::new("addVirtualPublisher", args, 6)?;
                Ok(Command::AddVirtualPublisher(AddVirtualPublisher {
                    bridge_stream_id: a.string(0, "bridgeStreamId")?,
                    src_stream_id: a.string(1, "srcStreamId")?,
                    target: a.target(2, 3)?,
                    video_ssrc: a.u32(4, "videoSsrc")?,
                    audio_ssrc: a.u32(5, "audioSsrc")?,
                }))
            }
            "removeVirtualPublisher" => {
                let a = Args::new("removeVirtualPublisher", args, 1)?;
                Ok(Command::RemoveVirtualPublisher {
                    bridge_stream_id: a.string(0, "bridgeStreamId")?,
                })
            }
            "addVirtualSubscriber" => {
                let a = Args::new("addVirtualSubscriber", args, 4)?;
                Ok(Command::AddVirtualSubscriber(AddVirtualSubscriber {
                    bridge_stream_id: a.string(0, "bridgeStreamId")?,
                    src_stream_id: a.string(1, "srcStreamId")?,
                    target: a.target(2, 3)?,
                }))
            }
            "removeVirtualSubscriber" => {
                let a = Args::new("removeVirtualSubscriber", args, 1)?;
                Ok(Command::RemoveVirtualSubscriber {
                    bridge_stream_id: a.string(0, "bridgeStreamId")?,
                    src_stream_id: a.optional_string(1, "srcStreamId")?,
                })
            }
            "processSignaling" => {
                let a = Args::new("processSignaling", args, 3)?;
                Ok(Command::ProcessSignaling {
                    client_id: a.string(0, "clientId")?,
                    stream_id: a.string(1, "streamId")?,
                    message: a.signaling(2)?,
                })
            }
            "keepAlive" => Ok(Command::KeepAlive),
            other => Err(ErizoError::UnknownMethod(other.to_string())),
        }
    }

    /// Wire name of this command's method.
    pub fn method(&self) -> &'static str {
        match self {
            Command::AddPublisher(_) => "addPublisher",
            Command::AddSubscriber(_) => "addSubscriber",
            Command::RemovePublisher { .. } => "removePublisher",
            Command::RemoveSubscriber { .. } => "removeSubscriber",
            Command::AddVirtualPublisher(_) => "addVirtualPublisher",
            Command::RemoveVirtualPublisher { .. } => "removeVirtualPublisher",
            Command::AddVirtualSubscriber(_) => "addVirtualSubscriber",
            Command::RemoveVirtualSubscriber { .. } => "removeVirtualSubscriber",
            Command::ProcessSignaling { .. } => "processSignaling",
            Command::KeepAlive => "keepAlive",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<Command, ErizoError> {
        let envelope = Envelope::parse(&value.to_string())?;
        Command::decode(&envelope.method, &envelope.args)
    }

    #[test]
    fn test_parse_bare_envelope() {
        let envelope =
            Envelope::parse(r#"{"method":"removeSubscriber","args":["c1","s1"]}"#).unwrap();

        assert_eq!(envelope.method, "removeSubscriber");
        assert_eq!(envelope.args.len(), 2);
        assert!(envelope.correlation.is_none());
    }

    #[test]
    fn test_parse_wrapped_envelope_with_correlation() {
        let envelope = Envelope::parse(
            r#"{"corrID":17,"replyTo":"agent_reply","data":{"method":"keepAlive","args":[]}}"#,
        )
        .unwrap();

        assert_eq!(envelope.method, "keepAlive");
        assert_eq!(
            envelope.correlation,
            Some(Correlation {
                corr_id: 17,
                reply_to: Some("agent_reply".to_string()),
            })
        );
    }

    #[test]
    fn test_wrapped_without_corr_id_is_uncorrelated() {
        let envelope =
            Envelope::parse(r#"{"data":{"method":"removePublisher","args":["c1","s1"]}}"#)
                .unwrap();

        assert!(envelope.correlation.is_none());
        assert_eq!(envelope.method, "removePublisher");
    }

    #[test]
    fn test_parse_rejects_non_json_and_missing_method() {
        assert!(matches!(
            Envelope::parse("not json"),
            Err(ErizoError::MalformedCommand(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"args":[1,2]}"#),
            Err(ErizoError::MalformedCommand(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"data":{"args":[]}}"#),
            Err(ErizoError::MalformedCommand(_))
        ));
    }

    #[test]
    fn test_non_integer_corr_id_rejected() {
        let raw = r#"{"corrID":"abc","replyTo":"agent_reply","data":{"method":"keepAlive","args":[]}}"#;
        assert!(matches!(
            Envelope::parse(raw),
            Err(ErizoError::MalformedCommand(_))
        ));

        assert_eq!(
            RejectedEnvelope::recover(raw),
            Some(RejectedEnvelope {
                corr_id: json!("abc"),
                reply_to: "agent_reply".to_string(),
                method: "keepAlive".to_string(),
            })
        );
    }

    #[test]
    fn test_null_corr_id_is_uncorrelated() {
        let envelope = Envelope::parse(r#"{"corrID":null,"method":"keepAlive"}"#).unwrap();
        assert!(envelope.correlation.is_none());
    }

    #[test]
    fn test_rejected_envelope_needs_corr_id_and_reply_to() {
        assert!(RejectedEnvelope::recover("not json").is_none());
        assert!(RejectedEnvelope::recover(r#"[1,2,3]"#).is_none());
        assert!(RejectedEnvelope::recover(r#"{"corrID":1.5,"method":"keepAlive"}"#).is_none());
        assert!(RejectedEnvelope::recover(r#"{"corrID":null,"replyTo":"r"}"#).is_none());
        assert!(RejectedEnvelope::recover(r#"{"corrID":1,"replyTo":7}"#).is_none());

        let rejected = RejectedEnvelope::recover(r#"{"corrID":1,"replyTo":"r"}"#).unwrap();
        assert_eq!(rejected.corr_id, json!(1));
        assert_eq!(rejected.method, "");
    }

    #[test]
    fn test_add_publisher_minimal_form() {
        let cmd = decode(json!({"method": "addPublisher", "args": ["c1", "s1", "cam", "r1"]}))
            .unwrap();

        assert_eq!(
            cmd,
            Command::AddPublisher(AddPublisher {
                room_id: None,
                client_id: "c1".to_string(),
                stream_id: "s1".to_string(),
                label: "cam".to_string(),
                reply_to: "r1".to_string(),
                isp: None,
            })
        );
    }

    #[test]
    fn test_add_publisher_five_field_form_appends_isp() {
        let cmd = decode(json!({"method": "addPublisher", "args": ["c1", "s1", "cam", "r1", "isp-a"]}))
            .unwrap();

        let Command::AddPublisher(publisher) = cmd else {
            panic!("expected addPublisher");
        };
        assert_eq!(publisher.client_id, "c1");
        assert_eq!(publisher.room_id, None);
        assert_eq!(publisher.isp.as_deref(), Some("isp-a"));
    }

    #[test]
    fn test_add_publisher_extended_form() {
        let cmd = decode(json!({
            "data": {"method": "addPublisher", "args": ["room1", "c1", "s1", "cam", "r1", "isp-a"]}
        }))
        .unwrap();

        let Command::AddPublisher(publisher) = cmd else {
            panic!("expected addPublisher");
        };
        assert_eq!(publisher.room_id.as_deref(), Some("room1"));
        assert_eq!(publisher.client_id, "c1");
        assert_eq!(publisher.stream_id, "s1");
        assert_eq!(publisher.reply_to, "r1");
        assert_eq!(publisher.isp.as_deref(), Some("isp-a"));
    }

    #[test]
    fn test_add_publisher_too_few_args() {
        let result = decode(json!({"method": "addPublisher", "args": ["c1", "s1", "cam"]}));
        assert!(matches!(result, Err(ErizoError::MalformedCommand(msg)) if msg.contains("at least 4")));
    }

    #[test]
    fn test_mistyped_string_argument() {
        let result = decode(json!({"method": "addSubscriber", "args": ["c2", 42, "cam", "r2"]}));
        assert!(
            matches!(result, Err(ErizoError::MalformedCommand(msg)) if msg.contains("streamId"))
        );
    }

    #[test]
    fn test_add_virtual_publisher() {
        let cmd = decode(json!({
            "method": "addVirtualPublisher",
            "args": ["b1", "s1", "10.0.0.5", 5004, 1111, 2222]
        }))
        .unwrap();

        assert_eq!(
            cmd,
            Command::AddVirtualPublisher(AddVirtualPublisher {
                bridge_stream_id: "b1".to_string(),
                src_stream_id: "s1".to_string(),
                target: "10.0.0.5:5004".parse().unwrap(),
                video_ssrc: 1111,
                audio_ssrc: 2222,
            })
        );
    }

    #[test]
    fn test_bridge_target_validation() {
        let bad_port = decode(json!({
            "method": "addVirtualSubscriber",
            "args": ["b1", "s1", "10.0.0.5", "5004"]
        }));
        assert!(matches!(bad_port, Err(ErizoError::MalformedCommand(msg)) if msg.contains("port")));

        let out_of_range = decode(json!({
            "method": "addVirtualSubscriber",
            "args": ["b1", "s1", "10.0.0.5", 70000]
        }));
        assert!(matches!(out_of_range, Err(ErizoError::MalformedCommand(_))));

        let bad_ip = decode(json!({
            "method": "addVirtualSubscriber",
            "args": ["b1", "s1", "not-an-ip", 5004]
        }));
        assert!(matches!(bad_ip, Err(ErizoError::MalformedCommand(msg)) if msg.contains("ip")));
    }

    #[test]
    fn test_ssrc_must_fit_u32() {
        let result = decode(json!({
            "method": "addVirtualPublisher",
            "args": ["b1", "s1", "::1", 5004, 4_294_967_296_u64, 1]
        }));
        assert!(
            matches!(result, Err(ErizoError::MalformedCommand(msg)) if msg.contains("videoSsrc"))
        );
    }

    #[test]
    fn test_remove_virtual_subscriber_source_is_optional() {
        let cmd = decode(json!({"method": "removeVirtualSubscriber", "args": ["b1"]})).unwrap();
        assert_eq!(
            cmd,
            Command::RemoveVirtualSubscriber {
                bridge_stream_id: "b1".to_string(),
                src_stream_id: None,
            }
        );

        let cmd =
            decode(json!({"method": "removeVirtualSubscriber", "args": ["b1", "s1"]})).unwrap();
        assert_eq!(
            cmd,
            Command::RemoveVirtualSubscriber {
                bridge_stream_id: "b1".to_string(),
                src_stream_id: Some("s1".to_string()),
            }
        );
    }

    #[test]
    fn test_process_signaling_offer_and_candidate() {
        let cmd = decode(json!({
            "method": "processSignaling",
            "args": ["c1", "s1", {"type": "offer", "sdp": "v=0\r\n"}]
        }))
        .unwrap();
        assert_eq!(
            cmd,
            Command::ProcessSignaling {
                client_id: "c1".to_string(),
                stream_id: "s1".to_string(),
                message: SignalingMessage::Offer {
                    sdp: "v=0\r\n".to_string()
                },
            }
        );

        let cmd = decode(json!({
            "method": "processSignaling",
            "args": ["c1", "s1", {"type": "candidate", "candidate": {
                "sdpMid": "video", "sdpMLineIndex": 1, "candidate": "candidate:1 1 udp 1 1.2.3.4 9 typ host"
            }}]
        }))
        .unwrap();
        let Command::ProcessSignaling { message, .. } = cmd else {
            panic!("expected processSignaling");
        };
        let SignalingMessage::Candidate { candidate } = message else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.sdp_mid, "video");
        assert_eq!(candidate.sdp_m_line_index, 1);
    }

    #[test]
    fn test_process_signaling_rejects_unknown_message_type() {
        let result = decode(json!({
            "method": "processSignaling",
            "args": ["c1", "s1", {"type": "answer", "sdp": "v=0"}]
        }));
        assert!(matches!(result, Err(ErizoError::MalformedCommand(_))));

        let result = decode(json!({
            "method": "processSignaling",
            "args": ["c1", "s1", {"type": "candidate", "candidate": {"sdpMid": "0", "sdpMLineIndex": "0", "candidate": "x"}}]
        }));
        assert!(matches!(result, Err(ErizoError::MalformedCommand(_))));
    }

    #[test]
    fn test_unknown_method() {
        let result = decode(json!({"method": "deleteEverything", "args": []}));
        assert!(matches!(result, Err(ErizoError::UnknownMethod(m)) if m == "deleteEverything"));
    }

    #[test]
    fn test_method_names_round_trip_through_decode_table() {
        let cmd = decode(json!({"method": "keepAlive"})).unwrap();
        assert_eq!(cmd, Command::KeepAlive);
        assert_eq!(cmd.method(), "keepAlive");
        assert!(METHODS.contains(&cmd.method()));
    }
}
