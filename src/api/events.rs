//! Real-time events pushed by the backend and the Socket.IO framing they travel in.
//!
//! The channel is receive-only for domain data. The only frames the client
//! writes are the connect request, pongs and the room join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::models::{deserialize_price, Budget, BudgetStatus, Chat};
use crate::error::{ClientError, Result};

pub const NEW_CHAT: &str = "new-chat";
pub const NEW_MESSAGE: &str = "new-message";
pub const MESSAGE_READ: &str = "message-read";
pub const CHAT_LIST_UPDATE: &str = "chat-list-update";
pub const NEW_BUDGET: &str = "new-budget";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: String,
    #[serde(default, alias = "id")]
    pub message_id: Option<String>,
    pub sender_id: String,
    #[serde(alias = "text", alias = "message")]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub chat_id: String,
    #[serde(alias = "readerId")]
    pub user_id: String,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListUpdate {
    #[serde(default)]
    pub chat_id: Option<String>,
    pub budget: Budget,
}

impl ChatListUpdate {
    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref().or(self.budget.chat_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBudget {
    #[serde(default, alias = "id")]
    pub budget_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub service_id: String,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: Option<f64>,
    #[serde(default)]
    pub status: Option<BudgetStatus>,
    #[serde(default, alias = "updatedAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewChat(Chat),
    NewMessage(NewMessage),
    MessageRead(MessageRead),
    ChatListUpdate(ChatListUpdate),
    NewBudget(NewBudget),
    Unknown { name: String, data: Value },
}

impl RealtimeEvent {
    pub fn decode(name: &str, data: Value) -> Result<Self> {
        Ok(match name {
            NEW_CHAT => {
                // some emitters wrap the chat as {"chat": {...}}
                let data = match data {
                    Value::Object(mut map) if map.get("chat").is_some_and(Value::is_object) => {
                        map.remove("chat").unwrap_or(Value::Null)
                    }
                    other => other,
                };
                RealtimeEvent::NewChat(serde_json::from_value(data)?)
            }
            NEW_MESSAGE => RealtimeEvent::NewMessage(serde_json::from_value(data)?),
            MESSAGE_READ => RealtimeEvent::MessageRead(serde_json::from_value(data)?),
            CHAT_LIST_UPDATE => RealtimeEvent::ChatListUpdate(serde_json::from_value(data)?),
            NEW_BUDGET => RealtimeEvent::NewBudget(serde_json::from_value(data)?),
            other => RealtimeEvent::Unknown { name: other.to_string(), data },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            RealtimeEvent::NewChat(_) => NEW_CHAT,
            RealtimeEvent::NewMessage(_) => NEW_MESSAGE,
            RealtimeEvent::MessageRead(_) => MESSAGE_READ,
            RealtimeEvent::ChatListUpdate(_) => CHAT_LIST_UPDATE,
            RealtimeEvent::NewBudget(_) => NEW_BUDGET,
            RealtimeEvent::Unknown { name, .. } => name,
        }
    }

    /// Server timestamp used for last-write-wins comparisons.
    pub fn version(&self) -> Option<DateTime<Utc>> {
        match self {
            RealtimeEvent::NewChat(c) => c.last_message_at,
            RealtimeEvent::NewMessage(m) => m.created_at,
            RealtimeEvent::MessageRead(r) => r.read_at,
            RealtimeEvent::ChatListUpdate(u) => u.budget.updated_at,
            RealtimeEvent::NewBudget(b) => b.created_at,
            RealtimeEvent::Unknown { .. } => None,
        }
    }

    /// Chat the event is addressed to, when it targets one.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            RealtimeEvent::NewChat(c) => Some(&c.id),
            RealtimeEvent::NewMessage(m) => Some(&m.chat_id),
            RealtimeEvent::MessageRead(r) => Some(&r.chat_id),
            RealtimeEvent::ChatListUpdate(u) => u.chat_id(),
            RealtimeEvent::NewBudget(b) => b.chat_id.as_deref(),
            RealtimeEvent::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// Engine.IO v4 / Socket.IO v5 text packets.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Connect,
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(String),
    Noop,
}

impl Packet {
    pub fn parse(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or_else(|| ClientError::Protocol("empty frame".into()))?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => Self::parse_message(rest),
            other => Err(ClientError::Protocol(format!("unknown packet type {other:?}"))),
        }
    }

    fn parse_message(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or_else(|| ClientError::Protocol("empty message".into()))?;
        let payload = skip_namespace_and_ack(chars.as_str());
        match kind {
            '0' => Ok(Packet::Connect),
            '1' => Ok(Packet::Disconnect),
            '2' => {
                let args: Vec<Value> = serde_json::from_str(payload)?;
                let mut args = args.into_iter();
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(ClientError::Protocol("event without a name".into())),
                };
                Ok(Packet::Event { name, data: args.next().unwrap_or(Value::Null) })
            }
            '4' => {
                let message = serde_json::from_str::<Value>(payload)
                    .ok()
                    .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| payload.to_string());
                Ok(Packet::ConnectError(message))
            }
            other => Err(ClientError::Protocol(format!("unsupported message type {other:?}"))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(_) => "0".to_string(),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect => "40".to_string(),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, data } => {
                format!("42{}", Value::Array(vec![Value::String(name.clone()), data.clone()]))
            }
            Packet::ConnectError(msg) => format!("44{}", serde_json::json!({ "message": msg })),
        }
    }
}

fn skip_namespace_and_ack(payload: &str) -> &str {
    let payload = if payload.starts_with('/') {
        payload.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        payload
    };
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_open_handshake() {
        let p = Packet::parse(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#).unwrap();
        match p {
            Packet::Open(h) => {
                assert_eq!(h.sid, "abc");
                assert_eq!(h.ping_timeout, 5000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_event_with_namespace_and_ack() {
        let p = Packet::parse(r#"42/chat,7["new-message",{"chatId":"A"}]"#).unwrap();
        assert_eq!(p, Packet::Event { name: "new-message".into(), data: json!({"chatId": "A"}) });
    }

    #[test]
    fn encodes_join_event() {
        let p = Packet::Event { name: "join".into(), data: json!("u1") };
        assert_eq!(p.encode(), r#"42["join","u1"]"#);
    }

    #[test]
    fn connect_with_sid_payload() {
        assert_eq!(Packet::parse(r#"40{"sid":"x"}"#).unwrap(), Packet::Connect);
        assert_eq!(Packet::parse("2").unwrap(), Packet::Ping);
        assert!(Packet::parse("").is_err());
    }

    #[test]
    fn connect_error_message_extracted() {
        let p = Packet::parse(r#"44{"message":"unauthorized"}"#).unwrap();
        assert_eq!(p, Packet::ConnectError("unauthorized".into()));
    }

    #[test]
    fn decodes_wrapped_new_chat() {
        let ev = RealtimeEvent::decode(
            NEW_CHAT,
            json!({"chat": {"id": "c1", "clientId": "u1", "professionalId": "p1"}}),
        )
        .unwrap();
        assert_eq!(ev.chat_id(), Some("c1"));
    }

    #[test]
    fn new_budget_price_as_string() {
        let ev = RealtimeEvent::decode(NEW_BUDGET, json!({"serviceId": "S1", "price": "25.00"})).unwrap();
        match ev {
            RealtimeEvent::NewBudget(b) => assert_eq!(b.price, Some(25.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn chat_list_update_falls_back_to_budget_chat_id() {
        let ev = RealtimeEvent::decode(
            CHAT_LIST_UPDATE,
            json!({"budget": {"id": "b1", "chatId": "c9", "serviceId": "s1", "status": "QUOTED", "price": 40}}),
        )
        .unwrap();
        assert_eq!(ev.chat_id(), Some("c9"));
    }

    #[test]
    fn unknown_event_is_preserved() {
        let ev = RealtimeEvent::decode("typing", json!({"chatId": "c1"})).unwrap();
        assert_eq!(ev.name(), "typing");
        assert_eq!(ev.version(), None);
    }
}
