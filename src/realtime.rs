//! Socket.IO client for the backend's push channel.
//!
//! The connection is split in two: `Handshaker` is the pure packet state
//! machine (open, connect, join, heartbeat), `RealtimeConnection` drives it
//! over a websocket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::api::events::{Handshake, Packet, RealtimeEvent};
use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: Url,
    pub user_id: String,
    pub join_event: String,
    pub token: Option<String>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Step {
    Send(Vec<String>),
    Deliver(RealtimeEvent),
    Skip,
    Closed,
}

pub(crate) struct Handshaker {
    user_id: String,
    join_event: String,
    token: Option<String>,
    handshake: Option<Handshake>,
}

impl Handshaker {
    pub(crate) fn new(cfg: &RealtimeConfig) -> Self {
        Self {
            user_id: cfg.user_id.clone(),
            join_event: cfg.join_event.clone(),
            token: cfg.token.clone(),
            handshake: None,
        }
    }

    /// Time without any frame after which the server is considered gone.
    pub(crate) fn silence_limit(&self) -> Duration {
        let (interval, timeout) = self
            .handshake
            .as_ref()
            .map(|h| (h.ping_interval, h.ping_timeout))
            .unwrap_or((25_000, 20_000));
        Duration::from_millis(interval + timeout)
    }

    fn connect_packet(&self) -> String {
        match &self.token {
            Some(token) => format!("40{}", json!({ "token": token })),
            None => Packet::Connect.encode(),
        }
    }

    pub(crate) fn on_frame(&mut self, frame: &str) -> Result<Step> {
        match Packet::parse(frame)? {
            Packet::Open(handshake) => {
                debug!("Socket open, sid {}", handshake.sid);
                self.handshake = Some(handshake);
                Ok(Step::Send(vec![self.connect_packet()]))
            }
            Packet::Connect => {
                info!("Socket connected; joining room {}", self.user_id);
                let join = Packet::Event {
                    name: self.join_event.clone(),
                    data: Value::String(self.user_id.clone()),
                };
                Ok(Step::Send(vec![join.encode()]))
            }
            Packet::Ping => Ok(Step::Send(vec![Packet::Pong.encode()])),
            Packet::Event { name, data } => match RealtimeEvent::decode(&name, data) {
                Ok(event) => Ok(Step::Deliver(event)),
                Err(e) => {
                    warn!("Dropping malformed {name} event: {e}");
                    Ok(Step::Skip)
                }
            },
            Packet::Disconnect | Packet::Close => Ok(Step::Closed),
            Packet::ConnectError(message) => Err(ClientError::Protocol(format!("connect refused: {message}"))),
            Packet::Pong | Packet::Noop => Ok(Step::Skip),
        }
    }
}

pub struct RealtimeConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    handshaker: Handshaker,
}

impl RealtimeConnection {
    pub async fn connect(cfg: &RealtimeConfig) -> Result<Self> {
        let (ws, _) = connect_async(cfg.url.as_str()).await?;
        info!("WebSocket connected to {}", cfg.url.host_str().unwrap_or_default());
        Ok(Self { ws, handshaker: Handshaker::new(cfg) })
    }

    /// Next domain event, answering control packets along the way.
    /// `Ok(None)` means the server closed the channel.
    pub async fn next_event(&mut self) -> Result<Option<RealtimeEvent>> {
        loop {
            let limit = self.handshaker.silence_limit();
            let msg = match tokio::time::timeout(limit, self.ws.next()).await {
                Err(_) => return Err(ClientError::Protocol("heartbeat timed out".into())),
                Ok(None) => return Ok(None),
                Ok(Some(msg)) => msg?,
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };
            match self.handshaker.on_frame(&text)? {
                Step::Send(frames) => {
                    for frame in frames {
                        self.ws.send(Message::Text(frame)).await?;
                    }
                }
                Step::Deliver(event) => return Ok(Some(event)),
                Step::Skip => {}
                Step::Closed => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> RealtimeConfig {
        RealtimeConfig {
            url: Url::parse("ws://localhost/socket.io/?EIO=4&transport=websocket").unwrap(),
            user_id: "u1".into(),
            join_event: "join".into(),
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn handshake_then_join() {
        let mut hs = Handshaker::new(&config(None));
        let step = hs
            .on_frame(r#"0{"sid":"s","upgrades":[],"pingInterval":1000,"pingTimeout":500}"#)
            .unwrap();
        assert_eq!(step, Step::Send(vec!["40".into()]));
        assert_eq!(hs.silence_limit(), Duration::from_millis(1500));

        let step = hs.on_frame(r#"40{"sid":"n"}"#).unwrap();
        assert_eq!(step, Step::Send(vec![r#"42["join","u1"]"#.into()]));
    }

    #[test]
    fn connect_carries_token() {
        let mut hs = Handshaker::new(&config(Some("tok")));
        let step = hs.on_frame(r#"0{"sid":"s"}"#).unwrap();
        assert_eq!(step, Step::Send(vec![r#"40{"token":"tok"}"#.into()]));
    }

    #[test]
    fn ping_is_answered() {
        let mut hs = Handshaker::new(&config(None));
        assert_eq!(hs.on_frame("2").unwrap(), Step::Send(vec!["3".into()]));
    }

    #[test]
    fn events_are_delivered_and_bad_ones_skipped() {
        let mut hs = Handshaker::new(&config(None));
        let step = hs
            .on_frame(r#"42["message-read",{"chatId":"c1","userId":"u1"}]"#)
            .unwrap();
        assert!(matches!(step, Step::Deliver(RealtimeEvent::MessageRead(_))));
        let step = hs.on_frame(r#"42["new-message",{"chatId":"c1"}]"#).unwrap();
        assert_eq!(step, Step::Skip);
    }

    #[test]
    fn disconnect_and_refusal() {
        let mut hs = Handshaker::new(&config(None));
        assert_eq!(hs.on_frame("41").unwrap(), Step::Closed);
        assert!(hs.on_frame(r#"44{"message":"bad token"}"#).is_err());
    }
}
