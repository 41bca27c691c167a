//! Change channel over the hosted realtime websocket.
//!
//! The service speaks the Phoenix channel protocol: join a topic with a
//! `postgres_changes` config, keep the socket alive with heartbeats, and
//! receive one `postgres_changes` frame per row change.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChannelFilter, ChannelHandle, ChannelMessage};
use crate::error::RemoteError;
use crate::models::{ChangeEvent, ChangeKind, ChannelStatus, Row};

const JOIN_REF: &str = "1";

/// Everything needed to open a realtime socket.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    /// `ws://` or `wss://` endpoint of the realtime service
    pub socket_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub verbose: bool,
}

impl RealtimeConnector {
    /// Derive the websocket endpoint from the HTTP base URL of the project.
    pub fn socket_url_for(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/realtime/v1/websocket", ws_base)
    }

    fn connect_url(&self) -> String {
        format!("{}?apikey={}&vsn=1.0.0", self.socket_url, self.api_key)
    }

    /// Connect the socket and start the session task. Join and subsequent
    /// statuses are reported on the returned handle.
    ///
    /// The TCP, TLS and websocket handshake share one `join_timeout` budget;
    /// the join itself gets a fresh one inside the session.
    pub async fn open(&self, filter: &ChannelFilter) -> Result<ChannelHandle, RemoteError> {
        let connect = tokio_tungstenite::connect_async(self.connect_url());
        let (ws, _) = timeout(self.join_timeout, connect)
            .await
            .map_err(|_| RemoteError::Timeout {
                operation: format!("realtime connect to {}", self.socket_url),
                after: self.join_timeout,
            })??;
        debug!("realtime socket connected to {}", self.socket_url);

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Connecting));

        let session = Session {
            topic: format!("realtime:{}", filter.name),
            join: join_frame(filter, self.access_token.as_deref().unwrap_or(&self.api_key)),
            join_timeout: self.join_timeout,
            heartbeat_interval: self.heartbeat_interval,
            verbose: self.verbose,
        };
        tokio::spawn(session.run(ws, tx, shutdown_rx));

        Ok(ChannelHandle::new(rx, shutdown_tx))
    }
}

struct Session {
    topic: String,
    join: Value,
    join_timeout: Duration,
    heartbeat_interval: Duration,
    verbose: bool,
}

impl Session {
    async fn run<S>(
        self,
        ws: S,
        tx: mpsc::UnboundedSender<ChannelMessage>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws.split();

        if let Err(e) = write.send(Message::Text(self.join.to_string())).await {
            warn!("realtime: failed to send join: {}", e);
            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Closed));
            return;
        }

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        let join_deadline = sleep(self.join_timeout);
        tokio::pin!(join_deadline);
        let mut joined = false;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    let leave = json!({
                        "topic": self.topic,
                        "event": "phx_leave",
                        "payload": {},
                        "ref": next_ref.to_string(),
                    });
                    let _ = write.send(Message::Text(leave.to_string())).await;
                    let _ = write.close().await;
                    debug!("realtime: left {}", self.topic);
                    break;
                }
                _ = heartbeat.tick() => {
                    let beat = json!({
                        "topic": "phoenix",
                        "event": "heartbeat",
                        "payload": {},
                        "ref": next_ref.to_string(),
                    });
                    next_ref += 1;
                    if write.send(Message::Text(beat.to_string())).await.is_err() {
                        warn!("realtime: heartbeat failed, socket is gone");
                        break;
                    }
                }
                _ = &mut join_deadline, if !joined => {
                    warn!("realtime: join of {} timed out", self.topic);
                    let _ = tx.send(ChannelMessage::Status(ChannelStatus::Error));
                    break;
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!("realtime: socket error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => continue,
                    };
                    if self.verbose {
                        info!("realtime frame: {}", text);
                    }
                    match parse_frame(&text, &self.topic) {
                        Frame::JoinReply { ok: true } => {
                            joined = true;
                            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Subscribed));
                        }
                        Frame::JoinReply { ok: false } => {
                            warn!("realtime: join of {} rejected: {}", self.topic, text);
                            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Error));
                            break;
                        }
                        Frame::Change(event) => {
                            if tx.send(ChannelMessage::Change(event)).is_err() {
                                break;
                            }
                        }
                        Frame::ChannelError => {
                            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Error));
                            break;
                        }
                        Frame::ChannelClosed => break,
                        Frame::Other => {}
                    }
                }
            }
        }

        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Closed));
    }
}

/// The `phx_join` frame subscribing `filter.name` to postgres changes.
fn join_frame(filter: &ChannelFilter, access_token: &str) -> Value {
    let mut change_filter = json!({
        "event": "*",
        "schema": filter.schema.as_deref().unwrap_or("*"),
    });
    if let Some(table) = &filter.table {
        change_filter["table"] = json!(table);
    }
    json!({
        "topic": format!("realtime:{}", filter.name),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change_filter],
                "private": false,
            },
            "access_token": access_token,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
}

#[derive(Debug, PartialEq)]
enum Frame {
    JoinReply { ok: bool },
    Change(ChangeEvent),
    ChannelError,
    ChannelClosed,
    Other,
}

fn parse_frame(text: &str, topic: &str) -> Frame {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };
    if frame.get("topic").and_then(Value::as_str) != Some(topic) {
        return Frame::Other;
    }
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);

    match frame.get("event").and_then(Value::as_str) {
        Some("phx_reply") if frame.get("ref").and_then(Value::as_str) == Some(JOIN_REF) => {
            Frame::JoinReply {
                ok: payload.get("status").and_then(Value::as_str) == Some("ok"),
            }
        }
        Some("postgres_changes") => parse_change(&payload)
            .map(Frame::Change)
            .unwrap_or(Frame::Other),
        Some("phx_error") => Frame::ChannelError,
        Some("phx_close") => Frame::ChannelClosed,
        Some("system") if payload.get("status").and_then(Value::as_str) == Some("error") => {
            Frame::ChannelError
        }
        _ => Frame::Other,
    }
}

fn parse_change(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let table = data.get("table")?.as_str()?.to_string();
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let non_empty = |key: &str| {
        data.get(key)
            .cloned()
            .and_then(Row::from_value)
            .filter(|row| !row.is_empty())
    };
    Some(ChangeEvent {
        table,
        kind,
        new_row: non_empty("record"),
        old_row: non_empty("old_record"),
    })
}
