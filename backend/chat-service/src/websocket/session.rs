//! Per-connection read and write pumps.
//!
//! The write pump is the only writer on a connection. The read pump hands
//! pong replies to it through a small control channel instead of writing
//! itself. Either pump ending tears the session down: each holds a
//! `SessionGuard` that unregisters from the hub on drop.

use crate::config::SessionConfig;
use crate::models::{MessageId, UserInfo};
use crate::services::{ChatError, MessageService};
use crate::websocket::hub::{Hub, Mailbox, SessionId};
use crate::websocket::message_types::{ClientMessage, OutboundFrame, WsEnvelope};
use crate::websocket::transport::{FrameSink, TransportError, WireFrame};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Work the read pump delegates to the write pump
#[derive(Debug)]
pub enum Control {
    Pong(Bytes),
}

pub const CONTROL_CAPACITY: usize = 8;

/// Unregisters the session from the hub however the owning pump exits.
pub struct SessionGuard {
    hub: Hub,
    id: SessionId,
}

impl SessionGuard {
    pub fn new(hub: Hub, id: SessionId) -> Self {
        Self { hub, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

pub struct WritePump<K> {
    pub sink: K,
    pub mailbox: Mailbox,
    pub control: mpsc::Receiver<Control>,
    pub active_users: Vec<UserInfo>,
    pub messages: Arc<MessageService>,
    pub config: SessionConfig,
    pub guard: SessionGuard,
}

impl<K: FrameSink> WritePump<K> {
    pub async fn run(mut self) {
        let session_id = self.guard.id;
        match self.deliver().await {
            Ok(()) => tracing::debug!(%session_id, "mailbox closed"),
            Err(e) => tracing::debug!(%session_id, error = %e, "write pump stopped"),
        }
        self.sink.close().await;
    }

    async fn deliver(&mut self) -> Result<(), TransportError> {
        let write_wait = self.config.write_wait;

        let users = WsEnvelope::UserList(std::mem::take(&mut self.active_users));
        bounded(write_wait, self.sink.send_text(encode(&users)?)).await?;

        let history = match self.messages.recent_history(self.config.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session_id = %self.guard.id, error = %e, "history backfill failed");
                Vec::new()
            }
        };
        // Live entries up to here were already delivered by the backfill
        let high_water = history.last().map(|m| m.id);
        bounded(
            write_wait,
            self.sink.send_text(encode(&WsEnvelope::History(history))?),
        )
        .await?;

        let ping_period = self.config.ping_period();
        let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = self.mailbox.recv() => {
                    let Some(first) = frame else {
                        return Ok(());
                    };
                    let mut batch = Vec::new();
                    push_unless_replayed(&mut batch, first, high_water);
                    while let Ok(next) = self.mailbox.try_recv() {
                        push_unless_replayed(&mut batch, next, high_water);
                    }
                    if batch.is_empty() {
                        continue;
                    }
                    let payload = batch
                        .iter()
                        .map(|f| f.payload.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    bounded(write_wait, self.sink.send_text(payload)).await?;
                }
                control = self.control.recv() => match control {
                    Some(Control::Pong(payload)) => {
                        bounded(write_wait, self.sink.send_pong(payload)).await?;
                    }
                    // Read side is gone
                    None => return Ok(()),
                },
                _ = ticker.tick() => {
                    bounded(write_wait, self.sink.send_ping()).await?;
                }
            }
        }
    }
}

fn push_unless_replayed(
    batch: &mut Vec<Arc<OutboundFrame>>,
    frame: Arc<OutboundFrame>,
    high_water: Option<MessageId>,
) {
    match (frame.chat_id, high_water) {
        (Some(id), Some(seen)) if id <= seen => {}
        _ => batch.push(frame),
    }
}

fn encode(envelope: &WsEnvelope) -> Result<String, TransportError> {
    OutboundFrame::encode(envelope)
        .map(|frame| frame.payload)
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

async fn bounded<F>(limit: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    time::timeout(limit, write)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

pub struct ReadPump<S> {
    pub frames: S,
    pub user: UserInfo,
    pub messages: Arc<MessageService>,
    pub control: mpsc::Sender<Control>,
    pub config: SessionConfig,
    pub guard: SessionGuard,
}

impl<S> ReadPump<S>
where
    S: Stream<Item = Result<WireFrame, TransportError>> + Unpin,
{
    pub async fn run(mut self) {
        let session_id = self.guard.id;
        let reason = self.ingest().await;
        tracing::debug!(%session_id, user_id = %self.user.id, reason, "read pump stopped");
    }

    /// Returns why reading stopped
    async fn ingest(&mut self) -> &'static str {
        let pong_wait = self.config.pong_wait;
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let frame = match time::timeout_at(deadline, self.frames.next()).await {
                Err(_) => return "read deadline expired",
                Ok(None) => return "stream ended",
                Ok(Some(Err(e))) => {
                    tracing::debug!(session_id = %self.guard.id, error = %e, "read failed");
                    return "read error";
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WireFrame::Text(text) => {
                    if text.len() > self.config.max_frame_bytes {
                        return "frame too large";
                    }
                    let inbound: ClientMessage = match serde_json::from_str(&text) {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            tracing::warn!(session_id = %self.guard.id, error = %e, "undecodable frame");
                            return "decode error";
                        }
                    };
                    self.submit(&inbound.content).await;
                }
                WireFrame::Ping(payload) => {
                    // A dropped pong is harmless; the peer pings again
                    let _ = self.control.try_send(Control::Pong(payload));
                }
                WireFrame::Pong => deadline = Instant::now() + pong_wait,
                WireFrame::Close => return "peer closed",
                WireFrame::Unsupported(kind) => {
                    tracing::warn!(session_id = %self.guard.id, kind, "unsupported frame");
                    return "unsupported frame";
                }
            }
        }
    }

    async fn submit(&self, content: &str) {
        match self.messages.send_chatroom_message(&self.user, content).await {
            Ok(_) => {}
            Err(ChatError::Validation(e)) => {
                tracing::debug!(user_id = %self.user.id, error = %e, "message rejected");
            }
            Err(e) => {
                tracing::error!(user_id = %self.user.id, error = %e, "failed to append message");
            }
        }
    }
}
