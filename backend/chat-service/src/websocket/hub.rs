//! Live session registry and broadcast fan-out.
//!
//! A single task owns the registry and applies register, unregister and
//! broadcast commands in the order they arrive, so every session observes the
//! same sequence of envelopes. Nothing outside the task touches the map.

use crate::metrics::{ACTIVE_SESSIONS, SESSIONS_EVICTED_TOTAL};
use crate::models::UserInfo;
use crate::websocket::message_types::{OutboundFrame, PresenceStatus, WsEnvelope};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use uuid::Uuid;

pub type Mailbox = mpsc::Receiver<Arc<OutboundFrame>>;

/// Unique identifier for one WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub command_capacity: usize,
    pub mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            mailbox_capacity: 256,
        }
    }
}

/// What a new session gets back from `register`
pub struct Registration {
    pub id: SessionId,
    pub user: UserInfo,
    pub mailbox: Mailbox,
    /// Users online at the moment of registration, this one included
    pub active_users: Vec<UserInfo>,
}

enum HubCommand {
    Register {
        user: UserInfo,
        reply: oneshot::Sender<Registration>,
    },
    Unregister(SessionId),
    Broadcast(Arc<OutboundFrame>),
    ActiveUsers(oneshot::Sender<Vec<UserInfo>>),
    SessionCount(oneshot::Sender<usize>),
}

/// Cheap, cloneable handle to the hub task
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Start the command loop on the current runtime. It stops once every
    /// handle has been dropped.
    pub fn spawn(config: HubConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.command_capacity);
        tokio::spawn(run(rx, HubState::new(config.mailbox_capacity)));
        Self { commands }
    }

    pub async fn register(&self, user: UserInfo) -> Result<Registration, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { user, reply })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Idempotent and non-blocking, so it can run from `Drop`.
    pub fn unregister(&self, id: SessionId) {
        match self.commands.try_send(HubCommand::Unregister(id)) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let commands = self.commands.clone();
                    handle.spawn(async move {
                        let _ = commands.send(cmd).await;
                    });
                }
                Err(_) => tracing::warn!(session_id = %id, "unregister dropped: no runtime"),
            },
        }
    }

    /// Queue an envelope for every live session. Slow sessions are evicted by
    /// the hub; the caller never waits on them.
    pub async fn broadcast(&self, envelope: WsEnvelope) {
        let frame = match OutboundFrame::encode(&envelope) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode envelope");
                return;
            }
        };
        if self
            .commands
            .send(HubCommand::Broadcast(frame))
            .await
            .is_err()
        {
            tracing::warn!("broadcast after hub shutdown");
        }
    }

    pub async fn active_users(&self) -> Result<Vec<UserInfo>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::ActiveUsers(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn session_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::SessionCount(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

async fn run(mut commands: mpsc::Receiver<HubCommand>, mut state: HubState) {
    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { user, reply } => {
                let registration = state.register(user);
                let id = registration.id;
                if let Err(registration) = reply.send(registration) {
                    // Caller went away before the reply arrived
                    state.unregister(registration.id);
                    tracing::debug!(session_id = %id, "registration abandoned");
                }
            }
            HubCommand::Unregister(id) => state.unregister(id),
            HubCommand::Broadcast(frame) => state.fan_out(frame),
            HubCommand::ActiveUsers(reply) => {
                let _ = reply.send(state.active_users());
            }
            HubCommand::SessionCount(reply) => {
                let _ = reply.send(state.sessions.len());
            }
        }
    }
    tracing::info!("hub stopped");
}

struct SessionEntry {
    user: UserInfo,
    mailbox: mpsc::Sender<Arc<OutboundFrame>>,
}

struct HubState {
    sessions: HashMap<SessionId, SessionEntry>,
    // user id -> live session count, drives presence notices
    user_sessions: HashMap<String, usize>,
    mailbox_capacity: usize,
}

impl HubState {
    fn new(mailbox_capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            user_sessions: HashMap::new(),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    fn register(&mut self, user: UserInfo) -> Registration {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);

        let count = self.user_sessions.entry(user.id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            // Announced before insertion: the newcomer learns of itself via user_list
            self.announce(PresenceStatus::Joined, user.clone());
        }

        self.sessions.insert(
            id,
            SessionEntry {
                user: user.clone(),
                mailbox: tx,
            },
        );
        ACTIVE_SESSIONS.inc();
        tracing::info!(session_id = %id, user_id = %user.id, "session registered");

        Registration {
            id,
            active_users: self.active_users(),
            user,
            mailbox: rx,
        }
    }

    fn unregister(&mut self, id: SessionId) {
        let Some(entry) = self.sessions.remove(&id) else {
            return;
        };
        ACTIVE_SESSIONS.dec();
        tracing::info!(session_id = %id, user_id = %entry.user.id, "session unregistered");
        if self.release(&entry.user) {
            self.announce(PresenceStatus::Left, entry.user);
        }
    }

    /// Returns true when this was the user's last session
    fn release(&mut self, user: &UserInfo) -> bool {
        match self.user_sessions.get_mut(&user.id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.user_sessions.remove(&user.id);
                true
            }
            None => false,
        }
    }

    fn announce(&mut self, status: PresenceStatus, user: UserInfo) {
        if let Some(frame) = presence_frame(status, user) {
            self.fan_out(frame);
        }
    }

    /// Non-blocking enqueue into every mailbox. A full or closed mailbox
    /// evicts its session; the resulting `left` notices go through the same
    /// loop until nothing more is evicted.
    fn fan_out(&mut self, frame: Arc<OutboundFrame>) {
        let mut pending = VecDeque::from([frame]);

        while let Some(frame) = pending.pop_front() {
            let evicted: Vec<SessionId> = self
                .sessions
                .iter()
                .filter(|(_, entry)| entry.mailbox.try_send(frame.clone()).is_err())
                .map(|(id, _)| *id)
                .collect();

            for id in evicted {
                let Some(entry) = self.sessions.remove(&id) else {
                    continue;
                };
                ACTIVE_SESSIONS.dec();
                SESSIONS_EVICTED_TOTAL.inc();
                tracing::warn!(
                    session_id = %id,
                    user_id = %entry.user.id,
                    "session evicted: mailbox full or closed"
                );

                if self.release(&entry.user) {
                    if let Some(left) = presence_frame(PresenceStatus::Left, entry.user) {
                        pending.push_back(left);
                    }
                }
                // Dropping `entry` closes the mailbox; the write pump sees it and exits
            }
        }
    }

    /// Deduplicated by user id, ordered by username
    fn active_users(&self) -> Vec<UserInfo> {
        let mut seen: HashMap<&str, &UserInfo> = HashMap::new();
        for entry in self.sessions.values() {
            seen.entry(entry.user.id.as_str()).or_insert(&entry.user);
        }
        let mut users: Vec<UserInfo> = seen.into_values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.id.cmp(&b.id)));
        users
    }
}

fn presence_frame(status: PresenceStatus, user: UserInfo) -> Option<Arc<OutboundFrame>> {
    match OutboundFrame::encode(&WsEnvelope::presence(status, user)) {
        Ok(frame) => Some(Arc::new(frame)),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode presence notice");
            None
        }
    }
}
