use crate::{
    config::Config,
    services::{MessageService, UserService},
    websocket::Hub,
};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub messages: Arc<MessageService>,
    pub users: Arc<UserService>,
    pub config: Arc<Config>,
    /// One permit per live WebSocket session
    pub connections: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        hub: Hub,
        messages: Arc<MessageService>,
        users: Arc<UserService>,
        config: Arc<Config>,
    ) -> Self {
        let connections = Arc::new(Semaphore::new(config.max_connections));
        Self {
            hub,
            messages,
            users,
            config,
            connections,
        }
    }
}
