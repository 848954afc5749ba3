use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

/// Shared Redis handle.
///
/// `manager()` hands out clones of one multiplexed connection. Blocking
/// commands (`XREAD BLOCK`) must use `dedicated()` so they do not stall every
/// other request queued on the multiplexed pipe.
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn dedicated(&self) -> RedisResult<ConnectionManager> {
        ConnectionManager::new(self.client.clone()).await
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.manager();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await
    }
}
