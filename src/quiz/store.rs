use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use crate::quiz::session::UserId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Where the question currently posed to each user lives, shared by every
/// bot process.
#[async_trait]
pub trait ActiveQuestionStore: Send + Sync {
    async fn get(&self, user: UserId) -> Result<Option<String>, StoreError>;

    async fn set(&self, user: UserId, question: &str) -> Result<(), StoreError>;

    async fn clear(&self, user: UserId) -> Result<(), StoreError>;
}

/// Keys are the bare user id so that every front-end reads the same entry.
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(info: redis::ConnectionInfo) -> Result<Self, StoreError> {
        let client = redis::Client::open(info)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl ActiveQuestionStore for RedisStore {
    async fn get(&self, user: UserId) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let question: Option<String> = connection.get(user.to_string()).await?;
        Ok(question)
    }

    async fn set(&self, user: UserId, question: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        connection.set::<_, _, ()>(user.to_string(), question).await?;
        Ok(())
    }

    async fn clear(&self, user: UserId) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        connection.del::<_, ()>(user.to_string()).await?;
        Ok(())
    }
}
