//! Redis connection management.

use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

use coursegen_core::error::{AppError, ErrorKind};
use coursegen_core::result::AppResult;

use crate::connection::{ReconnectPolicy, ResolvedConnection};

/// Redis client wrapper with connection management.
#[derive(Clone)]
pub struct RedisClient {
    /// Redis connection manager (multiplexed, reconnecting).
    conn: ConnectionManager,
    /// Reconnect policy applied to connection setup and read retries.
    policy: ReconnectPolicy,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    /// Connect using resolved connection parameters.
    ///
    /// Connection attempts are bounded by the connect timeout and retried
    /// with the reconnect policy's backoff before the error is surfaced.
    pub async fn connect(resolved: &ResolvedConnection) -> AppResult<Self> {
        info!(url = %resolved.params.masked_url(), "Connecting to Redis");

        let client = Client::open(resolved.params.url()).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid Redis connection URL", e)
        })?;

        let policy = resolved.policy;
        let conn = policy
            .retry("connect", || {
                let client = client.clone();
                async move {
                    match tokio::time::timeout(policy.connect_timeout, ConnectionManager::new(client))
                        .await
                    {
                        Ok(Ok(conn)) => Ok(conn),
                        Ok(Err(e)) => Err(AppError::with_source(
                            ErrorKind::Queue,
                            "Failed to connect to Redis",
                            e,
                        )),
                        Err(_) => Err(AppError::new(
                            ErrorKind::ServiceUnavailable,
                            "Timed out connecting to Redis",
                        )),
                    }
                }
            })
            .await?;

        info!("Successfully connected to Redis");
        Ok(Self { conn, policy })
    }

    /// Get a mutable clone of the connection manager.
    pub fn conn_mut(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Reconnect policy.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
