//! Store provider that builds the configured queue backend.

use std::sync::Arc;

use tracing::info;

use coursegen_core::config::connection::ConnectionConfig;
use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;

use crate::store::QueueStore;

/// Owns the shared queue store selected by configuration.
///
/// Producers, the flow orchestrator and every worker pool hold clones of
/// the same store handle.
#[derive(Debug, Clone)]
pub struct StoreProvider {
    /// The inner store.
    inner: Arc<dyn QueueStore>,
}

impl StoreProvider {
    /// Build the store named by `config.backend`.
    ///
    /// For Redis the connection is resolved and established here; an
    /// unresolvable or unreachable store is a fatal configuration error.
    pub async fn new(config: &ConnectionConfig) -> AppResult<Self> {
        let inner: Arc<dyn QueueStore> = match config.backend.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                let resolved = crate::connection::ConnectionProvider::resolve(config)?;
                info!(
                    host = %resolved.params.host,
                    port = resolved.params.port,
                    "Initializing Redis queue store"
                );
                let client = crate::redis::RedisClient::connect(&resolved).await?;
                let store =
                    crate::redis::RedisQueueStore::new(client, resolved.params.key_prefix.clone());
                Arc::new(store)
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory queue store");
                Arc::new(crate::memory::MemoryQueueStore::new())
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown queue backend: '{other}'. Supported: memory, redis"
                )));
            }
        };

        Ok(Self { inner })
    }

    /// Wrap an existing store (for testing).
    pub fn from_store(store: Arc<dyn QueueStore>) -> Self {
        Self { inner: store }
    }

    /// Borrow the store.
    pub fn store(&self) -> &dyn QueueStore {
        self.inner.as_ref()
    }

    /// Shared handle to the store.
    pub fn shared(&self) -> Arc<dyn QueueStore> {
        Arc::clone(&self.inner)
    }
}
