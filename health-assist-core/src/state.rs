//! Application state management

use std::sync::Arc;

#[cfg(any(feature = "database", feature = "cache"))]
use tokio::sync::RwLock;

#[cfg(feature = "database")]
use sqlx::PgPool;

#[cfg(feature = "cache")]
use deadpool_redis::Pool as RedisPool;

use crate::{config::Config, error::Result, graph::GraphGateway, llm::LmGateway, vector::VectorRetriever};

#[cfg(feature = "cache")]
use crate::cache::CacheSubstrate;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,

    #[cfg(feature = "database")]
    db_pool: Arc<RwLock<Option<PgPool>>>,

    #[cfg(feature = "cache")]
    redis_pool: Arc<RwLock<Option<RedisPool>>>,

    #[cfg(feature = "cache")]
    cache: Arc<CacheSubstrate>,

    graph: Arc<GraphGateway>,
    vector: Arc<VectorRetriever>,
    llm: Arc<LmGateway>,
    worker: crate::worker::WorkerHandle,
}

impl AppState {
    /// Create a new builder for AppState
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the database pool (async to handle RwLock)
    #[cfg(feature = "database")]
    pub async fn db(&self) -> Option<PgPool> {
        self.db_pool.read().await.clone()
    }

    /// Get direct access to the database pool RwLock
    #[cfg(feature = "database")]
    pub fn db_lock(&self) -> &Arc<RwLock<Option<PgPool>>> {
        &self.db_pool
    }

    /// `O(1)` last-known connectivity state; does not probe the network.
    #[cfg(feature = "database")]
    pub async fn is_db_connected(&self) -> bool {
        crate::database::is_connected(&self.db_pool).await
    }

    /// Probes the database pool with a trivial query.
    #[cfg(feature = "database")]
    pub async fn ensure_db_connected(&self) -> bool {
        crate::database::ensure_connected(&self.db_pool).await
    }

    /// Get the Redis pool (async to handle RwLock)
    #[cfg(feature = "cache")]
    pub async fn redis(&self) -> Option<RedisPool> {
        self.redis_pool.read().await.clone()
    }

    /// Get direct access to the Redis pool RwLock
    #[cfg(feature = "cache")]
    pub fn redis_lock(&self) -> &Arc<RwLock<Option<RedisPool>>> {
        &self.redis_pool
    }

    /// The two-tier (L1 in-process + L2 Redis) cache substrate
    #[cfg(feature = "cache")]
    pub fn cache(&self) -> &CacheSubstrate {
        &self.cache
    }

    /// The graph gateway (falls back to its in-memory dataset when the remote graph is unreachable)
    pub fn graph(&self) -> &GraphGateway {
        &self.graph
    }

    /// The embedded vector retriever
    pub fn vector(&self) -> &VectorRetriever {
        &self.vector
    }

    /// The language-model gateway (primary + fallback provider failover)
    pub fn llm(&self) -> &LmGateway {
        &self.llm
    }

    /// The background worker handle for persistence and cache-invalidation tasks
    pub fn worker(&self) -> &crate::worker::WorkerHandle {
        &self.worker
    }

    /// Get pool health metrics for all configured pools
    pub async fn pool_health(&self) -> crate::pool_health::PoolHealthSummary {
        let mut summary = crate::pool_health::PoolHealthSummary::new();

        #[cfg(feature = "database")]
        if let Some(pool) = self.db().await {
            if let Some(db_config) = &self.config.database {
                summary.database = Some(crate::pool_health::DatabasePoolHealth::from_pool(
                    &pool, db_config,
                ));
            }
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = self.redis().await {
            if let Some(redis_config) = &self.config.redis {
                summary.redis = Some(crate::pool_health::RedisPoolHealth::from_pool(
                    &pool,
                    redis_config,
                ));
            }
        }

        summary.healthy = summary.is_healthy();
        summary
    }
}

/// Builder for AppState
pub struct AppStateBuilder {
    config: Option<Config>,
    enable_tracing: bool,

    #[cfg(feature = "database")]
    db_pool: Option<PgPool>,

    #[cfg(feature = "cache")]
    redis_pool: Option<RedisPool>,
}

impl AppStateBuilder {
    /// Create a new builder with sensible defaults
    pub fn new() -> Self {
        Self {
            config: None,
            enable_tracing: true,
            #[cfg(feature = "database")]
            db_pool: None,
            #[cfg(feature = "cache")]
            redis_pool: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the database pool
    #[cfg(feature = "database")]
    pub fn db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// Set the Redis pool
    #[cfg(feature = "cache")]
    pub fn redis_pool(mut self, pool: RedisPool) -> Self {
        self.redis_pool = Some(pool);
        self
    }

    /// Enable automatic tracing initialization (default: enabled)
    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    /// Disable automatic tracing initialization
    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    /// Initialize tracing with sensible defaults. Safe to call multiple times.
    fn init_tracing() {
        use std::sync::Once;
        static INIT: Once = Once::new();

        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_target(false)
                .init();
            tracing::debug!("Tracing initialized with default configuration");
        });
    }

    /// Build the AppState, initializing connection pools and gateways as needed
    pub async fn build(self) -> Result<AppState> {
        if self.enable_tracing {
            Self::init_tracing();
        }

        let config = self.config.unwrap_or_default();

        #[cfg(feature = "database")]
        let db_pool = if let Some(pool) = self.db_pool {
            Arc::new(RwLock::new(Some(pool)))
        } else if let Some(db_config) = &config.database {
            if db_config.lazy_init {
                let pool_lock = Arc::new(RwLock::new(None));
                let pool_clone = pool_lock.clone();
                let db_config_clone = db_config.clone();

                tokio::spawn(async move {
                    tracing::info!("Initiating lazy database connection...");
                    match crate::database::create_pool(&db_config_clone).await {
                        Ok(pool) => {
                            *pool_clone.write().await = Some(pool);
                            tracing::info!("Lazy database connection established successfully");
                        }
                        Err(e) => {
                            if db_config_clone.optional {
                                tracing::warn!("Optional database connection failed: {}. Service will continue without database.", e);
                            } else {
                                tracing::error!("Required database connection failed: {}. Service is degraded.", e);
                            }
                        }
                    }
                });

                pool_lock
            } else {
                match crate::database::create_pool(db_config).await {
                    Ok(pool) => Arc::new(RwLock::new(Some(pool))),
                    Err(e) => {
                        if db_config.optional {
                            tracing::warn!("Optional database connection failed: {}. Service starting without database.", e);
                            Arc::new(RwLock::new(None))
                        } else {
                            return Err(e);
                        }
                    }
                }
            }
        } else {
            Arc::new(RwLock::new(None))
        };

        #[cfg(feature = "database")]
        if let Some(db_config) = &config.database {
            crate::database::spawn_health_monitor(db_pool.clone(), db_config.clone());
        }

        #[cfg(feature = "cache")]
        let redis_pool = if let Some(pool) = self.redis_pool {
            Arc::new(RwLock::new(Some(pool)))
        } else if let Some(redis_config) = &config.redis {
            if redis_config.lazy_init {
                let pool_lock = Arc::new(RwLock::new(None));
                let pool_clone = pool_lock.clone();
                let redis_config_clone = redis_config.clone();

                tokio::spawn(async move {
                    tracing::info!("Initiating lazy Redis connection...");
                    match crate::cache::create_pool(&redis_config_clone).await {
                        Ok(pool) => {
                            *pool_clone.write().await = Some(pool);
                            tracing::info!("Lazy Redis connection established successfully");
                        }
                        Err(e) => {
                            if redis_config_clone.optional {
                                tracing::warn!("Optional Redis connection failed: {}. Service will continue without Redis.", e);
                            } else {
                                tracing::error!("Required Redis connection failed: {}. Service is degraded.", e);
                            }
                        }
                    }
                });

                pool_lock
            } else {
                match crate::cache::create_pool(redis_config).await {
                    Ok(pool) => Arc::new(RwLock::new(Some(pool))),
                    Err(e) => {
                        if redis_config.optional {
                            tracing::warn!("Optional Redis connection failed: {}. Service starting without Redis.", e);
                            Arc::new(RwLock::new(None))
                        } else {
                            return Err(e);
                        }
                    }
                }
            }
        } else {
            Arc::new(RwLock::new(None))
        };

        let graph = Arc::new(GraphGateway::new(config.graph.clone()));
        let vector = Arc::new(VectorRetriever::new(config.vector.clone()));
        let llm = Arc::new(LmGateway::new(config.lm_primary.clone(), config.lm_fallback.clone()));
        let worker = crate::worker::spawn();

        #[cfg(feature = "cache")]
        let cache = Arc::new(CacheSubstrate::new(config.cache.clone()));

        Ok(AppState {
            config: Arc::new(config),
            #[cfg(feature = "database")]
            db_pool,
            #[cfg(feature = "cache")]
            redis_pool,
            #[cfg(feature = "cache")]
            cache,
            graph,
            vector,
            llm,
            worker,
        })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_builder() {
        let config = Config::default();
        let builder = AppStateBuilder::new().config(config).without_tracing();

        let state = builder.build().await.unwrap();
        assert_eq!(state.config().service.name, "health-assist");
    }

    #[tokio::test]
    async fn test_state_builder_defaults() {
        let state = AppStateBuilder::new().without_tracing().build().await.unwrap();

        assert_eq!(state.config().service.name, "health-assist");
    }
}
