//! # health-assist-core
//!
//! Backend framework for the multilingual health-assist chat orchestration service.
//!
//! ## Features
//!
//! - **HTTP** (axum) with SSE streaming for chat responses
//! - **Middleware stack**: JWT bearer-token verification, rate limiting, request tracking
//! - **Observability**: structured `tracing` output, request ID propagation
//! - **Connection pooling**: PostgreSQL (customer/session history), Redis (cache + JWT revocation)
//! - **Health checks**: liveness and readiness probes
//! - **Graceful shutdown**: SIGTERM/SIGINT handling
//!
//! ## Example
//!
//! ```rust,no_run
//! use health_assist_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::builder()
//!         .config(config.clone())
//!         .build()
//!         .await?;
//!
//!     let app = Router::new()
//!         .route("/health", get(health))
//!         .route("/ready", get(readiness))
//!         .with_state(state);
//!
//!     Server::new(config).serve(app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod health;
pub mod pool_health;
pub mod responses;
pub mod server;
pub mod service_builder;
pub mod state;
pub mod versioning;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "cache")]
pub mod cache;

pub mod observability;

#[cfg(feature = "sse")]
pub mod sse;

pub mod domain;
pub mod graph;
pub mod vector;
pub mod safety;
pub mod llm;
pub mod pipeline;
pub mod orchestrator;
pub mod worker;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, RateLimitConfig};

    pub use crate::error::{Error, Result};
    pub use crate::health::{health, readiness, pool_metrics};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::pool_health::PoolHealthSummary;

    #[cfg(feature = "database")]
    pub use crate::pool_health::DatabasePoolHealth;

    #[cfg(feature = "cache")]
    pub use crate::pool_health::RedisPoolHealth;

    #[cfg(feature = "cache")]
    pub use crate::cache::{CacheFamily, CacheKey, CacheStats, CacheSubstrate};

    pub use crate::middleware::{
        CompiledRoutePatterns, RateLimit, RequestTrackingConfig,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS, normalize_path,
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    };

    #[cfg(feature = "jwt")]
    pub use crate::middleware::{Claims, JwtAuth};

    pub use crate::server::Server;
    pub use crate::service_builder::{ActonService, ServiceBuilder, VersionedRoutes};
    pub use crate::state::{AppState, AppStateBuilder};
    pub use crate::versioning::{
        ApiVersion, DeprecationInfo, VersionedApiBuilder, VersionedResponse,
        extract_version_from_path, versioned_router,
    };
    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };

    #[cfg(feature = "otel-metrics")]
    pub use crate::middleware::{MetricsConfig, metric_labels, metric_names};

    #[cfg(feature = "governor")]
    pub use crate::middleware::{GovernorConfig, GovernorRateLimit, RateLimitExceeded};

    #[cfg(feature = "observability")]
    pub use crate::observability::init_tracing;

    // Server-Sent Events support
    #[cfg(feature = "sse")]
    pub use crate::sse::{
        SseConfig,
        ConnectionId as SseConnectionId, SseConnection,
        SseEventExt, TypedEvent,
        SseBroadcaster, BroadcastMessage, BroadcastTarget as SseBroadcastTarget,
    };

    #[cfg(feature = "sse")]
    pub use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};

    pub use crate::domain::{
        Profile, ChatRequest, ChatResponse, Safety, MentalHealthSafety, PregnancySafety,
        Fact, FactKind, Citation, Customer, Session, ChatMessage, IpObservation,
    };

    pub use crate::validation::{
        ValidationFailure, validate_chat_text, validate_uuid_path, sanitize_profile_field,
        is_valid_uuid_path_segment, contains_sql_injection_pattern, strip_null_bytes, html_sanitize,
    };

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    pub use tokio;

    pub use async_trait::async_trait;

    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    pub use uuid::Uuid;

    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    pub use http::{Method, Uri};
}
