//! Two-tier cache substrate: an in-process bounded LRU (L1) in front of a
//! Redis-backed store (L2), sharing one versioned key space.
//!
//! L2 is the source of truth; L1 exists so the service keeps answering
//! cacheable reads at L1 speed when L2 is unreachable, per
//! [`CacheSubstrate::get_fast`]/[`CacheSubstrate::get_reliable`]. Writes go to
//! both tiers; invalidation (version bump or scan-delete) clears both.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[cfg(feature = "cache")]
use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};

use base64::Engine;
use lru::LruCache;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RedisConfig;
use crate::error::Result;

/// Entries never outlive this long in L1, regardless of the L2 TTL supplied,
/// bounding cross-process staleness while L1 serves during an L2 outage.
const L1_MAX_TTL: Duration = Duration::from_secs(5 * 60);

/// Gzip streams always begin with the magic bytes `1f 8b 08`; base64-encoding
/// that prefix always yields `H4sI`, which we use to auto-detect compressed
/// values on read without a dedicated marker byte.
const GZIP_BASE64_MARKER: &str = "H4sI";

/// Create a Redis connection pool with retry logic
///
/// This is an internal function used by AppStateBuilder.
/// It will retry connection attempts based on the configuration.
#[cfg(feature = "cache")]
pub(crate) async fn create_pool(config: &RedisConfig) -> Result<Pool> {
    create_pool_with_retries(config, config.max_retries).await
}

/// Create a Redis connection pool with configurable retries
///
/// Uses exponential backoff strategy for retries
#[cfg(feature = "cache")]
async fn create_pool_with_retries(config: &RedisConfig, max_retries: u32) -> Result<Pool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Redis connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Redis connection pool created: max_connections={}",
                        config.max_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > max_retries {
                    tracing::error!(
                        "Failed to connect to Redis after {} attempts: {}",
                        max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                // Calculate exponential backoff
                let delay_multiplier = 2_u32.pow(attempt.saturating_sub(1));
                let delay = base_delay * delay_multiplier;

                tracing::warn!(
                    "Redis connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Attempt to create a Redis pool (single try)
#[cfg(feature = "cache")]
async fn try_create_pool(config: &RedisConfig) -> Result<Pool> {
    let cfg = DeadpoolConfig::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| crate::error::Error::Internal(format!("Failed to build Redis pool: {}", e)))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| crate::error::Error::Internal(format!("Failed to create Redis pool: {}", e)))?;

    // Test the connection
    let conn = pool
        .get()
        .await
        .map_err(|e| crate::error::Error::Internal(format!("Failed to get Redis connection: {}", e)))?;
    drop(conn);

    Ok(pool)
}

/// The cache key families sharing the substrate's key space. `ChatResponse`
/// is defined but unused for caching responses themselves (chat answers are
/// never cached — see the orchestrator); it exists so the key-hashing helper
/// used to have a natural home for request-shape hashing that other families
/// reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFamily {
    ChatResponse,
    UserInfo,
    Sessions,
    SessionMessages,
    SessionFull,
    Customer,
    IpCheck,
}

impl CacheFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatResponse => "chat:response",
            Self::UserInfo => "user_info",
            Self::Sessions => "sessions",
            Self::SessionMessages => "session_messages",
            Self::SessionFull => "session_full",
            Self::Customer => "customer",
            Self::IpCheck => "ip_check",
        }
    }
}

/// A fully-formed, versioned cache key: `<family>:<subject>:<version>:<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from its components. `hash_parts` are joined and hashed
    /// via SHA-256 so the key stays a fixed, filesystem/Redis-safe length
    /// regardless of how large the hashed content is.
    pub fn new(family: CacheFamily, subject: &str, version: u32, hash_parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in hash_parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        let hash = hex_encode(&hasher.finalize());
        Self(format!("{}:{}:{}:{}", family.as_str(), subject, version, hash))
    }

    /// Build the key with no distinguishing hash input, used for families
    /// keyed purely by subject (e.g. `customer:<uid>`).
    pub fn for_subject(family: CacheFamily, subject: &str, version: u32) -> Self {
        Self::new(family, subject, version, &[])
    }

    /// A scan-invalidate prefix matching every hash variant for one
    /// `(family, subject)` pair, independent of version — used to evict a
    /// family wholesale for a given subject without knowing every live limit
    /// or version that was ever cached.
    pub fn prefix_pattern(family: CacheFamily, subject: &str) -> String {
        format!("{}:{}:*", family.as_str(), subject)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Build the deterministic key for a chat lookup: normalized text, language,
/// and the six identity-relevant profile fields, fed through a stable
/// sorted-key JSON encoding then SHA-256. Not used to cache answers (those
/// are never cached) but exercised by the idempotent-key property tests and
/// reused wherever request-shape hashing is needed.
pub fn chat_lookup_hash(
    text: &str,
    lang: &str,
    age: Option<u8>,
    sex: Option<&str>,
    diabetes: bool,
    hypertension: bool,
    pregnancy: bool,
    city: Option<&str>,
) -> String {
    let normalized = text.trim().to_lowercase();
    let payload = serde_json::json!({
        "age": age,
        "city": city,
        "diabetes": diabetes,
        "hypertension": hypertension,
        "lang": lang,
        "pregnancy": pregnancy,
        "sex": sex,
        "text": normalized,
    });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex_encode(&hasher.finalize())
}

#[derive(Debug, Default)]
struct CacheStatsInner {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    errors_connection: AtomicU64,
    errors_timeout: AtomicU64,
    errors_other: AtomicU64,
}

/// A point-in-time snapshot of the substrate's hit/miss/error counters,
/// suitable for serializing at the `/cache/stats` introspection endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub errors_connection: u64,
    pub errors_timeout: u64,
    pub errors_other: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
}

struct L1Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Which error class an L2 operation failed with, for statistics bucketing.
enum L2ErrorClass {
    Connection,
    Timeout,
    Other,
}

/// The two-tier cache. Cheap to clone behind an `Arc` (held by
/// [`crate::state::AppState`]); the L1 map is internally synchronized.
pub struct CacheSubstrate {
    config: crate::config::CacheConfig,
    l1: Mutex<LruCache<String, L1Entry>>,
    stats: CacheStatsInner,
}

impl CacheSubstrate {
    pub fn new(config: crate::config::CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.l1_capacity.max(1)).unwrap();
        Self {
            config,
            l1: Mutex::new(LruCache::new(capacity)),
            stats: CacheStatsInner::default(),
        }
    }

    fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds).min(L1_MAX_TTL)
    }

    fn l1_get(&self, key: &str) -> Option<Vec<u8>> {
        let mut l1 = self.l1.lock().unwrap();
        match l1.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.bytes.clone()),
            Some(_) => {
                l1.pop(key);
                None
            }
            None => None,
        }
    }

    fn l1_put(&self, key: &str, bytes: Vec<u8>) {
        let expires_at = Instant::now() + self.l1_ttl();
        self.l1.lock().unwrap().put(key.to_string(), L1Entry { bytes, expires_at });
    }

    fn l1_remove_prefix(&self, prefix: &str) -> usize {
        let mut l1 = self.l1.lock().unwrap();
        let doomed: Vec<String> = l1
            .iter()
            .filter(|(k, _)| matches_prefix_pattern(k, prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let count = doomed.len();
        for key in doomed {
            l1.pop(&key);
        }
        count
    }

    fn l1_clear(&self) -> usize {
        let mut l1 = self.l1.lock().unwrap();
        let count = l1.len();
        l1.clear();
        count
    }

    /// Encode a value for L2 storage: JSON, then gzip+base64 if the
    /// serialized length is at or above `compress_threshold_bytes`.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = serde_json::to_vec(value)
            .map_err(|e| crate::error::Error::Internal(format!("cache encode failed: {}", e)))?;
        if json.len() >= self.config.compress_threshold_bytes {
            Ok(compress_to_base64(&json))
        } else {
            String::from_utf8(json)
                .map_err(|e| crate::error::Error::Internal(format!("cache encode produced invalid utf8: {}", e)))
        }
    }

    fn decode<T: DeserializeOwned>(&self, stored: &[u8]) -> Option<T> {
        let json = if stored.starts_with(GZIP_BASE64_MARKER.as_bytes()) {
            decompress_from_base64(stored)?
        } else {
            stored.to_vec()
        };
        serde_json::from_slice(&json).ok()
    }

    /// Fast-path read: no retry, ≤30ms budget, for request-critical reads.
    /// L2 is consulted first since it is the tier of record; L1 is checked
    /// only on an L2 miss or error, so cache still serves during L2 outages.
    #[cfg(feature = "cache")]
    pub async fn get_fast<T: DeserializeOwned>(
        &self,
        redis: Option<&deadpool_redis::Pool>,
        key: &CacheKey,
    ) -> Option<T> {
        if let Some(pool) = redis {
            match tokio::time::timeout(Duration::from_millis(30), l2_get(pool, key.as_str())).await {
                Ok(Ok(Some(bytes))) => {
                    self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                    if let Some(value) = self.decode(&bytes) {
                        return Some(value);
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(class)) => self.record_error(class),
                Err(_) => self.record_error(L2ErrorClass::Timeout),
            }
        }

        if let Some(bytes) = self.l1_get(key.as_str()) {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            return self.decode(&bytes);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Reliable-path read: up to two retries at `0.1s * attempt` backoff,
    /// for non-critical reads where a slower but more persistent lookup is
    /// acceptable.
    #[cfg(feature = "cache")]
    pub async fn get_reliable<T: DeserializeOwned>(
        &self,
        redis: Option<&deadpool_redis::Pool>,
        key: &CacheKey,
    ) -> Option<T> {
        if let Some(pool) = redis {
            let mut attempt = 0;
            loop {
                match l2_get(pool, key.as_str()).await {
                    Ok(Some(bytes)) => {
                        self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                        if let Some(value) = self.decode(&bytes) {
                            return Some(value);
                        }
                        break;
                    }
                    Ok(None) => break,
                    Err(class) if attempt < 2 => {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(100) * attempt).await;
                        continue;
                    }
                    Err(class) => {
                        self.record_error(class);
                        break;
                    }
                }
            }
        }

        if let Some(bytes) = self.l1_get(key.as_str()) {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            return self.decode(&bytes);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write-through to both tiers. Failures against L2 are logged and
    /// counted but never propagate — callers treat caching as best-effort.
    #[cfg(feature = "cache")]
    pub async fn set<T: Serialize>(
        &self,
        redis: Option<&deadpool_redis::Pool>,
        key: &CacheKey,
        value: &T,
        ttl_secs: u64,
    ) {
        let encoded = match self.encode(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "cache encode failed, skipping write");
                return;
            }
        };

        self.l1_put(key.as_str(), encoded.clone().into_bytes());

        if let Some(pool) = redis {
            let mut attempt = 0;
            loop {
                match l2_set(pool, key.as_str(), &encoded, ttl_secs).await {
                    Ok(()) => break,
                    Err(class) if attempt < 2 => {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(100) * attempt).await;
                        continue;
                    }
                    Err(class) => {
                        self.record_error(class);
                        tracing::warn!(key = key.as_str(), "cache write to L2 failed after retries");
                        break;
                    }
                }
            }
        }
    }

    /// Delete every key matching `pattern` from both tiers via SCAN-style
    /// cursor iteration on L2. Returns the number of L1 entries evicted (L2's
    /// count is not tracked precisely since SCAN pages may overlap).
    #[cfg(feature = "cache")]
    pub async fn invalidate(&self, redis: Option<&deadpool_redis::Pool>, pattern: &str) -> usize {
        let l1_removed = self.l1_remove_prefix(pattern);

        if let Some(pool) = redis {
            if let Err(class) = l2_scan_delete(pool, pattern).await {
                self.record_error(class);
            }
        }

        l1_removed
    }

    /// Drop every entry from both tiers unconditionally. Administrative
    /// operation, not on any request-critical path.
    #[cfg(feature = "cache")]
    pub async fn invalidate_all(&self, redis: Option<&deadpool_redis::Pool>) -> usize {
        let l1_removed = self.l1_clear();

        if let Some(pool) = redis {
            if let Err(class) = l2_scan_delete(pool, "*").await {
                self.record_error(class);
            }
        }

        l1_removed
    }

    /// Invalidate every fixed limit variant of a list-shaped family for one
    /// subject, plus the single-key `session_full:<sid>` family when
    /// `subject` is a session id. Mirrors the write-triggered eviction set
    /// the orchestrator applies after persisting a chat turn.
    #[cfg(feature = "cache")]
    pub async fn invalidate_session_families(
        &self,
        redis: Option<&deadpool_redis::Pool>,
        customer_id: &str,
        session_id: &str,
    ) {
        self.invalidate(redis, &CacheKey::prefix_pattern(CacheFamily::Sessions, customer_id)).await;
        self.invalidate(redis, &CacheKey::prefix_pattern(CacheFamily::SessionMessages, session_id)).await;
        let session_full_key = CacheKey::for_subject(CacheFamily::SessionFull, session_id, self.config.version);
        self.invalidate(redis, session_full_key.as_str()).await;
    }

    fn record_error(&self, class: L2ErrorClass) {
        match class {
            L2ErrorClass::Connection => self.stats.errors_connection.fetch_add(1, Ordering::Relaxed),
            L2ErrorClass::Timeout => self.stats.errors_timeout.fetch_add(1, Ordering::Relaxed),
            L2ErrorClass::Other => self.stats.errors_other.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn stats(&self) -> CacheStats {
        let l1_hits = self.stats.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.stats.l2_hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = l1_hits + l2_hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { (l1_hits + l2_hits) as f64 / total as f64 };

        CacheStats {
            l1_hits,
            l2_hits,
            misses,
            errors_connection: self.stats.errors_connection.load(Ordering::Relaxed),
            errors_timeout: self.stats.errors_timeout.load(Ordering::Relaxed),
            errors_other: self.stats.errors_other.load(Ordering::Relaxed),
            total_requests: total,
            hit_rate,
        }
    }

    pub fn reset_statistics(&self) {
        self.stats.l1_hits.store(0, Ordering::Relaxed);
        self.stats.l2_hits.store(0, Ordering::Relaxed);
        self.stats.misses.store(0, Ordering::Relaxed);
        self.stats.errors_connection.store(0, Ordering::Relaxed);
        self.stats.errors_timeout.store(0, Ordering::Relaxed);
        self.stats.errors_other.store(0, Ordering::Relaxed);
    }

    pub fn config(&self) -> &crate::config::CacheConfig {
        &self.config
    }
}

#[cfg(feature = "cache")]
async fn l2_get(pool: &deadpool_redis::Pool, key: &str) -> std::result::Result<Option<Vec<u8>>, L2ErrorClass> {
    use deadpool_redis::redis::AsyncCommands;

    let mut conn = pool.get().await.map_err(|_| L2ErrorClass::Connection)?;
    let value: Option<Vec<u8>> = conn.get(key).await.map_err(classify_redis_error)?;
    Ok(value)
}

#[cfg(feature = "cache")]
async fn l2_set(pool: &deadpool_redis::Pool, key: &str, value: &str, ttl_secs: u64) -> std::result::Result<(), L2ErrorClass> {
    use deadpool_redis::redis::AsyncCommands;

    let mut conn = pool.get().await.map_err(|_| L2ErrorClass::Connection)?;
    if ttl_secs > 0 {
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await.map_err(classify_redis_error)?;
    } else {
        conn.set::<_, _, ()>(key, value).await.map_err(classify_redis_error)?;
    }
    Ok(())
}

#[cfg(feature = "cache")]
async fn l2_scan_delete(pool: &deadpool_redis::Pool, pattern: &str) -> std::result::Result<(), L2ErrorClass> {
    use deadpool_redis::redis::AsyncCommands;

    let mut conn = pool.get().await.map_err(|_| L2ErrorClass::Connection)?;
    let mut cursor: u64 = 0;

    loop {
        let (next_cursor, keys): (u64, Vec<String>) = deadpool_redis::redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(200)
            .query_async(&mut conn)
            .await
            .map_err(classify_redis_error)?;

        if !keys.is_empty() {
            let _: () = conn.del(&keys).await.map_err(classify_redis_error)?;
        }

        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }

    Ok(())
}

#[cfg(feature = "cache")]
fn classify_redis_error(e: deadpool_redis::redis::RedisError) -> L2ErrorClass {
    use deadpool_redis::redis::ErrorKind;
    match e.kind() {
        ErrorKind::IoError => L2ErrorClass::Connection,
        ErrorKind::TryAgain | ErrorKind::ClusterDown => L2ErrorClass::Timeout,
        _ => L2ErrorClass::Other,
    }
}

/// Glob-style `*`-suffixed prefix match used for both L1 prefix eviction and
/// matching the same pattern shape SCAN MATCH accepts.
fn matches_prefix_pattern(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

fn compress_to_base64(data: &[u8]) -> String {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Infallible: writes into an in-memory Vec.
    encoder.write_all(data).expect("gzip write into memory buffer");
    let compressed = encoder.finish().expect("gzip finish into memory buffer");
    base64::engine::general_purpose::STANDARD.encode(compressed)
}

fn decompress_from_base64(stored: &[u8]) -> Option<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let decoded = base64::engine::general_purpose::STANDARD.decode(stored).ok()?;
    let mut decoder = GzDecoder::new(decoded.as_slice());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            max_connections: 20,
            connection_timeout_secs: 10,
            max_retries: 5,
            retry_delay_secs: 2,
            optional: false,
            lazy_init: true,
        };

        assert_eq!(config.max_connections, 20);
        assert_eq!(config.max_retries, 5);
        assert!(config.lazy_init);
    }

    #[test]
    fn cache_key_is_idempotent_for_equivalent_inputs() {
        let a = chat_lookup_hash("  I Have Fever  ", "en", Some(30), Some("male"), false, false, false, None);
        let b = chat_lookup_hash("i have fever", "en", Some(30), Some("male"), false, false, false, None);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_on_profile_change() {
        let a = chat_lookup_hash("fever", "en", Some(30), None, false, false, false, None);
        let b = chat_lookup_hash("fever", "en", Some(30), None, true, false, false, None);
        assert_ne!(a, b);
    }

    #[test]
    fn compression_round_trips() {
        let payload = serde_json::json!({"text": "x".repeat(2000)});
        let json = serde_json::to_vec(&payload).unwrap();
        let compressed = compress_to_base64(&json);
        assert!(compressed.starts_with(GZIP_BASE64_MARKER));
        let decompressed = decompress_from_base64(compressed.as_bytes()).unwrap();
        assert_eq!(decompressed, json);
    }

    #[test]
    fn l1_respects_capacity_bound() {
        let config = crate::config::CacheConfig { l1_capacity: 4, ..Default::default() };
        let substrate = CacheSubstrate::new(config);
        for i in 0..10 {
            substrate.l1_put(&format!("key-{}", i), b"v".to_vec());
        }
        assert_eq!(substrate.l1.lock().unwrap().len(), 4);
        assert!(substrate.l1_get("key-0").is_none());
        assert!(substrate.l1_get("key-9").is_some());
    }

    #[test]
    fn prefix_pattern_matches_only_matching_keys() {
        assert!(matches_prefix_pattern("sessions:u1:1:abc", "sessions:u1:*"));
        assert!(!matches_prefix_pattern("sessions:u2:1:abc", "sessions:u1:*"));
        assert!(matches_prefix_pattern("anything", "*"));
    }

    #[test]
    fn cache_family_renders_documented_names() {
        assert_eq!(CacheFamily::SessionMessages.as_str(), "session_messages");
        assert_eq!(CacheFamily::IpCheck.as_str(), "ip_check");
    }
}
