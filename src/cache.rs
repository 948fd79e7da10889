//! Hot cache for verified claims.
//!
//! Verified claims are content-addressed by a SHA-256 hash of the normalized
//! claim text. A cache hit at submission time short-circuits the entire
//! pipeline: the stored report is returned and no job is enqueued.
//!
//! Two backends are provided: Redis (production, shared across processes)
//! and an in-process map for tests and single-process runs.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key prefix for cached claim reports.
const CACHE_KEY_PREFIX: &str = "cache:claim";

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Content-address of a normalized claim.
///
/// The hash is computed with SHA-256 and stored hex-encoded; it is stable
/// across process restarts given identical input text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes the given claim text.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps an existing hex-encoded hash.
    pub fn from_hex(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Get the hash string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key-value cache of verification reports with TTL.
#[async_trait]
pub trait ClaimCache: Send + Sync {
    /// Looks up a cached report by claim hash.
    async fn get(&self, hash: &ContentHash) -> Result<Option<serde_json::Value>, CacheError>;

    /// Stores a report under the claim hash with the given time-to-live.
    async fn put(
        &self,
        hash: &ContentHash,
        report: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// Redis-backed claim cache.
///
/// Entries are stored as JSON strings under `cache:claim:{hash}` with a
/// Redis-side expiry.
pub struct RedisClaimCache {
    redis: ConnectionManager,
}

impl RedisClaimCache {
    /// Creates a cache sharing an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(hash: &ContentHash) -> String {
        format!("{}:{}", CACHE_KEY_PREFIX, hash)
    }
}

#[async_trait]
impl ClaimCache for RedisClaimCache {
    async fn get(&self, hash: &ContentHash) -> Result<Option<serde_json::Value>, CacheError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(Self::key(hash)).await?;
        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        hash: &ContentHash,
        report: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let data = serde_json::to_string(report)?;
        conn.set_ex::<_, _, ()>(Self::key(hash), data, ttl.as_secs())
            .await?;
        Ok(())
    }
}

/// In-process claim cache with lazy expiry.
///
/// Expired entries are dropped on read.
#[derive(Default)]
pub struct MemoryClaimCache {
    entries: RwLock<HashMap<String, (serde_json::Value, Instant)>>,
}

impl MemoryClaimCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .expect("cache lock poisoned")
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    /// Returns whether the cache has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClaimCache for MemoryClaimCache {
    async fn get(&self, hash: &ContentHash) -> Result<Option<serde_json::Value>, CacheError> {
        let entries = self.entries.read().expect("cache lock poisoned");
        match entries.get(hash.as_str()) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn put(
        &self,
        hash: &ContentHash,
        report: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            hash.as_str().to_string(),
            (report.clone(), Instant::now() + ttl),
        );
        Ok(())
    }
}
