//! Key-value cache trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{FulfillmentError, Result};

/// Key of the cached active sale.
pub const ACTIVE_SALE_KEY: &str = "sale:active";
/// Key of the cached home page payload, which embeds the active sale.
pub const HOME_KEY: &str = "home:data";

/// A string cache with expiry.
///
/// Callers treat every error as a miss: the store stays the source of truth.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Deletes every key matching `pattern`. A trailing `*` matches any suffix.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize>;
}

#[derive(Debug, Default)]
struct InMemoryCacheState {
    entries: HashMap<String, (String, Instant)>,
    fail: bool,
}

/// In-memory cache for testing and single-node runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<InMemoryCacheState>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .entries
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryCacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &InMemoryCacheState) -> Result<()> {
        if state.fail {
            return Err(FulfillmentError::collaborator("cache", "unavailable"));
        }
        Ok(())
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock();
        Self::check(&state)?;
        match state.entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state
            .entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let mut state = self.lock();
        Self::check(&state)?;
        let before = state.entries.len();
        state.entries.retain(|key, _| !matches(pattern, key));
        Ok(before - state.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.contains("k"));
    }

    #[tokio::test]
    async fn delete_by_prefix_pattern() {
        let cache = InMemoryCache::new();
        for key in ["product:1", "product:2", "home:data"] {
            cache.set(key, "x".into(), TTL).await.unwrap();
        }

        assert_eq!(cache.delete_pattern("product:*").await.unwrap(), 2);
        assert!(cache.contains("home:data"));
        assert_eq!(cache.delete_pattern("home:data").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_toggle() {
        let cache = InMemoryCache::new();
        cache.set_fail(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", "v".into(), TTL).await.is_err());
    }
}
