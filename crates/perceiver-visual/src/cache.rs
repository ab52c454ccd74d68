//! Vision response caching, content-addressed with no expiry
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::VisionLocator;
use crate::errors::VisionError;
use crate::fingerprint::fingerprint;
use crate::models::{VisionQuery, VisionResult};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: VisionResult,
    pub hits: u64,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// Shared across sessions; safe for concurrent use.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<VisionResult> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, result: VisionResult) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                hits: 0,
                inserted_at: Utc::now(),
            },
        );
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn stats(&self) -> CacheStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        CacheStats {
            requests,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            hit_rate: if requests == 0 {
                0.0
            } else {
                hits as f64 / requests as f64
            },
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serves repeated queries from a [`ResponseCache`]. Only successful
/// answers are stored; unavailability and cancellation always go back to
/// the inner locator next time.
pub struct CachedVisionLocator {
    inner: Arc<dyn VisionLocator>,
    cache: Arc<ResponseCache>,
}

impl CachedVisionLocator {
    pub fn new(inner: Arc<dyn VisionLocator>, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl VisionLocator for CachedVisionLocator {
    async fn locate(
        &self,
        query: &VisionQuery,
        cancel: &CancellationToken,
    ) -> Result<VisionResult, VisionError> {
        let key = fingerprint(query);
        if let Some(result) = self.cache.get(&key) {
            debug!(key = %key, "vision cache hit");
            return Ok(result);
        }
        let result = self.inner.locate(query, cancel).await?;
        debug!(key = %key, found = result.found, "vision result cached");
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relocator_core_types::{Point, Screenshot, Viewport};
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        calls: AtomicUsize,
        answer: Result<VisionResult, VisionError>,
    }

    #[async_trait]
    impl VisionLocator for Scripted {
        async fn locate(
            &self,
            _query: &VisionQuery,
            _cancel: &CancellationToken,
        ) -> Result<VisionResult, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn query(bytes: &[u8]) -> VisionQuery {
        VisionQuery::new(
            "Search button",
            Screenshot::new(bytes.to_vec(), 1920, 1080),
            Viewport::new(1920, 1080),
        )
    }

    fn found() -> VisionResult {
        VisionResult {
            found: true,
            coordinates: Some(Point::new(1625.0, 14.0)),
            confidence: 0.92,
            ..VisionResult::not_found("")
        }
    }

    #[tokio::test]
    async fn second_identical_query_is_served_from_cache() {
        let inner = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            answer: Ok(found()),
        });
        let cache = Arc::new(ResponseCache::new());
        let locator = CachedVisionLocator::new(inner.clone(), cache.clone());
        let cancel = CancellationToken::new();

        let first = locator.locate(&query(b"page"), &cancel).await.unwrap();
        let second = locator.locate(&query(b"page"), &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        locator.locate(&query(b"changed"), &cancel).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let stats = cache.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 2);
        assert!((stats.hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(cache.entry(&fingerprint(&query(b"page"))).unwrap().hits, 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = Arc::new(ResponseCache::new());
        for error in [
            VisionError::Unavailable("down".into()),
            VisionError::Cancelled,
        ] {
            let inner = Arc::new(Scripted {
                calls: AtomicUsize::new(0),
                answer: Err(error),
            });
            let locator = CachedVisionLocator::new(inner.clone(), cache.clone());
            let cancel = CancellationToken::new();
            assert!(locator.locate(&query(b"page"), &cancel).await.is_err());
            assert!(locator.locate(&query(b"page"), &cancel).await.is_err());
            assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn not_found_answers_are_cached() {
        let inner = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            answer: Ok(VisionResult::not_found("nothing like it")),
        });
        let locator = CachedVisionLocator::new(inner.clone(), Arc::new(ResponseCache::new()));
        let cancel = CancellationToken::new();
        locator.locate(&query(b"page"), &cancel).await.unwrap();
        locator.locate(&query(b"page"), &cancel).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
