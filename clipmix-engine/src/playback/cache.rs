//! Decoded-asset cache with retry policy
//!
//! # Behavior
//!
//! - Cache-first: a hit returns immediately and clears any stale failure
//!   record for the asset.
//! - One decode per asset at a time: concurrent callers share the in-flight
//!   attempt.
//! - Failures count attempts. Below the cap, an automatic retry is scheduled
//!   after `base * 2^(attempts-1)` (capped); at the cap, implicit loads
//!   fast-fail without touching the loader until [`AssetBufferCache::retry_load`].
//! - While an automatic retry is pending, implicit loads do not start their
//!   own attempt; the timer owns the next one.
//!
//! Attempts run on their own tokio tasks, so a caller dropping its future
//! never leaves bookkeeping half done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use clipmix_common::{AssetId, EngineConfig};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::loader::AssetLoader;
use crate::audio::types::AudioBuffer;
use crate::error::LoadError;
use crate::playback::events::CacheEvent;

type LoadOutcome = Result<Arc<AudioBuffer>, LoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadOutcome>>;

/// Failure bookkeeping for one asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedLoadRecord {
    pub asset_id: AssetId,
    /// Failed attempts since the record was last cleared
    pub attempts: u32,
    pub last_error: LoadError,
    pub last_attempt: DateTime<Utc>,
}

#[derive(Default)]
struct CacheInner {
    buffers: HashMap<AssetId, Arc<AudioBuffer>>,
    in_flight: HashMap<AssetId, SharedLoad>,
    failures: HashMap<AssetId, FailedLoadRecord>,
    retry_timers: HashMap<AssetId, JoinHandle<()>>,
    /// Last URI seen per asset, reused by retries
    uris: HashMap<AssetId, String>,
    /// Bumped on dispose; attempts from an older epoch are discarded
    epoch: u64,
    disposed: bool,
}

/// Asset id → decoded audio, shared by cheap clones
#[derive(Clone)]
pub struct AssetBufferCache {
    inner: Arc<Mutex<CacheInner>>,
    loader: Arc<dyn AssetLoader>,
    config: Arc<EngineConfig>,
    events: Option<UnboundedSender<CacheEvent>>,
}

impl AssetBufferCache {
    pub fn new(loader: Arc<dyn AssetLoader>, config: Arc<EngineConfig>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            loader,
            config,
            events: None,
        }
    }

    /// Reports every load outcome (including timer-driven retries) on `tx`
    pub fn with_events(mut self, tx: UnboundedSender<CacheEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Returns decoded audio for `asset_id`, loading it from `uri` on a miss.
    pub async fn load(&self, asset_id: &str, uri: &str) -> LoadOutcome {
        let pending = {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(LoadError::Disposed);
            }
            inner.uris.insert(asset_id.to_string(), uri.to_string());

            if let Some(buffer) = inner.buffers.get(asset_id).cloned() {
                inner.failures.remove(asset_id);
                return Ok(buffer);
            }

            if let Some(shared) = inner.in_flight.get(asset_id) {
                debug!("Joining in-flight load of {}", asset_id);
                shared.clone()
            } else {
                if let Some(record) = inner.failures.get(asset_id) {
                    if record.attempts >= self.config.max_retry_attempts {
                        return Err(LoadError::RetriesExhausted {
                            asset_id: asset_id.to_string(),
                            attempts: record.attempts,
                        });
                    }
                    if inner.retry_timers.contains_key(asset_id) {
                        return Err(LoadError::RetryPending(asset_id.to_string()));
                    }
                }
                self.start_attempt(&mut inner, asset_id, uri)
            }
        };

        pending.await
    }

    /// Cached buffer, without loading. A hit clears the failure record.
    pub fn get(&self, asset_id: &str) -> Option<Arc<AudioBuffer>> {
        let mut inner = self.lock();
        let buffer = inner.buffers.get(asset_id).cloned()?;
        inner.failures.remove(asset_id);
        Some(buffer)
    }

    /// Clears the failure record and pending retry for `asset_id`, then
    /// forces one fresh attempt. `uri` replaces the last URI seen for the
    /// asset when given.
    ///
    /// An already cached asset is returned as is; an attempt already in
    /// flight is joined rather than duplicated.
    pub async fn retry_load(&self, asset_id: &str, uri: Option<&str>) -> LoadOutcome {
        let pending = {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(LoadError::Disposed);
            }
            if let Some(uri) = uri {
                inner.uris.insert(asset_id.to_string(), uri.to_string());
            }
            let uri = inner
                .uris
                .get(asset_id)
                .cloned()
                .ok_or_else(|| LoadError::UnknownAsset(asset_id.to_string()))?;

            inner.failures.remove(asset_id);
            if let Some(timer) = inner.retry_timers.remove(asset_id) {
                timer.abort();
            }

            if let Some(buffer) = inner.buffers.get(asset_id).cloned() {
                return Ok(buffer);
            }

            info!("Explicit retry of asset {}", asset_id);
            match inner.in_flight.get(asset_id) {
                Some(shared) => shared.clone(),
                None => self.start_attempt(&mut inner, asset_id, &uri),
            }
        };

        pending.await
    }

    /// Spawns one fetch-and-decode attempt and registers it as in flight
    fn start_attempt(&self, inner: &mut CacheInner, asset_id: &str, uri: &str) -> SharedLoad {
        debug!("Loading asset {} from {}", asset_id, uri);
        let attempt = self.loader.load(uri);
        let epoch = inner.epoch;
        let this = self.clone();
        let id = asset_id.to_string();

        let task = tokio::spawn(async move {
            let result = attempt.await.map(Arc::new);
            this.complete(&id, epoch, result)
        });

        let failed_uri = uri.to_string();
        let shared = async move {
            task.await.unwrap_or_else(|e| {
                Err(LoadError::Decode {
                    uri: failed_uri,
                    reason: format!("load task failed: {}", e),
                })
            })
        }
        .boxed()
        .shared();

        inner.in_flight.insert(asset_id.to_string(), shared.clone());
        shared
    }

    /// Records an attempt's outcome. Runs exactly once per attempt.
    fn complete(&self, asset_id: &str, epoch: u64, result: LoadOutcome) -> LoadOutcome {
        let mut inner = self.lock();
        if inner.disposed || inner.epoch != epoch {
            debug!("Discarding load of {} finished after dispose", asset_id);
            return Err(LoadError::Disposed);
        }
        inner.in_flight.remove(asset_id);

        match result {
            Ok(buffer) => {
                inner.buffers.insert(asset_id.to_string(), Arc::clone(&buffer));
                inner.failures.remove(asset_id);
                if let Some(timer) = inner.retry_timers.remove(asset_id) {
                    timer.abort();
                }
                drop(inner);

                debug!(
                    "Asset {} cached ({:.2}s, {} Hz)",
                    asset_id,
                    buffer.duration_secs(),
                    buffer.sample_rate()
                );
                self.emit(CacheEvent::Loaded {
                    asset_id: asset_id.to_string(),
                });
                Ok(buffer)
            }
            Err(error) => {
                if !error.is_attempt_failure() {
                    return Err(error);
                }

                let record = inner
                    .failures
                    .entry(asset_id.to_string())
                    .or_insert_with(|| FailedLoadRecord {
                        asset_id: asset_id.to_string(),
                        attempts: 0,
                        last_error: error.clone(),
                        last_attempt: Utc::now(),
                    });
                record.attempts += 1;
                record.last_error = error.clone();
                record.last_attempt = Utc::now();
                let attempts = record.attempts;

                if attempts < self.config.max_retry_attempts {
                    let delay = self.config.retry_delay(attempts);
                    warn!(
                        "Load of {} failed (attempt {}/{}): {}; retrying in {:?}",
                        asset_id, attempts, self.config.max_retry_attempts, error, delay
                    );
                    self.schedule_retry(&mut inner, asset_id, delay);
                } else {
                    warn!(
                        "Load of {} failed (attempt {}/{}): {}; giving up until retried",
                        asset_id, attempts, self.config.max_retry_attempts, error
                    );
                }
                drop(inner);

                self.emit(CacheEvent::Failed {
                    asset_id: asset_id.to_string(),
                    attempts,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn schedule_retry(&self, inner: &mut CacheInner, asset_id: &str, delay: std::time::Duration) {
        let this = self.clone();
        let id = asset_id.to_string();
        let epoch = inner.epoch;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.run_retry(&id, epoch).await;
        });

        if let Some(previous) = inner.retry_timers.insert(asset_id.to_string(), timer) {
            previous.abort();
        }
    }

    async fn run_retry(&self, asset_id: &str, epoch: u64) {
        let pending = {
            let mut inner = self.lock();
            if inner.disposed || inner.epoch != epoch {
                return;
            }
            // Dropping our own handle does not cancel this task
            inner.retry_timers.remove(asset_id);

            if inner.buffers.contains_key(asset_id) || inner.in_flight.contains_key(asset_id) {
                return;
            }
            let Some(uri) = inner.uris.get(asset_id).cloned() else {
                return;
            };
            debug!("Automatic retry of asset {}", asset_id);
            self.start_attempt(&mut inner, asset_id, &uri)
        };

        let _ = pending.await;
    }

    /// Whether decoding is possible at all
    pub fn is_available(&self) -> bool {
        self.loader.is_available()
    }

    pub fn is_cached(&self, asset_id: &str) -> bool {
        self.lock().buffers.contains_key(asset_id)
    }

    pub fn is_loading(&self, asset_id: &str) -> bool {
        self.lock().in_flight.contains_key(asset_id)
    }

    /// Whether an automatic retry is scheduled for `asset_id`
    pub fn has_pending_retry(&self, asset_id: &str) -> bool {
        self.lock().retry_timers.contains_key(asset_id)
    }

    /// True once implicit loads of `asset_id` fast-fail until an explicit retry
    pub fn retries_exhausted(&self, asset_id: &str) -> bool {
        self.lock()
            .failures
            .get(asset_id)
            .is_some_and(|record| record.attempts >= self.config.max_retry_attempts)
    }

    /// Asset ids currently holding a failure record, sorted
    pub fn failed_assets(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self.lock().failures.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn failure_record(&self, asset_id: &str) -> Option<FailedLoadRecord> {
        self.lock().failures.get(asset_id).cloned()
    }

    /// Cancels every retry timer and drops all cached, in-flight and
    /// failure state. Attempts still running finish into the void.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        inner.epoch += 1;
        for (_, timer) in inner.retry_timers.drain() {
            timer.abort();
        }
        let abandoned = inner.in_flight.len();
        inner.in_flight.clear();
        inner.buffers.clear();
        inner.failures.clear();
        inner.uris.clear();
        debug!("Asset cache disposed ({} loads abandoned)", abandoned);
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails `failures` times, then succeeds
    struct FlakyLoader {
        calls: AtomicU32,
        failures: u32,
    }

    impl AssetLoader for FlakyLoader {
        fn load(&self, uri: &str) -> BoxFuture<'static, Result<AudioBuffer, LoadError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = call < self.failures;
            let uri = uri.to_string();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if fail {
                    Err(LoadError::Fetch {
                        uri,
                        reason: "connection reset".to_string(),
                    })
                } else {
                    Ok(AudioBuffer::silence(100, 48_000))
                }
            }
            .boxed()
        }
    }

    fn cache(failures: u32) -> (AssetBufferCache, Arc<FlakyLoader>) {
        let loader = Arc::new(FlakyLoader {
            calls: AtomicU32::new(0),
            failures,
        });
        let cache = AssetBufferCache::new(loader.clone(), Arc::new(EngineConfig::default()));
        (cache, loader)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_skips_loader() {
        let (cache, loader) = cache(0);
        cache.load("a", "file:///a.wav").await.unwrap();
        cache.load("a", "file:///a.wav").await.unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_retry_recovers() {
        let (cache, loader) = cache(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cache = cache.with_events(tx);

        assert!(cache.load("a", "file:///a.wav").await.is_err());
        assert_eq!(cache.failure_record("a").unwrap().attempts, 1);
        assert!(cache.has_pending_retry("a"));

        // Pending retry owns the next attempt
        assert_eq!(
            cache.load("a", "file:///a.wav").await.unwrap_err(),
            LoadError::RetryPending("a".to_string())
        );
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        // Base delay 1000ms
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);

        assert!(matches!(rx.recv().await, Some(CacheEvent::Failed { attempts: 1, .. })));
        assert_eq!(
            rx.recv().await,
            Some(CacheEvent::Loaded {
                asset_id: "a".to_string()
            })
        );
        assert!(cache.is_cached("a"));
        assert!(cache.failed_assets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_timers() {
        let (cache, loader) = cache(5);
        assert!(cache.load("a", "file:///a.wav").await.is_err());
        assert!(cache.has_pending_retry("a"));

        cache.dispose();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(cache.failed_assets().is_empty());
        assert_eq!(cache.load("a", "file:///a.wav").await.unwrap_err(), LoadError::Disposed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_unknown_asset() {
        let (cache, _) = cache(0);
        assert_eq!(
            cache.retry_load("nope", None).await.unwrap_err(),
            LoadError::UnknownAsset("nope".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_retry_after_cap() {
        let (cache, loader) = cache(3);

        assert!(cache.load("a", "file:///a.wav").await.is_err());
        // Let both automatic retries (1s, then 2s) run and fail
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.failure_record("a").unwrap().attempts, 3);
        assert!(!cache.has_pending_retry("a"));
        assert!(cache.retries_exhausted("a"));

        // Capped: no loader call
        assert!(matches!(
            cache.load("a", "file:///a.wav").await,
            Err(LoadError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 3);

        // Explicit retry makes exactly one attempt, at the new URI
        cache.retry_load("a", Some("file:///moved.wav")).await.unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 4);
        assert!(cache.failed_assets().is_empty());
        assert!(!cache.retries_exhausted("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_of_cached_asset_returns_buffer() {
        let (cache, loader) = cache(0);
        let loaded = cache.load("a", "file:///a.wav").await.unwrap();

        let retried = cache.retry_load("a", None).await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &retried));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(cache.failed_assets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_joins_in_flight_attempt() {
        let (cache, loader) = cache(0);
        let (first, retried) = tokio::join!(cache.load("a", "file:///a.wav"), cache.retry_load("a", None));

        assert!(Arc::ptr_eq(&first.unwrap(), &retried.unwrap()));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }
}
