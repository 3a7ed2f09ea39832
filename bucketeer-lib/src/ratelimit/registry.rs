use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, SystemClock};
use crate::ratelimit::{
    Bucket, BucketConfig, BucketKey, BucketStats, BucketStatsMap, Call, GlobalLimiter,
};
use crate::Result;
use crate::transport::Transport;

/// Maps (method, route) keys to [`Bucket`]s and retires buckets that went idle.
///
/// # Architecture
///
/// - Each unique (method, route) pair gets its own bucket with its own loop
/// - Buckets are created lazily on the first call for their key
/// - All buckets share one [`GlobalLimiter`], one transport and one clock
/// - Thread-safe using `DashMap` for concurrent access to buckets
///
/// The registry is cheap to clone; clones share the same buckets.
#[derive(Debug, Clone)]
pub struct BucketRegistry {
    /// Map of keys to buckets, created on-demand
    buckets: Arc<DashMap<BucketKey, Arc<Bucket>>>,

    /// Scheduling configuration handed to every bucket
    config: BucketConfig,

    /// Global throttle shared by all buckets
    global: GlobalLimiter,

    /// Performs the network exchange for every bucket
    transport: Arc<dyn Transport>,

    /// Time source for buckets and the global limiter
    clock: Arc<dyn Clock>,
}

impl BucketRegistry {
    /// Create a registry using the system clock
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(config: BucketConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Create a registry with a custom clock
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn with_clock(
        config: BucketConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buckets: Arc::new(DashMap::new()),
            config,
            global: GlobalLimiter::new(Arc::clone(&clock)),
            transport,
            clock,
        })
    }

    /// Use an existing global limiter, e.g. one shared with another registry.
    ///
    /// Only buckets created afterwards observe the new limiter.
    #[must_use]
    pub fn with_global(mut self, global: GlobalLimiter) -> Self {
        self.global = global;
        self
    }

    /// Queue `call` in the bucket for its (method, route), creating the bucket
    /// if needed.
    ///
    /// The outcome is reported through the call's [`crate::ratelimit::CallHandle`].
    ///
    /// # Panics
    ///
    /// Panics if a new bucket has to be created outside of a tokio runtime.
    pub fn enqueue(&self, call: Call) {
        let key = call.key();
        // The entry stays locked while enqueuing, so the sweeper cannot
        // retire the bucket in between.
        match self.buckets.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closing() {
                    let bucket = self.create_bucket(entry.key().clone());
                    entry.insert(Arc::new(bucket));
                }
                entry.get().enqueue(call);
            }
            Entry::Vacant(entry) => {
                let bucket = self.create_bucket(entry.key().clone());
                entry.insert(Arc::new(bucket)).enqueue(call);
            }
        }
    }

    fn create_bucket(&self, key: BucketKey) -> Bucket {
        Bucket::new(
            key,
            self.config,
            self.global.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
        )
    }

    /// Get the bucket for `key`, if one exists
    #[must_use]
    pub fn bucket(&self, key: &BucketKey) -> Option<Arc<Bucket>> {
        self.buckets.get(key).map(|bucket| Arc::clone(&bucket))
    }

    /// The global limiter shared by all buckets of this registry
    #[must_use]
    pub const fn global(&self) -> &GlobalLimiter {
        &self.global
    }

    /// The scheduling configuration
    #[must_use]
    pub const fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Number of live buckets
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no bucket exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Get statistics for a specific bucket, or empty stats if it does not exist
    #[must_use]
    pub fn bucket_stats(&self, key: &BucketKey) -> BucketStats {
        self.buckets
            .get(key)
            .map(|bucket| bucket.stats())
            .unwrap_or_default()
    }

    /// Get statistics for all live buckets
    #[must_use]
    pub fn all_bucket_stats(&self) -> BucketStatsMap {
        self.buckets
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().stats()))
            .collect()
    }

    /// Close and remove the bucket for `key`.
    ///
    /// Calls already queued in it are closed once its in-flight call, if any,
    /// has resolved. Returns the removed bucket so the caller can await
    /// [`Bucket::closed`].
    pub fn remove(&self, key: &BucketKey) -> Option<Arc<Bucket>> {
        let (_, bucket) = self.buckets.remove(key)?;
        bucket.close();
        Some(bucket)
    }

    /// Retire buckets that are empty and were idle for at least
    /// [`BucketConfig::bucket_idle_timeout`], as well as buckets whose loop has
    /// already exited. Returns the number of retired buckets.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.config.bucket_idle_timeout;

        let keys: Vec<BucketKey> = self.buckets.iter().map(|entry| entry.key().clone()).collect();

        let mut retired = 0;
        for key in keys {
            let removed = self.buckets.remove_if(&key, |_, bucket| {
                bucket.is_disposed() || bucket.is_idle(timeout, now)
            });
            if let Some((key, bucket)) = removed {
                log::debug!("Retiring idle bucket {key}");
                bucket.close();
                retired += 1;
            }
        }
        retired
    }

    /// Spawn a task that runs [`BucketRegistry::sweep_idle`] every
    /// [`BucketConfig::sweep_interval`].
    ///
    /// The task keeps a clone of the registry alive; abort the returned handle
    /// to stop it.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let retired = registry.sweep_idle();
                if retired > 0 {
                    log::debug!("Retired {retired} idle bucket(s)");
                }
            }
        })
    }

    /// Close every bucket and wait until all of them are disposed
    pub async fn close_all(&self) {
        let keys: Vec<BucketKey> = self.buckets.iter().map(|entry| entry.key().clone()).collect();
        let removed: Vec<Arc<Bucket>> = keys.iter().filter_map(|key| self.remove(key)).collect();
        for bucket in removed {
            bucket.closed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Method;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock::TokioClock;
    use crate::ratelimit::RateLimitHeaders;
    use crate::ErrorKind;
    use crate::test_utils::{ANCHOR, FakeTransport};

    fn registry(transport: FakeTransport) -> (BucketRegistry, Arc<FakeTransport>) {
        let clock = Arc::new(TokioClock::anchored_at(ANCHOR));
        let transport = Arc::new(transport.with_clock(clock.clone()));
        let config = BucketConfig {
            bucket_idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            ..BucketConfig::default()
        };
        let registry = BucketRegistry::with_clock(config, transport.clone(), clock).unwrap();
        (registry, transport)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BucketConfig {
            max_call_age: Duration::ZERO,
            ..BucketConfig::default()
        };
        let result = BucketRegistry::new(config, Arc::new(FakeTransport::default()));
        assert!(matches!(result, Err(ErrorKind::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_creation_on_demand() {
        let (registry, _) = registry(FakeTransport::default());
        assert!(registry.is_empty());

        let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(call);
        handle.await.unwrap();

        assert_eq!(registry.len(), 1);
        let key = BucketKey::new(Method::GET, "/gateway");
        let bucket = registry.bucket(&key).unwrap();
        assert_eq!(bucket.key(), &key);
        assert_eq!(registry.bucket_stats(&key).dispatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_reuse() {
        let (registry, _) = registry(FakeTransport::default());

        let (first, first_handle) =
            Call::new(Method::POST, "/channels/1/messages", "/channels/1/messages");
        let (second, second_handle) =
            Call::new(Method::POST, "/channels/1/messages/", "/channels/1/messages");
        registry.enqueue(first);
        registry.enqueue(second);
        first_handle.await.unwrap();
        second_handle.await.unwrap();

        assert_eq!(registry.len(), 1);
        let stats = registry.all_bucket_stats();
        assert_eq!(stats["POST /channels/1/messages"].dispatched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_route_does_not_block_other_routes() {
        let transport = FakeTransport::default().respond_ok(RateLimitHeaders {
            limit: Some(1),
            remaining: Some(0),
            reset: Some(ANCHOR + 600.0),
            global_reset: None,
        });
        let (registry, transport) = registry(transport);

        let (slow, slow_handle) =
            Call::new(Method::POST, "/channels/1/messages", "/channels/1/messages");
        registry.enqueue(slow);
        slow_handle.await.unwrap();

        let (blocked, _blocked_handle) =
            Call::new(Method::POST, "/channels/1/messages", "/channels/1/messages");
        registry.enqueue(blocked);

        let (other, other_handle) = Call::new(Method::GET, "/users/@me", "/users/@me");
        registry.enqueue(other);
        other_handle.await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].endpoint, "/users/@me");
        assert!(sent[1].at - ANCHOR < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_retires_idle_buckets_only() {
        let (registry, _) = registry(FakeTransport::default());

        let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(call);
        handle.await.unwrap();

        assert_eq!(registry.sweep_idle(), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let key = BucketKey::new(Method::GET, "/gateway");
        let bucket = registry.bucket(&key).unwrap();

        assert_eq!(registry.sweep_idle(), 1);
        assert!(registry.is_empty());
        bucket.closed().await;
        assert!(bucket.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task() {
        let (registry, _) = registry(FakeTransport::default());
        let sweeper = registry.spawn_sweeper();

        let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(call);
        handle.await.unwrap();
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(registry.is_empty());
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_bucket_is_replaced() {
        let (registry, transport) = registry(FakeTransport::default());
        let key = BucketKey::new(Method::GET, "/gateway");

        let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(call);
        handle.await.unwrap();

        let old = registry.bucket(&key).unwrap();
        old.close();

        let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(call);
        handle.await.unwrap();

        let new = registry.bucket(&key).unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all() {
        let transport = FakeTransport::default().respond_ok(RateLimitHeaders {
            limit: Some(1),
            remaining: Some(0),
            reset: Some(ANCHOR + 600.0),
            global_reset: None,
        });
        let (registry, _) = registry(transport);

        let (first, first_handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(first);
        first_handle.await.unwrap();

        let (waiting, waiting_handle) = Call::new(Method::GET, "/gateway", "/gateway");
        registry.enqueue(waiting);

        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(matches!(waiting_handle.await, Err(ErrorKind::BucketClosed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_enqueues_share_one_bucket() {
        let transport = Arc::new(FakeTransport::default().with_delay(Duration::from_millis(1)));
        let registry = BucketRegistry::new(BucketConfig::default(), transport.clone()).unwrap();

        let mut producers = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            producers.push(tokio::spawn(async move {
                let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
                registry.enqueue(call);
                handle.await
            }));
        }
        for producer in producers {
            assert!(producer.await.unwrap().is_ok());
        }

        assert_eq!(registry.len(), 1);
        assert_eq!(transport.sent().len(), 8);
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_racing_sweep_never_loses_calls() {
        let config = BucketConfig {
            bucket_idle_timeout: Duration::from_millis(1),
            ..BucketConfig::default()
        };
        let transport = Arc::new(FakeTransport::default());
        let registry = BucketRegistry::new(config, transport.clone()).unwrap();

        let sweeper = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut retired = 0;
                for _ in 0..200 {
                    retired += registry.sweep_idle();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                retired
            })
        };

        for _ in 0..50 {
            let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
            registry.enqueue(call);
            let outcome = handle.await;
            assert!(outcome.is_ok(), "call lost to sweep: {outcome:?}");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert!(sweeper.await.unwrap() > 0);
        assert_eq!(transport.sent().len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_missing_bucket() {
        let (registry, _) = registry(FakeTransport::default());
        assert!(registry.remove(&BucketKey::new(Method::GET, "/nothing")).is_none());
    }
}
