//! Request Coordinator
//!
//! Every dashboard data request goes through [`RequestCoordinator::load`]:
//!
//! 1. a fresh client-cache entry answers without touching the network
//! 2. a request already in flight for the same endpoint and parameters is
//!    joined, not repeated
//! 3. at most `max_concurrent` requests execute at once; the rest wait FIFO
//! 4. each attempt is bounded by a timeout; network, timeout and gateway
//!    failures are retried with exponential backoff and jitter
//! 5. on success the value is cached (when a TTL is given); on failure the
//!    caller gets a typed [`LoadError`] or the fallback it supplied
//!
//! Requests are keyed with [`CacheKey`], so parameter order never splits a
//! request in two. Each request runs in its own task: a caller that gives up
//! (drops the future, times out around it) does not stop it, and the request
//! still settles, frees its concurrency slot and removes its in-flight record.
//! The record goes as soon as the request settles, so a failure is never
//! cached. A request keeps its slot across its retries and backoff delays.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use civitas_core::CacheKey;
use civitas_storage::HotCache;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{watch, Semaphore, SemaphorePermit};

use crate::backoff::BackoffPolicy;
use crate::config::ClientConfig;
use crate::error::{LoadError, TransportError};
use crate::transport::{HttpTransport, Transport};

type SharedLoad = Shared<BoxFuture<'static, Result<Value, LoadError>>>;

/// Per-call options. Unset fields fall back to the client configuration.
///
/// Only the caller that starts a request decides its timeout, retries and
/// TTL; callers joining an in-flight request share its outcome. The fallback
/// is always applied per caller.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Query parameters; part of the request key
    pub params: Map<String, Value>,
    /// Returned instead of an error when the load fails
    pub fallback: Option<Value>,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Retries after the first attempt
    pub retries: Option<u32>,
    /// Cache a successful result for this long
    pub ttl: Option<Duration>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// One entry of a [`RequestCoordinator::load_many`] answer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub endpoint: String,
    pub data: Option<Value>,
    pub error: Option<LoadError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Requests holding a slot
    pub active: usize,
    /// Requests waiting for a slot
    pub queued: usize,
    /// Distinct request keys with a pending request
    pub in_flight: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    /// Calls that joined an in-flight request
    pub deduplicated: AtomicU64,
    /// Transport calls made, retries included
    pub attempts: AtomicU64,
    pub retries: AtomicU64,
    pub failures: AtomicU64,
    pub fallbacks: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub deduplicated: u64,
    pub attempts: u64,
    pub retries: u64,
    pub failures: u64,
    pub fallbacks: u64,
}

/// Increments a gauge for as long as it lives.
struct Gauge<'a>(&'a AtomicUsize);

impl<'a> Gauge<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    backoff: BackoffPolicy,
    inflight: Mutex<HashMap<String, SharedLoad>>,
    gate: Semaphore,
    max_concurrent: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
    /// Bumped by `clear_queue`; waiters that saw an older value give up.
    cancel: watch::Sender<u64>,
    cache: HotCache,
    metrics: CoordinatorMetrics,
}

/// Removes the in-flight record when the request task ends, however it ends.
struct InflightRecord<'a> {
    inner: &'a Inner,
    key: &'a str,
}

impl Drop for InflightRecord<'_> {
    fn drop(&mut self) {
        self.inner.inflight().remove(self.key);
    }
}

/// Everything a spawned request needs.
struct Request {
    key: String,
    endpoint: String,
    params: Map<String, Value>,
    timeout: Duration,
    retries: u32,
    ttl: Option<Duration>,
}

/// Plain endpoints keep their path as key; parameterized ones are normalized.
fn request_key(endpoint: &str, params: &Map<String, Value>) -> CacheKey {
    if params.values().all(Value::is_null) {
        CacheKey::endpoint(endpoint)
    } else {
        CacheKey::with_params(endpoint, params)
    }
}

impl Inner {
    fn inflight(&self) -> MutexGuard<'_, HashMap<String, SharedLoad>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `request` in its own task and hand back a shareable handle to it.
    ///
    /// Must be called with the in-flight map locked, so the task cannot
    /// remove its record before the caller has inserted it.
    fn spawn(self: &Arc<Self>, request: Request) -> SharedLoad {
        let endpoint = request.endpoint.clone();
        let task = tokio::spawn(Arc::clone(self).execute(request));
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(LoadError::Interrupted {
                    endpoint,
                    reason: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }

    async fn execute(self: Arc<Self>, request: Request) -> Result<Value, LoadError> {
        let _record = InflightRecord {
            inner: &self,
            key: &request.key,
        };
        let result = self.attempt_all(&request).await;
        match (&result, request.ttl) {
            (Ok(value), Some(ttl)) => self.cache.insert(&request.key, value.clone(), ttl),
            (Err(_), _) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        result
    }

    async fn attempt_all(&self, request: &Request) -> Result<Value, LoadError> {
        let endpoint = request.endpoint.as_str();
        let (timeout, retries) = (request.timeout, request.retries);
        let _permit = self.acquire_slot(endpoint).await?;
        let _active = Gauge::enter(&self.active);

        let mut attempt = 0;
        loop {
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
            let fetch = self.transport.fetch(endpoint, &request.params);
            let outcome = match tokio::time::timeout(timeout, fetch).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::debug!(endpoint, error = %e, "Request rejected, not retrying");
                    return Err(LoadError::Application {
                        endpoint: endpoint.to_string(),
                        error: e,
                    });
                }
                Err(e) => e,
            };

            if attempt >= retries {
                tracing::warn!(endpoint, attempts = attempt + 1, error = %err, "Request failed");
                return Err(LoadError::Exhausted {
                    endpoint: endpoint.to_string(),
                    attempts: attempt + 1,
                    last: err,
                });
            }

            let delay = self.backoff.delay_for(attempt);
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                endpoint,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Wait FIFO for a concurrency slot, unless the queue is cleared first.
    async fn acquire_slot(&self, endpoint: &str) -> Result<SemaphorePermit<'_>, LoadError> {
        let mut cancel_rx = self.cancel.subscribe();
        let seen = *cancel_rx.borrow_and_update();
        let _queued = Gauge::enter(&self.queued);

        tokio::select! {
            biased;

            permit = self.gate.acquire() => permit.map_err(|_| LoadError::Cancelled {
                endpoint: endpoint.to_string(),
            }),

            _ = queue_cleared(&mut cancel_rx, seen) => {
                tracing::debug!(endpoint, "Queued request cancelled");
                Err(LoadError::Cancelled {
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }
}

async fn queue_cleared(rx: &mut watch::Receiver<u64>, seen: u64) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *rx.borrow_and_update() != seen {
            return;
        }
    }
}

/// Deduplicating, concurrency-bounded, retrying request front.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let (cancel, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                backoff: config.backoff(),
                inflight: Mutex::new(HashMap::new()),
                gate: Semaphore::new(max_concurrent),
                max_concurrent,
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                cancel,
                cache: HotCache::new(config.cache_capacity),
                metrics: CoordinatorMetrics::default(),
                config,
            }),
        }
    }

    /// Coordinator over [`HttpTransport`] pointed at `config.base_url`.
    pub fn http(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.base_url.clone())?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Load `endpoint`. See the module docs for the full sequence.
    pub async fn load(&self, endpoint: &str, options: LoadOptions) -> Result<Value, LoadError> {
        let inner = &self.inner;
        inner.metrics.requests.fetch_add(1, Ordering::Relaxed);

        let LoadOptions {
            params,
            fallback,
            timeout,
            retries,
            ttl,
        } = options;
        let key = request_key(endpoint, &params).into_string();

        if let Some(hit) = inner.cache.get(&key) {
            inner.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(endpoint, %key, "Served from client cache");
            return Ok(hit.value);
        }

        let pending = {
            let mut inflight = inner.inflight();
            match inflight.get(&key) {
                Some(pending) => {
                    inner.metrics.deduplicated.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(endpoint, %key, "Joined in-flight request");
                    pending.clone()
                }
                None => {
                    let load = inner.spawn(Request {
                        key: key.clone(),
                        endpoint: endpoint.to_string(),
                        params,
                        timeout: timeout.unwrap_or_else(|| inner.config.timeout_for(endpoint)),
                        retries: retries.unwrap_or(inner.config.max_retries),
                        ttl,
                    });
                    inflight.insert(key, load.clone());
                    load
                }
            }
        };

        match pending.await {
            Ok(value) => Ok(value),
            Err(err) => match fallback {
                Some(fallback) => {
                    inner.metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(endpoint, error = %err, "Request failed, serving fallback");
                    Ok(fallback)
                }
                None => Err(err),
            },
        }
    }

    /// Load several endpoints concurrently. Results keep the input order.
    pub async fn load_many<S: AsRef<str>>(&self, endpoints: &[S], options: LoadOptions) -> Vec<LoadResult> {
        let loads = endpoints.iter().map(|endpoint| {
            let endpoint = endpoint.as_ref();
            let options = options.clone();
            async move {
                let outcome = self.load(endpoint, options).await;
                let (data, error) = match outcome {
                    Ok(value) => (Some(value), None),
                    Err(e) => (None, Some(e)),
                };
                LoadResult {
                    endpoint: endpoint.to_string(),
                    data,
                    error,
                }
            }
        });
        join_all(loads).await
    }

    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            active: self.inner.active.load(Ordering::SeqCst),
            queued: self.inner.queued.load(Ordering::SeqCst),
            in_flight: self.inner.inflight().len(),
            max_concurrent: self.inner.max_concurrent,
        }
    }

    /// Cancel every request still waiting for a slot. Active requests are not
    /// affected. Returns how many were waiting.
    pub fn clear_queue(&self) -> usize {
        let waiting = self.inner.queued.load(Ordering::SeqCst);
        self.inner.cancel.send_modify(|generation| *generation += 1);
        if waiting > 0 {
            tracing::info!(waiting, "Request queue cleared");
        }
        waiting
    }

    /// Drop every cached variant of `endpoint`, with or without parameters.
    pub fn invalidate(&self, endpoint: &str) -> bool {
        let bare = self.inner.cache.remove(endpoint);
        let variants = self.inner.cache.remove_prefix(&format!("{}:", endpoint));
        bare || variants > 0
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn metrics(&self) -> CoordinatorSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("queue", &self.queue_stats())
            .finish_non_exhaustive()
    }
}
