//! Scripted transport for coordinator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use civitas_client::{Transport, TransportError};
use serde_json::{json, Map, Value};

/// One scripted answer.
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    pub result: Result<Value, TransportError>,
}

impl Step {
    pub fn ok(value: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    pub fn fail(error: TransportError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::fail(TransportError::Status {
            status,
            body: format!("status {}", status),
        })
    }

    pub fn network() -> Self {
        Self::fail(TransportError::Network("connection reset".to_string()))
    }

    /// Never answers within any reasonable test timeout.
    pub fn hang() -> Self {
        Self::ok(Value::Null).after(Duration::from_secs(3600))
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Decrements the in-progress gauge even when the attempt is cancelled.
struct InProgress<'a>(&'a AtomicUsize);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport answering from per-endpoint scripts.
///
/// Steps are consumed in order; the last step repeats. Endpoints without a
/// script answer `{"endpoint": <endpoint>}` after the default delay. Every
/// call is counted, and the peak number of simultaneous calls is tracked.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
    params: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    started: Mutex<Vec<String>>,
    default_delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn script(self, endpoint: &str, steps: Vec<Step>) -> Self {
        lock(&self.scripts).insert(endpoint.to_string(), steps.into());
        self
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        lock(&self.calls).get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Parameter sets sent to `endpoint`, in call order.
    pub fn params_sent(&self, endpoint: &str) -> Vec<Map<String, Value>> {
        lock(&self.params).get(endpoint).cloned().unwrap_or_default()
    }

    /// Endpoints in the order their calls started.
    pub fn started_order(&self) -> Vec<String> {
        lock(&self.started).clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_progress(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn next_step(&self, endpoint: &str) -> Step {
        let mut scripts = lock(&self.scripts);
        match scripts.get_mut(endpoint) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or_else(|| Step::ok(Value::Null)),
            Some(steps) => steps.front().cloned().unwrap_or_else(|| Step::ok(Value::Null)),
            None => Step::ok(json!({ "endpoint": endpoint })).after(self.default_delay),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, endpoint: &str, params: &Map<String, Value>) -> Result<Value, TransportError> {
        *lock(&self.calls).entry(endpoint.to_string()).or_insert(0) += 1;
        lock(&self.params)
            .entry(endpoint.to_string())
            .or_default()
            .push(params.clone());
        lock(&self.started).push(endpoint.to_string());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_progress = InProgress(&self.current);

        let step = self.next_step(endpoint);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_steps_consumed_then_last_repeats() {
        let transport = ScriptedTransport::new().script(
            "/api/a",
            vec![Step::network(), Step::ok(json!(1))],
        );

        assert!(transport.fetch("/api/a", &Map::new()).await.is_err());
        assert_eq!(transport.fetch("/api/a", &Map::new()).await, Ok(json!(1)));
        assert_eq!(transport.fetch("/api/a", &Map::new()).await, Ok(json!(1)));
        assert_eq!(transport.calls("/api/a"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_endpoint_echoes() {
        let transport = ScriptedTransport::new();
        assert_eq!(
            transport.fetch("/api/x", &Map::new()).await,
            Ok(json!({ "endpoint": "/api/x" }))
        );
        assert_eq!(transport.peak_concurrency(), 1);
        assert_eq!(transport.in_progress(), 0);
    }
}
