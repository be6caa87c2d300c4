use std::sync::Arc;
use std::time::Duration;

use civitas_client::{
    ClientConfig, LoadError, LoadOptions, QueueStats, RequestCoordinator, TransportError,
};
use civitas_test_utils::{ScriptedTransport, Step};
use futures_util::future::join_all;
use serde_json::json;

fn config(max_concurrent: usize) -> ClientConfig {
    ClientConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_retries(2, 1)
}

fn coordinator(transport: &Arc<ScriptedTransport>, max_concurrent: usize) -> RequestCoordinator {
    RequestCoordinator::new(transport.clone(), config(max_concurrent))
}

fn idle(max_concurrent: usize) -> QueueStats {
    QueueStats {
        active: 0,
        queued: 0,
        in_flight: 0,
        max_concurrent,
    }
}

#[tokio::test]
async fn concurrent_loads_of_one_endpoint_share_a_call() {
    let transport = Arc::new(ScriptedTransport::new().with_default_delay(Duration::from_millis(50)));
    let coordinator = coordinator(&transport, 6);

    let loads = (0..5).map(|_| coordinator.load("/api/summary", LoadOptions::new()));
    let results = join_all(loads).await;

    assert_eq!(transport.calls("/api/summary"), 1);
    for result in results {
        assert_eq!(result, Ok(json!({ "endpoint": "/api/summary" })));
    }
    assert_eq!(coordinator.metrics().deduplicated, 4);
    assert_eq!(coordinator.queue_stats().in_flight, 0);
}

#[tokio::test]
async fn concurrency_bound_holds_and_slots_are_fifo() {
    let transport = Arc::new(ScriptedTransport::new().with_default_delay(Duration::from_millis(40)));
    let coordinator = coordinator(&transport, 2);
    let endpoints = ["/api/a", "/api/b", "/api/c", "/api/d", "/api/e"];

    let results = coordinator.load_many(&endpoints, LoadOptions::new()).await;

    assert!(results.iter().all(|r| r.error.is_none()));
    assert_eq!(transport.peak_concurrency(), 2);
    assert_eq!(transport.started_order(), endpoints.to_vec());
    let stats = coordinator.queue_stats();
    assert_eq!((stats.active, stats.queued), (0, 0));
}

#[tokio::test]
async fn transient_failures_stop_at_retry_ceiling() {
    let transport = Arc::new(ScriptedTransport::new().script("/api/stats", vec![Step::network()]));
    let coordinator = coordinator(&transport, 6);

    let err = coordinator
        .load("/api/stats", LoadOptions::new().with_retries(2))
        .await
        .expect_err("every attempt fails");

    assert_eq!(transport.calls("/api/stats"), 3);
    match err {
        LoadError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, TransportError::Network(_)));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    let metrics = coordinator.metrics();
    assert_eq!((metrics.attempts, metrics.retries, metrics.failures), (3, 2, 1));
}

#[tokio::test]
async fn application_errors_are_not_retried() {
    let transport = Arc::new(ScriptedTransport::new().script("/api/missing", vec![Step::status(404)]));
    let coordinator = coordinator(&transport, 6);

    let err = coordinator
        .load("/api/missing", LoadOptions::new().with_retries(3))
        .await
        .expect_err("404 is final");

    assert_eq!(transport.calls("/api/missing"), 1);
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, LoadError::Application { .. }));
}

#[tokio::test]
async fn gateway_error_then_success_recovers() {
    let transport = Arc::new(
        ScriptedTransport::new().script("/api/sla", vec![Step::status(503), Step::ok(json!([1, 2]))]),
    );
    let coordinator = coordinator(&transport, 6);

    let value = coordinator
        .load("/api/sla", LoadOptions::new())
        .await
        .expect("second attempt should succeed");

    assert_eq!(value, json!([1, 2]));
    assert_eq!(transport.calls("/api/sla"), 2);
}

#[tokio::test]
async fn timed_out_attempts_release_their_slot() {
    let transport = Arc::new(ScriptedTransport::new().script("/api/slow", vec![Step::hang()]));
    let coordinator = coordinator(&transport, 1);

    let err = coordinator
        .load(
            "/api/slow",
            LoadOptions::new()
                .with_timeout(Duration::from_millis(30))
                .with_retries(1),
        )
        .await
        .expect_err("every attempt times out");

    assert!(err.is_timeout());
    assert_eq!(transport.calls("/api/slow"), 2);
    assert_eq!(transport.in_progress(), 0);

    let next = coordinator
        .load("/api/fast", LoadOptions::new())
        .await
        .expect("slot should be free again");
    assert_eq!(next, json!({ "endpoint": "/api/fast" }));
}

#[tokio::test]
async fn ttl_cache_serves_until_expiry() {
    let transport = Arc::new(ScriptedTransport::new());
    let coordinator = coordinator(&transport, 6);
    let options = LoadOptions::new().with_ttl(Duration::from_millis(100));

    coordinator.load("/api/distinct", options.clone()).await.expect("first load");
    coordinator.load("/api/distinct", options.clone()).await.expect("cached load");
    assert_eq!(transport.calls("/api/distinct"), 1);
    assert_eq!(coordinator.metrics().cache_hits, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.load("/api/distinct", options).await.expect("reload after expiry");
    assert_eq!(transport.calls("/api/distinct"), 2);
}

#[tokio::test]
async fn fallback_applies_per_caller_on_shared_failure() {
    let transport = Arc::new(ScriptedTransport::new().script(
        "/api/dashboard-data",
        vec![Step::status(404).after(Duration::from_millis(30))],
    ));
    let coordinator = coordinator(&transport, 6);

    let (with_fallback, without) = tokio::join!(
        coordinator.load(
            "/api/dashboard-data",
            LoadOptions::new().with_fallback(json!({ "rows": [] }))
        ),
        coordinator.load("/api/dashboard-data", LoadOptions::new()),
    );

    assert_eq!(transport.calls("/api/dashboard-data"), 1);
    assert_eq!(with_fallback, Ok(json!({ "rows": [] })));
    assert!(without.is_err());
    assert_eq!(coordinator.metrics().fallbacks, 1);
}

#[tokio::test]
async fn abandoned_load_still_frees_its_slot() {
    let transport = Arc::new(ScriptedTransport::new().script("/api/slow", vec![Step::hang()]));
    let coordinator = coordinator(&transport, 1);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        coordinator.load(
            "/api/slow",
            LoadOptions::new()
                .with_timeout(Duration::from_millis(50))
                .with_retries(0),
        ),
    )
    .await;
    assert!(abandoned.is_err(), "caller gives up before the attempt times out");

    let next = tokio::time::timeout(
        Duration::from_secs(2),
        coordinator.load("/api/fast", LoadOptions::new()),
    )
    .await
    .expect("slot must be released without anyone awaiting the first load")
    .expect("load should succeed");

    assert_eq!(next, json!({ "endpoint": "/api/fast" }));
    assert_eq!(transport.calls("/api/slow"), 1);
    assert_eq!(transport.in_progress(), 0);
    assert_eq!(coordinator.queue_stats(), idle(1));
}

#[tokio::test]
async fn joined_caller_survives_first_caller_going_away() {
    let transport = Arc::new(ScriptedTransport::new().script(
        "/api/summary",
        vec![Step::ok(json!({ "total": 42 })).after(Duration::from_millis(50))],
    ));
    let coordinator = coordinator(&transport, 6);

    let first = tokio::spawn({
        let c = coordinator.clone();
        async move { c.load("/api/summary", LoadOptions::new()).await }
    });
    while coordinator.queue_stats().in_flight == 0 {
        tokio::task::yield_now().await;
    }
    let second = tokio::spawn({
        let c = coordinator.clone();
        async move { c.load("/api/summary", LoadOptions::new()).await }
    });
    while coordinator.metrics().deduplicated == 0 {
        tokio::task::yield_now().await;
    }
    first.abort();

    let value = second.await.expect("task should join");
    assert_eq!(value, Ok(json!({ "total": 42 })));
    assert_eq!(transport.calls("/api/summary"), 1);
    assert_eq!(coordinator.queue_stats(), idle(6));
}

#[tokio::test]
async fn timed_out_retries_end_in_fallback() {
    let transport =
        Arc::new(ScriptedTransport::new().script("/api/dashboard-data", vec![Step::hang()]));
    let coordinator = coordinator(&transport, 2);

    let value = coordinator
        .load(
            "/api/dashboard-data",
            LoadOptions::new()
                .with_timeout(Duration::from_millis(20))
                .with_retries(2)
                .with_fallback(json!({ "rows": [] })),
        )
        .await
        .expect("fallback replaces the timeout");

    assert_eq!(value, json!({ "rows": [] }));
    assert_eq!(transport.calls("/api/dashboard-data"), 3);
    let metrics = coordinator.metrics();
    assert_eq!(
        (metrics.attempts, metrics.retries, metrics.failures, metrics.fallbacks),
        (3, 2, 1, 1)
    );
    assert_eq!(transport.in_progress(), 0);
    assert_eq!(coordinator.queue_stats(), idle(2));
}

#[tokio::test]
async fn parameter_order_does_not_split_requests() {
    let transport = Arc::new(ScriptedTransport::new().with_default_delay(Duration::from_millis(30)));
    let coordinator = coordinator(&transport, 6);
    let forward = LoadOptions::new()
        .with_param("orgao", "SEMSA")
        .with_param("ano", 2024)
        .with_ttl(Duration::from_secs(60));
    let reverse = LoadOptions::new()
        .with_param("ano", 2024)
        .with_param("orgao", "SEMSA")
        .with_ttl(Duration::from_secs(60));

    let (a, b) = tokio::join!(
        coordinator.load("/api/stats", forward.clone()),
        coordinator.load("/api/stats", reverse),
    );

    assert_eq!(a, b);
    assert_eq!(transport.calls("/api/stats"), 1);
    assert_eq!(coordinator.metrics().deduplicated, 1);
    assert_eq!(transport.params_sent("/api/stats")[0]["orgao"], "SEMSA");

    coordinator
        .load("/api/stats", LoadOptions::new().with_param("orgao", "SEMED"))
        .await
        .expect("other parameters load separately");
    assert_eq!(transport.calls("/api/stats"), 2);

    coordinator.load("/api/stats", forward.clone()).await.expect("cached load");
    assert_eq!(transport.calls("/api/stats"), 2);
    assert!(coordinator.invalidate("/api/stats"));
    coordinator.load("/api/stats", forward).await.expect("reload after invalidate");
    assert_eq!(transport.calls("/api/stats"), 3);
}
