use std::sync::Arc;
use std::time::Duration;

use procura_server::{
    Admission, CapabilityCache, DownstreamError, EndpointCapabilities, GatewayError, ThreadLocks,
};
use procura_core::retry::RetryDecision;
use tokio::sync::Mutex;

#[tokio::test]
async fn admission_serves_waiters_in_arrival_order() {
    let admission = Admission::new(1, 10);
    let held = admission.acquire().await.expect("first slot");
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for i in 0..3 {
        let admission = admission.clone();
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let _permit = admission.acquire().await.expect("slot");
            order.lock().await.push(i);
        }));
        // Let the waiter enqueue before the next one.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(admission.waiting(), 3);

    drop(held);
    for waiter in waiters {
        waiter.await.expect("waiter");
    }
    assert_eq!(*order.lock().await, vec![0, 1, 2]);
    assert_eq!(admission.available(), 1);
}

#[tokio::test]
async fn admission_rejects_when_queue_is_full() {
    let admission = Admission::new(1, 1);
    let _held = admission.acquire().await.expect("slot");

    let queued = {
        let admission = admission.clone();
        tokio::spawn(async move { admission.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    let rejected = admission.acquire().await;
    assert!(matches!(rejected, Err(GatewayError::QueueFull { capacity: 1 })));
    queued.abort();
}

#[tokio::test]
async fn cancelled_waiter_leaves_the_queue() {
    let admission = Admission::new(1, 5);
    let held = admission.acquire().await.expect("slot");

    let waiter = {
        let admission = admission.clone();
        tokio::spawn(async move { admission.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(admission.waiting(), 1);

    waiter.abort();
    let _ = waiter.await;
    assert_eq!(admission.waiting(), 0);

    drop(held);
    assert_eq!(admission.available(), 1);
}

#[tokio::test(start_paused = true)]
async fn capability_entries_expire_after_ttl() {
    let cache = CapabilityCache::new(Duration::from_secs(300));
    let streaming = EndpointCapabilities {
        streaming: true,
        traces: true,
    };
    cache.insert("agent", streaming).await;
    assert_eq!(cache.get("agent").await, Some(streaming));

    cache.demote_streaming("agent").await;
    assert_eq!(
        cache.get("agent").await,
        Some(EndpointCapabilities {
            streaming: false,
            traces: true
        })
    );

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(cache.get("agent").await, None);
}

#[tokio::test]
async fn thread_locks_serialize_one_thread_only() {
    let locks = ThreadLocks::default();
    let first = locks.lock("a").await;
    let other = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
    assert!(other.is_ok(), "other threads are not blocked");

    let same = tokio::time::timeout(Duration::from_millis(20), locks.lock("a")).await;
    assert!(same.is_err(), "same thread waits");

    drop(first);
    drop(other);
    assert!(tokio::time::timeout(Duration::from_millis(50), locks.lock("a"))
        .await
        .is_ok());
}

#[test]
fn downstream_errors_classify_for_retry() {
    let status = |status: u16, retry_after: Option<Duration>| DownstreamError::Status {
        status,
        message: String::new(),
        retry_after,
    };
    assert_eq!(status(503, None).classify(), RetryDecision::Retry);
    assert_eq!(status(429, None).classify(), RetryDecision::Retry);
    assert_eq!(
        status(429, Some(Duration::from_secs(2))).classify(),
        RetryDecision::RetryAfter(Duration::from_secs(2))
    );
    assert_eq!(status(404, None).classify(), RetryDecision::Stop);
    assert_eq!(
        DownstreamError::StreamInterrupted("reset".into()).classify(),
        RetryDecision::Retry
    );
    assert_eq!(
        DownstreamError::Malformed("bad json".into()).classify(),
        RetryDecision::Stop
    );
}
