//! Ordering and exclusivity under concurrent fetches and overlapping batches.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{config_with_staging, scripted_coordinator, staged_count};
use imgembed::SENTINEL_VALUE;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_order_fetches_are_reassembled_by_index() {
    let (config, staging) = config_with_staging();
    let (coordinator, fetcher, calls) =
        scripted_coordinator(&config, Duration::from_millis(1)).await;

    // earlier items finish last
    let sources: Vec<String> = (0..8)
        .map(|i| format!("sleep:{}:item{i}", (8 - i) * 25))
        .collect();
    let results = coordinator.handle_batch(sources.clone()).await.unwrap();

    assert_eq!(results.len(), sources.len());
    for (result, source) in results.iter().zip(&sources) {
        assert!(result.ok, "{:?}", result.error);
        assert_eq!(&result.path, source);
        assert_eq!(result.vec[0], source.len() as f32);
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 8);
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(staged_count(&staging), 0);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_pool_never_exceeds_its_worker_count() {
    let (mut config, _staging) = config_with_staging();
    config.fetch.workers = 2;
    let (coordinator, fetcher, _calls) =
        scripted_coordinator(&config, Duration::from_millis(1)).await;

    let sources: Vec<String> = (0..10).map(|i| format!("sleep:30:item{i}")).collect();
    let results = coordinator.handle_batch(sources).await.unwrap();

    assert!(results.iter().all(|r| r.ok));
    let peak = fetcher.max_active.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_batches_keep_their_own_results() {
    let (mut config, staging) = config_with_staging();
    config.batch.max_concurrent = 4;
    let (coordinator, _fetcher, calls) =
        scripted_coordinator(&config, Duration::from_millis(2)).await;
    let coordinator = Arc::new(coordinator);

    let handles: Vec<_> = (0..4)
        .map(|batch| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let sources: Vec<String> = (0..(3 + batch))
                    .map(|i| format!("sleep:{}:b{batch}-i{i}", (i * 7 + batch * 11) % 40))
                    .collect();
                let results = coordinator.handle_batch(sources.clone()).await.unwrap();
                (sources, results)
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        let (sources, results) = handle.await.unwrap();
        assert_eq!(results.len(), sources.len());
        for (result, source) in results.iter().zip(&sources) {
            assert_eq!(&result.path, source);
            assert!(result.ok, "{:?}", result.error);
            assert_eq!(result.vec[0], source.len() as f32);
        }
        total += sources.len();
    }

    // every model call completed without overlapping another
    assert_eq!(calls.load(Ordering::SeqCst), total);
    assert_eq!(staged_count(&staging), 0);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batches_beyond_the_concurrency_limit_wait_their_turn() {
    let (mut config, _staging) = config_with_staging();
    config.batch.max_concurrent = 1;
    let (coordinator, _fetcher, _calls) =
        scripted_coordinator(&config, Duration::from_millis(1)).await;
    let coordinator = Arc::new(coordinator);
    let started = Instant::now();

    let slow = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .handle_batch(vec!["sleep:200:slow".into()])
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast = coordinator
        .handle_batch(vec!["fast".into()])
        .await
        .unwrap();

    assert!(fast[0].ok);
    // the fast batch could only start once the slow one released its slot
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(slow.await.unwrap()[0].ok);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_timeout_fails_only_the_slow_item() {
    let (mut config, staging) = config_with_staging();
    config.fetch.timeout_secs = 1;
    let (coordinator, _fetcher, _calls) =
        scripted_coordinator(&config, Duration::from_millis(1)).await;

    let results = coordinator
        .handle_batch(vec!["a".into(), "hang:forever".into(), "c".into()])
        .await
        .unwrap();

    assert!(results[0].ok);
    assert!(!results[1].ok);
    assert_eq!(results[1].vec, vec![SENTINEL_VALUE]);
    assert!(results[1].error.as_deref().unwrap().contains("timed out"));
    assert!(results[2].ok);
    assert_eq!(staged_count(&staging), 0);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_fetch_that_writes_late_leaves_nothing_staged() {
    let (mut config, staging) = config_with_staging();
    config.fetch.timeout_secs = 1;
    let (coordinator, _fetcher, _calls) =
        scripted_coordinator(&config, Duration::from_millis(1)).await;

    let results = coordinator
        .handle_batch(vec!["lag:1500:late".into(), "b".into()])
        .await
        .unwrap();
    assert!(!results[0].ok);
    assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    assert!(results[1].ok);

    // the blocking write lands about half a second after the item failed
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(staged_count(&staging), 0);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panics_in_fetcher_or_model_fail_single_items() {
    let (config, staging) = config_with_staging();
    let (coordinator, _fetcher, _calls) =
        scripted_coordinator(&config, Duration::from_millis(1)).await;

    let results = coordinator
        .handle_batch(vec!["panic:fetch".into(), "fine".into(), "boom".into()])
        .await
        .unwrap();
    assert!(!results[0].ok);
    assert!(results[0].error.as_deref().unwrap().contains("panicked"));
    assert!(results[1].ok);
    assert!(!results[2].ok);
    assert!(results[2].error.as_deref().unwrap().contains("panicked"));
    assert_eq!(staged_count(&staging), 0);

    // the worker survived and keeps serving
    let again = coordinator.handle_batch(vec!["after".into()]).await.unwrap();
    assert!(again[0].ok);

    let stats = coordinator.shutdown().await.unwrap();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 2);
}
