//! Process-cluster strategy tests: one primary, forwarded workers.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipc_mutex::{Mutex, MutexError};

#[tokio::test]
async fn worker_forwards_to_primary() {
    let mut primary = Mutex::new("mpm://cluster-basic").unwrap();
    primary.open().await.unwrap();

    let mut worker = Mutex::mpm_worker(
        "mpm://cluster-basic",
        primary.mpm_channel().unwrap().clone(),
    )
    .unwrap();
    worker.open().await.unwrap();

    // primary holds, worker contends
    primary.acquire().await.unwrap();
    let result = worker.acquire_timeout(Duration::from_millis(25)).await;
    assert!(matches!(result, Err(MutexError::Timeout(_))));

    primary.release().await.unwrap();
    worker.acquire_timeout(Duration::from_millis(200)).await.unwrap();
    worker.release().await.unwrap();

    worker.close().await.unwrap();
    primary.close().await.unwrap();
}

#[tokio::test]
async fn channel_is_available_only_while_open() {
    let primary = Mutex::new("mpm://cluster-channel").unwrap();
    assert!(matches!(
        primary.mpm_channel(),
        Err(MutexError::NotOpened)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_mutual_exclusion_counter() {
    let mut primary = Mutex::new("mpm://cluster-counter").unwrap();
    primary.open().await.unwrap();
    let channel = primary.mpm_channel().unwrap().clone();

    let counter = Arc::new(AtomicI32::new(0));
    let mut tasks = Vec::new();
    for _ in 0..6 {
        let counter = counter.clone();
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let mut worker = Mutex::mpm_worker("mpm://cluster-counter", channel).unwrap();
            worker.open().await.unwrap();
            for _ in 0..5 {
                worker.acquire().await.unwrap();
                let inside = counter.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(inside, 1);
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
                worker.release().await.unwrap();
            }
            worker.close().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    primary.close().await.unwrap();
}

#[tokio::test]
async fn primary_close_drops_held_lock() {
    let mut primary = Mutex::new("mpm://cluster-close").unwrap();
    primary.open().await.unwrap();
    primary.acquire().await.unwrap();
    primary.close().await.unwrap();
    assert!(matches!(primary.acquire().await, Err(MutexError::NotOpened)));
}
