//! Integration tests for the Redis strategy. Require a running server.

use std::time::Duration;

use ipc_mutex::{Mutex, MutexError};

/// Redis address from the environment, or the local default.
fn redis_url(resource: &str) -> String {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
    format!("rpm+redis://{host}/{resource}")
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn round_trip() {
    let mut mutex = Mutex::new(&redis_url("redis-round-trip")).unwrap();
    mutex.open().await.unwrap();
    mutex.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    mutex.release().await.unwrap();
    mutex.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn contended_acquire_times_out_then_succeeds() {
    let url = redis_url("redis-contended");
    let mut holder = Mutex::new(&url).unwrap();
    holder.open().await.unwrap();
    holder.acquire().await.unwrap();

    let mut waiter = Mutex::new(&url).unwrap();
    waiter.open().await.unwrap();
    let result = waiter.acquire_timeout(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(MutexError::Timeout(_))));

    holder.release().await.unwrap();
    waiter.acquire_timeout(Duration::from_secs(5)).await.unwrap();

    waiter.close().await.unwrap();
    holder.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn close_while_locked_cleans_up() {
    let url = redis_url("redis-close-locked");
    let mut mutex = Mutex::new(&url).unwrap();
    mutex.open().await.unwrap();
    mutex.acquire().await.unwrap();
    mutex.close().await.unwrap();

    // the key was deleted, not left to expire
    let mut next = Mutex::new(&url).unwrap();
    next.open().await.unwrap();
    next.acquire_timeout(Duration::from_millis(200)).await.unwrap();
    next.close().await.unwrap();
}
