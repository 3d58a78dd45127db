//! Integration tests for the PostgreSQL strategy. Require a running server.

use std::time::Duration;

use ipc_mutex::{Mutex, MutexError};

/// PostgreSQL authority from the environment, or the local default.
/// Format: `user:pass@host:port`.
fn postgres_url(resource: &str) -> String {
    let authority =
        std::env::var("POSTGRES_AUTHORITY").unwrap_or_else(|_| "postgres@127.0.0.1:5432".to_string());
    let database = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "postgres".to_string());
    format!("rpm+pgsql://{authority}/{database}/{resource}")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL server running
async fn round_trip() {
    let mut mutex = Mutex::new(&postgres_url("pg-round-trip")).unwrap();
    mutex.open().await.unwrap();
    mutex.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    mutex.release().await.unwrap();
    mutex.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires PostgreSQL server running
async fn advisory_lock_excludes_second_connection() {
    let url = postgres_url("pg-contended");
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
