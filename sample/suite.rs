//! Contention suite against any backend.
//!
//! Spawns several concurrent callers that open a mutex for the same
//! resource, repeatedly enter a critical section, and verify mutual
//! exclusion with a shared counter:
//!
//! ```text
//! cargo run --example suite -- "spm:test"
//! cargo run --example suite -- "rpm+consul://127.0.0.1:8500/test?ttl=10&lockdelay=1"
//! ```

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipc_mutex::Mutex;

const CALLERS: usize = 4;
const ITERATIONS: usize = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "spm:test".to_string());
    println!("++ START: {url}");

    let counter = Arc::new(AtomicI32::new(0));
    let mut callers = Vec::new();
    for id in 0..CALLERS {
        let url = url.clone();
        let counter = counter.clone();
        callers.push(tokio::spawn(async move {
            let mut mutex = Mutex::new(&url)?;
            mutex.open().await?;
            for i in 0..ITERATIONS {
                mutex.acquire().await?;
                let inside = counter.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(inside, 1, "mutual exclusion violated");
                let work = 1 + (id * 7 + i * 3) % 10;
                println!("++ WORK {id} (#{i}): {work}ms");
                tokio::time::sleep(Duration::from_millis(work as u64)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
                mutex.release().await?;
                tokio::time::sleep(Duration::from_millis(((id + i) % 50) as u64)).await;
            }
            mutex.close().await?;
            println!("++ END {id}");
            Ok::<(), ipc_mutex::MutexError>(())
        }));
    }

    for caller in callers {
        caller.await??;
    }
    println!("++ DONE (counter = {})", counter.load(Ordering::SeqCst));
    Ok(())
}
