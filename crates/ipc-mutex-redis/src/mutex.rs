//! Redis mutex strategy.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fred::prelude::*;
use fred::types::{CustomCommand, TlsConfig, TlsConnector, TlsHostMapping};
use ipc_mutex_core::prelude::*;
use rand::Rng;
use tracing::{instrument, Span};

const DEFAULT_PORT: u16 = 6379;
/// Lock TTL when the URL carries no `ttl` parameter.
const DEFAULT_TTL: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Deletes the lock key only if it still carries our holder id.
const RELEASE_SCRIPT_LUA: &str = r#"
    if redis.call('get', KEYS[1]) == ARGV[1] then
        return redis.call('del', KEYS[1])
    end
    return 0
"#;

/// Generates a unique holder id: `{process_id}_{counter}_{random}`.
fn create_holder_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = process::id();
    let mut rng = rand::thread_rng();
    let random: u64 = rng.r#gen();
    format!("{}_{}_{:016x}", pid, counter, random)
}

/// Mutex strategy for the remote-process model over Redis (`rpm+redis:`).
pub struct RedisMutex {
    descriptor: ConnectionDescriptor,
    key: String,
    ttl: Duration,
    lifecycle: Lifecycle,
    client: Option<RedisClient>,
    holder_id: Option<String>,
}

impl RedisMutex {
    /// Creates the strategy from a parsed descriptor. Performs no I/O.
    pub fn new(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            key: format!("{}/IPC-Mutex-rpm", descriptor.resource),
            ttl: descriptor.ttl.unwrap_or(DEFAULT_TTL),
            descriptor: descriptor.clone(),
            lifecycle: Lifecycle::new(),
            client: None,
            holder_id: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn redis_url(&self) -> String {
        let host = self.descriptor.host_or("localhost");
        let port = self.descriptor.port_or(DEFAULT_PORT);
        match &self.descriptor.password {
            Some(password) => format!("redis://:{password}@{host}:{port}"),
            None => format!("redis://{host}:{port}"),
        }
    }

    fn client(&self) -> MutexResult<&RedisClient> {
        self.client.as_ref().ok_or(MutexError::NotOpened)
    }

    /// Builds the TLS layer from the certificate material in the URL.
    fn tls_config(tls: &TlsMaterial) -> MutexResult<TlsConfig> {
        let mut builder = native_tls::TlsConnector::builder();
        match &tls.ca {
            Some(ca) => {
                let pem = std::fs::read(ca).map_err(|e| MutexError::Connection(e.into()))?;
                let cert = native_tls::Certificate::from_pem(&pem)
                    .map_err(|e| MutexError::Connection(e.into()))?;
                builder.add_root_certificate(cert);
            }
            // without a CA the peer cannot be verified
            None => {
                builder.danger_accept_invalid_certs(true);
            }
        }
        if let (Some(crt), Some(key)) = (&tls.crt, &tls.key) {
            let crt_pem = std::fs::read(crt).map_err(|e| MutexError::Connection(e.into()))?;
            let key_pem = std::fs::read(key).map_err(|e| MutexError::Connection(e.into()))?;
            let identity = native_tls::Identity::from_pkcs8(&crt_pem, &key_pem)
                .map_err(|e| MutexError::Connection(e.into()))?;
            builder.identity(identity);
        }
        let connector = builder
            .build()
            .map_err(|e| MutexError::Connection(e.into()))?;
        Ok(TlsConfig {
            connector: TlsConnector::from(tokio_native_tls::TlsConnector::from(connector)),
            hostnames: TlsHostMapping::None,
        })
    }

    /// One `SET NX PX` attempt; `false` means the key is already held.
    async fn try_claim(&self, holder_id: &str) -> MutexResult<bool> {
        let client = self.client()?;
        let expiry_millis = self.ttl.as_millis() as i64;
        let result: Option<String> = client
            .set(
                &self.key,
                holder_id,
                Some(Expiration::PX(expiry_millis)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|e| MutexError::Backend(Box::new(e)))?;
        Ok(result.is_some())
    }
}

impl LockStrategy for RedisMutex {
    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "redis"))]
    async fn open(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_not_opened()?;
        let mut config = RedisConfig::from_url(&self.redis_url())
            .map_err(|e| MutexError::Connection(Box::new(e)))?;
        if self.descriptor.tls.requested() {
            config.tls = Some(Self::tls_config(&self.descriptor.tls)?);
        }
        let client = RedisClient::new(config, None, None, None);
        client.connect();
        client
            .wait_for_connect()
            .await
            .map_err(|e| MutexError::Connection(Box::new(e)))?;
        self.client = Some(client);
        self.lifecycle.set_opened(true);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "redis", timeout = ?timeout, acquired = tracing::field::Empty))]
    async fn acquire(&mut self, timeout: Option<Duration>) -> MutexResult<()> {
        self.lifecycle.ensure_not_locked()?;
        let holder_id = create_holder_id();
        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.try_claim(&holder_id).await? {
                Span::current().record("acquired", true);
                self.holder_id = Some(holder_id);
                self.lifecycle.set_locked(true);
                return Ok(());
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(MutexError::Timeout(limit));
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "redis"))]
    async fn release(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_locked()?;
        let client = self.client()?;
        let holder_id = self.holder_id.clone().unwrap_or_default();
        let args: Vec<RedisValue> = vec![
            RELEASE_SCRIPT_LUA.into(),
            1_i64.into(), // numkeys
            self.key.clone().into(),
            holder_id.into(),
        ];
        let cmd = CustomCommand::new_static("EVAL", None, false);
        // the script returns 0 when the key expired out from under us; the
        // lock still counts as released from the caller's perspective
        let _: i64 = client
            .custom(cmd, args)
            .await
            .map_err(|e| MutexError::Backend(Box::new(e)))?;
        self.holder_id = None;
        self.lifecycle.set_locked(false);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "redis"))]
    async fn close(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_opened()?;
        let mut first_failure = None;
        if self.lifecycle.is_locked() {
            if let Err(e) = self.release().await {
                first_failure = Some(e);
            }
        }
        if let Some(client) = self.client.take() {
            let result = client
                .quit()
                .await
                .map_err(|e| MutexError::Backend(Box::new(e)));
            if let (Err(e), None) = (result, &first_failure) {
                first_failure = Some(e);
            }
        }
        self.lifecycle.set_opened(false);
        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_ids_are_unique() {
        let a = create_holder_id();
        let b = create_holder_id();
        assert_ne!(a, b);
    }

    #[test]
    fn tls_layer_builds_without_certificate_material() {
        let material = TlsMaterial {
            enabled: true,
            ..Default::default()
        };
        assert!(RedisMutex::tls_config(&material).is_ok());
    }

    #[test]
    fn key_includes_resource_prefix() {
        let d = ConnectionDescriptor::parse("rpm+redis://localhost/test").unwrap();
        let m = RedisMutex::new(&d);
        assert_eq!(m.key(), "test/IPC-Mutex-rpm");
    }
}
