//! PostgreSQL mutex strategy.

use std::time::{Duration, Instant};

use ipc_mutex_core::prelude::*;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Row};
use tracing::{instrument, Span};

use crate::key::advisory_key;

const DEFAULT_PORT: u16 = 5432;
/// Maintenance database used when the URL names none; present on every
/// PostgreSQL installation.
const DEFAULT_DATABASE: &str = "template1";
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Mutex strategy for the remote-process model over PostgreSQL
/// (`rpm+pgsql:`).
///
/// Uses `pg_try_advisory_lock` in a backoff loop rather than the blocking
/// `pg_advisory_lock`, so deadline-bounded acquires never leave a query
/// running server-side after cancellation.
pub struct PostgresMutex {
    descriptor: ConnectionDescriptor,
    key: i64,
    lifecycle: Lifecycle,
    connection: Option<PgConnection>,
}

impl PostgresMutex {
    /// Creates the strategy from a parsed descriptor. Performs no I/O.
    pub fn new(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            key: advisory_key(&descriptor.resource),
            descriptor: descriptor.clone(),
            lifecycle: Lifecycle::new(),
            connection: None,
        }
    }

    /// The derived advisory-lock key.
    pub fn advisory_key(&self) -> i64 {
        self.key
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(self.descriptor.host_or("localhost"))
            .port(self.descriptor.port_or(DEFAULT_PORT))
            .database(self.descriptor.database.as_deref().unwrap_or(DEFAULT_DATABASE));
        if let Some(username) = &self.descriptor.username {
            options = options.username(username);
        }
        if let Some(password) = &self.descriptor.password {
            options = options.password(password);
        }
        if self.descriptor.tls.requested() {
            // without a CA the peer cannot be verified
            let mode = if self.descriptor.tls.ca.is_some() {
                PgSslMode::VerifyCa
            } else {
                PgSslMode::Require
            };
            options = options.ssl_mode(mode);
            if let Some(ca) = &self.descriptor.tls.ca {
                options = options.ssl_root_cert(ca);
            }
            if let Some(crt) = &self.descriptor.tls.crt {
                options = options.ssl_client_cert(crt);
            }
            if let Some(key) = &self.descriptor.tls.key {
                options = options.ssl_client_key(key);
            }
        }
        options
    }
}

impl LockStrategy for PostgresMutex {
    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "pgsql"))]
    async fn open(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_not_opened()?;
        let connection = PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| MutexError::Connection(Box::new(e)))?;
        self.connection = Some(connection);
        self.lifecycle.set_opened(true);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "pgsql", key = self.key, timeout = ?timeout, acquired = tracing::field::Empty))]
    async fn acquire(&mut self, timeout: Option<Duration>) -> MutexResult<()> {
        self.lifecycle.ensure_not_locked()?;
        let connection = self.connection.as_mut().ok_or(MutexError::NotOpened)?;
        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let row = sqlx::query("SELECT pg_try_advisory_lock($1)")
                .bind(self.key)
                .fetch_one(&mut *connection)
                .await
                .map_err(|e| MutexError::Backend(Box::new(e)))?;
            let acquired: bool = row.get(0);
            if acquired {
                Span::current().record("acquired", true);
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

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "pgsql", key = self.key))]
    async fn release(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_locked()?;
        let connection = self.connection.as_mut().ok_or(MutexError::NotOpened)?;
        // pg_advisory_unlock returns false if the lock was not held (for
        // instance after a server-side disconnect); releasing stays
        // idempotent from the caller's perspective
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *connection)
            .await
            .map_err(|e| MutexError::Backend(Box::new(e)))?;
        self.lifecycle.set_locked(false);
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %self.descriptor.resource, backend = "pgsql"))]
    async fn close(&mut self) -> MutexResult<()> {
        self.lifecycle.ensure_opened()?;
        let mut first_failure = None;
        if self.lifecycle.is_locked() {
            if let Err(e) = self.release().await {
                first_failure = Some(e);
            }
        }
        if let Some(connection) = self.connection.take() {
            let result = connection
                .close()
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
    fn database_defaults_to_template1() {
        let d = ConnectionDescriptor::parse("rpm+pgsql://localhost/test").unwrap();
        let m = PostgresMutex::new(&d);
        assert_eq!(m.connect_options().get_database(), Some(DEFAULT_DATABASE));
    }

    #[test]
    fn tls_params_select_ssl_mode() {
        let d = ConnectionDescriptor::parse("rpm+pgsql://localhost/test").unwrap();
        let m = PostgresMutex::new(&d);
        assert!(!matches!(
            m.connect_options().get_ssl_mode(),
            PgSslMode::Require | PgSslMode::VerifyCa
        ));

        let d = ConnectionDescriptor::parse("rpm+pgsql://localhost/test?tls").unwrap();
        let m = PostgresMutex::new(&d);
        assert!(matches!(m.connect_options().get_ssl_mode(), PgSslMode::Require));

        let d = ConnectionDescriptor::parse("rpm+pgsql://localhost/test?ca=/etc/ssl/ca.pem").unwrap();
        let m = PostgresMutex::new(&d);
        assert!(matches!(
            m.connect_options().get_ssl_mode(),
            PgSslMode::VerifyCa
        ));
    }

    #[test]
    fn key_is_stable_per_resource() {
        let d = ConnectionDescriptor::parse("rpm+pgsql://localhost/test").unwrap();
        assert_eq!(
            PostgresMutex::new(&d).advisory_key(),
            PostgresMutex::new(&d).advisory_key()
        );
    }
}
