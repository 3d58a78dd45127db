//! Consul HTTP API implementation of the [`SessionStore`] seam.

use std::time::Duration;

use ipc_mutex_core::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{KeyState, SessionConfig, SessionStore};

const DEFAULT_PORT: u16 = 8500;
/// Margin added to the long-poll wait before the HTTP request itself is
/// considered stuck.
const READ_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SessionCreateRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "LockDelay")]
    lock_delay: String,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Session")]
    session: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

/// Session/KV client for Consul's HTTP API.
///
/// Built from the connection descriptor at `open()` time; TLS material
/// referenced by the URL is read synchronously during construction. The ACL
/// token travels in the password position of the URL.
pub struct HttpSessionStore {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpSessionStore {
    fn build(descriptor: &ConnectionDescriptor) -> MutexResult<Self> {
        let scheme = if descriptor.tls.requested() {
            "https"
        } else {
            "http"
        };
        let base = format!(
            "{}://{}:{}",
            scheme,
            descriptor.host_or("localhost"),
            descriptor.port_or(DEFAULT_PORT)
        );

        let mut builder = reqwest::Client::builder().connect_timeout(REQUEST_TIMEOUT);
        if descriptor.tls.requested() {
            // without a CA the peer cannot be verified
            builder = builder.danger_accept_invalid_certs(descriptor.tls.ca.is_none());
            if let Some(ca) = &descriptor.tls.ca {
                let pem = std::fs::read(ca).map_err(|e| MutexError::Connection(e.into()))?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| MutexError::Connection(e.into()))?;
                builder = builder.add_root_certificate(cert);
            }
            if let (Some(crt), Some(key)) = (&descriptor.tls.crt, &descriptor.tls.key) {
                let crt_pem = std::fs::read(crt).map_err(|e| MutexError::Connection(e.into()))?;
                let key_pem = std::fs::read(key).map_err(|e| MutexError::Connection(e.into()))?;
                let identity = reqwest::Identity::from_pkcs8_pem(&crt_pem, &key_pem)
                    .map_err(|e| MutexError::Connection(e.into()))?;
                builder = builder.identity(identity);
            }
        }
        let client = builder
            .build()
            .map_err(|e| MutexError::Connection(e.into()))?;

        Ok(Self {
            client,
            base,
            token: descriptor.password.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        request
    }

    async fn expect_success(response: reqwest::Response) -> MutexResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MutexError::Backend(
            format!("consul returned {status}: {body}").into(),
        ))
    }

    /// Consul duration strings: millisecond granularity is enough here.
    fn duration_string(d: Duration) -> String {
        format!("{}ms", d.as_millis())
    }
}

impl SessionStore for HttpSessionStore {
    async fn connect(descriptor: &ConnectionDescriptor) -> MutexResult<Self> {
        Self::build(descriptor)
    }

    async fn create_session(&self, config: &SessionConfig) -> MutexResult<String> {
        let body = SessionCreateRequest {
            name: &config.name,
            behavior: "release",
            ttl: Self::duration_string(config.ttl),
            lock_delay: Self::duration_string(config.lock_delay),
        };
        let response = self
            .request(reqwest::Method::PUT, "/v1/session/create")
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| MutexError::Connection(e.into()))?;
        let created: SessionCreateResponse = Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| MutexError::Backend(e.into()))?;
        debug!(session = %created.id, "session created");
        Ok(created.id)
    }

    async fn renew_session(&self, session: &str) -> MutexResult<()> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/session/renew/{session}"),
            )
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| MutexError::Connection(e.into()))?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn destroy_session(&self, session: &str) -> MutexResult<()> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/session/destroy/{session}"),
            )
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| MutexError::Connection(e.into()))?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn acquire_key(&self, key: &str, value: &str, session: &str) -> MutexResult<bool> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/kv/{key}?acquire={session}"),
            )
            .timeout(REQUEST_TIMEOUT)
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| MutexError::Connection(e.into()))?;
        let body = Self::expect_success(response)
            .await?
            .text()
            .await
            .map_err(|e| MutexError::Backend(e.into()))?;
        Ok(body.trim() == "true")
    }

    async fn release_key(&self, key: &str, value: &str, session: &str) -> MutexResult<bool> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/kv/{key}?release={session}"),
            )
            .timeout(REQUEST_TIMEOUT)
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| MutexError::Connection(e.into()))?;
        let body = Self::expect_success(response)
            .await?
            .text()
            .await
            .map_err(|e| MutexError::Backend(e.into()))?;
        Ok(body.trim() == "true")
    }

    async fn read_key(
        &self,
        key: &str,
        index: Option<u64>,
        wait: Duration,
    ) -> MutexResult<KeyState> {
        let mut path = format!("/v1/kv/{key}?wait={}", Self::duration_string(wait));
        if let Some(index) = index {
            path.push_str(&format!("&index={index}"));
        }
        let response = self
            .request(reqwest::Method::GET, &path)
            .timeout(wait + READ_TIMEOUT_MARGIN)
            .send()
            .await
            .map_err(|e| MutexError::Connection(e.into()))?;

        // the change index travels in a response header either way
        let header_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // key absent: free to claim
            return Ok(KeyState {
                session: None,
                index: header_index.unwrap_or(0),
            });
        }
        let entries: Vec<KvEntry> = Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| MutexError::Backend(e.into()))?;
        match entries.into_iter().next() {
            Some(entry) => Ok(KeyState {
                session: entry.session,
                index: header_index.unwrap_or(entry.modify_index),
            }),
            None => Ok(KeyState {
                session: None,
                index: header_index.unwrap_or(0),
            }),
        }
    }
}
