//! HTTP client for the RabbitMQ management plugin.
//!
//! Paths are built segment by segment so vhost, queue and user names are
//! percent-encoded (`/` becomes `%2F`). Credentials are sent with basic auth
//! on every request and never logged.

use std::time::Duration;

use async_trait::async_trait;
use qw_schemas::{BindingSnapshot, QueueDetail, QueueSnapshot};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::{BrokerClient, BrokerError, BrokerUser, Permissions};

/// Connection settings for [`ManagementClient`].
#[derive(Clone)]
pub struct ManagementSettings {
    /// e.g. `http://localhost:15672/api/`
    pub base_url: String,
    /// The vhost whose queues and bindings are monitored.
    pub vhost: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ManagementSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementSettings")
            .field("base_url", &self.base_url)
            .field("vhost", &self.vhost)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// [`BrokerClient`] over the management REST API.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    base: Url,
    vhost: String,
    user: String,
    password: String,
}

/// Append percent-encoded `segments` to `base`.
pub fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, BrokerError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| BrokerError::Config(format!("base url cannot hold a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl ManagementClient {
    pub fn new(settings: ManagementSettings) -> Result<Self, BrokerError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| BrokerError::Config(format!("invalid management url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BrokerError::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base,
            vhost: settings.vhost,
            user: settings.user,
            password: settings.password,
        })
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// Send one request; `Ok(None)` for an empty success body (204 etc).
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let url = endpoint_url(&self.base, segments)?;
        let path = segments.join("/");
        debug!(method = %method, path = %path, "management api request");

        let mut req = self
            .http
            .request(method, url)
            .basic_auth(&self.user, Some(&self.password));
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("{path}: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BrokerError::Transport(format!("{path}: body read failed: {e}")))?;

        if !status.is_success() {
            return Err(BrokerError::Api {
                status: status.as_u16(),
                path,
                message: error_reason(&bytes),
            });
        }

        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, BrokerError> {
        let path = segments.join("/");
        let bytes = self
            .send(Method::GET, segments, None)
            .await?
            .ok_or_else(|| BrokerError::Decode(format!("{path}: empty response body")))?;
        serde_json::from_slice(&bytes).map_err(|e| BrokerError::Decode(format!("{path}: {e}")))
    }
}

/// Pull a human-readable reason out of a management API error body.
fn error_reason(bytes: &[u8]) -> String {
    if let Ok(v) = serde_json::from_slice::<Value>(bytes) {
        if let Some(r) = v.get("reason").and_then(Value::as_str) {
            return r.to_string();
        }
        if let Some(r) = v.get("error").and_then(Value::as_str) {
            return r.to_string();
        }
    }
    String::from_utf8_lossy(bytes).chars().take(200).collect()
}

#[async_trait]
impl BrokerClient for ManagementClient {
    async fn list_queues(&self) -> Result<Vec<QueueSnapshot>, BrokerError> {
        self.get_json(&["queues", &self.vhost]).await
    }

    async fn list_bindings(&self) -> Result<Vec<BindingSnapshot>, BrokerError> {
        let all: Vec<BindingSnapshot> = self.get_json(&["bindings", &self.vhost]).await?;
        Ok(all.into_iter().filter(BindingSnapshot::is_tracked).collect())
    }

    async fn queue_bindings(
        &self,
        vhost: &str,
        queue: &str,
    ) -> Result<Vec<BindingSnapshot>, BrokerError> {
        let all: Vec<BindingSnapshot> = self
            .get_json(&["queues", vhost, queue, "bindings"])
            .await?;
        Ok(all.into_iter().filter(BindingSnapshot::is_tracked).collect())
    }

    async fn get_queue_detail(
        &self,
        vhost: &str,
        queue: &str,
    ) -> Result<QueueDetail, BrokerError> {
        self.get_json(&["queues", vhost, queue]).await
    }

    async fn delete_queue(&self, vhost: &str, queue: &str) -> Result<(), BrokerError> {
        self.send(Method::DELETE, &["queues", vhost, queue], None)
            .await
            .map(|_| ())
    }

    async fn get_account(&self, username: &str) -> Result<Option<BrokerUser>, BrokerError> {
        match self.get_json(&["users", username]).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        tags: &str,
    ) -> Result<(), BrokerError> {
        let body = json!({ "password": password, "tags": tags });
        self.send(Method::PUT, &["users", username], Some(body))
            .await
            .map(|_| ())
    }

    async fn delete_account(&self, username: &str) -> Result<(), BrokerError> {
        self.send(Method::DELETE, &["users", username], None)
            .await
            .map(|_| ())
    }

    async fn set_permissions(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_value(permissions)
            .map_err(|e| BrokerError::Decode(format!("permissions encode failed: {e}")))?;
        self.send(Method::PUT, &["permissions", vhost, username], Some(body))
            .await
            .map(|_| ())
    }
}
