//! # Syncthing Client
//!
//! [`SyncDaemon`] implementation over the Syncthing REST API.
//!
//! ## Endpoints
//!
//! | Call | Request |
//! |---|---|
//! | rescan folder | `POST {base}/db/scan?folder=..&sub=..` |
//! | rescan path | `POST {base}/system/scan?path=..` |
//! | completion | `GET {base}/db/completion?folder=..[&device=..]` |
//! | system status | `GET {base}/system/status` |
//! | folder status | `GET {base}/db/status?folder=..` |
//!
//! Every request carries `Accept: application/json` and, when configured,
//! `X-API-Key`. Non-2xx answers become [`SyncthingError::Api`] with an
//! operator-facing message; 401/403 add a hint about the API key.

use crate::error::{Result, SyncthingError};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use async_trait::async_trait;
use core_runtime::config::SyncthingConfig;
use core_runtime::logging::redact_if_sensitive;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const UNAUTHORIZED_HINT: &str = "unauthorized. Verify Syncthing API key and ACLs.";

/// Completion percentage reported for a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderCompletion {
    pub folder: String,
    /// Always within `0.0..=100.0`
    pub completion: f64,
}

/// What a rescan request should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RescanTarget {
    /// A configured Syncthing folder, optionally limited to sub-directories
    Folder { folder: String, subdirs: Vec<String> },
    /// A raw filesystem path (legacy setups without a folder id)
    Path(String),
}

impl RescanTarget {
    pub fn folder(folder: impl Into<String>, subdirs: Vec<String>) -> Self {
        RescanTarget::Folder {
            folder: folder.into(),
            subdirs,
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        RescanTarget::Path(path.into())
    }

    /// Choose a target from optional parts; a folder wins over a path.
    ///
    /// # Errors
    ///
    /// [`SyncthingError::InvalidRequest`] when neither is given.
    pub fn from_parts(folder: Option<&str>, subdirs: &[String], path: Option<&str>) -> Result<Self> {
        let folder = folder.map(str::trim).filter(|f| !f.is_empty());
        let path = path.map(str::trim).filter(|p| !p.is_empty());
        match (folder, path) {
            (Some(folder), _) => Ok(Self::folder(folder, subdirs.to_vec())),
            (None, Some(path)) => Ok(Self::path(path)),
            (None, None) => Err(SyncthingError::InvalidRequest(
                "rescan requires either a folder or a path".to_string(),
            )),
        }
    }
}

/// Calls the sync stage makes against the external daemon.
#[async_trait]
pub trait SyncDaemon: Send + Sync {
    async fn trigger_rescan(&self, target: &RescanTarget) -> Result<()>;

    /// Completion of `folder`, optionally scoped to one remote `device`.
    async fn folder_completion(&self, folder: &str, device: Option<&str>)
        -> Result<FolderCompletion>;

    /// Raw system status; empty when the daemon answers with a non-object.
    async fn system_status(&self) -> Result<Map<String, Value>>;

    /// Raw folder status; empty when the daemon answers with a non-object.
    async fn folder_status(&self, folder: &str) -> Result<Map<String, Value>>;
}

/// REST client for a Syncthing instance.
pub struct SyncthingClient {
    base_url: String,
    api_key: Option<String>,
    timeout: Option<Duration>,
    transport: Arc<dyn HttpTransport>,
}

impl SyncthingClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8384/rest`).
    ///
    /// # Errors
    ///
    /// [`SyncthingError::InvalidRequest`] when the URL is empty or malformed.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncthingError::InvalidRequest(
                "Syncthing base URL must be provided".to_string(),
            ));
        }
        Url::parse(&base_url).map_err(|e| {
            SyncthingError::InvalidRequest(format!("Invalid Syncthing URL '{}': {}", base_url, e))
        })?;

        Ok(Self {
            base_url,
            api_key: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            timeout: None,
            transport,
        })
    }

    /// Build a client with the reqwest transport from the `syncthing` section.
    pub fn from_config(config: &SyncthingConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        let client = Self::new(&config.api_url, config.api_key(), Arc::new(transport))?;
        Ok(client.with_timeout(config.request_timeout()))
    }

    /// Per-request timeout attached to every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| {
            SyncthingError::InvalidRequest(format!("Invalid Syncthing endpoint '{}': {}", path, e))
        })?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url.into())
    }

    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<Value>> {
        let url = self.endpoint(path, params)?;
        let mut request = HttpRequest::new(method, url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        debug!(
            method = %method,
            url = %request.url,
            api_key = %redact_if_sensitive("api_key", self.api_key.as_deref().unwrap_or("")),
            "Calling Syncthing"
        );

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(api_error(&response));
        }
        Ok(decode_body(&response.body))
    }
}

/// Operator-facing error for a non-2xx response.
fn api_error(response: &HttpResponse) -> SyncthingError {
    let reason = StatusCode::from_u16(response.status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown");

    let mut details = Vec::new();
    if matches!(response.status, 401 | 403) {
        details.push(UNAUTHORIZED_HINT.to_string());
    }
    let body = String::from_utf8_lossy(&response.body);
    if let Some(first_line) = body.trim().lines().next() {
        details.push(first_line.to_string());
    }

    let mut message = format!("Syncthing request failed ({} {})", response.status, reason);
    if !details.is_empty() {
        message.push_str(" - ");
        message.push_str(&details.join(" "));
    }

    SyncthingError::Api {
        status: response.status,
        message,
    }
}

/// Empty bodies decode to `None`; bodies that are not JSON are kept as text.
fn decode_body(body: &[u8]) -> Option<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(
        serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())),
    )
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reduce a `/db/completion` payload to one percentage in `0..=100`.
///
/// A `completion` object keyed by device yields the minimum over devices
/// (entries may be numbers or objects with their own `completion`). A
/// scalar `completion` is used as-is, then `globalCompletion`. A bare
/// numeric payload is accepted too; anything else counts as 0.
pub fn normalize_completion(payload: &Value) -> f64 {
    let value = match payload {
        Value::Object(map) => {
            let from_completion = match map.get("completion") {
                Some(Value::Object(devices)) => devices
                    .values()
                    .filter_map(|entry| match entry {
                        Value::Object(inner) => inner.get("completion").and_then(as_number),
                        other => as_number(other),
                    })
                    .reduce(f64::min),
                Some(scalar) => as_number(scalar),
                None => None,
            };
            from_completion.or_else(|| {
                ["globalCompletion", "globalcompletion"]
                    .iter()
                    .find_map(|key| map.get(*key))
                    .and_then(as_number)
            })
        }
        other => as_number(other),
    };

    value
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0)
}

fn into_object(payload: Option<Value>) -> Map<String, Value> {
    match payload {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl SyncDaemon for SyncthingClient {
    #[instrument(skip(self))]
    async fn trigger_rescan(&self, target: &RescanTarget) -> Result<()> {
        match target {
            RescanTarget::Folder { folder, subdirs } => {
                let mut params = vec![("folder", folder.as_str())];
                params.extend(subdirs.iter().map(|sub| ("sub", sub.as_str())));
                self.request(HttpMethod::Post, "/db/scan", &params).await?;
            }
            RescanTarget::Path(path) => {
                self.request(HttpMethod::Post, "/system/scan", &[("path", path.as_str())])
                    .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn folder_completion(
        &self,
        folder: &str,
        device: Option<&str>,
    ) -> Result<FolderCompletion> {
        let mut params = vec![("folder", folder)];
        if let Some(device) = device.filter(|d| !d.trim().is_empty()) {
            params.push(("device", device));
        }
        let payload = self
            .request(HttpMethod::Get, "/db/completion", &params)
            .await?
            .unwrap_or(Value::Null);

        Ok(FolderCompletion {
            folder: folder.to_string(),
            completion: normalize_completion(&payload),
        })
    }

    async fn system_status(&self) -> Result<Map<String, Value>> {
        Ok(into_object(
            self.request(HttpMethod::Get, "/system/status", &[]).await?,
        ))
    }

    async fn folder_status(&self, folder: &str) -> Result<Map<String, Value>> {
        Ok(into_object(
            self.request(HttpMethod::Get, "/db/status", &[("folder", folder)])
                .await?,
        ))
    }
}
