//! Client for the native process-inspection helper.
//!
//! The helper is a privileged local HTTP service that can see the window
//! server: foreground app, running apps, active browser tab. Every query
//! here is fail-open: if the helper is down, slow, or answers garbage,
//! the caller gets "no evidence", never an error. Meeting detection must
//! degrade, not crash, when the helper is unavailable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// A running or foregrounded application, as reported by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    #[serde(rename = "bundleId")]
    pub bundle_id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

/// Which browser to ask for its active tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Safari,
}

impl Browser {
    fn endpoint(&self) -> &'static str {
        match self {
            Browser::Chrome => "/chrome-tab",
            Browser::Safari => "/safari-tab",
        }
    }
}

/// Process-wide session token published by the helper at startup.
///
/// Write-once-read-many: the first `set` wins, later ones are ignored.
/// Requests made before the token arrives carry the empty token and are
/// rejected by the helper, which is fine since that path is fail-open too.
#[derive(Clone, Default)]
pub struct SessionTokenCell {
    inner: Arc<OnceLock<String>>,
}

impl SessionTokenCell {
    pub fn set(&self, token: String) {
        if self.inner.set(token).is_err() {
            warn!("Inspector session token already set, ignoring replacement");
        } else {
            debug!("Inspector session token installed");
        }
    }

    pub fn get(&self) -> String {
        self.inner.get().cloned().unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// Evidence queries consumed by the presence detector. Implemented by
/// `InspectorClient`; tests script their own evidence behind this seam.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    async fn foreground_app(&self) -> Option<AppIdentity>;
    async fn running_apps(&self) -> Vec<AppIdentity>;
    async fn active_tab_url(&self, browser: Browser) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ForegroundPayload {
    #[serde(rename = "foregroundApp")]
    foreground_app: Option<AppIdentity>,
}

#[derive(Debug, Deserialize)]
struct RunningPayload {
    #[serde(rename = "runningApps", default)]
    running_apps: Vec<AppIdentity>,
}

#[derive(Debug, Deserialize)]
struct ChromeTabPayload {
    #[serde(rename = "chromeTabURL")]
    chrome_tab_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SafariTabPayload {
    #[serde(rename = "safariTabURL")]
    safari_tab_url: Option<String>,
}

/// HTTP facade over the helper.
pub struct InspectorClient {
    http: reqwest::Client,
    base_url: String,
    token: SessionTokenCell,
}

impl InspectorClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        token: SessionTokenCell,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build inspector HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token,
        })
    }

    /// One GET against the helper, unwrapping the `{success, data}`
    /// envelope. Any failure collapses to `None`.
    async fn request<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Option<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint);
        let response = match self
            .http
            .get(&url)
            .header(SESSION_TOKEN_HEADER, self.token.get())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Inspector: {} failed: {}", endpoint, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Inspector: {} returned HTTP {}", endpoint, response.status());
            return None;
        }

        let envelope: Envelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Inspector: {} body malformed: {}", endpoint, e);
                return None;
            }
        };

        if !envelope.success {
            warn!("Inspector: {} answered success=false", endpoint);
            return None;
        }

        match serde_json::from_value(envelope.data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Inspector: {} payload malformed: {}", endpoint, e);
                None
            }
        }
    }

    /// Liveness probe for the helper.
    pub async fn check_status(&self) -> bool {
        let url = format!("{}/status", self.base_url.trim_end_matches('/'));
        match self
            .http
            .get(&url)
            .header(SESSION_TOKEN_HEADER, self.token.get())
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ProcessInspector for InspectorClient {
    async fn foreground_app(&self) -> Option<AppIdentity> {
        self.request::<ForegroundPayload>("/foreground")
            .await
            .and_then(|payload| payload.foreground_app)
    }

    async fn running_apps(&self) -> Vec<AppIdentity> {
        self.request::<RunningPayload>("/running")
            .await
            .map(|payload| payload.running_apps)
            .unwrap_or_default()
    }

    async fn active_tab_url(&self, browser: Browser) -> Option<String> {
        match browser {
            Browser::Chrome => self
                .request::<ChromeTabPayload>(browser.endpoint())
                .await
                .and_then(|payload| payload.chrome_tab_url),
            Browser::Safari => self
                .request::<SafariTabPayload>(browser.endpoint())
                .await
                .and_then(|payload| payload.safari_tab_url),
        }
    }
}
