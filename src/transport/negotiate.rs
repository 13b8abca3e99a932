use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{SessionError, SessionResult};

/// A session issued by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedSession {
    /// Opaque identifier issued by the backend
    pub session_id: String,
    /// Absolute ws:// or wss:// endpoint for the realtime transport
    pub websocket_url: String,
}

/// Negotiates new conversation sessions with the backend
#[async_trait::async_trait]
pub trait SessionNegotiator: Send + Sync {
    /// Fails with `SessionNegotiationFailed`
    async fn negotiate(&self, user_id: &str) -> SessionResult<NegotiatedSession>;
}

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    session_id: String,
    websocket_url: String,
}

/// Negotiates over HTTP: `POST {base_url}{start_path}` with `{"user_id"}`
pub struct HttpNegotiator {
    client: reqwest::Client,
    base_url: Url,
    start_url: Url,
}

impl HttpNegotiator {
    pub fn new(base_url: &str, start_path: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid backend base URL")?;
        let start_url = base_url
            .join(start_path)
            .context("Invalid session start path")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            start_url,
        })
    }
}

#[async_trait::async_trait]
impl SessionNegotiator for HttpNegotiator {
    async fn negotiate(&self, user_id: &str) -> SessionResult<NegotiatedSession> {
        info!("Starting conversation session at {}", self.start_url);

        let response = self
            .client
            .post(self.start_url.clone())
            .json(&StartRequest { user_id })
            .send()
            .await
            .map_err(|e| SessionError::SessionNegotiationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Session start rejected with status {}", status);
            return Err(SessionError::SessionNegotiationFailed(format!(
                "backend responded {}",
                status
            )));
        }

        let body: StartResponse = response
            .json()
            .await
            .map_err(|e| SessionError::SessionNegotiationFailed(e.to_string()))?;

        let websocket_url = resolve_endpoint(&self.base_url, &body.websocket_url)?;

        info!("Session started: {}", body.session_id);

        Ok(NegotiatedSession {
            session_id: body.session_id,
            websocket_url,
        })
    }
}

/// Resolve the transport endpoint returned by the backend.
///
/// Absolute ws/wss URLs are used as-is, http/https URLs have their scheme
/// swapped, and relative paths are joined onto the backend base URL.
pub fn resolve_endpoint(base_url: &Url, websocket_url: &str) -> SessionResult<String> {
    let invalid = |reason: String| {
        SessionError::SessionNegotiationFailed(format!(
            "invalid websocket url {:?}: {}",
            websocket_url, reason
        ))
    };

    let mut url = match Url::parse(websocket_url) {
        Ok(url) => url,
        Err(_) => base_url
            .join(websocket_url)
            .map_err(|e| invalid(e.to_string()))?,
    };

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch to {}", scheme)))?;

    Ok(url.to_string())
}
