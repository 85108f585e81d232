//! Request gateway: credential attachment and 401 recovery
//!
//! Every outbound API call goes through here. Before send, a valid access
//! token is fetched from the session manager (which refreshes pre-emptively
//! when the held token is expired) and attached as a Bearer credential.
//! After send, a 401 on a non-auth endpoint triggers one shared refresh and
//! exactly one resend; a second 401 surfaces as `AuthorizationFailure`.
//!
//! Auth endpoints are exempt from both hooks so a failing login or refresh
//! can never recurse into another refresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::config::ApiEndpoints;
use crate::errors::{ApiError, AuthError};

/// Gateway over a shared `reqwest` client
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    http: reqwest::Client,
    endpoints: ApiEndpoints,
    session: SessionManager,
    /// Bumped whenever a refresh rejection ends the session; the
    /// surrounding application watches this to force re-authentication.
    session_ended: watch::Sender<u64>,
}

impl Gateway {
    pub fn new(endpoints: ApiEndpoints, session: SessionManager) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let (session_ended, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(GatewayInner {
                http,
                endpoints,
                session,
                session_ended,
            }),
        })
    }

    /// Observe session-ended signals. The value is a generation counter;
    /// any change means "must re-authenticate".
    pub fn subscribe_session_ended(&self) -> watch::Receiver<u64> {
        self.inner.session_ended.subscribe()
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.execute(Method::GET, path, None).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ApiError> {
        self.execute(Method::POST, path, Some(body)).await
    }

    pub async fn put_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ApiError> {
        self.execute(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.execute(Method::DELETE, path, None).await
    }

    /// Send with pre-send credential attachment and one 401-triggered
    /// refresh-and-resend. The request is described by value so the resend
    /// rebuilds it from scratch rather than replaying a consumed body.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let exempt = ApiEndpoints::is_auth_path(path);

        let response = self.send_once(&method, path, body.as_ref(), exempt).await?;
        if exempt || response.status() != StatusCode::UNAUTHORIZED {
            return ok_or_status(response).await;
        }

        debug!(path, "401 received, refreshing and retrying once");
        if let Err(err) = self.inner.session.refresh().await {
            return Err(self.escalate_auth_error(err, exempt));
        }

        let retry = self.send_once(&method, path, body.as_ref(), exempt).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(path, "401 persisted after refresh, giving up");
            return Err(ApiError::AuthorizationFailure);
        }
        ok_or_status(retry).await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        exempt: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .inner
            .http
            .request(method.clone(), self.inner.endpoints.url(path));

        if !exempt {
            // Re-read session state on every attempt: a logout between
            // attempts must not leave a cleared token attached.
            match self.inner.session.access_token().await {
                Ok(Some(token)) => request = request.bearer_auth(token),
                Ok(None) => {}
                Err(err) => return Err(self.escalate_auth_error(err, exempt)),
            }
        }

        if let Some(json) = body {
            request = request.json(json);
        }

        Ok(request.send().await?)
    }

    fn escalate_auth_error(&self, err: AuthError, exempt: bool) -> ApiError {
        if matches!(err, AuthError::RefreshInvalid(_)) && !exempt {
            self.inner.session_ended.send_modify(|n| *n += 1);
        }
        ApiError::Auth(err)
    }
}

async fn ok_or_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}
