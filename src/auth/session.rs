//! Session manager: owns the token pair and the refresh protocol
//!
//! Exactly one session exists per process. Concurrent callers that find
//! the access token expired share a single outstanding refresh via a
//! pending-refresh handle; the handle is cleared only after the refresh
//! settles, so every waiter observes the same outcome and the refresh
//! token is posted to the server exactly once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::auth::claims;
use crate::auth::store::{CredentialStore, StoredSession};
use crate::config::ApiEndpoints;
use crate::errors::AuthError;
use crate::types::UserIdentity;

/// The active token pair plus the decoded identity for the current user
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserIdentity,
}

impl Session {
    fn to_stored(&self) -> StoredSession {
        StoredSession {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            user_id: self.user.user_id,
            username: self.user.username.clone(),
            email: self.user.email.clone(),
            is_data_admin: self.user.is_data_admin,
        }
    }

    fn from_stored(stored: StoredSession) -> Self {
        let user = stored.identity();
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
    user_id: i64,
    username: String,
    email: String,
    #[serde(default)]
    is_data_admin: bool,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Rotation is optional; absent means the prior refresh token stays valid
    #[serde(default)]
    refresh: Option<String>,
}

type PendingRefresh = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

/// Owns the session lifecycle: `Unauthenticated -> login -> Active`,
/// `Active -> refresh failure | logout -> Unauthenticated`,
/// `Active -> refresh success -> Active`.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    endpoints: ApiEndpoints,
    store: CredentialStore,
    session: RwLock<Option<Session>>,
    pending_refresh: Mutex<Option<PendingRefresh>>,
}

impl SessionManager {
    pub fn new(endpoints: ApiEndpoints, store: CredentialStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                endpoints,
                store,
                session: RwLock::new(None),
                pending_refresh: Mutex::new(None),
            }),
        })
    }

    /// Load a persisted session from the credential store, if any.
    pub async fn restore(&self) -> Result<Option<UserIdentity>> {
        let Some(stored) = self.inner.store.load()? else {
            return Ok(None);
        };
        let session = Session::from_stored(stored);
        let user = session.user.clone();
        *self.inner.session.write().await = Some(session);
        debug!(username = %user.username, "Restored persisted session");
        Ok(Some(user))
    }

    /// Identity of the current user, if authenticated.
    pub async fn current_user(&self) -> Option<UserIdentity> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.user.clone())
    }

    /// Admin flag derived from the active session's decoded claims.
    /// `false` without a session; an undecodable token is never admin.
    pub async fn is_admin(&self) -> bool {
        let guard = self.inner.session.read().await;
        let Some(session) = guard.as_ref() else {
            return false;
        };
        match claims::decode(&session.access_token) {
            Ok(c) => c.is_data_admin.unwrap_or(session.user.is_data_admin),
            Err(_) => false,
        }
    }

    /// A currently-valid access token, refreshing first when the held one
    /// is expired or undecodable. `None` when unauthenticated.
    ///
    /// Concurrency contract: any number of simultaneous callers racing an
    /// expired token produce exactly one refresh call and share its result.
    pub async fn access_token(&self) -> Result<Option<String>, AuthError> {
        let current = { self.inner.session.read().await.clone() };
        let Some(session) = current else {
            return Ok(None);
        };

        if claims::is_usable(&session.access_token, Utc::now()) {
            return Ok(Some(session.access_token));
        }

        let refreshed = self.refresh().await?;
        Ok(Some(refreshed.access_token))
    }

    /// Post the refresh token to the renewal endpoint and replace the
    /// session wholesale. A rejection clears the session and the
    /// credential store entirely; callers must not retry.
    ///
    /// Concurrent calls coalesce onto one in-flight refresh.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let shared = {
            let mut pending = self.inner.pending_refresh.lock().await;
            if let Some(existing) = pending.as_ref() {
                debug!("Attaching to in-flight refresh");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let fut = async move {
                    let result = Inner::do_refresh(&inner).await;
                    // Clear only after settling; late arrivals that grabbed
                    // the handle first still see this same outcome.
                    *inner.pending_refresh.lock().await = None;
                    result
                }
                .boxed()
                .shared();
                *pending = Some(fut.clone());
                fut
            }
        };

        shared.await
    }

    /// Exchange credentials for a brand-new session. On success the prior
    /// session (if any) is fully replaced; on failure it is untouched.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .inner
            .http
            .post(self.inner.endpoints.login())
            .json(&serde_json::json!({"username": username, "password": password}))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::AuthRejected(rejection_detail(status, &body)));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(format!("login response parse failed: {e}")))?;

        let session = Session {
            access_token: body.access,
            refresh_token: body.refresh,
            user: UserIdentity {
                user_id: body.user_id,
                username: body.username,
                email: body.email,
                is_data_admin: body.is_data_admin,
            },
        };

        *self.inner.session.write().await = Some(session.clone());
        self.inner.persist(&session);

        info!(username = %session.user.username, "Login succeeded");
        Ok(session)
    }

    /// Clear the session and the credential store, then notify the server
    /// best-effort without blocking on the outcome.
    pub async fn logout(&self) {
        let Some(previous) = self.inner.clear_session().await else {
            return;
        };

        info!(username = %previous.user.username, "Logged out");

        let http = self.inner.http.clone();
        let url = self.inner.endpoints.logout();
        tokio::spawn(async move {
            match http
                .post(url)
                .bearer_auth(&previous.access_token)
                .json(&serde_json::json!({"refresh": previous.refresh_token}))
                .send()
                .await
            {
                Ok(response) => debug!(status = %response.status(), "Logout notification sent"),
                Err(e) => debug!("Logout notification failed: {}", e),
            }
        });
    }
}

impl Inner {
    async fn do_refresh(inner: &Arc<Inner>) -> Result<Session, AuthError> {
        let refresh_token = inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or_else(|| AuthError::RefreshInvalid("no active session".to_string()))?;

        debug!("Refreshing access token");

        let response = inner
            .http
            .post(inner.endpoints.refresh())
            .json(&serde_json::json!({"refresh": refresh_token}))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Terminal for the session: drop it and wipe the persisted
            // credential group before anyone else can attach the dead pair.
            inner.clear_session().await;
            warn!(status = %status, "Refresh token rejected, session ended");
            return Err(AuthError::RefreshInvalid(format!(
                "refresh endpoint returned {status}"
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(format!("refresh response parse failed: {e}")))?;

        let mut guard = inner.session.write().await;
        let Some(previous) = guard.as_ref() else {
            return Err(AuthError::RefreshInvalid(
                "session ended during refresh".to_string(),
            ));
        };

        let session = Session {
            access_token: body.access,
            refresh_token: body.refresh.unwrap_or_else(|| previous.refresh_token.clone()),
            user: previous.user.clone(),
        };
        *guard = Some(session.clone());
        drop(guard);

        inner.persist(&session);

        debug!("Access token refreshed");
        Ok(session)
    }

    /// Replace-persist; storage failure keeps the in-memory session alive.
    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(&session.to_stored()) {
            warn!("Failed to persist session: {}", e);
        }
    }

    async fn clear_session(&self) -> Option<Session> {
        let previous = self.session.write().await.take();
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear credential store: {}", e);
        }
        previous
    }
}

fn rejection_detail(status: reqwest::StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: String,
    }
    match serde_json::from_str::<Detail>(body) {
        Ok(d) => d.detail,
        Err(_) => format!("login endpoint returned {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::make_token;
    use futures::future::join_all;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FAR_FUTURE: i64 = 4_102_444_800; // 2100-01-01

    fn test_store(dir: &TempDir) -> CredentialStore {
        CredentialStore::with_passphrase(dir.path().join("session.json.enc"), "test-pass")
    }

    fn manager_for(server_uri: &str, store: CredentialStore) -> SessionManager {
        SessionManager::new(ApiEndpoints::new(server_uri), store).unwrap()
    }

    fn valid_access() -> String {
        make_token(&json!({"user_id": 42, "exp": FAR_FUTURE}))
    }

    fn expired_access() -> String {
        make_token(&json!({"user_id": 42, "exp": 1}))
    }

    fn seeded_store(dir: &TempDir, access: String) -> CredentialStore {
        let store = test_store(dir);
        store
            .save(&StoredSession {
                access_token: access,
                refresh_token: make_token(&json!({"user_id": 42, "exp": FAR_FUTURE, "jti": "r1"})),
                user_id: 42,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                is_data_admin: false,
            })
            .unwrap();
        store
    }

    fn login_body(access: &str) -> serde_json::Value {
        json!({
            "access": access,
            "refresh": "refresh-1",
            "user_id": 42,
            "username": "alice",
            "email": "alice@example.com",
            "is_data_admin": false
        })
    }

    #[tokio::test]
    async fn login_success_activates_and_persists_session() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let access = valid_access();

        Mock::given(method("POST"))
            .and(path("/auth/login/"))
            .and(body_json(json!({"username": "alice", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&access)))
            .expect(1)
            .mount(&server)
            .await;

        let store = test_store(&dir);
        let manager = manager_for(&server.uri(), store.clone());

        let session = manager.login("alice", "pw").await.unwrap();
        assert_eq!(session.access_token, access);
        assert_eq!(session.user.username, "alice");

        // persisted as one group
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.access_token, access);
        assert_eq!(stored.username, "alice");

        assert_eq!(
            manager.access_token().await.unwrap(),
            Some(access)
        );
    }

    #[tokio::test]
    async fn login_failure_leaves_prior_session_untouched() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let access = valid_access();

        Mock::given(method("POST"))
            .and(path("/auth/login/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "No active account found"})),
            )
            .mount(&server)
            .await;

        let store = seeded_store(&dir, access.clone());
        let manager = manager_for(&server.uri(), store.clone());
        manager.restore().await.unwrap();

        let err = manager.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthRejected(ref d) if d.contains("No active account")));

        // prior session still active and persisted
        assert_eq!(manager.access_token().await.unwrap(), Some(access.clone()));
        assert_eq!(store.load().unwrap().unwrap().access_token, access);
    }

    #[tokio::test]
    async fn second_login_fully_replaces_first() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let first = make_token(&json!({"user_id": 42, "exp": FAR_FUTURE, "jti": "a"}));
        let second = make_token(&json!({"user_id": 42, "exp": FAR_FUTURE, "jti": "b"}));

        Mock::given(method("POST"))
            .and(path("/auth/login/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&first)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/login/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": second,
                "refresh": "refresh-2",
                "user_id": 42,
                "username": "alice",
                "email": "alice@example.com",
                "is_data_admin": false
            })))
            .mount(&server)
            .await;

        let store = test_store(&dir);
        let manager = manager_for(&server.uri(), store.clone());

        manager.login("alice", "pw").await.unwrap();
        manager.login("alice", "pw").await.unwrap();

        // no residue of the first pair anywhere
        assert_eq!(manager.access_token().await.unwrap(), Some(second.clone()));
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.access_token, second);
        assert_eq!(stored.refresh_token, "refresh-2");
    }

    #[tokio::test]
    async fn expired_token_triggers_refresh() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let new_access = valid_access();

        Mock::given(method("POST"))
            .and(path("/auth/refresh/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access": new_access})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = seeded_store(&dir, expired_access());
        let old_refresh = store.load().unwrap().unwrap().refresh_token;
        let manager = manager_for(&server.uri(), store.clone());
        manager.restore().await.unwrap();

        let token = manager.access_token().await.unwrap();
        assert_eq!(token, Some(new_access.clone()));

        // no rotation in the response: prior refresh token retained
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.access_token, new_access);
        assert_eq!(stored.refresh_token, old_refresh);
    }

    #[tokio::test]
    async fn refresh_rotates_pair_when_server_sends_replacement() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let new_access = valid_access();

        Mock::given(method("POST"))
            .and(path("/auth/refresh/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": new_access,
                "refresh": "rotated-refresh"
            })))
            .mount(&server)
            .await;

        let store = seeded_store(&dir, expired_access());
        let manager = manager_for(&server.uri(), store.clone());
        manager.restore().await.unwrap();

        let session = manager.refresh().await.unwrap();
        assert_eq!(session.refresh_token, "rotated-refresh");
        assert_eq!(
            store.load().unwrap().unwrap().refresh_token,
            "rotated-refresh"
        );
    }

    #[tokio::test]
    async fn single_flight_refresh_coalesces_concurrent_callers() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let new_access = valid_access();

        // .expect(1) is the property: N callers, one network refresh
        Mock::given(method("POST"))
            .and(path("/auth/refresh/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access": new_access}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = seeded_store(&dir, expired_access());
        let manager = manager_for(&server.uri(), store);
        manager.restore().await.unwrap();

        let callers = (0..8).map(|_| {
            let manager = manager.clone();
            async move { manager.access_token().await }
        });
        let results = join_all(callers).await;

        for result in results {
            assert_eq!(result.unwrap(), Some(new_access.clone()));
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_failed_refresh() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/refresh/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "Token is blacklisted"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = seeded_store(&dir, expired_access());
        let manager = manager_for(&server.uri(), store);
        manager.restore().await.unwrap();

        let callers = (0..4).map(|_| {
            let manager = manager.clone();
            async move { manager.refresh().await }
        });
        let results = join_all(callers).await;

        for result in results {
            assert!(matches!(result.unwrap_err(), AuthError::RefreshInvalid(_)));
        }
    }

    #[tokio::test]
    async fn refresh_rejection_clears_session_and_store() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/refresh/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = seeded_store(&dir, expired_access());
        let manager = manager_for(&server.uri(), store.clone());
        manager.restore().await.unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshInvalid(_)));

        // atomic clear: the whole credential group is gone
        assert!(!store.exists());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(manager.current_user().await, None);
        assert_eq!(manager.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_transport_error_keeps_session() {
        let dir = TempDir::new().unwrap();
        // no server listening on this port
        let store = seeded_store(&dir, expired_access());
        let manager = manager_for("http://127.0.0.1:9", store.clone());
        manager.restore().await.unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));

        // not a rejection: session and credentials survive for a later retry
        assert!(store.exists());
        assert!(manager.current_user().await.is_some());
    }

    #[tokio::test]
    async fn logout_clears_everything_without_blocking() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        // the notification is fire-and-forget; a failing endpoint is fine
        Mock::given(method("POST"))
            .and(path("/auth/logout/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = seeded_store(&dir, valid_access());
        let manager = manager_for(&server.uri(), store.clone());
        manager.restore().await.unwrap();
        assert!(manager.current_user().await.is_some());

        manager.logout().await;

        assert_eq!(manager.current_user().await, None);
        assert!(!store.exists());
        assert_eq!(manager.access_token().await.unwrap(), None);
        assert!(!manager.is_admin().await);
    }

    #[tokio::test]
    async fn is_admin_prefers_token_claims() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store
            .save(&StoredSession {
                access_token: make_token(
                    &json!({"user_id": 1, "exp": FAR_FUTURE, "is_data_admin": true}),
                ),
                refresh_token: "r".to_string(),
                user_id: 1,
                username: "root".to_string(),
                email: "root@example.com".to_string(),
                is_data_admin: false,
            })
            .unwrap();

        let manager = manager_for("http://localhost:0", store);
        manager.restore().await.unwrap();
        assert!(manager.is_admin().await);
    }

    #[tokio::test]
    async fn no_session_means_no_token_and_no_admin() {
        let dir = TempDir::new().unwrap();
        let manager = manager_for("http://localhost:0", test_store(&dir));

        assert_eq!(manager.access_token().await.unwrap(), None);
        assert!(!manager.is_admin().await);
        assert_eq!(manager.current_user().await, None);
    }
}
