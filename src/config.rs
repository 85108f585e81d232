//! Endpoint configuration for the REST API and the price feed

use serde::{Deserialize, Serialize};

/// Environment variable overriding the REST base URL
pub const API_URL_ENV: &str = "FOLIOSYNC_API_URL";
/// Environment variable overriding the price feed URL
pub const WS_URL_ENV: &str = "FOLIOSYNC_WS_URL";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// REST base URL, e.g. `http://localhost:8000/api`
    pub base_url: String,
    /// Price feed WebSocket URL, e.g. `ws://localhost:8000/ws/prices/`
    pub ws_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            ws_url: "ws://localhost:8000/ws/prices/".to_string(),
        }
    }
}

impl AppConfig {
    /// Build a config from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var(API_URL_ENV).unwrap_or(defaults.base_url),
            ws_url: std::env::var(WS_URL_ENV).unwrap_or(defaults.ws_url),
        }
    }

    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints::new(&self.base_url)
    }
}

/// Resolved REST endpoints
///
/// Every auth endpoint lives under the `/auth/` prefix so the gateway can
/// exempt the whole group from credential attachment and 401 recovery.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub base_url: String,
}

impl ApiEndpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn login(&self) -> String {
        format!("{}/auth/login/", self.base_url)
    }

    pub fn refresh(&self) -> String {
        format!("{}/auth/refresh/", self.base_url)
    }

    pub fn logout(&self) -> String {
        format!("{}/auth/logout/", self.base_url)
    }

    /// Join an API path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Paths exempt from credential attachment and 401-triggered recovery
    pub fn is_auth_path(path: &str) -> bool {
        path.trim_start_matches('/').starts_with("auth/")
    }
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        AppConfig::default().endpoints()
    }
}
