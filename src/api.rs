//! Typed read API over the request gateway
//!
//! The consumer surface a UI would sit on: each query serves a fresh cache
//! hit when one exists and otherwise fetches through the gateway and
//! repopulates the cache. A stale entry never satisfies a read.

use std::sync::Arc;

use tracing::debug;

use crate::errors::ApiError;
use crate::gateway::Gateway;
use crate::sync::cache::{CacheStore, CachedPayload, QueryKey};
use crate::types::{Goal, Investment};

#[derive(Clone)]
pub struct ApiService {
    gateway: Gateway,
    cache: Arc<CacheStore>,
}

impl ApiService {
    pub fn new(gateway: Gateway, cache: Arc<CacheStore>) -> Self {
        Self { gateway, cache }
    }

    /// The user's investment list.
    pub async fn investments(&self) -> Result<Vec<Investment>, ApiError> {
        if let Some(CachedPayload::Investments(list)) = self.cache.fresh(&QueryKey::Investments) {
            debug!("Serving investments from cache");
            return Ok(list);
        }

        let response = self.gateway.get("/investments/").await?;
        let list: Vec<Investment> = response.json().await?;
        self.cache
            .put(QueryKey::Investments, CachedPayload::Investments(list.clone()));
        Ok(list)
    }

    /// The user's goals with server-computed aggregates.
    pub async fn goals(&self) -> Result<Vec<Goal>, ApiError> {
        if let Some(CachedPayload::Goals(list)) = self.cache.fresh(&QueryKey::Goals) {
            debug!("Serving goals from cache");
            return Ok(list);
        }

        let response = self.gateway.get("/goals/").await?;
        let list: Vec<Goal> = response.json().await?;
        self.cache
            .put(QueryKey::Goals, CachedPayload::Goals(list.clone()));
        Ok(list)
    }

    /// Portfolio-level summary across all goals.
    pub async fn overall_stats(&self) -> Result<serde_json::Value, ApiError> {
        if let Some(CachedPayload::OverallStats(stats)) =
            self.cache.fresh(&QueryKey::OverallStats)
        {
            debug!("Serving overall stats from cache");
            return Ok(stats);
        }

        let response = self.gateway.get("/overall-goal-stats/").await?;
        let stats: serde_json::Value = response.json().await?;
        self.cache.put(
            QueryKey::OverallStats,
            CachedPayload::OverallStats(stats.clone()),
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::make_token;
    use crate::auth::{CredentialStore, SessionManager, StoredSession};
    use crate::config::ApiEndpoints;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FAR_FUTURE: i64 = 4_102_444_800;

    async fn service_for(server: &MockServer, dir: &TempDir) -> ApiService {
        let store =
            CredentialStore::with_passphrase(dir.path().join("session.json.enc"), "test-pass");
        store
            .save(&StoredSession {
                access_token: make_token(&json!({"user_id": 42, "exp": FAR_FUTURE})),
                refresh_token: "refresh-1".to_string(),
                user_id: 42,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                is_data_admin: false,
            })
            .unwrap();
        let manager = SessionManager::new(ApiEndpoints::new(&server.uri()), store).unwrap();
        manager.restore().await.unwrap();
        let gateway = Gateway::new(ApiEndpoints::new(&server.uri()), manager).unwrap();
        ApiService::new(gateway, Arc::new(CacheStore::new()))
    }

    fn investment_json(id: i64, asset_id: i64) -> serde_json::Value {
        json!({
            "id": id,
            "goal": 1,
            "asset_id": asset_id,
            "date": "2026-01-15",
            "purchase_price": 20.0,
            "quantity": 10.0,
            "current_price": 20.0,
            "notes": null,
            "total_cost": 200.0,
            "current_value": 200.0,
            "gain_loss": 0.0,
            "roi": 0.0,
            "is_profitable": true
        })
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_the_network() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        // one network fetch serves both reads
        Mock::given(method("GET"))
            .and(path("/investments/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([investment_json(1, 7)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server, &dir).await;
        let first = service.investments().await.unwrap();
        let second = service.investments().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn stale_entry_forces_refetch() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/overall-goal-stats/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"total_invested": 200.0})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let service = service_for(&server, &dir).await;
        service.overall_stats().await.unwrap();

        // a push event invalidates the aggregate; next read refetches
        service.cache.apply_price_update(&crate::sync::cache::PriceUpdate {
            asset_id: 7,
            new_price: rust_decimal_macros::dec!(25.50),
        });
        service.overall_stats().await.unwrap();
    }
}
