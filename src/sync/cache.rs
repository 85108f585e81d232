//! Cached view store: the shared map of query results
//!
//! Entries are keyed by logical query identity and carry a freshness flag.
//! Both the request gateway's typed API layer (fetch responses) and the
//! live update channel's apply task (push patches) write here; writes are
//! last-write-wins per key. A push event never merges into an aggregate —
//! dependent aggregates are marked stale so the next read refetches.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Goal, Investment};

/// Logical query identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The user's investment list
    Investments,
    /// The user's goals with server-computed aggregates
    Goals,
    /// Portfolio-level summary across all goals
    OverallStats,
    /// Last pushed price for one instrument
    AssetPrice(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Valid,
    /// No longer trustworthy; the next read must refetch rather than reuse
    Stale,
}

/// Last-known server-shaped payload for a query
#[derive(Debug, Clone)]
pub enum CachedPayload {
    Investments(Vec<Investment>),
    Goals(Vec<Goal>),
    OverallStats(serde_json::Value),
    AssetPrice(Decimal),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: CachedPayload,
    pub freshness: Freshness,
}

/// A price event pushed over the live update channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub asset_id: i64,
    /// Decimal-as-string on the wire
    pub new_price: Decimal,
}

/// Shared mutable cache of query results
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<QueryKey, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly fetched payload, replacing whatever was there.
    pub fn put(&self, key: QueryKey, payload: CachedPayload) {
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                freshness: Freshness::Valid,
            },
        );
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// The payload only when it is still trustworthy.
    pub fn fresh(&self, key: &QueryKey) -> Option<CachedPayload> {
        self.entries.get(key).and_then(|e| match e.freshness {
            Freshness::Valid => Some(e.payload.clone()),
            Freshness::Stale => None,
        })
    }

    /// Force the next read of `key` to refetch.
    pub fn mark_stale(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.freshness = Freshness::Stale;
        }
    }

    /// Drop every entry. Used at teardown and on session end.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Apply a pushed price event: patch every cached investment that
    /// references the instrument, recomputing the denormalized current
    /// value in place, then mark dependent aggregates stale. Returns the
    /// number of investment rows patched.
    pub fn apply_price_update(&self, update: &PriceUpdate) -> usize {
        let mut patched = 0;

        if let Some(mut entry) = self.entries.get_mut(&QueryKey::Investments) {
            if let CachedPayload::Investments(investments) = &mut entry.payload {
                for investment in investments.iter_mut() {
                    if investment.asset_id == Some(update.asset_id) {
                        investment.current_price = Some(update.new_price);
                        investment.current_value = investment.quantity * update.new_price;
                        patched += 1;
                    }
                }
            }
        }

        self.put(
            QueryKey::AssetPrice(update.asset_id),
            CachedPayload::AssetPrice(update.new_price),
        );

        // Aggregates are server-computed; invalidate, never merge.
        self.mark_stale(&QueryKey::Goals);
        self.mark_stale(&QueryKey::OverallStats);

        debug!(
            asset_id = update.asset_id,
            new_price = %update.new_price,
            patched,
            "Applied price update"
        );
        patched
    }
}
