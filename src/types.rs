//! Server-shaped payload types
//!
//! All monetary figures are server-computed; the client never derives
//! gain/loss or ROI locally. The one exception is the denormalized
//! `current_value` field, which a push event makes recomputable in place
//! (quantity × new price).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single purchase under a goal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Investment {
    pub id: i64,
    /// Owning goal id
    pub goal: i64,
    /// Instrument this purchase tracks; absent for unlinked legacy rows
    #[serde(default)]
    pub asset_id: Option<i64>,
    pub date: NaiveDate,
    pub purchase_price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
    pub total_cost: Decimal,
    pub current_value: Decimal,
    pub gain_loss: Decimal,
    pub roi: Decimal,
    pub is_profitable: bool,
}

/// An investment goal with its server-computed aggregates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub id: i64,
    pub name: String,
    pub investment_type: String,
    pub target_amount: Decimal,
    pub years_to_invest: u32,
    pub monthly_contribution: Decimal,
    pub created_at: DateTime<Utc>,
    pub total_invested: Decimal,
    #[serde(default)]
    pub current_portfolio_value: Option<Decimal>,
    #[serde(default)]
    pub net_gain_loss: Option<Decimal>,
    #[serde(default)]
    pub portfolio_roi: Option<Decimal>,
}

/// Identity fields returned by the login endpoint and persisted alongside
/// the token pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_data_admin: bool,
}
