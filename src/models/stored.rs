use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-minute quota written with every new key.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: i32 = 1000;

/// Default per-day quota written with every new key.
pub const DEFAULT_RATE_LIMIT_PER_DAY: i32 = 100_000;

/// Identifier assigned by the credential store.
pub type StoreId = Uuid;

/// A row of the `api_keys` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredCredential {
    pub id: StoreId,
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub tier: String,
    pub is_active: bool,
    pub rate_limit_per_minute: i32,
    pub rate_limit_per_day: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Free-form provenance stored alongside the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub service: String,
    pub purpose: String,
    pub created_by: String,
}

/// Insert payload for a new `api_keys` row. Quotas are fixed defaults.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub tier: String,
    pub rate_limit_per_minute: i32,
    pub rate_limit_per_day: i32,
    pub metadata: serde_json::Value,
}
