use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::CredentialStore;
use crate::errors::StoreError;
use crate::models::credential::Verifier;
use crate::models::stored::{NewCredential, StoreId, StoredCredential};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a small pool. `acquire_timeout` bounds how long a call waits for
    /// a connection before reporting `StoreError::Timeout`; a refused
    /// connection is `StoreError::Unavailable`.
    pub async fn connect(
        database_url: &str,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if database_url.trim().is_empty() {
            return Err(StoreError::Misconfigured("DATABASE_URL must not be empty".into()));
        }
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_verifier(
        &self,
        verifier: &Verifier,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let row = sqlx::query_as::<_, StoredCredential>(
            r#"SELECT id, key_hash, key_prefix, name, tier, is_active,
                      rate_limit_per_minute, rate_limit_per_day, metadata, created_at
               FROM api_keys WHERE key_hash = $1"#,
        )
        .bind(verifier.as_hex())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert_credential(&self, cred: &NewCredential) -> Result<StoreId, StoreError> {
        // Dropping `tx` before commit rolls back, so a cancelled caller
        // never leaves a half-written row.
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query_scalar::<_, StoreId>(
            r#"INSERT INTO api_keys (key_hash, key_prefix, name, tier, is_active,
                                     rate_limit_per_minute, rate_limit_per_day, metadata)
               VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7)
               RETURNING id"#,
        )
        .bind(&cred.key_hash)
        .bind(&cred.key_prefix)
        .bind(&cred.name)
        .bind(&cred.tier)
        .bind(cred.rate_limit_per_minute)
        .bind(cred.rate_limit_per_day)
        .bind(&cred.metadata)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Malformed("INSERT ... RETURNING id returned no row".into()))?;

        tx.commit().await?;
        Ok(id)
    }
}
