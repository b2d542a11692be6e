//! Idempotent registration of issued credentials.
//!
//! `register` looks the verifier up, inserts when absent, and treats a
//! uniqueness conflict on insert as "someone else registered it first":
//! the row is re-read and its id returned. The store's unique constraint on
//! `key_hash` is the only concurrency control; there is no client-side lock
//! and no retry loop.

use crate::errors::{RegisterError, StoreError};
use crate::models::credential::{DisplayPrefix, Verifier};
use crate::models::stored::{
    KeyMetadata, NewCredential, StoreId, StoredCredential, DEFAULT_RATE_LIMIT_PER_DAY,
    DEFAULT_RATE_LIMIT_PER_MINUTE,
};
use crate::store::CredentialStore;

/// Arguments for one registration call.
#[derive(Debug, Clone)]
pub struct Registration<'a> {
    pub verifier: &'a Verifier,
    pub prefix: &'a DisplayPrefix,
    pub name: &'a str,
    pub tier: &'a str,
}

/// Result of a successful call, telling callers whether this call created
/// the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(StoreId),
    AlreadyRegistered(StoreId),
}

impl Outcome {
    pub fn store_id(self) -> StoreId {
        match self {
            Outcome::Created(id) | Outcome::AlreadyRegistered(id) => id,
        }
    }
}

pub struct Registrar<S> {
    store: S,
    metadata: KeyMetadata,
}

impl<S: CredentialStore> Registrar<S> {
    pub fn new(store: S, metadata: KeyMetadata) -> Self {
        Self { store, metadata }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ensure exactly one active row exists for `verifier`; return its id.
    pub async fn register(
        &self,
        verifier: &Verifier,
        prefix: &DisplayPrefix,
        name: &str,
        tier: &str,
    ) -> Result<StoreId, RegisterError> {
        let req = Registration {
            verifier,
            prefix,
            name,
            tier,
        };
        self.register_detailed(&req).await.map(Outcome::store_id)
    }

    #[tracing::instrument(
        name = "register_credential",
        skip_all,
        fields(verifier = req.verifier.hint(), key_prefix = %req.prefix)
    )]
    pub async fn register_detailed(&self, req: &Registration<'_>) -> Result<Outcome, RegisterError> {
        validate(req)?;
        let hint = req.verifier.hint();

        if let Some(existing) = self.lookup(req.verifier).await? {
            let id = active_id(req.verifier, existing)?;
            tracing::info!(store_id = %id, "credential already registered");
            return Ok(Outcome::AlreadyRegistered(id));
        }

        let new = NewCredential {
            key_hash: req.verifier.as_hex().to_string(),
            key_prefix: req.prefix.as_str().to_string(),
            name: req.name.trim().to_string(),
            tier: req.tier.trim().to_string(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            rate_limit_per_day: DEFAULT_RATE_LIMIT_PER_DAY,
            metadata: serde_json::to_value(&self.metadata).map_err(|e| {
                RegisterError::InvalidInput(format!("unserialisable metadata: {}", e))
            })?,
        };

        match self.store.insert_credential(&new).await {
            Ok(id) => {
                tracing::info!(store_id = %id, tier = %new.tier, "credential registered");
                Ok(Outcome::Created(id))
            }
            Err(StoreError::UniquenessConflict) => {
                tracing::debug!("insert lost race to concurrent registration, re-reading");
                match self.lookup(req.verifier).await? {
                    Some(existing) => {
                        let id = active_id(req.verifier, existing)?;
                        tracing::info!(store_id = %id, "credential registered concurrently");
                        Ok(Outcome::AlreadyRegistered(id))
                    }
                    None => Err(RegisterError::MalformedResponse {
                        verifier: hint.to_string(),
                        reason: "uniqueness conflict reported but no row found on re-read".into(),
                    }),
                }
            }
            Err(e) => {
                let err = RegisterError::from_store(hint, e);
                tracing::warn!(retryable = err.is_retryable(), "registration failed: {}", err);
                Err(err)
            }
        }
    }

    async fn lookup(&self, verifier: &Verifier) -> Result<Option<StoredCredential>, RegisterError> {
        self.store.find_by_verifier(verifier).await.map_err(|e| {
            let err = RegisterError::from_store(verifier.hint(), e);
            tracing::warn!(retryable = err.is_retryable(), "credential lookup failed: {}", err);
            err
        })
    }
}

fn validate(req: &Registration<'_>) -> Result<(), RegisterError> {
    if req.name.trim().is_empty() {
        return Err(RegisterError::InvalidInput("name must not be empty".into()));
    }
    if req.tier.trim().is_empty() {
        return Err(RegisterError::InvalidInput("tier must not be empty".into()));
    }
    if req.prefix.as_str().trim().is_empty() {
        return Err(RegisterError::InvalidInput("key prefix must not be empty".into()));
    }
    Ok(())
}

/// Inactive rows are never reused or shadowed by a second row.
fn active_id(verifier: &Verifier, row: StoredCredential) -> Result<StoreId, RegisterError> {
    let hint = verifier.hint();
    if !row.key_hash.eq_ignore_ascii_case(verifier.as_hex()) {
        return Err(RegisterError::MalformedResponse {
            verifier: hint.to_string(),
            reason: "store returned a row for a different verifier".into(),
        });
    }
    if !row.is_active {
        tracing::warn!(store_id = %row.id, "credential exists but is inactive");
        return Err(RegisterError::Inactive {
            verifier: hint.to_string(),
            store_id: row.id,
        });
    }
    Ok(row.id)
}
