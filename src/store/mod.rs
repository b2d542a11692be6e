pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::credential::Verifier;
use crate::models::stored::{NewCredential, StoreId, StoredCredential};

/// Abstraction over the shared credential table.
/// Implementations: PgStore (PostgreSQL via sqlx), MemoryStore (in-process).
///
/// `key_hash` must be unique in every implementation; the registrar relies
/// on `insert_credential` reporting `StoreError::UniquenessConflict` when a
/// concurrent writer got there first.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a row by verifier, active or not.
    async fn find_by_verifier(
        &self,
        verifier: &Verifier,
    ) -> Result<Option<StoredCredential>, StoreError>;

    /// Insert a new active row. Either the row is fully committed or nothing
    /// is written.
    async fn insert_credential(&self, cred: &NewCredential) -> Result<StoreId, StoreError>;
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<T> {
    async fn find_by_verifier(
        &self,
        verifier: &Verifier,
    ) -> Result<Option<StoredCredential>, StoreError> {
        (**self).find_by_verifier(verifier).await
    }

    async fn insert_credential(&self, cred: &NewCredential) -> Result<StoreId, StoreError> {
        (**self).insert_credential(cred).await
    }
}
