//! keyforge — API credential issuance and idempotent registration.
//!
//! [`generator`] mints a token with its SHA-256 verifier and display prefix;
//! [`registrar`] records the verifier in a [`store::CredentialStore`] so that
//! repeated or concurrent runs leave exactly one row per key.

pub mod config;
pub mod errors;
pub mod export;
pub mod generator;
pub mod models;
pub mod registrar;
pub mod store;

pub use errors::{GenerateError, RegisterError, StoreError};
pub use generator::generate;
pub use models::credential::{CredentialRecord, DisplayPrefix, SecretToken, Verifier};
pub use models::stored::{StoreId, StoredCredential};
pub use registrar::{Outcome, Registrar};
