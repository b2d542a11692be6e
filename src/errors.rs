use thiserror::Error;
use uuid::Uuid;

/// Failures while minting a new credential.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The OS random source could not be read. Issuance is aborted; there is
    /// no fallback to a weaker generator.
    #[error("secure entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failures reported by a `CredentialStore` adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer already holds a row with this verifier.
    #[error("uniqueness conflict on key_hash")]
    UniquenessConflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timed out")]
    Timeout,

    #[error("malformed store response: {0}")]
    Malformed(String),

    /// The connection string or pool settings were rejected before any
    /// connection was attempted.
    #[error("store misconfigured: {0}")]
    Misconfigured(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::UniquenessConflict
            }
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::Configuration(_) => StoreError::Misconfigured(e.to_string()),
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Malformed(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Failures surfaced by the registrar. Every variant names the verifier by
/// its short hint only.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("credential store unavailable (verifier {verifier}): {reason}")]
    StoreUnavailable { verifier: String, reason: String },

    #[error("credential store timed out (verifier {verifier})")]
    StoreTimeout { verifier: String },

    #[error("malformed store response (verifier {verifier}): {reason}")]
    MalformedResponse { verifier: String, reason: String },

    /// A row exists for this verifier but is no longer active.
    #[error("credential {store_id} for verifier {verifier} exists but is inactive")]
    Inactive { verifier: String, store_id: Uuid },

    #[error("invalid registration input: {0}")]
    InvalidInput(String),
}

impl RegisterError {
    /// Whether the caller may retry the same registration later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegisterError::StoreUnavailable { .. } | RegisterError::StoreTimeout { .. }
        )
    }

    /// Classify a store failure for the verifier with hint `verifier`.
    pub fn from_store(verifier: &str, e: StoreError) -> Self {
        let verifier = verifier.to_string();
        match e {
            StoreError::Timeout => RegisterError::StoreTimeout { verifier },
            StoreError::Unavailable(reason) => RegisterError::StoreUnavailable { verifier, reason },
            StoreError::Malformed(reason) => RegisterError::MalformedResponse { verifier, reason },
            StoreError::Misconfigured(reason) => RegisterError::InvalidInput(reason),
            // The registrar absorbs conflicts on insert; one reaching here
            // came from a read, which cannot legitimately conflict.
            StoreError::UniquenessConflict => RegisterError::MalformedResponse {
                verifier,
                reason: "unexpected uniqueness conflict".into(),
            },
        }
    }
}

/// Failures reading or writing the credential export files.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export file error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("export file is not valid credential JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("export file is inconsistent: {0}")]
    Inconsistent(String),
}
