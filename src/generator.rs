//! Credential generation.
//!
//! Tokens are `<service_tag>_<64 lowercase hex chars>`, built from 32 bytes
//! of OS randomness. The verifier is SHA-256 over the token's UTF-8 bytes and
//! the display prefix is the first 16 token characters plus `"..."`.

use std::collections::BTreeSet;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::errors::GenerateError;
use crate::models::credential::{CredentialRecord, SecretToken};

/// Random bytes per token (256 bits).
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Issue a new credential using the operating system's CSPRNG.
pub fn generate<I, S>(
    service_tag: &str,
    endpoint: &str,
    capabilities: I,
) -> Result<CredentialRecord, GenerateError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    generate_with(&mut OsRng, service_tag, endpoint, capabilities)
}

/// Same as [`generate`] with an explicit secure RNG.
pub fn generate_with<R, I, S>(
    rng: &mut R,
    service_tag: &str,
    endpoint: &str,
    capabilities: I,
) -> Result<CredentialRecord, GenerateError>
where
    R: RngCore + CryptoRng,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    validate_service_tag(service_tag)?;
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(GenerateError::InvalidInput("endpoint must not be empty".into()));
    }

    let mut bytes = Zeroizing::new([0u8; TOKEN_ENTROPY_BYTES]);
    rng.try_fill_bytes(&mut bytes[..])
        .map_err(|e| GenerateError::EntropySourceUnavailable(e.to_string()))?;

    let mut id_bytes = [0u8; 16];
    rng.try_fill_bytes(&mut id_bytes)
        .map_err(|e| GenerateError::EntropySourceUnavailable(e.to_string()))?;
    let id = uuid::Builder::from_random_bytes(id_bytes).into_uuid();

    let token = SecretToken::new(format!("{}_{}", service_tag, hex::encode(&bytes[..])));
    let verifier = token.verifier();
    let prefix = token.display_prefix();

    let capabilities: BTreeSet<String> = capabilities
        .into_iter()
        .map(Into::into)
        .map(|c: String| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    tracing::debug!(
        credential_id = %id,
        key_prefix = %prefix,
        verifier = verifier.hint(),
        capabilities = capabilities.len(),
        "issued new credential"
    );

    Ok(CredentialRecord {
        id,
        token,
        verifier,
        prefix,
        issued_at: Utc::now(),
        endpoint: endpoint.to_string(),
        capabilities,
    })
}

/// Tag that leads every token, e.g. `svc_live`. Built from service and
/// environment markers.
pub fn service_tag(service: &str, environment: &str) -> String {
    format!("{}_{}", service.trim(), environment.trim())
}

/// Tags, and the service and environment markers they are built from, keep
/// to ASCII letters, digits and `_`.
pub(crate) fn is_tag_safe(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_service_tag(tag: &str) -> Result<(), GenerateError> {
    if tag.trim().is_empty() {
        return Err(GenerateError::InvalidInput("service tag must not be empty".into()));
    }
    if !is_tag_safe(tag) {
        return Err(GenerateError::InvalidInput(format!(
            "service tag '{}' may only contain ASCII letters, digits and '_'",
            tag
        )));
    }
    Ok(())
}
