//! Issued credential types.
//!
//! The plaintext token lives only in [`SecretToken`], which zeroizes its
//! buffer on drop and never prints its contents through `Debug`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Number of token characters kept in the display prefix.
pub const DISPLAY_PREFIX_CHARS: usize = 16;

/// Hex characters of the verifier shown in logs and export files.
pub const VERIFIER_HINT_CHARS: usize = 32;

/// Hex length of a SHA-256 verifier.
pub const VERIFIER_HEX_LEN: usize = 64;

/// Plaintext API token: `<service_tag>_<64 hex chars>`.
pub struct SecretToken(Zeroizing<String>);

impl SecretToken {
    pub(crate) fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Wrap a token read back from an export file.
    pub fn from_plaintext(value: impl Into<String>) -> Self {
        Self::new(value.into())
    }

    /// The plaintext. Callers are responsible for not logging it.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::of(self)
    }

    pub fn display_prefix(&self) -> DisplayPrefix {
        DisplayPrefix::of(self)
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// SHA-256 of the token, lowercase hex. Used as the store lookup key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Verifier(String);

impl Verifier {
    pub fn of(token: &SecretToken) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token.expose().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a stored or exported verifier. Accepts exactly 64 hex chars.
    pub fn parse(hex_str: &str) -> Result<Self, String> {
        let trimmed = hex_str.trim();
        if trimmed.len() != VERIFIER_HEX_LEN {
            return Err(format!(
                "verifier must be {} hex chars, got {}",
                VERIFIER_HEX_LEN,
                trimmed.len()
            ));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("verifier must be hex encoded".into());
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Leading hex characters, safe for logs and error messages.
    pub fn hint(&self) -> &str {
        &self.0[..VERIFIER_HINT_CHARS]
    }

    /// Constant-time check that `token` hashes to this verifier.
    pub fn matches(&self, token: &SecretToken) -> bool {
        let candidate = Verifier::of(token);
        candidate.0.as_bytes().ct_eq(self.0.as_bytes()).into()
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Verifier({}...)", self.hint())
    }
}

impl fmt::Display for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Verifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Verifier::parse(&value)
    }
}

impl From<Verifier> for String {
    fn from(v: Verifier) -> Self {
        v.0
    }
}

/// Leading slice of the token plus `"..."`, for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayPrefix(String);

impl DisplayPrefix {
    pub fn of(token: &SecretToken) -> Self {
        let head: String = token.expose().chars().take(DISPLAY_PREFIX_CHARS).collect();
        Self(format!("{}...", head))
    }

    /// Accept a prefix produced elsewhere. It may not carry more than
    /// `DISPLAY_PREFIX_CHARS` characters of the token.
    pub fn parse(value: &str) -> Result<Self, String> {
        let head = value.strip_suffix("...").unwrap_or(value);
        if head.is_empty() {
            return Err("key prefix must not be empty".into());
        }
        if head.chars().count() > DISPLAY_PREFIX_CHARS {
            return Err(format!(
                "key prefix may expose at most {} token characters",
                DISPLAY_PREFIX_CHARS
            ));
        }
        Ok(Self(format!("{}...", head)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DisplayPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A freshly issued credential. Holds the only copy of the plaintext token.
#[derive(Debug)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub token: SecretToken,
    pub verifier: Verifier,
    pub prefix: DisplayPrefix,
    pub issued_at: DateTime<Utc>,
    pub endpoint: String,
    pub capabilities: BTreeSet<String>,
}
