//! Credential export files.
//!
//! The plaintext token is written exactly once, at generation time, to a JSON
//! file and a matching `.env` file. The JSON carries only a hint of the
//! verifier; `load` recomputes the full verifier from the token and checks it
//! against that hint.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::errors::ExportError;
use crate::models::credential::{CredentialRecord, DisplayPrefix, SecretToken, Verifier};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialExport {
    pub version: String,
    pub service: String,
    pub generated_at: DateTime<Utc>,
    pub api_key_id: Uuid,
    pub api_key: String,
    pub api_key_prefix: String,
    pub api_key_hash_hint: String,
    pub endpoint: String,
    pub capabilities: BTreeSet<String>,
}

impl CredentialExport {
    pub fn from_record(service: &str, record: &CredentialRecord) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            service: service.to_string(),
            generated_at: record.issued_at,
            api_key_id: record.id,
            api_key: record.token.expose().to_string(),
            api_key_prefix: record.prefix.as_str().to_string(),
            api_key_hash_hint: record.verifier.hint().to_string(),
            endpoint: record.endpoint.clone(),
            capabilities: record.capabilities.clone(),
        }
    }
}

/// A credential read back from an export file, ready to register.
#[derive(Debug)]
pub struct LoadedCredential {
    pub id: Uuid,
    pub service: String,
    pub token: SecretToken,
    pub verifier: Verifier,
    pub prefix: DisplayPrefix,
    pub endpoint: String,
}

/// `.env` companion path: same stem, `.env` extension.
pub fn env_path_for(json_path: &Path) -> PathBuf {
    json_path.with_extension("env")
}

/// Write the JSON export and its `.env` companion. Returns the `.env` path.
pub fn write(json_path: &Path, export: &CredentialExport) -> Result<PathBuf, ExportError> {
    let json = serde_json::to_string_pretty(export)?;
    write_file(json_path, json.as_bytes())?;

    let env_path = env_path_for(json_path);
    write_file(&env_path, render_env(export).as_bytes())?;

    tracing::info!(
        path = %json_path.display(),
        env_path = %env_path.display(),
        key_prefix = %export.api_key_prefix,
        "credential export written"
    );
    Ok(env_path)
}

/// Read an export and recompute its verifier.
pub fn load(json_path: &Path) -> Result<LoadedCredential, ExportError> {
    let raw = Zeroizing::new(fs::read_to_string(json_path).map_err(|source| {
        ExportError::Io {
            path: json_path.display().to_string(),
            source,
        }
    })?);
    let export: CredentialExport = serde_json::from_str(&raw)?;

    if export.api_key.trim().is_empty() {
        return Err(ExportError::Inconsistent("api_key is empty".into()));
    }

    if export.api_key_hash_hint.len() < 8 {
        return Err(ExportError::Inconsistent("api_key_hash_hint is too short".into()));
    }

    let token = SecretToken::from_plaintext(export.api_key);
    let verifier = token.verifier();
    if !verifier.as_hex().starts_with(&export.api_key_hash_hint.to_ascii_lowercase()) {
        return Err(ExportError::Inconsistent(
            "api_key does not hash to api_key_hash_hint".into(),
        ));
    }
    let prefix = token.display_prefix();
    if prefix.as_str() != export.api_key_prefix {
        return Err(ExportError::Inconsistent(
            "api_key_prefix does not match api_key".into(),
        ));
    }

    Ok(LoadedCredential {
        id: export.api_key_id,
        service: export.service,
        token,
        verifier,
        prefix,
        endpoint: export.endpoint,
    })
}

/// Upper-cased service name used as the variable prefix: `dns_science`
/// becomes `DNS_SCIENCE`.
pub fn env_var_prefix(service: &str) -> String {
    service
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn render_env(export: &CredentialExport) -> String {
    let var = env_var_prefix(&export.service);
    format!(
        "# {service} API credentials\n\
         # Generated: {generated}\n\
         {var}_API_KEY={key}\n\
         {var}_API_KEY_ID={id}\n\
         {var}_ENDPOINT={endpoint}\n",
        service = export.service,
        generated = export.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        var = var,
        key = export.api_key,
        id = export.api_key_id,
        endpoint = export.endpoint,
    )
}

/// `export VAR='value'` lines for pasting into a shell; same variables as
/// the `.env` file.
pub fn shell_exports(export: &CredentialExport) -> Vec<String> {
    let var = env_var_prefix(&export.service);
    [
        ("API_KEY", export.api_key.clone()),
        ("API_KEY_ID", export.api_key_id.to_string()),
        ("ENDPOINT", export.endpoint.clone()),
    ]
    .into_iter()
    .map(|(suffix, value)| {
        format!("export {}_{}='{}'", var, suffix, value.replace('\'', r"'\''"))
    })
    .collect()
}

#[cfg(unix)]
fn write_file(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(io_err)?;
    file.write_all(contents).map_err(io_err)
}

#[cfg(not(unix))]
fn write_file(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    fs::write(path, contents).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir().join(format!("keyforge-export-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn test_write_then_load() {
        let rec = generator::generate("svc_live", "http://localhost:5000", ["dns_query"]).unwrap();
        let export = CredentialExport::from_record("svc", &rec);
        let path = scratch_path();

        let env_path = write(&path, &export).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.verifier, rec.verifier);
        assert_eq!(loaded.prefix, rec.prefix);
        assert_eq!(loaded.endpoint, "http://localhost:5000");

        let env = fs::read_to_string(&env_path).unwrap();
        assert!(env.contains(&format!("SVC_API_KEY={}", rec.token.expose())));
        assert!(env.contains(&format!("SVC_API_KEY_ID={}", rec.id)));

        fs::remove_file(&path).ok();
        fs::remove_file(&env_path).ok();
    }

    #[test]
    fn test_export_never_contains_full_verifier() {
        let rec = generator::generate("svc_live", "http://localhost:5000", ["a"]).unwrap();
        let json = serde_json::to_string(&CredentialExport::from_record("svc", &rec)).unwrap();
        assert!(!json.contains(rec.verifier.as_hex()));
        assert!(json.contains(rec.verifier.hint()));
    }

    #[test]
    fn test_load_rejects_tampered_token() {
        let rec = generator::generate("svc_live", "http://localhost:5000", ["a"]).unwrap();
        let mut export = CredentialExport::from_record("svc", &rec);
        export.api_key.push('0');
        let path = scratch_path();
        write(&path, &export).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ExportError::Inconsistent(_)));

        fs::remove_file(&path).ok();
        fs::remove_file(env_path_for(&path)).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(&scratch_path()).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }

    #[test]
    fn test_shell_exports_match_env_file() {
        let rec = generator::generate("svc_live", "http://localhost:5000/it's", ["a"]).unwrap();
        let export = CredentialExport::from_record("svc", &rec);
        let lines = shell_exports(&export);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("export SVC_API_KEY='{}'", rec.token.expose()));
        assert_eq!(lines[1], format!("export SVC_API_KEY_ID='{}'", rec.id));
        assert_eq!(lines[2], r"export SVC_ENDPOINT='http://localhost:5000/it'\''s'");

        let env = render_env(&export);
        assert!(env.contains(&format!("SVC_API_KEY={}", rec.token.expose())));
    }

    #[test]
    fn test_env_var_prefix() {
        assert_eq!(env_var_prefix("adsdnsgo"), "ADSDNSGO");
        assert_eq!(env_var_prefix("dns_science"), "DNS_SCIENCE");
    }
}
