use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::generator;
use crate::models::stored::KeyMetadata;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Connection string for the credential store. Only required by commands
    /// that talk to the store.
    pub database_url: Option<String>,
    /// Endpoint the issued key is meant for. Recorded in the export.
    pub endpoint: String,
    /// Service marker, e.g. `svc`. First half of the token tag.
    pub service: String,
    /// Environment marker, e.g. `live`. Second half of the token tag.
    pub environment: String,
    pub purpose: String,
    pub issuer: String,
    pub tier: String,
    pub capabilities: Vec<String>,
    /// JSON export path; the `.env` companion sits next to it.
    pub output_file: PathBuf,
    /// Upper bound on one registration call. Set via KEYFORGE_STORE_TIMEOUT_SECS.
    pub store_timeout_secs: u64,
}

impl Config {
    pub fn service_tag(&self) -> String {
        generator::service_tag(&self.service, &self.environment)
    }

    /// Display name written to the `name` column, e.g. `svc - integration`.
    pub fn key_name(&self) -> String {
        format!("{} - {}", self.service, self.purpose)
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            service: self.service.clone(),
            purpose: self.purpose.clone(),
            created_by: self.issuer.clone(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Returns the store connection string, rejecting a missing or blank one.
    pub fn database_url(&self) -> anyhow::Result<&str> {
        match self.database_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => anyhow::bail!("DATABASE_URL must be set to reach the credential store"),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any key lookup. `load` uses the process environment.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

    let endpoint = var("KEYFORGE_ENDPOINT", "http://localhost:5000");
    if endpoint.trim().is_empty() {
        anyhow::bail!("KEYFORGE_ENDPOINT must not be empty");
    }

    let service = tag_part("KEYFORGE_SERVICE", var("KEYFORGE_SERVICE", "svc"))?;
    let environment = tag_part("KEYFORGE_ENVIRONMENT", var("KEYFORGE_ENVIRONMENT", "live"))?;

    Ok(Config {
        database_url: lookup("DATABASE_URL"),
        endpoint: endpoint.trim().to_string(),
        service,
        environment,
        purpose: var("KEYFORGE_PURPOSE", "integration"),
        issuer: var("KEYFORGE_ISSUER", "deploy script"),
        tier: var("KEYFORGE_TIER", "enterprise"),
        capabilities: lookup("KEYFORGE_CAPABILITIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        output_file: PathBuf::from(var("OUTPUT_FILE", "api-key.json")),
        store_timeout_secs: lookup("KEYFORGE_STORE_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(10),
    })
}

/// Service and environment end up in the token, so they share its charset.
fn tag_part(key: &str, value: String) -> anyhow::Result<String> {
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("{} must not be empty", key);
    }
    if !generator::is_tag_safe(value) {
        anyhow::bail!(
            "{} '{}' may only contain ASCII letters, digits and '_'",
            key,
            value
        );
    }
    Ok(value.to_string())
}
