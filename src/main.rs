use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyforge::config::{self, Config};
use keyforge::export::{self, CredentialExport};
use keyforge::registrar::{Outcome, Registrar, Registration};
use keyforge::store::postgres::PgStore;
use keyforge::{generator, CredentialRecord, DisplayPrefix, RegisterError, Verifier};

mod cli;

const RULE: &str = "------------------------------------------------------------";
const BANNER: &str = "============================================================";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "keyforge=info".into()),
    );
    let json_logs = std::env::var("KEYFORGE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Logs go to stderr so stdout carries only the report.
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // .env first so clap's `env = ...` defaults see it; parse before loading
    // config so --help works even when the environment is invalid.
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = match args.command {
        cli::Commands::Generate(args) => handle_generate(&cfg, args).map(|_| ()),
        cli::Commands::Register {
            file,
            verifier,
            prefix,
            key,
        } => handle_register(&cfg, file, verifier, prefix, key).await,
        cli::Commands::Issue { generate, key } => handle_issue(&cfg, generate, key).await,
        cli::Commands::Migrate => handle_migrate(&cfg).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn handle_generate(cfg: &Config, args: cli::GenerateArgs) -> anyhow::Result<CredentialRecord> {
    let endpoint = args.endpoint.unwrap_or_else(|| cfg.endpoint.clone());
    let capabilities = if args.capabilities.is_empty() {
        cfg.capabilities.clone()
    } else {
        args.capabilities
    };
    let output = args.output.unwrap_or_else(|| cfg.output_file.clone());

    let record = generator::generate(&cfg.service_tag(), &endpoint, capabilities)
        .context("failed to generate API key")?;
    let export = CredentialExport::from_record(&cfg.service, &record);
    let env_path = export::write(&output, &export)?;

    println!("{}", BANNER);
    println!("   {} API Key Generated", cfg.service);
    println!("{}", BANNER);
    println!();
    println!("API Key ID:     {}", record.id);
    println!("API Key:        {}", record.token.expose());
    println!("Key Prefix:     {}", record.prefix);
    println!("Key Hash:       {}...", record.verifier.hint());
    println!("Endpoint:       {}", record.endpoint);
    if !record.capabilities.is_empty() {
        let caps: Vec<&str> = record.capabilities.iter().map(String::as_str).collect();
        println!("Capabilities:   {}", caps.join(", "));
    }
    println!();
    println!("{}", RULE);
    println!("IMPORTANT: Save the API key now - it cannot be recovered!");
    println!("{}", RULE);
    println!();
    println!("Credentials saved to: {}", output.display());
    println!("Environment file saved to: {}", env_path.display());
    println!();
    println!("To use in your shell:");
    for line in export::shell_exports(&export) {
        println!("  {}", line);
    }
    println!();

    Ok(record)
}

async fn handle_register(
    cfg: &Config,
    file: Option<PathBuf>,
    verifier: Option<String>,
    prefix: Option<String>,
    key: cli::KeyArgs,
) -> anyhow::Result<()> {
    let (verifier, prefix) = match (verifier, prefix) {
        (Some(v), Some(p)) => (
            Verifier::parse(&v).map_err(|e| anyhow::anyhow!("invalid --verifier: {}", e))?,
            DisplayPrefix::parse(&p).map_err(|e| anyhow::anyhow!("invalid --prefix: {}", e))?,
        ),
        _ => {
            let path = file.unwrap_or_else(|| cfg.output_file.clone());
            let loaded = export::load(&path).with_context(|| {
                format!(
                    "could not read API key file {} (run `keyforge generate` first)",
                    path.display()
                )
            })?;
            println!("Endpoint:    {}", loaded.endpoint);
            (loaded.verifier, loaded.prefix)
        }
    };

    register_and_report(cfg, &verifier, &prefix, &key).await
}

async fn handle_issue(
    cfg: &Config,
    generate: cli::GenerateArgs,
    key: cli::KeyArgs,
) -> anyhow::Result<()> {
    let record = handle_generate(cfg, generate)?;
    register_and_report(cfg, &record.verifier, &record.prefix, &key).await
}

async fn handle_migrate(cfg: &Config) -> anyhow::Result<()> {
    let db = PgStore::connect(cfg.database_url()?, cfg.store_timeout()).await?;
    tracing::info!("Running migrations...");
    let result = db.migrate().await;
    db.close().await;
    result?;
    println!("Credential store schema is up to date.");
    Ok(())
}

async fn register_and_report(
    cfg: &Config,
    verifier: &Verifier,
    prefix: &DisplayPrefix,
    key: &cli::KeyArgs,
) -> anyhow::Result<()> {
    let name = key.name.clone().unwrap_or_else(|| cfg.key_name());
    let tier = key.tier.clone().unwrap_or_else(|| cfg.tier.clone());

    println!("{}", BANNER);
    println!("   Registering API Key in Credential Store");
    println!("{}", BANNER);
    println!();
    println!("Key Prefix:  {}", prefix);
    println!("Key Hash:    {}...", verifier.hint());
    println!();

    let url = cfg.database_url()?;
    let req = Registration {
        verifier,
        prefix,
        name: &name,
        tier: &tier,
    };

    let outcome = register_once(cfg, url, &req).await.map_err(|e| {
        if e.is_retryable() {
            anyhow::Error::new(e).context("registration failed (safe to retry)")
        } else {
            anyhow::Error::new(e).context("registration failed")
        }
    })?;

    match outcome {
        Outcome::Created(id) => println!("API key registered successfully with ID: {}", id),
        Outcome::AlreadyRegistered(id) => println!("API key already registered with ID: {}", id),
    }
    println!();
    println!("{}", RULE);
    println!("API key is now active and ready to use!");
    println!("{}", RULE);
    println!();
    println!("Store Key ID: {}", outcome.store_id());
    println!("Name:         {}", name);
    println!("Tier:         {}", tier);
    println!();
    Ok(())
}

/// One connect-and-register attempt. Connection failures are classified like
/// any other store failure so callers can tell whether a retry makes sense.
async fn register_once(
    cfg: &Config,
    url: &str,
    req: &Registration<'_>,
) -> Result<Outcome, RegisterError> {
    let hint = req.verifier.hint();
    let db = PgStore::connect(url, cfg.store_timeout())
        .await
        .map_err(|e| RegisterError::from_store(hint, e))?;
    let registrar = Registrar::new(db, cfg.metadata());

    let outcome = match tokio::time::timeout(cfg.store_timeout(), registrar.register_detailed(req))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(RegisterError::StoreTimeout {
            verifier: hint.to_string(),
        }),
    };
    registrar.store().close().await;
    outcome
}
