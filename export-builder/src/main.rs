use anyhow::{Context, Result};
use cloudlink::config::{load_config, CloudlinkConfig};
use cloudlink::credentials::{SecretCipher, SqliteCredentialStore, TokenVault};
use cloudlink::oauth::{OAuthConfig, OAuthManager};
use cloudlink::ProviderRegistry;
use export_builder::{BuildConfig, Orchestrator, SourceRef};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "export_builder=info,cloudlink=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match std::env::var("CLOUDLINK_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => CloudlinkConfig::default(),
    };
    config.apply_env_overrides();

    let owner = std::env::var("EXPORT_OWNER").context("EXPORT_OWNER is required")?;
    let provider_name =
        std::env::var("EXPORT_PROVIDER").unwrap_or_else(|_| "vercel".to_string());
    let source = std::env::var("EXPORT_SOURCE").context("EXPORT_SOURCE is required")?;
    let revision = std::env::var("EXPORT_REVISION").ok().filter(|r| !r.is_empty());
    let output_root =
        std::env::var("EXPORT_OUTPUT_ROOT").unwrap_or_else(|_| ".".to_string());
    let component_ids: Vec<String> = std::env::var("EXPORT_COMPONENTS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    let source_token = std::env::var("EXPORT_SOURCE_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .map(Zeroizing::new);

    let source = if PathBuf::from(&source).is_dir() {
        SourceRef::Local(PathBuf::from(source))
    } else {
        SourceRef::Git {
            url: source,
            revision,
        }
    };

    info!(
        owner = %owner,
        provider = %provider_name,
        source = ?source,
        components = component_ids.len(),
        "Configuration loaded"
    );

    let encryption_key = std::env::var("CLOUDLINK_ENCRYPTION_KEY")
        .context("CLOUDLINK_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let cipher = SecretCipher::from_base64_key(&encryption_key)
        .context("Invalid CLOUDLINK_ENCRYPTION_KEY")?;
    let store = SqliteCredentialStore::open(&config.credentials.database_path)
        .context("Failed to open credential store")?;
    let vault = TokenVault::new(cipher, Arc::new(store));

    let token = match OAuthConfig::from_env(&config.oauth) {
        Ok(oauth_config) => {
            let oauth = OAuthManager::new(oauth_config)?;
            vault.get_valid_token(&owner, &provider_name, &oauth).await?
        }
        Err(e) => {
            warn!(error = %e, "OAuth client not configured, using stored token without refresh");
            vault.get_token(&owner, &provider_name)?
        }
    };

    let registry = ProviderRegistry::with_defaults(&config)?;
    let provider = registry.get(&provider_name)?;
    if !provider.validate_credentials(&token).await? {
        anyhow::bail!("stored {} credential was rejected", provider.name());
    }

    let orchestrator = Orchestrator::new(config.build.clone());
    let mut build = BuildConfig::new(token.as_str(), source);
    build.source_token = source_token;
    build.output_root = PathBuf::from(output_root);
    build.component_ids = component_ids;
    drop(token);

    let result = orchestrator.build(build).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize build result")?
    );

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
