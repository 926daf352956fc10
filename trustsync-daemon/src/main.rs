//! Trustsync maintenance CLI.
//!
//! Inspects and repairs the enrollment state kept by the daemon: the
//! failure-recovery reason, the legacy key pair and the key registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trustsync_core::{InvocationReason, KeyBundleName, LEGACY_KEY_HANDLE};
use trustsync_daemon::config::Config;
use trustsync_daemon::prefs;
use trustsync_daemon::{Database, KeyRegistry, SqlitePrefStore};

// ============================================================================
// CLI Definition
// ============================================================================

/// Trustsync - device credential enrollment state
#[derive(Parser)]
#[command(name = "trustsync-daemon", version, about)]
struct Cli {
    /// Directory holding the enrollment database
    #[arg(long, env = "TRUSTSYNC_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, env = "TRUSTSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show failure-recovery state, step timeouts and the active user key
    Status,

    /// Reconcile the legacy user key pair with the key registry
    Migrate,

    /// Clear the persisted failure-recovery reason
    ResetRecovery,

    /// List the keys of a bundle
    Keys {
        /// Bundle name (e.g. "PublicKey", "LegacyAuthzenKey", "DeviceSync:BetterTogether")
        #[arg(long, default_value = "PublicKey")]
        bundle: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    let db_path = config.database_path()?;
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let prefs = SqlitePrefStore::new(db.pool().clone());

    match cli.command {
        Commands::Status => cmd_status(&config, &db, &prefs).await,
        Commands::Migrate => cmd_migrate(&db, &prefs).await,
        Commands::ResetRecovery => cmd_reset_recovery(&prefs).await,
        Commands::Keys { bundle } => cmd_keys(&db, &bundle).await,
    }
}

async fn cmd_status(config: &Config, db: &Database, prefs: &SqlitePrefStore) -> Result<()> {
    let timeouts = config
        .orchestrator_config()
        .context("Invalid configuration")?;
    let reason = match prefs::load_failure_recovery_reason(prefs).await {
        Ok(reason) => reason.to_string(),
        Err(e) => format!("invalid ({e})"),
    };
    let legacy = prefs::load_legacy_key_pair(prefs)
        .await
        .context("Failed to read legacy key pair")?;
    let registry = KeyRegistry::load(db.pool().clone())
        .await
        .context("Failed to load key registry")?;

    println!("Enrollment Status");
    println!("=================");
    println!();
    println!("Failure-recovery reason: {}", reason);
    println!(
        "Legacy key pair:         {}",
        if legacy.is_some() { "present" } else { "absent" }
    );
    println!(
        "Push registration timeout: {}s",
        timeouts.push_registration_timeout.as_secs()
    );
    println!(
        "App metadata timeout:      {}s",
        timeouts.app_metadata_timeout.as_secs()
    );

    match registry.get_active(KeyBundleName::UserKeyPair) {
        Some(key) => {
            println!("Active user key:");
            println!("  Handle:      {}", key.handle());
            println!("  Type:        {}", key.key_type().as_str());
            println!("  Fingerprint: {}", key.fingerprint());
        }
        None => println!("Active user key:         none"),
    }

    Ok(())
}

async fn cmd_migrate(db: &Database, prefs: &SqlitePrefStore) -> Result<()> {
    let legacy = prefs::load_legacy_key_pair(prefs)
        .await
        .context("Failed to read legacy key pair")?;
    let registry = KeyRegistry::load(db.pool().clone())
        .await
        .context("Failed to load key registry")?;

    let state = registry
        .migrate_legacy_pair_if_needed(legacy.as_ref(), LEGACY_KEY_HANDLE)
        .await
        .context("Failed to migrate legacy key pair")?;

    println!("User key pair state: {} ({})", state, state.as_i64());
    if state.needs_install() {
        println!("Legacy key pair installed as active key '{}'.", LEGACY_KEY_HANDLE);
    }
    Ok(())
}

async fn cmd_reset_recovery(prefs: &SqlitePrefStore) -> Result<()> {
    prefs::store_failure_recovery_reason(prefs, InvocationReason::Unspecified)
        .await
        .context("Failed to reset failure-recovery reason")?;

    println!("Failure-recovery reason cleared.");
    Ok(())
}

async fn cmd_keys(db: &Database, bundle: &str) -> Result<()> {
    let name = KeyBundleName::parse(bundle)?;
    let registry = KeyRegistry::load(db.pool().clone())
        .await
        .context("Failed to load key registry")?;

    let Some(bundle) = registry.bundle(name) else {
        println!("No keys in bundle {}.", name);
        return Ok(());
    };

    println!("{:<20} {:<9} {:<11} FINGERPRINT", "HANDLE", "STATUS", "TYPE");
    for key in bundle.keys() {
        println!(
            "{:<20} {:<9} {:<11} {}",
            key.handle().as_str(),
            key.status().as_str(),
            key.key_type().as_str(),
            key.fingerprint()
        );
    }
    Ok(())
}
