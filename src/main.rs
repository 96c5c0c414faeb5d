//! SchoolCoin API Server
//!
//! Run with: cargo run --bin schoolcoin -- --config config.toml
//!
//! Without `--config` the server looks in the default locations (see
//! [`schoolcoin::config::Config::load_default`]) and then applies
//! `SCHOOLCOIN_*` environment overrides. `RUST_LOG` takes precedence over
//! the configured log level.

use anyhow::Context;
use clap::Parser;
use schoolcoin::api::{serve, AppState};
use schoolcoin::config::{BootstrapConfig, Config, LoggingConfig};
use schoolcoin::store::{NewProfile, Role, Store};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "schoolcoin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SchoolCoin token economy API server")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging);

    tracing::info!("Starting SchoolCoin API server v{}", env!("CARGO_PKG_VERSION"));

    let store_config = config.store_config();
    tracing::info!("Data directory: {:?}", store_config.data_dir);

    let store = Store::open(&store_config)
        .with_context(|| format!("opening database in {:?}", store_config.data_dir))?;

    let stats = store.stats()?;
    tracing::info!(
        schools = stats.schools,
        profiles = stats.profiles,
        transactions = stats.transactions,
        "Store opened"
    );

    bootstrap_super_admin(&store, &config.bootstrap)?;

    let server_config = config.server_config();
    let state = AppState::new(store, server_config.clone());

    serve(state, &server_config).await?;

    tracing::info!("SchoolCoin API server stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("schoolcoin={},tower_http=debug", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Create the configured super admin unless the email is already taken
fn bootstrap_super_admin(store: &Store, bootstrap: &BootstrapConfig) -> anyhow::Result<()> {
    let Some((email, password)) = bootstrap.credentials() else {
        tracing::info!("No super admin configured for bootstrap");
        return Ok(());
    };

    if let Some(existing) = store.find_profile_by_email(email)? {
        tracing::debug!(profile_id = existing.id, "Super admin already present");
        return Ok(());
    }

    let profile = store
        .create_profile(NewProfile {
            school_id: None,
            name: bootstrap.super_admin_name.clone(),
            email: email.to_string(),
            role: Role::SuperAdmin,
            password: password.to_string(),
        })
        .context("creating bootstrap super admin")?;

    tracing::info!(profile_id = profile.id, email = %profile.email, "Created super admin");
    Ok(())
}
