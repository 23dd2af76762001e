// Shared Ledger - Web Server
// REST API with Axum over a single SQLite database

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use shared_ledger::api::{router, AppState};
use shared_ledger::{AuthGateway, Config, LedgerService, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config file as the only argument; LEDGER_* variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🌐 Shared Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Refuse to start without a signing secret
    let auth = AuthGateway::new(&config.auth)
        .context("Set auth.jwt_secret in the config file or LEDGER_JWT_SECRET")?;

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let store = SqliteStore::open_with_timeout(&config.database_path, config.busy_timeout())
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    println!("✓ Database opened: {:?}", config.database_path);

    let ledger =
        LedgerService::new(store).with_drift_tolerance(config.settlement.drift_tolerance);
    let app = router(AppState::new(ledger, auth));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    println!("\n🚀 Server running on http://{}", config.listen_addr);
    println!("   Press Ctrl+C to stop\n");
    tracing::info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
