// POS Back Office - Web Server
// JSON API over the register/shift guard

use anyhow::{Context, Result};
use pos_backoffice::api::{router, AppState};
use pos_backoffice::{init_logging, AppConfig, SqliteStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_logging(&config);

    // Create the schema once; handlers only open connections
    SqliteStore::open(&config.db_path, config.busy_timeout)?;
    info!(db = %config.db_path.display(), "database ready");

    let addr = config.bind_addr.clone();
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/registers", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
