/*!
FLEET KERNEL - Point d'entrée du serveur de gestion de flotte

RÔLE : Orchestration des modules : config, roster, dispatch, HTTP.
Bootstrap complet avec gestion d'erreurs et logging.

ARCHITECTURE : API REST unique devant le moteur de dispatch (fleet-dispatch).
*/

mod api_path;
mod batch;
mod config;
mod csv_export;
mod http;
mod ip_range;
mod offline_log;
mod operations;
mod roster;
mod state;
mod stats;

use crate::config::{config_path, load_config};
use crate::roster::RosterStore;
use crate::state::AppState;
use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env facultatif
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleet_kernel=info,fleet_dispatch=info")),
        )
        .init();

    let path = config_path();
    let cfg = load_config(&path).await;

    // dossiers de travail
    for dir in [&cfg.logs_dir, &cfg.configs_dir, &cfg.artifacts_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("[kernel] failed to create {}: {}", dir.display(), e);
        }
    }

    let roster = RosterStore::new(&cfg.roster_path);
    if let Err(e) = roster.load().await {
        warn!("[kernel] failed to load roster: {}", e);
    }

    let bind = cfg.http.bind.clone();
    let app = http::build_router(AppState::new(cfg, path, roster));

    let listener = TcpListener::bind(&bind).await.with_context(|| format!("cannot bind {bind}"))?;
    info!("[kernel] listening on http://{}", bind);
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
