mod handlers;
mod state;

use crate::state::AppState;
use common::{PathPolicy, SimConfig};
use std::env;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("server=debug,common=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // por HTTP sólo se leen archivos de SIM_DATA_DIR (sin él, ninguno)
    let config = SimConfig {
        paths: PathPolicy::from_env(),
        ..SimConfig::from_env()
    };
    info!(
        "límites: max_records={} snapshot_limit={} archivos={:?}",
        config.max_records, config.snapshot_limit, config.paths
    );

    // router HTTP
    let app = handlers::build_router(AppState::new(config));

    let addr = env::var("SERVER_ADDR").unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("server escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
