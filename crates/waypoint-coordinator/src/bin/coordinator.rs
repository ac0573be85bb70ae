//! Handoff coordinator service binary.
//!
//! ```text
//! waypoint-coordinator [config.json] [listen-addr]
//! ```
//!
//! Without a config file the defaults apply: Phoenix and Los Angeles
//! participants on localhost, transaction log under `./waypoint-txlog`.

use std::path::Path;

use tracing::info;

use waypoint_coordinator::{api, Coordinator};
use waypoint_core::WaypointConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => WaypointConfig::load_from_file(Path::new(&path))?,
        None => WaypointConfig::default(),
    };
    let listen = args.next().unwrap_or_else(|| "0.0.0.0:8000".to_string());

    let coordinator = Coordinator::from_config(config)?;
    let report = coordinator.start().await;
    info!(
        recovered_committed = report.committed,
        recovered_aborted = report.aborted,
        "startup recovery finished"
    );

    let app = api::router(coordinator.clone());
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(%listen, "coordinator service listening");
    axum::serve(listener, app).await?;

    coordinator.shutdown();
    Ok(())
}
