//! Regional participant service binary.
//!
//! ```text
//! waypoint-participant <region> [listen-addr]
//! ```
//!
//! Serves one region's participant surface over an in-memory store.
//! Defaults to the listen address configured for the region, falling
//! back to `0.0.0.0:8001`.

use std::sync::Arc;

use tracing::info;

use waypoint_participant::api;
use waypoint_participant::Participant;
use waypoint_storage::{MemoryRegionStore, RegionStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let region = args.next().unwrap_or_else(|| {
        eprintln!("usage: waypoint-participant <region> [listen-addr]");
        std::process::exit(2);
    });
    let listen = args.next().unwrap_or_else(|| "0.0.0.0:8001".to_string());

    let store: Arc<dyn RegionStore> = Arc::new(MemoryRegionStore::new(region.clone()));
    let participant = Arc::new(Participant::new(region.clone(), store));

    let app = api::router(participant);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(%region, %listen, "participant service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
