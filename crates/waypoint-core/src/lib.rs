//! # Waypoint Core
//!
//! Domain model, wire types, and configuration shared by the regional
//! participants and the handoff coordinator.
//!
//! The crate is deliberately free of I/O: it defines the ride document
//! schema, the transaction state machine, the request/response types of
//! both HTTP surfaces, and the [`ParticipantApi`] seam the coordinator
//! uses to talk to a region (over HTTP in production, in-process in
//! tests).

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod api;
pub mod config;
pub mod error;
pub mod query;
pub mod ride;
pub mod transaction;

pub use api::ParticipantApi;
pub use config::WaypointConfig;
pub use error::{ApiError, CoreError, Fault};
pub use query::{QueryScope, RideFilter};
pub use ride::{HandoffStage, Location, Ride, RideStatus};
pub use transaction::{Role, TransactionRecord, TxState, Vote};
