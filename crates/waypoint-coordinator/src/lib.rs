//! # Waypoint Coordinator
//!
//! The cross-region coordination layer: a two-phase commit engine that
//! migrates ride records between regional participants, a health
//! monitor that classifies regions, a buffer + drainer pair that
//! defers handoffs to unhealthy targets, crash recovery over a durable
//! transaction log, and a query router for local, replica, and live
//! scatter-gather reads.
//!
//! Composition lives in [`Coordinator`]; the HTTP surface in
//! [`api::router`].

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod api;
pub mod buffer;
pub mod client;
pub mod coordinator;
pub mod counters;
pub mod drainer;
pub mod engine;
pub mod health;
pub mod recovery;
pub mod retry;
pub mod router;

pub use buffer::{BufferedHandoff, HandoffBuffer};
pub use client::{HttpParticipantClient, ParticipantSet};
pub use coordinator::Coordinator;
pub use counters::HandoffCounters;
pub use drainer::BufferDrainer;
pub use engine::HandoffEngine;
pub use health::{HealthEvent, HealthMonitor, HealthState, RegionHealth};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use retry::RetryPolicy;
pub use router::{QueryRouter, RouterError};
