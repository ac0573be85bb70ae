//! # Waypoint Participant
//!
//! The regional half of the handoff protocol. A [`Participant`] wraps
//! one region's store and exposes:
//!
//! - ride CRUD, listing, and statistics for that region;
//! - the idempotent 2PC endpoints (`prepare` / `commit` / `abort` /
//!   `status`) the coordinator drives;
//! - the health probe the coordinator's monitor polls.
//!
//! [`api::router`] serves all of it over HTTP; the [`Participant`] also
//! implements [`ParticipantApi`](waypoint_core::ParticipantApi) directly
//! so tests and single-process deployments can skip the network.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod api;
pub mod participant;

pub use participant::{Participant, ParticipantError};
