//! # Waypoint Storage
//!
//! Durability layer for Waypoint: the typed region-store client and the
//! coordinator's transaction log.
//!
//! The document store behind a region is an external collaborator; the
//! contract this crate pins down is the small, total [`RegionStore`]
//! interface — document-atomic CRUD plus the compare-and-set lock that
//! serializes concurrent handoffs of the same ride. [`MemoryRegionStore`]
//! implements that contract in-process and stands in for the real store
//! in tests and single-node deployments.
//!
//! The [`TransactionLog`] records every handoff state transition durably
//! before the protocol advances past it; [`FileTransactionLog`] fsyncs
//! one JSON document per transaction, [`MemoryTransactionLog`] backs
//! tests.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod memory;
pub mod store;
pub mod txlog;

pub use memory::MemoryRegionStore;
pub use store::{RegionStore, StoreError, StoreHealth};
pub use txlog::{FileTransactionLog, MemoryTransactionLog, TransactionLog, TxLogError};
