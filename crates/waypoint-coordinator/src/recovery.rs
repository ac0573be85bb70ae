//! Coordinator crash recovery.
//!
//! Replays the transaction log at startup and resolves every record
//! that is not in a terminal state:
//!
//! - `STARTED`: the coordinator cannot know how far PREPARE got.
//!   Probe both participants with `status(txId)`; whatever they hold
//!   for the transaction collapses to a rollback (no commit was ever
//!   issued before `PREPARED` hit the disk). Abort both, then write
//!   `ABORTED`. Unreachable probes leave the record `STARTED` for the
//!   next recovery pass.
//! - `PREPARED` with unanimous COMMIT votes and a snapshot: resume the
//!   commit — install at the target (idempotent), delete at the
//!   source, write `COMMITTED`.
//! - `PREPARED` otherwise: abort both and write `ABORTED`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use waypoint_core::api::{AbortRequest, CommitRequest, ParticipantApi};
use waypoint_core::config::HandoffConfig;
use waypoint_core::error::ApiError;
use waypoint_core::transaction::{Role, TransactionRecord, TxState};
use waypoint_storage::TransactionLog;

use crate::client::ParticipantSet;
use crate::counters::HandoffCounters;
use crate::retry::{bounded, with_retries, RetryPolicy};

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Records scanned.
    pub scanned: usize,
    /// Transactions driven to `COMMITTED`.
    pub committed: usize,
    /// Transactions driven to `ABORTED`.
    pub aborted: usize,
    /// Records left non-terminal (participants unreachable).
    pub unresolved: usize,
}

/// Replays the log after a coordinator restart.
pub struct RecoveryManager {
    participants: Arc<ParticipantSet>,
    log: Arc<dyn TransactionLog>,
    counters: Arc<HandoffCounters>,
    config: HandoffConfig,
    retry: RetryPolicy,
}

impl RecoveryManager {
    /// Wires a recovery manager over its collaborators.
    #[must_use]
    pub fn new(
        participants: Arc<ParticipantSet>,
        log: Arc<dyn TransactionLog>,
        counters: Arc<HandoffCounters>,
        config: HandoffConfig,
    ) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        Self {
            participants,
            log,
            counters,
            config,
            retry,
        }
    }

    /// Runs one recovery pass over every non-terminal record.
    ///
    /// Best-effort per record: one unreachable participant does not
    /// block the rest of the scan. Safe to re-run at any time; every
    /// action taken is idempotent.
    pub async fn recover(&self) -> RecoveryReport {
        let records = match self.log.scan_active().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "recovery scan failed");
                return RecoveryReport::default();
            }
        };

        let mut report = RecoveryReport {
            scanned: records.len(),
            ..RecoveryReport::default()
        };
        if records.is_empty() {
            info!("no in-flight transactions to recover");
            return report;
        }

        info!(records = records.len(), "recovering in-flight transactions");
        for record in records {
            match record.state {
                TxState::Started => match self.resolve_started(&record).await {
                    Resolution::Aborted => report.aborted += 1,
                    Resolution::Unresolved => report.unresolved += 1,
                    Resolution::Committed => {}
                },
                TxState::Prepared => match self.resolve_prepared(&record).await {
                    Resolution::Committed => report.committed += 1,
                    Resolution::Aborted => report.aborted += 1,
                    Resolution::Unresolved => report.unresolved += 1,
                },
                TxState::Committed | TxState::Aborted => {}
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        self.counters
            .recovered
            .fetch_add((report.committed + report.aborted) as u64, Ordering::Relaxed);
        info!(
            committed = report.committed,
            aborted = report.aborted,
            unresolved = report.unresolved,
            "recovery pass finished"
        );
        report
    }

    /// A `STARTED` record: probe, then roll back.
    async fn resolve_started(&self, record: &TransactionRecord) -> Resolution {
        let (Some(source), Some(target)) = (
            self.participants.get(&record.source),
            self.participants.get(&record.target),
        ) else {
            warn!(tx_id = %record.tx_id, "recovery: participant no longer configured");
            return Resolution::Unresolved;
        };

        // Both probes must answer before we act; an unreachable region
        // leaves the record for the next pass.
        let source_status = self.probe(&source, &record.tx_id).await;
        let target_status = self.probe(&target, &record.tx_id).await;
        let (Ok(src), Ok(dst)) = (source_status, target_status) else {
            warn!(tx_id = %record.tx_id, "recovery: probes unavailable, leaving STARTED");
            return Resolution::Unresolved;
        };

        info!(
            tx_id = %record.tx_id,
            source_holds = src.present,
            target_holds = dst.present,
            "recovery: resolving STARTED transaction"
        );
        self.abort_both(record, &source, &target).await
    }

    /// A `PREPARED` record: resume the commit or roll back.
    async fn resolve_prepared(&self, record: &TransactionRecord) -> Resolution {
        let (Some(source), Some(target)) = (
            self.participants.get(&record.source),
            self.participants.get(&record.target),
        ) else {
            warn!(tx_id = %record.tx_id, "recovery: participant no longer configured");
            return Resolution::Unresolved;
        };

        let Some(snapshot) = record.ride_snapshot.clone() else {
            warn!(tx_id = %record.tx_id, "recovery: PREPARED without snapshot, aborting");
            return self.abort_both(record, &source, &target).await;
        };
        if !record.unanimous_commit() {
            return self.abort_both(record, &source, &target).await;
        }

        // Resume the forward path: install at the target first, exactly
        // as the live protocol orders it.
        let target_commit = CommitRequest {
            tx_id: record.tx_id.clone(),
            ride_id: record.ride_id.clone(),
            role: Role::Target,
            ride: Some(snapshot),
        };
        if let Err(e) = self.call_commit(&target, &target_commit).await {
            warn!(tx_id = %record.tx_id, error = %e, "recovery: target commit failed");
            return Resolution::Unresolved;
        }

        let source_commit = CommitRequest {
            tx_id: record.tx_id.clone(),
            ride_id: record.ride_id.clone(),
            role: Role::Source,
            ride: None,
        };
        if let Err(e) = self.call_commit(&source, &source_commit).await {
            warn!(tx_id = %record.tx_id, error = %e, "recovery: source commit failed");
            return Resolution::Unresolved;
        }

        let mut resolved = record.clone();
        resolved.mark_committed();
        if let Err(e) = self.log.append(&resolved).await {
            error!(tx_id = %record.tx_id, error = %e, "recovery: failed to log COMMITTED");
            return Resolution::Unresolved;
        }
        info!(tx_id = %record.tx_id, "recovery: transaction committed");
        Resolution::Committed
    }

    async fn abort_both(
        &self,
        record: &TransactionRecord,
        source: &Arc<dyn ParticipantApi>,
        target: &Arc<dyn ParticipantApi>,
    ) -> Resolution {
        for (role, participant) in [(Role::Source, source), (Role::Target, target)] {
            let req = AbortRequest {
                tx_id: record.tx_id.clone(),
                ride_id: record.ride_id.clone(),
                role,
            };
            let result = with_retries(&self.retry, "recovery-abort", || {
                bounded(
                    self.config.prepare_timeout(),
                    participant.abort(&req),
                )
            })
            .await;
            if let Err(e) = result {
                warn!(tx_id = %record.tx_id, role = %role, error = %e, "recovery: abort failed");
                return Resolution::Unresolved;
            }
        }

        let mut resolved = record.clone();
        resolved.mark_aborted("resolved by recovery");
        if let Err(e) = self.log.append(&resolved).await {
            error!(tx_id = %record.tx_id, error = %e, "recovery: failed to log ABORTED");
            return Resolution::Unresolved;
        }
        info!(tx_id = %record.tx_id, "recovery: transaction aborted");
        Resolution::Aborted
    }

    async fn probe(
        &self,
        participant: &Arc<dyn ParticipantApi>,
        tx_id: &str,
    ) -> Result<waypoint_core::api::TxStatusResponse, ApiError> {
        with_retries(&self.retry, "recovery-status", || {
            bounded(
                self.config.prepare_timeout(),
                participant.tx_status(tx_id),
            )
        })
        .await
    }

    async fn call_commit(
        &self,
        participant: &Arc<dyn ParticipantApi>,
        req: &CommitRequest,
    ) -> Result<(), ApiError> {
        with_retries(&self.retry, "recovery-commit", || {
            bounded(self.config.commit_timeout(), participant.commit(req))
        })
        .await
        .map(|_| ())
    }
}

enum Resolution {
    Committed,
    Aborted,
    Unresolved,
}
