//! Two-phase commit handoff engine.
//!
//! ## Transaction cycle
//!
//! 1. Validate — names configured, `source != target`, ride id present
//! 2. Health gate — unhealthy target buffers, unhealthy source fails fast
//! 3. `STARTED` logged durably
//! 4. PREPARE source (locks the ride, captures the snapshot)
//! 5. PREPARE target (duplicate check)
//! 6. `PREPARED` logged durably with both votes and the snapshot
//! 7. COMMIT target (install), then COMMIT source (delete)
//! 8. `COMMITTED` logged
//!
//! Target-install-before-source-delete is deliberate: a crash between
//! the two leaves a momentary duplicate that recovery resolves, while
//! the opposite order could lose the ride outright. Any failure in
//! steps 4–6 routes to the abort path; failures in 7–8 return `PARTIAL`
//! and leave the `PREPARED` record for recovery to finish.
//!
//! The log write always lands before the protocol step that depends on
//! it. Retries carry the same transaction id so participant idempotence
//! absorbs duplicate deliveries.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use uuid::Uuid;

use waypoint_core::api::{
    AbortRequest, CommitRequest, HandoffRequest, HandoffResponse, HandoffStatus, ParticipantApi,
    PrepareRequest, PrepareResponse,
};
use waypoint_core::config::HandoffConfig;
use waypoint_core::error::{ApiError, Fault};
use waypoint_core::ride::Ride;
use waypoint_core::transaction::{Role, TransactionRecord, Vote};
use waypoint_storage::TransactionLog;

use crate::buffer::HandoffBuffer;
use crate::client::ParticipantSet;
use crate::counters::HandoffCounters;
use crate::health::HealthMonitor;
use crate::retry::{bounded, with_retries, RetryPolicy};

/// Drives 2PC handoffs across two participants.
pub struct HandoffEngine {
    participants: Arc<ParticipantSet>,
    log: Arc<dyn TransactionLog>,
    monitor: Arc<HealthMonitor>,
    buffer: Arc<HandoffBuffer>,
    counters: Arc<HandoffCounters>,
    config: HandoffConfig,
    retry: RetryPolicy,
}

impl HandoffEngine {
    /// Wires an engine over its collaborators.
    #[must_use]
    pub fn new(
        participants: Arc<ParticipantSet>,
        log: Arc<dyn TransactionLog>,
        monitor: Arc<HealthMonitor>,
        buffer: Arc<HandoffBuffer>,
        counters: Arc<HandoffCounters>,
        config: HandoffConfig,
    ) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        Self {
            participants,
            log,
            monitor,
            buffer,
            counters,
            config,
            retry,
        }
    }

    /// Performs (or defers) one handoff.
    pub async fn handoff(&self, req: &HandoffRequest) -> HandoffResponse {
        self.execute(req, true).await
    }

    /// Handoff entrypoint with buffering control. The drainer passes
    /// `buffer_on_unhealthy = false` so a still-unhealthy target yields
    /// `BUFFERED` without re-enqueueing (the drainer keeps the entry).
    pub(crate) async fn execute(
        &self,
        req: &HandoffRequest,
        buffer_on_unhealthy: bool,
    ) -> HandoffResponse {
        let started = Instant::now();

        if let Err(detail) = self.validate(req) {
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
            warn!(ride_id = %req.ride_id, %detail, "handoff rejected");
            return respond(HandoffStatus::Aborted, None, Fault::InvalidArgument, started);
        }

        if self.monitor.is_unavailable(&req.target) {
            if !buffer_on_unhealthy {
                return respond(HandoffStatus::Buffered, None, Fault::Unavailable, started);
            }
            return match self.buffer.enqueue(&req.ride_id, &req.source, &req.target) {
                Ok(()) => {
                    self.counters.buffered.fetch_add(1, Ordering::Relaxed);
                    info!(
                        ride_id = %req.ride_id,
                        target = %req.target,
                        queued = self.buffer.len(&req.target),
                        "target unavailable, handoff buffered"
                    );
                    respond(HandoffStatus::Buffered, None, Fault::Unavailable, started)
                }
                Err(full) => {
                    self.counters.aborted.fetch_add(1, Ordering::Relaxed);
                    warn!(ride_id = %req.ride_id, error = %full, "buffer full, handoff rejected");
                    respond(HandoffStatus::Aborted, None, Fault::BufferFull, started)
                }
            };
        }

        if self.monitor.is_unavailable(&req.source) {
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
            warn!(ride_id = %req.ride_id, source = %req.source, "source unavailable, failing fast");
            return respond(
                HandoffStatus::Aborted,
                None,
                Fault::SourceUnavailable,
                started,
            );
        }

        self.run_transaction(req, started).await
    }

    fn validate(&self, req: &HandoffRequest) -> Result<(), String> {
        if req.ride_id.is_empty() {
            return Err("ride_id must be non-empty".to_string());
        }
        if req.source == req.target {
            return Err("source and target must differ".to_string());
        }
        if self.participants.get(&req.source).is_none() {
            return Err(format!("unknown source region '{}'", req.source));
        }
        if self.participants.get(&req.target).is_none() {
            return Err(format!("unknown target region '{}'", req.target));
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    async fn run_transaction(&self, req: &HandoffRequest, started: Instant) -> HandoffResponse {
        let deadline = started + self.config.overall_timeout();
        let tx_id = Uuid::new_v4().to_string();
        let mut record =
            TransactionRecord::started(&tx_id, &req.ride_id, &req.source, &req.target);

        let (Some(source), Some(target)) = (
            self.participants.get(&req.source),
            self.participants.get(&req.target),
        ) else {
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
            return respond(HandoffStatus::Aborted, None, Fault::Internal, started);
        };

        // ── STARTED on disk before any participant is touched ──
        if let Err(e) = self.log.append(&record).await {
            error!(%tx_id, error = %e, "failed to log STARTED");
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
            return respond(HandoffStatus::Aborted, Some(tx_id), Fault::Internal, started);
        }

        info!(
            %tx_id,
            ride_id = %req.ride_id,
            source = %req.source,
            target = %req.target,
            "handoff started"
        );

        // ── Phase 1a: PREPARE source ──
        let prepare_src = self
            .prepare_call(&source, &tx_id, &req.ride_id, Role::Source, deadline)
            .await;
        let snapshot = match prepare_src {
            Ok(PrepareResponse {
                vote: Vote::Commit,
                ride: Some(snapshot),
                ..
            }) => snapshot,
            Ok(PrepareResponse {
                vote: Vote::Commit,
                ride: None,
                ..
            }) => {
                // A COMMIT vote without a snapshot cannot be committed.
                record.source_vote = Some(Vote::Commit);
                return self
                    .abort_transaction(
                        record,
                        &[(Role::Source, &source)],
                        Fault::Internal,
                        started,
                    )
                    .await;
            }
            Ok(resp) => {
                record.source_vote = Some(Vote::Abort);
                let fault = resp.reason.unwrap_or(Fault::Internal);
                return self
                    .abort_transaction(record, &[(Role::Source, &source)], fault, started)
                    .await;
            }
            Err(e) => {
                warn!(%tx_id, error = %e, "source prepare unreachable");
                return self
                    .abort_transaction(
                        record,
                        &[(Role::Source, &source)],
                        Fault::Unavailable,
                        started,
                    )
                    .await;
            }
        };
        record.source_vote = Some(Vote::Commit);

        // ── Phase 1b: PREPARE target ──
        let prepare_dst = self
            .prepare_call(&target, &tx_id, &req.ride_id, Role::Target, deadline)
            .await;
        match prepare_dst {
            Ok(PrepareResponse {
                vote: Vote::Commit, ..
            }) => {}
            Ok(resp) => {
                record.target_vote = Some(Vote::Abort);
                let fault = resp.reason.unwrap_or(Fault::Internal);
                return self
                    .abort_transaction(
                        record,
                        &[(Role::Source, &source), (Role::Target, &target)],
                        fault,
                        started,
                    )
                    .await;
            }
            Err(e) => {
                warn!(%tx_id, error = %e, "target prepare unreachable");
                return self
                    .abort_transaction(
                        record,
                        &[(Role::Source, &source), (Role::Target, &target)],
                        Fault::Unavailable,
                        started,
                    )
                    .await;
            }
        }

        // ── PREPARED on disk before any commit is issued ──
        record.mark_prepared(snapshot.clone());
        if let Err(e) = self.log.append(&record).await {
            error!(%tx_id, error = %e, "failed to log PREPARED");
            return self
                .abort_transaction(
                    record,
                    &[(Role::Source, &source), (Role::Target, &target)],
                    Fault::Internal,
                    started,
                )
                .await;
        }
        info!(%tx_id, "both participants voted COMMIT");

        // ── Phase 2a: COMMIT target (install before delete) ──
        if let Err(e) = self
            .commit_call(
                &target,
                &tx_id,
                &req.ride_id,
                Role::Target,
                Some(snapshot.clone()),
                deadline,
            )
            .await
        {
            return self.partial(record, "target commit failed", &e, started).await;
        }

        // ── Phase 2b: COMMIT source ──
        if let Err(e) = self
            .commit_call(&source, &tx_id, &req.ride_id, Role::Source, None, deadline)
            .await
        {
            // The target holds the ride; the source delete is pending.
            // A reader may briefly observe the ride in both regions.
            return self.partial(record, "source commit failed", &e, started).await;
        }

        // ── COMMITTED ──
        record.mark_committed();
        if let Err(e) = self.log.append(&record).await {
            error!(%tx_id, error = %e, "failed to log COMMITTED");
            return self
                .partial_logged(record, "terminal log write failed", started)
                .await;
        }

        self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        let response = respond_ok(tx_id.clone(), started);
        info!(%tx_id, latency_ms = response.latency_ms, "handoff committed");
        response
    }

    /// Abort path for failures before any commit was issued. The
    /// terminal `ABORTED` is written only after every engaged
    /// participant acknowledged the abort; otherwise the record stays
    /// non-terminal and recovery finishes the rollback.
    async fn abort_transaction(
        &self,
        mut record: TransactionRecord,
        engaged: &[(Role, &Arc<dyn ParticipantApi>)],
        fault: Fault,
        started: Instant,
    ) -> HandoffResponse {
        let deadline = Instant::now() + self.config.prepare_timeout();
        let mut all_acknowledged = true;

        for (role, participant) in engaged {
            let abort_req = AbortRequest {
                tx_id: record.tx_id.clone(),
                ride_id: record.ride_id.clone(),
                role: *role,
            };
            let result = with_retries(&self.retry, "abort", || {
                bounded(
                    step_timeout(self.config.prepare_timeout(), deadline),
                    participant.abort(&abort_req),
                )
            })
            .await;
            if let Err(e) = result {
                all_acknowledged = false;
                warn!(
                    tx_id = %record.tx_id,
                    role = %role,
                    error = %e,
                    "abort not acknowledged; recovery will finish the rollback"
                );
            }
        }

        if all_acknowledged {
            record.mark_aborted(fault.as_str());
            if let Err(e) = self.log.append(&record).await {
                error!(tx_id = %record.tx_id, error = %e, "failed to log ABORTED");
            }
        }

        self.counters.aborted.fetch_add(1, Ordering::Relaxed);
        warn!(tx_id = %record.tx_id, reason = %fault, "handoff aborted");
        respond(HandoffStatus::Aborted, Some(record.tx_id), fault, started)
    }

    /// Commit-phase failure: the record stays `PREPARED` (with the
    /// error noted) and recovery completes the transaction.
    async fn partial(
        &self,
        mut record: TransactionRecord,
        what: &str,
        err: &ApiError,
        started: Instant,
    ) -> HandoffResponse {
        record.error = Some(format!("{what}: {err}"));
        // Same-state rewrite; keeps the failure on the durable record.
        if let Err(e) = self.log.append(&record).await {
            warn!(tx_id = %record.tx_id, error = %e, "failed to note commit error on record");
        }
        self.partial_logged(record, what, started).await
    }

    async fn partial_logged(
        &self,
        record: TransactionRecord,
        what: &str,
        started: Instant,
    ) -> HandoffResponse {
        self.counters.partial.fetch_add(1, Ordering::Relaxed);
        warn!(tx_id = %record.tx_id, what, "handoff partial; recovery will complete it");
        respond(
            HandoffStatus::Partial,
            Some(record.tx_id),
            Fault::Partial,
            started,
        )
    }

    async fn prepare_call(
        &self,
        participant: &Arc<dyn ParticipantApi>,
        tx_id: &str,
        ride_id: &str,
        role: Role,
        deadline: Instant,
    ) -> Result<PrepareResponse, ApiError> {
        let req = PrepareRequest {
            tx_id: tx_id.to_string(),
            ride_id: ride_id.to_string(),
            role,
        };
        let per_call = self.config.prepare_timeout();
        with_retries(&self.retry, "prepare", || {
            bounded(step_timeout(per_call, deadline), participant.prepare(&req))
        })
        .await
    }

    async fn commit_call(
        &self,
        participant: &Arc<dyn ParticipantApi>,
        tx_id: &str,
        ride_id: &str,
        role: Role,
        ride: Option<Ride>,
        deadline: Instant,
    ) -> Result<(), ApiError> {
        let req = CommitRequest {
            tx_id: tx_id.to_string(),
            ride_id: ride_id.to_string(),
            role,
            ride,
        };
        let per_call = self.config.commit_timeout();
        with_retries(&self.retry, "commit", || {
            bounded(step_timeout(per_call, deadline), participant.commit(&req))
        })
        .await
        .map(|_| ())
    }
}

/// Remaining time before `deadline`, capped by the per-call budget.
fn step_timeout(per_call: Duration, deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now()).min(per_call)
}

#[allow(clippy::cast_precision_loss)]
fn latency_ms(started: Instant) -> f64 {
    (started.elapsed().as_micros() as f64 / 1000.0 * 100.0).round() / 100.0
}

fn respond(
    status: HandoffStatus,
    tx_id: Option<String>,
    fault: Fault,
    started: Instant,
) -> HandoffResponse {
    HandoffResponse {
        status,
        tx_id,
        latency_ms: latency_ms(started),
        reason: Some(fault.as_str().to_string()),
    }
}

fn respond_ok(tx_id: String, started: Instant) -> HandoffResponse {
    HandoffResponse {
        status: HandoffStatus::Success,
        tx_id: Some(tx_id),
        latency_ms: latency_ms(started),
        reason: None,
    }
}
