//! Coordinator service composition.
//!
//! Wires the participant registry, transaction log, health monitor,
//! buffer, 2PC engine, recovery, drainer, and query router into one
//! service with a startup/shutdown lifecycle:
//!
//! 1. recovery pass over the log (re-run until participants answer is
//!    the operator's job; each pass is idempotent);
//! 2. health monitor loop;
//! 3. drainer loop subscribed to health transitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use waypoint_core::api::{
    HandoffRequest, HandoffResponse, ParticipantApi, RegionStats, SearchRequest, SearchResponse,
    TransactionsResponse,
};
use waypoint_core::config::WaypointConfig;
use waypoint_core::error::ApiError;
use waypoint_storage::{FileTransactionLog, TransactionLog, TxLogError};

use crate::buffer::HandoffBuffer;
use crate::client::ParticipantSet;
use crate::counters::{CountersSnapshot, HandoffCounters};
use crate::drainer::BufferDrainer;
use crate::engine::HandoffEngine;
use crate::health::{HealthMonitor, RegionHealth};
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::router::{QueryRouter, RouterError};

/// The composed coordinator service.
pub struct Coordinator {
    config: WaypointConfig,
    participants: Arc<ParticipantSet>,
    log: Arc<dyn TransactionLog>,
    monitor: Arc<HealthMonitor>,
    buffer: Arc<HandoffBuffer>,
    counters: Arc<HandoffCounters>,
    engine: Arc<HandoffEngine>,
    recovery: RecoveryManager,
    drainer: Arc<BufferDrainer>,
    router: QueryRouter,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    /// Composes a coordinator from explicit collaborators.
    #[must_use]
    pub fn new(
        config: WaypointConfig,
        participants: Arc<ParticipantSet>,
        log: Arc<dyn TransactionLog>,
        replica: Option<Arc<dyn ParticipantApi>>,
    ) -> Arc<Self> {
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&participants),
            config.monitor.clone(),
        ));
        let buffer = Arc::new(HandoffBuffer::new(config.buffer.max_per_region));
        let counters = Arc::new(HandoffCounters::new());
        let engine = Arc::new(HandoffEngine::new(
            Arc::clone(&participants),
            Arc::clone(&log),
            Arc::clone(&monitor),
            Arc::clone(&buffer),
            Arc::clone(&counters),
            config.handoff.clone(),
        ));
        let recovery = RecoveryManager::new(
            Arc::clone(&participants),
            Arc::clone(&log),
            Arc::clone(&counters),
            config.handoff.clone(),
        );
        let drainer = Arc::new(BufferDrainer::new(
            Arc::clone(&engine),
            Arc::clone(&buffer),
            Arc::clone(&monitor),
            Arc::clone(&counters),
        ));
        let router = QueryRouter::new(
            Arc::clone(&participants),
            replica,
            Arc::clone(&monitor),
            config.query.clone(),
        );

        Arc::new(Self {
            config,
            participants,
            log,
            monitor,
            buffer,
            counters,
            engine,
            recovery,
            drainer,
            router,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Builds a production coordinator from configuration: HTTP
    /// participant clients and a durable file log.
    ///
    /// # Errors
    ///
    /// [`ApiError`] when HTTP clients cannot be built;
    /// [`TxLogError`](waypoint_storage::TxLogError) surfaces as
    /// [`ApiError::Unavailable`] when the log directory is unusable.
    pub fn from_config(config: WaypointConfig) -> Result<Arc<Self>, ApiError> {
        let call_timeout = config.handoff.prepare_timeout();
        let participants = Arc::new(ParticipantSet::from_urls(&config.regions, call_timeout)?);
        let log: Arc<dyn TransactionLog> = Arc::new(
            FileTransactionLog::open(&config.log_dir)
                .map_err(|e: TxLogError| ApiError::Unavailable(e.to_string()))?,
        );
        let replica: Option<Arc<dyn ParticipantApi>> = match &config.global_replica {
            Some(url) => Some(Arc::new(crate::client::HttpParticipantClient::new(
                "global-replica",
                url.clone(),
                config.query.per_call_timeout(),
            )?)),
            None => None,
        };
        Ok(Self::new(config, participants, log, replica))
    }

    /// Runs startup recovery and spawns the background loops.
    pub async fn start(self: &Arc<Self>) -> RecoveryReport {
        warn!("handoff buffer is in-memory: buffered entries are lost on coordinator crash");

        let report = self.recovery.recover().await;
        if report.unresolved > 0 {
            warn!(
                unresolved = report.unresolved,
                "some transactions could not be resolved; the next recovery pass will retry"
            );
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.drainer.spawn());
        tasks.push(self.monitor.spawn());
        info!(
            regions = self.participants.len(),
            "coordinator started"
        );
        report
    }

    /// Aborts the background loops.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("coordinator stopped");
    }

    /// Performs (or defers) one handoff.
    pub async fn handoff(&self, req: &HandoffRequest) -> HandoffResponse {
        self.engine.handoff(req).await
    }

    /// Executes one search.
    ///
    /// # Errors
    ///
    /// See [`QueryRouter::search`].
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse, RouterError> {
        self.router.search(req).await
    }

    /// Recent transaction records, newest first.
    ///
    /// # Errors
    ///
    /// [`TxLogError`](waypoint_storage::TxLogError) when the log cannot
    /// be read.
    pub async fn transactions(&self, limit: usize) -> Result<TransactionsResponse, TxLogError> {
        let transactions = self.log.recent(limit).await?;
        Ok(TransactionsResponse {
            total: transactions.len(),
            transactions,
        })
    }

    /// Health monitor snapshot.
    #[must_use]
    pub fn health_snapshot(&self) -> BTreeMap<String, RegionHealth> {
        self.monitor.snapshot()
    }

    /// Scatter-gather of regional statistics. Unreachable regions map
    /// to `None`.
    pub async fn stats_all(&self) -> BTreeMap<String, Option<RegionStats>> {
        let calls = self.participants.iter().map(|(region, participant)| {
            let region = region.clone();
            let participant = Arc::clone(participant);
            let timeout = self.config.query.per_call_timeout();
            async move {
                let stats = crate::retry::bounded(timeout, participant.stats()).await.ok();
                (region, stats)
            }
        });
        futures::future::join_all(calls).await.into_iter().collect()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Configured region names.
    #[must_use]
    pub fn regions(&self) -> Vec<String> {
        self.participants.regions()
    }

    /// Entries currently buffered across all targets.
    #[must_use]
    pub fn buffered_entries(&self) -> usize {
        self.buffer.total_len()
    }

    /// The health monitor (for manual probe rounds in tests and the
    /// drainer wiring).
    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// The drainer (for manual drain cycles in tests).
    #[must_use]
    pub fn drainer(&self) -> &Arc<BufferDrainer> {
        &self.drainer
    }

    /// Runs one recovery pass on demand.
    pub async fn recover(&self) -> RecoveryReport {
        self.recovery.recover().await
    }
}
