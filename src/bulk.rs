// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Bulk Analysis Orchestrator
 * Runs the static-analysis engine across every discovered item of a session
 * through a bounded worker pool, with pause/resume, per-item timeouts and
 * coalesced live progress aggregation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::analysis::AnalysisEngine;
use crate::broadcast::{JobRegistry, StopHandle};
use crate::config::RulesConfig;
use crate::errors::{EngineError, HunterError, HunterResult};
use crate::store::SessionStore;
use crate::types::{
    AnalysisStatus, BulkAnalysisRecord, FindingsSummary, JobEvent, ScanItem,
};

/// Minimum interval between intermediate bulk_progress events. The final
/// update of a run is always delivered regardless.
const PROGRESS_COALESCE: Duration = Duration::from_millis(250);

/// Per-item counters shared between the driver and its workers. Deltas are
/// atomic; the driver snapshots them into the store after every item.
#[derive(Default)]
struct Progress {
    scanned: AtomicU64,
    total_findings: AtomicU64,
    errors: AtomicU64,
    warnings: AtomicU64,
    info: AtomicU64,
}

impl Progress {
    fn from_record(record: &BulkAnalysisRecord) -> Self {
        Self {
            scanned: AtomicU64::new(record.scanned),
            total_findings: AtomicU64::new(record.total_findings),
            errors: AtomicU64::new(record.breakdown.errors),
            warnings: AtomicU64::new(record.breakdown.warnings),
            info: AtomicU64::new(record.breakdown.info),
        }
    }

    fn snapshot(&self, session_id: u64, total_items: u64, running: bool) -> BulkAnalysisRecord {
        let errors = self.errors.load(Ordering::SeqCst);
        let warnings = self.warnings.load(Ordering::SeqCst);
        let info = self.info.load(Ordering::SeqCst);
        BulkAnalysisRecord {
            session_id,
            total_items,
            scanned: self.scanned.load(Ordering::SeqCst),
            total_findings: self.total_findings.load(Ordering::SeqCst),
            breakdown: FindingsSummary {
                total: errors + warnings + info,
                errors,
                warnings,
                info,
            },
            running,
        }
    }
}

enum ItemOutcome {
    /// Worker skipped the item because a stop was requested first.
    Skipped,
    Analyzed {
        slug: String,
        result: Result<FindingsSummary, EngineError>,
    },
}

pub struct BulkAnalysisOrchestrator {
    store: Arc<SessionStore>,
    registry: Arc<JobRegistry>,
    engine: Arc<dyn AnalysisEngine>,
    rules: Arc<RulesConfig>,
    concurrency: usize,
    item_timeout: Duration,
}

impl BulkAnalysisOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<JobRegistry>,
        engine: Arc<dyn AnalysisEngine>,
        rules: Arc<RulesConfig>,
        concurrency: usize,
        item_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            rules,
            concurrency: concurrency.max(1),
            item_timeout,
        }
    }

    /// Accept or reject a bulk analysis launch for a session. Acceptance
    /// spawns the driver; everything past this point surfaces through the
    /// bulk record and bulk_progress events, not through this call.
    pub async fn launch(self: &Arc<Self>, session_id: u64) -> HunterResult<()> {
        let session = self.store.session(session_id).await?;
        if let Some(canonical) = session.merged_into {
            return Err(HunterError::Config(format!(
                "session {session_id} merged into session {canonical}; analyze that one"
            )));
        }
        let items = self.store.items(session_id).await?;
        if items.is_empty() {
            return Err(HunterError::Config(format!(
                "session {session_id} has no items to analyze"
            )));
        }
        if !self.rules.has_enabled_rules() {
            return Err(HunterError::Config(
                "no analysis rules are enabled".to_string(),
            ));
        }

        let stop = self.registry.begin_bulk(session_id)?;

        // Reuse the existing record so a resumed run keeps its counts; only
        // the item total is refreshed to the current result set.
        let mut record = self.store.bulk_record(session_id).await;
        record.total_items = items.len() as u64;
        record.running = true;
        if let Err(err) = self.store.upsert_bulk_record(record.clone()).await {
            self.registry.end_bulk(session_id);
            return Err(err);
        }

        // Everything not yet completed is queued now, so the pending state
        // is observable from the moment the launch is accepted.
        let items = match self.store.mark_items_pending(session_id).await {
            Ok(items) => items,
            Err(err) => {
                self.registry.end_bulk(session_id);
                return Err(err);
            }
        };

        let pending = items
            .iter()
            .filter(|item| !item.analysis.is_completed())
            .count();
        info!(
            "Bulk analysis launched for session {}: {} item(s), {} pending",
            session_id,
            items.len(),
            pending
        );

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.drive(session_id, items, record, stop).await;
            orchestrator.registry.end_bulk(session_id);
            orchestrator.registry.release(session_id);
        });
        Ok(())
    }

    /// Signal the running worker set to pause. In-flight items finish, no
    /// new items are dequeued, counts are retained.
    pub fn stop(&self, session_id: u64) -> HunterResult<()> {
        if self.registry.stop_bulk(session_id) {
            info!("Bulk analysis stop requested for session {}", session_id);
            Ok(())
        } else {
            Err(HunterError::ConcurrencyConflict(format!(
                "no bulk analysis running for session {session_id}"
            )))
        }
    }

    /// Point-in-time progress snapshot; all zeros before the first launch.
    pub async fn stats(&self, session_id: u64) -> BulkAnalysisRecord {
        self.store.bulk_record(session_id).await
    }

    async fn drive(
        &self,
        session_id: u64,
        items: Vec<ScanItem>,
        record: BulkAnalysisRecord,
        stop: StopHandle,
    ) {
        let total_items = record.total_items;
        let progress = Arc::new(Progress::from_record(&record));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for item in items {
            // Items already analyzed in a previous run are never re-queued.
            if item.analysis.is_completed() {
                continue;
            }
            let engine = Arc::clone(&self.engine);
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let stop = stop.clone();
            let timeout = self.item_timeout;

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return ItemOutcome::Skipped;
                };
                if stop.is_stopped() {
                    return ItemOutcome::Skipped;
                }

                let slug = item.slug.clone();
                if let Err(err) = store
                    .update_item_analysis(item.session_id, &slug, AnalysisStatus::Running, None)
                    .await
                {
                    warn!("Item {} could not enter Running: {}", slug, err);
                }

                let result = match tokio::time::timeout(timeout, engine.analyze(&item)).await {
                    Ok(Ok(findings)) => {
                        let mut summary = FindingsSummary::default();
                        for finding in &findings {
                            summary.add(finding.severity);
                        }
                        Ok(summary)
                    }
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(EngineError::Timeout(timeout)),
                };
                ItemOutcome::Analyzed { slug, result }
            });
        }

        let mut last_publish: Option<tokio::time::Instant> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("Bulk worker for session {} panicked: {}", session_id, err);
                    continue;
                }
            };
            let ItemOutcome::Analyzed { slug, result } = outcome else {
                continue;
            };

            match result {
                Ok(summary) => {
                    progress.scanned.fetch_add(1, Ordering::SeqCst);
                    progress
                        .total_findings
                        .fetch_add(summary.total, Ordering::SeqCst);
                    progress.errors.fetch_add(summary.errors, Ordering::SeqCst);
                    progress
                        .warnings
                        .fetch_add(summary.warnings, Ordering::SeqCst);
                    progress.info.fetch_add(summary.info, Ordering::SeqCst);
                    if let Err(err) = self
                        .store
                        .update_item_analysis(
                            session_id,
                            &slug,
                            AnalysisStatus::Completed,
                            Some(summary),
                        )
                        .await
                    {
                        error!("Item {} completion not persisted: {}", slug, err);
                    }
                }
                // Item failure never aborts the run.
                Err(engine_err) => {
                    progress.scanned.fetch_add(1, Ordering::SeqCst);
                    warn!("Analysis of {} failed: {}", slug, engine_err);
                    if let Err(err) = self
                        .store
                        .update_item_analysis(
                            session_id,
                            &slug,
                            AnalysisStatus::Failed {
                                reason: engine_err.to_string(),
                            },
                            None,
                        )
                        .await
                    {
                        error!("Item {} failure not persisted: {}", slug, err);
                    }
                }
            }

            let snapshot = progress.snapshot(session_id, total_items, true);
            if let Err(err) = self.store.upsert_bulk_record(snapshot.clone()).await {
                error!("Bulk record for session {} not persisted: {}", session_id, err);
            }

            let due = last_publish
                .map(|at| at.elapsed() >= PROGRESS_COALESCE)
                .unwrap_or(true);
            if due {
                last_publish = Some(tokio::time::Instant::now());
                self.publish_progress(&snapshot);
            }
        }

        // Final update: persisted and published unconditionally.
        let paused = stop.is_stopped();
        let snapshot = progress.snapshot(session_id, total_items, false);
        if let Err(err) = self.store.upsert_bulk_record(snapshot.clone()).await {
            error!("Final bulk record for session {} not persisted: {}", session_id, err);
        }
        self.publish_progress(&snapshot);

        if paused {
            info!(
                "Bulk analysis for session {} paused at {}/{}",
                session_id, snapshot.scanned, snapshot.total_items
            );
        } else {
            info!(
                "[SUCCESS] Bulk analysis for session {} finished: {}/{} scanned, {} findings",
                session_id, snapshot.scanned, snapshot.total_items, snapshot.total_findings
            );
        }
    }

    fn publish_progress(&self, record: &BulkAnalysisRecord) {
        self.registry.publish(
            record.session_id,
            JobEvent::BulkProgress {
                session_id: record.session_id,
                scanned: record.scanned,
                total_items: record.total_items,
                total_findings: record.total_findings,
                breakdown: record.breakdown,
                running: record.running,
            },
        );
    }
}
