// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Scan Runner
 * Drives one reconnaissance scan: pages the discovery source, filters and
 * scores candidates, persists items, publishes live events and hands the
 * finished session to the deduplicator
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::broadcast::{JobRegistry, StopHandle};
use crate::discovery::{CandidateMeta, DiscoverySource};
use crate::errors::{HunterResult, SourceError};
use crate::fingerprint::fingerprint;
use crate::scoring::Scorer;
use crate::store::SessionStore;
use crate::types::{AnalysisStatus, JobEvent, ScanConfig, ScanItem, ScanStatus};

/// Packages untouched for this many days count as abandoned.
const ABANDONED_DAYS: u32 = 730;
/// Base backoff between transient page retries.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct ScanRunner {
    store: Arc<SessionStore>,
    registry: Arc<JobRegistry>,
    source: Arc<dyn DiscoverySource>,
    scorer: Arc<dyn Scorer>,
    /// Attempts per page before the page is skipped.
    page_retries: u32,
}

impl ScanRunner {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<JobRegistry>,
        source: Arc<dyn DiscoverySource>,
        scorer: Arc<dyn Scorer>,
        page_retries: u32,
    ) -> Self {
        Self {
            store,
            registry,
            source,
            scorer,
            page_retries: page_retries.max(1),
        }
    }

    /// Create a session and spawn its scan task. Returns as soon as the
    /// session is accepted; progress flows through the broadcaster and the
    /// store, never through this call.
    pub async fn start(self: &Arc<Self>, config: ScanConfig) -> HunterResult<u64> {
        let session_id = self.store.create_session(config.clone()).await?;
        let stop = self.registry.begin_scan(session_id)?;

        info!("Starting scan session {}", session_id);
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run(session_id, config, stop).await;
            runner.registry.end_scan(session_id);
            runner.registry.release(session_id);
        });
        Ok(session_id)
    }

    /// Signal a running scan to stop at the next page boundary.
    pub fn stop(&self, session_id: u64) -> bool {
        self.registry.stop_scan(session_id)
    }

    pub fn is_running(&self, session_id: u64) -> bool {
        self.registry.scan_running(session_id)
    }

    async fn run(&self, session_id: u64, config: ScanConfig, stop: StopHandle) {
        if let Err(err) = self
            .store
            .update_status(session_id, ScanStatus::Running, None)
            .await
        {
            error!("Session {} could not enter Running: {}", session_id, err);
            return;
        }
        self.registry.publish(session_id, JobEvent::Start { session_id });

        let mut found: u64 = 0;
        let mut stopped = false;

        'pages: for page in 1..=config.pages {
            if stop.is_stopped() {
                stopped = true;
                break;
            }

            let batch = match self.fetch_with_retries(&config, page).await {
                Ok(batch) => batch,
                Err(SourceError::Fatal { reason }) => {
                    self.fail(session_id, format!("discovery failed: {reason}")).await;
                    return;
                }
                // Retries exhausted on a transient error: skip the page.
                Err(err) => {
                    warn!("Session {} skipping page {}: {}", session_id, page, err);
                    self.publish_progress(session_id, page, config.pages);
                    continue;
                }
            };

            // Catalog exhausted before the page bound.
            if batch.is_empty() {
                break;
            }

            for candidate in batch {
                if config.limit > 0 && found >= u64::from(config.limit) {
                    break 'pages;
                }
                if let Some(item) = self.admit(session_id, &config, candidate) {
                    match self.store.save_item(item).await {
                        Ok(stored) => {
                            found += 1;
                            self.registry.publish(
                                session_id,
                                JobEvent::Result {
                                    item: Box::new(stored),
                                    found_count: found,
                                },
                            );
                        }
                        Err(err) => {
                            self.fail(session_id, format!("store write failed: {err}")).await;
                            return;
                        }
                    }
                }
            }

            self.publish_progress(session_id, page, config.pages);
        }

        if stopped {
            info!("Session {} stopped by user", session_id);
            self.fail(session_id, "stopped by user".to_string()).await;
            return;
        }

        self.finalize(session_id, &config).await;
    }

    /// Filter and score one candidate. Returns the item to persist, or None
    /// when any config gate rejects it.
    fn admit(
        &self,
        session_id: u64,
        config: &ScanConfig,
        candidate: CandidateMeta,
    ) -> Option<ScanItem> {
        if candidate.active_installs < config.min_installs {
            return None;
        }
        if config.max_installs > 0 && candidate.active_installs > config.max_installs {
            return None;
        }

        let days = candidate.days_since_update(Utc::now());
        if days < config.min_days {
            return None;
        }
        if config.max_days > 0 && days > config.max_days {
            return None;
        }
        if config.abandoned && days < ABANDONED_DAYS {
            return None;
        }

        let eval = self.scorer.evaluate(&candidate, days);
        if config.smart && !eval.is_risky_category {
            return None;
        }
        if config.user_facing && !eval.is_user_facing {
            return None;
        }
        if eval.score < config.min_score {
            return None;
        }

        Some(ScanItem {
            session_id,
            slug: candidate.slug,
            name: candidate.name,
            version: candidate.version,
            score: eval.score,
            installations: candidate.active_installs,
            days_since_update: days,
            tested_wp_version: candidate.tested,
            author_trusted: eval.author_trusted,
            is_risky_category: eval.is_risky_category,
            is_user_facing: eval.is_user_facing,
            is_duplicate: false,
            risk_tags: eval.risk_tags,
            security_flags: eval.security_flags,
            feature_flags: eval.feature_flags,
            download_link: candidate.download_link,
            analysis: AnalysisStatus::None,
            findings: None,
        })
    }

    async fn fetch_with_retries(
        &self,
        config: &ScanConfig,
        page: u32,
    ) -> Result<Vec<CandidateMeta>, SourceError> {
        let mut last_err = None;
        for attempt in 1..=self.page_retries {
            match self.source.fetch_page(config, page).await {
                Ok(batch) => return Ok(batch),
                Err(err) if err.is_retryable() && attempt < self.page_retries => {
                    let delay = match &err {
                        SourceError::RateLimited { .. } => err.retry_delay(),
                        _ => RETRY_BACKOFF * attempt,
                    };
                    warn!(
                        "Page {} attempt {}/{} failed ({}), retrying in {:?}",
                        page, attempt, self.page_retries, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err @ SourceError::Fatal { .. }) => return Err(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(SourceError::Fatal {
            reason: "retry loop exhausted without an error".into(),
        }))
    }

    fn publish_progress(&self, session_id: u64, page: u32, total: u32) {
        let percent = if total == 0 { 100 } else { (page * 100) / total };
        self.registry.publish(
            session_id,
            JobEvent::Progress {
                current: page,
                total,
                percent,
            },
        );
    }

    /// Completion path: fingerprint the result set, then either merge into
    /// an earlier equivalent session or declare this one completed.
    async fn finalize(&self, session_id: u64, config: &ScanConfig) {
        let items = match self.store.items(session_id).await {
            Ok(items) => items,
            Err(err) => {
                self.fail(session_id, format!("store read failed: {err}")).await;
                return;
            }
        };
        let fp = fingerprint(config, &items);

        let result: HunterResult<()> = async {
            self.store
                .update_status(session_id, ScanStatus::Completed, None)
                .await?;
            self.store.set_fingerprint(session_id, fp.clone()).await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            error!("Session {} completion bookkeeping failed: {}", session_id, err);
            return;
        }

        // Lookup and merge happen in one store operation; doing them as two
        // calls lets concurrently completing twins merge into each other.
        match self.store.merge_into_earliest(session_id).await {
            Ok(Some(canonical)) => {
                info!(
                    "[SUCCESS] Session {} deduplicated into session {}",
                    session_id, canonical
                );
                self.registry.publish(
                    session_id,
                    JobEvent::Deduplicated {
                        original_session_id: canonical,
                        message: format!(
                            "identical scan already completed as session {canonical}"
                        ),
                    },
                );
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!("Session {} merge failed: {}", session_id, err);
                return;
            }
        }

        match self.store.session(session_id).await {
            Ok(session) => {
                info!(
                    "[SUCCESS] Session {} completed: {} found, {} high risk",
                    session_id, session.total_found, session.high_risk_count
                );
                self.registry.publish(
                    session_id,
                    JobEvent::Complete {
                        session_id,
                        total_found: session.total_found,
                        high_risk_count: session.high_risk_count,
                    },
                );
            }
            Err(err) => error!("Session {} vanished at completion: {}", session_id, err),
        }
    }

    async fn fail(&self, session_id: u64, message: String) {
        if let Err(err) = self
            .store
            .update_status(session_id, ScanStatus::Failed, Some(message.clone()))
            .await
        {
            error!("Session {} could not enter Failed: {}", session_id, err);
        }
        self.registry.publish(session_id, JobEvent::Error { message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::HeuristicScorer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted source: one fixed batch per page, empty past the script.
    struct ScriptedSource {
        pages: Vec<Vec<CandidateMeta>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<CandidateMeta>>) -> Self {
            Self {
                pages,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DiscoverySource for ScriptedSource {
        async fn fetch_page(
            &self,
            _config: &ScanConfig,
            page: u32,
        ) -> Result<Vec<CandidateMeta>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .pages
                .get((page - 1) as usize)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct FlakySource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DiscoverySource for FlakySource {
        async fn fetch_page(
            &self,
            _config: &ScanConfig,
            page: u32,
        ) -> Result<Vec<CandidateMeta>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Err(SourceError::Transient {
                    page,
                    reason: "connection reset".into(),
                })
            } else {
                Ok(vec![candidate("alpha", 5000, 10)])
            }
        }
    }

    fn candidate(slug: &str, installs: u64, days_ago: i64) -> CandidateMeta {
        CandidateMeta {
            slug: slug.into(),
            name: slug.into(),
            version: "1.0".into(),
            active_installs: installs,
            last_updated: Some(Utc::now() - chrono::Duration::days(days_ago)),
            tested: "6.7".into(),
            rating: 90,
            support_threads: 10,
            support_threads_resolved: 9,
            ..Default::default()
        }
    }

    fn runner(source: Arc<dyn DiscoverySource>) -> Arc<ScanRunner> {
        Arc::new(ScanRunner::new(
            Arc::new(SessionStore::in_memory()),
            Arc::new(JobRegistry::new()),
            source,
            Arc::new(HeuristicScorer),
            3,
        ))
    }

    async fn wait_terminal(runner: &ScanRunner, id: u64) -> ScanStatus {
        for _ in 0..200 {
            let session = runner.store.session(id).await.unwrap();
            if session.status.is_terminal() {
                return session.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_scan_persists_admitted_items() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            candidate("alpha", 5000, 10),
            candidate("below-min-installs", 10, 10),
        ]]));
        let runner = runner(source);
        let config = ScanConfig {
            pages: 1,
            ..Default::default()
        };

        let id = runner.start(config).await.unwrap();
        assert_eq!(wait_terminal(&runner, id).await, ScanStatus::Completed);

        let items = runner.store.items(id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].slug, "alpha");
        let session = runner.store.session(id).await.unwrap();
        assert_eq!(session.total_found, 1);
        assert!(session.fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_empty_page_ends_discovery_early() {
        let source = Arc::new(ScriptedSource::new(vec![
            vec![candidate("alpha", 5000, 10)],
            vec![],
            vec![candidate("never-reached", 5000, 10)],
        ]));
        let runner = runner(source.clone());
        let config = ScanConfig {
            pages: 10,
            ..Default::default()
        };

        let id = runner.start(config).await.unwrap();
        wait_terminal(&runner, id).await;

        // Pages 1 and 2 fetched; the empty page 2 stops paging.
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.store.items(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_page_error_is_retried() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
        });
        let runner = runner(source);
        let config = ScanConfig {
            pages: 1,
            ..Default::default()
        };

        let id = runner.start(config).await.unwrap();
        assert_eq!(wait_terminal(&runner, id).await, ScanStatus::Completed);
        assert_eq!(runner.store.items(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_result_limit_is_honored() {
        let batch: Vec<CandidateMeta> = (0..20)
            .map(|i| candidate(&format!("plugin-{i}"), 5000, 10))
            .collect();
        let source = Arc::new(ScriptedSource::new(vec![batch]));
        let runner = runner(source);
        let config = ScanConfig {
            pages: 1,
            limit: 3,
            ..Default::default()
        };

        let id = runner.start(config).await.unwrap();
        wait_terminal(&runner, id).await;
        assert_eq!(runner.store.items(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_identical_rescan_merges_into_first() {
        let pages = vec![vec![candidate("alpha", 5000, 10), candidate("beta", 9000, 10)]];
        let source = Arc::new(ScriptedSource::new(pages));
        let runner = runner(source);
        let config = ScanConfig {
            pages: 1,
            ..Default::default()
        };

        let first = runner.start(config.clone()).await.unwrap();
        assert_eq!(wait_terminal(&runner, first).await, ScanStatus::Completed);

        let second = runner.start(config).await.unwrap();
        assert_eq!(wait_terminal(&runner, second).await, ScanStatus::Merged);

        let merged = runner.store.session(second).await.unwrap();
        assert_eq!(merged.merged_into, Some(first));
        // Canonical session is untouched and keeps its items.
        let canonical = runner.store.session(first).await.unwrap();
        assert_eq!(canonical.status, ScanStatus::Completed);
        assert_eq!(runner.store.items(first).await.unwrap().len(), 2);
        // Item reads on the merged session redirect to the canonical one.
        assert_eq!(runner.store.items(second).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_gate_filters_recent_packages() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            candidate("fresh", 5000, 30),
            candidate("stale", 5000, 800),
        ]]));
        let runner = runner(source);
        let config = ScanConfig {
            pages: 1,
            abandoned: true,
            ..Default::default()
        };

        let id = runner.start(config).await.unwrap();
        wait_terminal(&runner, id).await;

        let items = runner.store.items(id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].slug, "stale");
    }
}
