// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Session Store
 * Durable keyed storage for scan sessions, discovered items and bulk
 * analysis records, persisted as a single JSON state file
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{HunterError, HunterResult, StoreError};
use crate::types::{
    AnalysisStatus, BulkAnalysisRecord, FindingsSummary, ScanConfig, ScanItem, ScanSession,
    ScanStatus, HIGH_RISK_THRESHOLD,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_session_id: u64,
    sessions: BTreeMap<u64, ScanSession>,
    /// Items per session in discovery order; bulk analysis walks this order
    /// so resumed runs make monotonic forward progress.
    items: BTreeMap<u64, Vec<ScanItem>>,
    bulk: BTreeMap<u64, BulkAnalysisRecord>,
}

/// Session store. All reads return cloned snapshots, never views into
/// partially-updated state; all writes are serialized behind the lock and
/// flushed to disk before the call returns.
pub struct SessionStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Volatile store for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState {
                next_session_id: 1,
                ..Default::default()
            }),
            path: None,
        }
    }

    /// Open (or create) the store backed by `path`. Bulk records left with
    /// `running = true` by a crashed process are reconciled to paused: no
    /// live worker can exist for them, and their counts let a later launch
    /// resume where the crash interrupted.
    pub async fn open(path: PathBuf) -> HunterResult<Self> {
        let mut state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::from)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreState {
                next_session_id: 1,
                ..Default::default()
            },
            Err(err) => return Err(StoreError::from(err).into()),
        };

        let mut reconciled = 0usize;
        for record in state.bulk.values_mut() {
            if record.running {
                record.running = false;
                reconciled += 1;
            }
        }
        if reconciled > 0 {
            warn!(
                "Reconciled {} orphaned bulk analysis record(s) to paused",
                reconciled
            );
        }

        info!(
            "Session store opened: {} session(s), path={:?}",
            state.sessions.len(),
            path
        );

        let store = Self {
            state: RwLock::new(state),
            path: Some(path),
        };
        if reconciled > 0 {
            store.flush(&*store.state.read().await).await?;
        }
        Ok(store)
    }

    /// Atomic replace: write a temp file in the same directory, then rename
    /// over the state file.
    async fn flush(&self, state: &StoreState) -> HunterResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(state).map_err(StoreError::from)?;
        let path = path.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(dir)?;
            let tmp = tempfile::NamedTempFile::new_in(dir)?;
            std::io::Write::write_all(&mut tmp.as_file(), &bytes)?;
            tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })
        .await;
        match result {
            Ok(inner) => inner.map_err(Into::into),
            Err(join_err) => Err(HunterError::Config(format!(
                "store flush task failed: {join_err}"
            ))),
        }
    }

    pub async fn create_session(&self, config: ScanConfig) -> HunterResult<u64> {
        let mut state = self.state.write().await;
        let id = state.next_session_id;
        state.next_session_id += 1;
        state.sessions.insert(id, ScanSession::new(id, config));
        state.items.insert(id, Vec::new());
        self.flush(&state).await?;
        debug!("Created scan session {}", id);
        Ok(id)
    }

    pub async fn session(&self, id: u64) -> HunterResult<ScanSession> {
        self.state
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| HunterError::NotFound(format!("scan session {id}")))
    }

    /// All sessions, most recent first.
    pub async fn sessions(&self, limit: usize) -> Vec<ScanSession> {
        let state = self.state.read().await;
        state
            .sessions
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// FSM-checked status transition. Illegal transitions are rejected, so a
    /// session can never e.g. fail after it merged.
    pub async fn update_status(
        &self,
        id: u64,
        status: ScanStatus,
        error_message: Option<String>,
    ) -> HunterResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {id}")))?;
        session.status = session.status.transition_to(status)?;
        if error_message.is_some() {
            session.error_message = error_message;
        }
        self.flush(&state).await
    }

    /// Persist a discovered item. Bumps the owning session's counters in the
    /// same write so `total_found == count(items)` holds at every observable
    /// point, and flags the item when its slug was already discovered by an
    /// earlier session. Returns the item as stored.
    pub async fn save_item(&self, mut item: ScanItem) -> HunterResult<ScanItem> {
        let mut state = self.state.write().await;
        let session_id = item.session_id;
        if !state.sessions.contains_key(&session_id) {
            return Err(HunterError::NotFound(format!("scan session {session_id}")));
        }

        item.is_duplicate = state
            .items
            .iter()
            .any(|(sid, items)| *sid != session_id && items.iter().any(|i| i.slug == item.slug));

        let high_risk = item.score >= HIGH_RISK_THRESHOLD;
        let stored = item.clone();
        state.items.entry(session_id).or_default().push(item);

        let session = state
            .sessions
            .get_mut(&session_id)
            .expect("session presence checked above");
        session.total_found += 1;
        if high_risk {
            session.high_risk_count += 1;
        }
        self.flush(&state).await?;
        Ok(stored)
    }

    /// Items of a session in discovery order. Reads on a merged session are
    /// redirected to the canonical session it merged into.
    pub async fn items(&self, session_id: u64) -> HunterResult<Vec<ScanItem>> {
        let state = self.state.read().await;
        let session = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {session_id}")))?;

        let effective_id = match (session.status, session.merged_into) {
            (ScanStatus::Merged, Some(canonical)) => canonical,
            _ => session_id,
        };
        Ok(state.items.get(&effective_id).cloned().unwrap_or_default())
    }

    /// Delete a session, cascading to its items and bulk analysis record.
    pub async fn delete_session(&self, id: u64) -> HunterResult<bool> {
        let mut state = self.state.write().await;
        let existed = state.sessions.remove(&id).is_some();
        state.items.remove(&id);
        state.bulk.remove(&id);
        if existed {
            self.flush(&state).await?;
        }
        Ok(existed)
    }

    /// Record the session's fingerprint. Set exactly once.
    pub async fn set_fingerprint(&self, id: u64, fingerprint: String) -> HunterResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {id}")))?;
        if session.fingerprint.is_some() {
            return Err(HunterError::Config(format!(
                "fingerprint already set for session {id}"
            )));
        }
        session.fingerprint = Some(fingerprint);
        self.flush(&state).await
    }

    /// Shared merge mutation. The canonical session must itself be
    /// `Completed`: merging into a session that already merged away (or
    /// failed) would strand item reads behind a dangling redirect.
    fn merge_locked(state: &mut StoreState, id: u64, canonical: u64) -> HunterResult<()> {
        let canonical_status = state
            .sessions
            .get(&canonical)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {canonical}")))?
            .status;
        if canonical_status != ScanStatus::Completed {
            return Err(HunterError::Config(format!(
                "canonical session {canonical} is not completed"
            )));
        }
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {id}")))?;
        session.status = session.status.transition_to(ScanStatus::Merged)?;
        session.merged_into = Some(canonical);
        state.items.remove(&id);
        state.bulk.remove(&id);
        Ok(())
    }

    /// Dedup step for a freshly completed session: find the earliest other
    /// `Completed` session with the same fingerprint and merge into it,
    /// under one write lock. A split lookup and merge would let two
    /// identical sessions completing at the same time each observe the
    /// other `Completed` and both merge, leaving a redirect cycle with
    /// every item unreachable. Only a newer session merges into an older
    /// one; the oldest equivalent run always stays canonical. Returns the
    /// canonical session id when a merge happened.
    pub async fn merge_into_earliest(&self, id: u64) -> HunterResult<Option<u64>> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get(&id)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {id}")))?;
        if session.status != ScanStatus::Completed {
            return Ok(None);
        }
        let Some(fp) = session.fingerprint.clone() else {
            return Ok(None);
        };

        let earliest = state
            .sessions
            .values()
            .filter(|s| {
                s.id != id
                    && s.status == ScanStatus::Completed
                    && s.fingerprint.as_deref() == Some(fp.as_str())
            })
            .map(|s| s.id)
            .min();
        let Some(canonical) = earliest.filter(|canonical| *canonical < id) else {
            return Ok(None);
        };

        Self::merge_locked(&mut state, id, canonical)?;
        self.flush(&state).await?;
        Ok(Some(canonical))
    }

    /// Merge `id` into `canonical`: pointer operation only. The merged
    /// session's items leave independent history; the canonical session's
    /// counters are left untouched.
    pub async fn mark_merged(&self, id: u64, canonical: u64) -> HunterResult<()> {
        let mut state = self.state.write().await;
        Self::merge_locked(&mut state, id, canonical)?;
        self.flush(&state).await
    }

    /// Queue a session's items for analysis: every item that has not
    /// completed analysis (including previously failed ones) moves to
    /// `Pending` in one write. Returns the refreshed item list in
    /// discovery order.
    pub async fn mark_items_pending(&self, session_id: u64) -> HunterResult<Vec<ScanItem>> {
        let mut state = self.state.write().await;
        let items = state
            .items
            .get_mut(&session_id)
            .ok_or_else(|| HunterError::NotFound(format!("scan session {session_id}")))?;
        for item in items.iter_mut() {
            if !item.analysis.is_completed() {
                item.analysis = AnalysisStatus::Pending;
            }
        }
        let snapshot = items.clone();
        self.flush(&state).await?;
        Ok(snapshot)
    }

    /// Update one item's static-analysis sub-status. This is the only
    /// mutation allowed on an item after discovery.
    pub async fn update_item_analysis(
        &self,
        session_id: u64,
        slug: &str,
        analysis: AnalysisStatus,
        findings: Option<FindingsSummary>,
    ) -> HunterResult<()> {
        let mut state = self.state.write().await;
        let item = state
            .items
            .get_mut(&session_id)
            .and_then(|items| items.iter_mut().find(|i| i.slug == slug))
            .ok_or_else(|| {
                HunterError::NotFound(format!("item {slug} in session {session_id}"))
            })?;
        item.analysis = analysis;
        if findings.is_some() {
            item.findings = findings;
        }
        self.flush(&state).await
    }

    /// Point-in-time bulk analysis snapshot. All zeros before the first
    /// launch so the stats surface is always queryable.
    pub async fn bulk_record(&self, session_id: u64) -> BulkAnalysisRecord {
        let state = self.state.read().await;
        state.bulk.get(&session_id).cloned().unwrap_or_else(|| {
            BulkAnalysisRecord {
                session_id,
                ..Default::default()
            }
        })
    }

    pub async fn upsert_bulk_record(&self, record: BulkAnalysisRecord) -> HunterResult<()> {
        let mut state = self.state.write().await;
        state.bulk.insert(record.session_id, record);
        self.flush(&state).await
    }
}
