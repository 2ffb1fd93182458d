// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Core Data Model
 * Scan sessions, discovered items, bulk analysis records and job events
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{HunterError, HunterResult};

/// Risk score at or above this value counts as high risk.
pub const HIGH_RISK_THRESHOLD: u8 = 50;

/// Catalog sort order used when paging the discovery source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    New,
    #[default]
    Updated,
    Popular,
}

/// Immutable scan parameters. Used verbatim in fingerprinting; defaults are
/// normalized here so two configs that differ only in omitted fields hash
/// identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hard bound on pages fetched from the catalog.
    pub pages: u32,
    /// Stop after this many results (0 = unlimited).
    pub limit: u32,
    pub min_installs: u64,
    /// 0 = no upper bound.
    pub max_installs: u64,
    pub sort: SortOrder,
    /// Only keep packages matching a risky category tag.
    pub smart: bool,
    /// Only keep packages untouched for two years or more.
    pub abandoned: bool,
    /// Only keep packages with user-facing functionality.
    pub user_facing: bool,
    /// Scan the theme catalog instead of plugins.
    pub themes: bool,
    pub min_days: u32,
    pub max_days: u32,
    pub min_score: u8,
    pub aggressive: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pages: 5,
            limit: 0,
            min_installs: 1000,
            max_installs: 0,
            sort: SortOrder::Updated,
            smart: false,
            abandoned: false,
            user_facing: false,
            themes: false,
            min_days: 0,
            max_days: 0,
            min_score: 0,
            aggressive: false,
        }
    }
}

impl ScanConfig {
    /// Abandoned-mode auto-expansion, applied by the caller before the
    /// runner sees the config (the runner treats `pages` as a hard bound).
    pub fn normalized_for_abandoned(mut self) -> Self {
        if self.abandoned && self.sort == SortOrder::Updated {
            self.sort = SortOrder::Popular;
        }
        if self.abandoned && self.pages == 5 {
            self.pages = 100;
        }
        self
    }
}

/// Scan session lifecycle. Terminal states are Completed, Failed and Merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Merged,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Merged)
    }

    /// Legal FSM edges. Merged is only reachable from Completed because the
    /// deduplicator runs after a scan finishes successfully.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, ScanStatus::Running)
                | (Self::Pending, ScanStatus::Failed)
                | (Self::Running, ScanStatus::Completed)
                | (Self::Running, ScanStatus::Failed)
                | (Self::Completed, ScanStatus::Merged)
        )
    }

    pub fn transition_to(&self, next: ScanStatus) -> HunterResult<ScanStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(HunterError::InvalidTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            })
        }
    }
}

/// One reconnaissance scan run with its configuration and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub status: ScanStatus,
    pub config: ScanConfig,
    pub total_found: u64,
    pub high_risk_count: u64,
    pub error_message: Option<String>,
    /// Deterministic identity of config + result set, set once post-completion.
    pub fingerprint: Option<String>,
    /// Canonical session this one merged into, set when status is Merged.
    pub merged_into: Option<u64>,
}

impl ScanSession {
    pub fn new(id: u64, config: ScanConfig) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            status: ScanStatus::Pending,
            config,
            total_found: 0,
            high_risk_count: 0,
            error_message: None,
            fingerprint: None,
            merged_into: None,
        }
    }
}

/// Finding severity as reported by the static-analysis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "ERROR" | "CRITICAL" | "HIGH" => Self::Error,
            "WARNING" | "MEDIUM" => Self::Warning,
            _ => Self::Info,
        }
    }
}

/// Per-item findings summary, aggregated once analysis completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub total: u64,
    pub errors: u64,
    pub warnings: u64,
    pub info: u64,
}

impl FindingsSummary {
    pub fn add(&mut self, severity: Severity) {
        self.total += 1;
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Static-analysis sub-status of a scan item. Owned by the bulk analysis
/// orchestrator; everything else on the item is immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    None,
    Pending,
    Running,
    Completed,
    Failed {
        reason: String,
    },
}

impl AnalysisStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One discovered package within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanItem {
    pub session_id: u64,
    pub slug: String,
    pub name: String,
    pub version: String,
    /// Heuristic vulnerability probability score, 0-100.
    pub score: u8,
    pub installations: u64,
    pub days_since_update: u32,
    pub tested_wp_version: String,
    pub author_trusted: bool,
    pub is_risky_category: bool,
    pub is_user_facing: bool,
    /// Slug already present in an earlier session's results.
    pub is_duplicate: bool,
    pub risk_tags: Vec<String>,
    pub security_flags: Vec<String>,
    pub feature_flags: Vec<String>,
    pub download_link: String,
    pub analysis: AnalysisStatus,
    pub findings: Option<FindingsSummary>,
}

/// Aggregate progress record for a session's bulk static-analysis job.
/// Created on first launch and updated incrementally; survives pause and
/// process restarts with its counts intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkAnalysisRecord {
    pub session_id: u64,
    /// Item count at launch time.
    pub total_items: u64,
    /// Items processed so far (success or failure).
    pub scanned: u64,
    pub total_findings: u64,
    pub breakdown: FindingsSummary,
    /// At most one active worker set per session.
    pub running: bool,
}

impl BulkAnalysisRecord {
    pub fn progress_percent(&self) -> u32 {
        if self.total_items == 0 {
            0
        } else {
            ((self.scanned * 100) / self.total_items) as u32
        }
    }
}

/// Lifecycle events published through the broadcaster for a session's jobs.
/// Delivery is FIFO per session; late attachers catch up via snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Start {
        session_id: u64,
    },
    Result {
        item: Box<ScanItem>,
        found_count: u64,
    },
    Progress {
        current: u32,
        total: u32,
        percent: u32,
    },
    Deduplicated {
        original_session_id: u64,
        message: String,
    },
    Complete {
        session_id: u64,
        total_found: u64,
        high_risk_count: u64,
    },
    Error {
        message: String,
    },
    BulkProgress {
        session_id: u64,
        scanned: u64,
        total_items: u64,
        total_findings: u64,
        breakdown: FindingsSummary,
        running: bool,
    },
}
