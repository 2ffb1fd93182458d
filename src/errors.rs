// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Error Types
 * Production-ready error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::time::Duration;
use thiserror::Error;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum HunterError {
    /// Discovery source errors (catalog API)
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Static-analysis engine errors
    #[error("Analysis error: {0}")]
    Analysis(#[from] EngineError),

    /// Duplicate launch/stop on the same session
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Unknown session or item id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal state machine transition
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Session store persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Discovery source errors with transient/fatal classification. A transient
/// page failure is retried and at worst skips the page; a fatal failure
/// (auth/shape) fails the whole session.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Transient source failure on page {page}: {reason}")]
    Transient { page: u32, reason: String },

    #[error("Fatal source failure: {reason}")]
    Fatal { reason: String },

    #[error("Rate limited on page {page}: retry after {retry_after:?}")]
    RateLimited {
        page: u32,
        retry_after: Option<Duration>,
    },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transient { .. } => true,
            SourceError::RateLimited { .. } => true,
            SourceError::Fatal { .. } => false,
        }
    }

    /// Suggested backoff before the next attempt
    pub fn retry_delay(&self) -> Duration {
        match self {
            SourceError::RateLimited {
                retry_after: Some(delay),
                ..
            } => *delay,
            SourceError::RateLimited { .. } => Duration::from_secs(5),
            _ => Duration::from_secs(2),
        }
    }
}

/// Per-item analysis engine errors. These are never fatal to the bulk job;
/// the item is marked failed and the orchestrator moves on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine invocation failed: {0}")]
    Failed(String),

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Package download failed: {0}")]
    Download(String),
}

/// Session store persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for orchestration operations
pub type HunterResult<T> = Result<T, HunterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_retryability() {
        let transient = SourceError::Transient {
            page: 3,
            reason: "connection reset".into(),
        };
        assert!(transient.is_retryable());

        let rate_limited = SourceError::RateLimited {
            page: 1,
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_delay(), Duration::from_secs(30));

        let fatal = SourceError::Fatal {
            reason: "unexpected response shape".into(),
        };
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = HunterError::ConcurrencyConflict("bulk scan already running".into());
        assert!(err.to_string().contains("already running"));

        let err = HunterError::InvalidTransition {
            from: "Failed".into(),
            to: "Merged".into(),
        };
        assert_eq!(err.to_string(), "Invalid transition from Failed to Merged");
    }
}
