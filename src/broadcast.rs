// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Job Registry & Event Broadcaster
 * Per-session broadcast channels for live progress streaming, plus the
 * exclusive run-flags that guarantee one active job of each kind per session
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::{HunterError, HunterResult};
use crate::types::JobEvent;

/// Events buffered per observer before the slowest one starts lagging out.
/// A lagged observer loses oldest events; it never blocks the producer or
/// its peers. Late attachers catch up through store snapshots instead.
const CHANNEL_CAPACITY: usize = 256;

/// Cooperative stop flag handed to a running job. Scans honor it at the
/// next page boundary, bulk workers at the next item boundary.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Explicit job registry: created once at process start and passed by
/// reference to every component that publishes or observes job events.
/// Replaces ad hoc process-wide maps of active jobs and sockets.
#[derive(Default)]
pub struct JobRegistry {
    channels: RwLock<HashMap<u64, broadcast::Sender<JobEvent>>>,
    scan_handles: RwLock<HashMap<u64, StopHandle>>,
    bulk_handles: RwLock<HashMap<u64, StopHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer to a session's event stream. Events published
    /// before the attach are not replayed.
    pub fn attach(&self, session_id: u64) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write();
        Self::sweep(&mut channels);
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to every current observer of the session, in FIFO
    /// order per observer. Publishing with no observers is a no-op.
    pub fn publish(&self, session_id: u64, event: JobEvent) {
        let channels = self.channels.read();
        if let Some(tx) = channels.get(&session_id) {
            // SendError only means there are no receivers right now.
            let _ = tx.send(event);
        }
    }

    /// Sweep the channel map after a job ends. Every job calls this when its
    /// driver task finishes, so entries whose observers have all detached
    /// are dropped promptly rather than accumulating.
    pub fn release(&self, _session_id: u64) {
        let mut channels = self.channels.write();
        Self::sweep(&mut channels);
    }

    /// Drop every channel nobody observes. An unobserved channel holds no
    /// replayable state (events are not retained for late attachers), so
    /// removal is always safe; a fresh one is created on the next attach.
    fn sweep(channels: &mut HashMap<u64, broadcast::Sender<JobEvent>>) {
        channels.retain(|id, tx| {
            let keep = tx.receiver_count() > 0;
            if !keep {
                debug!("Releasing event channel for session {}", id);
            }
            keep
        });
    }

    /// Register the exclusive scan run-flag for a session.
    pub fn begin_scan(&self, session_id: u64) -> HunterResult<StopHandle> {
        let mut handles = self.scan_handles.write();
        if handles.contains_key(&session_id) {
            return Err(HunterError::ConcurrencyConflict(format!(
                "scan already running for session {session_id}"
            )));
        }
        let handle = StopHandle::new();
        handles.insert(session_id, handle.clone());
        Ok(handle)
    }

    pub fn end_scan(&self, session_id: u64) {
        self.scan_handles.write().remove(&session_id);
    }

    /// Signal a running scan to stop at the next page boundary.
    pub fn stop_scan(&self, session_id: u64) -> bool {
        match self.scan_handles.read().get(&session_id) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn scan_running(&self, session_id: u64) -> bool {
        self.scan_handles.read().contains_key(&session_id)
    }

    /// Register the exclusive bulk-analysis run-flag for a session.
    pub fn begin_bulk(&self, session_id: u64) -> HunterResult<StopHandle> {
        let mut handles = self.bulk_handles.write();
        if handles.contains_key(&session_id) {
            return Err(HunterError::ConcurrencyConflict(format!(
                "bulk analysis already running for session {session_id}"
            )));
        }
        let handle = StopHandle::new();
        handles.insert(session_id, handle.clone());
        Ok(handle)
    }

    pub fn end_bulk(&self, session_id: u64) {
        self.bulk_handles.write().remove(&session_id);
    }

    /// Signal running bulk workers to finish their current item and stop.
    pub fn stop_bulk(&self, session_id: u64) -> bool {
        match self.bulk_handles.read().get(&session_id) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn bulk_running(&self, session_id: u64) -> bool {
        self.bulk_handles.read().contains_key(&session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_event(session_id: u64) -> JobEvent {
        JobEvent::Start { session_id }
    }

    #[tokio::test]
    async fn test_publish_order_per_observer() {
        let registry = JobRegistry::new();
        let mut rx = registry.attach(1);

        registry.publish(1, JobEvent::Start { session_id: 1 });
        registry.publish(
            1,
            JobEvent::Progress {
                current: 1,
                total: 5,
                percent: 20,
            },
        );
        registry.publish(
            1,
            JobEvent::Complete {
                session_id: 1,
                total_found: 0,
                high_risk_count: 0,
            },
        );

        assert!(matches!(rx.recv().await.unwrap(), JobEvent::Start { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            JobEvent::Progress { current: 1, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            JobEvent::Complete { .. }
        ));
    }

    #[tokio::test]
    async fn test_multiple_observers_get_independent_copies() {
        let registry = JobRegistry::new();
        let mut rx_a = registry.attach(7);
        let mut rx_b = registry.attach(7);

        registry.publish(7, start_event(7));

        assert!(matches!(
            rx_a.recv().await.unwrap(),
            JobEvent::Start { session_id: 7 }
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            JobEvent::Start { session_id: 7 }
        ));
    }

    #[tokio::test]
    async fn test_late_attacher_misses_earlier_events() {
        let registry = JobRegistry::new();
        let _early = registry.attach(3);

        registry.publish(3, start_event(3));

        let mut late = registry.attach(3);
        registry.publish(
            3,
            JobEvent::Error {
                message: "boom".into(),
            },
        );

        // The late observer only sees the event published after it attached.
        assert!(matches!(late.recv().await.unwrap(), JobEvent::Error { .. }));
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unobserved_sessions_are_isolated() {
        let registry = JobRegistry::new();
        let mut rx = registry.attach(1);

        registry.publish(2, start_event(2));
        registry.publish(1, start_event(1));

        assert!(matches!(
            rx.recv().await.unwrap(),
            JobEvent::Start { session_id: 1 }
        ));
    }

    #[tokio::test]
    async fn test_release_drops_unobserved_channel() {
        let registry = JobRegistry::new();
        {
            let _rx = registry.attach(9);
        }
        registry.release(9);
        assert!(registry.channels.read().is_empty());
    }

    #[tokio::test]
    async fn test_detached_channel_swept_without_job_ever_running() {
        let registry = JobRegistry::new();
        // An observer attaches to a session id for which no job ever starts,
        // then goes away. The entry must not live forever.
        {
            let _rx = registry.attach(1);
        }
        let _other = registry.attach(2);
        let channels = registry.channels.read();
        assert!(!channels.contains_key(&1));
        assert!(channels.contains_key(&2));
    }

    #[test]
    fn test_exclusive_scan_flag() {
        let registry = JobRegistry::new();
        let handle = registry.begin_scan(5).unwrap();
        assert!(registry.begin_scan(5).is_err());
        // Unrelated session is unaffected.
        assert!(registry.begin_scan(6).is_ok());

        assert!(registry.stop_scan(5));
        assert!(handle.is_stopped());

        registry.end_scan(5);
        assert!(!registry.stop_scan(5));
        assert!(registry.begin_scan(5).is_ok());
    }

    #[test]
    fn test_exclusive_bulk_flag() {
        let registry = JobRegistry::new();
        let _handle = registry.begin_bulk(5).unwrap();
        assert!(registry.bulk_running(5));
        assert!(registry.begin_bulk(5).is_err());

        registry.end_bulk(5);
        assert!(!registry.bulk_running(5));
        assert!(!registry.stop_bulk(5));
    }
}
