//! # Reconnect Supervisor
//!
//! Turns "the upstream went away" into exactly one future connect request.
//! Overlapping close and error notifications collapse into a single timer; the
//! delay is fixed and retries never stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::connector::ConnectorCommand;

/// Delay between a disconnect and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

struct SupervisorInner {
    delay: Duration,
    scheduled: AtomicBool,
    timers_started: AtomicU64,
    connector: mpsc::UnboundedSender<ConnectorCommand>,
}

impl SupervisorInner {
    /// Timer elapsed: clear the flag first so the attempt can reschedule.
    fn fire(&self) {
        self.scheduled.store(false, Ordering::Release);
        log::info!("Reconnect timer elapsed. Requesting upstream connect.");
        if self.connector.send(ConnectorCommand::Connect).is_err() {
            log::warn!("Upstream connector is gone. Reconnect request dropped.");
        }
    }
}

/// # Reconnect Supervisor
///
/// Cheap to clone; all clones share the same single-flight flag.
#[derive(Clone)]
pub struct ReconnectSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ReconnectSupervisor {
    /// Creates a supervisor that sends `ConnectorCommand::Connect` to `connector`
    /// once `delay` has elapsed after a disconnect.
    pub fn new(delay: Duration, connector: mpsc::UnboundedSender<ConnectorCommand>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                delay,
                scheduled: AtomicBool::new(false),
                timers_started: AtomicU64::new(0),
                connector,
            }),
        }
    }

    /// The fixed reconnect delay.
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Whether a reconnect timer is pending.
    pub fn is_scheduled(&self) -> bool {
        self.inner.scheduled.load(Ordering::Acquire)
    }

    /// How many timers have been started since creation.
    pub fn timers_started(&self) -> u64 {
        self.inner.timers_started.load(Ordering::Relaxed)
    }

    /// # On Disconnected
    ///
    /// Schedules a reconnect unless one is already pending. Returns `true` when
    /// this call started the timer. Must be called from within a Tokio runtime.
    pub fn on_disconnected(&self) -> bool {
        if self
            .inner
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Reconnect already scheduled. Ignoring duplicate disconnect.");
            return false;
        }

        self.inner.timers_started.fetch_add(1, Ordering::Relaxed);
        log::warn!("Upstream closed. Reconnect in {}ms...", self.inner.delay.as_millis());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            inner.fire();
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_disconnects_schedule_one_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new(DEFAULT_RECONNECT_DELAY, tx);

        assert!(supervisor.on_disconnected());
        assert!(!supervisor.on_disconnected());
        assert!(!supervisor.clone().on_disconnected());
        assert!(supervisor.is_scheduled());
        assert_eq!(supervisor.timers_started(), 1);

        let started = Instant::now();
        assert!(matches!(rx.recv().await, Some(ConnectorCommand::Connect)));
        let waited = started.elapsed();
        assert!(waited >= DEFAULT_RECONNECT_DELAY && waited < DEFAULT_RECONNECT_DELAY + Duration::from_millis(10));
        assert!(!supervisor.is_scheduled());

        // Only one request was produced.
        tokio::time::sleep(DEFAULT_RECONNECT_DELAY * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_reschedule_after_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new(Duration::from_millis(500), tx);

        for round in 1..=3 {
            assert!(supervisor.on_disconnected());
            assert!(rx.recv().await.is_some());
            assert_eq!(supervisor.timers_started(), round);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_without_connector_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let supervisor = ReconnectSupervisor::new(Duration::from_millis(10), tx);

        assert!(supervisor.on_disconnected());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!supervisor.is_scheduled());
    }
}
