//! # Broadcast Dispatcher
//!
//! Takes one upstream message and hands an identical copy to every open
//! subscriber in the `Registry`.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: the message is wrapped in an `Arc<str>` once. Each
//!     subscriber receives a new pointer to the same allocation.
//! 2.  **Isolation**: a failed send only removes that subscriber. The loop keeps
//!     going, and nothing is reported back to the upstream side.
//! 3.  **Ordering**: `deliver` is called in upstream receipt order and each
//!     subscriber channel is FIFO, so every client sees upstream order.
//! 4.  **No backpressure**: subscriber channels are unbounded. A slow client
//!     grows its own queue; it never stalls the upstream reader or other clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::registry::{ReadyState, Registry};

/// Outcome of a single `deliver` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers skipped because they were not `Open`.
    pub skipped: usize,
    /// Subscribers removed because their channel was closed.
    pub dropped: usize,
}

/// # Dispatcher
///
/// The broadcast router. Shares the `Registry` with the downstream server.
pub struct Dispatcher {
    registry: Arc<Registry>,
    frames: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher that fans out to `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            frames: AtomicU64::new(0),
        }
    }

    /// The registry this dispatcher delivers to.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Total number of upstream frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// # Deliver
    ///
    /// Sends `message` verbatim to every `Open` subscriber. Subscribers in any
    /// other readiness state are skipped. A subscriber whose channel is closed is
    /// removed in the same pass with `retain`.
    pub fn deliver(&self, message: impl Into<Arc<str>>) -> DeliveryReport {
        let frame: Arc<str> = message.into();
        let mut report = DeliveryReport::default();

        self.registry.with_members(|subscribers| {
            subscribers.retain(|subscriber| {
                if subscriber.ready != ReadyState::Open {
                    report.skipped += 1;
                    return true;
                }
                match subscriber.sender.send(Arc::clone(&frame)) {
                    Ok(()) => {
                        report.delivered += 1;
                        true
                    }
                    Err(_) => {
                        log::info!("Subscriber {} unreachable. Removing from registry.", subscriber.id);
                        report.dropped += 1;
                        false
                    }
                }
            });
        });

        self.frames.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "Frame of {} bytes delivered to {} subscribers ({} skipped, {} dropped)",
            frame.len(),
            report.delivered,
            report.skipped,
            report.dropped
        );
        report
    }
}
