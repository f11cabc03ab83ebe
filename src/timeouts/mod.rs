//! Timer subsystem: `LeaderTimer`, `NoOpTimer` and `ReconnectTimer`.
//!
//! Firings are delivered as `TimeoutEvent`s on an `mpsc` channel rather than
//! by invoking a callback directly, mirroring the teacher's channel-per-
//! concern shape (`MessageChannelTx`/`MessageChannelRx`) so the consensus
//! event loop can `select!` over timer firings alongside inbound messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::view::Host;

/// Identifies a scheduled timer, returned at schedule time so it can later
/// be cancelled. Opaque and only meaningful to the `Timeouts` that minted
/// it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TimeoutId(u64);

/// The three timer kinds the consensus core schedules.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimeoutKind {
    /// Periodic: fires every `LEADER_TIMEOUT/3` so the replica can check
    /// whether `now - lastLeaderOp > LEADER_TIMEOUT`.
    Leader,
    /// Periodic on the leader, period `NOOP_SEND_INTERVAL`.
    NoOp,
    /// One-shot, scheduled after a `Down`/`Failed` connection event.
    Reconnect(Host),
}

/// A firing of a previously scheduled timer.
#[derive(Debug, Copy, Clone)]
pub struct TimeoutEvent {
    pub id: TimeoutId,
    pub kind: TimeoutKind,
}

/// Schedules and cancels timers, delivering firings on a shared channel.
///
/// Cancellation is best-effort: a task may already be past the cancellation
/// check and deliver its firing regardless (SPEC_FULL §5, "cancellation
/// racing with a firing"). Handlers consuming `TimeoutEvent`s are expected
/// to re-check their own guard before acting on a firing.
pub struct Timeouts {
    tx: UnboundedSender<TimeoutEvent>,
    next_id: AtomicU64,
}

impl Timeouts {
    /// Builds a `Timeouts` delivering firings onto `tx`.
    pub fn new(tx: UnboundedSender<TimeoutEvent>) -> Self {
        Self {
            tx,
            next_id: AtomicU64::new(0),
        }
    }

    fn alloc_id(&self) -> TimeoutId {
        TimeoutId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Schedules a one-shot timer of `kind`, firing after `delay`.
    pub fn timeout(&self, delay: Duration, kind: TimeoutKind) -> TimeoutId {
        let id = self.alloc_id();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimeoutEvent { id, kind });
        });
        id
    }

    /// Schedules a periodic timer of `kind`, firing first after
    /// `initial_delay`, then every `period`.
    ///
    /// Returns a `JoinHandle` the caller can abort to cancel the series;
    /// there is no fine-grained per-firing cancellation for periodic
    /// timers, matching `LeaderTimer`/`NoOpTimer`'s "runs for the life of
    /// the replica" lifetime in SPEC_FULL §4.9.
    pub fn periodic(&self, initial_delay: Duration, period: Duration, kind: TimeoutKind) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let id = self.alloc_id();
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if tx.send(TimeoutEvent { id, kind }).is_err() {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_timer_fires_once() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let timeouts = Timeouts::new(tx);
        timeouts.timeout(Duration::from_millis(5), TimeoutKind::Leader);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, TimeoutKind::Leader);
    }

    #[tokio::test]
    async fn periodic_timer_fires_more_than_once() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let timeouts = Timeouts::new(tx);
        let handle = timeouts.periodic(
            Duration::from_millis(1),
            Duration::from_millis(1),
            TimeoutKind::NoOp,
        );
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        handle.abort();
    }
}
