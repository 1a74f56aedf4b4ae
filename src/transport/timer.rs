//! Single-shot, cancellable timers owned by a link role.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    AdvertiseRetry,
    SendRetry,
    ScanWindow,
    Reconnect,
}

/// A timer that went off. `generation` tells a live timer from one that was
/// replaced or cancelled after it fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// At most one pending timer per kind. Scheduling a kind replaces the
/// pending one.
pub trait Scheduler: Send {
    fn schedule(&mut self, kind: TimerKind, after: Duration);
    fn cancel(&mut self, kind: TimerKind);
    fn cancel_all(&mut self);
    fn is_pending(&self, kind: TimerKind) -> bool;
    /// Consume a fire. Returns `false` for stale fires, which must be ignored.
    fn accept(&mut self, fired: TimerFired) -> bool;
}

// ─── Tokio ───────────────────────────────────────────────────────────────────

pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<TimerFired>,
    pending: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl TokioScheduler {
    /// Scheduler plus the receiver its fires arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler {
            tx,
            pending: HashMap::new(),
            generation: 0,
        };
        (scheduler, rx)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        self.generation += 1;
        let fired = TimerFired {
            kind,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(fired);
        });
        self.pending.insert(kind, (self.generation, handle));
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.pending.remove(&kind) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.pending.drain() {
            handle.abort();
        }
    }

    fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    fn accept(&mut self, fired: TimerFired) -> bool {
        match self.pending.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.pending.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ─── Manual ──────────────────────────────────────────────────────────────────

/// Scheduler driven by hand, for exercising role machines without a clock.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: HashMap<TimerKind, (u64, Duration)>,
    generation: u64,
    /// Every `schedule` call, in order.
    pub history: Vec<(TimerKind, Duration)>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(&self, kind: TimerKind) -> Option<Duration> {
        self.pending.get(&kind).map(|(_, d)| *d)
    }

    /// The fire a pending timer of `kind` would produce.
    pub fn fire(&self, kind: TimerKind) -> Option<TimerFired> {
        self.pending
            .get(&kind)
            .map(|(generation, _)| TimerFired {
                kind,
                generation: *generation,
            })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        self.generation += 1;
        self.pending.insert(kind, (self.generation, after));
        self.history.push((kind, after));
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.pending.remove(&kind);
    }

    fn cancel_all(&mut self) {
        self.pending.clear();
    }

    fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    fn accept(&mut self, fired: TimerFired) -> bool {
        match self.pending.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.pending.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }
}
