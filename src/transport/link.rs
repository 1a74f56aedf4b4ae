//! tokio driver for a link role.
//!
//! The task owns the role machine and feeds it adapter events, timer fires
//! and outbound samples. Observers see state, last error, stats and inbound
//! samples through watch channels (most recent value, no replay).

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::adapter::AdapterEvent;
use super::channel::LinkStats;
use super::state::ConnectionState;
use super::timer::TimerFired;
use crate::error::{LinkError, LinkResult};
use crate::types::MotionSample;

/// A role machine the link driver can run.
pub trait LinkRole: Send + 'static {
    fn start(&mut self);
    /// Returns samples completed by this event, oldest first.
    fn handle_event(&mut self, event: AdapterEvent) -> Vec<MotionSample>;
    fn on_timer(&mut self, fired: TimerFired);
    fn send(&mut self, sample: &MotionSample) -> LinkResult<()>;
    /// Cancel timers and release the radio.
    fn shutdown(&mut self);

    fn state(&self) -> ConnectionState;
    fn last_error(&self) -> Option<LinkError>;
    fn stats(&self) -> LinkStats;
}

struct Observers {
    state: watch::Sender<ConnectionState>,
    last_error: watch::Sender<Option<LinkError>>,
    stats: watch::Sender<LinkStats>,
    inbound: watch::Sender<Option<MotionSample>>,
}

impl Observers {
    fn publish<R: LinkRole>(&self, role: &R) {
        let state = role.state();
        self.state.send_if_modified(|s| replace(s, state));
        let error = role.last_error();
        self.last_error.send_if_modified(|e| replace(e, error));
        let stats = role.stats();
        self.stats.send_if_modified(|s| replace(s, stats));
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

pub struct LinkHandle {
    state: watch::Receiver<ConnectionState>,
    last_error: watch::Receiver<Option<LinkError>>,
    stats: watch::Receiver<LinkStats>,
    inbound: watch::Receiver<Option<MotionSample>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    /// Start `role` on its own task.
    ///
    /// `outbound` is typically the sampler's sample watch; every new value
    /// is offered to the link. Pass `None` for a receive-only link.
    pub fn spawn<R: LinkRole>(
        role: R,
        events: mpsc::UnboundedReceiver<AdapterEvent>,
        timers: mpsc::UnboundedReceiver<TimerFired>,
        outbound: Option<watch::Receiver<Option<MotionSample>>>,
    ) -> Self {
        let (state_tx, state) = watch::channel(role.state());
        let (error_tx, last_error) = watch::channel(role.last_error());
        let (stats_tx, stats) = watch::channel(role.stats());
        let (inbound_tx, inbound) = watch::channel(None);
        let observers = Observers {
            state: state_tx,
            last_error: error_tx,
            stats: stats_tx,
            inbound: inbound_tx,
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_link(role, events, timers, outbound, observers, shutdown_rx));

        LinkHandle {
            state,
            last_error,
            stats,
            inbound,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn last_error(&self) -> watch::Receiver<Option<LinkError>> {
        self.last_error.clone()
    }

    pub fn stats(&self) -> watch::Receiver<LinkStats> {
        self.stats.clone()
    }

    /// Newest received sample (last-value-wins).
    pub fn inbound(&self) -> watch::Receiver<Option<MotionSample>> {
        self.inbound.clone()
    }

    /// Disconnect, cancel timers and release the radio. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[link] driver task failed: {}", e);
            }
        }
    }
}

// Aborting the task drops its role, which shuts the radio down.
impl Drop for LinkHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Next outbound sample. Pends forever once there is no source.
async fn next_outbound(
    source: &mut Option<watch::Receiver<Option<MotionSample>>>,
) -> Option<Option<MotionSample>> {
    match source {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Owns the role for the life of the driver task. Dropping it shuts the role
/// down, so an aborted task still releases the radio.
struct Running<R: LinkRole> {
    role: R,
    observers: Observers,
}

impl<R: LinkRole> Running<R> {
    fn publish(&self) {
        self.observers.publish(&self.role);
    }
}

impl<R: LinkRole> Drop for Running<R> {
    fn drop(&mut self) {
        self.role.shutdown();
        self.publish();
    }
}

async fn run_link<R: LinkRole>(
    role: R,
    mut events: mpsc::UnboundedReceiver<AdapterEvent>,
    mut timers: mpsc::UnboundedReceiver<TimerFired>,
    mut outbound: Option<watch::Receiver<Option<MotionSample>>>,
    observers: Observers,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut link = Running { role, observers };
    link.role.start();
    link.publish();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(fired) = timers.recv() => link.role.on_timer(fired),
            event = events.recv() => {
                let Some(event) = event else {
                    log::warn!("[link] adapter event stream closed");
                    break;
                };
                let received = link.role.handle_event(event);
                if let Some(last) = received.last() {
                    link.observers.inbound.send_replace(Some(*last));
                }
            }
            next = next_outbound(&mut outbound) => match next {
                Some(Some(sample)) => match link.role.send(&sample) {
                    Ok(()) | Err(LinkError::NotConnected) => {}
                    Err(e) => log::warn!("[link] send failed: {}", e),
                },
                Some(None) => {}
                None => {
                    log::debug!("[link] outbound source closed");
                    outbound = None;
                }
            },
        }
        link.publish();
    }
}
