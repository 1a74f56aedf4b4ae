//! Scanner / initiator role: finds the motion service, connects, subscribes
//! and receives samples. Recovers from drops with a bounded reconnect.

use super::adapter::{AdapterEvent, AdapterState, PeerId, WirelessAdapter};
use super::channel::{FramedChannel, LinkStats};
use super::link::LinkRole;
use super::retry::{RetryBudget, RetryDecision};
use super::state::{transition, ConnectionState};
use super::timer::{Scheduler, TimerFired, TimerKind};
use crate::error::{LinkError, LinkResult};
use crate::settings::PipelineConfig;
use crate::types::MotionSample;
use std::time::Duration;

const ROLE: &str = "scanner";

pub struct Scanner<A: WirelessAdapter, S: Scheduler> {
    adapter: A,
    timers: S,
    service_id: String,
    scan_window: Duration,
    state: ConnectionState,
    peer: Option<PeerId>,
    /// Peer we hung up on ourselves; its `Disconnected` echo is not a new loss.
    hung_up: Option<PeerId>,
    reconnect: RetryBudget,
    channel: FramedChannel,
    last_error: Option<LinkError>,
    halted: bool,
}

impl<A: WirelessAdapter, S: Scheduler> Scanner<A, S> {
    pub fn new(adapter: A, timers: S, config: &PipelineConfig) -> Self {
        Self {
            adapter,
            timers,
            service_id: config.service_id.clone(),
            scan_window: config.scan_window,
            state: ConnectionState::Idle,
            peer: None,
            hung_up: None,
            reconnect: RetryBudget::new(
                "reconnect",
                config.reconnect_max_attempts,
                config.reconnect_delay,
            ),
            channel: FramedChannel::new(config.send_retry_delay, config.send_retry_limit),
            last_error: None,
            halted: false,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn timers(&self) -> &S {
        &self.timers
    }

    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    fn begin_scan(&mut self) {
        if self.halted || self.state != ConnectionState::Idle || !self.adapter.state().is_ready() {
            return;
        }
        self.adapter.start_scan(&self.service_id);
        self.timers.schedule(TimerKind::ScanWindow, self.scan_window);
        transition(ROLE, &mut self.state, ConnectionState::Scanning);
    }

    /// Connect failure or unexpected drop: go idle and schedule one reconnect.
    fn link_lost(&mut self, error: LinkError) {
        log::warn!("[link] scanner: {}", error);
        self.channel.reset(&mut self.timers);
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        self.last_error = Some(error);
        match self.reconnect.record_failure() {
            RetryDecision::RetryAfter(delay) => {
                self.timers.schedule(TimerKind::Reconnect, delay);
            }
            RetryDecision::Exhausted { attempts } => {
                self.timers.cancel_all();
                self.halted = true;
                self.peer = None;
                self.last_error = Some(LinkError::RetriesExhausted {
                    operation: self.reconnect.operation,
                    attempts,
                });
            }
        }
    }

    fn adapter_unavailable(&mut self, state: AdapterState) {
        log::error!("[link] scanner: adapter {}", state);
        self.timers.cancel_all();
        self.channel.reset(&mut self.timers);
        self.peer = None;
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        self.last_error = Some(LinkError::LinkUnavailable(state));
    }

    fn reconnect_now(&mut self) {
        if self.state != ConnectionState::Idle {
            return;
        }
        match self.peer {
            Some(peer) => {
                log::info!("[link] scanner: reconnecting to {}", peer);
                self.adapter.connect(peer);
                transition(ROLE, &mut self.state, ConnectionState::Connecting);
            }
            None => self.begin_scan(),
        }
    }
}

impl<A, S> LinkRole for Scanner<A, S>
where
    A: WirelessAdapter + 'static,
    S: Scheduler + 'static,
{
    fn start(&mut self) {
        let state = self.adapter.state();
        if state.is_unavailable() {
            self.adapter_unavailable(state);
        } else if state.is_ready() {
            self.begin_scan();
        }
    }

    fn handle_event(&mut self, event: AdapterEvent) -> Vec<MotionSample> {
        // Reported even after retries ran out
        if let AdapterEvent::StateChanged(state) = event {
            if state.is_unavailable() {
                self.adapter_unavailable(state);
                return Vec::new();
            }
        }
        if self.halted {
            return Vec::new();
        }
        match event {
            AdapterEvent::StateChanged(AdapterState::PoweredOn) => {
                self.reconnect.record_success();
                self.begin_scan();
            }
            AdapterEvent::StateChanged(_) => {}
            AdapterEvent::Discovered(peer) => {
                if self.state != ConnectionState::Scanning {
                    return Vec::new();
                }
                log::info!("[link] scanner: discovered {}", peer);
                self.timers.cancel(TimerKind::ScanWindow);
                self.adapter.stop_scan();
                self.adapter.connect(peer);
                self.peer = Some(peer);
                transition(ROLE, &mut self.state, ConnectionState::Connecting);
            }
            AdapterEvent::Connected(peer) => {
                if self.state != ConnectionState::Connecting || self.peer != Some(peer) {
                    return Vec::new();
                }
                self.hung_up = None;
                self.adapter.subscribe(peer, &self.service_id);
                transition(ROLE, &mut self.state, ConnectionState::Connected);
            }
            AdapterEvent::SubscribeCompleted(peer, Ok(())) => {
                if self.peer == Some(peer) && self.state.is_connected() {
                    log::info!("[link] scanner: subscribed to {}", peer);
                    self.reconnect.record_success();
                    self.last_error = None;
                }
            }
            AdapterEvent::SubscribeCompleted(peer, Err(e)) => {
                if self.peer == Some(peer) {
                    self.hung_up = Some(peer);
                    self.adapter.disconnect(peer);
                    self.link_lost(LinkError::ConnectFailed(format!("subscribe: {}", e)));
                }
            }
            AdapterEvent::ConnectFailed(peer, e) => {
                if self.peer == Some(peer) {
                    self.link_lost(LinkError::ConnectFailed(e));
                }
            }
            AdapterEvent::Disconnected { peer, error } => {
                if self.peer != Some(peer) {
                    return Vec::new();
                }
                if self.hung_up == Some(peer) {
                    log::debug!("[link] scanner: {} hang-up confirmed", peer);
                    self.hung_up = None;
                    return Vec::new();
                }
                match error {
                    Some(e) => self.link_lost(LinkError::DisconnectedUnexpectedly(e)),
                    None => {
                        log::info!("[link] scanner: {} disconnected", peer);
                        self.channel.reset(&mut self.timers);
                        self.peer = None;
                        transition(ROLE, &mut self.state, ConnectionState::Idle);
                        self.begin_scan();
                    }
                }
            }
            AdapterEvent::DataReceived(bytes) => {
                if self.state.is_connected() {
                    return self.channel.receive(&bytes);
                }
            }
            AdapterEvent::ReadyToSend => {
                if let Err(e) = self.channel.flush(&mut self.adapter, &mut self.timers) {
                    self.last_error = Some(e);
                }
            }
            other => log::debug!("[link] scanner: unexpected event {:?}", other),
        }
        Vec::new()
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            return;
        }
        match fired.kind {
            TimerKind::ScanWindow => {
                if self.state == ConnectionState::Scanning {
                    log::info!("[link] scanner: nothing found, restarting scan");
                    self.adapter.stop_scan();
                    self.adapter.start_scan(&self.service_id);
                    self.timers.schedule(TimerKind::ScanWindow, self.scan_window);
                }
            }
            TimerKind::Reconnect => self.reconnect_now(),
            TimerKind::SendRetry => {
                if let Err(e) = self.channel.flush(&mut self.adapter, &mut self.timers) {
                    self.last_error = Some(e);
                }
            }
            TimerKind::AdvertiseRetry => {}
        }
    }

    fn send(&mut self, sample: &MotionSample) -> LinkResult<()> {
        if !self.state.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.channel.send(sample, &mut self.adapter, &mut self.timers)
    }

    fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.channel.reset(&mut self.timers);
        match self.state {
            ConnectionState::Scanning => self.adapter.stop_scan(),
            ConnectionState::Connecting | ConnectionState::Connected => {
                if let Some(peer) = self.peer.take() {
                    self.adapter.disconnect(peer);
                }
            }
            _ => {}
        }
        self.adapter.shutdown();
        self.halted = true;
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        log::info!("[link] scanner: shut down");
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn last_error(&self) -> Option<LinkError> {
        self.last_error.clone()
    }

    fn stats(&self) -> LinkStats {
        self.channel.stats()
    }
}
