//! Advertiser / responder role: publishes the motion service and streams
//! samples to the subscribed peer.

use super::adapter::{AdapterEvent, AdapterState, PeerId, WirelessAdapter};
use super::channel::{FramedChannel, LinkStats};
use super::link::LinkRole;
use super::retry::{RetryBudget, RetryDecision};
use super::state::{transition, ConnectionState};
use super::timer::{Scheduler, TimerFired, TimerKind};
use crate::error::{LinkError, LinkResult};
use crate::settings::PipelineConfig;
use crate::types::MotionSample;

const ROLE: &str = "advertiser";

pub struct Advertiser<A: WirelessAdapter, S: Scheduler> {
    adapter: A,
    timers: S,
    service_id: String,
    local_name: String,
    state: ConnectionState,
    service_registered: bool,
    peer: Option<PeerId>,
    retry: RetryBudget,
    channel: FramedChannel,
    last_error: Option<LinkError>,
    /// Set once advertising retries are spent or the link is shut down.
    halted: bool,
}

impl<A: WirelessAdapter, S: Scheduler> Advertiser<A, S> {
    pub fn new(adapter: A, timers: S, config: &PipelineConfig) -> Self {
        Self {
            adapter,
            timers,
            service_id: config.service_id.clone(),
            local_name: config.local_name.clone(),
            state: ConnectionState::Idle,
            service_registered: false,
            peer: None,
            retry: RetryBudget::new(
                "advertising",
                config.advertise_max_attempts,
                config.advertise_retry_delay,
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

    fn begin(&mut self) {
        if self.halted || self.state != ConnectionState::Idle || !self.adapter.state().is_ready() {
            return;
        }
        if self.service_registered {
            log::info!("[link] advertiser: advertising {}", self.local_name);
            self.adapter.start_advertising(&self.service_id, &self.local_name);
        } else {
            log::info!("[link] advertiser: registering service {}", self.service_id);
            self.adapter.register_service(&self.service_id);
        }
    }

    fn advertising_failed(&mut self, reason: &str) {
        log::warn!("[link] advertiser: {}", reason);
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        match self.retry.record_failure() {
            RetryDecision::RetryAfter(delay) => {
                self.timers.schedule(TimerKind::AdvertiseRetry, delay);
            }
            RetryDecision::Exhausted { attempts } => {
                self.timers.cancel_all();
                self.halted = true;
                self.last_error = Some(LinkError::RetriesExhausted {
                    operation: self.retry.operation,
                    attempts,
                });
            }
        }
    }

    fn adapter_unavailable(&mut self, state: AdapterState) {
        log::error!("[link] advertiser: adapter {}", state);
        self.timers.cancel_all();
        self.channel.reset(&mut self.timers);
        self.peer = None;
        self.service_registered = false;
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        self.last_error = Some(LinkError::LinkUnavailable(state));
    }

    fn peer_gone(&mut self, peer: PeerId, error: Option<String>) {
        if self.peer != Some(peer) {
            return;
        }
        match error {
            Some(e) => {
                log::warn!("[link] advertiser: {} lost: {}", peer, e);
                self.last_error = Some(LinkError::DisconnectedUnexpectedly(e));
            }
            None => log::info!("[link] advertiser: {} unsubscribed", peer),
        }
        self.peer = None;
        self.channel.reset(&mut self.timers);
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        self.begin();
    }
}

impl<A, S> LinkRole for Advertiser<A, S>
where
    A: WirelessAdapter + 'static,
    S: Scheduler + 'static,
{
    fn start(&mut self) {
        let state = self.adapter.state();
        if state.is_unavailable() {
            self.adapter_unavailable(state);
        } else if state.is_ready() {
            self.begin();
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
                self.retry.record_success();
                self.begin();
            }
            AdapterEvent::StateChanged(_) => {}
            AdapterEvent::ServiceRegistered(Ok(())) => {
                self.service_registered = true;
                self.begin();
            }
            AdapterEvent::ServiceRegistered(Err(e)) => {
                self.advertising_failed(&format!("service registration failed: {}", e));
            }
            AdapterEvent::AdvertisingStarted(Ok(())) => {
                self.retry.record_success();
                self.last_error = None;
                transition(ROLE, &mut self.state, ConnectionState::Advertising);
            }
            AdapterEvent::AdvertisingStarted(Err(e)) => {
                self.advertising_failed(&format!("advertising failed: {}", e));
            }
            AdapterEvent::PeerSubscribed(peer) => {
                if self.state != ConnectionState::Advertising {
                    log::debug!("[link] advertiser: ignoring {} in {}", peer, self.state);
                    return Vec::new();
                }
                self.adapter.stop_advertising();
                transition(ROLE, &mut self.state, ConnectionState::Connecting);
                self.peer = Some(peer);
                transition(ROLE, &mut self.state, ConnectionState::Connected);
            }
            AdapterEvent::PeerUnsubscribed(peer) => self.peer_gone(peer, None),
            AdapterEvent::Disconnected { peer, error } => self.peer_gone(peer, error),
            AdapterEvent::ReadyToSend => {
                if let Err(e) = self.channel.flush(&mut self.adapter, &mut self.timers) {
                    self.last_error = Some(e);
                }
            }
            AdapterEvent::DataReceived(bytes) => {
                if self.state.is_connected() {
                    return self.channel.receive(&bytes);
                }
            }
            other => log::debug!("[link] advertiser: unexpected event {:?}", other),
        }
        Vec::new()
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            return;
        }
        match fired.kind {
            TimerKind::AdvertiseRetry => self.begin(),
            TimerKind::SendRetry => {
                if let Err(e) = self.channel.flush(&mut self.adapter, &mut self.timers) {
                    self.last_error = Some(e);
                }
            }
            TimerKind::ScanWindow | TimerKind::Reconnect => {}
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
            ConnectionState::Advertising => self.adapter.stop_advertising(),
            ConnectionState::Connected | ConnectionState::Connecting => {
                if let Some(peer) = self.peer.take() {
                    self.adapter.disconnect(peer);
                }
            }
            _ => {}
        }
        self.adapter.shutdown();
        self.halted = true;
        transition(ROLE, &mut self.state, ConnectionState::Idle);
        log::info!("[link] advertiser: shut down");
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
