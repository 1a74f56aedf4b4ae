//! Wireless link between the sending device (advertiser) and the display
//! device (scanner).
//!
//! Both role machines are synchronous and generic over the radio
//! ([`adapter::WirelessAdapter`]) and the timer source ([`timer::Scheduler`]).
//! [`link`] drives either of them from a tokio task.

pub mod adapter;
pub mod advertiser;
pub mod channel;
pub mod link;
pub mod outbound;
pub mod retry;
pub mod scanner;
pub mod state;
pub mod timer;

pub use adapter::{AdapterEvent, AdapterState, PeerId, SendOutcome, WirelessAdapter};
pub use advertiser::Advertiser;
pub use channel::LinkStats;
pub use link::{LinkHandle, LinkRole};
pub use scanner::Scanner;
pub use state::ConnectionState;
pub use timer::{Scheduler, TimerFired, TimerKind, TokioScheduler};

#[cfg(test)]
pub(crate) mod testing {
    use super::adapter::{AdapterState, PeerId, SendOutcome, WirelessAdapter};
    use std::collections::VecDeque;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Call {
        RegisterService,
        StartAdvertising(String),
        StopAdvertising,
        StartScan,
        StopScan,
        Connect(PeerId),
        Disconnect(PeerId),
        Subscribe(PeerId),
        Send(usize),
        Shutdown,
    }

    /// Adapter double that records every command.
    pub struct RecordingAdapter {
        pub state: AdapterState,
        pub calls: Vec<Call>,
        /// Outcomes handed out by `send`, front first. Empty means `Sent`.
        pub send_outcomes: VecDeque<SendOutcome>,
        pub sent: Vec<Vec<u8>>,
    }

    impl RecordingAdapter {
        pub fn new(state: AdapterState) -> Self {
            Self {
                state,
                calls: Vec::new(),
                send_outcomes: VecDeque::new(),
                sent: Vec::new(),
            }
        }

        pub fn count(&self, call: &Call) -> usize {
            self.calls.iter().filter(|c| *c == call).count()
        }
    }

    impl WirelessAdapter for RecordingAdapter {
        fn state(&self) -> AdapterState {
            self.state
        }
        fn register_service(&mut self, _service: &str) {
            self.calls.push(Call::RegisterService);
        }
        fn start_advertising(&mut self, _service: &str, local_name: &str) {
            self.calls.push(Call::StartAdvertising(local_name.to_string()));
        }
        fn stop_advertising(&mut self) {
            self.calls.push(Call::StopAdvertising);
        }
        fn start_scan(&mut self, _service: &str) {
            self.calls.push(Call::StartScan);
        }
        fn stop_scan(&mut self) {
            self.calls.push(Call::StopScan);
        }
        fn connect(&mut self, peer: PeerId) {
            self.calls.push(Call::Connect(peer));
        }
        fn disconnect(&mut self, peer: PeerId) {
            self.calls.push(Call::Disconnect(peer));
        }
        fn subscribe(&mut self, peer: PeerId, _service: &str) {
            self.calls.push(Call::Subscribe(peer));
        }
        fn send(&mut self, payload: &[u8]) -> SendOutcome {
            self.calls.push(Call::Send(payload.len()));
            let outcome = self.send_outcomes.pop_front().unwrap_or(SendOutcome::Sent);
            if outcome == SendOutcome::Sent {
                self.sent.push(payload.to_vec());
            }
            outcome
        }
        fn shutdown(&mut self) {
            self.calls.push(Call::Shutdown);
        }
    }
}
