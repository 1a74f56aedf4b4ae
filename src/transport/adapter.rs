use std::fmt;

/// Service identifier both roles agree on out of band.
pub const MOTION_SERVICE_ID: &str = "1A2B3C4D-1E2E-3E4E-5E6E-7E8E9EAEBECF";

/// Characteristic carrying motion frames.
pub const MOTION_CHARACTERISTIC_ID: &str = "1A2B3C4D-1E2E-3E4E-5E6E-7E8E9EAEBECE";

/// Local name included in advertisements.
pub const MOTION_LOCAL_NAME: &str = "MotionBalance";

/// Power/authorization state of the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
}

impl AdapterState {
    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }

    /// States that need outside intervention (user, OS settings, hardware).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AdapterState::PoweredOff | AdapterState::Unauthorized | AdapterState::Unsupported
        )
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Unknown => "unknown",
            AdapterState::Resetting => "resetting",
            AdapterState::PoweredOn => "powered on",
            AdapterState::PoweredOff => "powered off",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Opaque remote device handle assigned by the adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Outbound queue full. The adapter emits `ReadyToSend` once it drains.
    QueueFull,
}

/// Asynchronous notifications from the radio.
#[derive(Clone, Debug, PartialEq)]
pub enum AdapterEvent {
    StateChanged(AdapterState),

    // Advertiser side
    ServiceRegistered(Result<(), String>),
    AdvertisingStarted(Result<(), String>),
    PeerSubscribed(PeerId),
    PeerUnsubscribed(PeerId),
    ReadyToSend,

    // Scanner side
    Discovered(PeerId),
    Connected(PeerId),
    ConnectFailed(PeerId, String),
    SubscribeCompleted(PeerId, Result<(), String>),

    /// `error` is `None` for an orderly disconnect.
    Disconnected {
        peer: PeerId,
        error: Option<String>,
    },
    DataReceived(Vec<u8>),
}

/// Commands a radio must accept. Every command completes asynchronously
/// through an [`AdapterEvent`]; none of them block.
pub trait WirelessAdapter: Send {
    fn state(&self) -> AdapterState;

    fn register_service(&mut self, service: &str);
    fn start_advertising(&mut self, service: &str, local_name: &str);
    fn stop_advertising(&mut self);

    fn start_scan(&mut self, service: &str);
    fn stop_scan(&mut self);
    fn connect(&mut self, peer: PeerId);
    fn disconnect(&mut self, peer: PeerId);
    /// Enable notifications on the motion characteristic of `service`.
    fn subscribe(&mut self, peer: PeerId, service: &str);

    fn send(&mut self, payload: &[u8]) -> SendOutcome;

    /// Release the radio. No events may be emitted afterwards.
    fn shutdown(&mut self) {}
}
