//! Simulated collaborators: a sine-wave motion sensor, a settable battery,
//! an in-memory radio pair and a counting render sink. The CLI runs the
//! whole pipeline on these; the tests use them as doubles.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};

use crate::battery::BatteryProbe;
use crate::compensation::RenderSink;
use crate::error::{MotionError, MotionResult};
use crate::sampler::MotionSensor;
use crate::transport::adapter::{AdapterEvent, AdapterState, PeerId, SendOutcome, WirelessAdapter};
use crate::types::{current_timestamp, MotionSample, SampleRate, Vec2};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Sensors ─────────────────────────────────────────────────────────────────

/// Sine-wave device motion with a little seeded noise, like a phone held in
/// a gently rocking vehicle.
pub struct SimulatedSensor {
    seed: u64,
    amplitude: f64,
    available: bool,
    task: Option<JoinHandle<()>>,
}

impl SimulatedSensor {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            amplitude: 1.0,
            available: true,
            task: None,
        }
    }

    /// Scale rotation and acceleration swings.
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// A device without motion hardware.
    pub fn unavailable() -> Self {
        let mut sensor = Self::new(0);
        sensor.available = false;
        sensor
    }
}

fn simulated_reading(t: f64, amplitude: f64, rng: &mut ChaCha8Rng, timestamp: f64) -> MotionSample {
    let mut noise = || rng.gen_range(-0.005..0.005);
    MotionSample {
        pitch: (t * 0.4 * PI).sin() * 0.2 * amplitude + noise(),
        roll: (t * 0.3 * PI).cos() * 0.15 * amplitude + noise(),
        yaw: (t * 0.05 * PI).sin() * 0.5 + noise(),
        rotation_rate_x: (t * 2.0 * PI * 0.4).cos() * 0.5 * amplitude + noise(),
        rotation_rate_y: (t * 2.0 * PI * 0.25).sin() * 0.4 * amplitude + noise(),
        rotation_rate_z: (t * 0.5).sin() * 0.05 + noise(),
        user_acceleration_x: (t * 2.0 * PI).sin() * 0.05 * amplitude + noise(),
        user_acceleration_y: (t * 2.0 * PI).cos() * 0.03 * amplitude + noise(),
        user_acceleration_z: (t * PI).sin() * 0.02 * amplitude + noise(),
        timestamp,
    }
}

impl MotionSensor for SimulatedSensor {
    fn start(&mut self, rate: SampleRate) -> MotionResult<mpsc::Receiver<MotionSample>> {
        if !self.available {
            return Err(MotionError::SensorUnavailable);
        }
        self.stop();

        let (tx, rx) = mpsc::channel(8);
        let amplitude = self.amplitude;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.seed = self.seed.wrapping_add(1);
        let base = current_timestamp();

        self.task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let mut clock = interval(rate.interval());
            let mut count = 0u64;
            loop {
                clock.tick().await;
                let t = started.elapsed().as_secs_f64();
                let reading = simulated_reading(t, amplitude, &mut rng, base + t);
                match tx.try_send(reading) {
                    Ok(()) => {
                        count += 1;
                        if count % 600 == 0 {
                            log::debug!("[sim] {} readings at {} Hz", count, rate.hz());
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                    // Consumer behind; newest reading will follow shortly
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                }
            }
        }));
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct ManualInner {
    tx: Option<mpsc::Sender<MotionSample>>,
    rates: Vec<SampleRate>,
    fail: Option<MotionError>,
}

/// Sensor whose readings are pushed by hand. Clones share state.
#[derive(Clone, Default)]
pub struct ManualSensor {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(err: MotionError) -> Self {
        let sensor = Self::new();
        lock(&sensor.inner).fail = Some(err);
        sensor
    }

    /// Deliver a raw reading. `false` if the sensor is not running.
    pub async fn push(&self, reading: MotionSample) -> bool {
        let tx = lock(&self.inner).tx.clone();
        match tx {
            Some(tx) => tx.send(reading).await.is_ok(),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner).tx.is_some()
    }

    /// Rates passed to every successful `start`, in order.
    pub fn started_rates(&self) -> Vec<SampleRate> {
        lock(&self.inner).rates.clone()
    }
}

impl MotionSensor for ManualSensor {
    fn start(&mut self, rate: SampleRate) -> MotionResult<mpsc::Receiver<MotionSample>> {
        let mut inner = lock(&self.inner);
        if let Some(err) = inner.fail.clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(16);
        inner.tx = Some(tx);
        inner.rates.push(rate);
        Ok(rx)
    }

    fn stop(&mut self) {
        lock(&self.inner).tx = None;
    }
}

/// Battery whose level is set from outside. Clones share the level.
#[derive(Clone)]
pub struct SimulatedBattery {
    level: Arc<Mutex<f64>>,
}

impl SimulatedBattery {
    pub fn new(level: f64) -> Self {
        Self {
            level: Arc::new(Mutex::new(level)),
        }
    }

    pub fn set_level(&self, level: f64) {
        *lock(&self.level) = level;
    }
}

impl BatteryProbe for SimulatedBattery {
    fn level(&self) -> Option<f64> {
        Some(*lock(&self.level))
    }
}

// ─── Loopback radio ──────────────────────────────────────────────────────────

/// How the scanner sees the advertiser.
pub const LOOPBACK_PERIPHERAL: PeerId = PeerId(1);
/// How the advertiser sees the scanner.
pub const LOOPBACK_CENTRAL: PeerId = PeerId(2);

struct Air {
    peripheral_events: mpsc::UnboundedSender<AdapterEvent>,
    central_events: mpsc::UnboundedSender<AdapterEvent>,
    peripheral_state: AdapterState,
    central_state: AdapterState,
    service: Option<String>,
    advertised: Option<String>,
    scanning: Option<String>,
    connected: bool,
    subscribed: bool,
    advertise_failures: u32,
    queue_full: u32,
    peripheral_closed: bool,
    central_closed: bool,
}

impl Air {
    fn to_peripheral(&self, event: AdapterEvent) {
        if !self.peripheral_closed {
            let _ = self.peripheral_events.send(event);
        }
    }

    fn to_central(&self, event: AdapterEvent) {
        if !self.central_closed {
            let _ = self.central_events.send(event);
        }
    }

    fn discover(&self) {
        if self.advertised.is_some() && self.advertised == self.scanning {
            self.to_central(AdapterEvent::Discovered(LOOPBACK_PERIPHERAL));
        }
    }

    /// Orderly teardown of the connection, seen by both sides.
    fn hang_up(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if self.subscribed {
            self.subscribed = false;
            self.to_peripheral(AdapterEvent::PeerUnsubscribed(LOOPBACK_CENTRAL));
        }
        self.to_central(AdapterEvent::Disconnected {
            peer: LOOPBACK_PERIPHERAL,
            error: None,
        });
    }
}

/// Advertiser end of a [`LoopbackRadio`].
pub struct LoopbackPeripheral {
    air: Arc<Mutex<Air>>,
}

/// Scanner end of a [`LoopbackRadio`].
pub struct LoopbackCentral {
    air: Arc<Mutex<Air>>,
}

/// Fault injection for a running loopback pair.
#[derive(Clone)]
pub struct LoopbackControl {
    air: Arc<Mutex<Air>>,
}

/// In-memory radio pair. Both ends start powered on.
pub struct LoopbackRadio {
    pub peripheral: LoopbackPeripheral,
    pub peripheral_events: mpsc::UnboundedReceiver<AdapterEvent>,
    pub central: LoopbackCentral,
    pub central_events: mpsc::UnboundedReceiver<AdapterEvent>,
    pub control: LoopbackControl,
}

impl LoopbackRadio {
    pub fn pair() -> Self {
        let (peripheral_events, peripheral_rx) = mpsc::unbounded_channel();
        let (central_events, central_rx) = mpsc::unbounded_channel();
        let air = Arc::new(Mutex::new(Air {
            peripheral_events,
            central_events,
            peripheral_state: AdapterState::PoweredOn,
            central_state: AdapterState::PoweredOn,
            service: None,
            advertised: None,
            scanning: None,
            connected: false,
            subscribed: false,
            advertise_failures: 0,
            queue_full: 0,
            peripheral_closed: false,
            central_closed: false,
        }));
        LoopbackRadio {
            peripheral: LoopbackPeripheral { air: air.clone() },
            peripheral_events: peripheral_rx,
            central: LoopbackCentral { air: air.clone() },
            central_events: central_rx,
            control: LoopbackControl { air },
        }
    }
}

impl LoopbackControl {
    pub fn set_peripheral_state(&self, state: AdapterState) {
        let mut air = lock(&self.air);
        air.peripheral_state = state;
        if !state.is_ready() {
            air.advertised = None;
            air.hang_up();
        }
        air.to_peripheral(AdapterEvent::StateChanged(state));
    }

    pub fn set_central_state(&self, state: AdapterState) {
        let mut air = lock(&self.air);
        air.central_state = state;
        if !state.is_ready() {
            air.scanning = None;
            air.hang_up();
        }
        air.to_central(AdapterEvent::StateChanged(state));
    }

    /// Fail the next `n` advertising starts.
    pub fn fail_advertising(&self, n: u32) {
        lock(&self.air).advertise_failures = n;
    }

    /// Refuse the next `n` sends with a full queue, then signal ready.
    pub fn fill_queue(&self, n: u32) {
        lock(&self.air).queue_full = n;
    }

    /// Drop the connection as if the peer went out of range.
    pub fn drop_link(&self, reason: &str) {
        let mut air = lock(&self.air);
        if !air.connected {
            return;
        }
        air.connected = false;
        air.subscribed = false;
        air.to_central(AdapterEvent::Disconnected {
            peer: LOOPBACK_PERIPHERAL,
            error: Some(reason.to_string()),
        });
        air.to_peripheral(AdapterEvent::Disconnected {
            peer: LOOPBACK_CENTRAL,
            error: Some(reason.to_string()),
        });
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.air).connected
    }
}

impl WirelessAdapter for LoopbackPeripheral {
    fn state(&self) -> AdapterState {
        lock(&self.air).peripheral_state
    }

    fn register_service(&mut self, service: &str) {
        let mut air = lock(&self.air);
        air.service = Some(service.to_string());
        air.to_peripheral(AdapterEvent::ServiceRegistered(Ok(())));
    }

    fn start_advertising(&mut self, service: &str, local_name: &str) {
        let mut air = lock(&self.air);
        if air.advertise_failures > 0 {
            air.advertise_failures -= 1;
            air.to_peripheral(AdapterEvent::AdvertisingStarted(Err(
                "simulated advertising failure".into(),
            )));
            return;
        }
        log::debug!("[sim] advertising {} as {}", service, local_name);
        air.advertised = Some(service.to_string());
        air.to_peripheral(AdapterEvent::AdvertisingStarted(Ok(())));
        air.discover();
    }

    fn stop_advertising(&mut self) {
        lock(&self.air).advertised = None;
    }

    fn start_scan(&mut self, _service: &str) {}

    fn stop_scan(&mut self) {}

    fn connect(&mut self, _peer: PeerId) {}

    fn disconnect(&mut self, _peer: PeerId) {
        lock(&self.air).hang_up();
    }

    fn subscribe(&mut self, _peer: PeerId, _service: &str) {}

    fn send(&mut self, payload: &[u8]) -> SendOutcome {
        let mut air = lock(&self.air);
        if air.queue_full > 0 {
            air.queue_full -= 1;
            if air.queue_full == 0 {
                air.to_peripheral(AdapterEvent::ReadyToSend);
            }
            return SendOutcome::QueueFull;
        }
        if air.subscribed {
            air.to_central(AdapterEvent::DataReceived(payload.to_vec()));
        }
        SendOutcome::Sent
    }

    fn shutdown(&mut self) {
        let mut air = lock(&self.air);
        air.advertised = None;
        air.peripheral_closed = true;
        air.hang_up();
    }
}

impl WirelessAdapter for LoopbackCentral {
    fn state(&self) -> AdapterState {
        lock(&self.air).central_state
    }

    fn register_service(&mut self, _service: &str) {}

    fn start_advertising(&mut self, _service: &str, _local_name: &str) {}

    fn stop_advertising(&mut self) {}

    fn start_scan(&mut self, service: &str) {
        let mut air = lock(&self.air);
        air.scanning = Some(service.to_string());
        air.discover();
    }

    fn stop_scan(&mut self) {
        lock(&self.air).scanning = None;
    }

    fn connect(&mut self, peer: PeerId) {
        let mut air = lock(&self.air);
        if air.advertised.is_some() && !air.peripheral_closed {
            air.connected = true;
            air.to_central(AdapterEvent::Connected(peer));
        } else {
            air.to_central(AdapterEvent::ConnectFailed(peer, "peer not reachable".into()));
        }
    }

    fn disconnect(&mut self, _peer: PeerId) {
        lock(&self.air).hang_up();
    }

    fn subscribe(&mut self, peer: PeerId, service: &str) {
        let mut air = lock(&self.air);
        if air.connected && air.service.as_deref() == Some(service) {
            air.subscribed = true;
            air.to_central(AdapterEvent::SubscribeCompleted(peer, Ok(())));
            air.to_peripheral(AdapterEvent::PeerSubscribed(LOOPBACK_CENTRAL));
        } else {
            air.to_central(AdapterEvent::SubscribeCompleted(
                peer,
                Err("motion characteristic not found".into()),
            ));
        }
    }

    fn send(&mut self, payload: &[u8]) -> SendOutcome {
        let air = lock(&self.air);
        if air.connected {
            air.to_peripheral(AdapterEvent::DataReceived(payload.to_vec()));
        }
        SendOutcome::Sent
    }

    fn shutdown(&mut self) {
        let mut air = lock(&self.air);
        air.scanning = None;
        air.central_closed = true;
        air.hang_up();
    }
}

// ─── Render ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub markers: usize,
    /// Centroid of the last presented field.
    pub centroid: [f64; 2],
}

/// Render sink that only keeps frame statistics. Clones share them.
#[derive(Clone, Default)]
pub struct FrameCounter {
    stats: Arc<Mutex<FrameStats>>,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> FrameStats {
        *lock(&self.stats)
    }
}

impl RenderSink for FrameCounter {
    fn present(&mut self, positions: &[Vec2]) {
        let mut stats = lock(&self.stats);
        stats.frames += 1;
        stats.markers = positions.len();
        if !positions.is_empty() {
            let sum = positions.iter().fold(Vec2::ZERO, |acc, p| acc + *p);
            let c = sum / positions.len() as f64;
            stats.centroid = [c.x, c.y];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sensor_rate_and_stop() {
        let mut sensor = SimulatedSensor::new(1);
        let mut rx = sensor.start(SampleRate::Reduced).unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.is_finite());
        assert!(second.timestamp >= first.timestamp);
        assert!((second.timestamp - first.timestamp - 1.0 / 30.0).abs() < 1e-3);

        sensor.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_unavailable_sensor() {
        let mut sensor = SimulatedSensor::unavailable();
        assert!(matches!(
            sensor.start(SampleRate::Normal),
            Err(MotionError::SensorUnavailable)
        ));
    }

    #[test]
    fn test_loopback_handshake() {
        let mut radio = LoopbackRadio::pair();
        radio.peripheral.register_service("svc");
        radio.peripheral.start_advertising("svc", "name");
        radio.central.start_scan("svc");
        assert_eq!(
            radio.central_events.try_recv().unwrap(),
            AdapterEvent::Discovered(LOOPBACK_PERIPHERAL)
        );
        radio.central.connect(LOOPBACK_PERIPHERAL);
        radio.central.subscribe(LOOPBACK_PERIPHERAL, "svc");
        assert!(radio.control.is_connected());

        assert_eq!(radio.peripheral.send(&[1, 2, 3]), SendOutcome::Sent);
        let events: Vec<_> = std::iter::from_fn(|| radio.central_events.try_recv().ok()).collect();
        assert_eq!(events.last(), Some(&AdapterEvent::DataReceived(vec![1, 2, 3])));

        let events: Vec<_> =
            std::iter::from_fn(|| radio.peripheral_events.try_recv().ok()).collect();
        assert!(events.contains(&AdapterEvent::PeerSubscribed(LOOPBACK_CENTRAL)));
    }

    #[test]
    fn test_loopback_queue_full_then_ready() {
        let mut radio = LoopbackRadio::pair();
        radio.control.fill_queue(2);
        assert_eq!(radio.peripheral.send(&[1]), SendOutcome::QueueFull);
        assert_eq!(radio.peripheral.send(&[1]), SendOutcome::QueueFull);
        assert_eq!(
            radio.peripheral_events.try_recv().unwrap(),
            AdapterEvent::ReadyToSend
        );
        assert_eq!(radio.peripheral.send(&[1]), SendOutcome::Sent);
    }

    #[test]
    fn test_frame_counter_centroid() {
        let mut counter = FrameCounter::new();
        counter.present(&[Vec2::new(0.0, 0.0), Vec2::new(2.0, 4.0)]);
        let stats = counter.stats();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.markers, 2);
        assert_eq!(stats.centroid, [1.0, 2.0]);
    }
}
