//! Sender-side sampling: raw sensor ticks in, filtered samples out.
//!
//! `SamplerCore` is the synchronous pipeline (accuracy → filter → safety →
//! routing). `MotionSampler` owns the sensor and drives the core from a tokio
//! task, publishing the newest sample on a watch channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::accuracy::AccuracyTracker;
use crate::battery::{BatteryGovernor, BatteryProbe};
use crate::error::{MotionError, MotionResult, SettingsError};
use crate::filter::MotionFilter;
use crate::safety::{SafetyMonitor, SafetyStatus, WellbeingStatus};
use crate::settings::{FilterSettings, PipelineConfig};
use crate::types::{MotionSample, SampleRate};

/// Physical motion sensor.
pub trait MotionSensor: Send + 'static {
    /// Begin delivering raw readings at `rate`.
    fn start(&mut self, rate: SampleRate) -> MotionResult<mpsc::Receiver<MotionSample>>;
    /// Halt delivery and release the hardware. Must be idempotent.
    fn stop(&mut self);
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Non-fatal conditions, surfaced as state and never as errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Advisory {
    pub low_accuracy: bool,
    pub battery_low: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerStatus {
    pub running: bool,
    pub rate: SampleRate,
    pub calibrating: bool,
    pub advisory: Advisory,
    /// Why the sampling task ended on its own. Cleared by the next start.
    pub last_error: Option<MotionError>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub ticks: u64,
    pub published: u64,
    pub dropped_non_finite: u64,
    pub calibration_samples: u64,
}

// ─── Synchronous core ────────────────────────────────────────────────────────

struct Calibration {
    quota: usize,
    samples: Vec<MotionSample>,
    done: oneshot::Sender<Vec<MotionSample>>,
}

/// Result of one processed tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub sample: MotionSample,
    /// False while the sample was diverted to calibration.
    pub publish: bool,
    pub status_changed: bool,
}

pub struct SamplerCore {
    settings: FilterSettings,
    filter: MotionFilter,
    previous: MotionSample,
    accuracy: AccuracyTracker,
    governor: BatteryGovernor,
    calibration: Option<Calibration>,
    calibration_quota: usize,
    safety: Option<SafetyMonitor>,
    running: bool,
    last_error: Option<MotionError>,
    stats: SamplerStats,
}

impl SamplerCore {
    pub fn new(settings: FilterSettings, config: &PipelineConfig) -> Self {
        Self {
            filter: MotionFilter::from_settings(&settings),
            settings,
            previous: MotionSample::ZERO,
            accuracy: AccuracyTracker::new(config.accuracy_window, config.accuracy_noise_threshold),
            governor: BatteryGovernor::from_config(config),
            calibration: None,
            calibration_quota: config.calibration_quota,
            safety: None,
            running: false,
            last_error: None,
            stats: SamplerStats::default(),
        }
    }

    pub fn with_safety(mut self, safety: SafetyMonitor) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Swap tunables. The next processed tick uses them.
    pub fn set_settings(&mut self, settings: FilterSettings) {
        self.filter = MotionFilter::from_settings(&settings);
        self.settings = settings;
    }

    pub fn process(&mut self, raw: &MotionSample) -> Option<Tick> {
        self.stats.ticks += 1;
        if !raw.is_finite() {
            self.stats.dropped_non_finite += 1;
            log::debug!("[sampler] dropping non-finite reading");
            return None;
        }

        let mut status_changed = false;
        if let Some(low) = self.accuracy.record(raw.acceleration_magnitude()) {
            if low {
                log::warn!("[sampler] motion sensor accuracy is too low");
            } else {
                log::info!("[sampler] motion sensor accuracy recovered");
            }
            status_changed = true;
        }

        let sample = self.filter.apply(raw, &self.previous);
        self.previous = sample;

        if let Some(safety) = self.safety.as_mut() {
            safety.observe(&sample);
        }

        let mut publish = true;
        if let Some(mut cal) = self.calibration.take() {
            publish = false;
            cal.samples.push(sample);
            self.stats.calibration_samples += 1;
            if cal.samples.len() >= cal.quota {
                log::info!("[sampler] calibration complete ({} samples)", cal.samples.len());
                // Receiver may have been dropped; calibration ends either way
                let _ = cal.done.send(cal.samples);
                status_changed = true;
            } else {
                self.calibration = Some(cal);
            }
        }
        if publish {
            self.stats.published += 1;
        }

        Some(Tick {
            sample,
            publish,
            status_changed,
        })
    }

    /// Divert the next `quota` samples to the returned receiver.
    pub fn start_calibration(&mut self) -> oneshot::Receiver<Vec<MotionSample>> {
        let (done, rx) = oneshot::channel();
        log::info!("[sampler] calibration started");
        self.calibration = Some(Calibration {
            quota: self.calibration_quota.max(1),
            samples: Vec::with_capacity(self.calibration_quota),
            done,
        });
        rx
    }

    /// Abandon calibration. The receiver sees a closed channel.
    pub fn stop_calibration(&mut self) {
        if self.calibration.take().is_some() {
            log::info!("[sampler] calibration cancelled");
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Calibration always samples at the highest rate.
    pub fn effective_rate(&self) -> SampleRate {
        if self.is_calibrating() {
            SampleRate::Normal
        } else {
            self.governor.rate()
        }
    }

    pub fn update_battery_level(&mut self, level: f64) {
        if self.governor.update_level(level).is_some() {
            log::info!("[sampler] battery optimization -> {:?}", self.governor.rate());
        }
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        if self.governor.set_foreground(foreground).is_some() {
            log::info!("[sampler] focus change -> {:?}", self.governor.rate());
        }
    }

    pub fn advisory(&self) -> Advisory {
        Advisory {
            low_accuracy: self.accuracy.is_low_accuracy(),
            battery_low: self.governor.is_battery_low(),
        }
    }

    pub fn status(&self) -> SamplerStatus {
        SamplerStatus {
            running: self.running,
            rate: self.effective_rate(),
            calibrating: self.is_calibrating(),
            advisory: self.advisory(),
            last_error: self.last_error.clone(),
        }
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    pub fn safety(&self) -> Option<&SafetyMonitor> {
        self.safety.as_ref()
    }

    pub fn safety_mut(&mut self) -> Option<&mut SafetyMonitor> {
        self.safety.as_mut()
    }
}

// ─── Tokio driver ────────────────────────────────────────────────────────────

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedSensor = Arc<Mutex<Box<dyn MotionSensor>>>;

struct Outputs {
    samples: watch::Sender<Option<MotionSample>>,
    status: watch::Sender<SamplerStatus>,
    rate: watch::Sender<SampleRate>,
}

impl Outputs {
    /// Publish status and rate derived from `core`. Only real changes wake receivers.
    fn sync(&self, core: &SamplerCore) {
        let status = core.status();
        self.status.send_if_modified(|s| {
            let changed = *s != status;
            *s = status;
            changed
        });
        let rate = core.effective_rate();
        self.rate.send_if_modified(|r| {
            let changed = *r != rate;
            *r = rate;
            changed
        });
    }
}

/// Held by the sampling task. Dropping it, on return or on abort, releases
/// the sensor and marks the sampler stopped.
struct Lease {
    sensor: SharedSensor,
    core: Arc<Mutex<SamplerCore>>,
    outputs: Arc<Outputs>,
}

impl Lease {
    fn fail(&self, err: MotionError) {
        log::error!("[sampler] sampling stopped: {}", err);
        lock(&self.core).last_error = Some(err);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        lock(&self.sensor).stop();
        let mut core = lock(&self.core);
        core.running = false;
        self.outputs.sync(&core);
    }
}

pub struct MotionSampler {
    core: Arc<Mutex<SamplerCore>>,
    outputs: Arc<Outputs>,
    sensor: SharedSensor,
    battery: Option<Arc<dyn BatteryProbe>>,
    battery_poll_interval: Duration,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MotionSampler {
    pub fn new(
        sensor: Box<dyn MotionSensor>,
        settings: FilterSettings,
        config: &PipelineConfig,
    ) -> Self {
        let core = SamplerCore::new(settings, config);
        let (samples, _) = watch::channel(None);
        let (status, _) = watch::channel(core.status());
        let (rate, _) = watch::channel(core.effective_rate());
        Self {
            core: Arc::new(Mutex::new(core)),
            outputs: Arc::new(Outputs { samples, status, rate }),
            sensor: Arc::new(Mutex::new(sensor)),
            battery: None,
            battery_poll_interval: config.battery_poll_interval,
            shutdown: None,
            task: None,
        }
    }

    pub fn with_safety(self, safety: SafetyMonitor) -> Self {
        lock(&self.core).safety = Some(safety);
        self
    }

    pub fn with_battery_probe(mut self, probe: Box<dyn BatteryProbe>) -> Self {
        self.battery = Some(Arc::from(probe));
        self
    }

    /// Enable the sensor and begin sampling.
    ///
    /// A sampler whose task ended on a sensor failure can be started again
    /// without calling [`stop`](Self::stop) first.
    pub fn start(&mut self) -> MotionResult<()> {
        self.reap();
        if self.task.is_some() {
            return Err(MotionError::AlreadyRunning);
        }

        let rate = lock(&self.core).effective_rate();
        let readings = lock(&self.sensor).start(rate).map_err(|e| {
            log::error!("[sampler] failed to start sensor: {}", e);
            e
        })?;
        log::info!("[sampler] started at {} Hz", rate.hz());

        {
            let mut core = lock(&self.core);
            core.running = true;
            core.last_error = None;
            self.outputs.sync(&core);
        }
        let rate_rx = self.outputs.rate.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let lease = Lease {
            sensor: self.sensor.clone(),
            core: self.core.clone(),
            outputs: self.outputs.clone(),
        };

        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(sampling_loop(
            lease,
            self.battery.clone(),
            self.battery_poll_interval,
            readings,
            rate_rx,
            shutdown_rx,
        )));
        Ok(())
    }

    /// Forget a sampling task that already ended on its own.
    fn reap(&mut self) {
        if self.task.as_ref().is_some_and(|t| t.is_finished()) {
            log::debug!("[sampler] reaping ended sampling task");
            self.task = None;
            self.shutdown = None;
        }
    }

    /// Halt sampling and release the sensor. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[sampler] sampling task failed: {}", e);
            }
            log::info!("[sampler] stopped");
        }
        lock(&self.sensor).stop();
        let mut core = lock(&self.core);
        core.running = false;
        self.outputs.sync(&core);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.core).running
    }

    pub fn set_filter_settings(&self, settings: FilterSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        lock(&self.core).set_settings(settings);
        Ok(())
    }

    pub fn filter_settings(&self) -> FilterSettings {
        lock(&self.core).settings().clone()
    }

    pub fn update_battery_level(&self, level: f64) {
        let mut core = lock(&self.core);
        core.update_battery_level(level);
        self.outputs.sync(&core);
    }

    pub fn set_foreground(&self, foreground: bool) {
        let mut core = lock(&self.core);
        core.set_foreground(foreground);
        self.outputs.sync(&core);
    }

    pub fn start_calibration(&self) -> oneshot::Receiver<Vec<MotionSample>> {
        let mut core = lock(&self.core);
        let rx = core.start_calibration();
        self.outputs.sync(&core);
        rx
    }

    pub fn stop_calibration(&self) {
        let mut core = lock(&self.core);
        core.stop_calibration();
        self.outputs.sync(&core);
    }

    /// Newest filtered sample (last-value-wins).
    pub fn samples(&self) -> watch::Receiver<Option<MotionSample>> {
        self.outputs.samples.subscribe()
    }

    /// Running flag, rate, advisories and the error that ended sampling, if any.
    pub fn status(&self) -> watch::Receiver<SamplerStatus> {
        self.outputs.status.subscribe()
    }

    pub fn stats(&self) -> SamplerStats {
        lock(&self.core).stats()
    }

    pub fn safety_status(&self) -> Option<SafetyStatus> {
        lock(&self.core).safety().map(|s| s.status().clone())
    }

    pub fn wellbeing_status(&self) -> Option<WellbeingStatus> {
        lock(&self.core).safety().map(|s| s.wellbeing().clone())
    }

    /// Restart the safety session clock and counters.
    pub fn reset_session(&self) {
        if let Some(safety) = lock(&self.core).safety_mut() {
            safety.reset_session();
        }
    }
}

impl Drop for MotionSampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        lock(&self.sensor).stop();
    }
}

async fn sampling_loop(
    lease: Lease,
    battery: Option<Arc<dyn BatteryProbe>>,
    battery_poll_interval: Duration,
    mut readings: mpsc::Receiver<MotionSample>,
    mut rate_rx: watch::Receiver<SampleRate>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut battery_poll = interval(battery_poll_interval);
    battery_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            changed = rate_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let rate = *rate_rx.borrow_and_update();
                let restarted = {
                    let mut sensor = lock(&lease.sensor);
                    sensor.stop();
                    sensor.start(rate)
                };
                match restarted {
                    Ok(rx) => {
                        readings = rx;
                        log::info!("[sampler] sample rate now {} Hz", rate.hz());
                    }
                    Err(e) => {
                        lease.fail(e);
                        break;
                    }
                }
            }
            reading = readings.recv() => {
                let Some(raw) = reading else {
                    lease.fail(MotionError::Sensor("sensor stream ended".into()));
                    break;
                };
                let mut core = lock(&lease.core);
                if let Some(tick) = core.process(&raw) {
                    if tick.publish {
                        lease.outputs.samples.send_replace(Some(tick.sample));
                    }
                    if tick.status_changed {
                        lease.outputs.sync(&core);
                    }
                }
            }
            _ = battery_poll.tick(), if battery.is_some() => {
                if let Some(level) = battery.as_ref().and_then(|b| b.level()) {
                    let mut core = lock(&lease.core);
                    core.update_battery_level(level);
                    lease.outputs.sync(&core);
                }
            }
        }
    }
}
