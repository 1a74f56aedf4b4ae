//! Receiving-side compensation: arriving samples steer a target velocity,
//! a fixed render clock eases the marker field toward it.
//!
//! `CompensationEngine` is plain state with no clock of its own. The render
//! driver below owns one and ticks it from a tokio interval.

use std::collections::VecDeque;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::SettingsError;
use crate::settings::FilterSettings;
use crate::types::{MotionSample, ScreenBounds, Vec2};

/// Receives the marker field once per render tick.
pub trait RenderSink: Send {
    fn present(&mut self, positions: &[Vec2]);
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Mean of the window, then dead-zone, then clamp, per axis.
pub fn target_from_history(
    history: &VecDeque<Vec2>,
    velocity_threshold: f64,
    max_velocity: f64,
) -> Vec2 {
    if history.is_empty() {
        return Vec2::ZERO;
    }
    let mean = history.iter().fold(Vec2::ZERO, |acc, v| acc + *v) / history.len() as f64;
    let axis = |v: f64| {
        let v = if v.abs() < velocity_threshold { 0.0 } else { v };
        v.clamp(-max_velocity, max_velocity)
    };
    Vec2::new(axis(mean.x), axis(mean.y))
}

/// Toroidal wrap into `[0, extent)`.
fn wrap(v: f64, extent: f64) -> f64 {
    let w = v.rem_euclid(extent);
    // rem_euclid can round up to `extent` for tiny negative inputs
    if w >= extent {
        0.0
    } else {
        w
    }
}

pub struct CompensationEngine {
    settings: FilterSettings,
    gain: f64,
    bounds: ScreenBounds,
    history: VecDeque<Vec2>,
    target: Vec2,
    current: Vec2,
    positions: Vec<Vec2>,
    rng: ChaCha8Rng,
    samples_applied: u64,
    ticks: u64,
}

impl CompensationEngine {
    pub fn new(settings: FilterSettings, bounds: ScreenBounds, gain: f64, seed: u64) -> Self {
        let mut engine = Self {
            history: VecDeque::with_capacity(settings.history_size),
            settings,
            gain,
            bounds,
            target: Vec2::ZERO,
            current: Vec2::ZERO,
            positions: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            samples_applied: 0,
            ticks: 0,
        };
        engine.reseed();
        engine
    }

    /// Fresh uniformly random positions for `dot_count` markers.
    fn reseed(&mut self) {
        let (w, h) = (self.bounds.width(), self.bounds.height());
        let rng = &mut self.rng;
        self.positions = (0..self.settings.dot_count)
            .map(|_| Vec2::new(rng.gen_range(0.0..w), rng.gen_range(0.0..h)))
            .collect();
        log::debug!("[compensation] seeded {} markers", self.positions.len());
    }

    /// Fold one received sample into the target velocity. Non-finite samples
    /// leave the previous state in place.
    pub fn on_sample(&mut self, sample: &MotionSample) -> bool {
        if !sample.is_finite() {
            log::warn!("[compensation] ignoring non-finite sample");
            return false;
        }
        let velocity = Vec2::new(
            -sample.rotation_rate_x * self.gain,
            -sample.rotation_rate_y * self.gain,
        );
        self.history.push_back(velocity);
        while self.history.len() > self.settings.history_size {
            self.history.pop_front();
        }
        self.retarget();
        self.samples_applied += 1;
        true
    }

    fn retarget(&mut self) {
        self.target = target_from_history(
            &self.history,
            self.settings.velocity_threshold,
            self.settings.max_velocity,
        );
    }

    /// One render step: ease toward the target, move and wrap every marker.
    pub fn tick(&mut self) -> &[Vec2] {
        self.current += (self.target - self.current) * self.settings.smoothing_factor;
        let (w, h) = (self.bounds.width(), self.bounds.height());
        let v = self.current;
        for p in &mut self.positions {
            *p = Vec2::new(wrap(p.x + v.x, w), wrap(p.y + v.y, h));
        }
        self.ticks += 1;
        &self.positions
    }

    pub fn set_settings(&mut self, settings: FilterSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let reseed = settings.dot_count != self.settings.dot_count;
        self.settings = settings;
        while self.history.len() > self.settings.history_size {
            self.history.pop_front();
        }
        self.retarget();
        if reseed {
            self.reseed();
        }
        Ok(())
    }

    pub fn set_bounds(&mut self, bounds: ScreenBounds) {
        self.bounds = bounds;
        self.reseed();
    }

    pub fn target_velocity(&self) -> Vec2 {
        self.target
    }

    pub fn current_velocity(&self) -> Vec2 {
        self.current
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn bounds(&self) -> ScreenBounds {
        self.bounds
    }

    pub fn snapshot(&self) -> CompensationSnapshot {
        CompensationSnapshot {
            target_velocity: [self.target.x, self.target.y],
            current_velocity: [self.current.x, self.current.y],
            marker_count: self.positions.len(),
            samples_applied: self.samples_applied,
            ticks: self.ticks,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CompensationSnapshot {
    pub target_velocity: [f64; 2],
    pub current_velocity: [f64; 2],
    pub marker_count: usize,
    pub samples_applied: u64,
    pub ticks: u64,
}

// ─── Render driver ───────────────────────────────────────────────────────────

enum RenderCommand {
    Settings(FilterSettings),
    Bounds(ScreenBounds),
}

pub struct RenderHandle {
    commands: mpsc::UnboundedSender<RenderCommand>,
    snapshot: watch::Receiver<CompensationSnapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RenderHandle {
    /// Run `engine` on a fixed render clock, reading the newest sample from
    /// `inbound` and handing positions to `sink` every tick.
    pub fn spawn(
        engine: CompensationEngine,
        inbound: watch::Receiver<Option<MotionSample>>,
        sink: Box<dyn RenderSink>,
        render_interval: Duration,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(engine.snapshot());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(render_loop(
            engine,
            inbound,
            sink,
            render_interval,
            command_rx,
            snapshot_tx,
            shutdown_rx,
        ));
        RenderHandle {
            commands,
            snapshot,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Validated here; applied before the next render tick.
    pub fn set_settings(&self, settings: FilterSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let _ = self.commands.send(RenderCommand::Settings(settings));
        Ok(())
    }

    pub fn set_bounds(&self, bounds: ScreenBounds) {
        let _ = self.commands.send(RenderCommand::Bounds(bounds));
    }

    pub fn snapshot(&self) -> watch::Receiver<CompensationSnapshot> {
        self.snapshot.clone()
    }

    /// Stop the render clock. No `present` call happens after this returns.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[compensation] render task failed: {}", e);
            }
        }
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn render_loop(
    mut engine: CompensationEngine,
    mut inbound: watch::Receiver<Option<MotionSample>>,
    mut sink: Box<dyn RenderSink>,
    render_interval: Duration,
    mut commands: mpsc::UnboundedReceiver<RenderCommand>,
    snapshot: watch::Sender<CompensationSnapshot>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut clock = interval(render_interval);
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inbound_open = true;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(cmd) = commands.recv() => match cmd {
                RenderCommand::Settings(settings) => {
                    if let Err(e) = engine.set_settings(settings) {
                        log::warn!("[compensation] rejected settings: {}", e);
                    }
                }
                RenderCommand::Bounds(bounds) => engine.set_bounds(bounds),
            },
            changed = inbound.changed(), if inbound_open => {
                if changed.is_err() {
                    inbound_open = false;
                    continue;
                }
                let latest = *inbound.borrow_and_update();
                if let Some(sample) = latest {
                    engine.on_sample(&sample);
                }
            }
            _ = clock.tick() => {
                sink.present(engine.tick());
                snapshot.send_replace(engine.snapshot());
            }
        }
    }
    log::info!("[compensation] render clock stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    fn bounds() -> ScreenBounds {
        ScreenBounds::new(800.0, 600.0).unwrap()
    }

    fn rot(x: f64, y: f64) -> MotionSample {
        let mut s = MotionSample::ZERO;
        s.rotation_rate_x = x;
        s.rotation_rate_y = y;
        s
    }

    fn engine(settings: FilterSettings) -> CompensationEngine {
        CompensationEngine::new(settings, bounds(), 10.0, 7)
    }

    #[test]
    fn test_single_sample_target() {
        let mut s = FilterSettings::default();
        s.history_size = 1;
        let mut e = engine(s);
        e.on_sample(&rot(-0.5, 0.0));
        assert_relative_eq!(e.target_velocity().x, 5.0);
        assert_eq!(e.target_velocity().y, 0.0);
    }

    #[test]
    fn test_history_mean_and_eviction() {
        let mut s = FilterSettings::default();
        s.history_size = 2;
        let mut e = engine(s);
        e.on_sample(&rot(1.0, 0.0));
        e.on_sample(&rot(2.0, 0.0));
        assert_relative_eq!(e.target_velocity().x, -15.0);
        e.on_sample(&rot(4.0, 0.0));
        assert_eq!(e.history_len(), 2);
        assert_relative_eq!(e.target_velocity().x, -30.0);
    }

    #[test]
    fn test_dead_zone_and_clamp() {
        let mut s = FilterSettings::default();
        s.history_size = 1;
        let mut e = engine(s);
        // 0.005 * 10 = 0.05, under the 0.1 threshold
        e.on_sample(&rot(0.005, -100.0));
        assert_eq!(e.target_velocity().x, 0.0);
        assert_eq!(e.target_velocity().y, 50.0);
    }

    #[test]
    fn test_tick_eases_toward_target() {
        let mut s = FilterSettings::default();
        s.history_size = 1;
        let mut e = engine(s);
        e.on_sample(&rot(-1.0, 0.0));
        e.tick();
        assert_relative_eq!(e.current_velocity().x, 10.0 * 0.15);
        e.tick();
        assert_relative_eq!(e.current_velocity().x, 1.5 + (10.0 - 1.5) * 0.15);
    }

    #[test]
    fn test_markers_move_by_current_velocity() {
        let mut s = FilterSettings::default();
        s.history_size = 1;
        s.smoothing_factor = 1.0;
        let mut e = engine(s);
        let before = e.positions().to_vec();
        e.on_sample(&rot(-1.0, 0.0));
        e.tick();
        for (a, b) in before.iter().zip(e.positions()) {
            assert_relative_eq!(b.x, wrap(a.x + 10.0, 800.0), epsilon = 1e-9);
            assert_relative_eq!(b.y, a.y);
        }
    }

    #[test]
    fn test_dot_count_change_reseeds() {
        let mut e = engine(FilterSettings::default());
        assert_eq!(e.positions().len(), 100);
        let mut s = FilterSettings::default();
        s.dot_count = 50;
        e.set_settings(s).unwrap();
        assert_eq!(e.positions().len(), 50);
        for p in e.positions() {
            assert!(e.bounds().contains(*p));
        }
    }

    #[test]
    fn test_same_dot_count_keeps_positions() {
        let mut e = engine(FilterSettings::default());
        let before = e.positions().to_vec();
        let mut s = FilterSettings::default();
        s.smoothing_factor = 0.5;
        e.set_settings(s).unwrap();
        assert_eq!(e.positions(), &before[..]);
    }

    #[test]
    fn test_history_shrinks_with_settings() {
        let mut e = engine(FilterSettings::default());
        for i in 0..5 {
            e.on_sample(&rot(i as f64, 0.0));
        }
        let mut s = FilterSettings::default();
        s.history_size = 2;
        e.set_settings(s).unwrap();
        assert_eq!(e.history_len(), 2);
        assert_relative_eq!(e.target_velocity().x, -35.0);
    }

    #[test]
    fn test_non_finite_sample_keeps_state() {
        let mut e = engine(FilterSettings::default());
        e.on_sample(&rot(-1.0, 0.0));
        let target = e.target_velocity();
        assert!(!e.on_sample(&rot(f64::NAN, 0.0)));
        assert_eq!(e.target_velocity(), target);
        assert_eq!(e.history_len(), 1);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = engine(FilterSettings::default());
        let b = engine(FilterSettings::default());
        assert_eq!(a.positions(), b.positions());
    }

    #[test]
    fn test_wrap_edges() {
        assert_eq!(wrap(800.0, 800.0), 0.0);
        assert_eq!(wrap(-1.0, 800.0), 799.0);
        assert!(wrap(-1e-18, 800.0) < 800.0);
    }

    proptest! {
        #[test]
        fn prop_target_is_clamped(
            rates in prop::collection::vec((-1.0e4f64..1.0e4, -1.0e4f64..1.0e4), 1..20),
            max_velocity in 0.1f64..100.0,
            history in 1usize..10,
        ) {
            let mut s = FilterSettings::default();
            s.max_velocity = max_velocity;
            s.history_size = history;
            let mut e = engine(s);
            for (x, y) in rates {
                e.on_sample(&rot(x, y));
                let t = e.target_velocity();
                prop_assert!(t.x.abs() <= max_velocity);
                prop_assert!(t.y.abs() <= max_velocity);
            }
        }

        #[test]
        fn prop_markers_stay_on_screen(
            rates in prop::collection::vec((-50.0f64..50.0, -50.0f64..50.0), 1..10),
            ticks in 1usize..200,
            w in 1.0f64..2000.0,
            h in 1.0f64..2000.0,
        ) {
            let mut s = FilterSettings::default();
            s.dot_count = 16;
            let mut e = CompensationEngine::new(s, ScreenBounds::new(w, h).unwrap(), 10.0, 3);
            for (x, y) in rates {
                e.on_sample(&rot(x, y));
            }
            for _ in 0..ticks {
                for p in e.tick() {
                    prop_assert!(p.x >= 0.0 && p.x < w);
                    prop_assert!(p.y >= 0.0 && p.y < h);
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct CountingSink(Arc<Mutex<Vec<usize>>>);

    impl RenderSink for CountingSink {
        fn present(&mut self, positions: &[Vec2]) {
            self.0.lock().unwrap().push(positions.len());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_clock_independent_of_samples() {
        let sink = CountingSink::default();
        let frames = sink.0.clone();
        let (tx, rx) = watch::channel(None);
        let mut handle = RenderHandle::spawn(
            engine(FilterSettings::default()),
            rx,
            Box::new(sink),
            Duration::from_millis(10),
        );

        // No samples at all: frames keep coming
        tokio::time::sleep(Duration::from_millis(105)).await;
        let n = frames.lock().unwrap().len();
        assert!(n >= 10, "only {} frames", n);

        tx.send_replace(Some(rot(-1.0, 0.0)));
        let mut snap = handle.snapshot();
        snap.wait_for(|s| s.samples_applied == 1).await.unwrap();

        let mut s = FilterSettings::default();
        s.dot_count = 50;
        handle.set_settings(s).unwrap();
        snap.wait_for(|s| s.marker_count == 50).await.unwrap();

        handle.shutdown().await;
        let after = frames.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(frames.lock().unwrap().len(), after);
        assert_eq!(frames.lock().unwrap().last(), Some(&50));
    }
}
