use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SettingsError;
use crate::transport::adapter::{MOTION_LOCAL_NAME, MOTION_SERVICE_ID};

// ─── Tunable filter settings ─────────────────────────────────────────────────

/// Tunables shared by the sender-side filter and the receiver-side engine.
///
/// Supplied by an external settings store. The visual fields (`dot_size`,
/// `dot_opacity`, `dot_blur`) are carried for the renderer and never read by
/// the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub dot_count: usize,
    pub dot_size: f64,
    pub dot_opacity: f64,
    pub dot_blur: f64,

    /// Low-pass weight in (0, 1].
    pub filter_weight: f64,
    /// Dead-zone applied per channel before the low-pass.
    pub minimum_movement_threshold: f64,
    /// Dead-zone applied per axis to the target velocity.
    pub velocity_threshold: f64,
    pub max_velocity: f64,
    /// Render-tick interpolation factor in (0, 1].
    pub smoothing_factor: f64,
    pub history_size: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        MotionPreset::Moderate.settings()
    }
}

impl FilterSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        unit_interval("filter_weight", self.filter_weight)?;
        unit_interval("smoothing_factor", self.smoothing_factor)?;
        non_negative("minimum_movement_threshold", self.minimum_movement_threshold)?;
        non_negative("velocity_threshold", self.velocity_threshold)?;
        non_negative("max_velocity", self.max_velocity)?;
        if self.history_size < 1 {
            return Err(SettingsError::OutOfRange {
                field: "history_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parse settings JSON; missing fields fall back to the defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: FilterSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), SettingsError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            reason: format!("{} not in (0, 1]", value),
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), SettingsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            reason: format!("{} is negative or not finite", value),
        })
    }
}

// ─── Presets ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum MotionPreset {
    Gentle,
    Moderate,
    Responsive,
}

impl MotionPreset {
    pub fn settings(&self) -> FilterSettings {
        match self {
            MotionPreset::Gentle => FilterSettings {
                dot_count: 80,
                dot_size: 4.0,
                dot_opacity: 0.25,
                dot_blur: 1.2,
                filter_weight: 0.15,
                minimum_movement_threshold: 0.015,
                velocity_threshold: 0.15,
                max_velocity: 40.0,
                smoothing_factor: 0.12,
                history_size: 6,
            },
            MotionPreset::Moderate => FilterSettings {
                dot_count: 100,
                dot_size: 4.0,
                dot_opacity: 0.3,
                dot_blur: 1.0,
                filter_weight: 0.2,
                minimum_movement_threshold: 0.01,
                velocity_threshold: 0.1,
                max_velocity: 50.0,
                smoothing_factor: 0.15,
                history_size: 5,
            },
            MotionPreset::Responsive => FilterSettings {
                dot_count: 120,
                dot_size: 3.5,
                dot_opacity: 0.35,
                dot_blur: 0.8,
                filter_weight: 0.25,
                minimum_movement_threshold: 0.008,
                velocity_threshold: 0.08,
                max_velocity: 60.0,
                smoothing_factor: 0.18,
                history_size: 4,
            },
        }
    }
}

// ─── Pipeline constants ──────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    // ── Battery throttling ──
    pub battery_low_level: f64,
    pub battery_hysteresis: f64,
    pub battery_poll_interval: Duration,

    // ── Accuracy tracking ──
    pub accuracy_window: usize,
    pub accuracy_noise_threshold: f64,

    // ── Calibration ──
    pub calibration_quota: usize,

    // ── Safety ──
    pub danger_acceleration: f64,
    pub danger_rotation: f64,
    pub excessive_count: u32,
    pub break_after: Duration,
    pub stop_after: Duration,

    // ── Advertiser ──
    pub service_id: String,
    pub local_name: String,
    pub advertise_max_attempts: u32,
    pub advertise_retry_delay: Duration,

    // ── Send backpressure ──
    pub send_retry_delay: Duration,
    /// `None` retries a backpressured payload until it is superseded.
    pub send_retry_limit: Option<u32>,

    // ── Scanner ──
    pub scan_window: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_max_attempts: u32,

    // ── Compensation ──
    pub velocity_gain: f64,
    pub render_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            battery_low_level: 0.20,
            battery_hysteresis: 0.10,
            battery_poll_interval: Duration::from_secs(30),
            accuracy_window: 100,
            accuracy_noise_threshold: 0.8,
            calibration_quota: 100,
            danger_acceleration: 3.0,
            danger_rotation: 5.0,
            excessive_count: 10,
            break_after: Duration::from_secs(20 * 60),
            stop_after: Duration::from_secs(60 * 60),
            service_id: MOTION_SERVICE_ID.to_string(),
            local_name: MOTION_LOCAL_NAME.to_string(),
            advertise_max_attempts: 3,
            advertise_retry_delay: Duration::from_secs(2),
            send_retry_delay: Duration::from_millis(100),
            send_retry_limit: Some(20),
            scan_window: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            reconnect_max_attempts: 5,
            velocity_gain: 10.0,
            render_interval: Duration::from_secs_f64(1.0 / 60.0),
        }
    }
}
