use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::compensation::CompensationSnapshot;
use crate::sampler::{SamplerStats, SamplerStatus};
use crate::transport::{ConnectionState, LinkStats};
use crate::types::current_timestamp;

/// Session-wide counters across all three domains.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct SessionStats {
    pub samples_filtered: u64,
    pub samples_sent: u64,
    pub samples_received: u64,
    pub malformed_payloads: u64,
    pub send_retries: u64,
    pub sends_superseded: u64,
    pub sends_dropped: u64,
}

impl SessionStats {
    pub fn collect(sampler: &SamplerStats, sender: &LinkStats, receiver: &LinkStats) -> Self {
        SessionStats {
            samples_filtered: sampler.published + sampler.calibration_samples,
            samples_sent: sender.sent,
            samples_received: receiver.received,
            malformed_payloads: sender.malformed + receiver.malformed,
            send_retries: sender.send_retries,
            sends_superseded: sender.superseded,
            sends_dropped: sender.dropped,
        }
    }
}

/// Snapshot written to disk by the CLI for external dashboards.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub generated_at: String,
    pub uptime_seconds: u64,
    // Sampler
    pub sampling: bool,
    pub sample_rate_hz: f64,
    pub calibrating: bool,
    pub low_accuracy: bool,
    pub battery_low: bool,
    pub sampler_error: Option<String>,
    // Safety
    pub safety: String,
    pub wellbeing: String,
    // Link
    pub advertiser_state: String,
    pub scanner_state: String,
    pub advertiser_error: Option<String>,
    pub scanner_error: Option<String>,
    // Compensation
    pub target_velocity: [f64; 2],
    pub current_velocity: [f64; 2],
    pub marker_count: usize,
    pub render_ticks: u64,
    pub session: SessionStats,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            generated_at: Utc::now().to_rfc3339(),
            uptime_seconds: 0,
            sampling: false,
            sample_rate_hz: 0.0,
            calibrating: false,
            low_accuracy: false,
            battery_low: false,
            sampler_error: None,
            safety: String::new(),
            wellbeing: String::new(),
            advertiser_state: ConnectionState::Idle.to_string(),
            scanner_state: ConnectionState::Idle.to_string(),
            advertiser_error: None,
            scanner_error: None,
            target_velocity: [0.0; 2],
            current_velocity: [0.0; 2],
            marker_count: 0,
            render_ticks: 0,
            session: SessionStats::default(),
        }
    }

    pub fn with_sampler(mut self, status: &SamplerStatus) -> Self {
        self.sampling = status.running;
        self.sample_rate_hz = if status.running { status.rate.hz() } else { 0.0 };
        self.calibrating = status.calibrating;
        self.low_accuracy = status.advisory.low_accuracy;
        self.battery_low = status.advisory.battery_low;
        self.sampler_error = status.last_error.as_ref().map(|e| e.to_string());
        self
    }

    pub fn with_compensation(mut self, snap: &CompensationSnapshot) -> Self {
        self.target_velocity = snap.target_velocity;
        self.current_velocity = snap.current_velocity;
        self.marker_count = snap.marker_count;
        self.render_ticks = snap.ticks;
        self
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}
