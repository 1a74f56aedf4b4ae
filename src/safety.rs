use std::time::Duration;
use tokio::time::Instant;

use crate::settings::PipelineConfig;
use crate::types::MotionSample;

// ─── Statuses ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum SafetyStatus {
    Normal,
    Warning(String),
    Excessive(String),
}

impl SafetyStatus {
    pub fn message(&self) -> &str {
        match self {
            SafetyStatus::Normal => "Motion levels are normal",
            SafetyStatus::Warning(msg) | SafetyStatus::Excessive(msg) => msg,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WellbeingStatus {
    Good,
    /// Time left until the continuous-usage limit.
    NeedsBreak(Duration),
    StopRecommended,
}

impl WellbeingStatus {
    pub fn message(&self) -> String {
        match self {
            WellbeingStatus::Good => "Everything looks good".to_string(),
            WellbeingStatus::NeedsBreak(remaining) => format!(
                "Consider taking a break in {} minutes",
                remaining.as_secs() / 60
            ),
            WellbeingStatus::StopRecommended => {
                "You've been using the app for a while. Consider stopping for today.".to_string()
            }
        }
    }

    /// `NeedsBreak` with a different remaining time is the same status.
    fn same_kind(&self, other: &WellbeingStatus) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FeedbackStatus {
    Safety(SafetyStatus),
    Wellbeing(WellbeingStatus),
}

/// External collaborator told about every status change.
pub trait FeedbackSink: Send {
    fn notify(&mut self, status: &FeedbackStatus);
}

/// Feedback sink that only logs.
#[derive(Default)]
pub struct LogFeedbackSink;

impl FeedbackSink for LogFeedbackSink {
    fn notify(&mut self, status: &FeedbackStatus) {
        match status {
            FeedbackStatus::Safety(SafetyStatus::Normal) => {
                log::info!("[safety] {}", status_message(status))
            }
            FeedbackStatus::Wellbeing(WellbeingStatus::Good) => {
                log::info!("[wellbeing] {}", status_message(status))
            }
            FeedbackStatus::Safety(_) => log::warn!("[safety] {}", status_message(status)),
            FeedbackStatus::Wellbeing(_) => log::warn!("[wellbeing] {}", status_message(status)),
        }
    }
}

fn status_message(status: &FeedbackStatus) -> String {
    match status {
        FeedbackStatus::Safety(s) => s.message().to_string(),
        FeedbackStatus::Wellbeing(w) => w.message(),
    }
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

/// Classifies motion intensity and session length.
///
/// The exceedance counter integrates danger-level samples and decays by one
/// on every calm sample, so a single spike only ever produces `Warning`.
pub struct SafetyMonitor {
    danger_acceleration: f64,
    danger_rotation: f64,
    excessive_count: u32,
    break_after: Duration,
    stop_after: Duration,

    exceed_count: u32,
    status: SafetyStatus,
    wellbeing: WellbeingStatus,
    session_start: Instant,
    sink: Box<dyn FeedbackSink>,
}

impl SafetyMonitor {
    pub fn new(config: &PipelineConfig, sink: Box<dyn FeedbackSink>) -> Self {
        Self {
            danger_acceleration: config.danger_acceleration,
            danger_rotation: config.danger_rotation,
            excessive_count: config.excessive_count,
            break_after: config.break_after,
            stop_after: config.stop_after,
            exceed_count: 0,
            status: SafetyStatus::Normal,
            wellbeing: WellbeingStatus::Good,
            session_start: Instant::now(),
            sink,
        }
    }

    pub fn status(&self) -> &SafetyStatus {
        &self.status
    }

    pub fn wellbeing(&self) -> &WellbeingStatus {
        &self.wellbeing
    }

    pub fn exceed_count(&self) -> u32 {
        self.exceed_count
    }

    pub fn session_elapsed(&self) -> Duration {
        self.session_start.elapsed()
    }

    /// Feed one filtered sample. Returns the new safety status on change.
    pub fn observe(&mut self, sample: &MotionSample) -> Option<SafetyStatus> {
        let exceeded = sample.acceleration_magnitude() > self.danger_acceleration
            || sample.rotation_magnitude() > self.danger_rotation;

        if exceeded {
            self.exceed_count = self.exceed_count.saturating_add(1);
        } else {
            self.exceed_count = self.exceed_count.saturating_sub(1);
        }

        let changed = self.set_status(self.classify());
        self.evaluate_wellbeing();
        changed
    }

    fn classify(&self) -> SafetyStatus {
        if self.exceed_count > self.excessive_count {
            SafetyStatus::Excessive("Motion is too intense. Consider slowing down.".to_string())
        } else if self.exceed_count > 0 {
            SafetyStatus::Warning("Motion is becoming intense".to_string())
        } else {
            SafetyStatus::Normal
        }
    }

    fn set_status(&mut self, status: SafetyStatus) -> Option<SafetyStatus> {
        if status == self.status {
            return None;
        }
        log::debug!(
            "[safety] {:?} -> {:?} (count {})",
            self.status,
            status,
            self.exceed_count
        );
        self.status = status.clone();
        self.sink.notify(&FeedbackStatus::Safety(status.clone()));
        Some(status)
    }

    /// Re-evaluate session length against the break/stop budgets.
    pub fn evaluate_wellbeing(&mut self) -> Option<WellbeingStatus> {
        self.evaluate_wellbeing_at(self.session_start.elapsed())
    }

    pub fn evaluate_wellbeing_at(&mut self, elapsed: Duration) -> Option<WellbeingStatus> {
        let next = if elapsed < self.break_after {
            WellbeingStatus::Good
        } else if elapsed < self.stop_after {
            WellbeingStatus::NeedsBreak(self.stop_after - elapsed)
        } else {
            WellbeingStatus::StopRecommended
        };
        self.set_wellbeing(next)
    }

    fn set_wellbeing(&mut self, next: WellbeingStatus) -> Option<WellbeingStatus> {
        let changed = !next.same_kind(&self.wellbeing);
        self.wellbeing = next.clone();
        if !changed {
            return None;
        }
        self.sink.notify(&FeedbackStatus::Wellbeing(next.clone()));
        Some(next)
    }

    /// Clear the exceedance counter and restart the session clock.
    pub fn reset_session(&mut self) {
        self.exceed_count = 0;
        self.session_start = Instant::now();
        self.set_status(SafetyStatus::Normal);
        self.set_wellbeing(WellbeingStatus::Good);
    }
}
