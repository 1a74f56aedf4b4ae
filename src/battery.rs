use crate::settings::PipelineConfig;
use crate::types::SampleRate;

/// Source of the host battery level in [0, 1].
pub trait BatteryProbe: Send + Sync {
    /// `None` when the level is unknown (e.g. monitoring unsupported).
    fn level(&self) -> Option<f64>;
}

/// Picks the sampling rate from battery level and foreground focus.
///
/// Battery optimization engages below `low_level` and disengages only above
/// `low_level + hysteresis`. Losing focus forces it on regardless of battery.
#[derive(Clone, Debug)]
pub struct BatteryGovernor {
    low_level: f64,
    hysteresis: f64,
    battery_low: bool,
    foreground: bool,
    last_level: Option<f64>,
}

impl BatteryGovernor {
    pub fn new(low_level: f64, hysteresis: f64) -> Self {
        Self {
            low_level,
            hysteresis,
            battery_low: false,
            foreground: true,
            last_level: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.battery_low_level, config.battery_hysteresis)
    }

    pub fn rate(&self) -> SampleRate {
        if self.is_optimizing() {
            SampleRate::Reduced
        } else {
            SampleRate::Normal
        }
    }

    pub fn is_optimizing(&self) -> bool {
        self.battery_low || !self.foreground
    }

    pub fn is_battery_low(&self) -> bool {
        self.battery_low
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn last_level(&self) -> Option<f64> {
        self.last_level
    }

    /// Feed a measured level. Returns the new rate if it changed.
    pub fn update_level(&mut self, level: f64) -> Option<SampleRate> {
        if !level.is_finite() {
            return None;
        }
        let before = self.rate();
        self.last_level = Some(level);
        self.evaluate();
        let after = self.rate();
        (after != before).then_some(after)
    }

    /// Host focus changed. Returns the new rate if it changed.
    pub fn set_foreground(&mut self, foreground: bool) -> Option<SampleRate> {
        let before = self.rate();
        self.foreground = foreground;
        if foreground {
            self.evaluate();
        }
        let after = self.rate();
        (after != before).then_some(after)
    }

    fn evaluate(&mut self) {
        let Some(level) = self.last_level else {
            return;
        };
        if level < self.low_level {
            if !self.battery_low {
                log::warn!("[battery] level {:.0}% below threshold, throttling", level * 100.0);
            }
            self.battery_low = true;
        } else if self.battery_low && level > self.low_level + self.hysteresis {
            log::info!("[battery] level {:.0}% recovered, full rate", level * 100.0);
            self.battery_low = false;
        }
    }
}
