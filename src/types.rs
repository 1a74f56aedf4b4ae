use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::SettingsError;

/// 2-D vector used for velocities and marker positions.
pub type Vec2 = glam::DVec2;

/// Number of motion channels carried by a sample (timestamp excluded).
pub const MOTION_CHANNELS: usize = 9;

/// One device-motion reading: attitude, rotation rate and user acceleration.
///
/// Raw sensor ticks and filtered output share this shape. `timestamp` is
/// seconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub rotation_rate_x: f64,
    pub rotation_rate_y: f64,
    pub rotation_rate_z: f64,
    pub user_acceleration_x: f64,
    pub user_acceleration_y: f64,
    pub user_acceleration_z: f64,
    pub timestamp: f64,
}

impl MotionSample {
    pub const ZERO: MotionSample = MotionSample {
        pitch: 0.0,
        roll: 0.0,
        yaw: 0.0,
        rotation_rate_x: 0.0,
        rotation_rate_y: 0.0,
        rotation_rate_z: 0.0,
        user_acceleration_x: 0.0,
        user_acceleration_y: 0.0,
        user_acceleration_z: 0.0,
        timestamp: 0.0,
    };

    /// Channels in wire order: attitude, rotation rate, acceleration.
    pub fn channels(&self) -> [f64; MOTION_CHANNELS] {
        [
            self.pitch,
            self.roll,
            self.yaw,
            self.rotation_rate_x,
            self.rotation_rate_y,
            self.rotation_rate_z,
            self.user_acceleration_x,
            self.user_acceleration_y,
            self.user_acceleration_z,
        ]
    }

    pub fn from_channels(c: [f64; MOTION_CHANNELS], timestamp: f64) -> Self {
        Self {
            pitch: c[0],
            roll: c[1],
            yaw: c[2],
            rotation_rate_x: c[3],
            rotation_rate_y: c[4],
            rotation_rate_z: c[5],
            user_acceleration_x: c[6],
            user_acceleration_y: c[7],
            user_acceleration_z: c[8],
            timestamp,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite() && self.channels().iter().all(|v| v.is_finite())
    }

    pub fn acceleration(&self) -> Vector3<f64> {
        Vector3::new(
            self.user_acceleration_x,
            self.user_acceleration_y,
            self.user_acceleration_z,
        )
    }

    pub fn rotation_rate(&self) -> Vector3<f64> {
        Vector3::new(self.rotation_rate_x, self.rotation_rate_y, self.rotation_rate_z)
    }

    pub fn acceleration_magnitude(&self) -> f64 {
        self.acceleration().norm()
    }

    pub fn rotation_magnitude(&self) -> f64 {
        self.rotation_rate().norm()
    }
}

impl Default for MotionSample {
    fn default() -> Self {
        Self::ZERO
    }
}

/// The two fixed sampling rates of the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    /// 60 Hz
    Normal,
    /// 30 Hz, used under battery optimization
    Reduced,
}

impl SampleRate {
    pub fn hz(&self) -> f64 {
        match self {
            SampleRate::Normal => 60.0,
            SampleRate::Reduced => 30.0,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.hz())
    }
}

/// Drawable area of the display the markers live on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenBounds {
    width: f64,
    height: f64,
}

impl ScreenBounds {
    pub fn new(width: f64, height: f64) -> Result<Self, SettingsError> {
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(SettingsError::InvalidBounds { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= 0.0 && p.x < self.width && p.y >= 0.0 && p.y < self.height
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
