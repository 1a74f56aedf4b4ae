//! Motion-sickness compensation pipeline.
//!
//! Sender side: [`sampler`] filters device motion, [`safety`] watches its
//! intensity, and a [`transport`] advertiser streams it. Receiver side: a
//! transport scanner receives it and [`compensation`] turns it into a smooth
//! marker field on a fixed render clock.

pub mod accuracy;
pub mod battery;
pub mod compensation;
pub mod error;
pub mod filter;
pub mod live_status;
pub mod safety;
pub mod sampler;
pub mod settings;
pub mod sim;
pub mod transport;
pub mod types;
pub mod wire;

pub use compensation::{CompensationEngine, RenderHandle, RenderSink};
pub use error::{LinkError, MotionError, PayloadError, SettingsError};
pub use filter::MotionFilter;
pub use safety::{FeedbackSink, SafetyMonitor, SafetyStatus, WellbeingStatus};
pub use sampler::{MotionSampler, MotionSensor};
pub use settings::{FilterSettings, MotionPreset, PipelineConfig};
pub use types::{MotionSample, SampleRate, ScreenBounds, Vec2};
