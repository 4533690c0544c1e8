pub mod output;
pub mod trigger;
pub mod waveform;

#[cfg(feature = "cpal-output")]
pub mod cpal_output;

pub use output::{DeviceId, DryRunOutput, NullOutput, TriggerError, WaveformOutput};
pub use trigger::{HardwareTrigger, TriggerOutcome, TriggerSettings, TriggerStats};
pub use waveform::Waveform;

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalOutput;
