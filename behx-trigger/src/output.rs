use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

use crate::waveform::Waveform;

/// Output device selector. `None` wherever a `DeviceId` is optional means the
/// host's default output device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Index(usize),
    Name(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Index(i) => write!(f, "#{i}"),
            DeviceId::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("device {device} rejected the waveform: {reason}")]
    Rejected { device: String, reason: String },

    #[error("output has not been opened")]
    NotOpen,

    #[error("playback failed: {0}")]
    Playback(String),
}

/// The single "emit waveform" contract the trigger needs from an audio layer.
pub trait WaveformOutput {
    /// Open and validate the device for playback.
    fn open(&mut self, device: Option<&DeviceId>) -> Result<(), TriggerError>;

    /// Start playing `waveform` and return without waiting for it to end.
    fn emit(&mut self, device: Option<&DeviceId>, waveform: &Waveform) -> Result<(), TriggerError>;
}

/// Output used when no audio backend is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl WaveformOutput for NullOutput {
    fn open(&mut self, _device: Option<&DeviceId>) -> Result<(), TriggerError> {
        Err(TriggerError::DeviceUnavailable(
            "no audio backend compiled in".into(),
        ))
    }

    fn emit(&mut self, _device: Option<&DeviceId>, _waveform: &Waveform) -> Result<(), TriggerError> {
        Err(TriggerError::NotOpen)
    }
}

/// Accepts every emission without producing sound. Clones share the counter,
/// so a caller can keep one to observe a trigger it handed the other to.
#[derive(Debug, Default, Clone)]
pub struct DryRunOutput {
    emitted: Rc<Cell<usize>>,
    last: Rc<Cell<Option<usize>>>,
}

impl DryRunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> usize {
        self.emitted.get()
    }

    /// Sample count of the last waveform emitted.
    pub fn last_len(&self) -> Option<usize> {
        self.last.get()
    }
}

impl WaveformOutput for DryRunOutput {
    fn open(&mut self, _device: Option<&DeviceId>) -> Result<(), TriggerError> {
        Ok(())
    }

    fn emit(&mut self, device: Option<&DeviceId>, waveform: &Waveform) -> Result<(), TriggerError> {
        tracing::debug!(
            waveform = %waveform.name,
            device = ?device,
            frames = waveform.frames(),
            "dry-run trigger"
        );
        self.emitted.set(self.emitted.get() + 1);
        self.last.set(Some(waveform.samples.len()));
        Ok(())
    }
}
