use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::output::{DeviceId, TriggerError, WaveformOutput};
use crate::waveform::Waveform;

pub const DEFAULT_WAVEFORM: &str = "square_wave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Emitted,
    /// Nothing was played; the session carries on.
    Degraded(String),
}

impl TriggerOutcome {
    pub fn is_emitted(&self) -> bool {
        matches!(self, TriggerOutcome::Emitted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub emitted: usize,
    pub degraded: usize,
}

/// Emits a named waveform on an audio output so an external recorder can be
/// aligned with the event log. Failures never propagate: they are logged and
/// counted.
pub struct HardwareTrigger {
    output: Box<dyn WaveformOutput>,
    device: Option<DeviceId>,
    waveforms: HashMap<String, Waveform>,
    current: Option<String>,
    opened: bool,
    stats: TriggerStats,
}

impl HardwareTrigger {
    pub fn new(output: Box<dyn WaveformOutput>, device: Option<DeviceId>) -> Self {
        Self {
            output,
            device,
            waveforms: HashMap::new(),
            current: None,
            opened: false,
            stats: TriggerStats::default(),
        }
    }

    /// A trigger that degrades on every call.
    pub fn disabled() -> Self {
        Self::new(Box::new(crate::output::NullOutput), None)
    }

    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    pub fn set_device(&mut self, device: Option<DeviceId>) {
        self.device = device;
        self.opened = false;
    }

    /// Registers a waveform; the first one registered becomes current.
    pub fn add_waveform(&mut self, waveform: Waveform) {
        if self.current.is_none() {
            self.current = Some(waveform.name.clone());
        }
        self.waveforms.insert(waveform.name.clone(), waveform);
    }

    pub fn add_square_wave(
        &mut self,
        name: &str,
        amplitude: f32,
        frames: usize,
        channels: u16,
        sample_rate: u32,
    ) {
        self.add_waveform(Waveform::square(name, amplitude, frames, channels, sample_rate));
    }

    /// Returns false if no waveform of that name is registered.
    pub fn set_current(&mut self, name: &str) -> bool {
        if self.waveforms.contains_key(name) {
            self.current = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<&Waveform> {
        self.current.as_ref().and_then(|n| self.waveforms.get(n))
    }

    pub fn stats(&self) -> TriggerStats {
        self.stats
    }

    /// Opens the device ahead of the first trigger so a bad configuration is
    /// reported at session start.
    pub fn prepare(&mut self) -> Result<(), TriggerError> {
        if !self.opened {
            self.output.open(self.device.as_ref())?;
            self.opened = true;
        }
        Ok(())
    }

    pub fn trigger(&mut self) -> TriggerOutcome {
        if let Err(e) = self.prepare() {
            return self.degrade(e.to_string());
        }
        let Some(waveform) = self.current.as_ref().and_then(|n| self.waveforms.get(n)) else {
            return self.degrade("no waveform selected".to_string());
        };
        match self.output.emit(self.device.as_ref(), waveform) {
            Ok(()) => {
                self.stats.emitted += 1;
                TriggerOutcome::Emitted
            }
            Err(e) => {
                self.opened = false;
                self.degrade(e.to_string())
            }
        }
    }

    fn degrade(&mut self, reason: String) -> TriggerOutcome {
        tracing::warn!(reason = %reason, "hardware trigger skipped");
        self.stats.degraded += 1;
        TriggerOutcome::Degraded(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub device: Option<DeviceId>,
    pub waveform: String,
    pub amplitude: f32,
    pub samples: usize,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            device: None,
            waveform: DEFAULT_WAVEFORM.to_string(),
            amplitude: 5.0,
            samples: 22_000,
            channels: 1,
            sample_rate: 44_100,
        }
    }
}

impl TriggerSettings {
    /// A trigger with one square wave registered under `waveform`.
    pub fn build(&self, output: Box<dyn WaveformOutput>) -> HardwareTrigger {
        let mut trigger = HardwareTrigger::new(output, self.device.clone());
        trigger.add_square_wave(
            &self.waveform,
            self.amplitude,
            self.samples,
            self.channels,
            self.sample_rate,
        );
        trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DryRunOutput, NullOutput};

    struct FailingEmit;

    impl WaveformOutput for FailingEmit {
        fn open(&mut self, _device: Option<&DeviceId>) -> Result<(), TriggerError> {
            Ok(())
        }

        fn emit(&mut self, _device: Option<&DeviceId>, _waveform: &Waveform) -> Result<(), TriggerError> {
            Err(TriggerError::Playback("underrun".into()))
        }
    }

    #[test]
    fn settings_build_a_ready_trigger() {
        let probe = DryRunOutput::new();
        let mut trigger = TriggerSettings::default().build(Box::new(probe.clone()));
        assert_eq!(trigger.current().map(|w| w.name.as_str()), Some(DEFAULT_WAVEFORM));
        assert_eq!(trigger.trigger(), TriggerOutcome::Emitted);
        assert_eq!(probe.emitted(), 1);
        assert_eq!(probe.last_len(), Some(22_000));
    }

    #[test]
    fn missing_device_degrades() {
        let mut trigger = TriggerSettings::default().build(Box::new(NullOutput));
        assert!(!trigger.trigger().is_emitted());
        assert!(!trigger.trigger().is_emitted());
        assert_eq!(
            trigger.stats(),
            TriggerStats {
                emitted: 0,
                degraded: 2
            }
        );
    }

    #[test]
    fn no_waveform_degrades() {
        let mut trigger = HardwareTrigger::new(Box::new(DryRunOutput::new()), None);
        assert_eq!(
            trigger.trigger(),
            TriggerOutcome::Degraded("no waveform selected".into())
        );
    }

    #[test]
    fn emit_failure_degrades_and_counts() {
        let mut trigger = TriggerSettings::default().build(Box::new(FailingEmit));
        assert!(matches!(trigger.trigger(), TriggerOutcome::Degraded(r) if r.contains("underrun")));
        assert_eq!(trigger.stats().degraded, 1);
    }

    #[test]
    fn set_current_requires_known_name() {
        let mut trigger = HardwareTrigger::disabled();
        trigger.add_square_wave("a", 1.0, 4, 1, 100);
        trigger.add_square_wave("b", 0.5, 4, 1, 100);
        assert_eq!(trigger.current().map(|w| w.name.as_str()), Some("a"));
        assert!(trigger.set_current("b"));
        assert!(!trigger.set_current("c"));
        assert_eq!(trigger.current().map(|w| w.name.as_str()), Some("b"));
    }

    #[test]
    fn settings_parse_from_toml() {
        let settings: TriggerSettings =
            toml::from_str("device = \"Scarlett\"\namplitude = 1.0").unwrap();
        assert_eq!(settings.device, Some(DeviceId::Name("Scarlett".into())));
        assert_eq!(settings.samples, 22_000);
    }
}
