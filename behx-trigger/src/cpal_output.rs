use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

use crate::output::{DeviceId, TriggerError, WaveformOutput};
use crate::waveform::Waveform;

/// Plays trigger waveforms on a cpal output device.
///
/// The stream of the last emission is kept alive until the next one replaces
/// it, so `emit` returns as soon as playback has started.
pub struct CpalOutput {
    host: cpal::Host,
    device: Option<cpal::Device>,
    stream: Option<cpal::Stream>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            device: None,
            stream: None,
        }
    }

    fn find(&self, id: Option<&DeviceId>) -> Result<cpal::Device, TriggerError> {
        match id {
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| TriggerError::DeviceUnavailable("no default output device".into())),
            Some(DeviceId::Index(i)) => self
                .host
                .output_devices()
                .map_err(|e| TriggerError::DeviceUnavailable(e.to_string()))?
                .nth(*i)
                .ok_or_else(|| TriggerError::DeviceUnavailable(format!("no output device #{i}"))),
            Some(DeviceId::Name(name)) => self
                .host
                .output_devices()
                .map_err(|e| TriggerError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| TriggerError::DeviceUnavailable(format!("no output device named '{name}'"))),
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveformOutput for CpalOutput {
    fn open(&mut self, device: Option<&DeviceId>) -> Result<(), TriggerError> {
        let found = self.find(device)?;
        found
            .default_output_config()
            .map_err(|e| TriggerError::Rejected {
                device: found.name().unwrap_or_default(),
                reason: e.to_string(),
            })?;
        self.device = Some(found);
        Ok(())
    }

    fn emit(&mut self, _device: Option<&DeviceId>, waveform: &Waveform) -> Result<(), TriggerError> {
        let device = self.device.as_ref().ok_or(TriggerError::NotOpen)?;
        let config = cpal::StreamConfig {
            channels: waveform.channels,
            sample_rate: cpal::SampleRate(waveform.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let samples: Arc<[f32]> = waveform.samples.clone().into();
        let mut cursor = 0usize;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        *out = samples.get(cursor).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
                        cursor += 1;
                    }
                },
                |e| tracing::warn!(error = %e, "trigger stream error"),
                None,
            )
            .map_err(|e| TriggerError::Rejected {
                device: device.name().unwrap_or_default(),
                reason: e.to_string(),
            })?;
        stream
            .play()
            .map_err(|e| TriggerError::Playback(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }
}
