/// A named buffer of interleaved samples played as a sync marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub name: String,
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Waveform {
    /// One period of a square wave: the first half of the frames at
    /// `+amplitude`, the rest at `-amplitude`.
    pub fn square(
        name: impl Into<String>,
        amplitude: f32,
        frames: usize,
        channels: u16,
        sample_rate: u32,
    ) -> Self {
        let channels = channels.max(1);
        let half = frames / 2;
        let samples = (0..frames)
            .flat_map(|i| {
                let v = if i < half { amplitude } else { -amplitude };
                std::iter::repeat_n(v, usize::from(channels))
            })
            .collect();
        Self {
            name: name.into(),
            samples,
            channels,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_wave_shape() {
        let w = Waveform::square("sq", 5.0, 4, 1, 44_100);
        assert_eq!(w.samples, vec![5.0, 5.0, -5.0, -5.0]);
        assert_eq!(w.frames(), 4);
    }

    #[test]
    fn channels_are_interleaved() {
        let w = Waveform::square("sq", 1.0, 2, 2, 8);
        assert_eq!(w.samples, vec![1.0, 1.0, -1.0, -1.0]);
        assert_eq!(w.frames(), 2);
        assert!((w.duration_secs() - 0.25).abs() < f64::EPSILON);
    }
}
