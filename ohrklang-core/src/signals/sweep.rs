mod exponential;

use std::time::Duration;

use ndarray::Array2;

pub use exponential::ExponentialSweep;

use crate::{db_to_amplitude, ConfigurationError, FadeOutWindow};

/// Silence in front of every sweep, leaves the hardware some time to start up.
pub const PRE_SILENCE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub sample_rate: u32,
    /// Sweep duration in seconds.
    pub duration: f32,
    /// Trailing silence in seconds, captures the decay of the measured system.
    pub post_silence: f32,
    pub start_frequency: f32,
    pub end_frequency: f32,
    pub amplitude_db: f32,
    pub fadeout_samples: usize,
}

impl SweepSpec {
    /// Short, fixed sweep used for quick sanity checks of a setup.
    pub fn quick_check(sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;

        Self {
            sample_rate,
            duration: 2.0,
            post_silence: 1.0,
            start_frequency: 20.0,
            end_frequency: f32::min(20_000.0, nyquist),
            amplitude_db: -20.0,
            fadeout_samples: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sample_rate == 0 {
            return Err(ConfigurationError::SampleRate);
        }

        if !(self.duration.is_finite() && self.duration > 0.0) || self.sweep_samples() == 0 {
            return Err(ConfigurationError::Duration(self.duration));
        }

        if !(self.post_silence.is_finite() && self.post_silence >= 0.0) {
            return Err(ConfigurationError::PostSilence(self.post_silence));
        }

        let nyquist = self.sample_rate as f32 / 2.0;
        if !(0.0 < self.start_frequency
            && self.start_frequency < self.end_frequency
            && self.end_frequency <= nyquist)
        {
            return Err(ConfigurationError::FrequencyRange {
                start: self.start_frequency,
                end: self.end_frequency,
                nyquist,
            });
        }

        if self.amplitude_db.is_nan() || self.amplitude_db > 0.0 {
            return Err(ConfigurationError::Amplitude(self.amplitude_db));
        }

        if self.fadeout_samples > self.sweep_samples() {
            return Err(ConfigurationError::FadeOutTooLong {
                fadeout: self.fadeout_samples,
                sweep: self.sweep_samples(),
            });
        }

        Ok(())
    }

    pub fn sweep_samples(&self) -> usize {
        (self.duration as f64 * self.sample_rate as f64) as usize
    }

    pub fn pre_silence_samples(&self) -> usize {
        (PRE_SILENCE.as_secs_f64() * self.sample_rate as f64) as usize
    }

    pub fn post_silence_samples(&self) -> usize {
        (self.post_silence as f64 * self.sample_rate as f64) as usize
    }

    /// Number of samples of the padded excitation.
    pub fn len(&self) -> usize {
        self.pre_silence_samples() + self.sweep_samples() + self.post_silence_samples()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mono excitation: pre-silence, faded sweep and post-silence.
    pub fn excitation(&self) -> Result<Vec<f32>, ConfigurationError> {
        self.validate()?;

        let n_samples = self.sweep_samples();
        let mut sweep: Vec<f32> = ExponentialSweep::new(
            self.start_frequency,
            self.end_frequency,
            db_to_amplitude(self.amplitude_db),
            n_samples,
            self.sample_rate,
        )
        .collect();

        FadeOutWindow::new(n_samples, self.fadeout_samples).apply(&mut sweep);

        let mut excitation = Vec::with_capacity(self.len());
        excitation.extend(std::iter::repeat(0.0).take(self.pre_silence_samples()));
        excitation.append(&mut sweep);
        excitation.extend(std::iter::repeat(0.0).take(self.post_silence_samples()));

        Ok(excitation)
    }
}

/// Excitation buffer in time-major layout, the same sweep on every channel.
pub fn make_sweep(
    spec: &SweepSpec,
    num_channels: usize,
) -> Result<Array2<f32>, ConfigurationError> {
    if num_channels == 0 {
        return Err(ConfigurationError::NoOutputChannels);
    }

    let excitation = spec.excitation()?;

    Ok(Array2::from_shape_fn(
        (excitation.len(), num_channels),
        |(n, _)| excitation[n],
    ))
}

#[cfg(test)]
mod test {
    use super::{make_sweep, SweepSpec};
    use crate::ConfigurationError;

    fn spec() -> SweepSpec {
        SweepSpec {
            sample_rate: 48_000,
            duration: 1.0,
            post_silence: 0.5,
            start_frequency: 100.0,
            end_frequency: 10_000.0,
            amplitude_db: -20.0,
            fadeout_samples: 200,
        }
    }

    #[test]
    fn padded_length() {
        let buffer = make_sweep(&spec(), 2).unwrap();

        assert_eq!(&[72_480, 2], buffer.shape());
    }

    #[test]
    fn silence_around_sweep() {
        let spec = spec();
        let excitation = spec.excitation().unwrap();

        let pre = spec.pre_silence_samples();
        let sweep_end = pre + spec.sweep_samples();

        assert!(excitation[..pre].iter().all(|s| *s == 0.0));
        assert!(excitation[sweep_end..].iter().all(|s| *s == 0.0));
        assert!(excitation[pre..sweep_end].iter().any(|s| s.abs() > 0.05));
    }

    #[test]
    fn faded_tail_reaches_zero() {
        let spec = spec();
        let excitation = spec.excitation().unwrap();

        let last = excitation[spec.pre_silence_samples() + spec.sweep_samples() - 1];
        assert!(last.abs() < 1e-6, "last sweep sample {last}");
    }

    #[test]
    fn amplitude_follows_db() {
        let excitation = spec().excitation().unwrap();

        let peak = excitation.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        assert!(peak <= 0.1 + 1e-6);
        assert!(peak > 0.099);
    }

    #[test]
    fn identical_specs_yield_identical_buffers() {
        let a = make_sweep(&spec(), 3).unwrap();
        let b = make_sweep(&spec(), 3).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn channels_carry_same_signal() {
        let buffer = make_sweep(&spec(), 2).unwrap();

        assert_eq!(buffer.column(0), buffer.column(1));
    }

    #[test]
    fn rejects_fadeout_longer_than_sweep() {
        let spec = SweepSpec {
            fadeout_samples: 48_001,
            ..spec()
        };

        assert_eq!(
            Err(ConfigurationError::FadeOutTooLong {
                fadeout: 48_001,
                sweep: 48_000
            }),
            spec.validate()
        );
    }

    #[test]
    fn rejects_end_frequency_above_nyquist() {
        let spec = SweepSpec {
            end_frequency: 24_001.0,
            ..spec()
        };

        assert!(matches!(
            spec.validate(),
            Err(ConfigurationError::FrequencyRange { .. })
        ));
    }

    #[test]
    fn rejects_boost() {
        let spec = SweepSpec {
            amplitude_db: 3.0,
            ..spec()
        };

        assert_eq!(Err(ConfigurationError::Amplitude(3.0)), spec.validate());
    }

    #[test]
    fn quick_check_is_clamped_to_nyquist() {
        let spec = SweepSpec::quick_check(32_000);

        assert_eq!(16_000.0, spec.end_frequency);
        assert!(spec.validate().is_ok());
    }
}
