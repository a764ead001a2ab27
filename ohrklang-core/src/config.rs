use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    signals::SweepSpec, ChannelLayout, ConfigurationError, DeconvolutionConfig, FilterSpec,
};

const DEFAULT_LOWPASS_CUTOFF: f32 = 20_000.0;

/// Every option a measurement session recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub sample_rate: u32,

    pub sweep_duration_s: f32,
    pub post_silence_s: f32,
    pub start_freq_hz: f32,
    pub end_freq_hz: f32,
    pub amplitude_db: f32,
    pub fadeout_samples: usize,

    /// `[left, right, feedback]`, -1 disables a role.
    pub input_channel_roles: [i32; 3],
    pub output_channel_roles: [i32; 3],

    /// Falls back to twice the start frequency, dropped if that is not below
    /// Nyquist.
    pub highpass_cutoff_hz: Option<f32>,
    /// Falls back to 20 kHz, dropped if that is not below Nyquist.
    pub lowpass_cutoff_hz: Option<f32>,
    pub filter_order: usize,
    pub filter_repetitions: usize,
    pub max_inverse_dynamic_db: Option<f32>,

    /// Pause before every transaction.
    pub settle_time_ms: u64,
}

impl MeasurementConfig {
    pub fn sweep_spec(&self) -> SweepSpec {
        SweepSpec {
            sample_rate: self.sample_rate,
            duration: self.sweep_duration_s,
            post_silence: self.post_silence_s,
            start_frequency: self.start_freq_hz,
            end_frequency: self.end_freq_hz,
            amplitude_db: self.amplitude_db,
            fadeout_samples: self.fadeout_samples,
        }
    }

    pub fn channel_layout(&self) -> Result<ChannelLayout, ConfigurationError> {
        ChannelLayout::from_indices(self.input_channel_roles, self.output_channel_roles)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_time_ms)
    }

    /// Bandpass and limiting for deconvolving a sweep that started at
    /// `start_frequency`. Explicit cutoffs win over the configured ones, the
    /// defaults are twice the start frequency and 20 kHz. A default cutoff
    /// that is not below Nyquist leaves its stage out.
    pub fn deconvolution_config(
        &self,
        sample_rate: u32,
        start_frequency: f32,
        highpass_cutoff: Option<f32>,
        lowpass_cutoff: Option<f32>,
    ) -> DeconvolutionConfig {
        let stage = |cutoff| {
            (self.filter_repetitions > 0)
                .then(|| FilterSpec::new(cutoff, self.filter_order, self.filter_repetitions))
        };

        let below_nyquist = |cutoff: f32| (cutoff < sample_rate as f32 / 2.0).then_some(cutoff);

        let highpass = highpass_cutoff
            .or(self.highpass_cutoff_hz)
            .or_else(|| below_nyquist(2.0 * start_frequency));

        let lowpass = lowpass_cutoff
            .or(self.lowpass_cutoff_hz)
            .or_else(|| below_nyquist(DEFAULT_LOWPASS_CUTOFF));

        DeconvolutionConfig {
            lowpass: lowpass.and_then(stage),
            highpass: highpass.and_then(stage),
            max_inverse_dynamic_db: self.max_inverse_dynamic_db,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.sweep_spec().validate()?;
        self.channel_layout()?;

        if self.filter_order == 0 {
            return Err(ConfigurationError::FilterOrder);
        }

        Ok(())
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            sweep_duration_s: 3.0,
            post_silence_s: 1.5,
            start_freq_hz: 100.0,
            end_freq_hz: 22_000.0,
            amplitude_db: -20.0,
            fadeout_samples: 200,
            input_channel_roles: [0, 1, -1],
            output_channel_roles: [0, 1, -1],
            highpass_cutoff_hz: None,
            lowpass_cutoff_hz: None,
            filter_order: 4,
            filter_repetitions: 2,
            max_inverse_dynamic_db: None,
            settle_time_ms: 300,
        }
    }
}

#[cfg(test)]
mod test {
    use super::MeasurementConfig;
    use crate::ConfigurationError;

    #[test]
    fn defaults_are_valid() {
        let config = MeasurementConfig::default();

        assert_eq!(Ok(()), config.validate());
        assert_eq!(144_000, config.sweep_spec().sweep_samples());
        assert!(!config.channel_layout().unwrap().feedback_used());
    }

    #[test]
    fn end_frequency_above_nyquist_is_rejected() {
        let config = MeasurementConfig {
            sample_rate: 32_000,
            ..Default::default()
        };

        assert_eq!(
            Err(ConfigurationError::FrequencyRange {
                start: 100.0,
                end: 22_000.0,
                nyquist: 16_000.0
            }),
            config.validate()
        );
    }

    #[test]
    fn default_cutoffs() {
        let config = MeasurementConfig::default();

        let deconvolution = config.deconvolution_config(48_000, 100.0, None, None);
        assert_eq!(Some(200.0), deconvolution.highpass.map(|f| f.cutoff));
        assert_eq!(Some(20_000.0), deconvolution.lowpass.map(|f| f.cutoff));
        assert_eq!(Some(4), deconvolution.lowpass.map(|f| f.order));
        assert_eq!(Some(2), deconvolution.highpass.map(|f| f.repetitions));
        assert_eq!(None, deconvolution.max_inverse_dynamic_db);

        let deconvolution = config.deconvolution_config(32_000, 20.0, None, Some(8_000.0));
        assert_eq!(Some(40.0), deconvolution.highpass.map(|f| f.cutoff));
        assert_eq!(Some(8_000.0), deconvolution.lowpass.map(|f| f.cutoff));

        let deconvolution = config.deconvolution_config(32_000, 100.0, None, None);
        assert_eq!(None, deconvolution.lowpass);
    }

    #[test]
    fn default_highpass_above_nyquist_is_dropped() {
        let config = MeasurementConfig::default();

        let deconvolution = config.deconvolution_config(48_000, 15_000.0, None, None);
        assert_eq!(None, deconvolution.highpass);
        assert_eq!(Some(20_000.0), deconvolution.lowpass.map(|f| f.cutoff));

        let deconvolution = config.deconvolution_config(48_000, 12_000.0, None, None);
        assert_eq!(None, deconvolution.highpass);

        // explicit cutoffs are kept and left to the filter to reject
        let deconvolution = config.deconvolution_config(48_000, 15_000.0, Some(30_000.0), None);
        assert_eq!(Some(30_000.0), deconvolution.highpass.map(|f| f.cutoff));
    }

    #[test]
    fn zero_repetitions_skip_filters() {
        let config = MeasurementConfig {
            filter_repetitions: 0,
            highpass_cutoff_hz: Some(50.0),
            max_inverse_dynamic_db: Some(60.0),
            ..Default::default()
        };

        let deconvolution = config.deconvolution_config(48_000, 100.0, None, None);

        assert_eq!(None, deconvolution.highpass);
        assert_eq!(None, deconvolution.lowpass);
        assert_eq!(Some(60.0), deconvolution.max_inverse_dynamic_db);
    }

    #[test]
    fn zero_filter_order_is_rejected() {
        let config = MeasurementConfig {
            filter_order: 0,
            ..Default::default()
        };

        assert_eq!(Err(ConfigurationError::FilterOrder), config.validate());
    }
}
