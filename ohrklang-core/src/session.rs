use std::thread;

use ndarray::Array2;

use crate::{
    deconvolve, loudness,
    signals::{make_sweep, SweepSpec, WhiteNoise},
    ChannelLayout, ConfigurationError, DeconvolutionConfig, DeviceError, DuplexDevice, Error,
    ImpulseResponse, MeasurementConfig, StopSignal, StreamSettings,
};

/// Gain applied to notification cues.
pub const CUE_LEVEL: f32 = 0.05;
/// A captured feedback loop with a lower peak counts as silent.
pub const FEEDBACK_SILENCE_THRESHOLD: f32 = 1e-4;
pub const FEEDBACK_NOISE_AMPLITUDE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No excitation prepared, the current parameters are invalid.
    Idle,
    Armed,
    Recording,
    Ready,
    /// The last transaction failed. The session stays armed and earlier
    /// results are kept.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementKind {
    #[default]
    Full,
    /// Short fixed sweep for checking a setup.
    QuickCheck,
}

/// A prepared sweep, mono and routed to the output channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Excitation {
    pub spec: SweepSpec,
    pub sweep: Vec<f32>,
    pub buffer: Array2<f32>,
}

impl Excitation {
    fn new(spec: SweepSpec, layout: &ChannelLayout) -> Result<Self, ConfigurationError> {
        let mono = make_sweep(&spec, 1)?;
        let buffer = layout.route(mono.view())?;

        Ok(Self {
            spec,
            sweep: mono.column(0).to_vec(),
            buffer,
        })
    }
}

#[derive(Debug, Clone)]
struct Prepared {
    full: Excitation,
    quick_check: Excitation,
}

impl Prepared {
    fn new(config: &MeasurementConfig, layout: &ChannelLayout) -> Result<Self, ConfigurationError> {
        Ok(Self {
            full: Excitation::new(config.sweep_spec(), layout)?,
            quick_check: Excitation::new(SweepSpec::quick_check(config.sample_rate), layout)?,
        })
    }

    fn get(&self, kind: MeasurementKind) -> &Excitation {
        match kind {
            MeasurementKind::Full => &self.full,
            MeasurementKind::QuickCheck => &self.quick_check,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub kind: MeasurementKind,
    pub sample_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    /// Captured feedback loop, or the played sweep if the loop is disabled.
    pub feedback: Vec<f32>,
}

/// Inputs for [`Session::impulse_responses`], everything left out falls back
/// to the last recording and the configured cutoffs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrRequest<'a> {
    pub left: Option<&'a [f32]>,
    pub right: Option<&'a [f32]>,
    pub feedback: Option<&'a [f32]>,
    pub highpass_cutoff: Option<f32>,
    pub lowpass_cutoff: Option<f32>,
}

/// Owns the measurement parameters, the derived excitation buffers and the
/// latest results.
///
/// A session drives one transaction at a time, [`Session::measure`] borrows
/// it mutably for the whole transaction.
#[derive(Debug)]
pub struct Session {
    config: MeasurementConfig,
    layout: ChannelLayout,
    state: State,
    prepared: Option<Prepared>,
    recording: Option<Recording>,
    impulse_response: Option<ImpulseResponse>,
    stop: StopSignal,
}

impl Session {
    pub fn new(config: MeasurementConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let layout = config.channel_layout()?;
        let prepared = Prepared::new(&config, &layout)?;

        tracing::debug!(
            sample_rate = config.sample_rate,
            frames = prepared.full.buffer.nrows(),
            "session armed"
        );

        Ok(Self {
            config,
            layout,
            state: State::Armed,
            prepared: Some(prepared),
            recording: None,
            impulse_response: None,
            stop: StopSignal::new(),
        })
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn sweep_spec(&self) -> SweepSpec {
        self.config.sweep_spec()
    }

    /// Replaces the sweep shape. Invalid parameters are rejected and leave
    /// the session untouched.
    pub fn set_sweep_parameters(
        &mut self,
        duration_s: f32,
        post_silence_s: f32,
        start_freq_hz: f32,
        end_freq_hz: f32,
        amplitude_db: f32,
        fadeout_samples: usize,
    ) -> Result<(), ConfigurationError> {
        self.reconfigure(MeasurementConfig {
            sweep_duration_s: duration_s,
            post_silence_s,
            start_freq_hz,
            end_freq_hz,
            amplitude_db,
            fadeout_samples,
            ..self.config.clone()
        })
    }

    pub fn set_channel_layout(
        &mut self,
        input_roles: [i32; 3],
        output_roles: [i32; 3],
    ) -> Result<(), ConfigurationError> {
        self.reconfigure(MeasurementConfig {
            input_channel_roles: input_roles,
            output_channel_roles: output_roles,
            ..self.config.clone()
        })
    }

    pub fn set_config(&mut self, config: MeasurementConfig) -> Result<(), ConfigurationError> {
        self.reconfigure(config)
    }

    /// Follows the device's sample rate. The new rate is always taken over,
    /// if the sweep does not fit it the session becomes [`State::Idle`] until
    /// the sweep parameters are fixed.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), ConfigurationError> {
        self.config.sample_rate = sample_rate;

        match Prepared::new(&self.config, &self.layout) {
            Ok(prepared) => {
                self.arm(prepared);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("sweep does not fit sample rate {sample_rate}: {err}");

                self.prepared = None;
                self.state = State::Idle;
                Err(err)
            }
        }
    }

    fn reconfigure(&mut self, config: MeasurementConfig) -> Result<(), ConfigurationError> {
        config.validate()?;

        let layout = config.channel_layout()?;
        let prepared = Prepared::new(&config, &layout)?;

        self.config = config;
        self.layout = layout;
        self.arm(prepared);

        Ok(())
    }

    fn arm(&mut self, prepared: Prepared) {
        tracing::debug!(
            sample_rate = self.config.sample_rate,
            frames = prepared.full.buffer.nrows(),
            output_channels = prepared.full.buffer.ncols(),
            "excitation recomputed"
        );

        self.prepared = Some(prepared);
        self.state = State::Armed;
    }

    pub fn excitation(&self, kind: MeasurementKind) -> Option<&Excitation> {
        self.prepared.as_ref().map(|p| p.get(kind))
    }

    /// Handle to cancel a running transaction from another thread.
    pub fn interrupt_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Plays the excitation of `kind` and records the response.
    ///
    /// On failure the previous recording and impulse response stay in place.
    pub fn measure<D>(&mut self, device: &mut D, kind: MeasurementKind) -> Result<&Recording, Error>
    where
        D: DuplexDevice + ?Sized,
    {
        if self.prepared.is_none() {
            return Err(Error::NotArmed);
        }

        self.stop.reset();
        self.state = State::Recording;
        let result = self.record(device, kind);
        self.stop.reset();

        match result {
            Ok(recording) => {
                tracing::info!(?kind, frames = recording.left.len(), "measurement finished");

                self.state = State::Ready;
                Ok(&*self.recording.insert(recording))
            }
            Err(err) => {
                tracing::warn!(?kind, "measurement failed: {err}");

                self.state = State::Failed;
                Err(err)
            }
        }
    }

    fn record<D>(&self, device: &mut D, kind: MeasurementKind) -> Result<Recording, Error>
    where
        D: DuplexDevice + ?Sized,
    {
        let excitation = self.excitation(kind).ok_or(Error::NotArmed)?;

        let settings = StreamSettings {
            sample_rate: self.config.sample_rate,
            input_channels: self.layout.input_channels(),
            output_channels: self.layout.output_channels(),
        };

        device.check_settings(&settings)?;
        device.prepare()?;

        let settle_time = self.config.settle_time();
        if !settle_time.is_zero() {
            thread::sleep(settle_time);
        }

        tracing::info!(
            ?kind,
            frames = excitation.buffer.nrows(),
            inputs = settings.input_channels,
            outputs = settings.output_channels,
            "starting measurement"
        );

        let raw = device.duplex_transact(
            excitation.buffer.view(),
            settings.input_channels,
            &self.stop,
        )?;

        if raw.nrows() != excitation.buffer.nrows() {
            return Err(DeviceError::LengthMismatch {
                expected: excitation.buffer.nrows(),
                actual: raw.nrows(),
            }
            .into());
        }

        let extracted = self.layout.extract(raw.view())?;

        let feedback = match extracted.feedback {
            None => excitation.sweep.clone(),
            Some(feedback) if loudness::peak(&feedback) < FEEDBACK_SILENCE_THRESHOLD => {
                tracing::warn!("feedback loop is silent, substituting noise");

                WhiteNoise::positive(FEEDBACK_NOISE_AMPLITUDE)
                    .take_samples(feedback.len())
                    .collect()
            }
            Some(feedback) => feedback,
        };

        Ok(Recording {
            kind,
            sample_rate: self.config.sample_rate,
            left: extracted.left,
            right: extracted.right,
            feedback,
        })
    }

    pub fn recordings(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    /// Deconvolves left and right against the feedback signal and keeps the
    /// result as the session's impulse response.
    pub fn impulse_responses(&mut self, request: IrRequest<'_>) -> Result<&ImpulseResponse, Error> {
        let recording = self.recording.as_ref();

        let left = request
            .left
            .or(recording.map(|r| r.left.as_slice()))
            .ok_or(Error::NoRecording)?;
        let right = request
            .right
            .or(recording.map(|r| r.right.as_slice()))
            .ok_or(Error::NoRecording)?;
        let feedback = request
            .feedback
            .or(recording.map(|r| r.feedback.as_slice()))
            .ok_or(Error::NoRecording)?;

        let from_recording =
            request.left.is_none() || request.right.is_none() || request.feedback.is_none();
        let recording = recording.filter(|_| from_recording);

        let sample_rate = recording.map_or(self.config.sample_rate, |r| r.sample_rate);
        let kind = recording.map_or(MeasurementKind::Full, |r| r.kind);
        let config = self.deconvolution_config(kind, sample_rate, &request);

        let left = deconvolve(feedback, left, sample_rate, &config)?;
        let right = deconvolve(feedback, right, sample_rate, &config)?;

        tracing::info!(
            lowpass = ?config.lowpass.map(|f| f.cutoff),
            highpass = ?config.highpass.map(|f| f.cutoff),
            "impulse responses computed"
        );

        Ok(&*self.impulse_response.insert(ImpulseResponse {
            sample_rate,
            left,
            right,
        }))
    }

    fn deconvolution_config(
        &self,
        kind: MeasurementKind,
        sample_rate: u32,
        request: &IrRequest<'_>,
    ) -> DeconvolutionConfig {
        let start_frequency = match kind {
            MeasurementKind::Full => self.config.start_freq_hz,
            MeasurementKind::QuickCheck => SweepSpec::quick_check(sample_rate).start_frequency,
        };

        self.config.deconvolution_config(
            sample_rate,
            start_frequency,
            request.highpass_cutoff,
            request.lowpass_cutoff,
        )
    }

    /// The last successfully computed impulse response.
    pub fn impulse_response(&self) -> Option<&ImpulseResponse> {
        self.impulse_response.as_ref()
    }

    /// Plays a mono cue, already at the session's sample rate, on the left
    /// and right outputs.
    pub fn play_cue<D>(&self, device: &mut D, cue: &[f32]) -> Result<(), Error>
    where
        D: DuplexDevice + ?Sized,
    {
        let buffer = self.layout.route_cue(cue, CUE_LEVEL);

        self.stop.reset();
        device.check_settings(&StreamSettings {
            sample_rate: self.config.sample_rate,
            input_channels: 0,
            output_channels: buffer.ncols(),
        })?;

        let result = device.play(buffer.view(), &self.stop);
        self.stop.reset();

        result.map_err(Error::from)
    }
}
