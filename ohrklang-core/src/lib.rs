mod audio;
mod config;
mod filter;
mod impulse_response;
mod routing;
mod session;
mod window;

pub mod loudness;
pub mod signals;

pub use audio::*;
pub use config::*;
pub use filter::*;
pub use impulse_response::*;
pub use routing::*;
pub use session::*;
pub use window::*;

use thiserror::Error;

#[inline]
pub fn dbfs(v: f32) -> f32 {
    20.0 * f32::log10(v.abs())
}

#[inline]
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("audio hardware error: {0}")]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Deconvolution(#[from] DeconvolutionError),
    #[error("no excitation prepared for the current parameters")]
    NotArmed,
    #[error("nothing has been recorded yet")]
    NoRecording,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("sample rate must be greater than zero")]
    SampleRate,
    #[error("sweep duration must be positive and yield at least one sample, got {0} s")]
    Duration(f32),
    #[error("post silence must not be negative, got {0} s")]
    PostSilence(f32),
    #[error("frequency range {start} Hz - {end} Hz must satisfy 0 < start < end <= {nyquist} Hz")]
    FrequencyRange { start: f32, end: f32, nyquist: f32 },
    #[error("amplitude must not exceed 0 dBFS, got {0} dB")]
    Amplitude(f32),
    #[error("fade-out of {fadeout} samples exceeds the sweep length of {sweep} samples")]
    FadeOutTooLong { fadeout: usize, sweep: usize },
    #[error("no output channel is enabled")]
    NoOutputChannels,
    #[error("neither the left nor the right input channel is enabled")]
    NoInputChannels,
    #[error("source has {actual} channels, expected 1 or {expected}")]
    SourceChannels { expected: usize, actual: usize },
    #[error("channel {channel} is assigned, but only {available} channels are available")]
    ChannelOutOfRange { channel: usize, available: usize },
    #[error("filter cutoff {cutoff} Hz must be within 0 Hz and {nyquist} Hz")]
    FilterCutoff { cutoff: f32, nyquist: f32 },
    #[error("filter order must be at least one")]
    FilterOrder,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeconvolutionError {
    #[error("cannot deconvolve empty signals")]
    Empty,
    #[error("reference has {reference} samples, recording has {recorded}")]
    LengthMismatch { reference: usize, recorded: usize },
    #[error("reference has no energy in frequency bin {bin}")]
    ZeroEnergyBin { bin: usize },
}
