#[cfg(feature = "jack")]
mod jack_device;
mod simulated;

#[cfg(feature = "jack")]
pub use jack_device::JackDevice;
pub use simulated::SimulatedDevice;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error(
        "{input} inputs and {output} outputs requested, device offers {max_input} and {max_output}"
    )]
    ChannelConfiguration {
        input: usize,
        output: usize,
        max_input: usize,
        max_output: usize,
    },
    #[error("device runs at {actual} Hz, {requested} Hz requested")]
    SampleRate { requested: u32, actual: u32 },
    #[error("device returned {actual} frames for {expected} played frames")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("transaction was cancelled")]
    Cancelled,
    #[error("audio backend failed: {0}")]
    Backend(String),
}

/// What a session needs from the device for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub sample_rate: u32,
    pub input_channels: usize,
    pub output_channels: usize,
}

/// Simultaneous playback and capture of fixed length buffers.
///
/// Buffers are time-major, one column per physical channel.
pub trait DuplexDevice {
    /// Fails with [`DeviceError::ChannelConfiguration`] or
    /// [`DeviceError::SampleRate`] if the device cannot run `settings`.
    fn check_settings(&self, settings: &StreamSettings) -> Result<(), DeviceError>;

    /// Called right before every transaction. Backends that need to
    /// reinitialize their driver do it here.
    fn prepare(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Plays `output` and records `input_channels` channels for the same
    /// number of frames. Blocks until done or until `stop` is raised.
    fn duplex_transact(
        &mut self,
        output: ArrayView2<'_, f32>,
        input_channels: usize,
        stop: &StopSignal,
    ) -> Result<Array2<f32>, DeviceError>;

    fn play(&mut self, output: ArrayView2<'_, f32>, stop: &StopSignal) -> Result<(), DeviceError> {
        self.duplex_transact(output, 0, stop).map(|_| ())
    }
}

/// Best-effort request to end a running transaction, shared between threads.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}
