use ndarray::{Array2, ArrayView2};

use super::{DeviceError, DuplexDevice, StopSignal, StreamSettings};

#[derive(Debug, Clone)]
struct Path {
    output: usize,
    input: usize,
    response: Vec<f32>,
}

/// In-memory device that feeds every output channel through the impulse
/// responses of its connected paths into the input channels.
///
/// Inputs without a connected path record silence.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    sample_rate: u32,
    max_input_channels: usize,
    max_output_channels: usize,
    paths: Vec<Path>,
    transactions: usize,
    preparations: usize,
}

impl SimulatedDevice {
    pub fn new(sample_rate: u32, max_input_channels: usize, max_output_channels: usize) -> Self {
        Self {
            sample_rate,
            max_input_channels,
            max_output_channels,
            paths: vec![],
            transactions: 0,
            preparations: 0,
        }
    }

    /// Adds a path from output channel `output` to input channel `input`.
    pub fn connect(mut self, output: usize, input: usize, response: Vec<f32>) -> Self {
        self.paths.push(Path {
            output,
            input,
            response,
        });
        self
    }

    /// A perfect wire from `output` to `input`.
    pub fn loopback(self, output: usize, input: usize) -> Self {
        self.connect(output, input, vec![1.0])
    }

    /// Number of transactions that reached the device, cancelled ones included.
    pub fn transactions(&self) -> usize {
        self.transactions
    }

    pub fn preparations(&self) -> usize {
        self.preparations
    }
}

impl DuplexDevice for SimulatedDevice {
    fn check_settings(&self, settings: &StreamSettings) -> Result<(), DeviceError> {
        if settings.input_channels > self.max_input_channels
            || settings.output_channels > self.max_output_channels
        {
            return Err(DeviceError::ChannelConfiguration {
                input: settings.input_channels,
                output: settings.output_channels,
                max_input: self.max_input_channels,
                max_output: self.max_output_channels,
            });
        }

        if settings.sample_rate != self.sample_rate {
            return Err(DeviceError::SampleRate {
                requested: settings.sample_rate,
                actual: self.sample_rate,
            });
        }

        Ok(())
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.preparations += 1;
        Ok(())
    }

    fn duplex_transact(
        &mut self,
        output: ArrayView2<'_, f32>,
        input_channels: usize,
        stop: &StopSignal,
    ) -> Result<Array2<f32>, DeviceError> {
        self.check_settings(&StreamSettings {
            sample_rate: self.sample_rate,
            input_channels,
            output_channels: output.ncols(),
        })?;

        self.transactions += 1;

        if stop.is_stopped() {
            return Err(DeviceError::Cancelled);
        }

        let mut input = Array2::zeros((output.nrows(), input_channels));

        let paths = self
            .paths
            .iter()
            .filter(|p| p.output < output.ncols() && p.input < input_channels);

        for path in paths {
            let source = output.column(path.output);
            let mut target = input.column_mut(path.input);

            for (n, x) in source.iter().enumerate() {
                if *x == 0.0 {
                    continue;
                }

                for (k, h) in path.response.iter().enumerate() {
                    let Some(y) = target.get_mut(n + k) else {
                        break;
                    };
                    *y += x * h;
                }
            }
        }

        Ok(input)
    }
}
