use rustfft::{
    num_complex::{Complex, Complex64},
    FftPlanner,
};

use crate::{shaping_filter, DeconvolutionError, Error, FadeOutWindow, FilterSpec};

/// Fade-out applied to the tail of [`deconvolve_plain`] results.
pub const PLAIN_FADE_OUT: usize = 2000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeconvolutionConfig {
    pub lowpass: Option<FilterSpec>,
    pub highpass: Option<FilterSpec>,
    /// Bounds the dynamic range of the inverted reference spectrum, `None`
    /// leaves the inverse untouched.
    pub max_inverse_dynamic_db: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub sample_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

/// Transform length for `input_length` samples: the next power of two,
/// doubled so the linear convolution never wraps around.
pub fn fft_length(input_length: usize) -> usize {
    input_length.next_power_of_two() * 2
}

/// Recovers the impulse response of the system that turned `reference` into `recorded`.
///
/// The reference spectrum is inverted, limited to `max_inverse_dynamic_db`,
/// shaped by the optional bandpass and multiplied into the spectrum of the
/// recording. The result has the length of `recorded`.
pub fn deconvolve(
    reference: &[f32],
    recorded: &[f32],
    sample_rate: u32,
    config: &DeconvolutionConfig,
) -> Result<Vec<f32>, Error> {
    let mut spectra = Spectra::new(reference, recorded)?;

    let mut inverse = invert_spectrum(&spectra.reference, config.max_inverse_dynamic_db);

    if config.lowpass.is_some() || config.highpass.is_some() {
        let filter = shaping_filter(
            spectra.n_fft,
            sample_rate,
            config.lowpass,
            config.highpass,
        )?;
        let filter = spectra.forward(filter.into_iter());

        for (i, f) in inverse.iter_mut().zip(filter.iter()) {
            *i *= f;
        }
    }

    let result: Vec<Complex64> = spectra
        .response
        .iter()
        .zip(inverse.iter())
        .map(|(r, i)| r * i)
        .collect();

    Ok(spectra.backward(result, recorded.len()))
}

/// Plain spectral division without limiting or bandpass, for excitations
/// that are not sweeps. The tail of the result is faded out instead.
pub fn deconvolve_plain(reference: &[f32], recorded: &[f32]) -> Result<Vec<f32>, Error> {
    let mut spectra = Spectra::new(reference, recorded)?;

    let result: Vec<Complex64> = spectra
        .response
        .iter()
        .zip(spectra.reference.iter())
        .map(|(r, l)| r / l)
        .collect();

    let input_length = recorded.len();
    let mut impulse_response = spectra.backward(result, input_length);

    FadeOutWindow::new(input_length, PLAIN_FADE_OUT).apply(&mut impulse_response);

    Ok(impulse_response)
}

/// Zero padded spectra of a reference and a recording of equal length.
struct Spectra {
    n_fft: usize,
    planner: FftPlanner<f64>,
    reference: Vec<Complex64>,
    response: Vec<Complex64>,
}

impl Spectra {
    fn new(reference: &[f32], recorded: &[f32]) -> Result<Self, DeconvolutionError> {
        check_input(reference, recorded)?;

        let n_fft = fft_length(recorded.len());
        let mut spectra = Self {
            n_fft,
            planner: FftPlanner::new(),
            reference: vec![],
            response: vec![],
        };

        spectra.reference = spectra.forward(reference.iter().map(|s| *s as f64));
        spectra.response = spectra.forward(recorded.iter().map(|s| *s as f64));

        if let Some(bin) = spectra.reference.iter().position(|s| s.norm_sqr() == 0.0) {
            return Err(DeconvolutionError::ZeroEnergyBin { bin });
        }

        Ok(spectra)
    }

    fn forward(&mut self, signal: impl Iterator<Item = f64>) -> Vec<Complex64> {
        let mut spectrum = padded(signal, self.n_fft);
        self.planner
            .plan_fft_forward(self.n_fft)
            .process(&mut spectrum);
        spectrum
    }

    /// Back to the time domain, truncated to `len` samples.
    fn backward(&mut self, mut spectrum: Vec<Complex64>, len: usize) -> Vec<f32> {
        self.planner
            .plan_fft_inverse(self.n_fft)
            .process(&mut spectrum);

        let scale = 1.0 / self.n_fft as f64;
        spectrum
            .into_iter()
            .take(len)
            .map(|s| (s.re * scale) as f32)
            .collect()
    }
}

fn check_input(reference: &[f32], recorded: &[f32]) -> Result<(), DeconvolutionError> {
    if reference.is_empty() || recorded.is_empty() {
        return Err(DeconvolutionError::Empty);
    }

    if reference.len() != recorded.len() {
        return Err(DeconvolutionError::LengthMismatch {
            reference: reference.len(),
            recorded: recorded.len(),
        });
    }

    Ok(())
}

fn padded(signal: impl Iterator<Item = f64>, len: usize) -> Vec<Complex64> {
    let mut padded: Vec<_> = signal.map(Complex::from).collect();
    padded.resize(len, Complex::default());
    padded
}

/// `1 / spectrum`, with every bin clamped to `max_dynamic_db` above the
/// smallest magnitude of the inverse. Clamping keeps the phase of a bin.
fn invert_spectrum(spectrum: &[Complex64], max_dynamic_db: Option<f32>) -> Vec<Complex64> {
    let mut inverse: Vec<_> = spectrum.iter().map(|s| s.inv()).collect();

    if let Some(max_dynamic_db) = max_dynamic_db {
        let min_magnitude = inverse
            .iter()
            .map(|s| s.norm())
            .fold(f64::INFINITY, f64::min);
        let limit = min_magnitude * 10f64.powf(max_dynamic_db.abs() as f64 / 20.0);

        for bin in inverse.iter_mut().filter(|s| s.norm() > limit) {
            *bin = Complex::from_polar(limit, bin.arg());
        }
    }

    inverse
}
