use std::f64::consts::PI;

use crate::ConfigurationError;

/// One stage of the deconvolution bandpass: a Butterworth filter of `order`
/// applied `repetitions` times in a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub cutoff: f32,
    pub order: usize,
    pub repetitions: usize,
}

impl FilterSpec {
    pub fn new(cutoff: f32, order: usize, repetitions: usize) -> Self {
        Self {
            cutoff,
            order,
            repetitions,
        }
    }

    pub fn validate(&self, sample_rate: u32) -> Result<(), ConfigurationError> {
        let nyquist = sample_rate as f32 / 2.0;
        if !(self.cutoff > 0.0 && self.cutoff < nyquist) {
            return Err(ConfigurationError::FilterCutoff {
                cutoff: self.cutoff,
                nyquist,
            });
        }

        if self.order == 0 {
            return Err(ConfigurationError::FilterOrder);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

/// Biquad in direct form I, first order sections keep `b2` and `a2` at zero.
#[derive(Debug, Clone)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Section {
    fn from_coefficients(b: [f64; 3], a: [f64; 3]) -> Self {
        Self {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn second_order(kind: FilterKind, cutoff: f64, sample_rate: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2.0 * q);

        let b = match kind {
            FilterKind::Lowpass => [(1.0 - cs) / 2.0, 1.0 - cs, (1.0 - cs) / 2.0],
            FilterKind::Highpass => [(1.0 + cs) / 2.0, -(1.0 + cs), (1.0 + cs) / 2.0],
        };

        Self::from_coefficients(b, [1.0 + alpha, -2.0 * cs, 1.0 - alpha])
    }

    fn first_order(kind: FilterKind, cutoff: f64, sample_rate: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();

        let b = match kind {
            FilterKind::Lowpass => [k, k, 0.0],
            FilterKind::Highpass => [1.0, -1.0, 0.0],
        };

        Self::from_coefficients(b, [1.0 + k, k - 1.0, 0.0])
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }
}

/// Q of each second order section of a Butterworth filter, an odd order adds
/// a first order section that has no Q.
fn butterworth_q(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|i| 1.0 / (2.0 * (PI / order as f64 * (i as f64 + 0.5)).sin()))
        .collect()
}

/// Digital Butterworth filter (bilinear transform, prewarped at the cutoff)
/// as a cascade of second order sections.
#[derive(Debug, Clone)]
pub struct Butterworth {
    sections: Vec<Section>,
}

impl Butterworth {
    pub fn new(
        kind: FilterKind,
        order: usize,
        cutoff: f32,
        sample_rate: u32,
    ) -> Result<Self, ConfigurationError> {
        FilterSpec::new(cutoff, order, 1).validate(sample_rate)?;

        let cutoff = cutoff as f64;
        let sample_rate = sample_rate as f64;

        let mut sections: Vec<_> = butterworth_q(order)
            .into_iter()
            .map(|q| Section::second_order(kind, cutoff, sample_rate, q))
            .collect();

        if order % 2 == 1 {
            sections.push(Section::first_order(kind, cutoff, sample_rate));
        }

        Ok(Self { sections })
    }

    pub fn lowpass(
        order: usize,
        cutoff: f32,
        sample_rate: u32,
    ) -> Result<Self, ConfigurationError> {
        Self::new(FilterKind::Lowpass, order, cutoff, sample_rate)
    }

    pub fn highpass(
        order: usize,
        cutoff: f32,
        sample_rate: u32,
    ) -> Result<Self, ConfigurationError> {
        Self::new(FilterKind::Highpass, order, cutoff, sample_rate)
    }

    /// Filters `signal` in place, starting from a cleared state.
    pub fn process(&mut self, signal: &mut [f64]) {
        for section in self.sections.iter_mut() {
            section.reset();

            for s in signal.iter_mut() {
                *s = section.process(*s);
            }
        }
    }
}

/// Impulse response of `len` samples of the repeated lowpass and highpass stages.
pub fn shaping_filter(
    len: usize,
    sample_rate: u32,
    lowpass: Option<FilterSpec>,
    highpass: Option<FilterSpec>,
) -> Result<Vec<f64>, ConfigurationError> {
    let mut impulse = vec![0.0; len];
    if let Some(first) = impulse.first_mut() {
        *first = 1.0;
    }

    let stages = [
        lowpass.map(|spec| (FilterKind::Lowpass, spec)),
        highpass.map(|spec| (FilterKind::Highpass, spec)),
    ];

    for (kind, spec) in stages.into_iter().flatten() {
        let mut filter = Butterworth::new(kind, spec.order, spec.cutoff, sample_rate)?;

        for _ in 0..spec.repetitions {
            filter.process(&mut impulse);
        }
    }

    Ok(impulse)
}
