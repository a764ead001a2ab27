/// Logarithmic sine sweep, `amplitude * cos(phi(t) + PI / 2)` with
/// `phi(t) = 2 * PI * f0 * L * (exp(t / L) - 1)` and `L = T / ln(f1 / f0)`.
///
/// The 90 degree phase offset makes the sweep start at zero.
#[derive(Debug, Clone)]
pub struct ExponentialSweep {
    sample_index: usize,
    start_frequency: f32,
    end_frequency: f32,
    sample_rate: u32,
    n_samples: usize,
    amplitude: f32,
}

impl ExponentialSweep {
    pub fn new(
        start_frequency: f32,
        end_frequency: f32,
        amplitude: f32,
        n_samples: usize,
        sample_rate: u32,
    ) -> Self {
        Self {
            sample_index: 0,
            start_frequency,
            end_frequency,
            sample_rate,
            n_samples,
            amplitude,
        }
    }
}

impl Iterator for ExponentialSweep {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        use std::f64::consts::{FRAC_PI_2, PI};

        if self.sample_index < self.n_samples {
            // phase accumulates to ~1e5 rad for long sweeps, f32 is too coarse for that
            let c = (self.end_frequency as f64 / self.start_frequency as f64).ln();
            let l = self.n_samples as f64 / self.sample_rate as f64 / c;

            let t = self.sample_index as f64 / self.sample_rate as f64;
            let s = 2.0 * PI * self.start_frequency as f64 * l * (f64::exp(t / l) - 1.0);
            let s = self.amplitude * f64::cos(s + FRAC_PI_2) as f32;

            self.sample_index += 1;

            Some(s)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.n_samples - self.sample_index;
        (len, Some(len))
    }
}

impl ExactSizeIterator for ExponentialSweep {}
