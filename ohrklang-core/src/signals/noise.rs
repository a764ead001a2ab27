use rand::{distributions, distributions::Distribution, rngs, SeedableRng};

#[derive(Debug, Clone)]
pub struct WhiteNoise {
    rng: rngs::SmallRng,
    distribution: distributions::Uniform<f32>,
}

impl WhiteNoise {
    /// Uniform noise within `[0, amplitude)`, never crosses zero.
    pub fn positive(amplitude: f32) -> Self {
        Self::with_distribution(distributions::Uniform::new(0.0, amplitude))
    }

    fn with_distribution(distribution: distributions::Uniform<f32>) -> Self {
        WhiteNoise {
            rng: rngs::SmallRng::from_entropy(),
            distribution,
        }
    }

    pub fn take_samples(self, n_samples: usize) -> std::iter::Take<WhiteNoise> {
        self.into_iter().take(n_samples)
    }
}

impl Iterator for WhiteNoise {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.distribution.sample(&mut self.rng))
    }
}
