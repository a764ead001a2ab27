/// Squared cosine fade-out.
///
/// All ones, except for the last `fade_width` samples which follow
/// `cos(t * PI / 2)^2` with `t` linearly spaced from 0 to 1 (both inclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct FadeOutWindow {
    data: Vec<f32>,
}

impl FadeOutWindow {
    pub fn new(width: usize, fade_width: usize) -> Self {
        let fade_width = fade_width.min(width);
        let flat_width = width - fade_width;

        let fade = (0..fade_width).map(|n| {
            let t = if fade_width > 1 {
                n as f64 / (fade_width - 1) as f64
            } else {
                0.0
            };

            f64::cos(t * std::f64::consts::FRAC_PI_2).powi(2) as f32
        });

        let mut data = Vec::with_capacity(width);
        data.extend((0..flat_width).map(|_| 1.0f32));
        data.extend(fade);

        Self { data }
    }

    pub fn apply(&self, signal: &mut [f32]) {
        for (s, w) in signal.iter_mut().zip(self.data.iter()) {
            *s *= w;
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
