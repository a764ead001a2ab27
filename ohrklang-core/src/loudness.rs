use ndarray::ArrayView1;
use ndarray_stats::QuantileExt;

/// Largest absolute sample value, zero for an empty signal.
pub fn peak(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }

    let magnitudes = ArrayView1::from(signal).mapv(f32::abs);
    *magnitudes.max_skipnan()
}

pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }

    let square_sum: f64 = signal.iter().map(|s| (*s as f64).powi(2)).sum();
    (square_sum / signal.len() as f64).sqrt() as f32
}

/// Index of the sample with the largest magnitude.
pub fn peak_position(signal: &[f32]) -> Option<usize> {
    ArrayView1::from(signal)
        .mapv(f32::abs)
        .argmax_skipnan()
        .ok()
}

/// Share of the signal energy found within `range`.
pub fn energy_ratio(signal: &[f32], range: std::ops::Range<usize>) -> f32 {
    let energy = |s: &[f32]| s.iter().map(|s| (*s as f64).powi(2)).sum::<f64>();

    let total = energy(signal);
    if total == 0.0 {
        return 0.0;
    }

    let end = range.end.min(signal.len());
    let start = range.start.min(end);

    (energy(&signal[start..end]) / total) as f32
}
