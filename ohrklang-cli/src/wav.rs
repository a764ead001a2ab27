use std::path::Path;

use anyhow::Context;
use ndarray::{Array2, ArrayView2};

/// Reads a WAV file into a time-major buffer, integer formats are scaled to `[-1, 1)`.
pub fn read(path: &Path) -> anyhow::Result<(u32, Array2<f32>)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();

    let mut samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let channels = spec.channels as usize;
    let frames = samples.len() / channels;
    samples.truncate(frames * channels);
    let data = Array2::from_shape_vec((frames, channels), samples)?;

    Ok((spec.sample_rate, data))
}

/// Writes a time-major buffer as 32 bit float WAV.
pub fn write(path: &Path, sample_rate: u32, data: ArrayView2<'_, f32>) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: data.ncols() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for s in data.iter() {
        writer.write_sample(*s)?;
    }
    writer.finalize()?;

    Ok(())
}

pub fn write_channels(path: &Path, sample_rate: u32, channels: &[&[f32]]) -> anyhow::Result<()> {
    let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    let data = Array2::from_shape_fn((frames, channels.len()), |(n, c)| channels[c][n]);

    write(path, sample_rate, data.view())
}
