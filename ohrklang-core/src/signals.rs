mod noise;
mod sweep;

pub use noise::WhiteNoise;
pub use sweep::{make_sweep, ExponentialSweep, SweepSpec, PRE_SILENCE};
