mod log;
mod wav;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ndarray::Axis;

use ohrklang_core::{
    dbfs, deconvolve, deconvolve_plain, loudness, ImpulseResponse, IrRequest, MeasurementConfig,
    MeasurementKind, Recording, Session, SimulatedDevice,
};

#[derive(Parser)]
#[clap(author, version)]
struct Cli {
    /// Measurement configuration file, overridden by `OHRKLANG_*` variables.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Write a JSON log of everything to this file.
    #[arg(long, global = true)]
    debug_log: Option<PathBuf>,
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the excitation buffer of the configured sweep.
    Sweep {
        output: PathBuf,
        #[arg(long)]
        quick_check: bool,
    },
    /// Impulse response of every channel of a recording against a mono reference.
    Deconvolve {
        reference: PathBuf,
        recording: PathBuf,
        output: PathBuf,
        /// Spectral division only, for excitations that are not sweeps.
        #[arg(long)]
        plain: bool,
        #[arg(long)]
        highpass: Option<f32>,
        #[arg(long)]
        lowpass: Option<f32>,
    },
    /// Run a whole measurement against a simulated room.
    Simulate {
        /// Delay of the left ear in samples.
        #[arg(long, default_value_t = 240)]
        delay: usize,
        /// Decay time constant of the left ear in milliseconds.
        #[arg(long, default_value_t = 5.0)]
        decay: f32,
        #[arg(long)]
        quick_check: bool,
        /// Write the impulse responses to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Measure through JACK.
    #[cfg(feature = "jack")]
    Measure {
        #[arg(long = "playback-port")]
        playback_ports: Vec<String>,
        #[arg(long = "capture-port")]
        capture_ports: Vec<String>,
        #[arg(long)]
        quick_check: bool,
        /// Mono cue played after a successful measurement.
        #[arg(long)]
        cue: Option<PathBuf>,
        #[arg(long)]
        recording: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    log::init(cli.verbose, cli.debug_log.as_deref())?;

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.subcommand {
        Command::Sweep {
            output,
            quick_check,
        } => {
            let session = Session::new(config)?;
            let Some(excitation) = session.excitation(kind(quick_check)) else {
                anyhow::bail!("no excitation prepared");
            };

            wav::write(&output, session.sample_rate(), excitation.buffer.view())?;

            let duration = excitation.buffer.nrows() as f32 / session.sample_rate() as f32;
            println!(
                "Sweep of {duration}s on {} channels, written to: {}",
                excitation.buffer.ncols(),
                output.display()
            );

            Ok(())
        }
        Command::Deconvolve {
            reference,
            recording,
            output,
            plain,
            highpass,
            lowpass,
        } => {
            let (sample_rate, reference) = wav::read(&reference)?;
            let (recording_rate, recording) = wav::read(&recording)?;

            anyhow::ensure!(
                sample_rate == recording_rate,
                "reference runs at {sample_rate} Hz, recording at {recording_rate} Hz"
            );

            let reference = reference.column(0).to_vec();
            let deconvolution = config.deconvolution_config(
                sample_rate,
                config.start_freq_hz,
                highpass,
                lowpass,
            );

            let responses = recording
                .axis_iter(Axis(1))
                .map(|channel| {
                    let channel = channel.to_vec();
                    if plain {
                        deconvolve_plain(&reference, &channel)
                    } else {
                        deconvolve(&reference, &channel, sample_rate, &deconvolution)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;

            let channels: Vec<_> = responses.iter().map(Vec::as_slice).collect();
            wav::write_channels(&output, sample_rate, &channels)?;

            let duration = reference.len() as f32 / sample_rate as f32;
            println!(
                "Impulse response of : {duration}s, written to: {}",
                output.display()
            );

            Ok(())
        }
        Command::Simulate {
            delay,
            decay,
            quick_check,
            output,
        } => {
            let mut session = Session::new(config)?;
            let mut device = simulated_room(&session, delay, decay);

            let recording = session.measure(&mut device, kind(quick_check))?;
            print_levels(recording);

            let ir = session.impulse_responses(IrRequest::default())?;
            print_impulse_response(ir);

            if let Some(output) = output {
                let channels = [ir.left.as_slice(), ir.right.as_slice()];
                wav::write_channels(&output, ir.sample_rate, &channels)?;
            }

            Ok(())
        }
        #[cfg(feature = "jack")]
        Command::Measure {
            playback_ports,
            capture_ports,
            quick_check,
            cue,
            recording,
            output,
        } => {
            let ports = |ports: &[String]| (!ports.is_empty()).then(|| ports.to_vec());
            let playback_ports = ports(&playback_ports);
            let capture_ports = ports(&capture_ports);

            let mut device = ohrklang_core::JackDevice::new(
                env!("CARGO_BIN_NAME"),
                playback_ports.as_deref(),
                capture_ports.as_deref(),
            )?;

            let mut session = Session::new(config)?;
            session.set_sample_rate(device.sample_rate())?;

            let measured = session.measure(&mut device, kind(quick_check))?;
            print_levels(measured);

            if let Some(path) = recording {
                wav::write_channels(
                    &path,
                    measured.sample_rate,
                    &[
                        measured.left.as_slice(),
                        measured.right.as_slice(),
                        measured.feedback.as_slice(),
                    ],
                )?;
            }

            let ir = session.impulse_responses(IrRequest::default())?;
            print_impulse_response(ir);

            if let Some(output) = output {
                let channels = [ir.left.as_slice(), ir.right.as_slice()];
                wav::write_channels(&output, ir.sample_rate, &channels)?;
            }

            if let Some(cue) = cue {
                let (cue_rate, cue) = wav::read(&cue)?;
                anyhow::ensure!(
                    cue_rate == session.sample_rate(),
                    "cue runs at {cue_rate} Hz, device at {} Hz",
                    session.sample_rate()
                );

                session.play_cue(&mut device, &cue.column(0).to_vec())?;
            }

            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MeasurementConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix("OHRKLANG")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("input_channel_roles")
                .with_list_parse_key("output_channel_roles"),
        )
        .build()
        .context("loading configuration")?;

    Ok(config.try_deserialize()?)
}

fn kind(quick_check: bool) -> MeasurementKind {
    if quick_check {
        MeasurementKind::QuickCheck
    } else {
        MeasurementKind::Full
    }
}

/// Left ear through a delayed exponential decay, every other role wired straight back.
fn simulated_room(session: &Session, delay: usize, decay_ms: f32) -> SimulatedDevice {
    let layout = session.layout();
    let sample_rate = session.sample_rate();

    let time_constant = decay_ms / 1000.0 * sample_rate as f32;
    let mut response = vec![0.0; delay];
    response.extend(
        (0..(time_constant * 8.0) as usize).map(|n| f32::exp(-(n as f32) / time_constant)),
    );

    let (input, output) = (layout.input(), layout.output());
    let mut device =
        SimulatedDevice::new(sample_rate, layout.input_channels(), layout.output_channels());

    if let (Some(o), Some(i)) = (output.left, input.left) {
        device = device.connect(o, i, response);
    }

    for (o, i) in [(output.right, input.right), (output.feedback, input.feedback)] {
        if let (Some(o), Some(i)) = (o, i) {
            device = device.loopback(o, i);
        }
    }

    device
}

fn print_levels(recording: &Recording) {
    for (name, signal) in [
        ("left", &recording.left),
        ("right", &recording.right),
        ("feedback", &recording.feedback),
    ] {
        println!(
            "{name:>8}: rms: {:>8.2} dbfs, peak: {:>8.2} dbfs",
            dbfs(loudness::rms(signal)),
            dbfs(loudness::peak(signal))
        );
    }
}

fn print_impulse_response(ir: &ImpulseResponse) {
    for (name, signal) in [("left", &ir.left), ("right", &ir.right)] {
        let peak = loudness::peak_position(signal).unwrap_or_default();
        let delay_ms = peak as f32 / ir.sample_rate as f32 * 1000.0;

        println!(
            "{name:>8}: peak {:>8.2} dbfs after {delay_ms:.2} ms ({peak} samples)",
            dbfs(loudness::peak(signal)),
        );
    }
}
