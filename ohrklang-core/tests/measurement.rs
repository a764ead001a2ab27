use std::{
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use ndarray::{Array2, ArrayView2};
use ohrklang_core::{
    loudness, DeviceError, DuplexDevice, Error, IrRequest, MeasurementConfig, MeasurementKind,
    Session, SimulatedDevice, State, StopSignal, StreamSettings, FEEDBACK_NOISE_AMPLITUDE,
};

fn scenario() -> MeasurementConfig {
    MeasurementConfig {
        sample_rate: 48_000,
        sweep_duration_s: 1.0,
        post_silence_s: 0.5,
        start_freq_hz: 100.0,
        end_freq_hz: 10_000.0,
        amplitude_db: -20.0,
        fadeout_samples: 200,
        input_channel_roles: [0, 1, -1],
        output_channel_roles: [0, 1, -1],
        settle_time_ms: 0,
        ..Default::default()
    }
}

fn unfiltered() -> MeasurementConfig {
    MeasurementConfig {
        filter_repetitions: 0,
        ..scenario()
    }
}

fn stereo_loopback() -> SimulatedDevice {
    SimulatedDevice::new(48_000, 2, 2)
        .loopback(0, 0)
        .loopback(1, 1)
}

/// Pure delay followed by an exponential decay.
fn decaying_response(delay: usize) -> Vec<f32> {
    let mut response = vec![0.0; delay];
    response.extend((0..400).map(|k| 0.8 * f32::exp(-(k as f32) / 40.0)));
    response
}

#[test]
fn scenario_excitation_shape() {
    let session = Session::new(scenario()).unwrap();
    let excitation = session.excitation(MeasurementKind::Full).unwrap();

    assert_eq!(&[72_480, 2], excitation.buffer.shape());
    assert_eq!(excitation.sweep, excitation.buffer.column(0).to_vec());
    assert_eq!(excitation.sweep, excitation.buffer.column(1).to_vec());
}

#[test]
fn loopback_yields_dirac() {
    let mut session = Session::new(unfiltered()).unwrap();
    let mut device = stereo_loopback();

    session.measure(&mut device, MeasurementKind::Full).unwrap();
    let ir = session.impulse_responses(IrRequest::default()).unwrap();

    for ir in [&ir.left, &ir.right] {
        assert_eq!(72_480, ir.len());
        assert_eq!(Some(0), loudness::peak_position(ir));
        assert!(loudness::energy_ratio(ir, 0..1) > 1.0 - 1e-6);
    }
}

#[test]
fn loopback_with_default_bandpass() {
    let mut session = Session::new(scenario()).unwrap();
    let mut device = stereo_loopback();

    session.measure(&mut device, MeasurementKind::Full).unwrap();
    let ir = session.impulse_responses(IrRequest::default()).unwrap();

    let peak = loudness::peak_position(&ir.left).unwrap();
    assert!(peak < 32, "peak at {peak}");
    assert!(loudness::energy_ratio(&ir.left, 0..4_800) > 0.99);
    assert_eq!(ir.left, ir.right);
}

#[test]
fn round_trip_recovers_response() {
    let delay = 100;
    let response = decaying_response(delay);

    let mut session = Session::new(unfiltered()).unwrap();
    let mut device = SimulatedDevice::new(48_000, 2, 2)
        .connect(0, 0, response.clone())
        .loopback(1, 1);

    session.measure(&mut device, MeasurementKind::Full).unwrap();
    let ir = session.impulse_responses(IrRequest::default()).unwrap();

    assert_eq!(Some(delay), loudness::peak_position(&ir.left));

    for (n, expected) in response.iter().enumerate() {
        let error = (ir.left[n] - expected).abs();
        assert!(error < 1e-2, "sample {n}: {} != {expected}", ir.left[n]);
    }

    let main_lobe = delay..delay + 400;
    assert!(loudness::energy_ratio(&ir.left, main_lobe) > 0.99);
}

#[test]
fn disabled_feedback_is_replaced_by_sweep() {
    let mut session = Session::new(scenario()).unwrap();
    let mut device = stereo_loopback();

    let recording = session
        .measure(&mut device, MeasurementKind::Full)
        .unwrap()
        .clone();
    let excitation = session.excitation(MeasurementKind::Full).unwrap();

    assert_eq!(excitation.sweep, recording.feedback);
    assert_eq!(State::Ready, session.state());
    assert_eq!(1, device.preparations());
}

#[test]
fn captured_feedback_is_used() {
    let mut config = scenario();
    config.input_channel_roles = [0, 1, 2];
    config.output_channel_roles = [0, 1, 2];

    let mut session = Session::new(config).unwrap();
    let mut device = SimulatedDevice::new(48_000, 3, 3)
        .loopback(0, 0)
        .loopback(1, 1)
        .connect(2, 2, vec![0.5]);

    let recording = session.measure(&mut device, MeasurementKind::Full).unwrap();

    assert!(recording
        .feedback
        .iter()
        .zip(recording.left.iter())
        .all(|(f, l)| *f == 0.5 * l));
}

#[test]
fn silent_feedback_is_replaced_by_noise() {
    let mut config = scenario();
    config.input_channel_roles = [0, 1, 2];
    config.output_channel_roles = [0, 1, 2];

    let mut session = Session::new(config).unwrap();
    let mut device = SimulatedDevice::new(48_000, 3, 3)
        .loopback(0, 0)
        .loopback(1, 1);

    let recording = session.measure(&mut device, MeasurementKind::Full).unwrap();

    assert_eq!(72_480, recording.feedback.len());
    assert!(recording
        .feedback
        .iter()
        .all(|s| (0.0..FEEDBACK_NOISE_AMPLITUDE).contains(s)));
    assert!(recording.feedback.iter().any(|s| *s > 0.0));
}

#[test]
fn quick_check_uses_its_own_sweep() {
    let mut session = Session::new(scenario()).unwrap();
    let mut device = stereo_loopback();

    let recording = session
        .measure(&mut device, MeasurementKind::QuickCheck)
        .unwrap()
        .clone();
    let excitation = session.excitation(MeasurementKind::QuickCheck).unwrap();

    assert_eq!(MeasurementKind::QuickCheck, recording.kind);
    assert_eq!(144_480, recording.left.len());
    assert_eq!(excitation.sweep, recording.feedback);
}

#[test]
fn incompatible_device_keeps_previous_results() {
    let mut session = Session::new(scenario()).unwrap();

    session
        .measure(&mut stereo_loopback(), MeasurementKind::Full)
        .unwrap();
    let previous = session
        .impulse_responses(IrRequest::default())
        .unwrap()
        .clone();

    let mut mono = SimulatedDevice::new(48_000, 1, 2).loopback(0, 0);
    let result = session.measure(&mut mono, MeasurementKind::Full);

    assert!(matches!(
        result,
        Err(Error::Device(DeviceError::ChannelConfiguration {
            input: 2,
            max_input: 1,
            ..
        }))
    ));
    assert_eq!(State::Failed, session.state());
    assert_eq!(0, mono.transactions());
    assert_eq!(Some(&previous), session.impulse_response());
    assert!(session.recordings().is_some());

    session
        .measure(&mut stereo_loopback(), MeasurementKind::Full)
        .unwrap();
    assert_eq!(State::Ready, session.state());
}

#[test]
fn sample_rate_mismatch_fails() {
    let mut session = Session::new(scenario()).unwrap();
    let mut device = SimulatedDevice::new(44_100, 2, 2);

    assert!(matches!(
        session.measure(&mut device, MeasurementKind::Full),
        Err(Error::Device(DeviceError::SampleRate {
            requested: 48_000,
            actual: 44_100
        }))
    ));
    assert_eq!(State::Failed, session.state());
    assert!(session.recordings().is_none());
}

/// Keeps a transaction running until it is stopped or times out.
struct StalledDevice {
    started: mpsc::Sender<()>,
    timeout: Duration,
}

impl DuplexDevice for StalledDevice {
    fn check_settings(&self, _settings: &StreamSettings) -> Result<(), DeviceError> {
        Ok(())
    }

    fn duplex_transact(
        &mut self,
        output: ArrayView2<'_, f32>,
        input_channels: usize,
        stop: &StopSignal,
    ) -> Result<Array2<f32>, DeviceError> {
        let _ = self.started.send(());

        let begin = Instant::now();
        while begin.elapsed() < self.timeout {
            if stop.is_stopped() {
                return Err(DeviceError::Cancelled);
            }
            thread::sleep(Duration::from_millis(1));
        }

        Ok(Array2::zeros((output.nrows(), input_channels)))
    }
}

#[test]
fn interrupted_measurement_yields_no_recording() {
    let mut session = Session::new(scenario()).unwrap();
    let (started, transaction_started) = mpsc::channel();
    let mut device = StalledDevice {
        started,
        timeout: Duration::from_secs(10),
    };

    let handle = session.interrupt_handle();
    let stopper = thread::spawn(move || {
        transaction_started.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.stop();
    });

    assert!(matches!(
        session.measure(&mut device, MeasurementKind::Full),
        Err(Error::Device(DeviceError::Cancelled))
    ));
    stopper.join().unwrap();

    assert!(session.recordings().is_none());
    assert_eq!(State::Failed, session.state());
    assert!(!session.interrupt_handle().is_stopped());

    let mut device = stereo_loopback();
    session.measure(&mut device, MeasurementKind::Full).unwrap();
    assert_eq!(State::Ready, session.state());
}

#[test]
fn stop_between_measurements_is_ignored() {
    let mut session = Session::new(scenario()).unwrap();
    let mut device = stereo_loopback();

    session.measure(&mut device, MeasurementKind::Full).unwrap();
    session.interrupt_handle().stop();

    session.measure(&mut device, MeasurementKind::Full).unwrap();
    assert_eq!(2, device.transactions());
    assert_eq!(State::Ready, session.state());
}

#[test]
fn sweep_above_quarter_sample_rate_deconvolves_with_defaults() {
    let mut session = Session::new(MeasurementConfig {
        start_freq_hz: 15_000.0,
        end_freq_hz: 22_000.0,
        ..scenario()
    })
    .unwrap();
    let mut device = stereo_loopback();

    session.measure(&mut device, MeasurementKind::Full).unwrap();
    let ir = session.impulse_responses(IrRequest::default()).unwrap();

    assert_eq!(72_480, ir.left.len());
    let peak = loudness::peak_position(&ir.left).unwrap();
    assert!(peak < 32, "peak at {peak}");
    assert_eq!(ir.left, ir.right);
}

#[test]
fn idle_session_does_not_touch_device() {
    let mut session = Session::new(scenario()).unwrap();
    let mut device = SimulatedDevice::new(16_000, 2, 2);

    assert!(session.set_sample_rate(16_000).is_err());
    assert!(matches!(
        session.measure(&mut device, MeasurementKind::Full),
        Err(Error::NotArmed)
    ));
    assert_eq!(0, device.transactions());
}
