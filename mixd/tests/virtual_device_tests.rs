//! Integration tests for the virtual device and its bridge branch

mod helpers;

use helpers::{collect_events, wait_until, TestDaemon, TEST_SAMPLE_RATE};
use mixd::{AudioFormat, BranchId, BranchState, Daemon, DaemonEvent, Error, StaticRegistry};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn output_format() -> AudioFormat {
    AudioFormat::new(TEST_SAMPLE_RATE, 1)
}

#[test]
fn test_written_frames_are_mixed_with_bridge_gain() {
    let harness = TestDaemon::start(2);
    let daemon = &harness.daemon;
    daemon.set_gain(BranchId::BRIDGE, 0.5);
    std::thread::sleep(Duration::from_millis(50));

    let device = daemon.virtual_device();
    assert_eq!(device.name(), "Sound Daemon");
    let writer = device.open_writer(output_format()).unwrap();
    assert_eq!(daemon.state(BranchId::BRIDGE), Some(BranchState::Playing));

    // 100 ms of audio, well inside the 200 ms bridge
    writer.write(&[0.5; 800]);
    assert!(wait_until(TIMEOUT, || harness.peak() > 0.2));
    assert!((harness.peak() - 0.25).abs() < 0.01);
}

#[test]
fn test_second_writer_is_busy_until_first_closes() {
    let harness = TestDaemon::start(1);
    let device = harness.daemon.virtual_device();
    let mut events = harness.daemon.subscribe();

    let first = device.open_writer(output_format()).unwrap();
    assert!(matches!(
        device.open_writer(output_format()),
        Err(Error::VirtualDeviceBusy)
    ));

    drop(first);
    assert_eq!(harness.daemon.state(BranchId::BRIDGE), Some(BranchState::Closed));

    let received = collect_events(&mut events, TIMEOUT, |events| {
        events
            .iter()
            .any(|e| matches!(e, DaemonEvent::VirtualWriterClosed { .. }))
    });
    assert!(matches!(received[0], DaemonEvent::VirtualWriterOpened { sample_rate, channels: 1, .. } if sample_rate == TEST_SAMPLE_RATE));

    assert!(device.open_writer(output_format()).is_ok());
}

#[test]
fn test_overflow_drops_oldest_samples() {
    let harness = TestDaemon::start(1);
    let daemon = &harness.daemon;
    let device = daemon.virtual_device();
    let writer = device.open_writer(output_format()).unwrap();

    // The bridge holds 200 ms (1600 frames). One push of 400 ms keeps only the newest half.
    let mut burst = vec![0.1f32; 1600];
    burst.extend(std::iter::repeat(0.5f32).take(1600));
    let dropped = writer.write(&burst);
    assert_eq!(dropped, 1600);

    assert!(wait_until(TIMEOUT, || harness
        .capture
        .samples()
        .iter()
        .filter(|&&s| (s - 0.5).abs() < 0.01)
        .count()
        >= 1600));
    assert!(!harness
        .capture
        .samples()
        .iter()
        .any(|&s| (s - 0.1).abs() < 0.01));

    drop(writer);
    assert!(device.dropped_samples() >= 1600);
    assert!(daemon.stats().bridge_dropped_samples >= 1600);
}

#[test]
fn test_writer_format_is_converted_to_output() {
    let harness = TestDaemon::start(1);
    let device = harness.daemon.virtual_device();
    let writer = device.open_writer(AudioFormat::new(16000, 2)).unwrap();

    // 150 ms of stereo i16 at half scale
    writer.write_i16(&[16384; 16000 * 2 * 150 / 1000]);
    assert!(wait_until(TIMEOUT, || harness
        .capture
        .samples()
        .iter()
        .filter(|&&s| (s - 0.5).abs() < 0.05)
        .count()
        > 400));
}

#[test]
fn test_daemon_can_play_into_another_daemon() {
    let upstream = TestDaemon::start(1);
    let registry = StaticRegistry::with_device(upstream.daemon.virtual_device());
    let downstream = Daemon::create(&registry, None, &helpers::test_config(1)).unwrap();
    assert_eq!(downstream.device_name(), "Sound Daemon");
    assert!(upstream.daemon.virtual_device().has_writer());

    let file = upstream.constant_file("tone.wav", 8000, 0.25);
    let branch = downstream.allocate().unwrap();
    downstream.open(branch, &file).unwrap();
    downstream.play(branch).unwrap();

    assert!(wait_until(TIMEOUT, || upstream.peak() > 0.2));

    downstream.destroy();
    assert!(wait_until(TIMEOUT, || !upstream.daemon.virtual_device().has_writer()));
}

#[test]
fn test_writer_refused_after_destroy() {
    let harness = TestDaemon::start(1);
    let device = harness.daemon.virtual_device();
    let TestDaemon { daemon, .. } = harness;
    daemon.destroy();

    assert!(device.open_writer(output_format()).is_err());
}
