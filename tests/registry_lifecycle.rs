mod common;

use anyhow::Result;
use std::time::{Duration, Instant};

use common::{
    fast_settings, stream_config, wait_until, CountingRecognizer, Harness, RecordingSink,
    ScriptedCapture,
};
use face_stream::stream::DEDUP_WINDOW;
use face_stream::{InMemoryEncodingStore, WorkerSettings, WorkerState};

#[test]
fn duplicate_start_is_rejected_and_keeps_the_first_config() -> Result<()> {
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::default(), fast_settings());

    assert!(h.registry.start_stream(stream_config("cam1", "stub://first", 30))?);
    assert!(!h.registry.start_stream(stream_config("cam1", "stub://second", 30))?);
    assert_eq!(h.registry.len(), 1);
    assert_eq!(
        h.registry.config("cam1").map(|cfg| cfg.source_url),
        Some("stub://first".to_string())
    );

    assert!(h.registry.stop_stream("cam1"));
    Ok(())
}

#[test]
fn stop_of_unknown_camera_reports_false() {
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::default(), fast_settings());
    assert!(!h.registry.stop_stream("nope"));
}

#[test]
fn stop_releases_the_capture_and_forgets_the_worker() -> Result<()> {
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::default(), fast_settings());

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(wait_until(|| h.recognizer.calls() > 0));

    assert!(h.registry.stop_stream("cam1"));
    assert!(h.registry.is_empty());
    assert!(!h.registry.is_running("cam1"));
    assert_eq!(h.capture.opens(), 1);
    assert_eq!(h.capture.releases(), 1);

    assert!(!h.registry.stop_stream("cam1"));
    Ok(())
}

#[test]
fn only_every_nth_frame_is_recognized() -> Result<()> {
    for (interval, expected_calls) in [(3, 3), (1, 10)] {
        let capture = ScriptedCapture::with_frames(Some(10)).gated(1);
        let h = Harness::new(capture, RecordingSink::default(), fast_settings());

        assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", interval))?);
        // The second open blocks on the gate, so the worker is parked after one session.
        assert!(wait_until(|| h.capture.releases() == 1));
        assert_eq!(h.recognizer.calls(), expected_calls, "interval {}", interval);

        h.capture.open_gate();
        assert!(h.registry.stop_stream("cam1"));
    }
    Ok(())
}

#[test]
fn dedup_window_survives_reconnects() -> Result<()> {
    let capture = ScriptedCapture::with_frames(Some(3)).gated(2);
    let h = Harness::new(capture, RecordingSink::default(), fast_settings());

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);

    // Two sessions of three frames each, all identifying emp1 inside one window.
    assert!(wait_until(|| h.capture.releases() == 2));
    assert_eq!(h.recognizer.calls(), 6);
    assert_eq!(h.sink.count(), 1);

    h.clock.advance(DEDUP_WINDOW + Duration::from_secs(1));
    h.capture.permit_opens(1);
    assert!(wait_until(|| h.capture.releases() == 3));
    assert_eq!(h.recognizer.calls(), 9);
    assert_eq!(h.sink.count(), 2);

    let status = h.registry.status();
    assert_eq!(status[0].notifications_sent, 2);

    let body = &h.sink.bodies()[0];
    assert_eq!(body["employee_id"], "emp1");
    assert_eq!(body["camera_id"], "cam1");
    assert_eq!(body["company_id"], "acme");
    assert_eq!(body["location_id"], "hq");
    assert_eq!(body["type"], "check_in");
    assert_eq!(body["source"], "rtsp");

    h.capture.open_gate();
    assert!(h.registry.stop_stream("cam1"));
    Ok(())
}

#[test]
fn a_new_worker_starts_with_an_empty_dedup_window() -> Result<()> {
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::default(), fast_settings());

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(wait_until(|| h.sink.count() == 1));
    assert!(h.registry.stop_stream("cam1"));

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(wait_until(|| h.sink.count() == 2));
    assert!(h.registry.stop_stream("cam1"));
    Ok(())
}

#[test]
fn reconnects_are_bounded_and_other_cameras_keep_running() -> Result<()> {
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::default(), fast_settings());

    assert!(h.registry.start_stream(stream_config("cam-ok", "stub://ok", 1))?);
    assert!(h.registry.start_stream(stream_config("cam-bad", "rtsp://cam/fail", 1))?);

    assert!(wait_until(|| !h.registry.is_running("cam-bad")));
    assert_eq!(h.capture.opens_of("rtsp://cam/fail"), 5);

    let status = h.registry.status();
    let bad = status.iter().find(|s| s.camera_id == "cam-bad").unwrap();
    assert!(!bad.running);
    assert_eq!(bad.state, WorkerState::Stopped);
    assert_eq!(bad.reconnect_attempts, 5);

    assert!(h.registry.is_running("cam-ok"));
    let calls = h.recognizer.calls();
    assert!(wait_until(|| h.recognizer.calls() > calls));

    h.registry.stop_all();
    assert!(h.registry.is_empty());
    Ok(())
}

#[test]
fn no_enrolled_faces_stops_before_capture() -> Result<()> {
    let h = Harness::with_store(
        ScriptedCapture::unbounded(),
        RecordingSink::default(),
        InMemoryEncodingStore::new(),
        fast_settings(),
    );

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(wait_until(|| !h.registry.is_running("cam1")));
    assert_eq!(h.capture.opens(), 0);
    assert_eq!(h.registry.status()[0].state, WorkerState::Stopped);

    assert!(h.registry.stop_stream("cam1"));
    assert!(h.registry.is_empty());
    Ok(())
}

#[test]
fn stop_interrupts_reconnect_backoff() -> Result<()> {
    let settings = WorkerSettings {
        reconnect_backoff: Duration::from_secs(30),
        ..fast_settings()
    };
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::default(), settings);

    assert!(h.registry.start_stream(stream_config("cam1", "rtsp://cam/fail", 1))?);
    assert!(wait_until(|| h.capture.opens_of("rtsp://cam/fail") == 1));

    let started = Instant::now();
    assert!(h.registry.stop_stream("cam1"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.capture.opens_of("rtsp://cam/fail"), 1);
    Ok(())
}

#[test]
fn failed_delivery_does_not_stop_the_worker() -> Result<()> {
    let h = Harness::new(ScriptedCapture::unbounded(), RecordingSink::failing(), fast_settings());

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(wait_until(|| h.sink.count() == 1));
    let calls = h.recognizer.calls();
    assert!(wait_until(|| h.recognizer.calls() > calls + 5));

    assert!(h.registry.is_running("cam1"));
    // The failed event is not retried within the window.
    assert_eq!(h.sink.count(), 1);
    assert_eq!(h.registry.status()[0].notifications_sent, 0);

    assert!(h.registry.stop_stream("cam1"));
    Ok(())
}

#[test]
fn recognition_errors_skip_the_frame_and_the_worker_keeps_going() -> Result<()> {
    let h = Harness::with_recognizer(
        ScriptedCapture::unbounded(),
        CountingRecognizer::failing_every("emp1", 2),
        RecordingSink::default(),
        fast_settings(),
    );

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    // The first call fails, the second identifies emp1.
    assert!(wait_until(|| h.sink.count() == 1));
    assert!(h.recognizer.failures() >= 1);

    let calls = h.recognizer.calls();
    let failures = h.recognizer.failures();
    assert!(wait_until(|| h.recognizer.calls() > calls + 10));
    assert!(h.recognizer.failures() > failures);
    assert!(h.registry.is_running("cam1"));

    h.clock.advance(DEDUP_WINDOW + Duration::from_secs(1));
    assert!(wait_until(|| h.sink.count() == 2));
    assert!(h.registry.is_running("cam1"));
    assert_eq!(h.registry.status()[0].notifications_sent, 2);
    assert_eq!(h.capture.opens(), 1);

    assert!(h.registry.stop_stream("cam1"));
    Ok(())
}

#[test]
fn stop_gives_up_on_a_worker_stuck_in_a_read() -> Result<()> {
    let settings = WorkerSettings {
        stop_timeout: Duration::from_millis(50),
        ..fast_settings()
    };
    let h = Harness::new(
        ScriptedCapture::unbounded().blocking_reads(),
        RecordingSink::default(),
        settings,
    );

    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(wait_until(|| h.capture.parked_reads() == 1));

    let started = Instant::now();
    assert!(h.registry.stop_stream("cam1"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(h.registry.status().is_empty());
    assert!(h.registry.is_empty());

    // The camera id is free again even though the old worker is still blocked.
    assert!(h.registry.start_stream(stream_config("cam1", "stub://cam1", 1))?);
    assert!(h.registry.is_running("cam1"));
    assert!(wait_until(|| h.capture.parked_reads() == 2));

    // Once its read returns, the abandoned worker sees the stop and releases.
    h.capture.unblock_reads();
    assert!(wait_until(|| h.capture.releases() == 1));
    assert!(h.registry.is_running("cam1"));

    assert!(h.registry.stop_stream("cam1"));
    assert!(wait_until(|| h.capture.releases() == 2));
    Ok(())
}
