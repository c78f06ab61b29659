mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{collecting_sink, pipeline, uniform_frame, FakeRuntime, ScriptedSource, WAIT};
use segstream::roi::{view_to_original, OriginalRect, RoiState, ViewRect};
use segstream::{PipelineEvent, PipelineState};

fn expect_event(events: &crossbeam_channel::Receiver<PipelineEvent>, wanted: PipelineEvent) {
    let deadline = Instant::now() + WAIT;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) if event == wanted => return,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    panic!("never saw {wanted:?}");
}

#[test]
fn presents_every_frame_when_inference_keeps_up() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    pipeline
        .start(Box::new(source), FakeRuntime::new("a", 8, &[]).into_engine(), sink)
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);

    for value in [10u8, 20, 30] {
        frames.send(uniform_frame(16, 12, value)).unwrap();
        let shown = presented.recv_timeout(WAIT).unwrap();
        assert_eq!((shown.width, shown.height), (16, 12));
        assert!(shown.value.abs_diff(value) <= 1);
    }
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn stop_is_prompt_and_nothing_is_presented_afterwards() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let source = source.with_decode_time(Duration::from_millis(15));
    let (sink, presented) = collecting_sink();
    let runtime = FakeRuntime::new("a", 8, &[&[1, 2, 2]]).with_delay(Duration::from_millis(5));
    pipeline.start(Box::new(source), runtime.into_engine(), sink).unwrap();

    let feeder = thread::spawn(move || {
        for i in 0..200u32 {
            if frames.send(uniform_frame(32, 32, (i % 250) as u8)).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    });
    presented.recv_timeout(WAIT).unwrap();

    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_millis(500), "stop took {:?}", started.elapsed());
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    while presented.try_recv().is_ok() {}
    thread::sleep(Duration::from_millis(100));
    assert!(presented.try_recv().is_err());
    feeder.join().unwrap();
}

#[test]
fn slow_inference_sees_only_the_latest_frame() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    let runtime = FakeRuntime::new("a", 8, &[]).with_delay(Duration::from_millis(60));
    let calls = runtime.calls();
    pipeline.start(Box::new(source), runtime.into_engine(), sink).unwrap();

    let tags: Vec<u8> = (1..=20).map(|i| i * 10).collect();
    for &tag in &tags {
        frames.send(uniform_frame(16, 16, tag)).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    let last = *tags.last().unwrap();
    let mut seen = Vec::new();
    while let Ok(shown) = presented.recv_timeout(WAIT) {
        seen.push(shown.value);
        if shown.value.abs_diff(last) <= 1 {
            break;
        }
    }
    pipeline.stop();

    assert!(seen.last().is_some_and(|v| v.abs_diff(last) <= 1), "saw {seen:?}");
    assert!(seen.len() < tags.len(), "every frame was inferred: {seen:?}");
    assert_eq!(calls.lock().unwrap().len(), seen.len());
}

#[test]
fn model_swap_resets_recurrent_state_to_the_new_shapes() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    let model_a = FakeRuntime::new("a", 8, &[&[1, 4, 4, 4], &[1, 2, 2, 2]]);
    let model_b = FakeRuntime::new("b", 8, &[&[1, 3, 3, 3]]);
    let calls = model_a.calls();
    let calls_b = model_b.calls();
    let events = pipeline.events();
    pipeline.start(Box::new(source), model_a.into_engine(), sink).unwrap();

    for i in 0..5 {
        frames.send(uniform_frame(16, 16, 40 + i)).unwrap();
        presented.recv_timeout(WAIT).unwrap();
    }
    pipeline.swap_model(model_b.into_engine()).unwrap();
    expect_event(&events, PipelineEvent::ModelSwapped);
    assert_eq!(pipeline.state(), PipelineState::Running);
    for i in 0..5 {
        frames.send(uniform_frame(16, 16, 90 + i)).unwrap();
        presented.recv_timeout(WAIT).unwrap();
    }
    pipeline.stop();

    let before = calls.lock().unwrap().clone();
    assert_eq!(before.len(), 5);
    for (n, call) in before.iter().enumerate() {
        assert_eq!(call.hidden_lens, vec![64, 8]);
        assert_eq!(call.hidden_first, vec![n as f32, n as f32]);
    }

    let after = calls_b.lock().unwrap().clone();
    assert_eq!(after.len(), 5);
    for (n, call) in after.iter().enumerate() {
        assert_eq!(call.hidden_lens, vec![27]);
        assert_eq!(call.hidden_first, vec![n as f32], "call {n} after swap");
    }
}

#[test]
fn source_end_is_reported_and_stops_the_session() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    let events = pipeline.events();
    pipeline
        .start(Box::new(source), FakeRuntime::new("a", 8, &[]).into_engine(), sink)
        .unwrap();

    frames.send(uniform_frame(8, 8, 50)).unwrap();
    presented.recv_timeout(WAIT).unwrap();
    drop(frames);

    expect_event(&events, PipelineEvent::SourceEnded);
    expect_event(&events, PipelineEvent::Stopped);
    assert!(pipeline.wait_stopped(WAIT));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.swap_model(FakeRuntime::new("b", 8, &[]).into_engine()).is_err());
}

#[test]
fn repeated_runtime_failures_end_the_session() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    let events = pipeline.events();
    let runtime = FakeRuntime::new("a", 8, &[]).failing();
    let calls = runtime.calls();
    pipeline.start(Box::new(source), runtime.into_engine(), sink).unwrap();

    let feeder = thread::spawn(move || {
        for _ in 0..100 {
            if frames.send(uniform_frame(8, 8, 1)).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    });

    let deadline = Instant::now() + WAIT;
    let failed = loop {
        match events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(PipelineEvent::Failed(reason)) => break reason,
            Ok(_) => continue,
            Err(_) => panic!("session never failed"),
        }
    };
    assert!(failed.contains("execution provider lost"), "{failed}");
    expect_event(&events, PipelineEvent::Stopped);
    assert!(pipeline.wait_stopped(WAIT));
    assert_eq!(calls.lock().unwrap().len(), 5);
    assert!(presented.try_recv().is_err());

    pipeline.stop();
    feeder.join().unwrap();
}

#[test]
fn roi_maps_a_500_view_onto_a_1000_frame() {
    let mapped = view_to_original(
        ViewRect::new(100.0, 100.0, 300.0, 300.0),
        ViewRect::new(0.0, 0.0, 500.0, 500.0),
        1000,
        1000,
    );
    assert_eq!(mapped, Some(OriginalRect::new(200, 200, 600, 600)));
}

#[test]
fn roi_crop_drives_what_is_presented() {
    let mut pipeline = pipeline();
    let roi = pipeline.roi();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    pipeline
        .start(Box::new(source), FakeRuntime::new("a", 8, &[]).into_engine(), sink)
        .unwrap();

    frames.send(uniform_frame(1000, 1000, 60)).unwrap();
    let full = presented.recv_timeout(WAIT).unwrap();
    assert_eq!((full.width, full.height), (1000, 1000));

    roi.layout(500, 500);
    assert_eq!(roi.state(), RoiState::Default);
    assert_eq!(roi.target_rect(), ViewRect::new(0.0, 0.0, 500.0, 500.0));
    assert!(roi.set_rect(ViewRect::new(100.0, 100.0, 300.0, 300.0)));
    roi.set_crop_only(true);

    frames.send(uniform_frame(1000, 1000, 60)).unwrap();
    let cropped = presented.recv_timeout(WAIT).unwrap();
    assert_eq!((cropped.width, cropped.height), (400, 400));

    roi.set_crop_only(false);
    frames.send(uniform_frame(1000, 1000, 60)).unwrap();
    let composed = presented.recv_timeout(WAIT).unwrap();
    assert_eq!((composed.width, composed.height), (1000, 1000));

    pipeline.stop();
}

#[test]
fn restart_after_stop_begins_a_fresh_session() {
    let mut pipeline = pipeline();
    let events = pipeline.events();
    for round in 0..2 {
        let (frames, source) = ScriptedSource::new();
        let (sink, presented) = collecting_sink();
        let runtime = FakeRuntime::new("a", 8, &[&[4]]);
        let calls = runtime.calls();
        pipeline.start(Box::new(source), runtime.into_engine(), sink).unwrap();
        expect_event(&events, PipelineEvent::Started);

        frames.send(uniform_frame(8, 8, 30)).unwrap();
        presented.recv_timeout(WAIT).unwrap();
        assert_eq!(calls.lock().unwrap()[0].hidden_first, vec![0.0], "round {round}");

        assert!(pipeline
            .start(
                Box::new(ScriptedSource::new().1),
                FakeRuntime::new("b", 8, &[]).into_engine(),
                collecting_sink().0
            )
            .is_err());
        pipeline.stop();
        expect_event(&events, PipelineEvent::Stopped);
    }
}

#[test]
fn swap_during_inference_still_presents_the_finished_frame() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    let model_a = FakeRuntime::new("a", 8, &[&[4]]).with_delay(Duration::from_millis(200));
    let calls_a = model_a.calls();
    let model_b = FakeRuntime::new("b", 8, &[&[4]]);
    let calls_b = model_b.calls();
    pipeline.start(Box::new(source), model_a.into_engine(), sink).unwrap();

    frames.send(uniform_frame(16, 16, 70)).unwrap();
    thread::sleep(Duration::from_millis(60));
    pipeline.swap_model(model_b.into_engine()).unwrap();

    let shown = presented.recv_timeout(WAIT).unwrap();
    assert!(shown.value.abs_diff(70) <= 1, "presented {}", shown.value);
    assert_eq!(calls_a.lock().unwrap().len(), 1);

    frames.send(uniform_frame(16, 16, 110)).unwrap();
    let shown = presented.recv_timeout(WAIT).unwrap();
    assert!(shown.value.abs_diff(110) <= 1, "presented {}", shown.value);
    assert_eq!(calls_b.lock().unwrap()[0].hidden_first, vec![0.0]);
    pipeline.stop();
}

#[test]
fn buffer_allocation_failure_ends_the_session() {
    let mut pipeline = pipeline();
    let (frames, source) = ScriptedSource::new();
    let (sink, presented) = collecting_sink();
    let events = pipeline.events();
    let runtime = FakeRuntime::new("huge", 8, &[&[usize::MAX / 16]]);
    let calls = runtime.calls();
    pipeline.start(Box::new(source), runtime.into_engine(), sink).unwrap();

    frames.send(uniform_frame(8, 8, 20)).unwrap();

    let deadline = Instant::now() + WAIT;
    let reason = loop {
        match events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(PipelineEvent::Failed(reason)) => break reason,
            Ok(_) => continue,
            Err(_) => panic!("session never failed"),
        }
    };
    assert!(reason.contains("failed to allocate"), "{reason}");
    assert!(reason.contains("hidden-input-0"), "{reason}");
    expect_event(&events, PipelineEvent::Stopped);
    assert!(pipeline.wait_stopped(WAIT));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(calls.lock().unwrap().is_empty());
    assert!(presented.try_recv().is_err());
}
