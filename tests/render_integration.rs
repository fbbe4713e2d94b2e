//! Integration tests for render scheduling
//!
//! Ticks are driven by hand through [`StreamSession::tick`] so frame drops
//! are deterministic; one wall-clock test checks the ticker's cadence cap.

mod common;

use common::builders::SessionBuilder;
use common::mock_helpers::{failing_renderer, GatedRenderer, RecordingRenderer};
use common::{assert_float_eq, expect_within, test_timeout};
use livescope::{ConnectionState, PipelineConfig, PushTransport, StreamSession, TickOutcome};
use serial_test::serial;
use std::time::Duration;

#[test]
fn test_slow_frame_drops_exactly_one_tick() {
    let (renderer, gate) = GatedRenderer::new(vec![2]);
    let h = SessionBuilder::new().renderer(Box::new(renderer)).build();
    h.clock.advance(Duration::from_secs(1));

    let mut outcomes = Vec::new();
    for tick in 1..=10 {
        let outcome = h.session.tick();
        outcomes.push(outcome);

        match tick {
            // Third frame blocks until released after the fourth tick
            3 => {
                assert_eq!(gate.started.recv_timeout(test_timeout()).unwrap(), 2);
            }
            4 => {
                gate.release.send(()).unwrap();
                assert!(h.session.wait_render_idle(test_timeout()));
            }
            _ => assert!(h.session.wait_render_idle(test_timeout())),
        }
    }

    let dropped = outcomes
        .iter()
        .filter(|o| **o == TickOutcome::Dropped)
        .count();
    assert_eq!(dropped, 1);
    assert_eq!(outcomes[3], TickOutcome::Dropped);

    let stats = h.session.status().render;
    assert_eq!(stats.frames_rendered, 9);
    assert_eq!(stats.frames_dropped, 1);
    assert_float_eq(stats.drop_rate(), 0.1, 1e-9);
    assert_float_eq(h.session.frame_rate(), 9.0, 1e-9);
}

#[test]
fn test_failing_renderer_is_contained() {
    let h = SessionBuilder::new().renderer(failing_renderer()).build();
    h.clock.advance(Duration::from_secs(1));

    for _ in 0..3 {
        assert_eq!(h.session.tick(), TickOutcome::Dispatched);
        assert!(h.session.wait_render_idle(test_timeout()));
    }

    let stats = h.session.status().render;
    assert_eq!(stats.frames_failed, 3);
    assert_eq!(stats.frames_rendered, 0);
    assert_eq!(h.session.frame_rate(), 0.0);
}

#[test]
fn test_frames_carry_window_and_state() {
    let recorder = RecordingRenderer::new();
    let mut h = SessionBuilder::new()
        .capacity(4)
        .max_fps(1)
        .renderer(recorder.boxed())
        .build();

    // Nothing buffered yet
    assert_eq!(h.session.tick(), TickOutcome::Dispatched);
    assert!(h.session.wait_render_idle(test_timeout()));

    h.session.start().unwrap();
    expect_within("push open", || h.push.is_open());
    h.push.push("[1, 2, 3, 4, 5, 6]");
    expect_within("samples", || h.session.buffer_len() == 4);

    // Wait out any frame the ticker started on its own
    assert!(h.session.wait_render_idle(test_timeout()));
    while h.session.tick() != TickOutcome::Dispatched {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(h.session.wait_render_idle(test_timeout()));

    let frames = recorder.frames();
    assert!(frames[0].values.is_empty());
    assert_eq!(frames[0].state, ConnectionState::Disconnected);

    let last = frames.last().unwrap();
    assert_eq!(last.values, vec![3.0, 4.0, 5.0, 6.0]);
    assert_eq!(last.state, ConnectionState::Streaming);

    let indices: Vec<u64> = frames.iter().map(|f| f.index).collect();
    let expected: Vec<u64> = (0..frames.len() as u64).collect();
    assert_eq!(indices, expected);
}

#[test]
fn test_pause_skips_without_dropping() {
    let h = SessionBuilder::new().build();

    h.session.pause();
    assert!(h.session.is_paused());
    assert_eq!(h.session.tick(), TickOutcome::Paused);
    assert_eq!(h.session.tick(), TickOutcome::Paused);

    h.session.resume();
    assert_eq!(h.session.tick(), TickOutcome::Dispatched);
    assert!(h.session.wait_render_idle(test_timeout()));

    let stats = h.session.status().render;
    assert_eq!(stats.frames_paused, 2);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.frames_rendered, 1);
}

#[test]
#[serial]
fn test_ticker_caps_frame_rate() {
    let recorder = RecordingRenderer::new();
    let (transport, _push) = PushTransport::new();
    let mut config = PipelineConfig::default();
    config.render.max_fps = 20;

    let mut session = StreamSession::builder(config)
        .transport(Box::new(transport))
        .renderer(recorder.boxed())
        .build()
        .unwrap();

    session.start().unwrap();
    std::thread::sleep(Duration::from_millis(1_000));
    let frame_rate = session.frame_rate();
    session.stop().unwrap();

    let rendered = recorder.frames().len();
    assert!(
        (8..=22).contains(&rendered),
        "expected about 20 frames, got {}",
        rendered
    );
    assert!(
        frame_rate > 5.0 && frame_rate <= 22.0,
        "frame rate {} outside cap",
        frame_rate
    );
}

#[test]
#[serial]
fn test_stop_halts_ticker() {
    let recorder = RecordingRenderer::new();
    let (transport, _push) = PushTransport::new();
    let mut config = PipelineConfig::default();
    config.render.max_fps = 100;

    let mut session = StreamSession::builder(config)
        .transport(Box::new(transport))
        .renderer(recorder.boxed())
        .build()
        .unwrap();

    session.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    session.stop().unwrap();
    assert!(session.wait_render_idle(test_timeout()));

    let after_stop = recorder.frames().len();
    assert!(after_stop > 0);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(recorder.frames().len(), after_stop);
}
