//! Crossfade scheduler behavior over a paused clock
//!
//! Every test drives a `CrossfadeScheduler` with the simulated backend and
//! steps the tokio clock deadline by deadline (see `helpers::harness`).

mod helpers;

use dartloop_ap::config::{CrossfadeSettings, MAX_FADE};
use dartloop_ap::playback::{MetadataMode, SimulatedBackend, SourceId, StartOutcome};
use dartloop_common::events::{LooperEvent, PlaybackPhase, TransitionKind};
use helpers::harness::{secs, Harness, INTRO, LOOP};
use tokio::time::Instant;

/// Harness whose backend only knows `source`
fn only_source(source: &str, length: f64) -> Harness {
    let backend = SimulatedBackend::new();
    backend.add_source(source, secs(length), MetadataMode::Immediate);
    Harness::with_backend(backend, CrossfadeSettings::default())
}

fn phase_changes(events: &[LooperEvent]) -> Vec<(PlaybackPhase, PlaybackPhase)> {
    events
        .iter()
        .filter_map(|e| match e {
            LooperEvent::PhaseChanged {
                old_phase,
                new_phase,
                ..
            } => Some((*old_phase, *new_phase)),
            _ => None,
        })
        .collect()
}

// ========================================
// Intro to loop
// ========================================

#[tokio::test(start_paused = true)]
async fn test_intro_crossfade_fires_fade_before_intro_end() {
    let mut h = Harness::immediate(30.0, 60.0);

    let outcome = h.start(10.0);
    assert!(matches!(outcome, StartOutcome::Started { .. }));
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingIntro);
    assert_eq!(h.intro_volume(), Some(1.0));
    assert_eq!(h.loop_volume(), Some(0.0));

    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.kind, TransitionKind::IntroToLoop);
    assert_eq!(transition.relative_delay(), secs(20.0));

    h.run_until(secs(19.9)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingIntro);

    h.run_until(secs(20.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);
    assert!(h.scheduler.active_loop_channel().unwrap().is_playing());

    h.run_until(secs(25.0)).await;
    assert!((h.intro_volume().unwrap() - 0.5).abs() < 1e-5);
    assert!((h.loop_volume().unwrap() - 0.5).abs() < 1e-5);

    h.run_until(secs(30.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.intro_volume(), Some(0.0));
    assert_eq!(h.loop_volume(), Some(1.0));
    assert!(!h.scheduler.intro_channel().unwrap().is_playing());

    let next = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(next.kind, TransitionKind::LoopToLoop);
    assert_eq!(next.fire_at, h.origin + secs(70.0));

    assert_eq!(
        phase_changes(&h.drain_events()),
        vec![
            (PlaybackPhase::Idle, PlaybackPhase::PlayingIntro),
            (PlaybackPhase::PlayingIntro, PlaybackPhase::CrossfadingToLoop),
            (PlaybackPhase::CrossfadingToLoop, PlaybackPhase::PlayingLoop),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ramps_are_monotonic_with_twenty_steps() {
    let mut h = Harness::immediate(30.0, 60.0);
    h.start(10.0);
    let intro_id = h.scheduler.intro_channel().unwrap().id();
    let loop_id = h.scheduler.active_loop_channel().unwrap().id();

    h.run_until(secs(31.0)).await;

    let writes = h.backend.gain_writes();
    let intro: Vec<f32> = writes
        .iter()
        .filter(|w| w.channel == intro_id && w.at >= h.origin + secs(20.0))
        .map(|w| w.gain)
        .collect();
    let looped: Vec<f32> = writes
        .iter()
        .filter(|w| w.channel == loop_id && w.at > h.origin + secs(20.0))
        .map(|w| w.gain)
        .collect();

    assert_eq!(intro.len(), 20);
    assert_eq!(looped.len(), 20);
    assert!(intro.windows(2).all(|w| w[1] <= w[0]));
    assert!(looped.windows(2).all(|w| w[1] >= w[0]));
    assert!(intro.iter().chain(looped.iter()).all(|g| (0.0..=1.0).contains(g)));
    assert_eq!(intro.last(), Some(&0.0));
    assert_eq!(looped.last(), Some(&1.0));

    // Steps land every fade/20 seconds after the transition
    let times: Vec<_> = writes
        .iter()
        .filter(|w| w.channel == intro_id && w.at >= h.origin + secs(20.0))
        .map(|w| w.at - h.origin)
        .collect();
    assert_eq!(times.first(), Some(&secs(20.5)));
    assert_eq!(times.last(), Some(&secs(30.0)));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_fade_switches_instantly() {
    let mut h = Harness::immediate(30.0, 60.0);
    h.start(-3.0);

    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.relative_delay(), secs(30.0));

    h.run_until(secs(30.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.intro_volume(), Some(0.0));
    assert_eq!(h.loop_volume(), Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn test_fade_longer_than_tracks_fires_immediately() {
    let mut h = Harness::immediate(5.0, 5.0);
    h.start(10.0);

    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.relative_delay(), secs(0.0));

    h.run_until(secs(0.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);

    let mut t = 0.0;
    while t <= 40.0 {
        h.run_until(secs(t)).await;
        assert!(h.scheduler.live_loop_channels() <= 2, "too many loops at {}s", t);
        assert!(h.backend.live_voices_for(&SourceId::new(LOOP)) <= 2);
        t += 0.25;
    }

    // One loop spawn per completed crossfade
    assert_eq!(h.scheduler.loop_spawns(), 4);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, LooperEvent::TransitionDeferred { kind: TransitionKind::LoopToLoop, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_huge_fade_is_capped_not_fatal() {
    let mut h = Harness::immediate(30.0, 20.0);
    assert!(matches!(h.start(1e20), StartOutcome::Started { .. }));

    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.relative_delay(), secs(0.0));

    h.run_until(secs(60.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);
    // First of 20 steps lands a twentieth of the capped fade in
    assert_eq!(h.intro_volume(), Some(1.0));
    assert!(h.scheduler.pending_timers() > 0);

    h.run_until(MAX_FADE / 20).await;
    assert!((h.intro_volume().unwrap() - 0.95).abs() < 1e-5);

    h.scheduler.stop();
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert_eq!(h.backend.live_voices(), 0);
}

// ========================================
// Loop chaining
// ========================================

#[tokio::test(start_paused = true)]
async fn test_loop_chain_spawns_on_schedule() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(5.0);

    h.run_until(secs(25.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);

    h.run_until(secs(39.9)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.scheduler.loop_spawns(), 0);

    for n in 1..=5u64 {
        h.run_until(secs(25.0 + 15.0 * n as f64 + 0.1)).await;
        assert_eq!(h.scheduler.loop_spawns(), n);
        assert!(h.scheduler.is_crossfading());
        assert_eq!(h.scheduler.live_loop_channels(), 2);

        // Outgoing instance is released once its fade-out completes
        h.run_until(secs(25.0 + 15.0 * n as f64 + 5.1)).await;
        assert_eq!(h.scheduler.live_loop_channels(), 1);
        assert_eq!(h.backend.live_voices_for(&SourceId::new(LOOP)), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_loop_chain_never_exceeds_two_instances() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(5.0);

    let mut t = 0.0;
    while t <= 200.0 {
        h.run_until(secs(t)).await;
        assert!(h.scheduler.live_loop_channels() <= 2);
        assert!(h.backend.live_voices_for(&SourceId::new(LOOP)) <= 2);
        // At most one transition pending at any time
        assert!(h.scheduler.pending_timers() <= 3);
        t += 0.5;
    }
    assert_eq!(h.scheduler.loop_spawns(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_loop_crossfade_colliding_with_intro_crossfade_is_deferred() {
    // LoopToLoop for the first loop is due at 20 + 20 - 10 = 30, the instant the
    // intro crossfade completes
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);

    h.run_until(secs(30.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.scheduler.loop_spawns(), 1);
    assert!(h.scheduler.live_loop_channels() <= 2);
}

// ========================================
// Stop
// ========================================

#[tokio::test(start_paused = true)]
async fn test_stop_before_transition_cancels_everything() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);
    h.run_until(secs(5.0)).await;

    let report = h.scheduler.stop();
    assert_eq!(report.previous_phase, PlaybackPhase::PlayingIntro);
    assert_eq!(report.timers_cancelled, 1);
    assert_eq!(report.channels_released, 2);
    assert_eq!(h.scheduler.phase(), PlaybackPhase::Stopped);
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert!(h.scheduler.scheduled_transition().is_none());
    assert_eq!(h.backend.live_voices(), 0);

    let opened = h.backend.opened_count();
    h.run_until(secs(60.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::Stopped);
    assert_eq!(h.backend.opened_count(), opened);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_crossfade_leaves_no_residual_writes() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);
    h.run_until(secs(22.0)).await;
    assert!(h.scheduler.is_crossfading());

    let intro_id = h.scheduler.intro_channel().unwrap().id();
    let report = h.scheduler.stop();
    // Two ramp steps and the next LoopToLoop
    assert_eq!(report.timers_cancelled, 3);
    assert_eq!(report.channels_released, 2);

    let voice = h.backend.voice(intro_id).unwrap();
    assert!(voice.released);
    assert!(!voice.playing);
    assert_eq!(voice.position, secs(0.0));

    let writes = h.backend.gain_write_count();
    h.run_until(secs(120.0)).await;
    assert_eq!(h.backend.gain_write_count(), writes);
    assert_eq!(h.scheduler.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);
    h.run_until(secs(3.0)).await;

    let first = h.scheduler.stop();
    let generation = h.scheduler.generation();
    let second = h.scheduler.stop();

    assert_eq!(first.channels_released, 2);
    assert_eq!(second.previous_phase, PlaybackPhase::Stopped);
    assert_eq!(second.timers_cancelled, 0);
    assert_eq!(second.channels_released, 0);
    assert!(h.scheduler.generation() > generation);

    let stops = h
        .drain_events()
        .iter()
        .filter(|e| matches!(e, LooperEvent::Stopped { .. }))
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_idle_enters_stopped() {
    let mut h = Harness::immediate(30.0, 20.0);
    let report = h.scheduler.stop();
    assert_eq!(report.previous_phase, PlaybackPhase::Idle);
    assert_eq!(report.channels_released, 0);
    assert_eq!(h.scheduler.phase(), PlaybackPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_runs_fresh_session() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);
    h.run_until(secs(22.0)).await;
    h.scheduler.stop();
    let old_generation = h.scheduler.generation();

    let outcome = h.start(10.0);
    match outcome {
        StartOutcome::Started { generation, .. } => assert!(generation > old_generation),
        other => panic!("expected a new session, got {:?}", other),
    }
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingIntro);
    assert_eq!(h.backend.live_voices(), 2);
    assert_eq!(h.scheduler.loop_spawns(), 0);

    h.run_until(secs(20.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);
}

// ========================================
// Start while active
// ========================================

#[tokio::test(start_paused = true)]
async fn test_start_while_active_keeps_session() {
    let mut h = Harness::immediate(30.0, 20.0);
    let first = h.start(10.0);
    let generation = h.scheduler.generation();

    let again = h.scheduler.start(
        SourceId::new(INTRO),
        SourceId::new(LOOP),
        10.0,
        tokio::time::Instant::now(),
    );

    assert!(matches!(first, StartOutcome::Started { .. }));
    assert_eq!(again, StartOutcome::AlreadyActive { retried: 0 });
    assert_eq!(h.scheduler.generation(), generation);
    assert_eq!(h.backend.opened_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_playback_is_retried_by_start() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.backend.set_autoplay_blocked(true);

    h.start(10.0);
    let intro = h.scheduler.intro_channel().unwrap();
    assert!(intro.is_blocked());
    assert!(!intro.is_playing());
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingIntro);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, LooperEvent::PlaybackBlocked { .. })));

    h.backend.set_autoplay_blocked(false);
    let outcome = h.scheduler.start(
        SourceId::new(INTRO),
        SourceId::new(LOOP),
        10.0,
        tokio::time::Instant::now(),
    );
    assert_eq!(outcome, StartOutcome::AlreadyActive { retried: 1 });

    let intro = h.scheduler.intro_channel().unwrap();
    assert!(!intro.is_blocked());
    assert!(intro.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_retried_intro_moves_its_crossfade() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.backend.set_autoplay_blocked(true);
    h.start(10.0);
    assert_eq!(
        h.scheduler.scheduled_transition().unwrap().fire_at,
        h.origin + secs(20.0)
    );

    h.run_until(secs(15.0)).await;
    assert_eq!(h.scheduler.intro_channel().unwrap().position(), secs(0.0));

    h.backend.set_autoplay_blocked(false);
    let outcome = h.scheduler.start(
        SourceId::new(INTRO),
        SourceId::new(LOOP),
        10.0,
        Instant::now(),
    );
    assert_eq!(outcome, StartOutcome::AlreadyActive { retried: 1 });

    // Full intro from t=15, crossfade over its last 10s
    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.kind, TransitionKind::IntroToLoop);
    assert_eq!(transition.fire_at, h.origin + secs(35.0));
    assert_eq!(h.scheduler.pending_timers(), 1);

    h.run_until(secs(34.9)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingIntro);
    assert_eq!(h.intro_volume(), Some(1.0));

    h.run_until(secs(35.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);

    h.run_until(secs(45.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.loop_volume(), Some(1.0));
}

// ========================================
// Unavailable sources
// ========================================

#[tokio::test(start_paused = true)]
async fn test_missing_intro_goes_straight_to_loop() {
    let mut h = only_source(LOOP, 20.0);
    assert!(matches!(h.start(10.0), StartOutcome::Started { .. }));
    assert!(h.scheduler.intro_channel().is_none());

    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.kind, TransitionKind::IntroToLoop);
    assert_eq!(transition.relative_delay(), secs(0.0));

    h.run_until(secs(0.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);
    assert!(h.scheduler.active_loop_channel().unwrap().is_playing());

    h.run_until(secs(5.0)).await;
    assert!((h.loop_volume().unwrap() - 0.5).abs() < 1e-5);

    h.run_until(secs(10.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.scheduler.loop_spawns(), 1);

    assert_eq!(
        phase_changes(&h.drain_events()),
        vec![
            (PlaybackPhase::Idle, PlaybackPhase::PlayingIntro),
            (PlaybackPhase::PlayingIntro, PlaybackPhase::CrossfadingToLoop),
            (PlaybackPhase::CrossfadingToLoop, PlaybackPhase::PlayingLoop),
        ]
    );

    h.scheduler.stop();
    assert_eq!(h.scheduler.phase(), PlaybackPhase::Stopped);
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert_eq!(h.backend.live_voices(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_loop_fades_intro_out_alone() {
    let mut h = only_source(INTRO, 30.0);
    h.start(10.0);
    assert!(h.scheduler.active_loop_channel().is_none());

    h.run_until(secs(20.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);
    assert!(h.scheduler.scheduled_transition().is_none());

    h.run_until(secs(30.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.intro_volume(), Some(0.0));
    assert!(!h.scheduler.intro_channel().unwrap().is_playing());
    assert_eq!(h.scheduler.live_loop_channels(), 0);
    assert_eq!(h.scheduler.pending_timers(), 0);

    h.run_until(secs(120.0)).await;
    assert_eq!(h.scheduler.loop_spawns(), 0);

    let report = h.scheduler.stop();
    assert_eq!(report.timers_cancelled, 0);
    assert_eq!(report.channels_released, 1);
    assert_eq!(h.scheduler.phase(), PlaybackPhase::Stopped);
    assert_eq!(h.backend.live_voices(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_loop_spawn_ends_chain() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);
    h.run_until(secs(25.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);

    h.backend.remove_source(&SourceId::new(LOOP));
    h.run_until(secs(60.0)).await;

    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingLoop);
    assert_eq!(h.scheduler.loop_spawns(), 0);
    assert!(h.scheduler.scheduled_transition().is_none());
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert_eq!(h.scheduler.live_loop_channels(), 1);
    assert_eq!(h.loop_volume(), Some(1.0));

    let report = h.scheduler.stop();
    assert_eq!(report.channels_released, 2);
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert_eq!(h.backend.live_voices(), 0);
}

// ========================================
// Metadata
// ========================================

#[tokio::test(start_paused = true)]
async fn test_late_metadata_keeps_original_schedule() {
    let mut h = Harness::new(
        secs(30.0),
        MetadataMode::Manual,
        secs(20.0),
        MetadataMode::Immediate,
    );
    h.start(10.0);
    assert!(h.scheduler.scheduled_transition().is_none());
    assert_eq!(
        h.scheduler.snapshot().awaiting_metadata,
        Some(TransitionKind::IntroToLoop)
    );

    h.run_until(secs(5.0)).await;
    h.backend.finish_loading(&SourceId::new(INTRO));
    h.pump();

    let transition = *h.scheduler.scheduled_transition().unwrap();
    assert_eq!(transition.fire_at, h.origin + secs(20.0));
    assert_eq!(transition.relative_delay(), secs(15.0));

    h.run_until(secs(20.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::CrossfadingToLoop);
}

#[tokio::test(start_paused = true)]
async fn test_missing_metadata_never_transitions() {
    let mut h = Harness::new(
        secs(30.0),
        MetadataMode::Never,
        secs(20.0),
        MetadataMode::Immediate,
    );
    h.start(10.0);
    h.backend.fail_loading(&SourceId::new(INTRO), "truncated header");

    h.run_until(secs(120.0)).await;
    assert_eq!(h.scheduler.phase(), PlaybackPhase::PlayingIntro);
    assert!(h.scheduler.scheduled_transition().is_none());
    assert_eq!(h.scheduler.pending_timers(), 0);

    let report = h.scheduler.stop();
    assert_eq!(report.channels_released, 2);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_after_stop_is_ignored() {
    let mut h = Harness::new(
        secs(30.0),
        MetadataMode::Manual,
        secs(20.0),
        MetadataMode::Immediate,
    );
    h.start(10.0);
    h.scheduler.stop();

    h.backend.finish_loading(&SourceId::new(INTRO));
    h.pump();
    assert!(h.scheduler.scheduled_transition().is_none());
    assert_eq!(h.scheduler.pending_timers(), 0);
}

// ========================================
// Output gain
// ========================================

#[tokio::test(start_paused = true)]
async fn test_mute_overrides_gain_without_touching_ramps() {
    let mut h = Harness::immediate(30.0, 20.0);
    h.start(10.0);
    h.run_until(secs(22.0)).await;
    let intro_id = h.scheduler.intro_channel().unwrap().id();
    let loop_id = h.scheduler.active_loop_channel().unwrap().id();
    assert!((h.intro_volume().unwrap() - 0.8).abs() < 1e-5);

    h.scheduler.set_muted(true);
    assert_eq!(h.backend.voice(intro_id).unwrap().gain, 0.0);
    assert_eq!(h.backend.voice(loop_id).unwrap().gain, 0.0);

    h.run_until(secs(24.0)).await;
    assert!((h.intro_volume().unwrap() - 0.6).abs() < 1e-5);
    assert_eq!(h.backend.voice(intro_id).unwrap().gain, 0.0);

    // Instances spawned while muted start silent too
    h.run_until(secs(31.0)).await;
    let pending = h.scheduler.pending_loop_channel().unwrap();
    assert!(pending.volume() > 0.0);
    assert_eq!(h.backend.voice(pending.id()).unwrap().gain, 0.0);

    h.scheduler.set_muted(false);
    h.scheduler.set_master_volume(0.5);
    let pending = h.scheduler.pending_loop_channel().unwrap();
    let expected = pending.volume() * 0.5;
    assert!((h.backend.voice(pending.id()).unwrap().gain - expected).abs() < 1e-5);
    assert!((pending.effective_gain() - expected).abs() < 1e-5);
}
