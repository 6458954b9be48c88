//! Crossfade scheduler
//!
//! Plays an intro track once, crossfades into a loop track near the end of
//! the intro, then keeps crossfading into freshly spawned loop instances
//! before each loop boundary, indefinitely, until stopped.
//!
//! # State machine
//!
//! ```text
//! Idle ──start──> PlayingIntro ──IntroToLoop──> CrossfadingToLoop ──ramps done──> PlayingLoop
//!                                                                                   │    ▲
//!                                                                                   └────┘ LoopToLoop
//! any ──stop──> Stopped ──start──> PlayingIntro
//! ```
//!
//! The scheduler is a plain state machine: callers hand it the current
//! `Instant` and ask for the next deadline. `SchedulerService` drives it
//! from a tokio task. All timers (transitions and ramp steps) live in one
//! `TimerQueue`, and every entry carries the session generation it was
//! armed in, so anything left over from a stopped session is dropped on pop.

use crate::config::{fade_duration, CrossfadeSettings};
use crate::playback::backend::{AudioBackend, ChannelEvent, ChannelEventSender, ChannelId, SourceId};
use crate::playback::channel::{AudioChannel, ChannelRole, ChannelSnapshot, OutputGain, PlaybackStart};
use crate::playback::ramp::{FadeRamp, RampId, RampStep};
use crate::playback::timers::{TimerHandle, TimerKind, TimerQueue};
use dartloop_common::events::{EventBus, LooperEvent, PlaybackPhase, TransitionKind};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Shortest gap between loop spawns (zero-length tracks with no fade)
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(50);

/// Result of a `start` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session began
    Started { session_id: Uuid, generation: u64 },
    /// A session is already running; blocked channels were retried
    AlreadyActive { retried: usize },
}

/// Result of a `stop` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub previous_phase: PlaybackPhase,
    pub timers_cancelled: usize,
    pub channels_released: usize,
}

/// An armed IntroToLoop or LoopToLoop timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTransition {
    pub kind: TransitionKind,
    pub armed_at: Instant,
    pub fire_at: Instant,
    pub handle: TimerHandle,
}

impl ScheduledTransition {
    /// Delay between arming and firing
    pub fn relative_delay(&self) -> Duration {
        self.fire_at.saturating_duration_since(self.armed_at)
    }
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub phase: PlaybackPhase,
    pub generation: u64,
    pub session_id: Option<Uuid>,
    pub pending_timers: usize,
    pub scheduled_transition: Option<TransitionKind>,
    pub awaiting_metadata: Option<TransitionKind>,
    pub crossfading: bool,
    pub loop_spawns: u64,
    pub live_loop_channels: usize,
    pub muted: bool,
    pub master_volume: f32,
    pub intro: Option<ChannelSnapshot>,
    pub active_loop: Option<ChannelSnapshot>,
    pub pending_loop: Option<ChannelSnapshot>,
}

struct Session {
    id: Uuid,
    loop_source: SourceId,
    fade: Duration,
}

struct ActiveRamp {
    ramp: FadeRamp,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct DeferredArm {
    kind: TransitionKind,
    channel: ChannelId,
}

struct ActiveCrossfade {
    kind: TransitionKind,
    outgoing: Option<ChannelId>,
    ramps: Vec<RampId>,
}

/// Intro → loop → loop … playback scheduler
pub struct CrossfadeScheduler<B: AudioBackend> {
    backend: B,
    settings: CrossfadeSettings,
    events: EventBus,
    channel_events: ChannelEventSender,

    phase: PlaybackPhase,
    session: Option<Session>,
    /// Bumped on every start and stop
    generation: u64,

    intro: Option<AudioChannel>,
    active_loop: Option<AudioChannel>,
    /// Incoming instance during a loop-to-loop crossfade
    pending_loop: Option<AudioChannel>,

    ramps: HashMap<RampId, ActiveRamp>,
    timers: TimerQueue,
    transition: Option<ScheduledTransition>,
    awaiting_metadata: Option<DeferredArm>,
    /// LoopToLoop fired while a crossfade was still running
    deferred_loop_transition: bool,
    crossfade: Option<ActiveCrossfade>,

    output: OutputGain,
    next_channel: u64,
    next_ramp: u64,
    loop_spawns: u64,
}

impl<B: AudioBackend> CrossfadeScheduler<B> {
    pub fn new(
        backend: B,
        settings: CrossfadeSettings,
        events: EventBus,
        channel_events: ChannelEventSender,
    ) -> Self {
        Self {
            backend,
            settings,
            events,
            channel_events,
            phase: PlaybackPhase::Idle,
            session: None,
            generation: 0,
            intro: None,
            active_loop: None,
            pending_loop: None,
            ramps: HashMap::new(),
            timers: TimerQueue::new(),
            transition: None,
            awaiting_metadata: None,
            deferred_loop_transition: false,
            crossfade: None,
            output: OutputGain::default(),
            next_channel: 1,
            next_ramp: 1,
            loop_spawns: 0,
        }
    }

    // ========================================
    // Control
    // ========================================

    /// Start a session: play the intro, then chain the loop track
    ///
    /// While a session is active this does not restart anything; it only
    /// retries channels whose last play attempt was refused.
    pub fn start(
        &mut self,
        intro: SourceId,
        loop_source: SourceId,
        fade_seconds: f64,
        now: Instant,
    ) -> StartOutcome {
        if self.phase.is_active() {
            let retried = self.retry_blocked(now);
            debug!(
                "start() ignored in phase {} (retried {} blocked channel(s))",
                self.phase, retried
            );
            return StartOutcome::AlreadyActive { retried };
        }

        let fade = fade_duration(fade_seconds);
        self.generation += 1;
        self.loop_spawns = 0;
        let session_id = Uuid::new_v4();
        self.session = Some(Session {
            id: session_id,
            loop_source: loop_source.clone(),
            fade,
        });

        info!(
            "Starting session {}: intro '{}', loop '{}', fade {:.2}s",
            session_id,
            intro,
            loop_source,
            fade.as_secs_f64()
        );
        self.events.emit_lossy(LooperEvent::SessionStarted {
            session_id,
            intro: intro.to_string(),
            loop_source: loop_source.to_string(),
            fade_seconds: fade.as_secs_f64(),
            timestamp: chrono::Utc::now(),
        });

        self.intro = self.open_channel(&intro, ChannelRole::Intro);
        self.active_loop = self.open_channel(&loop_source, ChannelRole::Loop);

        if let Some(loop_channel) = self.active_loop.as_mut() {
            loop_channel.set_volume(0.0);
        }

        let intro_start = self.intro.as_mut().map(|channel| {
            channel.set_volume(1.0);
            (channel.source().clone(), channel.play())
        });
        if let Some((source, outcome)) = intro_start {
            self.report_start(&source, outcome);
        }

        self.set_phase(PlaybackPhase::PlayingIntro);

        match self.intro.as_ref().map(AudioChannel::id) {
            Some(intro_id) => self.arm_transition(TransitionKind::IntroToLoop, intro_id, None, now),
            None => {
                warn!("Intro unavailable, moving straight to the loop track");
                self.arm_transition_at(TransitionKind::IntroToLoop, now, now);
            }
        }

        StartOutcome::Started {
            session_id,
            generation: self.generation,
        }
    }

    /// Cancel every timer and silence, rewind and release every channel
    ///
    /// Safe to call in any phase; a second call is a no-op.
    pub fn stop(&mut self) -> StopReport {
        let previous_phase = self.phase;
        let timers_cancelled = self.timers.cancel_all();

        self.ramps.clear();
        self.transition = None;
        self.awaiting_metadata = None;
        self.deferred_loop_transition = false;
        self.crossfade = None;

        let channels = [
            self.intro.take(),
            self.active_loop.take(),
            self.pending_loop.take(),
        ];
        let mut channels_released = 0;
        for mut channel in channels.into_iter().flatten() {
            channel.reset();
            channel.release();
            channels_released += 1;
        }

        // Invalidate anything armed in the old session
        self.generation += 1;

        if previous_phase != PlaybackPhase::Stopped {
            let session_id = self.session.as_ref().map(|s| s.id);
            self.set_phase(PlaybackPhase::Stopped);
            info!(
                "Stopped: {} timer(s) cancelled, {} channel(s) released",
                timers_cancelled, channels_released
            );
            self.events.emit_lossy(LooperEvent::Stopped {
                session_id,
                timers_cancelled,
                channels_released,
                timestamp: chrono::Utc::now(),
            });
        }
        self.session = None;

        StopReport {
            previous_phase,
            timers_cancelled,
            channels_released,
        }
    }

    /// Mute or unmute every channel (ramps keep running)
    pub fn set_muted(&mut self, muted: bool) {
        if self.output.muted == muted {
            return;
        }
        self.output.muted = muted;
        self.apply_output_gain();
    }

    /// Set the master volume multiplier (clamped to 0.0-1.0)
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        if self.output.master_volume == volume {
            return;
        }
        self.output.master_volume = volume;
        self.apply_output_gain();
    }

    // ========================================
    // Event inputs
    // ========================================

    /// Handle a metadata notification from the backend
    pub fn on_channel_event(&mut self, event: ChannelEvent, now: Instant) {
        if self.channel(event.channel()).is_none() {
            trace!("Ignoring event for released channel {}", event.channel());
            return;
        }
        match event {
            ChannelEvent::MetadataLoaded { channel, duration } => {
                debug!("Metadata for {}: {:.3}s", channel, duration.as_secs_f64());
                match self.awaiting_metadata {
                    Some(deferred) if deferred.channel == channel => {
                        self.awaiting_metadata = None;
                        self.arm_transition(deferred.kind, channel, Some(duration), now);
                    }
                    _ => trace!("No transition waiting on {}", channel),
                }
            }
            ChannelEvent::MetadataFailed { channel, reason } => {
                warn!(
                    "Metadata for {} failed ({}); its crossfade will not be scheduled",
                    channel, reason
                );
            }
        }
    }

    /// Fire every timer due at `now`; returns how many took effect
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due(now) {
            if timer.generation != self.generation {
                trace!("Dropping stale timer {:?}", timer.kind);
                continue;
            }
            fired += 1;
            match timer.kind {
                TimerKind::Transition(kind) => {
                    if self.transition.map(|t| t.handle) == Some(timer.handle) {
                        self.transition = None;
                    }
                    self.on_transition(kind, timer.due);
                }
                TimerKind::RampStep(ramp) => self.on_ramp_step(ramp, timer.due),
            }
        }
        fired
    }

    /// Earliest pending timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_due()
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn settings(&self) -> CrossfadeSettings {
        self.settings
    }

    pub fn output_gain(&self) -> OutputGain {
        self.output
    }

    /// Outstanding timers (ramp steps and transitions)
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn scheduled_transition(&self) -> Option<&ScheduledTransition> {
        self.transition.as_ref()
    }

    pub fn is_crossfading(&self) -> bool {
        self.crossfade.is_some()
    }

    /// Loop instances spawned by LoopToLoop transitions this session
    pub fn loop_spawns(&self) -> u64 {
        self.loop_spawns
    }

    pub fn live_loop_channels(&self) -> usize {
        usize::from(self.active_loop.is_some()) + usize::from(self.pending_loop.is_some())
    }

    pub fn intro_channel(&self) -> Option<&AudioChannel> {
        self.intro.as_ref()
    }

    pub fn active_loop_channel(&self) -> Option<&AudioChannel> {
        self.active_loop.as_ref()
    }

    pub fn pending_loop_channel(&self) -> Option<&AudioChannel> {
        self.pending_loop.as_ref()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            phase: self.phase,
            generation: self.generation,
            session_id: self.session.as_ref().map(|s| s.id),
            pending_timers: self.timers.len(),
            scheduled_transition: self.transition.map(|t| t.kind),
            awaiting_metadata: self.awaiting_metadata.map(|d| d.kind),
            crossfading: self.crossfade.is_some(),
            loop_spawns: self.loop_spawns,
            live_loop_channels: self.live_loop_channels(),
            muted: self.output.muted,
            master_volume: self.output.master_volume,
            intro: self.intro.as_ref().map(AudioChannel::snapshot),
            active_loop: self.active_loop.as_ref().map(AudioChannel::snapshot),
            pending_loop: self.pending_loop.as_ref().map(AudioChannel::snapshot),
        }
    }

    // ========================================
    // Transitions
    // ========================================

    fn on_transition(&mut self, kind: TransitionKind, at: Instant) {
        debug!("Transition {} fired", kind);
        match kind {
            TransitionKind::IntroToLoop => self.begin_intro_crossfade(at),
            TransitionKind::LoopToLoop => self.begin_loop_crossfade(at),
        }
    }

    fn begin_intro_crossfade(&mut self, at: Instant) {
        if self.phase != PlaybackPhase::PlayingIntro {
            debug!("IntroToLoop ignored in phase {}", self.phase);
            return;
        }

        let loop_start = self.active_loop.as_mut().map(|channel| {
            channel.seek(Duration::ZERO);
            channel.set_volume(0.0);
            (channel.id(), channel.source().clone(), channel.play())
        });

        let mut ramps = Vec::with_capacity(2);
        let intro = self.intro.as_ref().map(|c| (c.id(), c.volume()));
        if let Some((intro_id, volume)) = intro {
            ramps.push(self.start_ramp(intro_id, volume, 0.0, at));
        }

        let loop_id = match loop_start {
            Some((loop_id, source, outcome)) => {
                self.report_start(&source, outcome);
                ramps.push(self.start_ramp(loop_id, 0.0, 1.0, at));
                Some(loop_id)
            }
            None => {
                warn!("Loop track unavailable; intro fades out without a successor");
                None
            }
        };

        self.begin_crossfade(TransitionKind::IntroToLoop, intro.map(|(id, _)| id), ramps);
        self.set_phase(PlaybackPhase::CrossfadingToLoop);

        if let Some(loop_id) = loop_id {
            self.arm_transition(TransitionKind::LoopToLoop, loop_id, None, at);
        }
        self.finish_crossfade_if_done(at);
    }

    fn begin_loop_crossfade(&mut self, at: Instant) {
        if !matches!(
            self.phase,
            PlaybackPhase::CrossfadingToLoop | PlaybackPhase::PlayingLoop
        ) {
            debug!("LoopToLoop ignored in phase {}", self.phase);
            return;
        }

        // Never more than two loop instances alive at once
        if self.crossfade.is_some() {
            debug!("LoopToLoop deferred until the running crossfade completes");
            self.deferred_loop_transition = true;
            self.emit_deferred(TransitionKind::LoopToLoop, "previous crossfade still running");
            return;
        }

        let Some(loop_source) = self.session.as_ref().map(|s| s.loop_source.clone()) else {
            return;
        };
        let Some(mut incoming) = self.open_channel(&loop_source, ChannelRole::Loop) else {
            warn!("Could not spawn loop instance; loop chain ends here");
            return;
        };

        incoming.set_volume(0.0);
        let outcome = incoming.play();
        let incoming_id = incoming.id();
        self.report_start(&loop_source, outcome);

        self.loop_spawns += 1;
        debug!("Spawned loop instance #{} as {}", self.loop_spawns, incoming_id);
        self.events.emit_lossy(LooperEvent::LoopSpawned {
            session_id: self.session_id(),
            iteration: self.loop_spawns,
            timestamp: chrono::Utc::now(),
        });

        let outgoing = self.active_loop.as_ref().map(|c| (c.id(), c.volume()));
        let mut ramps = Vec::with_capacity(2);
        if let Some((outgoing_id, volume)) = outgoing {
            ramps.push(self.start_ramp(outgoing_id, volume, 0.0, at));
        }
        self.pending_loop = Some(incoming);
        ramps.push(self.start_ramp(incoming_id, 0.0, 1.0, at));

        self.begin_crossfade(
            TransitionKind::LoopToLoop,
            outgoing.map(|(id, _)| id),
            ramps,
        );
        self.arm_transition(TransitionKind::LoopToLoop, incoming_id, None, at);
        self.finish_crossfade_if_done(at);
    }

    fn begin_crossfade(
        &mut self,
        kind: TransitionKind,
        outgoing: Option<ChannelId>,
        ramps: Vec<RampId>,
    ) {
        let fade = self.session_fade();
        debug!("Crossfade {} over {:.2}s ({} ramp(s))", kind, fade.as_secs_f64(), ramps.len());
        self.crossfade = Some(ActiveCrossfade {
            kind,
            outgoing,
            ramps,
        });
        self.events.emit_lossy(LooperEvent::CrossfadeStarted {
            session_id: self.session_id(),
            kind,
            fade_seconds: fade.as_secs_f64(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn finish_crossfade_if_done(&mut self, at: Instant) {
        let done = self
            .crossfade
            .as_ref()
            .is_some_and(|cf| cf.ramps.is_empty());
        if done {
            self.finish_crossfade(at);
        }
    }

    fn finish_crossfade(&mut self, at: Instant) {
        let Some(crossfade) = self.crossfade.take() else {
            return;
        };

        if let Some(incoming) = self.pending_loop.take() {
            if let Some(outgoing) = self.active_loop.replace(incoming) {
                outgoing.release();
            }
        }

        debug!(
            "Crossfade {} complete (outgoing {:?})",
            crossfade.kind, crossfade.outgoing
        );
        self.events.emit_lossy(LooperEvent::CrossfadeCompleted {
            session_id: self.session_id(),
            kind: crossfade.kind,
            timestamp: chrono::Utc::now(),
        });

        if self.phase == PlaybackPhase::CrossfadingToLoop {
            self.set_phase(PlaybackPhase::PlayingLoop);
        }

        if self.deferred_loop_transition {
            self.deferred_loop_transition = false;
            self.begin_loop_crossfade(at);
        }
    }

    /// Arm `kind` relative to the end of `channel`, or wait for its metadata
    fn arm_transition(
        &mut self,
        kind: TransitionKind,
        channel_id: ChannelId,
        known_duration: Option<Duration>,
        now: Instant,
    ) {
        let fade = self.session_fade();
        let Some(channel) = self.channel(channel_id) else {
            return;
        };

        match channel.duration().or(known_duration) {
            Some(duration) => {
                let remaining = duration.saturating_sub(channel.position());
                let mut delay = remaining.saturating_sub(fade);
                if kind == TransitionKind::LoopToLoop {
                    delay = delay.max(MIN_LOOP_PERIOD);
                }
                match now.checked_add(delay) {
                    Some(fire_at) => self.arm_transition_at(kind, fire_at, now),
                    None => warn!("{} due beyond the clock range; not armed", kind),
                }
            }
            None => {
                debug!("{} deferred until {} reports its duration", kind, channel_id);
                self.awaiting_metadata = Some(DeferredArm {
                    kind,
                    channel: channel_id,
                });
                self.emit_deferred(kind, "duration unknown");
            }
        }
    }

    fn arm_transition_at(&mut self, kind: TransitionKind, fire_at: Instant, now: Instant) {
        if let Some(previous) = self.transition.take() {
            // Only one transition may be pending at a time
            self.timers.cancel(previous.handle);
        }

        let handle = self
            .timers
            .arm(fire_at, TimerKind::Transition(kind), self.generation);
        let transition = ScheduledTransition {
            kind,
            armed_at: now,
            fire_at,
            handle,
        };
        self.transition = Some(transition);

        let delay = transition.relative_delay();
        debug!("Armed {} in {:.3}s", kind, delay.as_secs_f64());
        self.events.emit_lossy(LooperEvent::TransitionArmed {
            session_id: self.session_id(),
            kind,
            fires_in_ms: delay.as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
    }

    // ========================================
    // Ramps
    // ========================================

    fn start_ramp(&mut self, channel: ChannelId, from: f32, to: f32, at: Instant) -> RampId {
        let id = RampId(self.next_ramp);
        self.next_ramp += 1;

        let ramp = FadeRamp::new(
            id,
            channel,
            from,
            to,
            self.session_fade(),
            self.settings.step_count,
            self.generation,
        );
        self.timers.arm(
            at + ramp.next_step_offset(),
            TimerKind::RampStep(id),
            self.generation,
        );
        trace!("Ramp {:?} on {}: {:.2} -> {:.2}", id, channel, from, to);
        self.ramps.insert(id, ActiveRamp { ramp, started_at: at });
        id
    }

    fn on_ramp_step(&mut self, id: RampId, at: Instant) {
        let Some(active) = self.ramps.get_mut(&id) else {
            trace!("Orphaned ramp step {:?}", id);
            return;
        };
        if active.ramp.generation() != self.generation {
            self.ramps.remove(&id);
            return;
        }

        let channel_id = active.ramp.channel();
        let fading_out = active.ramp.is_fade_out();
        let step = active.ramp.advance();
        let next_due = active.started_at + active.ramp.next_step_offset();

        let Some(channel) = self.channel_mut(channel_id) else {
            trace!("Ramp {:?} lost its channel {}", id, channel_id);
            self.ramps.remove(&id);
            self.ramp_done(id, at);
            return;
        };
        channel.set_volume(step.volume());
        trace!("Ramp {:?} on {} -> {:.3}", id, channel_id, step.volume());

        match step {
            RampStep::Continue(_) => {
                self.timers
                    .arm(next_due, TimerKind::RampStep(id), self.generation);
            }
            RampStep::Finished(volume) => {
                self.ramps.remove(&id);
                if fading_out && volume <= 0.0 {
                    self.retire_faded_channel(channel_id);
                }
                self.ramp_done(id, at);
            }
        }
    }

    /// A channel's fade-out reached silence
    fn retire_faded_channel(&mut self, channel_id: ChannelId) {
        if let Some(intro) = self.intro.as_mut().filter(|c| c.id() == channel_id) {
            intro.pause();
            debug!("Intro faded out");
            return;
        }

        // The outgoing loop instance is freed as soon as it is silent
        if self.pending_loop.is_some()
            && self.active_loop.as_ref().is_some_and(|c| c.id() == channel_id)
        {
            if let Some(outgoing) = self.active_loop.take() {
                outgoing.release();
            }
        }
    }

    fn ramp_done(&mut self, id: RampId, at: Instant) {
        let Some(crossfade) = self.crossfade.as_mut() else {
            return;
        };
        crossfade.ramps.retain(|r| *r != id);
        if crossfade.ramps.is_empty() {
            self.finish_crossfade(at);
        }
    }

    // ========================================
    // Channels
    // ========================================

    fn open_channel(&mut self, source: &SourceId, role: ChannelRole) -> Option<AudioChannel> {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;

        match AudioChannel::open(
            &mut self.backend,
            id,
            source,
            role,
            self.channel_events.clone(),
            self.output,
        ) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("Could not open {:?} source '{}': {}", role, source, e);
                None
            }
        }
    }

    fn channel(&self, id: ChannelId) -> Option<&AudioChannel> {
        [&self.intro, &self.active_loop, &self.pending_loop]
            .into_iter()
            .flatten()
            .find(|c| c.id() == id)
    }

    fn channel_mut(&mut self, id: ChannelId) -> Option<&mut AudioChannel> {
        [&mut self.intro, &mut self.active_loop, &mut self.pending_loop]
            .into_iter()
            .flatten()
            .find(|c| c.id() == id)
    }

    fn retry_blocked(&mut self, now: Instant) -> usize {
        let mut retried = 0;
        let mut intro_started = None;
        for channel in [&mut self.intro, &mut self.active_loop, &mut self.pending_loop]
            .into_iter()
            .flatten()
            .filter(|c| c.is_blocked())
        {
            retried += 1;
            if channel.play() == PlaybackStart::Started {
                info!("{:?} channel {} started after retry", channel.role(), channel.id());
                if channel.role() == ChannelRole::Intro {
                    intro_started = Some(channel.id());
                }
            }
        }

        // The intro only now began playing; its crossfade moves with it
        if let Some(intro_id) = intro_started {
            if self.phase == PlaybackPhase::PlayingIntro {
                self.arm_transition(TransitionKind::IntroToLoop, intro_id, None, now);
            }
        }
        retried
    }

    fn apply_output_gain(&mut self) {
        let output = self.output;
        for channel in [&mut self.intro, &mut self.active_loop, &mut self.pending_loop]
            .into_iter()
            .flatten()
        {
            channel.apply_output_gain(output);
        }
        info!(
            "Output gain: muted={} master={:.2}",
            output.muted, output.master_volume
        );
        self.events.emit_lossy(LooperEvent::OutputGainChanged {
            muted: output.muted,
            master_volume: output.master_volume,
            timestamp: chrono::Utc::now(),
        });
    }

    // ========================================
    // Helpers
    // ========================================

    fn report_start(&mut self, source: &SourceId, outcome: PlaybackStart) {
        if let PlaybackStart::Blocked(reason) = outcome {
            self.events.emit_lossy(LooperEvent::PlaybackBlocked {
                session_id: self.session_id(),
                source: source.to_string(),
                reason,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn emit_deferred(&self, kind: TransitionKind, reason: &str) {
        self.events.emit_lossy(LooperEvent::TransitionDeferred {
            session_id: self.session_id(),
            kind,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn set_phase(&mut self, phase: PlaybackPhase) {
        if self.phase == phase {
            return;
        }
        let old_phase = self.phase;
        self.phase = phase;
        info!("Phase {} -> {}", old_phase, phase);
        self.events.emit_lossy(LooperEvent::PhaseChanged {
            session_id: self.session_id(),
            old_phase,
            new_phase: phase,
            timestamp: chrono::Utc::now(),
        });
    }

    fn session_id(&self) -> Uuid {
        self.session.as_ref().map(|s| s.id).unwrap_or_else(Uuid::nil)
    }

    fn session_fade(&self) -> Duration {
        self.session
            .as_ref()
            .map(|s| s.fade)
            .unwrap_or(self.settings.fade)
    }
}
