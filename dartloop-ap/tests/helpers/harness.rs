//! Paused-clock scheduler harness
//!
//! Owns a scheduler over a [`SimulatedBackend`] and steps the tokio clock
//! from deadline to deadline, so every timer fires at exactly its due
//! instant. Tests must run with `#[tokio::test(start_paused = true)]`.

use dartloop_ap::config::CrossfadeSettings;
use dartloop_ap::playback::backend::ChannelEventReceiver;
use dartloop_ap::playback::{
    CrossfadeScheduler, MetadataMode, SimulatedBackend, SourceId, StartOutcome,
};
use dartloop_common::events::{EventBus, LooperEvent};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

pub const INTRO: &str = "intro.mp3";
pub const LOOP: &str = "loop.mp3";

pub fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

pub struct Harness {
    pub backend: SimulatedBackend,
    pub scheduler: CrossfadeScheduler<SimulatedBackend>,
    pub channel_events: ChannelEventReceiver,
    pub events: broadcast::Receiver<LooperEvent>,
    pub origin: Instant,
}

impl Harness {
    /// Intro and loop tracks with the given lengths and metadata modes
    pub fn new(
        intro: Duration,
        intro_mode: MetadataMode,
        loop_len: Duration,
        loop_mode: MetadataMode,
    ) -> Self {
        let backend = SimulatedBackend::new();
        backend.add_source(INTRO, intro, intro_mode);
        backend.add_source(LOOP, loop_len, loop_mode);
        Self::with_backend(backend, CrossfadeSettings::default())
    }

    /// Both tracks with immediately known durations
    pub fn immediate(intro_secs: f64, loop_secs: f64) -> Self {
        Self::new(
            secs(intro_secs),
            MetadataMode::Immediate,
            secs(loop_secs),
            MetadataMode::Immediate,
        )
    }

    pub fn with_backend(backend: SimulatedBackend, settings: CrossfadeSettings) -> Self {
        let bus = EventBus::new(1024);
        let events = bus.subscribe();
        let (tx, channel_events) = mpsc::unbounded_channel();
        let scheduler = CrossfadeScheduler::new(backend.clone(), settings, bus, tx);
        Self {
            backend,
            scheduler,
            channel_events,
            events,
            origin: Instant::now(),
        }
    }

    /// Start a session at the current instant and make it the time origin
    pub fn start(&mut self, fade_seconds: f64) -> StartOutcome {
        self.origin = Instant::now();
        self.scheduler.start(
            SourceId::new(INTRO),
            SourceId::new(LOOP),
            fade_seconds,
            self.origin,
        )
    }

    /// Time since the origin
    pub fn elapsed(&self) -> Duration {
        Instant::now() - self.origin
    }

    /// Hand pending backend notifications to the scheduler
    pub fn pump(&mut self) {
        while let Ok(event) = self.channel_events.try_recv() {
            self.scheduler.on_channel_event(event, Instant::now());
        }
    }

    /// Advance to `origin + at`, firing every timer due on the way
    pub async fn run_until(&mut self, at: Duration) {
        let target = self.origin + at;
        loop {
            self.pump();
            match self.scheduler.next_deadline() {
                Some(deadline) if deadline <= target => {
                    let now = Instant::now();
                    if deadline > now {
                        tokio::time::advance(deadline - now).await;
                    }
                    self.pump();
                    self.scheduler.fire_due(Instant::now());
                }
                _ => break,
            }
        }

        let now = Instant::now();
        if target > now {
            tokio::time::advance(target - now).await;
        }
        self.pump();
        self.scheduler.fire_due(Instant::now());
    }

    /// Every event emitted since the last drain
    pub fn drain_events(&mut self) -> Vec<LooperEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub fn intro_volume(&self) -> Option<f32> {
        self.scheduler.intro_channel().map(|c| c.volume())
    }

    pub fn loop_volume(&self) -> Option<f32> {
        self.scheduler.active_loop_channel().map(|c| c.volume())
    }
}
