//! Scheduler service task
//!
//! Owns a [`CrossfadeScheduler`] on a dedicated tokio task. Commands,
//! backend metadata events and timer deadlines are all handled on that one
//! task, so scheduler state is never touched concurrently. Callers talk to
//! it through a cloneable [`SchedulerHandle`].

use crate::config::CrossfadeSettings;
use crate::error::{Error, Result};
use crate::playback::backend::{AudioBackend, ChannelEventReceiver, SourceId};
use crate::playback::scheduler::{CrossfadeScheduler, SchedulerSnapshot, StartOutcome, StopReport};
use dartloop_common::events::EventBus;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests accepted by the service task
#[derive(Debug)]
pub enum SchedulerCommand {
    Start {
        intro: SourceId,
        loop_source: SourceId,
        fade_seconds: f64,
        reply: oneshot::Sender<StartOutcome>,
    },
    /// Replies once every timer is cancelled and every channel released
    Stop { reply: oneshot::Sender<StopReport> },
    SetMuted(bool),
    SetMasterVolume(f32),
    Snapshot { reply: oneshot::Sender<SchedulerSnapshot> },
    Shutdown,
}

/// Cloneable client of a running [`SchedulerService`]
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn start(
        &self,
        intro: SourceId,
        loop_source: SourceId,
        fade_seconds: f64,
    ) -> Result<StartOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Start {
            intro,
            loop_source,
            fade_seconds,
            reply,
        })?;
        rx.await.map_err(|_| unavailable())
    }

    /// Stop playback; returns after the scheduler has released everything
    pub async fn stop(&self) -> Result<StopReport> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Stop { reply })?;
        rx.await.map_err(|_| unavailable())
    }

    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.send(SchedulerCommand::SetMuted(muted))
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        self.send(SchedulerCommand::SetMasterVolume(volume))
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Snapshot { reply })?;
        rx.await.map_err(|_| unavailable())
    }

    /// Ask the task to stop playback and exit
    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
    }

    /// True once the service task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| unavailable())
    }
}

fn unavailable() -> Error {
    Error::ServiceUnavailable("scheduler task has exited".to_string())
}

/// Tokio task running one scheduler
pub struct SchedulerService<B: AudioBackend> {
    scheduler: CrossfadeScheduler<B>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    channel_events: ChannelEventReceiver,
}

impl<B: AudioBackend> SchedulerService<B> {
    /// Spawn the service on the current runtime
    pub fn spawn(
        backend: B,
        settings: CrossfadeSettings,
        events: EventBus,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (event_tx, channel_events) = mpsc::unbounded_channel();

        info!(
            "Starting scheduler service ({} backend, fade {:.2}s, {} steps)",
            backend.name(),
            settings.fade.as_secs_f64(),
            settings.step_count
        );

        let service = Self {
            scheduler: CrossfadeScheduler::new(backend, settings, events, event_tx),
            commands,
            channel_events,
        };
        let task = tokio::spawn(service.run());
        (SchedulerHandle { tx }, task)
    }

    async fn run(mut self) {
        loop {
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                // Commands first: a stop wins over timers due at the same instant
                biased;

                command = self.commands.recv() => match command {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.channel_events.recv() => {
                    self.scheduler.on_channel_event(event, Instant::now());
                }
                _ = wait_until(deadline) => {
                    let fired = self.scheduler.fire_due(Instant::now());
                    if fired == 0 {
                        debug!("Woke with no live timers due");
                    }
                }
            }
        }

        let report = self.scheduler.stop();
        info!(
            "Scheduler service exiting ({} channel(s) released)",
            report.channels_released
        );
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Start {
                intro,
                loop_source,
                fade_seconds,
                reply,
            } => {
                let outcome = self
                    .scheduler
                    .start(intro, loop_source, fade_seconds, Instant::now());
                if reply.send(outcome).is_err() {
                    warn!("Start caller went away before the reply");
                }
            }
            SchedulerCommand::Stop { reply } => {
                let report = self.scheduler.stop();
                let _ = reply.send(report);
            }
            SchedulerCommand::SetMuted(muted) => self.scheduler.set_muted(muted),
            SchedulerCommand::SetMasterVolume(volume) => self.scheduler.set_master_volume(volume),
            SchedulerCommand::Snapshot { reply } => {
                let _ = reply.send(self.scheduler.snapshot());
            }
            SchedulerCommand::Shutdown => {}
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
