//! Host stop-flag binding
//!
//! Embedding hosts expose a single "stop audio" flag. [`follow_stop_signal`]
//! watches that flag and turns its edges into scheduler calls: `false`
//! starts (or retries) playback, `true` stops it.

use crate::config::AudioConfig;
use crate::error::Result;
use crate::playback::backend::SourceId;
use crate::playback::scheduler::StartOutcome;
use crate::playback::service::SchedulerHandle;
use tokio::sync::watch;
use tracing::{debug, info};

/// What to play when the flag clears
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSessionConfig {
    pub intro: SourceId,
    pub loop_source: SourceId,
    pub fade_seconds: f64,
}

impl AudioSessionConfig {
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            intro: SourceId::new(audio.intro.clone()),
            loop_source: SourceId::new(audio.loop_track.clone()),
            fade_seconds: audio.fade_seconds,
        }
    }
}

/// Drive `handle` from a stop flag until the flag's sender is dropped
///
/// The current flag value is applied immediately. Once the sender goes
/// away playback is stopped and the function returns.
pub async fn follow_stop_signal(
    handle: SchedulerHandle,
    mut stop_flag: watch::Receiver<bool>,
    session: AudioSessionConfig,
) -> Result<()> {
    let mut stopped = *stop_flag.borrow_and_update();
    apply(&handle, stopped, &session).await?;

    while stop_flag.changed().await.is_ok() {
        let value = *stop_flag.borrow_and_update();
        if value == stopped {
            // Flipped and back before we looked
            continue;
        }
        stopped = value;
        apply(&handle, stopped, &session).await?;
    }

    debug!("Stop flag closed, stopping playback");
    handle.stop().await?;
    Ok(())
}

async fn apply(handle: &SchedulerHandle, stop: bool, session: &AudioSessionConfig) -> Result<()> {
    if stop {
        let report = handle.stop().await?;
        debug!(
            "Stop flag set: {} timer(s) cancelled, {} channel(s) released",
            report.timers_cancelled, report.channels_released
        );
        return Ok(());
    }

    match handle
        .start(
            session.intro.clone(),
            session.loop_source.clone(),
            session.fade_seconds,
        )
        .await?
    {
        StartOutcome::Started { session_id, .. } => {
            info!("Stop flag cleared, session {} started", session_id)
        }
        StartOutcome::AlreadyActive { retried } => {
            debug!("Stop flag cleared while active ({} channel(s) retried)", retried)
        }
    }
    Ok(())
}
