//! Stepped volume ramps
//!
//! A [`FadeRamp`] is one side of a crossfade: a linear interpolation from a
//! start volume to a target volume over a fixed number of steps.
//!
//! Step `i` (1-based) is due `i × interval` after the ramp starts and sets
//! the volume to `start + (target - start) × i / steps`, clamped to 0.0-1.0.

use crate::playback::backend::ChannelId;
use std::time::Duration;

/// Identifier of a ramp within one scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RampId(pub u64);

/// Result of advancing a ramp by one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampStep {
    /// Intermediate volume; more steps follow
    Continue(f32),
    /// Final volume; the ramp is done
    Finished(f32),
}

impl RampStep {
    pub fn volume(&self) -> f32 {
        match self {
            RampStep::Continue(v) | RampStep::Finished(v) => *v,
        }
    }
}

/// Linear volume ramp for one channel
#[derive(Debug, Clone)]
pub struct FadeRamp {
    id: RampId,
    channel: ChannelId,
    start_volume: f32,
    target_volume: f32,
    duration: Duration,
    step_count: u32,
    steps_taken: u32,
    generation: u64,
}

impl FadeRamp {
    pub fn new(
        id: RampId,
        channel: ChannelId,
        start_volume: f32,
        target_volume: f32,
        duration: Duration,
        step_count: u32,
        generation: u64,
    ) -> Self {
        Self {
            id,
            channel,
            start_volume: start_volume.clamp(0.0, 1.0),
            target_volume: target_volume.clamp(0.0, 1.0),
            duration,
            step_count: step_count.max(1),
            steps_taken: 0,
            generation,
        }
    }

    pub fn id(&self) -> RampId {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn target_volume(&self) -> f32 {
        self.target_volume
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True for a ramp heading to silence
    pub fn is_fade_out(&self) -> bool {
        self.target_volume < self.start_volume || self.target_volume == 0.0
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn steps_remaining(&self) -> u32 {
        self.step_count - self.steps_taken
    }

    pub fn is_finished(&self) -> bool {
        self.steps_taken >= self.step_count
    }

    /// Time between steps (`duration / steps`)
    pub fn step_interval(&self) -> Duration {
        self.duration / self.step_count
    }

    /// Offset of step `step` from the ramp start
    pub fn step_offset(&self, step: u32) -> Duration {
        self.step_interval() * step
    }

    /// Offset of the next pending step from the ramp start
    pub fn next_step_offset(&self) -> Duration {
        self.step_offset(self.steps_taken + 1)
    }

    /// Volume after step `step` of the ramp
    pub fn volume_at(&self, step: u32) -> f32 {
        let step = step.min(self.step_count);
        let progress = step as f32 / self.step_count as f32;
        (self.start_volume + (self.target_volume - self.start_volume) * progress).clamp(0.0, 1.0)
    }

    /// Take the next step
    pub fn advance(&mut self) -> RampStep {
        if self.steps_taken < self.step_count {
            self.steps_taken += 1;
        }
        // The last step lands exactly on the target
        if self.is_finished() {
            RampStep::Finished(self.target_volume)
        } else {
            RampStep::Continue(self.volume_at(self.steps_taken))
        }
    }
}
