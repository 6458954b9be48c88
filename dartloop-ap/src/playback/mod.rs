//! Crossfaded intro/loop playback
//!
//! - [`backend`]: the seam between the scheduler and a platform player
//! - [`channel`]: one owned playback resource with ramp volume and output gain
//! - [`ramp`] and [`timers`]: stepped fades and the cancellable timer set
//! - [`scheduler`]: the phase state machine
//! - [`service`] and [`binding`]: the tokio task and the host stop flag
//! - [`simulated`] and [`device`]: backend implementations

pub mod backend;
pub mod binding;
pub mod channel;
pub mod device;
pub mod ramp;
pub mod scheduler;
pub mod service;
pub mod simulated;
pub mod timers;

pub use backend::{AudioBackend, ChannelEvent, ChannelId, PlaybackHandle, SourceId};
pub use binding::{follow_stop_signal, AudioSessionConfig};
pub use channel::{AudioChannel, ChannelRole, OutputGain, PlaybackStart};
pub use device::DeviceBackend;
pub use ramp::{FadeRamp, RampId, RampStep};
pub use scheduler::{CrossfadeScheduler, SchedulerSnapshot, ScheduledTransition, StartOutcome, StopReport};
pub use service::{SchedulerHandle, SchedulerService};
pub use simulated::{MetadataMode, SimulatedBackend};
pub use timers::{TimerHandle, TimerKind, TimerQueue};
