//! dartloop audio player (dartloop-ap) - Main entry point
//!
//! Plays the configured intro once, then loops the loop track with
//! crossfades until stopped. Reads one command per line on stdin:
//!
//! ```text
//! start | stop | mute | unmute | volume <0.0-1.0> | status | quit
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dartloop_ap::audio::AudioOutput;
use dartloop_ap::config::{BackendKind, CrossfadeSettings, TomlConfig, CONFIG_ENV_VAR};
use dartloop_ap::playback::{
    follow_stop_signal, AudioBackend, AudioSessionConfig, DeviceBackend, MetadataMode,
    SchedulerHandle, SchedulerService, SimulatedBackend,
};
use dartloop_common::config::load_or_default;
use dartloop_common::events::{EventBus, LooperEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dartloop-ap
#[derive(Parser, Debug)]
#[command(name = "dartloop-ap")]
#[command(about = "Intro plus endlessly crossfaded loop audio player")]
#[command(version)]
struct Args {
    /// Configuration file (overrides DARTLOOP_CONFIG and discovery)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Intro track source
    #[arg(long)]
    intro: Option<String>,

    /// Loop track source
    #[arg(long)]
    loop_track: Option<String>,

    /// Crossfade length in seconds
    #[arg(long)]
    fade_seconds: Option<f64>,

    /// Folder relative sources are resolved against
    #[arg(long, env = "DARTLOOP_MEDIA_ROOT")]
    media_root: Option<PathBuf>,

    /// Play virtual tracks instead of opening an audio device
    #[arg(long)]
    simulate: bool,

    /// Start with playback stopped (wait for a `start` command)
    #[arg(long)]
    stopped: bool,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    /// Command-line values win over the config file
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(intro) = &self.intro {
            config.audio.intro = intro.clone();
        }
        if let Some(loop_track) = &self.loop_track {
            config.audio.loop_track = loop_track.clone();
        }
        if let Some(fade) = self.fade_seconds {
            config.audio.fade_seconds = fade;
        }
        if let Some(root) = &self.media_root {
            config.audio.media_root = Some(root.clone());
        }
        if self.simulate {
            config.audio.backend = BackendKind::Simulated;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The configured level is not known yet; log config discovery with a
    // scoped bootstrap subscriber
    let (mut config, config_path) = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        load_or_default::<TomlConfig>(args.config.as_deref(), CONFIG_ENV_VAR)
    })
    .context("Failed to load configuration")?;
    args.apply(&mut config);

    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("dartloop_ap={level},dartloop_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting dartloop-ap {} (git {}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to enumerate output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let settings = CrossfadeSettings::from_config(&config.audio)
        .context("Invalid [audio] configuration")?;

    let events = EventBus::new(256);
    tokio::spawn(log_events(events.subscribe()));

    match config.audio.backend {
        BackendKind::Simulated => {
            info!("Using simulated backend (no audio output)");
            run(simulated_backend(&config), settings, events, &config, args.stopped).await
        }
        BackendKind::Device => {
            let media_root = config
                .audio
                .media_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let backend = DeviceBackend::open(media_root, config.audio.output_device.clone())
                .context("Failed to initialize audio output")?;
            run(backend, settings, events, &config, args.stopped).await
        }
    }
}

async fn run<B: AudioBackend>(
    backend: B,
    settings: CrossfadeSettings,
    events: EventBus,
    config: &TomlConfig,
    start_stopped: bool,
) -> Result<()> {
    let (handle, service) = SchedulerService::spawn(backend, settings, events);
    handle.set_master_volume(config.audio.master_volume)?;
    if config.audio.muted {
        handle.set_muted(true)?;
    }

    let session = AudioSessionConfig::from_config(&config.audio);
    let (stop_tx, stop_rx) = watch::channel(start_stopped);
    let binding = tokio::spawn(follow_stop_signal(handle.clone(), stop_rx, session.clone()));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_command(line.trim(), &handle, &stop_tx, &session).await? {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed; running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    // Dropping the flag sender makes the binding stop playback and return
    drop(stop_tx);
    match binding.await {
        Ok(Err(e)) => warn!("Stop flag binding failed: {}", e),
        Err(e) => warn!("Stop flag binding panicked: {}", e),
        Ok(Ok(())) => {}
    }

    handle.shutdown();
    service.await.context("Scheduler task failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Returns false when the host should exit
async fn handle_command(
    line: &str,
    handle: &SchedulerHandle,
    stop_flag: &watch::Sender<bool>,
    session: &AudioSessionConfig,
) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };

    match command {
        "start" => {
            if *stop_flag.borrow() {
                stop_flag.send_replace(false);
            } else {
                // Already running: start() retries blocked channels
                handle
                    .start(
                        session.intro.clone(),
                        session.loop_source.clone(),
                        session.fade_seconds,
                    )
                    .await?;
            }
        }
        "stop" => {
            stop_flag.send_replace(true);
        }
        "mute" => handle.set_muted(true)?,
        "unmute" => handle.set_muted(false)?,
        "volume" => match parts.next().map(str::parse::<f32>) {
            Some(Ok(volume)) => handle.set_master_volume(volume)?,
            _ => warn!("usage: volume <0.0-1.0>"),
        },
        "status" => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        "quit" | "exit" => return Ok(false),
        other => warn!(
            "Unknown command '{}' (start, stop, mute, unmute, volume <x>, status, quit)",
            other
        ),
    }
    Ok(true)
}

/// Console logging used until the configured log level is known
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dartloop_common=info".into()),
        )
        .finish()
}

fn simulated_backend(config: &TomlConfig) -> SimulatedBackend {
    let sim = &config.simulated;
    let mode = if sim.metadata_delay_seconds > 0.0 {
        MetadataMode::Delayed(seconds(sim.metadata_delay_seconds))
    } else {
        MetadataMode::Immediate
    };

    let backend = SimulatedBackend::new();
    backend.add_source(config.audio.intro.as_str(), seconds(sim.intro_seconds), mode);
    backend.add_source(config.audio.loop_track.as_str(), seconds(sim.loop_seconds), mode);
    backend
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Log every scheduler event until the bus closes
async fn log_events(mut rx: broadcast::Receiver<LooperEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.to_json() {
                Ok(json) => debug!(event = event.event_type(), "{}", json),
                Err(e) => warn!("Failed to serialize {} event: {}", event.event_type(), e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, {} event(s) skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
