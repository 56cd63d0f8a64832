//! gesture-defense-client binary
//!
//! Connects to the vision service, optionally selects a backend mode on the
//! control service, and runs an authority session at the configured tick
//! rate until Ctrl-C.  With `--local-mirror` a second, mirror session is run
//! in-process over a `LocalHub` so replication can be watched in the log.
//!
//! There is no renderer: monsters "walk" the planned path on a timer and
//! either reach the base or, once any turret has been placed, die halfway.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                           | Default               | Description              |
//! |-------------------------------|-----------------------|--------------------------|
//! | `GD_CONFIG`                   | *(none)*              | TOML config file         |
//! | `GD_VISION_URL`               | `ws://localhost:8767` | Vision service endpoint  |
//! | `GD_CONTROL_URL`              | `ws://localhost:8765` | Backend launcher         |
//! | `GD_GESTURE_URL`              | `ws://localhost:8768` | Finger-tracking stream   |
//! | `GD_BACKEND_MODE`             | *(none)*              | Mode sent on startup     |
//! | `GD_TICK_RATE_HZ`             | `60`                  | Session tick rate        |
//!
//! Every other `ClientConfig` key is read from `GD_<SECTION>__<KEY>`.

use anyhow::{Context, Result};
use clap::Parser;
use gesture_defense::{
    phase::PhaseEvent,
    protocol::BackendMode,
    replication::{LocalHub, MirrorState, RemoteCall},
    session::{Presentation, Session},
    state::StateChange,
    transport::{ConnectionState, ControlClient, VisionClient},
    types::{TurretInfo, Vec3},
    waves::{MonsterOutcome, WaveEvent},
    ClientConfig, PhaseCommand,
};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gesture-defense-client", about = "Gesture Defense client", version)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "GD_CONFIG")]
    config: Option<PathBuf>,

    /// Vision service endpoint
    #[arg(long, env = "GD_VISION_URL")]
    url: Option<String>,

    /// Backend launcher endpoint
    #[arg(long, env = "GD_CONTROL_URL")]
    control_url: Option<String>,

    /// Finger-tracking endpoint; empty disables it
    #[arg(long, env = "GD_GESTURE_URL")]
    gesture_url: Option<String>,

    /// Backend mode to select on startup (singleplayer, multiplayer_selector,
    /// multiplayer_placer, stop)
    #[arg(long, env = "GD_BACKEND_MODE")]
    backend_mode: Option<BackendMode>,

    /// Tick rate (Hz)
    #[arg(long, env = "GD_TICK_RATE_HZ")]
    tick_rate_hz: Option<f32>,

    /// Run an in-process mirror peer next to the authority
    #[arg(long)]
    local_mirror: bool,

    /// Request a planning scan as soon as the vision service is connected
    #[arg(long)]
    auto_scan: bool,

    /// Enter combat as soon as a scan completes
    #[arg(long)]
    auto_combat: bool,
}

// ---------------------------------------------------------------------------
// Demo world
// ---------------------------------------------------------------------------

/// Stand-in for the scene: tracks walking monsters and what the player loop
/// should do next.
#[derive(Default)]
struct Demo {
    path_length: f32,
    turrets_placed: u32,
    /// (monster id, when it resolves, outcome)
    walking: Vec<(u64, Instant, MonsterOutcome)>,
    connected: bool,
    scan_requested: bool,
    scan_complete: bool,
}

impl Demo {
    fn due(&mut self, now: Instant) -> Vec<(u64, MonsterOutcome)> {
        let (due, rest): (Vec<_>, Vec<_>) = self.walking.drain(..).partition(|w| w.1 <= now);
        self.walking = rest;
        due.into_iter().map(|(id, _, outcome)| (id, outcome)).collect()
    }
}

struct LogPresentation {
    peer: &'static str,
    demo: Option<Rc<RefCell<Demo>>>,
}

impl Presentation for LogPresentation {
    fn connection(&mut self, state: ConnectionState) {
        log::info!("[{}] vision connection {}", self.peer, state.name());
        if let Some(demo) = &self.demo {
            demo.borrow_mut().connected = state == ConnectionState::Open;
        }
    }

    fn phase_event(&mut self, event: &PhaseEvent) {
        match event {
            PhaseEvent::PointerMoved { .. } | PhaseEvent::FingerCount { .. } => {
                log::trace!("[{}] {:?}", self.peer, event)
            }
            PhaseEvent::SegmentationReceived { mask } => {
                log::info!("[{}] segmentation mask ({} bytes)", self.peer, mask.len())
            }
            _ => log::info!("[{}] {:?}", self.peer, event),
        }
        let Some(demo) = &self.demo else { return };
        let mut demo = demo.borrow_mut();
        match event {
            PhaseEvent::PlanningComplete { .. } => demo.scan_complete = true,
            PhaseEvent::ScanFailed { .. } | PhaseEvent::ScanTimedOut => {
                demo.scan_requested = false
            }
            PhaseEvent::CombatStarted { path: Some(path) } => {
                demo.path_length = path.total_length()
            }
            PhaseEvent::CombatEnded { .. } => demo.walking.clear(),
            _ => {}
        }
    }

    fn wave_event(&mut self, event: &WaveEvent) {
        log::info!("[{}] {:?}", self.peer, event);
        let Some(demo) = &self.demo else { return };
        if let WaveEvent::MonsterSpawned { monster } = event {
            let mut demo = demo.borrow_mut();
            let walk = Duration::from_secs_f32(demo.path_length / monster.speed.max(0.1));
            let entry = if demo.turrets_placed > 0 {
                (monster.id, Instant::now() + walk / 2, MonsterOutcome::Killed)
            } else {
                (monster.id, Instant::now() + walk, MonsterOutcome::ReachedEnd)
            };
            demo.walking.push(entry);
        }
    }

    fn state_change(&mut self, change: &StateChange) {
        log::info!("[{}] {:?}", self.peer, change);
    }

    fn turret_placed(&mut self, turret: &TurretInfo, position: Vec3) {
        log::info!("[{}] placed {} at {}", self.peer, turret.name, position);
        if let Some(demo) = &self.demo {
            demo.borrow_mut().turrets_placed += 1;
        }
    }

    fn remote_call(&mut self, call: &RemoteCall, mirror: &MirrorState) {
        log::debug!(
            "[{}] ← {} (gold={}, health={}/{}, wave={})",
            self.peer,
            call.method(),
            mirror.snapshot.gold,
            mirror.snapshot.health,
            mirror.snapshot.max_health,
            mirror.snapshot.wave_number
        );
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gesture_defense=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref())
        .context("Failed to load client configuration")?;
    if let Some(url) = args.url {
        config.transport.url = url;
    }
    if let Some(url) = args.control_url {
        config.transport.control_url = url;
    }
    if let Some(url) = args.gesture_url {
        config.transport.gesture_url = url;
    }
    if let Some(hz) = args.tick_rate_hz {
        config.tick_rate_hz = hz;
    }

    log::info!(
        "Starting gesture-defense-client (vision={}, tick={} Hz, mirror={})",
        config.transport.url,
        config.tick_rate_hz,
        args.local_mirror,
    );

    let mut control = match args.backend_mode {
        Some(mode) => {
            let mut control = ControlClient::connect(&config.transport.control_url)
                .with_context(|| format!("Failed to open {}", config.transport.control_url))?;
            control.select_mode(mode)?;
            Some(control)
        }
        None => None,
    };

    let mut vision = VisionClient::new(&config.transport);
    vision
        .connect(&config.transport.url)
        .with_context(|| format!("Failed to open {}", config.transport.url))?;
    if !config.transport.gesture_url.is_empty() {
        vision
            .connect_gesture(&config.transport.gesture_url)
            .with_context(|| format!("Failed to open {}", config.transport.gesture_url))?;
    }

    let demo = Rc::new(RefCell::new(Demo::default()));
    let (hub, peer_hub) = LocalHub::pair();

    let mut authority = Session::authority(
        config.clone(),
        vision,
        Box::new(hub),
        Box::new(LogPresentation {
            peer: "authority",
            demo: Some(demo.clone()),
        }),
    );
    let mut mirror = args.local_mirror.then(|| {
        Session::mirror(
            config.clone(),
            Box::new(peer_hub),
            Box::new(LogPresentation {
                peer: "mirror",
                demo: None,
            }),
        )
    });

    tracing::debug!(interval = ?config.tick_interval(), "tick loop starting");

    let mut interval = tokio::time::interval(config.tick_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                if let Some(control) = control.as_mut() {
                    control.pump();
                }

                authority.tick(now);
                if let Some(mirror) = mirror.as_mut() {
                    mirror.tick(now);
                }

                let due = demo.borrow_mut().due(now);
                for (id, outcome) in due {
                    authority.monster_resolved(id, outcome, now);
                }

                let (scan, combat) = {
                    let mut d = demo.borrow_mut();
                    let scan = args.auto_scan && d.connected && !d.scan_requested;
                    if scan {
                        d.scan_requested = true;
                    }
                    let combat = args.auto_combat && d.scan_complete;
                    if combat {
                        d.scan_complete = false;
                    }
                    (scan, combat)
                };
                if scan {
                    if let Err(e) = authority.request_phase_change(PhaseCommand::BeginPlanningScan, now) {
                        log::warn!("Auto scan failed: {}", e);
                    }
                }
                if combat {
                    if let Err(e) = authority.request_phase_change(PhaseCommand::EnterCombat, now) {
                        log::warn!("Auto combat failed: {}", e);
                    }
                }
            }

            _ = &mut shutdown => {
                log::info!("Shutdown requested");
                break;
            }
        }
    }

    if let Some(vision) = authority.vision_mut() {
        vision.close();
    }
    if let Some(mut control) = control {
        control.close();
    }
    log::info!("gesture-defense-client stopped");
    Ok(())
}
