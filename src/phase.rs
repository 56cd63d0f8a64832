//! Phase controller – Planning / Combat state machine.
//!
//! ```text
//!            process-scan (pending, 30s timeout)
//!          ┌───────────────┐
//!          ▼               │  PathPoints  → PlanningComplete
//!      Planning ───────────┘  ErrorNotice → ScanFailed
//!        │   ▲                timeout     → ScanTimedOut
//!  enter │   │ exit
//! combat ▼   │ combat
//!       Combat
//! ```
//!
//! At most one [`PendingRequest`] exists.  Only the scan waits on the
//! vision service; enter/exit combat are fire-and-forget and take effect
//! locally even if the command cannot be delivered, so a dead backend can
//! never strand the game in one phase.
//!
//! The controller never calls out.  Every transition is queued as a
//! [`PhaseEvent`] which the owner drains with [`PhaseController::take_events`].

use bytes::Bytes;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::{CommandError, TransportError};
use crate::protocol::{commands, GridPosition, VisionMessage};
use crate::types::{deadline_after, PhaseState, Vec3, ViewportMapping, WorldPath};

/// Outbound seam to the vision service.
pub trait CommandSink {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseCommand {
    BeginPlanningScan,
    EnterCombat,
    ExitCombat,
}

impl PhaseCommand {
    /// Text sent to the vision service (and relayed between peers).
    pub fn as_wire(self) -> &'static str {
        match self {
            PhaseCommand::BeginPlanningScan => commands::PROCESS_SCAN,
            PhaseCommand::EnterCombat => commands::ENTER_COMBAT,
            PhaseCommand::ExitCombat => commands::EXIT_COMBAT,
        }
    }
}

impl std::str::FromStr for PhaseCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            commands::PROCESS_SCAN | "begin-planning-scan" => Ok(PhaseCommand::BeginPlanningScan),
            commands::ENTER_COMBAT => Ok(PhaseCommand::EnterCombat),
            commands::EXIT_COMBAT => Ok(PhaseCommand::ExitCombat),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

impl std::fmt::Display for PhaseCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub command: PhaseCommand,
    pub issued_at: Instant,
    pub timeout_at: Instant,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    ScanStarted,
    ScanProgress { step: String, progress: f32 },
    SegmentationReceived { mask: Bytes },
    /// The scan produced a path; it is retained until the next scan.
    PlanningComplete { path: WorldPath },
    ScanFailed { message: String, code: i32 },
    ScanTimedOut,
    /// Path-drawing artifacts must be cleared; `path` goes to the scheduler.
    CombatStarted { path: Option<WorldPath> },
    /// Path-drawing artifacts are restored from `path`; waves must stop.
    CombatEnded { path: Option<WorldPath> },
    PointerMoved { position: Vec3, valid: bool },
    PointerHidden,
    PlacementConfirmed { position: Vec3 },
    CamerasAvailable { cameras: Vec<i32> },
    FingerCount { count: u32 },
}

/// Code used when a timeout is reported like a backend error.
pub const TIMEOUT_ERROR_CODE: i32 = 408;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub scan_timeout_ms: u64,
    /// Pointer hidden after this long without a `GridPosition` sample.
    pub pointer_stale_ms: u64,
    /// Lifetime of the transient status banner.
    pub status_ms: u64,
    pub viewport: ViewportMapping,
}

impl PhaseConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 30_000,
            pointer_stale_ms: 500,
            status_ms: 4_000,
            viewport: ViewportMapping::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pointer tracking
// ---------------------------------------------------------------------------

/// Latest grid pointer sample, hidden after a silence window.
#[derive(Debug, Clone)]
pub struct PointerTracker {
    stale_after: Duration,
    sample: Option<PointerSample>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub position: Vec3,
    pub valid: bool,
    pub received_at: Instant,
}

impl PointerTracker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            sample: None,
        }
    }

    pub fn update(&mut self, position: Vec3, valid: bool, now: Instant) {
        self.sample = Some(PointerSample {
            position,
            valid,
            received_at: now,
        });
    }

    /// Returns `true` exactly once, when a visible sample goes stale.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.sample {
            Some(s) if now.saturating_duration_since(s.received_at) >= self.stale_after => {
                self.sample = None;
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<&PointerSample> {
        self.sample.as_ref()
    }

    pub fn clear(&mut self) -> bool {
        self.sample.take().is_some()
    }
}

// ---------------------------------------------------------------------------
// Status banner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBanner {
    pub message: String,
    pub expires_at: Instant,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct PhaseController {
    config: PhaseConfig,
    phase: PhaseState,
    pending: Option<PendingRequest>,
    path: Option<WorldPath>,
    viewport: ViewportMapping,
    pointer: PointerTracker,
    status: Option<StatusBanner>,
    events: Vec<PhaseEvent>,
}

impl PhaseController {
    pub fn new(config: PhaseConfig) -> Self {
        let pointer = PointerTracker::new(Duration::from_millis(config.pointer_stale_ms));
        let viewport = config.viewport;
        Self {
            config,
            phase: PhaseState::Planning,
            pending: None,
            path: None,
            viewport,
            pointer,
            status: None,
            events: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Issue `command` against the vision service.
    ///
    /// Rejected without side effects while another request is pending.
    pub fn request(
        &mut self,
        command: PhaseCommand,
        sink: &mut dyn CommandSink,
        now: Instant,
    ) -> Result<(), CommandError> {
        if let Some(pending) = &self.pending {
            warn!(
                "Rejecting '{}': '{}' still pending",
                command, pending.command
            );
            return Err(CommandError::RequestPending {
                pending: pending.command.as_wire(),
            });
        }

        match command {
            PhaseCommand::BeginPlanningScan => {
                if self.phase != PhaseState::Planning {
                    return Err(CommandError::InvalidInPhase {
                        command: command.as_wire(),
                        phase: self.phase,
                    });
                }
                sink.send_command(command.as_wire())?;
                self.pending = Some(PendingRequest {
                    command,
                    issued_at: now,
                    timeout_at: deadline_after(now, self.config.scan_timeout()),
                });
                info!("Planning scan requested");
                self.events.push(PhaseEvent::ScanStarted);
            }
            PhaseCommand::EnterCombat => {
                if self.phase == PhaseState::Combat {
                    debug!("Already in combat – ignoring duplicate enter");
                    return Ok(());
                }
                if let Err(e) = sink.send_command(command.as_wire()) {
                    warn!("Entering combat without backend notice: {}", e);
                }
                self.enter_combat();
            }
            PhaseCommand::ExitCombat => {
                if self.phase == PhaseState::Planning {
                    debug!("Already planning – ignoring duplicate exit");
                    return Ok(());
                }
                if let Err(e) = sink.send_command(command.as_wire()) {
                    warn!("Leaving combat without backend notice: {}", e);
                }
                self.exit_combat();
            }
        }
        Ok(())
    }

    /// Apply a transition relayed from the authority without talking to the
    /// vision service.  Scans are the authority's business and are ignored.
    pub fn apply_relayed(&mut self, command: PhaseCommand) {
        match command {
            PhaseCommand::BeginPlanningScan => {
                debug!("Relayed scan noted; progress arrives via replication");
            }
            PhaseCommand::EnterCombat if self.phase == PhaseState::Planning => self.enter_combat(),
            PhaseCommand::ExitCombat if self.phase == PhaseState::Combat => self.exit_combat(),
            _ => debug!("Relayed '{}' is a no-op in {:?}", command, self.phase),
        }
    }

    fn enter_combat(&mut self) {
        info!("Phase: Planning → Combat");
        self.phase = PhaseState::Combat;
        self.events.push(PhaseEvent::CombatStarted {
            path: self.path.clone(),
        });
    }

    fn exit_combat(&mut self) {
        info!("Phase: Combat → Planning");
        self.phase = PhaseState::Planning;
        if self.pointer.clear() {
            self.events.push(PhaseEvent::PointerHidden);
        }
        self.events.push(PhaseEvent::CombatEnded {
            path: self.path.clone(),
        });
    }

    // -----------------------------------------------------------------------
    // Inbound vision messages
    // -----------------------------------------------------------------------

    pub fn handle_message(&mut self, message: &VisionMessage, now: Instant) {
        match message {
            VisionMessage::PathPoints(points) => {
                if !self.scan_pending() {
                    warn!("Dropping unsolicited path ({} points)", points.len());
                    return;
                }
                let raw: Vec<(f32, f32)> = points.iter().map(|p| (p.x, p.y)).collect();
                let path = self.viewport.path_to_world(&raw);
                info!("Planning complete – path of {} points", path.len());
                self.pending = None;
                self.path = Some(path.clone());
                self.events.push(PhaseEvent::PlanningComplete { path });
            }
            VisionMessage::SegmentationMask(mask) => {
                if self.scan_pending() {
                    self.events.push(PhaseEvent::SegmentationReceived { mask: mask.clone() });
                }
            }
            VisionMessage::ProgressUpdate(update) => {
                if !self.scan_pending() {
                    return;
                }
                // The backend reports some failures as a zero-progress "Error…" step.
                if update.progress <= 0.0 && update.step.starts_with("Error") {
                    self.fail_scan(update.step.clone(), 0, now);
                } else {
                    self.events.push(PhaseEvent::ScanProgress {
                        step: update.step.clone(),
                        progress: update.progress,
                    });
                }
            }
            VisionMessage::ErrorNotice(notice) => {
                self.fail_scan(notice.error.clone(), notice.code, now);
            }
            VisionMessage::ProcessingComplete => debug!("Backend processing complete"),
            VisionMessage::GridPosition(sample) => self.pointer_sample(sample, now),
            VisionMessage::GridConfirmation(sample) => {
                if self.phase == PhaseState::Combat && sample.valid {
                    let position = self.viewport.to_world(sample.x, sample.y);
                    self.events.push(PhaseEvent::PlacementConfirmed { position });
                }
            }
            VisionMessage::CameraInfo(info) => {
                debug!("Camera resolution {}x{}", info.width, info.height);
                self.viewport = self
                    .viewport
                    .with_image_size(info.width as f32, info.height as f32);
            }
            VisionMessage::CameraList(list) => self.events.push(PhaseEvent::CamerasAvailable {
                cameras: list.available_cameras.clone(),
            }),
            VisionMessage::FingerCount(fc) => {
                self.events.push(PhaseEvent::FingerCount { count: fc.count })
            }
            VisionMessage::ServerStatus(status) => debug!("Backend status: {}", status.status),
            VisionMessage::CameraFrame(_) | VisionMessage::SwitchCameraRequest(_) => {}
        }
    }

    fn pointer_sample(&mut self, sample: &GridPosition, now: Instant) {
        if self.phase != PhaseState::Combat {
            return;
        }
        let position = self.viewport.to_world(sample.x, sample.y);
        self.pointer.update(position, sample.valid, now);
        self.events.push(PhaseEvent::PointerMoved {
            position,
            valid: sample.valid,
        });
    }

    fn fail_scan(&mut self, message: String, code: i32, now: Instant) {
        // Any backend error clears the pending request so a retry is possible.
        self.pending = None;
        warn!("Vision backend error {}: {}", code, message);
        self.raise_status(format!("Scan failed: {}", message), now);
        self.events.push(PhaseEvent::ScanFailed { message, code });
    }

    /// The vision connection closed or faulted: any pending request is
    /// treated as timed out.
    pub fn connection_lost(&mut self, now: Instant) {
        if self.pending.take().is_some() {
            warn!("Connection lost with a request pending – treating as timeout");
            self.raise_status("Vision service disconnected".into(), now);
            self.events.push(PhaseEvent::ScanTimedOut);
        }
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    pub fn tick(&mut self, now: Instant) {
        if let Some(pending) = self.pending {
            if now >= pending.timeout_at {
                warn!(
                    "'{}' timed out after {:?}",
                    pending.command,
                    now.saturating_duration_since(pending.issued_at)
                );
                self.pending = None;
                self.raise_status("Scan timed out – try again".into(), now);
                self.events.push(PhaseEvent::ScanTimedOut);
            }
        }

        if self.pointer.expire(now) {
            self.events.push(PhaseEvent::PointerHidden);
        }

        if matches!(&self.status, Some(s) if now >= s.expires_at) {
            self.status = None;
        }
    }

    fn raise_status(&mut self, message: String, now: Instant) {
        self.status = Some(StatusBanner {
            message,
            expires_at: deadline_after(now, Duration::from_millis(self.config.status_ms)),
        });
    }

    pub fn dismiss_status(&mut self) {
        self.status = None;
    }

    /// Scene reset: back to an empty Planning phase.
    pub fn reset(&mut self) {
        self.pending = None;
        self.path = None;
        self.status = None;
        self.pointer.clear();
        if self.phase == PhaseState::Combat {
            self.exit_combat();
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn take_events(&mut self) -> Vec<PhaseEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn phase(&self) -> PhaseState {
        self.phase
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    fn scan_pending(&self) -> bool {
        matches!(
            self.pending,
            Some(PendingRequest {
                command: PhaseCommand::BeginPlanningScan,
                ..
            })
        )
    }

    /// World-space path from the most recent successful scan.
    pub fn path(&self) -> Option<&WorldPath> {
        self.path.as_ref()
    }

    pub fn pointer(&self) -> Option<&PointerSample> {
        self.pointer.current()
    }

    pub fn status(&self) -> Option<&StatusBanner> {
        self.status.as_ref()
    }

    pub fn viewport(&self) -> &ViewportMapping {
        &self.viewport
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
