//! Session – the per-process context object that owns every component and
//! runs them in a fixed order once per tick.
//!
//! ```text
//! tick(now)
//!   1. reconnect vision / gesture streams that are down (bounded interval)
//!   2. pump ≤ max_batch events per stream → PhaseController
//!   3. drain remote calls               → PhaseController / GameState / MirrorState
//!   4. PhaseController::tick            (timeouts, pointer staleness)
//!   5. phase events                     → scheduler, replication, presentation
//!   6. WaveScheduler::tick              → GameState → replication
//!   7. Replicator::tick                 (first-tick announce, optional resync)
//! ```
//!
//! The authority owns the vision client and the scheduler; a mirror owns
//! neither and only applies what the authority relays.  The role never
//! changes after construction.
//!
//! Calls with scope `All` (phase change, turret select) come back to the
//! sender as well.  Turret selection is applied on receipt on both peers.
//! Phase changes are applied locally by the authority before broadcasting,
//! so the authority ignores the echo.  Combat transitions are relayed from
//! the phase events themselves, so every path into or out of Combat
//! (including a reset) reaches the mirror.

use log::{debug, info, warn};
use std::time::Instant;

use crate::config::ClientConfig;
use crate::error::{CommandError, TransportError};
use crate::phase::{PhaseCommand, PhaseController, PhaseEvent, TIMEOUT_ERROR_CODE};
use crate::protocol::commands;
use crate::replication::{MirrorState, RemoteCall, Replicator, SessionChannel};
use crate::state::{GameState, StateChange};
use crate::transport::{ConnectionState, TransportEvent, VisionClient};
use crate::types::{PhaseState, SessionRole, TurretInfo, Vec3};
use crate::waves::{MonsterOutcome, WaveEvent, WaveScheduler};

// ---------------------------------------------------------------------------
// Presentation seam
// ---------------------------------------------------------------------------

/// Rendering / UI observer.  Every method defaults to doing nothing.
pub trait Presentation {
    fn connection(&mut self, _state: ConnectionState) {}
    fn phase_event(&mut self, _event: &PhaseEvent) {}
    fn wave_event(&mut self, _event: &WaveEvent) {}
    fn state_change(&mut self, _change: &StateChange) {}
    fn turret_placed(&mut self, _turret: &TurretInfo, _position: Vec3) {}
    /// A relayed call; `mirror` already reflects it on a mirror peer.
    fn remote_call(&mut self, _call: &RemoteCall, _mirror: &MirrorState) {}
}

pub struct NullPresentation;

impl Presentation for NullPresentation {}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    role: SessionRole,
    config: ClientConfig,
    vision: Option<VisionClient>,
    phase: PhaseController,
    replicator: Replicator,
    scheduler: Option<WaveScheduler>,
    state: GameState,
    mirror: MirrorState,
    presentation: Box<dyn Presentation>,
    last_reconnect: Option<Instant>,
    last_finger_count: Option<u32>,
}

impl Session {
    pub fn authority(
        config: ClientConfig,
        vision: VisionClient,
        channel: Box<dyn SessionChannel>,
        presentation: Box<dyn Presentation>,
    ) -> Self {
        let scheduler = WaveScheduler::new(config.waves.clone());
        Self::build(
            SessionRole::Authority,
            config,
            Some(vision),
            Some(scheduler),
            channel,
            presentation,
        )
    }

    pub fn mirror(
        config: ClientConfig,
        channel: Box<dyn SessionChannel>,
        presentation: Box<dyn Presentation>,
    ) -> Self {
        Self::build(SessionRole::Mirror, config, None, None, channel, presentation)
    }

    fn build(
        role: SessionRole,
        config: ClientConfig,
        vision: Option<VisionClient>,
        scheduler: Option<WaveScheduler>,
        channel: Box<dyn SessionChannel>,
        presentation: Box<dyn Presentation>,
    ) -> Self {
        info!("Session created as {:?}", role);
        Self {
            role,
            phase: PhaseController::new(config.phase.clone()),
            replicator: Replicator::new(role, channel, &config.replication),
            state: GameState::new(config.economy.clone()),
            mirror: MirrorState::default(),
            config,
            vision,
            scheduler,
            presentation,
            last_reconnect: None,
            last_finger_count: None,
        }
    }

    // -----------------------------------------------------------------------
    // Player actions
    // -----------------------------------------------------------------------

    /// Issue a phase command (authority only) and relay it to the mirror.
    pub fn request_phase_change(
        &mut self,
        command: PhaseCommand,
        now: Instant,
    ) -> Result<(), CommandError> {
        if !self.role.is_authority() {
            return Err(CommandError::NotAuthority {
                command: command.as_wire(),
            });
        }
        let vision = self.vision.as_mut().ok_or(TransportError::NotOpen {
            state: ConnectionState::Closed.name(),
        })?;
        self.phase.request(command, vision, now)?;
        if command == PhaseCommand::BeginPlanningScan {
            self.replicator.broadcast_phase_change(command.as_wire());
        }
        self.handle_phase_events(now);
        Ok(())
    }

    /// Select a turret by panel index.  Either peer may call this; the
    /// selection takes effect when the broadcast comes back.
    pub fn select_turret(&mut self, index: i32) {
        self.replicator.broadcast_turret_select(index);
    }

    /// Report that a live monster died or reached the end of the path.
    pub fn monster_resolved(&mut self, id: u64, outcome: MonsterOutcome, now: Instant) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            debug!("Mirror ignoring monster resolution");
            return;
        };
        let events = scheduler.monster_resolved(id, outcome, now);
        self.apply_wave_events(events);
    }

    pub fn switch_camera(&mut self, index: u32) -> Result<(), TransportError> {
        match self.vision.as_mut() {
            Some(vision) => vision.switch_camera(index),
            None => Err(TransportError::NotOpen {
                state: ConnectionState::Closed.name(),
            }),
        }
    }

    /// Back to a fresh Planning phase with a fresh economy.
    pub fn reset(&mut self, now: Instant) {
        info!("Session reset");
        self.phase.reset();
        if let Some(scheduler) = self.scheduler.as_mut() {
            let events = scheduler.reset();
            self.apply_wave_events(events);
        }
        self.mirror = MirrorState::default();
        self.last_finger_count = None;
        if self.role.is_authority() {
            let changes = self.state.reset();
            self.apply_state_changes(changes);
        }
        self.handle_phase_events(now);
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub fn tick(&mut self, now: Instant) {
        self.maintain_connection(now);
        self.pump_vision(now);
        self.handle_remote_calls();
        self.phase.tick(now);
        self.handle_phase_events(now);
        self.advance_waves(now);
        let live = self.state.snapshot();
        self.replicator.tick(now, &live);
    }

    fn maintain_connection(&mut self, now: Instant) {
        let Some(vision) = self.vision.as_mut() else {
            return;
        };
        let vision_down = vision.state().is_down() && vision.can_reconnect();
        let gesture_down = vision.gesture_state().is_down() && vision.can_reconnect_gesture();
        if !vision_down && !gesture_down {
            return;
        }
        let interval = self.config.transport.reconnect_interval();
        if let Some(last) = self.last_reconnect {
            if now.saturating_duration_since(last) < interval {
                return;
            }
        }
        self.last_reconnect = Some(now);
        if vision_down {
            if let Err(e) = vision.reconnect() {
                warn!("Vision reconnect failed: {}", e);
            }
        }
        if gesture_down {
            if let Err(e) = vision.reconnect_gesture() {
                warn!("Gesture reconnect failed: {}", e);
            }
        }
    }

    fn pump_vision(&mut self, now: Instant) {
        let Some(vision) = self.vision.as_mut() else {
            return;
        };
        let events = vision.pump(self.config.transport.max_batch);
        for event in events {
            match event {
                TransportEvent::Opened => self.presentation.connection(ConnectionState::Open),
                TransportEvent::Message(msg) => self.phase.handle_message(&msg, now),
                TransportEvent::Closed { .. } => {
                    self.phase.connection_lost(now);
                    self.presentation.connection(ConnectionState::Closed);
                }
                TransportEvent::Faulted { .. } => {
                    self.phase.connection_lost(now);
                    self.presentation.connection(ConnectionState::Faulted);
                }
            }
        }
    }

    fn handle_remote_calls(&mut self) {
        for call in self.replicator.receive() {
            match (&call, self.role) {
                (RemoteCall::PhaseChange { .. }, SessionRole::Authority) => {
                    debug!("Ignoring own phase change echo");
                }
                (RemoteCall::PhaseChange { command }, SessionRole::Mirror) => {
                    match command.parse::<PhaseCommand>() {
                        Ok(cmd) => self.phase.apply_relayed(cmd),
                        Err(e) => warn!("Relayed phase change rejected: {}", e),
                    }
                }
                (RemoteCall::TurretSelect { index }, SessionRole::Authority) => {
                    let changes = self.state.select_turret(*index);
                    self.apply_state_changes(changes);
                }
                _ => {}
            }
            if !self.role.is_authority() {
                self.mirror.apply(&call);
            }
            self.presentation.remote_call(&call, &self.mirror);
        }
    }

    fn handle_phase_events(&mut self, now: Instant) {
        for event in self.phase.take_events() {
            match &event {
                PhaseEvent::ScanProgress { step, progress } => {
                    self.replicator.broadcast_progress_update(step, *progress);
                }
                PhaseEvent::PlanningComplete { .. } => {
                    self.replicator.broadcast_complete();
                }
                PhaseEvent::ScanFailed { message, code } => {
                    self.replicator.broadcast_error(message, *code);
                }
                PhaseEvent::ScanTimedOut => {
                    self.replicator
                        .broadcast_error("Scan timed out", TIMEOUT_ERROR_CODE);
                }
                PhaseEvent::CombatStarted { path } => {
                    if self.role.is_authority() {
                        self.replicator
                            .broadcast_phase_change(commands::ENTER_COMBAT);
                    }
                    if let Some(scheduler) = self.scheduler.as_mut() {
                        let events = match path {
                            Some(path) => scheduler.start(path.clone(), now).1,
                            None => {
                                warn!("Combat started without a planned path – no waves");
                                Vec::new()
                            }
                        };
                        self.apply_wave_events(events);
                    }
                }
                PhaseEvent::CombatEnded { .. } => {
                    if self.role.is_authority() {
                        self.replicator
                            .broadcast_phase_change(commands::EXIT_COMBAT);
                    }
                    if let Some(scheduler) = self.scheduler.as_mut() {
                        let events = scheduler.stop_all_waves();
                        self.apply_wave_events(events);
                    }
                }
                PhaseEvent::PlacementConfirmed { position } => self.place_turret(*position),
                PhaseEvent::FingerCount { count } if self.role.is_authority() => {
                    self.finger_count(*count);
                }
                _ => {}
            }
            self.presentation.phase_event(&event);
        }
    }

    /// The selector's hand: one finger selects the first turret.  Samples
    /// stream continuously, so only a changed count during Combat selects.
    fn finger_count(&mut self, count: u32) {
        if self.phase.phase() != PhaseState::Combat || self.last_finger_count == Some(count) {
            return;
        }
        self.last_finger_count = Some(count);
        if count > 0 {
            self.select_turret(i32::try_from(count - 1).unwrap_or(i32::MAX));
        }
    }

    fn place_turret(&mut self, position: Vec3) {
        if !self.role.is_authority() {
            return;
        }
        let Some(turret) = self.state.selected_turret().cloned() else {
            debug!("Placement at {} ignored: no turret selected", position);
            return;
        };
        match self.state.try_spend(turret.cost) {
            Some(changes) => {
                info!("Placing '{}' at {}", turret.name, position);
                self.apply_state_changes(changes);
                self.presentation.turret_placed(&turret, position);
            }
            None => info!(
                "Cannot afford '{}' ({} gold, have {})",
                turret.name,
                turret.cost,
                self.state.gold()
            ),
        }
    }

    fn advance_waves(&mut self, now: Instant) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            let events = scheduler.tick(now);
            self.apply_wave_events(events);
        }
    }

    fn apply_wave_events(&mut self, events: Vec<WaveEvent>) {
        for event in events {
            let changes = match &event {
                WaveEvent::WaveStarted { wave_number, .. } => self.state.set_wave(*wave_number),
                WaveEvent::MonsterResolved {
                    monster,
                    outcome: MonsterOutcome::Killed,
                } => {
                    self.replicator.broadcast_monster_death();
                    self.state.award_kill(monster.reward)
                }
                WaveEvent::MonsterResolved {
                    monster,
                    outcome: MonsterOutcome::ReachedEnd,
                } => self.state.damage_base(monster.damage),
                _ => Vec::new(),
            };
            self.presentation.wave_event(&event);
            self.apply_state_changes(changes);
        }
    }

    fn apply_state_changes(&mut self, changes: Vec<StateChange>) {
        for change in changes {
            match &change {
                StateChange::Gold(gold) => {
                    self.replicator.broadcast_gold_update(*gold);
                }
                StateChange::Health { current, max } => {
                    self.replicator.broadcast_health_update(*current, *max);
                }
                StateChange::Wave(wave) => {
                    self.replicator.broadcast_wave_update(*wave as i32);
                }
                StateChange::TurretSelected(Some(t)) => {
                    self.replicator
                        .broadcast_turret_info(&t.name, t.cost, t.damage, t.range, t.level);
                }
                StateChange::TurretSelected(None) => {
                    self.replicator.broadcast_turret_cleared();
                }
                StateChange::BaseDestroyed => {
                    self.replicator.broadcast_base_destroyed();
                    if let Some(scheduler) = self.scheduler.as_mut() {
                        for event in scheduler.stop_all_waves() {
                            self.presentation.wave_event(&event);
                        }
                    }
                }
            }
            self.presentation.state_change(&change);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn phase_state(&self) -> PhaseState {
        self.phase.phase()
    }

    pub fn phase(&self) -> &PhaseController {
        &self.phase
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn mirror_state(&self) -> &MirrorState {
        &self.mirror
    }

    pub fn scheduler(&self) -> Option<&WaveScheduler> {
        self.scheduler.as_ref()
    }

    pub fn vision(&self) -> Option<&VisionClient> {
        self.vision.as_ref()
    }

    pub fn vision_mut(&mut self) -> Option<&mut VisionClient> {
        self.vision.as_mut()
    }

    pub fn replicator_mut(&mut self) -> &mut Replicator {
        &mut self.replicator
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
