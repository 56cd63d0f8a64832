//! Peer replication.
//!
//! The authority peer relays state deltas to the mirror peer as
//! [`RemoteCall`]s over a [`SessionChannel`].  Delivery is at-most-once with
//! no ordering across kinds; the mirror applies calls last-write-wins in
//! [`MirrorState`].  A lost delta stays lost unless periodic resync is
//! enabled (`replication.resync_ms`).
//!
//! Authority-only calls made on a mirror are dropped silently.
//!
//! The authority announces its full snapshot on its first tick, and again on
//! every resync, read from live game state.

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::{PhaseState, SessionRole, TurretInfo};

// ---------------------------------------------------------------------------
// Wire surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcScope {
    /// Every peer, including the sender.
    All,
    /// Every peer except the sender.
    Others,
}

/// One remote call.  JSON form: `{"method": "gold_update", "args": {"gold": 150}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum RemoteCall {
    PhaseChange {
        command: String,
    },
    TurretSelect {
        index: i32,
    },
    ProgressUpdate {
        step: String,
        progress: f32,
    },
    Complete,
    Error {
        message: String,
        code: i32,
    },
    GoldUpdate {
        gold: i32,
    },
    HealthUpdate {
        current: i32,
        max: i32,
    },
    WaveUpdate {
        wave: i32,
    },
    BaseDestroyed,
    MonsterDeath,
    TurretInfo {
        name: String,
        cost: i32,
        damage: f32,
        range: f32,
        level: u32,
    },
    TurretCleared,
}

impl RemoteCall {
    pub fn method(&self) -> &'static str {
        match self {
            RemoteCall::PhaseChange { .. } => "phase_change",
            RemoteCall::TurretSelect { .. } => "turret_select",
            RemoteCall::ProgressUpdate { .. } => "progress_update",
            RemoteCall::Complete => "complete",
            RemoteCall::Error { .. } => "error",
            RemoteCall::GoldUpdate { .. } => "gold_update",
            RemoteCall::HealthUpdate { .. } => "health_update",
            RemoteCall::WaveUpdate { .. } => "wave_update",
            RemoteCall::BaseDestroyed => "base_destroyed",
            RemoteCall::MonsterDeath => "monster_death",
            RemoteCall::TurretInfo { .. } => "turret_info",
            RemoteCall::TurretCleared => "turret_cleared",
        }
    }

    pub fn scope(&self) -> RpcScope {
        match self {
            RemoteCall::PhaseChange { .. } | RemoteCall::TurretSelect { .. } => RpcScope::All,
            _ => RpcScope::Others,
        }
    }

    /// Turret selection is the only call either peer may make.
    pub fn is_authority_only(&self) -> bool {
        !matches!(self, RemoteCall::TurretSelect { .. })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Seam to the lobby/session layer that actually moves calls between peers.
pub trait SessionChannel {
    fn send(&mut self, scope: RpcScope, call: RemoteCall);

    /// Calls delivered since the last receive, in arrival order.
    fn receive(&mut self) -> Vec<RemoteCall>;
}

// ---------------------------------------------------------------------------
// In-process hub
// ---------------------------------------------------------------------------

type Inbox = Arc<Mutex<VecDeque<String>>>;

/// One end of an in-process two-peer session.  Calls travel as JSON text.
pub struct LocalHub {
    inbox: Inbox,
    peer: Inbox,
    drop_every: Option<u32>,
    sent_to_peer: u32,
}

impl LocalHub {
    pub fn pair() -> (LocalHub, LocalHub) {
        Self::build(None)
    }

    /// Like [`LocalHub::pair`], but every `drop_every`-th delivery to the
    /// other peer is lost.  Deliveries to self are never lost.
    pub fn pair_lossy(drop_every: u32) -> (LocalHub, LocalHub) {
        Self::build(Some(drop_every.max(1)))
    }

    fn build(drop_every: Option<u32>) -> (LocalHub, LocalHub) {
        let a: Inbox = Arc::new(Mutex::new(VecDeque::new()));
        let b: Inbox = Arc::new(Mutex::new(VecDeque::new()));
        (
            LocalHub {
                inbox: a.clone(),
                peer: b.clone(),
                drop_every,
                sent_to_peer: 0,
            },
            LocalHub {
                inbox: b,
                peer: a,
                drop_every,
                sent_to_peer: 0,
            },
        )
    }

    fn lose_next(&mut self) -> bool {
        self.sent_to_peer += 1;
        matches!(self.drop_every, Some(n) if self.sent_to_peer % n == 0)
    }
}

impl SessionChannel for LocalHub {
    fn send(&mut self, scope: RpcScope, call: RemoteCall) {
        let text = match call.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode remote call {}: {}", call.method(), e);
                return;
            }
        };
        if scope == RpcScope::All {
            self.inbox.lock().push_back(text.clone());
        }
        if self.lose_next() {
            debug!("Remote call {} lost in transit", call.method());
            return;
        }
        self.peer.lock().push_back(text);
    }

    fn receive(&mut self) -> Vec<RemoteCall> {
        let drained: Vec<String> = self.inbox.lock().drain(..).collect();
        drained
            .iter()
            .filter_map(|text| match RemoteCall::decode(text) {
                Ok(call) => Some(call),
                Err(e) => {
                    warn!("Dropping undecodable remote call: {}", e);
                    None
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedSnapshot {
    pub gold: i32,
    pub health: i32,
    pub max_health: i32,
    pub wave_number: i32,
    pub selected_turret: Option<TurretInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Re-send the full snapshot this often.  Unset: deltas only.
    pub resync_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

pub struct Replicator {
    role: SessionRole,
    channel: Box<dyn SessionChannel>,
    /// Last values sent.
    sent: ReplicatedSnapshot,
    resync: Option<Duration>,
    last_resync: Option<Instant>,
}

impl Replicator {
    pub fn new(role: SessionRole, channel: Box<dyn SessionChannel>, config: &ReplicationConfig) -> Self {
        Self {
            role,
            channel,
            sent: ReplicatedSnapshot::default(),
            resync: config.resync_ms.map(Duration::from_millis),
            last_resync: None,
        }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Send `call` in its own scope.  Returns whether anything was sent.
    pub fn emit(&mut self, call: RemoteCall) -> bool {
        if call.is_authority_only() && !self.role.is_authority() {
            debug!("Mirror ignoring authority-only {}", call.method());
            return false;
        }
        self.channel.send(call.scope(), call);
        true
    }

    pub fn broadcast_phase_change(&mut self, command: &str) -> bool {
        self.emit(RemoteCall::PhaseChange {
            command: command.to_string(),
        })
    }

    pub fn broadcast_turret_select(&mut self, index: i32) -> bool {
        self.emit(RemoteCall::TurretSelect { index })
    }

    pub fn broadcast_progress_update(&mut self, step: &str, progress: f32) -> bool {
        self.emit(RemoteCall::ProgressUpdate {
            step: step.to_string(),
            progress,
        })
    }

    pub fn broadcast_complete(&mut self) -> bool {
        self.emit(RemoteCall::Complete)
    }

    pub fn broadcast_error(&mut self, message: &str, code: i32) -> bool {
        self.emit(RemoteCall::Error {
            message: message.to_string(),
            code,
        })
    }

    pub fn broadcast_gold_update(&mut self, gold: i32) -> bool {
        let sent = self.emit(RemoteCall::GoldUpdate { gold });
        if sent {
            self.sent.gold = gold;
        }
        sent
    }

    pub fn broadcast_health_update(&mut self, current: i32, max: i32) -> bool {
        let sent = self.emit(RemoteCall::HealthUpdate { current, max });
        if sent {
            self.sent.health = current;
            self.sent.max_health = max;
        }
        sent
    }

    pub fn broadcast_wave_update(&mut self, wave: i32) -> bool {
        let sent = self.emit(RemoteCall::WaveUpdate { wave });
        if sent {
            self.sent.wave_number = wave;
        }
        sent
    }

    pub fn broadcast_base_destroyed(&mut self) -> bool {
        self.emit(RemoteCall::BaseDestroyed)
    }

    pub fn broadcast_monster_death(&mut self) -> bool {
        self.emit(RemoteCall::MonsterDeath)
    }

    pub fn broadcast_turret_info(
        &mut self,
        name: &str,
        cost: i32,
        damage: f32,
        range: f32,
        level: u32,
    ) -> bool {
        let sent = self.emit(RemoteCall::TurretInfo {
            name: name.to_string(),
            cost,
            damage,
            range,
            level,
        });
        if sent {
            self.sent.selected_turret = Some(TurretInfo::new(name, cost, damage, range, level));
        }
        sent
    }

    pub fn broadcast_turret_cleared(&mut self) -> bool {
        let sent = self.emit(RemoteCall::TurretCleared);
        if sent {
            self.sent.selected_turret = None;
        }
        sent
    }

    /// Calls received from the other peer (and `All`-scoped calls of our own).
    pub fn receive(&mut self) -> Vec<RemoteCall> {
        self.channel.receive()
    }

    /// Announce `live` on the first tick, then re-send it every resync
    /// interval.  Returns whether a snapshot went out.
    pub fn tick(&mut self, now: Instant, live: &ReplicatedSnapshot) -> bool {
        if !self.role.is_authority() {
            return false;
        }
        let due = match (self.last_resync, self.resync) {
            (None, _) => true,
            (Some(last), Some(interval)) => now.saturating_duration_since(last) >= interval,
            (Some(_), None) => false,
        };
        if !due {
            return false;
        }
        self.last_resync = Some(now);
        self.resync_now(live);
        true
    }

    /// Send every field of `live`.
    pub fn resync_now(&mut self, live: &ReplicatedSnapshot) {
        debug!("Resyncing snapshot to peer");
        self.broadcast_gold_update(live.gold);
        self.broadcast_health_update(live.health, live.max_health);
        self.broadcast_wave_update(live.wave_number);
        match &live.selected_turret {
            Some(t) => self.broadcast_turret_info(&t.name, t.cost, t.damage, t.range, t.level),
            None => self.broadcast_turret_cleared(),
        };
    }

    /// Values most recently sent.
    pub fn sent_snapshot(&self) -> &ReplicatedSnapshot {
        &self.sent
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// What a mirror knows about the authority's game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorState {
    pub snapshot: ReplicatedSnapshot,
    pub phase: PhaseState,
    pub selected_index: Option<i32>,
    pub progress: Option<(String, f32)>,
    pub last_error: Option<(String, i32)>,
    pub path_ready: bool,
    pub base_destroyed: bool,
    pub monster_deaths: u64,
}

impl MirrorState {
    /// Apply one relayed call.  Returns `false` for calls that changed
    /// nothing (e.g. a phase change to the current phase).
    pub fn apply(&mut self, call: &RemoteCall) -> bool {
        match call {
            RemoteCall::PhaseChange { command } => {
                let next = match command.as_str() {
                    crate::protocol::commands::ENTER_COMBAT => PhaseState::Combat,
                    crate::protocol::commands::EXIT_COMBAT => PhaseState::Planning,
                    _ => return false,
                };
                if next == self.phase {
                    return false;
                }
                self.phase = next;
            }
            RemoteCall::TurretSelect { index } => self.selected_index = Some(*index),
            RemoteCall::ProgressUpdate { step, progress } => {
                self.progress = Some((step.clone(), *progress));
                self.path_ready = false;
            }
            RemoteCall::Complete => {
                self.progress = None;
                self.path_ready = true;
            }
            RemoteCall::Error { message, code } => {
                self.progress = None;
                self.last_error = Some((message.clone(), *code));
            }
            RemoteCall::GoldUpdate { gold } => self.snapshot.gold = *gold,
            RemoteCall::HealthUpdate { current, max } => {
                self.snapshot.health = *current;
                self.snapshot.max_health = *max;
            }
            RemoteCall::WaveUpdate { wave } => self.snapshot.wave_number = *wave,
            RemoteCall::BaseDestroyed => self.base_destroyed = true,
            RemoteCall::MonsterDeath => self.monster_deaths += 1,
            RemoteCall::TurretInfo {
                name,
                cost,
                damage,
                range,
                level,
            } => {
                self.snapshot.selected_turret =
                    Some(TurretInfo::new(name.clone(), *cost, *damage, *range, *level));
            }
            RemoteCall::TurretCleared => {
                if self.snapshot.selected_turret.take().is_none() {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_call_json_shape() {
        let text = RemoteCall::GoldUpdate { gold: 150 }.encode().unwrap();
        assert_eq!(text, r#"{"method":"gold_update","args":{"gold":150}}"#);

        let unit = RemoteCall::decode(r#"{"method":"complete"}"#).unwrap();
        assert_eq!(unit, RemoteCall::Complete);
    }

    #[test]
    fn all_scope_reaches_sender_too() {
        let (mut a, mut b) = LocalHub::pair();
        a.send(RpcScope::All, RemoteCall::TurretSelect { index: 2 });
        a.send(RpcScope::Others, RemoteCall::Complete);

        assert_eq!(a.receive(), vec![RemoteCall::TurretSelect { index: 2 }]);
        assert_eq!(
            b.receive(),
            vec![RemoteCall::TurretSelect { index: 2 }, RemoteCall::Complete]
        );
    }

    #[test]
    fn lossy_hub_drops_every_nth() {
        let (mut a, mut b) = LocalHub::pair_lossy(2);
        for gold in [10, 20, 30, 40] {
            a.send(RpcScope::Others, RemoteCall::GoldUpdate { gold });
        }
        assert_eq!(
            b.receive(),
            vec![
                RemoteCall::GoldUpdate { gold: 10 },
                RemoteCall::GoldUpdate { gold: 30 }
            ]
        );
    }

    fn live(gold: i32) -> ReplicatedSnapshot {
        ReplicatedSnapshot {
            gold,
            health: 20,
            max_health: 20,
            wave_number: 0,
            selected_turret: None,
        }
    }

    #[test]
    fn first_tick_announces_then_resync_sends_live_values() {
        let (hub, mut peer) = LocalHub::pair();
        let mut rep = Replicator::new(
            SessionRole::Authority,
            Box::new(hub),
            &ReplicationConfig {
                resync_ms: Some(1_000),
            },
        );
        let t0 = Instant::now();

        assert!(rep.tick(t0, &live(200)));
        let announced = peer.receive();
        assert!(announced.contains(&RemoteCall::GoldUpdate { gold: 200 }));
        assert!(announced.contains(&RemoteCall::HealthUpdate { current: 20, max: 20 }));
        assert_eq!(announced.len(), 4);
        assert_eq!(rep.sent_snapshot(), &live(200));

        assert!(!rep.tick(t0 + Duration::from_millis(999), &live(75)));
        assert!(rep.tick(t0 + Duration::from_millis(1_000), &live(75)));
        let resent = peer.receive();
        assert!(resent.contains(&RemoteCall::GoldUpdate { gold: 75 }));
        assert_eq!(rep.sent_snapshot().gold, 75);
    }

    #[test]
    fn without_resync_only_the_first_tick_sends() {
        let (hub, mut peer) = LocalHub::pair();
        let mut rep = Replicator::new(
            SessionRole::Authority,
            Box::new(hub),
            &ReplicationConfig::default(),
        );
        let t0 = Instant::now();
        assert!(rep.tick(t0, &live(200)));
        assert!(!rep.tick(t0 + Duration::from_secs(3_600), &live(200)));
        assert_eq!(peer.receive().len(), 4);
    }

    #[test]
    fn mirror_clears_selected_turret() {
        let mut mirror = MirrorState::default();
        mirror.apply(&RemoteCall::TurretInfo {
            name: "Cannon".into(),
            cost: 120,
            damage: 35.0,
            range: 6.0,
            level: 1,
        });
        assert!(mirror.apply(&RemoteCall::TurretCleared));
        assert!(mirror.snapshot.selected_turret.is_none());
        assert!(!mirror.apply(&RemoteCall::TurretCleared));
    }

    #[test]
    fn mirror_applies_last_write() {
        let mut mirror = MirrorState::default();
        mirror.apply(&RemoteCall::GoldUpdate { gold: 10 });
        mirror.apply(&RemoteCall::GoldUpdate { gold: 5 });
        assert_eq!(mirror.snapshot.gold, 5);

        assert!(mirror.apply(&RemoteCall::PhaseChange {
            command: "enter-combat".into()
        }));
        assert!(!mirror.apply(&RemoteCall::PhaseChange {
            command: "enter-combat".into()
        }));
        assert_eq!(mirror.phase, PhaseState::Combat);
    }
}
