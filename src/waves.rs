//! Wave / spawn scheduler (authority only).
//!
//! Wave definitions are played in a cycle.  Every spawn of a wave is queued
//! up-front as a [`SpawnTask`] in a min-heap keyed by due time; [`WaveScheduler::tick`]
//! pops whatever is due.  The break between waves is a task in the same heap,
//! so [`WaveScheduler::stop_all_waves`] cancels everything by clearing one
//! queue.
//!
//! Difficulty: each time the definition list wraps, `difficulty_tier` grows
//! by one and spawned monsters get
//! `health = base_health * health_multiplier^tier` and
//! `speed = base_speed * speed_multiplier^tier`.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::{Duration, Instant};

use crate::types::{deadline_after, WorldPath};

// ---------------------------------------------------------------------------
// Definitions & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWave {
    pub monster_kind: String,
    pub count: u32,
    /// Wait before the first monster of this subwave.
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveDefinition {
    pub name: String,
    pub subwaves: Vec<SubWave>,
}

impl WaveDefinition {
    pub fn monster_count(&self) -> u32 {
        self.subwaves.iter().map(|s| s.count).sum()
    }
}

/// Base stats for one monster kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterArchetype {
    pub kind: String,
    pub base_health: f32,
    pub base_speed: f32,
    /// Gold awarded when killed.
    pub reward: i32,
    /// Base damage when it reaches the end of the path.
    pub damage: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub definitions: Vec<WaveDefinition>,
    pub monsters: Vec<MonsterArchetype>,
    pub health_multiplier: f32,
    pub speed_multiplier: f32,
    /// Spacing between consecutive monsters of a subwave.
    pub spawn_interval_ms: u64,
    /// Break between a cleared wave and the next one.
    pub inter_wave_delay_ms: u64,
}

impl WaveConfig {
    pub fn archetype(&self, kind: &str) -> Option<&MonsterArchetype> {
        self.monsters.iter().find(|m| m.kind == kind)
    }
}

impl Default for WaveConfig {
    fn default() -> Self {
        let sub = |kind: &str, count, delay_ms| SubWave {
            monster_kind: kind.into(),
            count,
            delay_ms,
        };
        Self {
            definitions: vec![
                WaveDefinition {
                    name: "Scouts".into(),
                    subwaves: vec![sub("runner", 5, 0)],
                },
                WaveDefinition {
                    name: "Vanguard".into(),
                    subwaves: vec![sub("runner", 4, 0), sub("brute", 2, 2_000)],
                },
                WaveDefinition {
                    name: "Siege".into(),
                    subwaves: vec![sub("brute", 4, 0), sub("runner", 6, 1_500)],
                },
            ],
            monsters: vec![
                MonsterArchetype {
                    kind: "runner".into(),
                    base_health: 40.0,
                    base_speed: 2.5,
                    reward: 10,
                    damage: 1,
                },
                MonsterArchetype {
                    kind: "brute".into(),
                    base_health: 150.0,
                    base_speed: 1.2,
                    reward: 25,
                    damage: 3,
                },
            ],
            health_multiplier: 1.5,
            speed_multiplier: 1.1,
            spawn_interval_ms: 800,
            inter_wave_delay_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveRunState {
    /// 1-based count of waves started this session (0 = none yet).
    pub wave_number: u32,
    pub definition_index: usize,
    pub difficulty_tier: u32,
    pub monsters_alive: u32,
    pub in_progress: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monster {
    pub id: u64,
    pub kind: String,
    pub health: f32,
    pub speed: f32,
    pub reward: i32,
    pub damage: i32,
    pub wave_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonsterOutcome {
    Killed,
    ReachedEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaveEvent {
    WaveStarted {
        wave_number: u32,
        name: String,
        tier: u32,
    },
    MonsterSpawned {
        monster: Monster,
    },
    MonsterResolved {
        monster: Monster,
        outcome: MonsterOutcome,
    },
    /// Removed by `stop_all_waves` without dying or arriving.
    MonsterDespawned {
        id: u64,
    },
    WaveCompleted {
        wave_number: u32,
    },
    CycleCompleted {
        tier: u32,
    },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpawnAction {
    Spawn { monster_kind: String },
    StartNextWave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SpawnTask {
    due: Instant,
    seq: u64,
    action: SpawnAction,
}

impl Ord for SpawnTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for SpawnTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stats for `archetype` at difficulty `tier`.
pub fn scaled_stats(
    archetype: &MonsterArchetype,
    tier: u32,
    health_multiplier: f32,
    speed_multiplier: f32,
) -> (f32, f32) {
    let exp = tier as i32;
    (
        archetype.base_health * health_multiplier.powi(exp),
        archetype.base_speed * speed_multiplier.powi(exp),
    )
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct WaveScheduler {
    config: WaveConfig,
    run: WaveRunState,
    path: Option<WorldPath>,
    queue: BinaryHeap<Reverse<SpawnTask>>,
    live: BTreeMap<u64, Monster>,
    /// Spawn tasks of the current wave not yet popped.
    spawns_remaining: u32,
    next_seq: u64,
    next_monster_id: u64,
}

impl WaveScheduler {
    pub fn new(config: WaveConfig) -> Self {
        Self {
            config,
            run: WaveRunState::default(),
            path: None,
            queue: BinaryHeap::new(),
            live: BTreeMap::new(),
            spawns_remaining: 0,
            next_seq: 0,
            next_monster_id: 1,
        }
    }

    /// Begin (or resume) the wave cycle along `path`.  The first wave starts
    /// immediately.  Returns `false` when nothing can run.
    pub fn start(&mut self, path: WorldPath, now: Instant) -> (bool, Vec<WaveEvent>) {
        let mut events = Vec::new();
        if !path.is_valid() {
            warn!("Not starting waves: path has {} point(s)", path.len());
            return (false, events);
        }
        if self.config.definitions.is_empty() {
            warn!("Not starting waves: no wave definitions configured");
            return (false, events);
        }
        self.path = Some(path);
        if self.is_running() {
            debug!("Waves already running – path replaced");
            return (true, events);
        }
        self.begin_wave(now, &mut events);
        (true, events)
    }

    /// Whether a wave is active or the next one is queued.
    pub fn is_running(&self) -> bool {
        self.run.in_progress || !self.queue.is_empty()
    }

    /// The path became unusable; no further wave will start.
    pub fn invalidate_path(&mut self) {
        self.path = None;
    }

    fn has_valid_path(&self) -> bool {
        self.path.as_ref().is_some_and(|p| p.is_valid())
    }

    fn push_task(&mut self, due: Instant, action: SpawnAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(SpawnTask { due, seq, action }));
    }

    fn begin_wave(&mut self, now: Instant, events: &mut Vec<WaveEvent>) {
        let Some(def) = self.config.definitions.get(self.run.definition_index).cloned() else {
            warn!("Wave definition {} missing", self.run.definition_index);
            return;
        };

        self.run.wave_number += 1;
        self.run.in_progress = true;

        let interval = Duration::from_millis(self.config.spawn_interval_ms);
        let mut cursor = now;
        for sub in &def.subwaves {
            cursor = deadline_after(cursor, Duration::from_millis(sub.delay_ms));
            for i in 0..sub.count {
                if i > 0 {
                    cursor = deadline_after(cursor, interval);
                }
                self.push_task(
                    cursor,
                    SpawnAction::Spawn {
                        monster_kind: sub.monster_kind.clone(),
                    },
                );
                self.spawns_remaining += 1;
            }
        }

        info!(
            "Wave {} '{}' started (tier {}, {} monsters)",
            self.run.wave_number,
            def.name,
            self.run.difficulty_tier,
            def.monster_count()
        );
        events.push(WaveEvent::WaveStarted {
            wave_number: self.run.wave_number,
            name: def.name,
            tier: self.run.difficulty_tier,
        });
    }

    /// Pop and run every task due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<WaveEvent> {
        let mut events = Vec::new();

        while let Some(Reverse(task)) = self.queue.peek() {
            if task.due > now {
                break;
            }
            let Some(Reverse(task)) = self.queue.pop() else {
                break;
            };
            match task.action {
                SpawnAction::Spawn { monster_kind } => {
                    self.spawns_remaining = self.spawns_remaining.saturating_sub(1);
                    self.spawn(&monster_kind, &mut events);
                }
                SpawnAction::StartNextWave => {
                    if self.has_valid_path() {
                        self.begin_wave(now, &mut events);
                    } else {
                        info!("Next wave withheld: no valid path");
                    }
                }
            }
        }

        self.check_completion(now, &mut events);
        events
    }

    fn spawn(&mut self, kind: &str, events: &mut Vec<WaveEvent>) {
        let Some(archetype) = self.config.archetype(kind) else {
            warn!("Unknown monster kind '{}' – spawn skipped", kind);
            return;
        };
        let (health, speed) = scaled_stats(
            archetype,
            self.run.difficulty_tier,
            self.config.health_multiplier,
            self.config.speed_multiplier,
        );
        let monster = Monster {
            id: self.next_monster_id,
            kind: archetype.kind.clone(),
            health,
            speed,
            reward: archetype.reward,
            damage: archetype.damage,
            wave_number: self.run.wave_number,
        };
        self.next_monster_id += 1;
        self.run.monsters_alive += 1;
        self.live.insert(monster.id, monster.clone());
        events.push(WaveEvent::MonsterSpawned { monster });
    }

    /// A live monster died or reached the end of the path.
    pub fn monster_resolved(
        &mut self,
        id: u64,
        outcome: MonsterOutcome,
        now: Instant,
    ) -> Vec<WaveEvent> {
        let mut events = Vec::new();
        let Some(monster) = self.live.remove(&id) else {
            debug!("Monster {} already resolved", id);
            return events;
        };
        self.run.monsters_alive = self.run.monsters_alive.saturating_sub(1);
        events.push(WaveEvent::MonsterResolved { monster, outcome });
        self.check_completion(now, &mut events);
        events
    }

    fn check_completion(&mut self, now: Instant, events: &mut Vec<WaveEvent>) {
        if !self.run.in_progress || self.spawns_remaining > 0 || self.run.monsters_alive > 0 {
            return;
        }

        let finished = self.run.wave_number;
        self.run.in_progress = false;
        info!("Wave {} cleared", finished);
        events.push(WaveEvent::WaveCompleted {
            wave_number: finished,
        });

        self.run.definition_index += 1;
        if self.run.definition_index >= self.config.definitions.len() {
            self.run.definition_index = 0;
            self.run.difficulty_tier += 1;
            info!("Wave cycle complete – difficulty tier {}", self.run.difficulty_tier);
            events.push(WaveEvent::CycleCompleted {
                tier: self.run.difficulty_tier,
            });
        }

        if self.has_valid_path() {
            let due = deadline_after(now, Duration::from_millis(self.config.inter_wave_delay_ms));
            self.push_task(due, SpawnAction::StartNextWave);
        }
    }

    /// Cancel every pending task and despawn every live monster.
    ///
    /// The wave cursor (`definition_index`, `difficulty_tier`) survives so a
    /// later `start` continues the cycle.
    pub fn stop_all_waves(&mut self) -> Vec<WaveEvent> {
        let mut events: Vec<WaveEvent> = self
            .live
            .keys()
            .map(|&id| WaveEvent::MonsterDespawned { id })
            .collect();
        let cancelled = self.queue.len();
        self.queue.clear();
        self.live.clear();
        self.spawns_remaining = 0;
        self.run.monsters_alive = 0;
        self.run.in_progress = false;
        self.path = None;
        info!(
            "All waves stopped ({} task(s) cancelled, {} monster(s) despawned)",
            cancelled,
            events.len()
        );
        events.push(WaveEvent::Stopped);
        events
    }

    /// Full reset for a new game.
    pub fn reset(&mut self) -> Vec<WaveEvent> {
        let events = self.stop_all_waves();
        self.run = WaveRunState::default();
        events
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn run_state(&self) -> WaveRunState {
        self.run
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    pub fn live_monsters(&self) -> impl Iterator<Item = &Monster> {
        self.live.values()
    }

    pub fn monster(&self, id: u64) -> Option<&Monster> {
        self.live.get(&id)
    }

    pub fn path(&self) -> Option<&WorldPath> {
        self.path.as_ref()
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }
}
