//! Authoritative game economy: gold, base health, wave counter and the
//! selected turret.
//!
//! Every mutator returns the [`StateChange`]s it caused so the session can
//! forward them to the replication layer without diffing.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::replication::ReplicatedSnapshot;
use crate::types::TurretInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub starting_gold: i32,
    pub base_health: i32,
    /// Turrets offered in the selection panel, by index.
    pub turrets: Vec<TurretInfo>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            starting_gold: 200,
            base_health: 20,
            turrets: vec![
                TurretInfo::new("Blaster", 50, 10.0, 4.0, 1),
                TurretInfo::new("Cannon", 120, 35.0, 6.0, 1),
                TurretInfo::new("Frost", 80, 4.0, 5.0, 1),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Gold(i32),
    Health { current: i32, max: i32 },
    Wave(u32),
    /// `None`: the selection was cleared.
    TurretSelected(Option<TurretInfo>),
    BaseDestroyed,
}

#[derive(Debug, Clone)]
pub struct GameState {
    config: EconomyConfig,
    gold: i32,
    health: i32,
    wave: u32,
    selected: Option<usize>,
    destroyed: bool,
}

impl GameState {
    pub fn new(config: EconomyConfig) -> Self {
        Self {
            gold: config.starting_gold,
            health: config.base_health,
            wave: 0,
            selected: None,
            destroyed: false,
            config,
        }
    }

    pub fn gold(&self) -> i32 {
        self.gold
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn max_health(&self) -> i32 {
        self.config.base_health
    }

    pub fn wave(&self) -> u32 {
        self.wave
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn selected_turret(&self) -> Option<&TurretInfo> {
        self.selected.and_then(|i| self.config.turrets.get(i))
    }

    pub fn turrets(&self) -> &[TurretInfo] {
        &self.config.turrets
    }

    pub fn award_kill(&mut self, reward: i32) -> Vec<StateChange> {
        if reward == 0 {
            return Vec::new();
        }
        self.gold += reward;
        vec![StateChange::Gold(self.gold)]
    }

    /// Subtract `damage` from the base.  Health bottoms out at zero; the
    /// first time it gets there `BaseDestroyed` is reported as well.
    pub fn damage_base(&mut self, damage: i32) -> Vec<StateChange> {
        if damage <= 0 || self.destroyed {
            return Vec::new();
        }
        self.health = (self.health - damage).max(0);
        let mut changes = vec![StateChange::Health {
            current: self.health,
            max: self.max_health(),
        }];
        if self.health == 0 {
            self.destroyed = true;
            warn!("Base destroyed");
            changes.push(StateChange::BaseDestroyed);
        }
        changes
    }

    pub fn set_wave(&mut self, wave: u32) -> Vec<StateChange> {
        if wave == self.wave {
            return Vec::new();
        }
        self.wave = wave;
        vec![StateChange::Wave(wave)]
    }

    /// Select the turret at `index`; negative or out-of-range indices clear
    /// the selection.  Reports only an actual change.
    pub fn select_turret(&mut self, index: i32) -> Vec<StateChange> {
        let slot = usize::try_from(index)
            .ok()
            .filter(|&i| i < self.config.turrets.len());
        if slot == self.selected {
            return Vec::new();
        }
        self.selected = slot;
        match self.selected_turret() {
            Some(turret) => info!("Turret '{}' selected", turret.name),
            None => info!("Turret selection cleared"),
        }
        vec![StateChange::TurretSelected(self.selected_turret().cloned())]
    }

    /// Deduct `cost` if affordable.
    pub fn try_spend(&mut self, cost: i32) -> Option<Vec<StateChange>> {
        if cost < 0 || cost > self.gold {
            return None;
        }
        self.gold -= cost;
        Some(vec![StateChange::Gold(self.gold)])
    }

    pub fn reset(&mut self) -> Vec<StateChange> {
        *self = Self::new(self.config.clone());
        vec![
            StateChange::Gold(self.gold),
            StateChange::Health {
                current: self.health,
                max: self.max_health(),
            },
            StateChange::Wave(self.wave),
            StateChange::TurretSelected(None),
        ]
    }

    /// Current values in replicated form.
    pub fn snapshot(&self) -> ReplicatedSnapshot {
        ReplicatedSnapshot {
            gold: self.gold,
            health: self.health,
            max_health: self.max_health(),
            wave_number: self.wave as i32,
            selected_turret: self.selected_turret().cloned(),
        }
    }
}
