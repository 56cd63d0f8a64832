//! Client configuration.
//!
//! Layering, lowest priority first:
//!
//! 1. built-in defaults (`Default` impls, via `#[serde(default)]`)
//! 2. an optional TOML file
//! 3. `GD_`-prefixed environment variables, `__` separating sections
//!
//! | Key                               | Default                   |
//! |-----------------------------------|---------------------------|
//! | `GD_TICK_RATE_HZ`                 | `60`                      |
//! | `GD_TRANSPORT__URL`               | `ws://localhost:8767`     |
//! | `GD_TRANSPORT__CONTROL_URL`       | `ws://localhost:8765`     |
//! | `GD_TRANSPORT__GESTURE_URL`       | `ws://localhost:8768`     |
//! | `GD_TRANSPORT__MAX_BATCH`         | `5`                       |
//! | `GD_TRANSPORT__QUEUE_CAPACITY`    | `256`                     |
//! | `GD_TRANSPORT__RECONNECT_MS`      | `3000`                    |
//! | `GD_PHASE__SCAN_TIMEOUT_MS`       | `30000`                   |
//! | `GD_WAVES__HEALTH_MULTIPLIER`     | `1.5`                     |
//! | `GD_REPLICATION__RESYNC_MS`       | *(unset: no resync)*      |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::phase::PhaseConfig;
use crate::protocol::commands;
use crate::replication::ReplicationConfig;
use crate::state::EconomyConfig;
use crate::waves::WaveConfig;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Vision service endpoint.
    pub url: String,
    /// Backend launcher endpoint (mode selection).
    pub control_url: String,
    /// Finger-tracking endpoint (turret selection).  Empty: not connected.
    pub gesture_url: String,
    /// Command sent as soon as the vision connection opens.
    pub start_command: String,
    /// Inbound events buffered before frames are evicted (back-pressure).
    pub queue_capacity: usize,
    /// Inbound events processed per tick.
    pub max_batch: usize,
    /// Minimum spacing between reconnect attempts.
    pub reconnect_ms: u64,
}

impl TransportConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8767".into(),
            control_url: "ws://localhost:8765".into(),
            gesture_url: "ws://localhost:8768".into(),
            start_command: commands::START_CAMERA.into(),
            queue_capacity: 256,
            max_batch: 5,
            reconnect_ms: 3_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Session tick rate in Hz.
    pub tick_rate_hz: f32,
    pub transport: TransportConfig,
    pub phase: PhaseConfig,
    pub waves: WaveConfig,
    pub economy: EconomyConfig,
    pub replication: ReplicationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            transport: TransportConfig::default(),
            phase: PhaseConfig::default(),
            waves: WaveConfig::default(),
            economy: EconomyConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load defaults, then `path` (if given), then the `GD_*` environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("GD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_rate_hz.max(1.0))
    }
}
