//! Core game types shared across all modules.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Session roles & phases
// ---------------------------------------------------------------------------

/// Which side of the two-peer session this process is.
///
/// Assigned once by the lobby layer; fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Owns the vision connection, the phase controller and the wave scheduler.
    Authority,
    /// Renders relayed state only.
    Mirror,
}

impl SessionRole {
    pub fn is_authority(self) -> bool {
        matches!(self, SessionRole::Authority)
    }
}

impl std::str::FromStr for SessionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authority" => Ok(SessionRole::Authority),
            "mirror" => Ok(SessionRole::Mirror),
            other => Err(format!("unknown session role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    Planning,
    Combat,
}

// ---------------------------------------------------------------------------
// Turrets
// ---------------------------------------------------------------------------

/// Summary of a buildable turret, as shown in the selection panel and
/// replicated to the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurretInfo {
    pub name: String,
    pub cost: i32,
    pub damage: f32,
    pub range: f32,
    pub level: u32,
}

impl TurretInfo {
    pub fn new(name: impl Into<String>, cost: i32, damage: f32, range: f32, level: u32) -> Self {
        Self {
            name: name.into(),
            cost,
            damage,
            range,
            level,
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// A monster path in world coordinates (ground plane, `y` = ground height).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPath {
    pub points: Vec<Vec3>,
}

impl WorldPath {
    pub fn new(points: Vec<Vec3>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A path needs a start and an end to be walkable.
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 2
    }

    pub fn start(&self) -> Option<Vec3> {
        self.points.first().copied()
    }

    pub fn end(&self) -> Option<Vec3> {
        self.points.last().copied()
    }

    pub fn total_length(&self) -> f32 {
        self.points.windows(2).map(|w| w[0].distance(&w[1])).sum()
    }
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// Longest delay any configured deadline is pushed out by.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// `now + delay`, with `delay` capped at [`MAX_DELAY`].
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Vision → world mapping
// ---------------------------------------------------------------------------

/// Maps vision-service pixel coordinates onto the world ground plane.
///
/// Pixel `(0, 0)` is the top-left of the camera image; it lands on the
/// far-left corner of the world rectangle (`origin.x`, `origin.z + depth`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportMapping {
    pub image_width: f32,
    pub image_height: f32,
    /// Near-left corner of the playfield in world space.
    pub origin: Vec3,
    pub world_width: f32,
    pub world_depth: f32,
}

impl ViewportMapping {
    /// Replace the image size (after a `CameraInfo` message).  Non-positive
    /// sizes are ignored.
    pub fn with_image_size(mut self, width: f32, height: f32) -> Self {
        if width > 0.0 && height > 0.0 {
            self.image_width = width;
            self.image_height = height;
        }
        self
    }

    pub fn to_world(&self, px: f32, py: f32) -> Vec3 {
        let u = px / self.image_width;
        let v = 1.0 - py / self.image_height;
        Vec3::new(
            self.origin.x + u * self.world_width,
            self.origin.y,
            self.origin.z + v * self.world_depth,
        )
    }

    pub fn path_to_world(&self, points: &[(f32, f32)]) -> WorldPath {
        WorldPath::new(points.iter().map(|&(x, y)| self.to_world(x, y)).collect())
    }
}

impl Default for ViewportMapping {
    fn default() -> Self {
        Self {
            image_width: 640.0,
            image_height: 480.0,
            origin: Vec3::zero(),
            world_width: 32.0,
            world_depth: 24.0,
        }
    }
}
