//! Gesture Defense client core
//!
//! The game-side half of a gesture-controlled tower-defense: it talks to an
//! external computer-vision service, runs the Planning / Combat phase
//! machine, schedules monster waves and relays authoritative state to a
//! second networked peer.
//!
//! ## Architecture
//!
//! ```text
//! Session  (session.rs)                    ← one per process, ticked by the host
//!   ├── VisionClient  (transport.rs)       ← bridge thread, tag-prefixed frames
//!   │     └── VisionMessage (protocol.rs)
//!   ├── PhaseController  (phase.rs)        ← Planning / Combat, pending request
//!   ├── WaveScheduler  (waves.rs)          ← authority only, spawn heap
//!   ├── GameState  (state.rs)              ← gold, base health, turrets
//!   └── Replicator  (replication.rs)       ← RemoteCall over a SessionChannel
//! ```
//!
//! Everything below `Session` is synchronous and takes time as an argument;
//! only the transport's bridge thread runs async code.

// Protocol, game logic and replication are always available (no client
// feature needed).
pub mod config;
pub mod error;
pub mod phase;
pub mod protocol;
pub mod replication;
pub mod state;
pub mod types;
pub mod waves;

// The socket transport and the session that owns it require the `client`
// feature.
#[cfg(feature = "client")]
pub mod session;
#[cfg(feature = "client")]
pub mod transport;

// Convenience re-exports (client only)
#[cfg(feature = "client")]
pub use session::{NullPresentation, Presentation, Session};
#[cfg(feature = "client")]
pub use transport::{Connection, ConnectionState, ControlClient, LoopbackPeer, VisionClient};

pub use config::{ClientConfig, TransportConfig};
pub use error::{CommandError, ProtocolError, TransportError};
pub use phase::{PhaseCommand, PhaseController, PhaseEvent};
pub use protocol::{BackendMode, MessageKind, VisionMessage};
pub use replication::{LocalHub, MirrorState, RemoteCall, Replicator, RpcScope, SessionChannel};
pub use state::{GameState, StateChange};
pub use types::{PhaseState, SessionRole, TurretInfo, Vec3, WorldPath};
pub use waves::{MonsterOutcome, WaveEvent, WaveScheduler};
