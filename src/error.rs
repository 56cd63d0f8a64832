//! Error types for the protocol, transport and command layers.
//!
//! None of these are fatal to the tick loop: protocol faults are logged and
//! the frame dropped, transport faults are left to the caller's reconnect
//! policy, command faults leave the phase state untouched.

use thiserror::Error;

use crate::types::PhaseState;

/// A frame that could not be turned into a [`crate::protocol::VisionMessage`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown message tag {tag}")]
    UnknownTag { tag: u8 },

    #[error("{kind} payload is not valid UTF-8")]
    InvalidUtf8 { kind: &'static str },

    #[error("{kind} payload is not valid JSON: {source}")]
    InvalidJson {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} is a client → service message and cannot be received")]
    UnexpectedDirection { kind: &'static str },
}

/// Failures of the vision / control connections.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is not open (state: {state})")]
    NotOpen { state: &'static str },

    #[error("bridge channel closed")]
    ChannelClosed,

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rejections from the phase controller.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("a '{pending}' request is still outstanding")]
    RequestPending { pending: &'static str },

    #[error("'{command}' is not valid while in {phase:?}")]
    InvalidInPhase {
        command: &'static str,
        phase: PhaseState,
    },

    #[error("unknown phase command '{0}'")]
    UnknownCommand(String),

    #[error("only the authority peer may issue '{command}'")]
    NotAuthority { command: &'static str },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
