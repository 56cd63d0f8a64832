//! Vision-service wire protocol.
//!
//! This module owns **every message that crosses the socket boundary**
//! between this client and the external vision service.
//!
//! ## Framing
//!
//! One WebSocket binary message carries one logical message.  There is no
//! length prefix: byte 0 is the kind tag, the remaining bytes are the
//! kind-specific payload.
//!
//! | Tag | Kind                  | Payload                              | Direction        |
//! |-----|-----------------------|--------------------------------------|------------------|
//! | 1   | `CameraFrame`         | encoded image bytes                  | service → client |
//! | 2   | `ProcessingComplete`  | *(empty)*                            | service → client |
//! | 3   | `SegmentationMask`    | encoded image bytes                  | service → client |
//! | 4   | `PathPoints`          | JSON `[{x,y}, …]`                    | service → client |
//! | 5   | `FingerCount`         | JSON `{count}`                       | service → client |
//! | 6   | `GridPosition`        | JSON `{x,y,valid}`                   | service → client |
//! | 7   | `GridConfirmation`    | JSON `{x,y,valid}`                   | service → client |
//! | 8   | `ServerStatus`        | JSON `{status}`                      | service → client |
//! | 9   | `SwitchCameraRequest` | JSON `{index}`                       | client → service |
//! | 10  | `CameraList`          | JSON `{available_cameras:[int]}`     | service → client |
//! | 11  | `ProgressUpdate`      | JSON `{step, progress}`              | service → client |
//! | 12  | `CameraInfo`          | JSON `{width, height}`               | service → client |
//! | 13  | `ErrorNotice`         | JSON `{error, code}`                 | service → client |
//!
//! Commands (client → service) are plain WebSocket *text* messages with no
//! framing; see [`commands`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Kind tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
    CameraFrame = 1,
    ProcessingComplete = 2,
    SegmentationMask = 3,
    PathPoints = 4,
    FingerCount = 5,
    GridPosition = 6,
    GridConfirmation = 7,
    ServerStatus = 8,
    SwitchCameraRequest = 9,
    CameraList = 10,
    ProgressUpdate = 11,
    CameraInfo = 12,
    ErrorNotice = 13,
}

impl MessageKind {
    pub const ALL: [MessageKind; 13] = [
        MessageKind::CameraFrame,
        MessageKind::ProcessingComplete,
        MessageKind::SegmentationMask,
        MessageKind::PathPoints,
        MessageKind::FingerCount,
        MessageKind::GridPosition,
        MessageKind::GridConfirmation,
        MessageKind::ServerStatus,
        MessageKind::SwitchCameraRequest,
        MessageKind::CameraList,
        MessageKind::ProgressUpdate,
        MessageKind::CameraInfo,
        MessageKind::ErrorNotice,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::CameraFrame => "CameraFrame",
            MessageKind::ProcessingComplete => "ProcessingComplete",
            MessageKind::SegmentationMask => "SegmentationMask",
            MessageKind::PathPoints => "PathPoints",
            MessageKind::FingerCount => "FingerCount",
            MessageKind::GridPosition => "GridPosition",
            MessageKind::GridConfirmation => "GridConfirmation",
            MessageKind::ServerStatus => "ServerStatus",
            MessageKind::SwitchCameraRequest => "SwitchCameraRequest",
            MessageKind::CameraList => "CameraList",
            MessageKind::ProgressUpdate => "ProgressUpdate",
            MessageKind::CameraInfo => "CameraInfo",
            MessageKind::ErrorNotice => "ErrorNotice",
        }
    }

    /// Image kinds carry raw bytes; everything else carries UTF-8 JSON.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            MessageKind::CameraFrame | MessageKind::SegmentationMask
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Raw framing
// ---------------------------------------------------------------------------

/// Prefix `payload` with the kind tag.
pub fn encode_frame(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(kind.tag());
    out.extend_from_slice(payload);
    out
}

/// Split a frame into its kind and payload without interpreting the payload.
pub fn decode_frame(frame: &[u8]) -> Result<(MessageKind, &[u8]), ProtocolError> {
    let (&tag, payload) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
    let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownTag { tag })?;
    Ok((kind, payload))
}

// ---------------------------------------------------------------------------
// Structured payloads
// ---------------------------------------------------------------------------

/// One path vertex in vision-service pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerCount {
    pub count: u32,
}

/// Pointer sample over the placement grid (pixel coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: f32,
    pub y: f32,
    /// `false` when the pointed cell is occupied.
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCameraRequest {
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraList {
    pub available_cameras: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub step: String,
    /// Percent, 0–100.
    pub progress: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
    #[serde(default)]
    pub code: i32,
}

// ---------------------------------------------------------------------------
// Typed message
// ---------------------------------------------------------------------------

/// A decoded vision-service message.  Immutable once built; image payloads
/// share the receive buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum VisionMessage {
    CameraFrame(Bytes),
    ProcessingComplete,
    SegmentationMask(Bytes),
    PathPoints(Vec<PathPoint>),
    FingerCount(FingerCount),
    GridPosition(GridPosition),
    GridConfirmation(GridPosition),
    ServerStatus(ServerStatus),
    SwitchCameraRequest(SwitchCameraRequest),
    CameraList(CameraList),
    ProgressUpdate(ProgressUpdate),
    CameraInfo(CameraInfo),
    ErrorNotice(ErrorNotice),
}

impl VisionMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            VisionMessage::CameraFrame(_) => MessageKind::CameraFrame,
            VisionMessage::ProcessingComplete => MessageKind::ProcessingComplete,
            VisionMessage::SegmentationMask(_) => MessageKind::SegmentationMask,
            VisionMessage::PathPoints(_) => MessageKind::PathPoints,
            VisionMessage::FingerCount(_) => MessageKind::FingerCount,
            VisionMessage::GridPosition(_) => MessageKind::GridPosition,
            VisionMessage::GridConfirmation(_) => MessageKind::GridConfirmation,
            VisionMessage::ServerStatus(_) => MessageKind::ServerStatus,
            VisionMessage::SwitchCameraRequest(_) => MessageKind::SwitchCameraRequest,
            VisionMessage::CameraList(_) => MessageKind::CameraList,
            VisionMessage::ProgressUpdate(_) => MessageKind::ProgressUpdate,
            VisionMessage::CameraInfo(_) => MessageKind::CameraInfo,
            VisionMessage::ErrorNotice(_) => MessageKind::ErrorNotice,
        }
    }

    /// Decode a complete frame.  Image payloads are sliced out of `frame`
    /// without copying.
    pub fn decode(frame: Bytes) -> Result<Self, ProtocolError> {
        let kind = {
            let (kind, _) = decode_frame(&frame)?;
            kind
        };
        let payload = frame.slice(1..);

        let msg = match kind {
            MessageKind::CameraFrame => VisionMessage::CameraFrame(payload),
            MessageKind::SegmentationMask => VisionMessage::SegmentationMask(payload),
            MessageKind::ProcessingComplete => VisionMessage::ProcessingComplete,
            MessageKind::PathPoints => VisionMessage::PathPoints(json(kind, &payload)?),
            MessageKind::FingerCount => VisionMessage::FingerCount(json(kind, &payload)?),
            MessageKind::GridPosition => VisionMessage::GridPosition(json(kind, &payload)?),
            MessageKind::GridConfirmation => {
                VisionMessage::GridConfirmation(json(kind, &payload)?)
            }
            MessageKind::ServerStatus => VisionMessage::ServerStatus(json(kind, &payload)?),
            MessageKind::SwitchCameraRequest => {
                return Err(ProtocolError::UnexpectedDirection { kind: kind.name() })
            }
            MessageKind::CameraList => VisionMessage::CameraList(json(kind, &payload)?),
            MessageKind::ProgressUpdate => VisionMessage::ProgressUpdate(json(kind, &payload)?),
            MessageKind::CameraInfo => VisionMessage::CameraInfo(json(kind, &payload)?),
            MessageKind::ErrorNotice => VisionMessage::ErrorNotice(json(kind, &payload)?),
        };
        Ok(msg)
    }

    /// Encode into a tag-prefixed frame.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let kind = self.kind();
        let payload: Vec<u8> = match self {
            VisionMessage::CameraFrame(b) | VisionMessage::SegmentationMask(b) => b.to_vec(),
            VisionMessage::ProcessingComplete => Vec::new(),
            VisionMessage::PathPoints(v) => serde_json::to_vec(v)?,
            VisionMessage::FingerCount(v) => serde_json::to_vec(v)?,
            VisionMessage::GridPosition(v) | VisionMessage::GridConfirmation(v) => {
                serde_json::to_vec(v)?
            }
            VisionMessage::ServerStatus(v) => serde_json::to_vec(v)?,
            VisionMessage::SwitchCameraRequest(v) => serde_json::to_vec(v)?,
            VisionMessage::CameraList(v) => serde_json::to_vec(v)?,
            VisionMessage::ProgressUpdate(v) => serde_json::to_vec(v)?,
            VisionMessage::CameraInfo(v) => serde_json::to_vec(v)?,
            VisionMessage::ErrorNotice(v) => serde_json::to_vec(v)?,
        };
        Ok(encode_frame(kind, &payload))
    }
}

fn json<T: for<'de> Deserialize<'de>>(kind: MessageKind, payload: &[u8]) -> Result<T, ProtocolError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::InvalidUtf8 { kind: kind.name() })?;
    serde_json::from_str(text).map_err(|source| ProtocolError::InvalidJson {
        kind: kind.name(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Text commands
// ---------------------------------------------------------------------------

/// Plain-text commands sent on the vision connection.
pub mod commands {
    /// Sent immediately after the connection opens.
    pub const START_CAMERA: &str = "start-camera";
    pub const PROCESS_SCAN: &str = "process-scan";
    pub const ENTER_COMBAT: &str = "enter-combat";
    pub const EXIT_COMBAT: &str = "exit-combat";
}

/// Backend launch modes, sent as text on the separate control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Placer + selector pipelines on one machine.
    Singleplayer,
    /// Gesture-only pipeline (turret selection).
    MultiplayerSelector,
    /// Segmentation, pathfinding and grid pointing.
    MultiplayerPlacer,
    Stop,
}

impl BackendMode {
    pub fn as_command(self) -> &'static str {
        match self {
            BackendMode::Singleplayer => "start_singleplayer",
            BackendMode::MultiplayerSelector => "start_multiplayer_selector",
            BackendMode::MultiplayerPlacer => "start_multiplayer_placer",
            BackendMode::Stop => "stop",
        }
    }
}

impl std::str::FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.replace('-', "_");
        match s.strip_prefix("start_").unwrap_or(&s) {
            "singleplayer" => Ok(BackendMode::Singleplayer),
            "multiplayer_selector" => Ok(BackendMode::MultiplayerSelector),
            "multiplayer_placer" => Ok(BackendMode::MultiplayerPlacer),
            "stop" => Ok(BackendMode::Stop),
            other => Err(format!("unknown backend mode '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
