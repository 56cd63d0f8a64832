//! Vision transport – WebSocket connections to the vision and control
//! services, owned by a bridge thread.
//!
//! ## Threading model
//!
//! ```text
//! Tick thread                  │  Bridge thread (Tokio, current-thread)
//! ──────────────────────────── │ ───────────────────────────────────────
//! VisionClient::pump()         │ run_bridge()
//!   → inbound.drain(max_batch) │   stream.next()
//!   → subscribers(kind)        │   → VisionMessage::decode
//!                              │   → inbound.push(event)
//!   send("process-scan")       │
//!   → outbound.send(Text)      │   outbound.recv()
//!                              │   → sink.send(Message::Text)
//! ```
//!
//! The bridge thread owns the socket and the runtime.  The tick thread only
//! touches the [`InboundQueue`] mutex (briefly) and the outbound channel.
//! Frames are decoded on the bridge thread so the queue holds immutable,
//! already-typed messages.
//!
//! Nothing here reconnects on its own: a closed or faulted connection stays
//! that way until the owner calls [`VisionClient::reconnect`].

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::phase::CommandSink;
use crate::protocol::{BackendMode, MessageKind, SwitchCameraRequest, VisionMessage};

// ---------------------------------------------------------------------------
// State & events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Faulted,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Faulted => "faulted",
        }
    }

    /// Closed or faulted: nothing more will arrive.
    pub fn is_down(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Faulted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(VisionMessage),
    Closed { reason: String },
    Faulted { reason: String },
}

impl TransportEvent {
    fn is_lifecycle(&self) -> bool {
        !matches!(self, TransportEvent::Message(_))
    }

    fn is_camera_frame(&self) -> bool {
        matches!(self, TransportEvent::Message(VisionMessage::CameraFrame(_)))
    }
}

/// Outbound traffic, tick thread → bridge thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

// ---------------------------------------------------------------------------
// Inbound queue
// ---------------------------------------------------------------------------

/// Bounded queue of decoded events shared with the bridge thread.
///
/// When full, the oldest queued camera frame makes room; lifecycle events
/// are always accepted; anything else is dropped.
#[derive(Clone)]
pub struct InboundQueue {
    inner: Arc<Mutex<VecDeque<TransportEvent>>>,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if the event was dropped.
    pub fn push(&self, event: TransportEvent) -> bool {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            if let Some(i) = queue.iter().position(TransportEvent::is_camera_frame) {
                queue.remove(i);
            } else if !event.is_lifecycle() {
                warn!("Inbound queue full – dropping event");
                return false;
            }
        }
        queue.push_back(event);
        true
    }

    /// Decode a raw frame and queue it.  Undecodable frames are logged and
    /// dropped.
    pub fn push_frame(&self, frame: Bytes) -> bool {
        match VisionMessage::decode(frame) {
            Ok(msg) => self.push(TransportEvent::Message(msg)),
            Err(e) => {
                warn!("Dropping vision frame: {}", e);
                false
            }
        }
    }

    pub fn drain(&self, max: usize) -> Vec<TransportEvent> {
        let mut queue = self.inner.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One bidirectional connection.  The socket itself lives on the bridge
/// thread (or, for [`Connection::loopback`], nowhere).
pub struct Connection {
    url: Option<String>,
    state: ConnectionState,
    inbound: InboundQueue,
    outbound: UnboundedSender<Outbound>,
    _thread: Option<thread::JoinHandle<()>>,
}

impl Connection {
    /// Spawn the bridge thread and start connecting to `url`.
    pub fn open(url: &str, queue_capacity: usize) -> Result<Self, TransportError> {
        let inbound = InboundQueue::new(queue_capacity);
        let (tx, rx) = mpsc::unbounded_channel();

        let bridge_url = url.to_string();
        let bridge_inbound = inbound.clone();
        let handle = thread::Builder::new()
            .name("vision-bridge".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("[bridge] Failed to create Tokio runtime: {}", e);
                        bridge_inbound.push(TransportEvent::Faulted {
                            reason: format!("runtime: {}", e),
                        });
                        return;
                    }
                };
                rt.block_on(run_bridge(bridge_url, bridge_inbound, rx));
            })
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: format!("bridge thread: {}", e),
            })?;

        Ok(Self {
            url: Some(url.to_string()),
            state: ConnectionState::Connecting,
            inbound,
            outbound: tx,
            _thread: Some(handle),
        })
    }

    /// A connection with no socket.  The returned peer plays the service.
    pub fn loopback(queue_capacity: usize) -> (Connection, LoopbackPeer) {
        let inbound = InboundQueue::new(queue_capacity);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            url: None,
            state: ConnectionState::Connecting,
            inbound: inbound.clone(),
            outbound: tx,
            _thread: None,
        };
        (conn, LoopbackPeer { inbound, sent: rx })
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drain up to `max` events, tracking lifecycle transitions.
    pub fn drain(&mut self, max: usize) -> Vec<TransportEvent> {
        let events = self.inbound.drain(max);
        for event in &events {
            match event {
                TransportEvent::Opened => self.state = ConnectionState::Open,
                TransportEvent::Closed { .. } => self.state = ConnectionState::Closed,
                TransportEvent::Faulted { .. } => self.state = ConnectionState::Faulted,
                TransportEvent::Message(_) => {}
            }
        }
        events
    }

    fn send(&self, out: Outbound) -> Result<(), TransportError> {
        if self.state != ConnectionState::Open {
            return Err(TransportError::NotOpen {
                state: self.state.name(),
            });
        }
        self.outbound
            .send(out)
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(Outbound::Text(text.to_string()))
    }

    pub fn send_binary(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.send(Outbound::Binary(frame))
    }

    pub fn close(&mut self) {
        if !self.state.is_down() {
            let _ = self.outbound.send(Outbound::Close);
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Service side of a [`Connection::loopback`].
pub struct LoopbackPeer {
    inbound: InboundQueue,
    sent: UnboundedReceiver<Outbound>,
}

impl LoopbackPeer {
    pub fn open(&self) {
        self.inbound.push(TransportEvent::Opened);
    }

    /// Encode `msg` and deliver it through the normal decode path.
    pub fn deliver(&self, msg: &VisionMessage) -> bool {
        match msg.encode() {
            Ok(frame) => self.inbound.push_frame(Bytes::from(frame)),
            Err(e) => {
                warn!("Loopback could not encode {}: {}", msg.kind(), e);
                false
            }
        }
    }

    pub fn deliver_raw(&self, frame: Bytes) -> bool {
        self.inbound.push_frame(frame)
    }

    pub fn close(&self, reason: &str) {
        self.inbound.push(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn fault(&self, reason: &str) {
        self.inbound.push(TransportEvent::Faulted {
            reason: reason.to_string(),
        });
    }

    /// Everything the client has sent since the last call.
    pub fn take_sent(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        loop {
            match self.sent.try_recv() {
                Ok(msg) => out.push(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Text commands sent since the last call (binary frames are discarded).
    pub fn sent_commands(&mut self) -> Vec<String> {
        self.take_sent()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn queued(&self) -> usize {
        self.inbound.len()
    }
}

// ---------------------------------------------------------------------------
// Async bridge
// ---------------------------------------------------------------------------

async fn run_bridge(url: String, inbound: InboundQueue, mut outbound: UnboundedReceiver<Outbound>) {
    info!("[bridge] Connecting to {}", url);

    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            error!("[bridge] Connect to {} failed: {}", url, e);
            inbound.push(TransportEvent::Faulted {
                reason: format!("connect failed: {}", e),
            });
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();
    info!("[bridge] Connected to {}", url);
    inbound.push(TransportEvent::Opened);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    inbound.push_frame(data);
                }
                Some(Ok(Message::Text(text))) => {
                    debug!("[bridge] Ignoring text message: {}", text.as_str());
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_else(|| "closed by peer".into());
                    info!("[bridge] Connection closed: {}", reason);
                    inbound.push(TransportEvent::Closed { reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[bridge] Socket error: {}", e);
                    inbound.push(TransportEvent::Faulted { reason: e.to_string() });
                    return;
                }
                None => {
                    inbound.push(TransportEvent::Closed { reason: "stream ended".into() });
                    return;
                }
            },

            out = outbound.recv() => {
                let result = match out {
                    Some(Outbound::Text(text)) => sink.send(Message::Text(text.into())).await,
                    Some(Outbound::Binary(frame)) => sink.send(Message::Binary(frame.into())).await,
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        inbound.push(TransportEvent::Closed { reason: "closed locally".into() });
                        return;
                    }
                };
                if let Err(e) = result {
                    warn!("[bridge] Send failed: {}", e);
                    inbound.push(TransportEvent::Faulted { reason: e.to_string() });
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

type MessageHandler = Box<dyn FnMut(&VisionMessage)>;
type ConnectionHandler = Box<dyn FnMut(ConnectionState)>;

/// Handlers registered per message kind, called in registration order.
#[derive(Default)]
pub struct Subscribers {
    by_kind: HashMap<MessageKind, Vec<MessageHandler>>,
}

impl Subscribers {
    pub fn subscribe(&mut self, kind: MessageKind, handler: MessageHandler) {
        self.by_kind.entry(kind).or_default().push(handler);
    }

    pub fn dispatch(&mut self, msg: &VisionMessage) {
        if let Some(handlers) = self.by_kind.get_mut(&msg.kind()) {
            for handler in handlers.iter_mut() {
                handler(msg);
            }
        }
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// Vision client
// ---------------------------------------------------------------------------

pub struct VisionClient {
    connection: Option<Connection>,
    url: Option<String>,
    /// Finger-tracking stream.  Its lifecycle never affects the vision
    /// connection's state.
    gesture: Option<Connection>,
    gesture_url: Option<String>,
    start_command: String,
    queue_capacity: usize,
    subscribers: Subscribers,
    connection_listeners: Vec<ConnectionHandler>,
    cameras: Vec<i32>,
}

impl VisionClient {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connection: None,
            url: None,
            gesture: None,
            gesture_url: None,
            start_command: config.start_command.clone(),
            queue_capacity: config.queue_capacity,
            subscribers: Subscribers::default(),
            connection_listeners: Vec::new(),
            cameras: Vec::new(),
        }
    }

    /// Open a connection to `url`, replacing any existing one.
    pub fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        let conn = Connection::open(url, self.queue_capacity)?;
        self.url = Some(url.to_string());
        self.attach(conn);
        Ok(())
    }

    /// Use an already-built connection (e.g. a loopback).
    pub fn attach(&mut self, connection: Connection) {
        if let Some(mut old) = self.connection.replace(connection) {
            old.close();
        }
    }

    /// Reconnect to the last URL given to [`VisionClient::connect`].
    pub fn reconnect(&mut self) -> Result<(), TransportError> {
        let Some(url) = self.url.clone() else {
            return Err(TransportError::Connect {
                url: String::new(),
                reason: "no url to reconnect to".into(),
            });
        };
        info!("Reconnecting to {}", url);
        self.connect(&url)
    }

    /// Open the finger-tracking connection, replacing any existing one.
    pub fn connect_gesture(&mut self, url: &str) -> Result<(), TransportError> {
        let conn = Connection::open(url, self.queue_capacity)?;
        self.gesture_url = Some(url.to_string());
        self.attach_gesture(conn);
        Ok(())
    }

    pub fn attach_gesture(&mut self, connection: Connection) {
        if let Some(mut old) = self.gesture.replace(connection) {
            old.close();
        }
    }

    pub fn reconnect_gesture(&mut self) -> Result<(), TransportError> {
        let Some(url) = self.gesture_url.clone() else {
            return Err(TransportError::Connect {
                url: String::new(),
                reason: "no gesture url to reconnect to".into(),
            });
        };
        info!("Reconnecting gesture stream to {}", url);
        self.connect_gesture(&url)
    }

    pub fn gesture_state(&self) -> ConnectionState {
        self.gesture
            .as_ref()
            .map_or(ConnectionState::Closed, Connection::state)
    }

    pub fn can_reconnect_gesture(&self) -> bool {
        self.gesture_url.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Closed, Connection::state)
    }

    pub fn can_reconnect(&self) -> bool {
        self.url.is_some()
    }

    pub fn subscribe(&mut self, kind: MessageKind, handler: impl FnMut(&VisionMessage) + 'static) {
        self.subscribers.subscribe(kind, Box::new(handler));
    }

    pub fn on_connection(&mut self, handler: impl FnMut(ConnectionState) + 'static) {
        self.connection_listeners.push(Box::new(handler));
    }

    pub fn send(&mut self, command: &str) -> Result<(), TransportError> {
        match &self.connection {
            Some(conn) => conn.send_text(command),
            None => Err(TransportError::NotOpen {
                state: ConnectionState::Closed.name(),
            }),
        }
    }

    /// Ask the service to switch to camera `index`.
    pub fn switch_camera(&mut self, index: u32) -> Result<(), TransportError> {
        let frame = VisionMessage::SwitchCameraRequest(SwitchCameraRequest { index }).encode()?;
        match &self.connection {
            Some(conn) => conn.send_binary(frame),
            None => Err(TransportError::NotOpen {
                state: ConnectionState::Closed.name(),
            }),
        }
    }

    /// Cameras last reported by the service.
    pub fn cameras(&self) -> &[i32] {
        &self.cameras
    }

    /// Process at most `max_batch` queued events from each connection: track
    /// state, send the start command on open, run subscribers.  The events
    /// are returned for the caller's own handling; only messages are
    /// returned from the gesture stream.
    pub fn pump(&mut self, max_batch: usize) -> Vec<TransportEvent> {
        let mut events = self.pump_vision(max_batch);
        events.extend(self.pump_gesture(max_batch));
        events
    }

    fn pump_gesture(&mut self, max_batch: usize) -> Vec<TransportEvent> {
        let Some(conn) = self.gesture.as_mut() else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        for event in conn.drain(max_batch) {
            match event {
                TransportEvent::Opened => info!("Gesture stream open"),
                TransportEvent::Message(msg) => {
                    self.subscribers.dispatch(&msg);
                    messages.push(TransportEvent::Message(msg));
                }
                TransportEvent::Closed { reason } => info!("Gesture stream closed: {}", reason),
                TransportEvent::Faulted { reason } => {
                    warn!("Gesture stream faulted: {}", reason)
                }
            }
        }
        messages
    }

    fn pump_vision(&mut self, max_batch: usize) -> Vec<TransportEvent> {
        let Some(conn) = self.connection.as_mut() else {
            return Vec::new();
        };
        let events = conn.drain(max_batch);

        for event in &events {
            match event {
                TransportEvent::Opened => {
                    if let Err(e) = conn.send_text(&self.start_command) {
                        warn!("Failed to send '{}': {}", self.start_command, e);
                    }
                    for listener in self.connection_listeners.iter_mut() {
                        listener(ConnectionState::Open);
                    }
                }
                TransportEvent::Message(msg) => {
                    if let VisionMessage::CameraList(list) = msg {
                        self.cameras = list.available_cameras.clone();
                    }
                    self.subscribers.dispatch(msg);
                }
                TransportEvent::Closed { reason } => {
                    info!("Vision connection closed: {}", reason);
                    for listener in self.connection_listeners.iter_mut() {
                        listener(ConnectionState::Closed);
                    }
                }
                TransportEvent::Faulted { reason } => {
                    warn!("Vision connection faulted: {}", reason);
                    for listener in self.connection_listeners.iter_mut() {
                        listener(ConnectionState::Faulted);
                    }
                }
            }
        }
        events
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            conn.close();
        }
        if let Some(conn) = self.gesture.as_mut() {
            conn.close();
        }
    }
}

impl CommandSink for VisionClient {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        self.send(command)
    }
}

// ---------------------------------------------------------------------------
// Control client
// ---------------------------------------------------------------------------

/// Backend launcher connection.  A mode selected before the socket opens is
/// sent once it does.
pub struct ControlClient {
    connection: Connection,
    pending: Option<BackendMode>,
}

impl ControlClient {
    pub fn connect(url: &str) -> Result<Self, TransportError> {
        Ok(Self::attach(Connection::open(url, 16)?))
    }

    pub fn attach(connection: Connection) -> Self {
        Self {
            connection,
            pending: None,
        }
    }

    pub fn select_mode(&mut self, mode: BackendMode) -> Result<(), TransportError> {
        match self.connection.state() {
            ConnectionState::Open => self.connection.send_text(mode.as_command()),
            ConnectionState::Connecting => {
                debug!("Backend mode '{}' queued until connected", mode.as_command());
                self.pending = Some(mode);
                Ok(())
            }
            state => Err(TransportError::NotOpen { state: state.name() }),
        }
    }

    /// Track the connection; flush a queued mode once it opens.
    pub fn pump(&mut self) -> ConnectionState {
        for event in self.connection.drain(usize::MAX) {
            match event {
                TransportEvent::Opened => {
                    if let Some(mode) = self.pending.take() {
                        info!("Selecting backend mode '{}'", mode.as_command());
                        if let Err(e) = self.connection.send_text(mode.as_command()) {
                            warn!("Failed to select backend mode: {}", e);
                        }
                    }
                }
                TransportEvent::Message(msg) => {
                    debug!("Ignoring {} on control connection", msg.kind())
                }
                TransportEvent::Closed { reason } | TransportEvent::Faulted { reason } => {
                    warn!("Control connection down: {}", reason);
                }
            }
        }
        self.connection.state()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn close(&mut self) {
        self.connection.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CameraList, FingerCount};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn frame_event() -> TransportEvent {
        TransportEvent::Message(VisionMessage::CameraFrame(Bytes::from_static(b"jpg")))
    }

    fn finger_event(count: u32) -> TransportEvent {
        TransportEvent::Message(VisionMessage::FingerCount(FingerCount { count }))
    }

    #[test]
    fn full_queue_evicts_oldest_frame_first() {
        let q = InboundQueue::new(3);
        q.push(finger_event(1));
        q.push(frame_event());
        q.push(finger_event(2));

        assert!(q.push(finger_event(3)));
        assert_eq!(
            q.drain(10),
            vec![finger_event(1), finger_event(2), finger_event(3)]
        );
    }

    #[test]
    fn full_queue_without_frames_drops_incoming_message() {
        let q = InboundQueue::new(2);
        q.push(finger_event(1));
        q.push(finger_event(2));
        assert!(!q.push(finger_event(3)));
        assert!(q.push(TransportEvent::Closed {
            reason: "bye".into()
        }));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn drain_respects_batch_size() {
        let q = InboundQueue::new(16);
        for i in 0..8 {
            q.push(finger_event(i));
        }
        assert_eq!(q.drain(5).len(), 5);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn send_before_open_is_rejected() {
        let (conn, _peer) = Connection::loopback(8);
        assert!(matches!(
            conn.send_text("process-scan"),
            Err(TransportError::NotOpen { state: "connecting" })
        ));
    }

    #[test]
    fn start_command_sent_on_open() {
        let (conn, mut peer) = Connection::loopback(8);
        let mut client = VisionClient::new(&TransportConfig::default());
        client.attach(conn);

        peer.open();
        client.pump(5);
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(peer.sent_commands(), vec!["start-camera".to_string()]);
    }

    #[test]
    fn subscribers_receive_only_their_kind() {
        let (conn, peer) = Connection::loopback(8);
        let mut client = VisionClient::new(&TransportConfig::default());
        client.attach(conn);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        client.subscribe(MessageKind::FingerCount, move |msg| {
            if let VisionMessage::FingerCount(fc) = msg {
                sink.borrow_mut().push(fc.count);
            }
        });

        peer.open();
        peer.deliver(&VisionMessage::FingerCount(FingerCount { count: 3 }));
        peer.deliver(&VisionMessage::ProcessingComplete);
        peer.deliver_raw(Bytes::from_static(&[99]));
        client.pump(5);

        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn connection_listeners_see_close() {
        let (conn, peer) = Connection::loopback(8);
        let mut client = VisionClient::new(&TransportConfig::default());
        client.attach(conn);

        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = states.clone();
        client.on_connection(move |s| sink.borrow_mut().push(s));

        peer.open();
        peer.fault("reset by peer");
        client.pump(5);

        assert_eq!(
            *states.borrow(),
            vec![ConnectionState::Open, ConnectionState::Faulted]
        );
        assert!(client.send("process-scan").is_err());
        assert!(!client.can_reconnect());
    }

    #[test]
    fn camera_list_is_remembered() {
        let (conn, peer) = Connection::loopback(8);
        let mut client = VisionClient::new(&TransportConfig::default());
        client.attach(conn);
        peer.open();
        peer.deliver(&VisionMessage::CameraList(CameraList {
            available_cameras: vec![0, 2],
        }));
        client.pump(5);
        assert_eq!(client.cameras(), &[0, 2]);
    }

    #[test]
    fn gesture_stream_feeds_messages_only() {
        let (conn, vision_peer) = Connection::loopback(8);
        let (gesture, mut gesture_peer) = Connection::loopback(8);
        let mut client = VisionClient::new(&TransportConfig::default());
        client.attach(conn);
        client.attach_gesture(gesture);

        vision_peer.open();
        gesture_peer.open();
        gesture_peer.deliver(&VisionMessage::FingerCount(FingerCount { count: 2 }));
        gesture_peer.close("selector left");
        let events = client.pump(5);

        assert_eq!(
            events,
            vec![
                TransportEvent::Opened,
                TransportEvent::Message(VisionMessage::FingerCount(FingerCount { count: 2 })),
            ]
        );
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.gesture_state(), ConnectionState::Closed);
        // the start command goes to the vision service only
        assert!(gesture_peer.take_sent().is_empty());
        assert!(!client.can_reconnect_gesture());
    }

    #[test]
    fn switch_camera_sends_tagged_frame() {
        let (conn, mut peer) = Connection::loopback(8);
        let mut client = VisionClient::new(&TransportConfig::default());
        client.attach(conn);
        peer.open();
        client.pump(5);
        peer.take_sent();

        client.switch_camera(1).unwrap();
        let sent = peer.take_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Binary(frame) => {
                assert_eq!(frame[0], MessageKind::SwitchCameraRequest.tag());
                assert_eq!(&frame[1..], br#"{"index":1}"#);
            }
            other => panic!("expected binary frame, got {:?}", other),
        }
    }

    #[test]
    fn control_mode_waits_for_open() {
        let (conn, mut peer) = Connection::loopback(8);
        let mut control = ControlClient::attach(conn);

        control.select_mode(BackendMode::MultiplayerPlacer).unwrap();
        assert!(peer.sent_commands().is_empty());

        peer.open();
        assert_eq!(control.pump(), ConnectionState::Open);
        assert_eq!(
            peer.sent_commands(),
            vec!["start_multiplayer_placer".to_string()]
        );
    }
}
