//! Typed connections.
//!
//! A session multiplexes its traffic over several socket connections, each
//! tagged with the service it carries. Every connection runs the same frame
//! protocol; the tag decides which handshake finalization the session runs
//! once the server acknowledges the hello.

pub mod redirect;
pub mod transport;

use std::sync::Arc;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::codec::frame::{Frame, FrameDecoder, InboundFrame, SequenceCounter};
use crate::constants::family;

pub use redirect::parse_host_port;
pub use transport::{BoxedStream, TcpTransport, Transport};

/// Opaque connection identifier, unique within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

/// What a connection carries. At most one of each kind per session, except
/// chat rooms, which get one connection each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnKind {
    Auth,
    Primary,
    Admin,
    ChatNav,
    Chat,
    Icon,
    Alerts,
}

impl ConnKind {
    /// The service id used when asking the primary connection for a
    /// redirect to this kind. Auth and primary connections are never
    /// requested that way.
    pub fn service_id(self) -> Option<u16> {
        match self {
            ConnKind::Auth | ConnKind::Primary => None,
            ConnKind::Admin => Some(family::ADMIN),
            ConnKind::ChatNav => Some(family::CHAT_NAV),
            ConnKind::Chat => Some(family::CHAT),
            ConnKind::Icon => Some(family::ICON),
            ConnKind::Alerts => Some(family::ALERTS),
        }
    }

    /// Inverse lookup for redirect targets. The generic service id names
    /// the primary session itself.
    pub fn from_service_id(id: u16) -> Option<Self> {
        match id {
            family::SERVICE => Some(ConnKind::Primary),
            family::ADMIN => Some(ConnKind::Admin),
            family::CHAT_NAV => Some(ConnKind::ChatNav),
            family::CHAT => Some(ConnKind::Chat),
            family::ICON => Some(ConnKind::Icon),
            family::ALERTS => Some(ConnKind::Alerts),
            _ => None,
        }
    }

    /// Kinds whose servers drop encrypted connects outright. Redirects
    /// asking for encryption on these are downgraded to plaintext.
    pub fn rejects_encryption(self) -> bool {
        matches!(self, ConnKind::ChatNav | ConnKind::Chat)
    }

    /// Losing a connection of this kind ends the whole session.
    pub fn is_fatal(self) -> bool {
        matches!(self, ConnKind::Auth | ConnKind::Primary)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnKind::Auth => "auth",
            ConnKind::Primary => "primary",
            ConnKind::Admin => "admin",
            ConnKind::ChatNav => "chatnav",
            ConnKind::Chat => "chat",
            ConnKind::Icon => "icon",
            ConnKind::Alerts => "alerts",
        }
    }
}

impl std::fmt::Display for ConnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a connection task reports back to the session loop.
#[derive(Debug)]
pub enum ConnEvent {
    /// Transport is up and the hello went out.
    Established,
    Frame(InboundFrame),
    /// The connection is gone. `error` is set for failures, absent for an
    /// orderly close.
    Closed { error: Option<anyhow::Error> },
}

/// Where to dial a connection and what to present once there.
#[derive(Debug, Clone)]
pub struct ConnTarget {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    /// Forwarded byte-for-byte in the hello. Absent only for the very
    /// first, authentication connection.
    pub cookie: Option<Vec<u8>>,
}

/// Session-side handle for one spawned connection.
///
/// Owns the task that dials and reads the socket plus the queue feeding its
/// writer task.
pub struct Conn {
    id: ConnId,
    kind: ConnKind,
    frame_tx: UnboundedSender<Frame>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Conn {
    /// Spawns the connection task: dial, send the hello, then pump frames
    /// into `event_tx` until the socket closes.
    pub fn spawn(
        id: ConnId,
        kind: ConnKind,
        transport: Arc<dyn Transport>,
        target: ConnTarget,
        event_tx: UnboundedSender<(ConnId, ConnEvent)>,
    ) -> Self {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Frame>();
        let hello_tx = frame_tx.clone();
        let task = tokio::spawn(Self::run(id, kind, transport, target, hello_tx, frame_rx, event_tx));
        Self {
            id,
            kind,
            frame_tx,
            task,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    /// Queues a frame for the writer task. Returns `false` once the
    /// connection is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.frame_tx.send(frame).is_ok()
    }

    /// Tears the connection down, aborting its tasks. Queued frames are
    /// still flushed by the writer before it notices the closed queue.
    pub fn disconnect(self) {
        self.task.abort();
    }

    async fn run(
        id: ConnId,
        kind: ConnKind,
        transport: Arc<dyn Transport>,
        target: ConnTarget,
        frame_tx: UnboundedSender<Frame>,
        frame_rx: UnboundedReceiver<Frame>,
        event_tx: UnboundedSender<(ConnId, ConnEvent)>,
    ) {
        let stream = match transport
            .connect(&target.host, target.port, target.secure)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[conn] {kind} connect to {}:{} failed: {e:#}", target.host, target.port);
                let _ = event_tx.send((id, ConnEvent::Closed { error: Some(e) }));
                return;
            }
        };
        log::info!("[conn] {kind} connected to {}:{}", target.host, target.port);

        let (reader, writer) = split(stream);
        let write_handle = tokio::spawn(Self::write_loop(kind, writer, frame_rx));

        // The hello goes out first; the writer task assigns it the initial
        // sequence number.
        let _ = frame_tx.send(Frame::hello(target.cookie.clone()));
        let _ = event_tx.send((id, ConnEvent::Established));

        Self::read_loop(id, kind, reader, &event_tx).await;

        // Reader is done; release our queue sender so the writer drains
        // whatever the session already queued and exits.
        drop(frame_tx);
        let _ = write_handle.await;
    }

    async fn read_loop(
        id: ConnId,
        kind: ConnKind,
        mut reader: tokio::io::ReadHalf<BoxedStream>,
        event_tx: &UnboundedSender<(ConnId, ConnEvent)>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 16 * 1024];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    log::info!("[conn] {kind} closed by server");
                    let _ = event_tx.send((id, ConnEvent::Closed { error: None }));
                    break;
                }
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    loop {
                        match decoder.next_frame() {
                            Ok(Some(frame)) => {
                                if event_tx.send((id, ConnEvent::Frame(frame))).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                log::error!("[conn] {kind} frame decode error: {e:#}");
                                let _ = event_tx.send((id, ConnEvent::Closed { error: Some(e) }));
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    log::error!("[conn] {kind} read error: {e}");
                    let _ = event_tx.send((id, ConnEvent::Closed { error: Some(e.into()) }));
                    break;
                }
            }
        }
    }

    async fn write_loop(
        kind: ConnKind,
        mut writer: tokio::io::WriteHalf<BoxedStream>,
        mut frame_rx: UnboundedReceiver<Frame>,
    ) {
        let mut seq = SequenceCounter::new();
        while let Some(frame) = frame_rx.recv().await {
            let close = matches!(frame, Frame::Close);
            // The session bounds everything it queues; a frame too big for
            // the length field is dropped whole rather than sent truncated,
            // which would desynchronize the stream.
            let bytes = match frame.encode(seq.next_seq()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("[conn] {kind} dropping unencodable frame: {e:#}");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(&bytes).await {
                log::error!("[conn] {kind} write error: {e}");
                break;
            }
            if close {
                break;
            }
        }
        let _ = writer.shutdown().await;
    }
}
