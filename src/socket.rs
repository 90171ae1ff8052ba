//! The connection state machine
//!
//! A [`Socket`] is a cheap handle in front of a single driver task that
//! exclusively owns the underlying stream. Commands (connect, close, packet
//! submissions) flow to the driver over a channel and every stream event,
//! timer fire and command is handled serialized on that one task, so no two
//! handlers ever overlap.
//!
//! The driver keeps the pending-packet queue, correlates inbound replies to
//! packets by method id, performs the HTTP preflight before each attempt,
//! and runs the reconnect loop with the configured backoff policy.

use crate::config::{
    SocketOptions, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER, QUEUED_SEND_TIMEOUT,
};
use crate::connection_state::{AtomicMetrics, AtomicSocketState, Metrics, SocketState};
use crate::packet::{Packet, PacketState};
use crate::preflight::preflight_with;
use crate::protocol::{Frame, Method, ProtocolError, Reply};
use crate::traits::checker::ReconnectChecker;
use crate::traits::error::{InteractiveError, Result};
use crate::traits::reconnect::ReconnectionPolicy;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type WsError = tokio_tungstenite::tungstenite::Error;
type ConnectAck = oneshot::Sender<Result<()>>;
type CloseAck = oneshot::Sender<()>;

/// Close codes that trigger automatic reconnection
const RECOVERABLE_CLOSE_CODES: [u16; 2] = [1000, 1011];

/// How long a close handshake may take before the stream is abandoned
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

fn is_recoverable(code: u16) -> bool {
    RECOVERABLE_CLOSE_CODES.contains(&code)
}

/// Events surfaced by a [`Socket`]
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// The stream is open and the queue has been drained
    Open,
    /// A clean close completed
    Closed,
    /// A recoverable disconnect occurred; next attempt after `delay`
    Reconnecting { delay: Duration },
    /// Server-initiated method call
    Method(Method),
    /// Connection-level failure
    Error(InteractiveError),
}

enum Command {
    Connect(ConnectAck),
    Close(CloseAck),
    Submit(u32),
}

struct QueueEntry {
    packet: Packet,
    reply_tx: Option<oneshot::Sender<Result<Value>>>,
}

type Queue = Arc<Mutex<HashMap<u32, QueueEntry>>>;

/// Reconnecting request/reply transport over a WebSocket stream
///
/// Created from [`SocketOptions`]; must be created inside a Tokio runtime
/// because it spawns its driver task immediately.
pub struct Socket {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_rx: crossbeam_channel::Receiver<SocketEvent>,
    state: Arc<AtomicSocketState>,
    metrics: Arc<AtomicMetrics>,
    queue: Queue,
    seq: Arc<AtomicU32>,
    next_id: AtomicU32,
    reply_timeout: Duration,
}

impl Socket {
    /// Create a socket and spawn its driver task
    pub fn new(options: SocketOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let state = Arc::new(AtomicSocketState::new(SocketState::Idle));
        let metrics = Arc::new(AtomicMetrics::new());
        let queue: Queue = Arc::new(Mutex::new(HashMap::new()));
        let seq = Arc::new(AtomicU32::new(0));

        let driver = Driver {
            url: options.url,
            auth_token: options.auth_token,
            extra_headers: options.extra_headers,
            query_params: options.query_params,
            preflight_enabled: options.preflight_enabled,
            policy: options.policy,
            checker: options.checker,
            http: reqwest::Client::new(),
            cmd_rx,
            event_tx,
            state: Arc::clone(&state),
            metrics: Arc::clone(&metrics),
            queue: Arc::clone(&queue),
            seq: Arc::clone(&seq),
        };
        tokio::spawn(driver.run());

        Self {
            cmd_tx,
            event_rx,
            state,
            metrics,
            queue,
            seq,
            next_id: AtomicU32::new(0),
            reply_timeout: options.reply_timeout,
        }
    }

    /// Current lifecycle state (never suspends)
    pub fn state(&self) -> SocketState {
        self.state.get()
    }

    /// Number of packets in the pending queue (never suspends)
    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    /// Last sequence number observed from the server
    pub fn sequence_number(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    /// Point-in-time metrics snapshot
    pub fn metrics(&self) -> Metrics {
        Metrics {
            messages_sent: self.metrics.messages_sent(),
            messages_received: self.metrics.messages_received(),
            reconnect_count: self.metrics.reconnect_count(),
            state: self.state.get(),
        }
    }

    /// A receiver for the socket's event stream
    pub fn events(&self) -> crossbeam_channel::Receiver<SocketEvent> {
        self.event_rx.clone()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<SocketEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> std::result::Result<SocketEvent, crossbeam_channel::RecvError> {
        self.event_rx.recv()
    }

    /// Open the underlying stream
    ///
    /// Resolves once the stream is open (after preflight, if enabled), or
    /// with the error that ended the connect cycle. While a connection is
    /// already established this resolves immediately.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect(tx))
            .map_err(|_| InteractiveError::Cancelled)?;
        rx.await.map_err(|_| InteractiveError::Cancelled)?
    }

    /// Close the stream, cancelling every queued packet
    ///
    /// Resolves once the socket is back at Idle. During a reconnect wait
    /// this cancels the pending timer.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Build a method with a fresh id and wrap it in a packet
    ///
    /// Use this instead of [`Socket::execute`] when the caller needs the
    /// packet handle, e.g. to cancel the request later.
    pub fn prepare(&self, method: impl Into<String>, params: Value, discard: bool) -> Packet {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Packet::new(Method::new(id, method, params, discard))
    }

    /// Call a remote method and await its outcome
    pub async fn execute(
        &self,
        method: impl Into<String>,
        params: Value,
        discard: bool,
    ) -> Result<Value> {
        let packet = self.prepare(method, params, discard);
        self.send(packet).await
    }

    /// Queue a packet and await its reply
    ///
    /// While disconnected the packet waits in the queue for the next open
    /// (bounded by a fallback timeout). Once the frame is written, discard
    /// packets resolve immediately with `null`; all others wait for the
    /// correlated reply within the packet's timeout.
    pub async fn send(&self, packet: Packet) -> Result<Value> {
        if packet.is_cancelled() {
            return Err(InteractiveError::Cancelled);
        }
        let id = packet.id();
        let (send_rx, cancel_rx) = match (packet.subscribe_send(), packet.subscribe_cancel()) {
            (Some(send_rx), Some(cancel_rx)) => (send_rx, cancel_rx),
            _ => {
                debug!(id, "packet was already submitted once");
                return Err(InteractiveError::Cancelled);
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue.lock().insert(
            id,
            QueueEntry {
                packet: packet.clone(),
                reply_tx: Some(reply_tx),
            },
        );

        if self.cmd_tx.send(Command::Submit(id)).is_err() {
            self.queue.lock().remove(&id);
            return Err(InteractiveError::Cancelled);
        }

        let mut send_rx = send_rx;
        let mut cancel_rx = cancel_rx;
        let mut reply_rx = reply_rx;

        enum Written {
            Yes,
            Lost,
            Cancelled,
        }

        // Fallback bound on the time a packet may wait for a connection
        let written = tokio::time::timeout(QUEUED_SEND_TIMEOUT, async {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => Written::Cancelled,
                sent = &mut send_rx => {
                    if sent.is_ok() { Written::Yes } else { Written::Lost }
                }
            }
        })
        .await;

        match written {
            Err(_) => {
                // Still queued: detach the listeners, leave the packet in place
                if let Some(entry) = self.queue.lock().get_mut(&id) {
                    entry.reply_tx = None;
                }
                return Err(InteractiveError::Timeout);
            }
            Ok(Written::Cancelled) | Ok(Written::Lost) => {
                self.queue.lock().remove(&id);
                return Err(InteractiveError::Cancelled);
            }
            Ok(Written::Yes) => {}
        }

        if packet.method().discard {
            // No reply will ever come; the frame is on the wire
            self.queue.lock().remove(&id);
            return Ok(Value::Null);
        }

        enum Settled {
            Reply(std::result::Result<Result<Value>, oneshot::error::RecvError>),
            Cancelled,
        }

        let reply_timeout = packet.timeout_or(self.reply_timeout);
        let outcome = tokio::time::timeout(reply_timeout, async {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => Settled::Cancelled,
                reply = &mut reply_rx => Settled::Reply(reply),
            }
        })
        .await;

        match outcome {
            Err(_) => {
                // The method may still be in flight on the server: leave the
                // packet queued and only detach the local listeners
                if let Some(entry) = self.queue.lock().get_mut(&id) {
                    entry.reply_tx = None;
                }
                Err(InteractiveError::Timeout)
            }
            Ok(Settled::Cancelled) => {
                self.queue.lock().remove(&id);
                Err(InteractiveError::Cancelled)
            }
            Ok(Settled::Reply(Ok(result))) => result,
            Ok(Settled::Reply(Err(_))) => Err(InteractiveError::Cancelled),
        }
    }
}

enum CycleEnd {
    Idle,
    Shutdown,
}

enum AttemptOutcome {
    /// A clean local close finished; the socket is Idle
    Clean,
    /// connect() arrived during the close; dial again immediately
    Reopen(Vec<ConnectAck>),
    /// Non-recoverable failure: stop the cycle
    Fatal(InteractiveError),
    /// Recoverable failure: retry with backoff
    Retry(InteractiveError),
    /// Command channel closed: stop the driver
    Shutdown,
}

enum BackoffOutcome {
    Proceed,
    Closed,
    Shutdown,
}

/// The single task owning the stream and all socket state transitions
struct Driver {
    url: String,
    auth_token: Option<String>,
    extra_headers: Vec<(String, String)>,
    query_params: HashMap<String, String>,
    preflight_enabled: bool,
    policy: Box<dyn ReconnectionPolicy>,
    checker: Arc<dyn ReconnectChecker>,
    http: reqwest::Client,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: crossbeam_channel::Sender<SocketEvent>,
    state: Arc<AtomicSocketState>,
    metrics: Arc<AtomicMetrics>,
    queue: Queue,
    seq: Arc<AtomicU32>,
}

impl Driver {
    async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Connect(ack) => {
                    if matches!(self.connect_cycle(vec![ack]).await, CycleEnd::Shutdown) {
                        break;
                    }
                }
                Command::Close(ack) => {
                    // Already idle
                    let _ = ack.send(());
                }
                Command::Submit(_) => {
                    // Stays queued until a connection opens
                }
            }
        }
        debug!("Socket driver exiting");
    }

    /// Run connection attempts until the socket settles back at Idle
    async fn connect_cycle(&mut self, mut acks: Vec<ConnectAck>) -> CycleEnd {
        loop {
            self.state.set(SocketState::Connecting);
            match self.attempt(&mut acks).await {
                AttemptOutcome::Clean => return CycleEnd::Idle,
                AttemptOutcome::Shutdown => return CycleEnd::Shutdown,
                AttemptOutcome::Reopen(reopen_acks) => {
                    acks = reopen_acks;
                }
                AttemptOutcome::Fatal(err) => {
                    self.finish_fatal(err, &mut acks);
                    return CycleEnd::Idle;
                }
                AttemptOutcome::Retry(err) => match self.policy.next_delay() {
                    None => {
                        warn!("Reconnection policy exhausted, giving up");
                        self.finish_fatal(err, &mut acks);
                        return CycleEnd::Idle;
                    }
                    Some(delay) => {
                        info!("Reconnecting in {:?}", delay);
                        self.state.set(SocketState::Reconnecting);
                        self.metrics.increment_reconnects();
                        self.emit(SocketEvent::Reconnecting { delay });
                        match self.backoff_wait(delay, &mut acks).await {
                            BackoffOutcome::Proceed => {}
                            BackoffOutcome::Closed => return CycleEnd::Idle,
                            BackoffOutcome::Shutdown => return CycleEnd::Shutdown,
                        }
                    }
                },
            }
        }
    }

    /// One checker + preflight + dial + session round
    async fn attempt(&mut self, acks: &mut Vec<ConnectAck>) -> AttemptOutcome {
        // Caller-supplied gate, awaited before every attempt
        if let Err(e) = self.checker.check().await {
            warn!("Reconnect checker vetoed the attempt: {}", e);
            return AttemptOutcome::Fatal(e);
        }

        if self.preflight_enabled {
            let headers = connect_headers(&self.extra_headers, self.auth_token.as_deref());
            if let Err(e) = preflight_with(&self.http, &self.url, &headers).await {
                warn!("Preflight failed: {}", e);
                let transient =
                    matches!(&e, InteractiveError::Preflight(p) if p.is_transient());
                return if transient {
                    AttemptOutcome::Retry(e)
                } else {
                    AttemptOutcome::Fatal(e)
                };
            }
        }

        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => return AttemptOutcome::Fatal(e),
        };

        debug!("Dialing {}", self.url);
        let dial = connect_async(request);
        tokio::pin!(dial);
        let stream = loop {
            tokio::select! {
                res = &mut dial => match res {
                    Ok((stream, _response)) => break stream,
                    Err(e) => {
                        error!("Failed to connect: {}", e);
                        return AttemptOutcome::Retry(InteractiveError::WebSocket(e.to_string()));
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect(ack)) => acks.push(ack),
                    Some(Command::Close(ack)) => {
                        debug!("Close during dial: abandoning the attempt");
                        self.fail_queue();
                        self.state.set(SocketState::Idle);
                        self.emit(SocketEvent::Closed);
                        for a in acks.drain(..) {
                            let _ = a.send(Err(InteractiveError::Cancelled));
                        }
                        let _ = ack.send(());
                        return AttemptOutcome::Clean;
                    }
                    Some(Command::Submit(_)) => {}
                    None => return AttemptOutcome::Shutdown,
                }
            }
        };

        info!("Connected to {}", self.url);
        self.state.set(SocketState::Connected);
        self.policy.reset();
        for ack in acks.drain(..) {
            let _ = ack.send(Ok(()));
        }
        self.emit(SocketEvent::Open);

        self.session(stream).await
    }

    /// Pump an open stream until it closes one way or another
    async fn session(&mut self, stream: WsStream) -> AttemptOutcome {
        let (mut sink, mut source) = stream.split();

        if let Err(e) = self.drain_queue(&mut sink).await {
            error!("WebSocket error while draining the queue: {}", e);
            return AttemptOutcome::Retry(InteractiveError::WebSocket(e.to_string()));
        }

        loop {
            tokio::select! {
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            error!("Failed to send pong: {}", e);
                            return AttemptOutcome::Retry(InteractiveError::WebSocket(e.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => return self.classify_close(frame),
                    Some(Ok(_)) => {
                        // Binary and pong frames are not part of the protocol
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return AttemptOutcome::Retry(InteractiveError::WebSocket(e.to_string()));
                    }
                    None => {
                        warn!("Stream ended without a close frame");
                        return AttemptOutcome::Retry(InteractiveError::WebSocket(
                            "stream ended unexpectedly".to_string(),
                        ));
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Submit(id)) => {
                        if let Err(e) = self.transmit_id(&mut sink, id).await {
                            error!("WebSocket error while sending: {}", e);
                            return AttemptOutcome::Retry(InteractiveError::WebSocket(e.to_string()));
                        }
                    }
                    Some(Command::Connect(ack)) => {
                        // Already connected
                        let _ = ack.send(Ok(()));
                    }
                    Some(Command::Close(ack)) => {
                        return self.shutdown_stream(&mut sink, &mut source, ack).await;
                    }
                    None => {
                        // The handle was dropped: part quietly and stop
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "".into(),
                            })))
                            .await;
                        return AttemptOutcome::Shutdown;
                    }
                }
            }
        }
    }

    /// Perform a clean local close: send close(1000), cancel the queue,
    /// then wait for the peer to finish the handshake
    async fn shutdown_stream(
        &mut self,
        sink: &mut WsSink,
        source: &mut WsSource,
        ack: CloseAck,
    ) -> AttemptOutcome {
        info!("Closing the stream");
        self.state.set(SocketState::Closing);
        self.fail_queue();

        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        if let Err(e) = sink.send(close).await {
            debug!("Close frame could not be written: {}", e);
        }

        let mut close_acks = vec![ack];
        let mut reopen_acks: Vec<ConnectAck> = Vec::new();
        let deadline = tokio::time::sleep(CLOSE_HANDSHAKE_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("Close handshake timed out; abandoning the stream");
                    break;
                }
                msg = source.next() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {
                        // Late frames are dropped during close
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect(connect_ack)) => {
                        debug!("Connect during close: refreshing once the stream is down");
                        self.state.set(SocketState::Refreshing);
                        reopen_acks.push(connect_ack);
                    }
                    Some(Command::Close(extra)) => close_acks.push(extra),
                    Some(Command::Submit(_)) => {}
                    None => {
                        for a in close_acks {
                            let _ = a.send(());
                        }
                        return AttemptOutcome::Shutdown;
                    }
                }
            }
        }

        self.state.set(SocketState::Idle);
        self.emit(SocketEvent::Closed);
        for a in close_acks {
            let _ = a.send(());
        }
        if reopen_acks.is_empty() {
            AttemptOutcome::Clean
        } else {
            AttemptOutcome::Reopen(reopen_acks)
        }
    }

    /// Map a peer close frame onto the reconnect-or-fail decision
    fn classify_close(&mut self, frame: Option<CloseFrame<'_>>) -> AttemptOutcome {
        let (code, reason) = match frame {
            Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
            // Closed without a status code: treat like a dropped transport
            None => {
                info!("Stream closed by peer without a status code");
                return AttemptOutcome::Retry(InteractiveError::WebSocket(
                    "closed without a status code".to_string(),
                ));
            }
        };
        info!("Stream closed by peer: code {} reason {:?}", code, reason);
        if is_recoverable(code) {
            AttemptOutcome::Retry(InteractiveError::WebSocket(format!(
                "closed with code {code}"
            )))
        } else {
            AttemptOutcome::Fatal(InteractiveError::Protocol(ProtocolError::from_close(
                code, reason,
            )))
        }
    }

    /// Wait out the backoff delay, staying responsive to commands
    async fn backoff_wait(
        &mut self,
        delay: Duration,
        acks: &mut Vec<ConnectAck>,
    ) -> BackoffOutcome {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return BackoffOutcome::Proceed,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect(ack)) => {
                        // An explicit connect short-circuits the timer
                        acks.push(ack);
                        return BackoffOutcome::Proceed;
                    }
                    Some(Command::Close(ack)) => {
                        debug!("Close during reconnect wait: cancelling the timer");
                        self.fail_queue();
                        self.state.set(SocketState::Idle);
                        self.emit(SocketEvent::Closed);
                        for a in acks.drain(..) {
                            let _ = a.send(Err(InteractiveError::Cancelled));
                        }
                        let _ = ack.send(());
                        return BackoffOutcome::Closed;
                    }
                    Some(Command::Submit(_)) => {}
                    None => return BackoffOutcome::Shutdown,
                }
            }
        }
    }

    /// Transmit every Pending packet in the queue
    ///
    /// Packets already Sending are left alone; cancelled leftovers are
    /// reaped instead of transmitted.
    async fn drain_queue(&mut self, sink: &mut WsSink) -> std::result::Result<(), WsError> {
        let pending: Vec<Packet> = {
            let mut queue = self.queue.lock();
            queue.retain(|_, entry| !entry.packet.is_cancelled());
            queue
                .values()
                .filter(|entry| entry.packet.state() == PacketState::Pending)
                .map(|entry| entry.packet.clone())
                .collect()
        };
        if !pending.is_empty() {
            debug!("Draining {} queued packet(s)", pending.len());
        }
        for packet in pending {
            self.transmit(sink, &packet).await?;
        }
        Ok(())
    }

    async fn transmit_id(&mut self, sink: &mut WsSink, id: u32) -> std::result::Result<(), WsError> {
        let packet = self.queue.lock().get(&id).map(|entry| entry.packet.clone());
        match packet {
            Some(packet) if packet.state() == PacketState::Pending => {
                self.transmit(sink, &packet).await
            }
            _ => Ok(()),
        }
    }

    /// Serialize one packet with the current sequence number and write it
    async fn transmit(&mut self, sink: &mut WsSink, packet: &Packet) -> std::result::Result<(), WsError> {
        if packet.is_cancelled() {
            self.queue.lock().remove(&packet.id());
            return Ok(());
        }
        let method = packet.stamp(self.seq.load(Ordering::Acquire));
        let text = match Frame::Method(method).to_json() {
            Ok(text) => text,
            Err(e) => {
                // Unserializable params settle the packet locally
                if let Some(mut entry) = self.queue.lock().remove(&packet.id()) {
                    if let Some(tx) = entry.reply_tx.take() {
                        let _ = tx.send(Err(e));
                    }
                }
                return Ok(());
            }
        };
        debug!(id = packet.id(), method = %packet.method().method, "Writing frame");
        sink.send(Message::Text(text)).await?;
        self.metrics.increment_sent();
        packet.mark_sent();
        Ok(())
    }

    /// Parse one inbound text frame and route it
    fn handle_frame(&mut self, raw: &str) {
        self.metrics.increment_received();
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Discarding unparseable frame: {}", e);
                self.emit(SocketEvent::Error(e));
                return;
            }
        };
        if let Some(seq) = frame.seq() {
            // Monotonically non-decreasing
            self.seq.fetch_max(seq, Ordering::AcqRel);
        }
        match frame {
            Frame::Method(method) => {
                debug!(method = %method.method, "Server push");
                self.emit(SocketEvent::Method(method));
            }
            Frame::Reply(reply) => self.settle(reply),
        }
    }

    /// Correlate a reply to its pending packet
    fn settle(&mut self, reply: Reply) {
        let entry = self.queue.lock().remove(&reply.id);
        let Some(mut entry) = entry else {
            debug!(id = reply.id, "Reply for an unknown or detached packet");
            return;
        };
        if entry.packet.is_cancelled() {
            // Cancel wins: the reply is dropped on the floor
            debug!(id = reply.id, "Dropping reply for a cancelled packet");
            return;
        }
        entry.packet.set_state(PacketState::Replied);
        if let Some(tx) = entry.reply_tx.take() {
            let _ = tx.send(reply.into_result());
        }
    }

    /// Cancel every queued packet and reject its future
    fn fail_queue(&mut self) {
        let entries: Vec<QueueEntry> = self.queue.lock().drain().map(|(_, entry)| entry).collect();
        if !entries.is_empty() {
            debug!("Cancelling {} queued packet(s)", entries.len());
        }
        for mut entry in entries {
            entry.packet.cancel();
            if let Some(tx) = entry.reply_tx.take() {
                let _ = tx.send(Err(InteractiveError::Cancelled));
            }
        }
    }

    /// End the cycle on a non-recoverable error
    ///
    /// A pending connect future gets the rejection; once the socket has
    /// been open the error rides the event stream instead.
    fn finish_fatal(&mut self, err: InteractiveError, acks: &mut Vec<ConnectAck>) {
        self.fail_queue();
        self.state.set(SocketState::Idle);
        if acks.is_empty() {
            self.emit(SocketEvent::Error(err));
        } else {
            for ack in acks.drain(..) {
                let _ = ack.send(Err(err.clone()));
            }
        }
    }

    fn build_request(&self) -> Result<http::Request<()>> {
        let url = compose_url(&self.url, &self.query_params)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| InteractiveError::WebSocket(e.to_string()))?;
        let headers = request.headers_mut();
        for (key, value) in connect_headers(&self.extra_headers, self.auth_token.as_deref()) {
            match (
                key.parse::<http::header::HeaderName>(),
                value.parse::<http::header::HeaderValue>(),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => {
                    warn!("Invalid connect header '{}': skipping", key);
                }
            }
        }
        Ok(request)
    }

    fn emit(&self, event: SocketEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Compose the connect-time header set
fn connect_headers(extra: &[(String, String)], auth_token: Option<&str>) -> Vec<(String, String)> {
    let mut headers = vec![(
        PROTOCOL_VERSION_HEADER.to_string(),
        PROTOCOL_VERSION.to_string(),
    )];
    headers.extend(extra.iter().cloned());
    if let Some(token) = auth_token {
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
    }
    headers
}

/// Merge caller query parameters into the URL's existing query
///
/// Caller values win on conflict.
fn compose_url(url: &str, query_params: &HashMap<String, String>) -> Result<Url> {
    let mut url = Url::parse(url)
        .map_err(|e| InteractiveError::WebSocket(format!("invalid stream url: {e}")))?;
    if !query_params.is_empty() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !query_params.contains_key(key.as_ref()))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        for (key, value) in query_params {
            pairs.append_pair(key, value);
        }
        drop(pairs);
    }
    Ok(url)
}
