//! Common test utilities for interlink integration tests
//!
//! Provides a scriptable mock interactive server speaking the JSON frame
//! protocol over WebSocket, and a canned-response HTTP server for preflight
//! tests.

// Not every test binary uses every helper
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use interlink::SocketEvent;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Per-connection behavior of the mock interactive server
#[derive(Clone)]
#[allow(dead_code)]
pub enum Script {
    /// Reply `{result: null}` to every method frame
    ReplyNull,
    /// Reply `{result: null, seq}` with the given sequence number
    ReplyNullWithSeq(u32),
    /// Reply with the given error object to every method frame
    ReplyError {
        code: i64,
        message: String,
        path: Option<String>,
    },
    /// Never reply
    Silent,
    /// Push the given raw text frame on connect, then reply null
    PushOnConnect(String),
    /// Close with the given code right after the connection opens
    CloseOnConnect(u16),
    /// Close the first connection with the given code, reply null afterwards
    CloseFirstThenReply(u16),
}

/// A scriptable mock interactive WebSocket server
pub struct MockInteractiveServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    received: Arc<Mutex<Vec<Value>>>,
    headers: Arc<Mutex<Vec<(String, String)>>>,
    request_uri: Arc<Mutex<Option<String>>>,
    connections: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockInteractiveServer {
    /// Create and start a new mock server with the given script
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let headers = Arc::new(Mutex::new(Vec::new()));
        let request_uri = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));

        {
            let shutdown = shutdown.clone();
            let received = received.clone();
            let headers = headers.clone();
            let request_uri = request_uri.clone();
            let connections = connections.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, _)) => {
                                    let index = connections.fetch_add(1, Ordering::SeqCst);
                                    let script = script.clone();
                                    let received = received.clone();
                                    let headers = headers.clone();
                                    let request_uri = request_uri.clone();
                                    tokio::spawn(async move {
                                        Self::handle_connection(
                                            stream, script, index, received, headers, request_uri,
                                        )
                                        .await;
                                    });
                                }
                                Err(e) => {
                                    eprintln!("Accept error: {}", e);
                                    break;
                                }
                            }
                        }
                        _ = shutdown.notified() => {
                            break;
                        }
                    }
                }
            });
        }

        Self {
            addr,
            shutdown,
            received,
            headers,
            request_uri,
            connections,
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        script: Script,
        index: usize,
        received: Arc<Mutex<Vec<Value>>>,
        headers: Arc<Mutex<Vec<(String, String)>>>,
        request_uri: Arc<Mutex<Option<String>>>,
    ) {
        let callback = {
            let headers = headers.clone();
            let request_uri = request_uri.clone();
            move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                request_uri.lock().unwrap().replace(req.uri().to_string());
                let mut captured = headers.lock().unwrap();
                captured.clear();
                for (name, value) in req.headers() {
                    captured.push((
                        name.to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    ));
                }
                Ok(resp)
            }
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        // Connection-open actions
        match &script {
            Script::CloseOnConnect(code) => {
                let _ = write
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(*code),
                        reason: "".into(),
                    })))
                    .await;
            }
            Script::CloseFirstThenReply(code) if index == 0 => {
                let _ = write
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(*code),
                        reason: "".into(),
                    })))
                    .await;
            }
            Script::PushOnConnect(raw) => {
                let _ = write.send(Message::Text(raw.clone())).await;
            }
            _ => {}
        }

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let frame: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    received.lock().unwrap().push(frame.clone());

                    let reply = Self::reply_for(&script, index, &frame);
                    if let Some(reply) = reply {
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    /// The reply frame the script calls for, if any
    fn reply_for(script: &Script, index: usize, frame: &Value) -> Option<Value> {
        // Only method frames carrying an id and not flagged discard get replies
        let id = frame.get("id")?.as_u64()?;
        if frame.get("discard").and_then(Value::as_bool) == Some(true) {
            return None;
        }
        match script {
            Script::ReplyNull | Script::PushOnConnect(_) => Some(json!({
                "type": "reply", "id": id, "result": null, "error": null,
            })),
            Script::CloseFirstThenReply(_) if index > 0 => Some(json!({
                "type": "reply", "id": id, "result": null, "error": null,
            })),
            Script::ReplyNullWithSeq(seq) => Some(json!({
                "type": "reply", "id": id, "result": null, "error": null, "seq": seq,
            })),
            Script::ReplyError {
                code,
                message,
                path,
            } => Some(json!({
                "type": "reply", "id": id, "result": null,
                "error": {"code": code, "message": message, "path": path},
            })),
            _ => None,
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// All frames received so far, across every connection
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Handshake headers captured on the most recent connection
    pub fn captured_headers(&self) -> Vec<(String, String)> {
        self.headers.lock().unwrap().clone()
    }

    /// A captured header value, looked up case-insensitively
    pub fn header(&self, name: &str) -> Option<String> {
        self.captured_headers()
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Request path and query of the most recent connection
    pub fn request_uri(&self) -> Option<String> {
        self.request_uri.lock().unwrap().clone()
    }

    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockInteractiveServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A one-response HTTP server for preflight tests
pub struct MockHttpServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

#[allow(dead_code)]
impl MockHttpServer {
    /// Serve the given status and body to every request
    pub async fn start(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                tokio::spawn(async move {
                                    Self::handle_request(stream, status, body).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = shutdown_clone.notified() => break,
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_request(mut stream: TcpStream, status: u16, body: &'static str) {
        // Read until the end of the request head
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(_) => return,
            }
        }

        let response = format!(
            "HTTP/1.1 {} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    /// Get a stream-scheme URL pointing at this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll the event stream until an event matches or the deadline passes
#[allow(dead_code)]
pub async fn wait_for_event<F>(
    events: &crossbeam_channel::Receiver<SocketEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<SocketEvent>
where
    F: FnMut(&SocketEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        while let Ok(event) = events.try_recv() {
            if predicate(&event) {
                return Some(event);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
