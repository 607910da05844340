//! Unix socket relay playing the background context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use plumbline_core::context::ContextKind;
use plumbline_core::protocol::{Message, Payload};
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::relay::{paths, pump_lines, read_line_bounded, write_json_line, Control, Reply, MAX_LINE_SIZE};

/// Maximum number of concurrent connections.
const MAX_CONNECTIONS: usize = 100;

/// How long the relay waits with no peers before shutting itself down.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long in-flight connections get to finish once shutdown starts.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct Peer {
    context: ContextKind,
    outbound: mpsc::UnboundedSender<String>,
}

/// Connected contexts, keyed by peer id.
#[derive(Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerTable {
    async fn insert(&self, id: String, context: ContextKind, outbound: mpsc::UnboundedSender<String>) {
        self.peers.lock().await.insert(id, Peer { context, outbound });
    }

    async fn remove(&self, id: &str) {
        self.peers.lock().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    /// Queue `line` for every peer of `context` except `from`.
    ///
    /// Returns how many peers it was queued for.
    async fn forward(&self, from: &str, context: ContextKind, line: &str) -> usize {
        let peers = self.peers.lock().await;
        peers
            .iter()
            .filter(|(id, peer)| id.as_str() != from && peer.context == context)
            .filter(|(id, peer)| {
                let queued = peer.outbound.send(line.to_string()).is_ok();
                if !queued {
                    debug!("Peer {} is gone, skipping", id);
                }
                queued
            })
            .count()
    }
}

/// The relay server that accepts context connections.
pub struct RelayServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    peers: Arc<PeerTable>,
    connection_semaphore: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl RelayServer {
    /// Bind to the socket of the current relay instance.
    pub async fn bind() -> Result<Self> {
        paths::ensure_socket_dir().context("Failed to create socket directory")?;
        Self::bind_to(paths::get_socket_path(None), paths::get_pid_path(None)).await
    }

    /// Bind to a specific socket path.
    ///
    /// Binds first and only then inspects a socket already in use: if the PID
    /// file names a live process the bind fails, otherwise the stale socket is
    /// removed (never through a symlink, never a non-socket file) and the bind
    /// retried. The PID file is written right after a successful bind.
    pub async fn bind_to(socket_path: PathBuf, pid_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory for {:?}", socket_path))?;
        }

        let write_pid = |pid_path: &Path| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => {
                write_pid(&pid_path)?;
                l
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_relay_alive(&pid_path) {
                    anyhow::bail!("Relay already running (socket {:?} in use, PID file valid)", socket_path);
                }

                remove_stale_socket(&socket_path)?;

                let l = UnixListener::bind(&socket_path)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path))?;
                write_pid(&pid_path)?;
                l
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to bind to socket: {:?}", socket_path));
            }
        };

        info!("Relay listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
            pid_path,
            peers: Arc::new(PeerTable::default()),
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    /// Accept connections until shutdown is requested.
    ///
    /// In-flight connections get [`GRACEFUL_SHUTDOWN_TIMEOUT`] to finish
    /// before they are aborted.
    pub async fn run(&self) -> Result<()> {
        self.spawn_idle_shutdown_task();

        let mut connection_tasks: JoinSet<()> = JoinSet::new();
        let shutdown_signal = self.shutdown.notified();
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
                                warn!("Connection limit ({}) reached, rejecting new connection", MAX_CONNECTIONS);
                                drop(stream);
                                continue;
                            };

                            debug!("Accepted new connection");
                            let peers = self.peers.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, peers, shutdown).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(_) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {}
                _ = &mut shutdown_signal => {
                    info!("Shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        if !connection_tasks.is_empty() {
            info!("Waiting for {} in-flight connection(s) to complete", connection_tasks.len());

            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }

    /// Shut down after [`IDLE_TIMEOUT`] with no peers and no open connections.
    fn spawn_idle_shutdown_task(&self) {
        let peers = self.peers.clone();
        let shutdown = self.shutdown.clone();
        let semaphore = self.connection_semaphore.clone();

        tokio::spawn(async move {
            let mut idle_since: Option<Instant> = None;

            loop {
                tokio::time::sleep(IDLE_CHECK_INTERVAL).await;

                let busy = !peers.is_empty().await || semaphore.available_permits() < MAX_CONNECTIONS;
                if busy {
                    if idle_since.take().is_some() {
                        debug!("Peer activity detected, resetting idle timer");
                    }
                    continue;
                }

                let idle_start = *idle_since.get_or_insert_with(Instant::now);
                if idle_start.elapsed() >= IDLE_TIMEOUT {
                    info!("No peers for {} seconds, shutting down", IDLE_TIMEOUT.as_secs());
                    shutdown.notify_waiters();
                    break;
                }

                debug!(
                    "Idle for {} seconds (shutdown in {} seconds)",
                    idle_start.elapsed().as_secs(),
                    IDLE_TIMEOUT.saturating_sub(idle_start.elapsed()).as_secs()
                );
            }
        });
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("Failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}

/// A relay is alive when its PID file names a process that still exists.
fn is_relay_alive(pid_path: &Path) -> bool {
    let Ok(pid_str) = std::fs::read_to_string(pid_path) else {
        return false;
    };
    let Ok(pid) = pid_str.trim().parse::<i32>() else {
        return false;
    };

    // SAFETY: signal 0 performs only the existence and permission check;
    // nothing is delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

fn remove_stale_socket(socket_path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(socket_path)
        .with_context(|| format!("Failed to stat socket path: {:?}", socket_path))?;

    if metadata.file_type().is_symlink() {
        anyhow::bail!("Socket path {:?} is a symlink, refusing to delete it", socket_path);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            anyhow::bail!(
                "Path {:?} exists but is not a socket file (type: {:?})",
                socket_path,
                metadata.file_type()
            );
        }
    }

    info!("Removing stale socket from dead relay");
    std::fs::remove_file(socket_path).with_context(|| format!("Failed to remove stale socket: {:?}", socket_path))
}

/// Serve one connection: handshake, then relay message lines until EOF.
async fn handle_connection(stream: UnixStream, peers: Arc<PeerTable>, shutdown: Arc<Notify>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    if read_line_bounded(&mut reader, &mut line, MAX_LINE_SIZE).await? == 0 {
        debug!("Client disconnected before hello");
        return Ok(());
    }

    let context = match serde_json::from_str::<Control>(line.trim()) {
        Ok(Control::Hello { context }) => context,
        Ok(Control::Stop) => {
            write_json_line(&mut writer, &Reply::Stopping).await?;
            request_shutdown(shutdown);
            return Ok(());
        }
        Err(e) => {
            let reply = Reply::error(
                format!("Expected hello: {}", e),
                r#"Start every connection with {"hello":{"context":"content"}}"#,
            );
            return write_json_line(&mut writer, &reply).await;
        }
    };

    let peer_id = Uuid::new_v4().to_string();
    let (outbound, inbound) = mpsc::unbounded_channel();
    let welcome = serde_json::to_string(&Reply::Welcome { peer: peer_id.clone() })
        .context("Failed to serialize welcome")?;
    // Queued before the peer is visible, so it always arrives first.
    let _ = outbound.send(welcome);
    peers.insert(peer_id.clone(), context, outbound.clone()).await;
    info!("Peer {} joined as {} ({} connected)", peer_id, context, peers.len().await);

    let writer_task = tokio::spawn(pump_lines(writer, inbound));

    let result = relay_lines(&mut reader, &peer_id, &peers, &outbound, &shutdown).await;

    peers.remove(&peer_id).await;
    drop(outbound);
    if let Err(e) = writer_task.await {
        debug!("Writer for peer {} ended abnormally: {}", peer_id, e);
    }
    info!("Peer {} ({}) left", peer_id, context);
    result
}

async fn relay_lines(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    peer_id: &str,
    peers: &PeerTable,
    outbound: &mpsc::UnboundedSender<String>,
    shutdown: &Arc<Notify>,
) -> Result<()> {
    let stopping = shutdown.notified();
    tokio::pin!(stopping);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = read_line_bounded(reader, &mut line, MAX_LINE_SIZE) => read?,
            _ = &mut stopping => {
                debug!("Relay stopping, closing peer {}", peer_id);
                return Ok(());
            }
        };

        if bytes_read == 0 {
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                debug!("Dropping line from {} that is not JSON: {}", peer_id, e);
                continue;
            }
        };

        if let Ok(control) = serde_json::from_value::<Control>(value.clone()) {
            match control {
                Control::Stop => {
                    let reply = serde_json::to_string(&Reply::Stopping).context("Failed to serialize reply")?;
                    let _ = outbound.send(reply);
                    request_shutdown(shutdown.clone());
                }
                Control::Hello { .. } => warn!("Ignoring repeated hello from {}", peer_id),
            }
            continue;
        }

        match Message::decode(&value) {
            Some(message) => route(peers, peer_id, &message).await?,
            None => debug!("Dropping malformed message from {}", peer_id),
        }
    }
}

/// Deliver a message to every addressed context except the sender.
async fn route(peers: &PeerTable, from: &str, message: &Message) -> Result<()> {
    let line = serde_json::to_string(message).context("Failed to serialize message")?;

    for context in message.target.iter() {
        match context {
            ContextKind::Background => handle_background(message),
            other => {
                let delivered = peers.forward(from, other, &line).await;
                if delivered == 0 {
                    debug!("No {} peer for {}", other, message.kind());
                }
            }
        }
    }

    Ok(())
}

/// The relay's own handling of background-addressed messages.
fn handle_background(message: &Message) {
    match &message.payload {
        Payload::Screenshot {} => {
            info!("Screenshot requested by {}; capture is left to the browser host", message.source);
        }
        Payload::ExtensionToggle { active } => {
            info!("Extension {}", if *active { "enabled" } else { "disabled" });
        }
        _ => debug!("Background received {} from {}", message.kind(), message.source),
    }
}

fn request_shutdown(shutdown: Arc<Notify>) {
    info!("Received stop request, stopping relay");
    tokio::spawn(async move {
        // Give the reply a moment to flush.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumbline_core::context::ContextSet;
    use plumbline_core::dom::ElementHandle;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::time::timeout;

    fn temp_socket(tag: &str) -> (PathBuf, PathBuf) {
        let short_id = Uuid::new_v4().simple().to_string();
        let socket_path = std::env::temp_dir().join(format!("plumbline-{}-{}.sock", tag, &short_id[..8]));
        let pid_path = socket_path.with_extension("pid");
        (socket_path, pid_path)
    }

    struct TestPeer {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl TestPeer {
        async fn join(socket_path: &Path, context: ContextKind) -> Self {
            let stream = UnixStream::connect(socket_path).await.expect("connect");
            let (reader, writer) = stream.into_split();
            let mut peer = Self {
                reader: BufReader::new(reader),
                writer,
            };
            peer.write(&Control::Hello { context }).await;
            let welcome: Reply = serde_json::from_str(&peer.read_line().await).expect("welcome");
            assert!(matches!(welcome, Reply::Welcome { .. }));
            peer
        }

        async fn write<T: serde::Serialize>(&mut self, value: &T) {
            write_json_line(&mut self.writer, value).await.expect("write");
        }

        async fn read_line(&mut self) -> String {
            let mut line = String::new();
            timeout(Duration::from_secs(1), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a line")
                .expect("read");
            line
        }

        async fn expect_silence(&mut self) {
            let mut line = String::new();
            let read = timeout(Duration::from_millis(150), self.reader.read_line(&mut line)).await;
            assert!(read.is_err(), "unexpected line: {}", line);
        }
    }

    fn zoom_message(source: ContextKind, target: ContextSet) -> Message {
        Message {
            payload: Payload::ZoomChange { zoom: 2.0 },
            timestamp: 1_700_000_000_000,
            source: ContextSet::only(source),
            target,
        }
    }

    async fn start(tag: &str) -> (PathBuf, PathBuf, tokio::task::JoinHandle<()>) {
        let (socket_path, pid_path) = temp_socket(tag);
        let server = RelayServer::bind_to(socket_path.clone(), pid_path.clone())
            .await
            .expect("bind");
        let handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), server.run()).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (socket_path, pid_path, handle)
    }

    #[tokio::test]
    async fn forwards_to_addressed_peers_only() {
        let (socket_path, _pid_path, handle) = start("route").await;

        let mut popup = TestPeer::join(&socket_path, ContextKind::Popup).await;
        let mut content = TestPeer::join(&socket_path, ContextKind::Content).await;
        let mut other_popup = TestPeer::join(&socket_path, ContextKind::Popup).await;

        popup
            .write(&zoom_message(ContextKind::Popup, ContextSet::only(ContextKind::Content)))
            .await;

        let received: Message = serde_json::from_str(&content.read_line().await).expect("message");
        assert_eq!(received.payload, Payload::ZoomChange { zoom: 2.0 });
        assert!(received.source.contains(ContextKind::Popup));

        other_popup.expect_silence().await;
        popup.expect_silence().await;

        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_background() {
        let (socket_path, _pid_path, handle) = start("bcast").await;

        let mut first = TestPeer::join(&socket_path, ContextKind::Content).await;
        let mut second = TestPeer::join(&socket_path, ContextKind::Content).await;

        let hover = Message {
            payload: Payload::ElementHover {
                element: ElementHandle(3),
            },
            timestamp: 1,
            source: ContextSet::only(ContextKind::Content),
            target: ContextSet::ALL,
        };
        first.write(&hover).await;

        let received: Message = serde_json::from_str(&second.read_line().await).expect("message");
        assert_eq!(received, hover);
        first.expect_silence().await;

        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    #[tokio::test]
    async fn malformed_lines_are_dropped() {
        let (socket_path, _pid_path, handle) = start("drop").await;

        let mut sender = TestPeer::join(&socket_path, ContextKind::Popup).await;
        let mut content = TestPeer::join(&socket_path, ContextKind::Content).await;

        sender
            .write(&serde_json::json!({"type": "ZOOM_CHANGE", "payload": {"zoom": 2}}))
            .await;
        sender.writer.write_all(b"not json\n").await.expect("write");
        content.expect_silence().await;

        // The connection survives and still relays.
        sender
            .write(&zoom_message(ContextKind::Popup, ContextSet::only(ContextKind::Content)))
            .await;
        assert!(content.read_line().await.contains("ZOOM_CHANGE"));

        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    #[tokio::test]
    async fn rejects_connections_without_hello() {
        let (socket_path, _pid_path, handle) = start("nohello").await;

        let stream = UnixStream::connect(&socket_path).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        writer.write_all(b"{\"type\":\"KEYDOWN\"}\n").await.expect("write");

        let mut line = String::new();
        timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .expect("timeout")
            .expect("read");
        assert!(matches!(serde_json::from_str::<Reply>(&line), Ok(Reply::Error { .. })));

        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    #[tokio::test]
    async fn stop_shuts_down_and_cleans_up() {
        let (socket_path, pid_path) = temp_socket("stop");
        let server = RelayServer::bind_to(socket_path.clone(), pid_path.clone())
            .await
            .expect("bind");
        assert!(pid_path.exists());

        let handle = tokio::spawn(async move {
            server.run().await.expect("run");
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stream = UnixStream::connect(&socket_path).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        write_json_line(&mut writer, &Control::Stop).await.expect("write");

        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read");
        assert_eq!(serde_json::from_str::<Reply>(&line).expect("reply"), Reply::Stopping);

        timeout(Duration::from_secs(2), handle)
            .await
            .expect("relay did not stop")
            .expect("join");
        assert!(!socket_path.exists());
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let (socket_path, pid_path) = temp_socket("stale");
        {
            let _stale = std::os::unix::net::UnixListener::bind(&socket_path).expect("stale bind");
        }
        assert!(socket_path.exists());

        let server = RelayServer::bind_to(socket_path.clone(), pid_path.clone())
            .await
            .expect("bind over stale socket");
        assert_eq!(server.socket_path(), socket_path.as_path());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn bind_refuses_regular_file() {
        let (socket_path, pid_path) = temp_socket("file");
        std::fs::write(&socket_path, "not a socket").expect("write");

        let result = RelayServer::bind_to(socket_path.clone(), pid_path.clone()).await;
        assert!(result.is_err());
        assert!(socket_path.exists());

        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path);
    }

    #[tokio::test]
    async fn bind_creates_parent_dir() {
        let short_id = Uuid::new_v4().simple().to_string();
        let base_dir = std::env::temp_dir().join(format!("plumbline-nested-{}", &short_id[..8]));
        let socket_path = base_dir.join("inner").join("relay.sock");
        let pid_path = socket_path.with_extension("pid");

        let server = RelayServer::bind_to(socket_path.clone(), pid_path)
            .await
            .expect("bind");
        assert!(socket_path.parent().is_some_and(Path::exists));

        drop(server);
        let _ = std::fs::remove_dir_all(&base_dir);
    }

    #[tokio::test]
    async fn peer_table_tracks_membership() {
        let (socket_path, _pid_path) = temp_socket("table");
        let server = RelayServer::bind_to(socket_path.clone(), socket_path.with_extension("pid"))
            .await
            .expect("bind");
        let peers = server.peers().clone();
        let handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), server.run()).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let peer = TestPeer::join(&socket_path, ContextKind::Content).await;
        assert_eq!(peers.len().await, 1);

        drop(peer);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(peers.is_empty().await);

        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
}
