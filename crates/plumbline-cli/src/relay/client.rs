//! Connecting a context to the relay.

use std::path::Path;
use std::process::Stdio;
use std::rc::{Rc, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use plumbline_core::bus::{MessageBus, Transport, TransportFuture};
use plumbline_core::context::{ContextKind, ContextSet};
use plumbline_core::error::TransportError;
use plumbline_core::protocol::Message;
use tokio::io::BufReader;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::relay::{paths, pump_lines, read_line_bounded, write_json_line, Control, Reply, MAX_LINE_SIZE};

/// Maximum time to wait for an auto-started relay.
const RELAY_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between socket connection attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long the relay gets to answer a control frame.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long queued outbound lines get to drain on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One context's connection to the relay.
pub struct RelayClient {
    peer: String,
    outbound: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    inbound: Option<BufReader<OwnedReadHalf>>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("peer", &self.peer)
            .field("listening", &self.inbound.is_none())
            .finish()
    }
}

impl RelayClient {
    /// Join the current relay instance as `context`, starting the relay if
    /// it is not running.
    pub async fn connect(context: ContextKind) -> Result<Self> {
        let socket_path = paths::get_socket_path(None);

        if let Ok(stream) = UnixStream::connect(&socket_path).await {
            debug!("Connected to existing relay");
            return Self::handshake(stream, context).await;
        }

        info!("Relay not running, starting...");
        let child = Self::start_relay()?;
        let stream = Self::wait_for_relay(&socket_path, child).await?;
        Self::handshake(stream, context).await
    }

    /// Join the relay at `socket_path` without auto-starting it.
    pub async fn connect_to(socket_path: &Path, context: ContextKind) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to relay at {:?}", socket_path))?;
        Self::handshake(stream, context).await
    }

    /// Ask the relay at `socket_path` to stop.
    ///
    /// Returns `false` when no relay is listening there.
    pub async fn request_stop(socket_path: &Path) -> Result<bool> {
        let Ok(stream) = UnixStream::connect(socket_path).await else {
            return Ok(false);
        };
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_json_line(&mut writer, &Control::Stop).await?;
        match read_reply(&mut reader).await? {
            Reply::Stopping => Ok(true),
            other => bail!("Unexpected reply to stop: {:?}", other),
        }
    }

    /// Spawn `plumbline relay` detached in its own process group so it
    /// outlives this terminal.
    fn start_relay() -> Result<std::process::Child> {
        use std::os::unix::process::CommandExt;

        let exe = std::env::current_exe().context("Failed to get current executable path")?;

        std::process::Command::new(exe)
            .arg("relay")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("Failed to spawn relay process")
    }

    /// Poll the socket until the relay accepts, failing fast if it exits.
    async fn wait_for_relay(socket_path: &Path, mut child: std::process::Child) -> Result<UnixStream> {
        let start = std::time::Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    bail!(
                        "Relay exited immediately with status: {} (run 'plumbline relay' directly to diagnose)",
                        status
                    );
                }
                Ok(None) => {}
                Err(e) => debug!("Error checking relay status: {}", e),
            }

            match UnixStream::connect(socket_path).await {
                Ok(stream) => {
                    info!("Connected to relay after {:?}", start.elapsed());
                    return Ok(stream);
                }
                Err(_) if start.elapsed() > RELAY_STARTUP_TIMEOUT => {
                    bail!("Relay failed to start within {:?}", RELAY_STARTUP_TIMEOUT);
                }
                Err(_) => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        }
    }

    async fn handshake(stream: UnixStream, context: ContextKind) -> Result<Self> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_json_line(&mut writer, &Control::Hello { context }).await?;
        let peer = match read_reply(&mut reader).await? {
            Reply::Welcome { peer } => peer,
            Reply::Stopping => bail!("Relay is shutting down"),
            Reply::Error { message, suggestion } => match suggestion {
                Some(hint) => bail!("Relay refused connection: {} ({})", message, hint),
                None => bail!("Relay refused connection: {}", message),
            },
        };
        debug!("Joined relay as {} peer {}", context, peer);

        let (outbound, lines) = mpsc::unbounded_channel();
        let writer = tokio::spawn(pump_lines(writer, lines));

        Ok(Self {
            peer,
            outbound,
            writer,
            inbound: Some(reader),
        })
    }

    /// Id the relay assigned to this connection.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// A transport that delivers the part of each message's target that
    /// falls within `scope`.
    ///
    /// A bus holding two transports over the same relay should give them
    /// disjoint scopes, so the relay never sees a message twice.
    pub fn transport(&self, scope: ContextSet) -> Rc<RelayTransport> {
        Rc::new(RelayTransport {
            outbound: self.outbound.clone(),
            scope,
        })
    }

    /// Feed messages from the relay into `bus` until the relay hangs up or
    /// the bus is dropped.
    ///
    /// Must be called inside a `LocalSet`. Returns `None` if already
    /// listening.
    pub fn listen(&mut self, bus: &Rc<MessageBus>) -> Option<JoinHandle<()>> {
        let reader = self.inbound.take()?;
        Some(tokio::task::spawn_local(deliver_inbound(reader, Rc::downgrade(bus))))
    }

    /// Flush queued messages and disconnect.
    ///
    /// Transports handed out by [`RelayClient::transport`] keep the
    /// connection open; drop them (and the bus holding them) first.
    pub async fn close(self) {
        drop(self.outbound);
        if timeout(CLOSE_TIMEOUT, self.writer).await.is_err() {
            warn!("Relay connection still in use after {:?}, closing anyway", CLOSE_TIMEOUT);
        }
    }
}

async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> Result<Reply> {
    let mut line = String::new();
    let bytes_read = timeout(REPLY_TIMEOUT, read_line_bounded(reader, &mut line, MAX_LINE_SIZE))
        .await
        .context("Timed out waiting for the relay")??;

    if bytes_read == 0 {
        bail!("Relay closed connection unexpectedly");
    }

    serde_json::from_str(line.trim()).context("Failed to parse relay reply")
}

async fn deliver_inbound(mut reader: BufReader<OwnedReadHalf>, bus: Weak<MessageBus>) {
    let mut line = String::new();

    loop {
        line.clear();
        match read_line_bounded(&mut reader, &mut line, MAX_LINE_SIZE).await {
            Ok(0) => {
                debug!("Relay closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Stopped reading from relay: {}", e);
                break;
            }
        }

        let Some(bus) = bus.upgrade() else {
            break;
        };
        let trimmed = line.trim();
        if !trimmed.is_empty() && !bus.receive_json(trimmed) {
            debug!("Ignored line from relay");
        }
    }
}

/// [`Transport`] writing messages to the relay connection.
#[derive(Debug)]
pub struct RelayTransport {
    outbound: mpsc::UnboundedSender<String>,
    scope: ContextSet,
}

impl Transport for RelayTransport {
    fn deliver<'a>(&'a self, message: &'a Message) -> TransportFuture<'a> {
        Box::pin(async move {
            let target: ContextSet = message.target.iter().filter(|k| self.scope.contains(*k)).collect();
            if target.is_empty() {
                return Ok(());
            }

            let scoped = Message {
                target,
                ..message.clone()
            };
            let line = serde_json::to_string(&scoped)?;
            self.outbound.send(line).map_err(|_| TransportError::Closed)
        })
    }
}
