//! The Listener Fleet (spec.md §4.4) and Session Pipeline (spec.md §4.3).
//!
//! Each configured port runs its own supervised `russh` server instance; on
//! `shell_request` the handler dials the backend named by the Config Reader
//! for that port and wires up the Telnet Negotiation Filter in both
//! directions. The client→backend direction is driven by `Handler::data`
//! (russh's own event loop calls it per inbound chunk); the backend→client
//! direction is a task this module owns outright, matching the "negotiation
//! filter's read half is exclusively owned by one task" invariant.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use russh::server::{Auth, Config, Handle, Handler, Msg, Server as RusshServer, Session};
use russh::{Channel, ChannelId, CryptoVec};
use telnet_negotiation::{write_escaped, NegotiationFilter, WriteSerializer};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::ConfigStore;
use crate::errors::ProxyError;
use crate::metrics::{ActiveSessionGuard, Metrics};

const BACKEND_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const LISTENER_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Shared, cloneable context every per-port listener and session hands down.
#[derive(Clone)]
pub struct AppContext {
    pub config_store: Arc<ConfigStore>,
    pub metrics: Metrics,
    pub username: Arc<str>,
    pub password: Arc<str>,
}

/// Spawns one supervised listener per port and waits for all of them (they
/// normally run for the life of the process).
pub async fn run_listener_fleet(ports: Vec<u16>, host_key: PrivateKey, ctx: AppContext) {
    ctx.metrics.set_listeners_count(ports.len());

    let mut tasks = Vec::with_capacity(ports.len());
    for port in ports {
        let host_key = host_key.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(
            async move { supervise_listener(port, host_key, ctx).await },
        ));
    }
    for task in tasks {
        let _ = task.await;
    }
}

/// Binds on `port`, serving indefinitely; on failure, sleeps 5 seconds and
/// re-binds. One listener's failures never affect the others.
async fn supervise_listener(port: u16, host_key: PrivateKey, ctx: AppContext) {
    loop {
        let config = Arc::new(Config {
            server_id: russh::SshId::Standard("SSH-2.0-tts-proxy".to_string()),
            keys: vec![host_key.clone()],
            ..Default::default()
        });

        let mut server = GatewayServer {
            port,
            ctx: ctx.clone(),
        };
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();

        tracing::info!(port, "listener binding");
        match server.run_on_address(config, addr).await {
            Ok(()) => {
                tracing::info!(port, "listener shut down cleanly");
                return;
            }
            Err(err) => {
                tracing::warn!(port, %err, "listener failed, restarting after backoff");
                tokio::time::sleep(LISTENER_RESTART_BACKOFF).await;
            }
        }
    }
}

#[derive(Clone)]
struct GatewayServer {
    port: u16,
    ctx: AppContext,
}

impl RusshServer for GatewayServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        SessionHandler {
            port: self.port,
            ctx: self.ctx.clone(),
            peer_addr,
            channel: None,
            backend_writer: None,
            reader_task: None,
            _session_guard: None,
        }
    }
}

struct SessionHandler {
    port: u16,
    ctx: AppContext,
    peer_addr: Option<SocketAddr>,
    channel: Option<ChannelId>,
    backend_writer: Option<WriteSerializer<OwnedWriteHalf>>,
    reader_task: Option<JoinHandle<()>>,
    _session_guard: Option<ActiveSessionGuard>,
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

impl Handler for SessionHandler {
    type Error = ProxyError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == &*self.ctx.username && password == &*self.ctx.password {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channel = Some(channel.id());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        self.start_pipeline(channel, session).await
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(writer) = self.backend_writer.clone() else {
            return Ok(());
        };
        match write_escaped(&writer, data).await {
            Ok(n) => {
                self.ctx.metrics.add_bytes_up(n as u64);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(port = self.port, %err, "backend write failed, closing session");
                self.backend_writer = None;
                session.close(channel)?;
                Ok(())
            }
        }
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.close(channel)?;
        Ok(())
    }
}

impl SessionHandler {
    /// The Session Pipeline (spec.md §4.3): look up the backend, dial it,
    /// and wire the negotiation filter and escaper to the SSH channel.
    async fn start_pipeline(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), ProxyError> {
        let mapping = match self.ctx.config_store.snapshot() {
            Ok(mapping) => mapping,
            Err(err) => {
                let diag = ProxyError::ConfigSnapshot(err).diagnostic().unwrap_or_default();
                session.data(channel, CryptoVec::from(diag.into_bytes()))?;
                session.close(channel)?;
                return Ok(());
            }
        };

        let target = match mapping.lookup(self.port) {
            Some(target) => target.to_string(),
            None => {
                let diag = ProxyError::ConfigLookup(self.port)
                    .diagnostic()
                    .unwrap_or_default();
                session.data(channel, CryptoVec::from(diag.into_bytes()))?;
                session.close(channel)?;
                return Ok(());
            }
        };

        let stream = match tokio::time::timeout(BACKEND_DIAL_TIMEOUT, TcpStream::connect(&target))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(io_err)) => {
                let err = ProxyError::BackendDial(io_err);
                let diag = err.diagnostic().unwrap_or_default();
                session.data(channel, CryptoVec::from(diag.into_bytes()))?;
                session.close(channel)?;
                return Ok(());
            }
            Err(_elapsed) => {
                let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "backend dial timed out");
                let err = ProxyError::BackendDial(io_err);
                let diag = err.diagnostic().unwrap_or_default();
                session.data(channel, CryptoVec::from(diag.into_bytes()))?;
                session.close(channel)?;
                return Ok(());
            }
        };

        tracing::info!(port = self.port, %target, peer = ?self.peer_addr, "session starting");

        let guard = self.ctx.metrics.session_guard();
        let (read_half, write_half) = stream.into_split();
        let writer = WriteSerializer::new(write_half);
        self.backend_writer = Some(writer.clone());
        self._session_guard = Some(guard);

        let handle = session.handle();
        let metrics = self.ctx.metrics.clone();
        let port = self.port;
        self.reader_task = Some(tokio::spawn(backend_to_client_loop(
            read_half, writer, handle, channel, metrics, port,
        )));

        Ok(())
    }
}

/// Owns the backend read half and the negotiation filter exclusively, per
/// spec.md's Session invariant. Runs until EOF or an I/O error, then closes
/// the SSH channel (the sibling direction is woken by that channel close, or
/// simply stops being called since russh no longer delivers `data`).
async fn backend_to_client_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    writer: WriteSerializer<OwnedWriteHalf>,
    handle: Handle,
    channel: ChannelId,
    metrics: Metrics,
    port: u16,
) {
    let mut filter = NegotiationFilter::new();
    loop {
        let bytes = match filter.read_application_bytes(&mut read_half, &writer).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(port, %err, "backend read failed, ending session");
                break;
            }
        };
        if bytes.is_empty() {
            break; // EOF
        }
        let n = bytes.len();
        if handle.data(channel, CryptoVec::from(bytes)).await.is_err() {
            break; // SSH channel gone
        }
        metrics.add_bytes_down(n as u64);
    }
    let _ = handle.close(channel).await;
}
