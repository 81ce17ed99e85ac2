use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics::sampler::{Sampler, SharedSource};
use crate::metrics::source::SysinfoSource;
use crate::metrics::store::MetricStore;
use crate::protocol::Dispatcher;
use crate::registry::Registry;

/// Longest command line accepted from a client, in bytes.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Composition root: owns the metric pipeline, the process registry and
/// the TCP listener, and wires them together.
pub struct Server {
    config: Config,
    sampler: Sampler,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(MetricStore::new(config.metrics.history_capacity));
        let registry = Arc::new(Registry::new());
        let source: SharedSource = Arc::new(Mutex::new(SysinfoSource::new()));

        let sampler = Sampler::new(store.clone(), source.clone());
        let dispatcher = Arc::new(Dispatcher::new(store, registry, source));

        Ok(Self {
            config,
            sampler,
            dispatcher,
            cancel: CancellationToken::new(),
            accept_task: None,
        })
    }

    /// Starts the sampler and the accept loop. Returns the bound address,
    /// which matters when the configured port is 0.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        self.sampler.start(self.config.metrics.sample_interval);

        let listener = self.bind().await?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound address")?;
        info!(addr = %local_addr, "server listening");

        let dispatcher = self.dispatcher.clone();
        let greeting = self.config.server.greeting.clone();
        let cancel = self.cancel.clone();

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(%peer, "client connected");
                                let dispatcher = dispatcher.clone();
                                let greeting = greeting.clone();
                                tokio::spawn(async move {
                                    handle_client(stream, peer, dispatcher, greeting).await;
                                });
                            }
                            Err(e) => warn!(error = %e, "accept failed"),
                        }
                    }
                }
            }
        }));

        Ok(local_addr)
    }

    /// Stops accepting connections and shuts the sampler down. Connections
    /// already in flight are not joined; they end when their client does.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "accept task join failed");
            }
        }

        self.sampler.stop().await;
        info!("server stopped");
        Ok(())
    }

    async fn bind(&self) -> Result<TcpListener> {
        let server = &self.config.server;
        let addr: SocketAddr = format!("{}:{}", server.host, server.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", server.host, server.port))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("failed to create socket")?;
        socket
            .set_reuseaddr(true)
            .context("failed to set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("failed to bind {addr}"))?;

        socket
            .listen(server.backlog)
            .with_context(|| format!("failed to listen on {addr}"))
    }
}

/// One client conversation: greeting, then a request/response line loop
/// until the client disconnects or sends SALIR.
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    greeting: String,
) {
    if let Err(e) = converse(stream, dispatcher, greeting).await {
        debug!(%peer, error = %e, "connection closed with error");
    }
    debug!(%peer, "client disconnected");
}

async fn converse(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    greeting: String,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    writer.write_all(greeting.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    loop {
        buf.clear();
        // The cap applies while reading. One byte of headroom tells an
        // oversized command apart from one of exactly the maximum length.
        let n = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            break; // Client closed its end.
        }
        if buf.last() != Some(&b'\n') && n > MAX_LINE_BYTES {
            writer
                .write_all(b"ERROR|Comando demasiado largo.\n")
                .await?;
            writer.flush().await?;
            if !drain_line(&mut reader, &mut buf).await? {
                break;
            }
            continue;
        }

        let line = String::from_utf8_lossy(&buf).into_owned();
        let handler = Arc::clone(&dispatcher);
        // Metric commands can hit the system inspector, which blocks.
        let response = tokio::task::spawn_blocking(move || handler.dispatch(&line))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        writer.write_all(response.render().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // The farewell is delivered before the connection drops.
        if response.is_quit() {
            break;
        }
    }

    Ok(())
}

/// Discards the remainder of an over-long line, one bounded chunk at a
/// time. Returns false when the client closed before the terminator.
async fn drain_line<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<bool> {
    loop {
        buf.clear();
        let n = (&mut *reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', buf)
            .await?;
        if n == 0 {
            return Ok(false);
        }
        if buf.last() == Some(&b'\n') {
            return Ok(true);
        }
    }
}
