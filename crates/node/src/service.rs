//! Node service wiring the router to its transports.
//!
//! This module provides the `NodeService` that opens the persistent store,
//! initialises the security module and runs the two service loops: one for
//! the computer link and one for the radio. Both loops share a single
//! [`MessageRouter`] behind one mutex, so handlers never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::MAX_FRAME_SIZE;
use rand::rngs::OsRng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ComputerTransport, Config};
use crate::relay::BoundedRelayQueue;
use crate::router::{Channel, MessageRouter, RouterError, RouterOptions};
use crate::security::{SecurityModule, SecurityOptions};
use crate::store::{FileStore, NAMESPACE};
use crate::transport::{FrameAssembler, RadioLink};

/// Router shared between the service loops.
pub type SharedRouter = Arc<Mutex<MessageRouter>>;

/// Lock the router, recovering the guard if a previous holder panicked.
pub fn lock_router(router: &SharedRouter) -> MutexGuard<'_, MessageRouter> {
    router.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the router described by `config` over its on-disk store.
pub fn build_router(config: &Config) -> Result<MessageRouter> {
    let store = FileStore::open(&config.node.data_dir, NAMESPACE)
        .context("Failed to open credential store")?;
    info!(path = %store.path().display(), "Opened credential store");

    let mut security = SecurityModule::new(
        Box::new(store),
        Box::new(OsRng),
        SecurityOptions {
            pbkdf2_iterations: config.security.pbkdf2_iterations,
            max_password_len: config.security.max_password_len,
        },
    );
    security
        .init(config.security.default_password.as_bytes())
        .context("Failed to initialise security module")?;

    Ok(MessageRouter::new(
        security,
        Box::new(BoundedRelayQueue::new(config.radio.queue_capacity)),
        RouterOptions {
            node_id: config.node.node_id,
            encrypt_relay: config.security.encrypt_relay,
            outbound_capacity: config.computer.queue_capacity,
        },
    ))
}

/// Hand one complete frame to the router. Errors are logged, never fatal.
fn dispatch(router: &SharedRouter, channel: Channel, bytes: &[u8]) {
    match lock_router(router).handle_inbound_frame(channel, bytes) {
        Ok(()) => {}
        Err(RouterError::Framing(e)) => debug!(?channel, error = %e, "Dropped frame"),
        Err(e) => debug!(?channel, error = %e, "Frame not delivered"),
    }
}

/// Drain every frame waiting for the computer link.
fn take_outbound(router: &SharedRouter) -> Vec<Vec<u8>> {
    let mut guard = lock_router(router);
    std::iter::from_fn(|| guard.take_outbound()).collect()
}

/// Serve the computer link over one byte stream until EOF or cancellation.
pub async fn run_computer_stream<R, W>(
    router: SharedRouter,
    mut reader: R,
    mut writer: W,
    poll_interval: Duration,
    shutdown_token: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                debug!("Computer loop received shutdown signal");
                break;
            }
            read = reader.read(&mut buf) => {
                let n = read.context("Failed to read from computer link")?;
                if n == 0 {
                    info!("Computer link closed");
                    break;
                }
                assembler.push(&buf[..n]);
                while let Some(frame) = assembler.next_frame() {
                    dispatch(&router, Channel::Computer, &frame);
                }
            }
            _ = ticker.tick() => {}
        }

        for frame in take_outbound(&router) {
            writer
                .write_all(&frame)
                .await
                .context("Failed to write to computer link")?;
        }
        writer.flush().await.context("Failed to flush computer link")?;
    }

    Ok(())
}

/// Serve the radio link until cancellation.
pub async fn run_radio(
    router: SharedRouter,
    link: RadioLink,
    poll_interval: Duration,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                debug!("Radio loop received shutdown signal");
                break;
            }
            received = link.recv_frame(&mut buf) => {
                match received {
                    Ok((n, from)) => {
                        debug!(%from, len = n, "Radio frame received");
                        dispatch(&router, Channel::Device, &buf[..n]);
                    }
                    Err(e) => warn!(error = %e, "Radio receive failed"),
                }
            }
            _ = ticker.tick() => {}
        }

        let pending: Vec<_> = {
            let mut guard = lock_router(&router);
            std::iter::from_fn(|| guard.take_relay()).collect()
        };
        for frame in pending {
            let sent = link.broadcast(&frame.bytes).await;
            debug!(destination = frame.destination, sent, "Relayed frame to radio");
        }
    }

    Ok(())
}

/// A running LoComm node.
pub struct NodeService {
    config: Config,
    router: SharedRouter,
    shutdown_token: CancellationToken,
}

impl NodeService {
    /// Create a node from its configuration, opening the store on disk.
    pub fn new(config: Config) -> Result<Self> {
        let router = build_router(&config)?;
        Ok(Self::with_router(config, router))
    }

    /// Create a node around an existing router.
    pub fn with_router(config: Config, router: MessageRouter) -> Self {
        Self {
            config,
            router: Arc::new(Mutex::new(router)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// The shared router.
    pub fn router(&self) -> SharedRouter {
        Arc::clone(&self.router)
    }

    /// Token that stops both loops when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Signal both loops to stop.
    pub fn stop(&self) {
        info!("Stopping node service...");
        self.shutdown_token.cancel();
    }

    /// Run both service loops until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        let radio = RadioLink::bind(&self.config.radio.bind_addr, &self.config.radio.peers).await?;
        info!(
            node_id = self.config.node.node_id,
            radio = %radio.local_addr()?,
            "Node service started"
        );

        let radio_task = tokio::spawn(run_radio(
            self.router(),
            radio,
            Duration::from_millis(self.config.radio.poll_interval_ms),
            self.shutdown_token(),
        ));

        let computer_result = self.run_computer().await;
        if let Err(e) = &computer_result {
            error!(error = %e, "Computer loop failed");
        }

        // Radio keeps serving peers after the host goes away.
        self.shutdown_token.cancelled().await;

        match radio_task.await {
            Ok(Err(e)) => error!(error = %e, "Radio loop failed"),
            Err(e) => error!(error = %e, "Radio task panicked"),
            Ok(Ok(())) => {}
        }

        lock_router(&self.router).shutdown();
        info!("Node service stopped");
        computer_result
    }

    async fn run_computer(&self) -> Result<()> {
        let poll_interval = Duration::from_millis(self.config.computer.poll_interval_ms);

        match self.config.computer.transport {
            ComputerTransport::Stdio => {
                info!("Serving computer link on stdio");
                run_computer_stream(
                    self.router(),
                    tokio::io::stdin(),
                    tokio::io::stdout(),
                    poll_interval,
                    self.shutdown_token(),
                )
                .await
            }
            ComputerTransport::Tcp => {
                let listener = TcpListener::bind(&self.config.computer.listen_addr)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to listen on {}",
                            self.config.computer.listen_addr
                        )
                    })?;
                info!(addr = %listener.local_addr()?, "Serving computer link on TCP");
                self.serve_tcp(listener, poll_interval).await
            }
        }
    }

    async fn serve_tcp(&self, listener: TcpListener, poll_interval: Duration) -> Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown_token.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted.context("Failed to accept computer")?,
            };
            info!(%peer, "Computer connected");

            let (reader, writer) = stream.into_split();
            if let Err(e) = run_computer_stream(
                self.router(),
                reader,
                writer,
                poll_interval,
                self.shutdown_token(),
            )
            .await
            {
                warn!(%peer, error = %e, "Computer connection failed");
            }

            // A new host session starts logged out.
            lock_router(&self.router).security_mut().logout();
        }
    }
}

impl std::fmt::Debug for NodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeService")
            .field("node_id", &self.config.node.node_id)
            .field("transport", &self.config.computer.transport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::tests::test_module;
    use protocol::{CorrelationTag, FrameCodec, MessageType, Status};
    use tempfile::TempDir;

    fn test_router(seed: u64) -> SharedRouter {
        Arc::new(Mutex::new(MessageRouter::new(
            test_module(seed),
            Box::new(BoundedRelayQueue::new(5)),
            RouterOptions::default(),
        )))
    }

    async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
        let mut assembler = FrameAssembler::new();
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = assembler.next_frame() {
                return frame;
            }
            let n = reader.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before a full frame");
            assembler.push(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_computer_stream_login() {
        let router = test_router(1);
        let (host, node) = tokio::io::duplex(4096);
        let (node_read, node_write) = tokio::io::split(node);
        let (mut host_read, mut host_write) = tokio::io::split(host);
        let token = CancellationToken::new();

        let task = tokio::spawn(run_computer_stream(
            Arc::clone(&router),
            node_read,
            node_write,
            Duration::from_millis(5),
            token.clone(),
        ));

        let codec = FrameCodec::new();
        let request = codec
            .encode_parts(
                MessageType::Password.code(),
                CorrelationTag::from_u32(42),
                b"password",
            )
            .unwrap();
        // Deliver in two pieces to exercise reassembly.
        host_write.write_all(&request[..5]).await.unwrap();
        host_write.write_all(&request[5..]).await.unwrap();

        let reply = codec.decode(&read_frame(&mut host_read).await).unwrap();
        assert_eq!(reply.type_code(), MessageType::PasswordAck.code());
        assert_eq!(reply.tag(), CorrelationTag::from_u32(42));
        assert_eq!(Status::from_payload(reply.payload()), Some(Status::Okay));
        assert!(lock_router(&router).security().is_logged_in());

        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_computer_stream_ends_on_eof() {
        let router = test_router(2);
        let (host, node) = tokio::io::duplex(64);
        let (node_read, node_write) = tokio::io::split(node);
        drop(host);

        run_computer_stream(
            router,
            node_read,
            node_write,
            Duration::from_millis(5),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_radio_loop_relays_queued_frames() {
        let router = {
            let router = MessageRouter::new(
                test_module(3),
                Box::new(BoundedRelayQueue::new(5)),
                RouterOptions {
                    node_id: 1,
                    encrypt_relay: false,
                    ..RouterOptions::default()
                },
            );
            Arc::new(Mutex::new(router))
        };
        let listener = RadioLink::bind("127.0.0.1:0", &[]).await.unwrap();
        let link = RadioLink::bind(
            "127.0.0.1:0",
            &[listener.local_addr().unwrap().to_string()],
        )
        .await
        .unwrap();

        let request = FrameCodec::new()
            .encode_parts(MessageType::Send.code(), CorrelationTag::from_u32(7), &[2, b'x'])
            .unwrap();
        lock_router(&router)
            .handle_inbound_frame(Channel::Computer, &request)
            .unwrap();

        let token = CancellationToken::new();
        let task = tokio::spawn(run_radio(
            Arc::clone(&router),
            link,
            Duration::from_millis(5),
            token.clone(),
        ));

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let (n, _) = listener.recv_frame(&mut buf).await.unwrap();
        let relayed = FrameCodec::new().decode(&buf[..n]).unwrap();
        assert_eq!(relayed.payload(), &[1, 2, b'x']);

        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_build_router_provisions_store() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.node.data_dir = temp_dir.path().to_path_buf();

        let mut router = build_router(&config).unwrap();
        assert!(!router.security().is_logged_in());
        router.security_mut().login(b"password").unwrap();
        assert!(temp_dir.path().join("LoComm.json").exists());

        // Reopening keeps the provisioned credentials.
        let mut reopened = build_router(&config).unwrap();
        reopened.security_mut().login(b"password").unwrap();
    }
}
