//! Server listener
//!
//! Accepts TCP connections and runs one [`Session`] task per connection,
//! alongside the discovery broadcaster. A session's failure never reaches
//! the accept loop or other sessions.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::audio::{CapturePool, CaptureSource};
use crate::codec::EncoderFactory;
use crate::config::ServerConfig;
use crate::constants::ACCEPT_RETRY_BACKOFF;
use crate::error::{NetworkError, Result};
use crate::network::discovery::DiscoveryBroadcaster;
use crate::network::registry::SessionRegistry;
use crate::network::session::{Session, SessionContext, SessionSummary};

/// The audio streaming server
pub struct AudioServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    captures: Arc<CapturePool>,
    encoders: Option<Arc<dyn EncoderFactory>>,
    discovery: Option<DiscoveryBroadcaster>,
    shutdown_tx: watch::Sender<bool>,
}

impl AudioServer {
    /// Validate the configuration and bind the listener
    pub async fn bind(
        config: ServerConfig,
        source: Arc<dyn CaptureSource>,
        encoders: Option<Arc<dyn EncoderFactory>>,
    ) -> Result<Self> {
        config.validate()?;

        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let discovery = config.discovery.enabled.then(|| {
            DiscoveryBroadcaster::new(&config.discovery, local_addr.port(), config.password.clone())
        });

        let captures = Arc::new(CapturePool::new(source, config.sample_rate, config.chunk_size));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            captures,
            encoders,
            discovery,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn captures(&self) -> Arc<CapturePool> {
        self.captures.clone()
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            config: self.config.clone(),
            registry: self.registry.clone(),
            captures: self.captures.clone(),
            encoders: self.encoders.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        }
    }

    /// Serve until `shutdown` resolves, then stop sessions and release
    /// the capture streams and discovery socket.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(discovery) = &self.discovery {
            if let Err(e) = discovery.start() {
                tracing::warn!("Discovery disabled: {}", e);
            }
        }

        tracing::info!("Audio server listening on {}", self.local_addr);

        let mut sessions: JoinSet<SessionSummary> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_BACKOFF).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(finished);
                }
            }
        }

        let AudioServer {
            listener,
            config,
            captures,
            discovery,
            shutdown_tx,
            ..
        } = self;
        drop(listener);

        let _ = shutdown_tx.send(true);
        let drained = tokio::time::timeout(config.shutdown_grace(), async {
            while let Some(finished) = sessions.join_next().await {
                reap(finished);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("{} session(s) still running after grace period, aborting", sessions.len());
            sessions.shutdown().await;
        }

        captures.close_all();
        if let Some(discovery) = discovery {
            discovery.stop();
        }

        tracing::info!("Audio server stopped");
        Ok(())
    }

    fn spawn_session(&self, sessions: &mut JoinSet<SessionSummary>, stream: TcpStream, peer: SocketAddr) {
        tracing::info!("Client connected: {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        let session = Session::new(stream, peer, self.session_context());
        sessions.spawn(session.run());
    }
}

fn reap(finished: std::result::Result<SessionSummary, tokio::task::JoinError>) {
    match finished {
        Ok(summary) => tracing::debug!(
            session = %summary.id,
            "Reaped session for {} ({:?}, {} frames)",
            summary.peer,
            summary.reason,
            summary.frames_sent
        ),
        Err(e) if e.is_panic() => tracing::error!("Session task panicked: {}", e),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, HandshakeConfig};
    use crate::protocol::read_frame;
    use crate::testing::ScriptedSource;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            chunk_size: 500,
            sample_rate: 48000,
            capture_retry_ms: 1,
            shutdown_grace_ms: 500,
            handshake: HandshakeConfig {
                greeting_timeout_ms: 50,
                password_timeout_ms: 500,
                ..Default::default()
            },
            discovery: DiscoveryConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Running {
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        captures: Arc<CapturePool>,
        source: Arc<ScriptedSource>,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start(config: ServerConfig) -> Running {
        let source = Arc::new(ScriptedSource::new().paced(Duration::from_millis(2)));
        let server = AudioServer::bind(config, source.clone(), None).await.unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let captures = server.captures();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));
        Running {
            addr,
            registry,
            captures,
            source,
            stop,
            task,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_silent_client_receives_raw_frames() {
        let server = start(test_config()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        for _ in 0..3 {
            let mut header = [0u8; 2];
            client.read_exact(&mut header).await.unwrap();
            assert_eq!(header, [0x01, 0xF4]);

            let mut payload = vec![0u8; 500];
            client.read_exact(&mut payload).await.unwrap();
        }
        assert_eq!(server.source.opened_channels(), vec![1]);

        drop(client);
        server.stop.send(()).unwrap();
        server.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stereo_request() {
        let server = start(test_config()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        client.write_all(b"CHANNELS:2").await.unwrap();

        read_frame(&mut client).await.unwrap();
        assert_eq!(server.source.opened_channels(), vec![2]);

        server.stop.send(()).unwrap();
        server.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_password_flow() {
        let config = ServerConfig {
            password: Some("secret".into()),
            ..test_config()
        };
        let server = start(config).await;

        let mut good = TcpStream::connect(server.addr).await.unwrap();
        good.write_all(b"secret").await.unwrap();
        let mut marker = [0u8; 2];
        good.read_exact(&mut marker).await.unwrap();
        assert_eq!(&marker, b"OK");
        assert_eq!(read_frame(&mut good).await.unwrap().len(), 500);

        let mut bad = TcpStream::connect(server.addr).await.unwrap();
        bad.write_all(b"letmein").await.unwrap();
        let mut reply = Vec::new();
        bad.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"DENIED");
        assert_eq!(server.registry.len(), 1);

        server.stop.send(()).unwrap();
        server.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closing_one_client_leaves_others_streaming() {
        let server = start(test_config()).await;

        let mut first = TcpStream::connect(server.addr).await.unwrap();
        let mut second = TcpStream::connect(server.addr).await.unwrap();
        read_frame(&mut first).await.unwrap();
        read_frame(&mut second).await.unwrap();
        assert_eq!(server.registry.len(), 2);
        assert_eq!(server.source.opened_channels(), vec![1]);

        drop(first);
        let registry = server.registry.clone();
        wait_for(move || registry.len() == 1).await;

        for _ in 0..5 {
            assert_eq!(read_frame(&mut second).await.unwrap().len(), 500);
        }

        server.stop.send(()).unwrap();
        server.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let server = start(test_config()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        read_frame(&mut client).await.unwrap();
        assert_eq!(server.captures.open_count(), 1);

        let drain = tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = client.read_to_end(&mut sink).await;
        });

        server.stop.send(()).unwrap();
        server.task.await.unwrap().unwrap();
        drain.await.unwrap();

        assert!(server.registry.is_empty());
        assert_eq!(server.captures.open_count(), 0);
        assert!(TcpStream::connect(server.addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            chunk_size: 100_000,
            ..test_config()
        };
        let source = Arc::new(ScriptedSource::new());
        assert!(AudioServer::bind(config, source, None).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_fails_on_port_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..test_config()
        };
        let source = Arc::new(ScriptedSource::new());
        assert!(matches!(
            AudioServer::bind(config, source, None).await,
            Err(crate::Error::Network(NetworkError::BindFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_discovery_advertises_bound_port() {
        let listener = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            discovery: DiscoveryConfig {
                enabled: true,
                port: listener.local_addr().unwrap().port(),
                interval_ms: 50,
                name: "Test".into(),
                broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
            ..test_config()
        };
        let server = start(config).await;

        let mut buf = [0u8; 128];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..n]).unwrap(),
            format!("Test;{};", server.addr.port())
        );

        server.stop.send(()).unwrap();
        server.task.await.unwrap().unwrap();
    }
}
