//! Discovery broadcaster
//!
//! Periodically sends the server's advertisement as a UDP broadcast so
//! clients on the LAN can find it without configuration. Runs independently
//! of every session. Send failures (no broadcast-capable interface, network
//! down) are swallowed and retried on the next tick.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::DiscoveryConfig;
use crate::error::NetworkError;
use crate::protocol::DiscoveryAdvertisement;

/// Background advertiser of the server's identity
pub struct DiscoveryBroadcaster {
    advertisement: DiscoveryAdvertisement,
    target: SocketAddr,
    interval: Duration,
    active: Mutex<Option<ActiveBroadcast>>,
}

struct ActiveBroadcast {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl DiscoveryBroadcaster {
    pub fn new(config: &DiscoveryConfig, tcp_port: u16, password: Option<String>) -> Self {
        Self {
            advertisement: DiscoveryAdvertisement::new(config.name.clone(), tcp_port, password),
            target: SocketAddr::new(config.broadcast_address, config.port),
            interval: config.interval(),
            active: Mutex::new(None),
        }
    }

    pub fn advertisement(&self) -> &DiscoveryAdvertisement {
        &self.advertisement
    }

    /// Start broadcasting. Does nothing if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), NetworkError> {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.running.load(Ordering::SeqCst)) {
            return Ok(());
        }

        let socket = bind_broadcast_socket(self.target.ip())
            .map_err(|e| NetworkError::BindFailed(format!("discovery socket: {}", e)))?;

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(broadcast_loop(
            socket,
            self.advertisement.to_payload(),
            self.target,
            self.interval,
            running.clone(),
        ));

        tracing::info!(
            "Discovery broadcasting \"{}\" to {} every {:?}",
            self.advertisement,
            self.target,
            self.interval
        );
        *active = Some(ActiveBroadcast { running, task });
        Ok(())
    }

    /// Stop broadcasting and release the socket. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().take() {
            active.running.store(false, Ordering::SeqCst);
            active.task.abort();
            tracing::info!("Discovery stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| a.running.load(Ordering::SeqCst))
    }
}

impl Drop for DiscoveryBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn broadcast_loop(
    socket: UdpSocket,
    payload: bytes::Bytes,
    target: SocketAddr,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        if let Err(e) = socket.send_to(&payload, target).await {
            tracing::debug!("Discovery broadcast to {} failed: {}", target, e);
        }
        tokio::time::sleep(interval).await;
    }
    // Socket is dropped here
}

/// UDP socket allowed to send to broadcast addresses
fn bind_broadcast_socket(target: IpAddr) -> std::io::Result<UdpSocket> {
    let (domain, local) = match target {
        IpAddr::V4(_) => (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
        IpAddr::V6(_) => (Domain::IPV6, SocketAddr::from(([0u16; 8], 0))),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if target.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;

    UdpSocket::from_std(socket.into())
}
