//! Preview listener lifecycle and reload fan-out.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::Router;
use sandbox_core::{Envelope, PeerSet};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{Mutex, oneshot},
    task::JoinHandle,
};

/// Consecutive ports probed before giving up.
const MAX_PORT_PROBES: u16 = 100;

/// Preview registry error.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("no available port within {MAX_PORT_PROBES} attempts from {0}")]
    NoAvailablePort(u16),
}

struct ActivePreview {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ActivePreview {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Manages the forwarding HTTP listener for the sandboxed app plus the
/// peers subscribed to reload notifications.
///
/// At most one listener is active per registry; starting a new one closes
/// the old listener first (replace, never merge). The listener handle is
/// exclusively owned here — nothing else may touch it.
#[derive(Default)]
pub struct PreviewRegistry {
    active: Mutex<Option<ActivePreview>>,
    peers: Arc<PeerSet>,
}

impl PreviewRegistry {
    /// Create a registry with no active listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers receiving `preview/*` broadcasts.
    #[must_use]
    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Start the preview listener on the first free port at or above
    /// `preferred_port`, replacing any active listener.
    ///
    /// Returns the bound port. A listener that fails *after* binding is
    /// logged, not restarted — restart is an explicit caller action.
    ///
    /// # Errors
    /// `NoAvailablePort` after 100 consecutive occupied ports.
    pub async fn start(&self, preferred_port: u16) -> Result<u16, PreviewError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            tracing::info!(port = previous.port, "replacing active preview listener");
            previous.stop().await;
        }

        let (port, listener) = bind_available(preferred_port, MAX_PORT_PROBES).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, shutdown_rx, port));

        *active = Some(ActivePreview {
            port,
            shutdown: shutdown_tx,
            task,
        });
        tracing::info!(port, "preview listener started");
        Ok(port)
    }

    /// Broadcast `preview/refresh` for `port` to every subscribed peer.
    pub fn refresh(&self, port: u16) {
        tracing::debug!(port, "preview refresh");
        self.peers.broadcast(&Envelope::preview_refresh(port));
    }

    /// Close the listener and clear the subscriber set.
    pub async fn stop(&self) {
        if let Some(active) = self.active.lock().await.take() {
            tracing::info!(port = active.port, "preview listener stopped");
            active.stop().await;
        }
        self.peers.clear();
    }

    /// Port of the active listener, if any.
    pub async fn port(&self) -> Option<u16> {
        self.active.lock().await.as_ref().map(|active| active.port)
    }
}

/// Probe ports sequentially from `start`, keeping the first successful
/// bind. Binding directly (instead of bind-release-rebind) closes the
/// window where another process grabs the probed port.
async fn bind_available(start: u16, attempts: u16) -> Result<(u16, TcpListener), PreviewError> {
    for offset in 0..attempts {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
            Ok(listener) => {
                // port 0 asks the OS to pick; report what was actually bound
                let bound = listener.local_addr().map_or(port, |addr| addr.port());
                return Ok((bound, listener));
            }
            // occupied, try the next one
            Err(_) => {}
        }
    }
    Err(PreviewError::NoAvailablePort(start))
}

async fn serve(listener: TcpListener, shutdown: oneshot::Receiver<()>, port: u16) {
    let app = Router::new().fallback(placeholder);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await;
    if let Err(err) = result {
        tracing::error!(port, %err, "preview listener failed");
    }
}

async fn placeholder() -> &'static str {
    "preview server running"
}

#[cfg(test)]
mod tests {
    use sandbox_core::Peer;
    use tokio::sync::mpsc;

    use super::*;

    async fn occupied_port() -> (u16, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        (listener.local_addr().unwrap().port(), listener)
    }

    #[tokio::test]
    async fn test_probe_skips_occupied_ports() {
        let (taken, _keep_alive) = occupied_port().await;
        let (found, _listener) = bind_available(taken, MAX_PORT_PROBES).await.unwrap();
        assert!(found > taken);
    }

    #[tokio::test]
    async fn test_probe_exhaustion_fails() {
        let (taken, _keep_alive) = occupied_port().await;
        assert!(matches!(
            bind_available(taken, 1).await,
            Err(PreviewError::NoAvailablePort(_))
        ));
    }

    #[tokio::test]
    async fn test_start_replaces_previous_listener() {
        let registry = PreviewRegistry::new();
        let first = registry.start(0).await.unwrap();
        assert_eq!(registry.port().await, Some(first));

        // starting again at the same preferred port only works because the
        // old listener is closed before the probe runs
        let second = registry.start(first).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(registry.port().await, Some(second));

        registry.stop().await;
        assert_eq!(registry.port().await, None);
    }

    #[tokio::test]
    async fn test_refresh_reaches_subscribers() {
        let registry = PreviewRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.peers().add(Peer::new(tx));

        registry.refresh(3001);
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.action, "refresh");
        assert_eq!(envelope.port(), Some(3001));
    }

    #[tokio::test]
    async fn test_stop_clears_subscribers() {
        let registry = PreviewRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.peers().add(Peer::new(tx));

        registry.stop().await;
        assert!(registry.peers().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_is_served() {
        let registry = PreviewRegistry::new();
        let port = registry.start(0).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let mut response = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
            .await
            .unwrap();
        assert!(response.contains("200"));

        registry.stop().await;
    }
}
