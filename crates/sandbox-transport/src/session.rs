//! The per-process session object the message bus dispatches into.

use std::sync::Arc;

use sandbox_core::{Envelope, EnvelopeKind, FileOverlay, Peer, PeerId, WorkspaceContext};
use sandbox_preview::PreviewRegistry;
use sandbox_runner::{ActionRunner, ShellExecutor};
use sandbox_terminal::TerminalRegistry;

/// All runtime state for one sandbox workspace.
///
/// Constructed once at startup and passed by handle through the dispatch
/// path — components never reach for ambient singletons. The runner and the
/// registries are independent state machines sharing only the envelope
/// format, so a long-running command never blocks terminal or preview
/// traffic.
pub struct Session {
    context: WorkspaceContext,
    runner: ActionRunner,
    terminals: TerminalRegistry,
    preview: PreviewRegistry,
    overlay: FileOverlay,
}

impl Session {
    /// Build a session rooted at the context's working directory.
    #[must_use]
    pub fn new(context: WorkspaceContext) -> Self {
        Self {
            runner: ActionRunner::new(Arc::new(ShellExecutor)),
            terminals: TerminalRegistry::new(context.working_dir()),
            preview: PreviewRegistry::new(),
            overlay: FileOverlay::new(),
            context,
        }
    }

    /// Workspace configuration.
    #[must_use]
    pub fn context(&self) -> &WorkspaceContext {
        &self.context
    }

    /// The action runner.
    #[must_use]
    pub fn runner(&self) -> &ActionRunner {
        &self.runner
    }

    /// The terminal registry.
    #[must_use]
    pub fn terminals(&self) -> &TerminalRegistry {
        &self.terminals
    }

    /// The preview registry.
    #[must_use]
    pub fn preview(&self) -> &PreviewRegistry {
        &self.preview
    }

    /// The in-memory file overlay.
    #[must_use]
    pub fn overlay(&self) -> &FileOverlay {
        &self.overlay
    }

    /// Route one incoming envelope into the owning component.
    ///
    /// Unknown actions and malformed payloads are logged and dropped — they
    /// never take the bus down.
    pub fn handle_envelope(&self, peer: &Peer, envelope: &Envelope) {
        match envelope.kind {
            EnvelopeKind::Command => self.handle_command(peer, envelope),
            EnvelopeKind::Terminal => self.handle_terminal(peer, envelope),
            EnvelopeKind::Preview => self.handle_preview(peer, envelope),
        }
    }

    /// Forget `peer` in every registry. The transport calls this when the
    /// peer's connection closes; nothing else tracks connection liveness.
    pub fn handle_disconnect(&self, peer: PeerId) {
        tracing::debug!(peer = %peer, "peer disconnected, leaving all registries");
        self.runner.peers().remove(peer);
        self.terminals.remove_peer_everywhere(peer);
        self.preview.peers().remove(peer);
    }

    fn handle_command(&self, peer: &Peer, envelope: &Envelope) {
        match envelope.action.as_str() {
            "connect" => self.runner.peers().add(peer.clone()),
            "disconnect" => {
                self.runner.peers().remove(peer.id());
            }
            other => tracing::warn!(action = other, "unknown command action dropped"),
        }
    }

    fn handle_terminal(&self, peer: &Peer, envelope: &Envelope) {
        let Some(terminal_id) = envelope.terminal_id() else {
            tracing::warn!(action = %envelope.action, "terminal envelope without terminalId dropped");
            return;
        };
        match envelope.action.as_str() {
            "connect" => {
                self.terminals.add_peer(terminal_id, peer.clone());
            }
            "disconnect" => self.terminals.remove_peer(terminal_id, peer.id()),
            "data" => match envelope.terminal_chunk() {
                Some(bytes) => self.terminals.write(terminal_id, &bytes),
                None => tracing::warn!(terminal = terminal_id, "undecodable terminal data dropped"),
            },
            other => tracing::warn!(action = other, "unknown terminal action dropped"),
        }
    }

    fn handle_preview(&self, peer: &Peer, envelope: &Envelope) {
        match envelope.action.as_str() {
            "connect" => self.preview.peers().add(peer.clone()),
            "disconnect" => {
                self.preview.peers().remove(peer.id());
            }
            "refresh" => match envelope.port() {
                Some(port) => self.preview.refresh(port),
                None => tracing::warn!("preview refresh without port dropped"),
            },
            other => tracing::warn!(action = other, "unknown preview action dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn session() -> Session {
        Session::new(WorkspaceContext::new(std::env::temp_dir()))
    }

    fn peer() -> (Peer, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(tx), rx)
    }

    #[tokio::test]
    async fn test_preview_connect_then_refresh_roundtrips() {
        let session = session();
        let (p, mut rx) = peer();

        session.handle_envelope(&p, &Envelope::new(EnvelopeKind::Preview, "connect", json!({})));
        session.handle_envelope(
            &p,
            &Envelope::new(EnvelopeKind::Preview, "refresh", json!({ "port": 3001 })),
        );

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.action, "refresh");
        assert_eq!(envelope.port(), Some(3001));
    }

    #[tokio::test]
    async fn test_command_connect_subscribes_to_runner() {
        let session = session();
        let (p, _rx) = peer();

        session.handle_envelope(&p, &Envelope::new(EnvelopeKind::Command, "connect", json!({})));
        assert_eq!(session.runner().peers().len(), 1);

        session.handle_disconnect(p.id());
        assert!(session.runner().peers().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_envelopes_are_dropped() {
        let session = session();
        let (p, _rx) = peer();

        // terminal envelope without a terminalId
        session.handle_envelope(&p, &Envelope::new(EnvelopeKind::Terminal, "data", json!({})));
        // unknown verbs
        session.handle_envelope(&p, &Envelope::new(EnvelopeKind::Command, "dance", json!({})));
        session.handle_envelope(&p, &Envelope::new(EnvelopeKind::Preview, "spin", json!({})));

        // the bus is still alive
        session.handle_envelope(&p, &Envelope::new(EnvelopeKind::Preview, "connect", json!({})));
        assert_eq!(session.preview().peers().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let session = session();
        let (p, _rx) = peer();
        session.handle_disconnect(p.id());
        session.handle_disconnect(p.id());
    }
}
