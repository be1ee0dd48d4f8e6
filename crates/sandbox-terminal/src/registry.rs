//! Terminal registry: spawned interactive processes and their viewers.

use std::{
    collections::HashMap,
    io::{Read, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use sandbox_core::{Envelope, Peer, PeerId, PeerSet};
use thiserror::Error;
use uuid::Uuid;

use crate::shell;

/// Terminal registry error.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("failed to spawn terminal {id}: {reason}")]
    Spawn { id: String, reason: String },
    #[error("terminal {0} already exists")]
    Duplicate(String),
}

struct TerminalEntry {
    /// Distinguishes this process from a later one reusing the same id.
    epoch: Uuid,
    peers: Arc<PeerSet>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    /// Keeps the PTY master open for the lifetime of the entry.
    _master: Box<dyn MasterPty + Send>,
}

impl Drop for TerminalEntry {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            tracing::debug!(%err, "terminal child already gone");
        }
    }
}

type TerminalMap = Arc<Mutex<HashMap<String, TerminalEntry>>>;

/// Maps terminal ids to an interactive shell process plus the peers viewing
/// it.
///
/// Each entry exclusively owns its process and PTY handles; peers hold
/// membership only. The registry is told about peer disconnects by the
/// transport — it never watches connection liveness itself.
pub struct TerminalRegistry {
    terminals: TerminalMap,
    working_dir: PathBuf,
}

impl TerminalRegistry {
    /// Create a registry whose shells start in `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            terminals: Arc::new(Mutex::new(HashMap::new())),
            working_dir: working_dir.into(),
        }
    }

    /// Spawn an interactive shell on a fresh PTY under `id`.
    ///
    /// Output from the process is broadcast verbatim as `terminal/data`
    /// envelopes to the peers registered at emission time; peers joining
    /// later only see subsequent output.
    ///
    /// # Errors
    /// `Duplicate` when a live terminal already uses `id`; `Spawn` when the
    /// platform shell cannot be started.
    pub fn create(&self, id: &str) -> Result<(), TerminalError> {
        if self.terminals.lock().unwrap().contains_key(id) {
            return Err(TerminalError::Duplicate(id.to_string()));
        }

        let spawn_err = |reason: String| TerminalError::Spawn {
            id: id.to_string(),
            reason,
        };

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(e.to_string()))?;

        let shell = shell::interactive_shell();
        let mut cmd = CommandBuilder::new(&shell);
        if cfg!(unix) {
            if let Some(unix) = shell::UnixShell::from_path(&shell) {
                if unix.login() {
                    cmd.arg("-l");
                }
            }
        }
        cmd.cwd(&self.working_dir);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_err(e.to_string()))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_err(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_err(e.to_string()))?;

        let epoch = Uuid::new_v4();
        let peers = Arc::new(PeerSet::new());

        self.terminals.lock().unwrap().insert(
            id.to_string(),
            TerminalEntry {
                epoch,
                peers: Arc::clone(&peers),
                writer,
                child,
                _master: pair.master,
            },
        );

        let terminals = Arc::clone(&self.terminals);
        let terminal_id = id.to_string();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => peers.broadcast(&Envelope::terminal_data(&terminal_id, &buf[..n])),
                }
            }
            tracing::info!(terminal = %terminal_id, "terminal process exited");
            let mut terminals = terminals.lock().unwrap();
            // only reap our own entry; the id may have been reused
            if terminals.get(&terminal_id).is_some_and(|e| e.epoch == epoch) {
                terminals.remove(&terminal_id);
            }
        });

        tracing::info!(terminal = %id, shell = %shell.display(), "terminal created");
        Ok(())
    }

    /// Forward raw input bytes to the terminal's process.
    ///
    /// Unknown ids are logged and ignored.
    pub fn write(&self, id: &str, data: &[u8]) {
        let mut terminals = self.terminals.lock().unwrap();
        match terminals.get_mut(id) {
            Some(entry) => {
                if let Err(err) = entry.writer.write_all(data).and_then(|()| entry.writer.flush())
                {
                    tracing::warn!(terminal = %id, %err, "terminal write failed");
                }
            }
            None => tracing::warn!(terminal = %id, "write to unknown terminal"),
        }
    }

    /// Register `peer` as a viewer of `id`. Idempotent.
    ///
    /// Returns false (and logs) for an unknown terminal.
    pub fn add_peer(&self, id: &str, peer: Peer) -> bool {
        match self.terminals.lock().unwrap().get(id) {
            Some(entry) => {
                entry.peers.add(peer);
                true
            }
            None => {
                tracing::warn!(terminal = %id, "connect to unknown terminal");
                false
            }
        }
    }

    /// Remove `peer` as a viewer of `id`. Idempotent.
    pub fn remove_peer(&self, id: &str, peer: PeerId) {
        if let Some(entry) = self.terminals.lock().unwrap().get(id) {
            entry.peers.remove(peer);
        }
    }

    /// Remove `peer` from every terminal it joined. Called by the transport
    /// when the peer's connection closes.
    pub fn remove_peer_everywhere(&self, peer: PeerId) {
        for entry in self.terminals.lock().unwrap().values() {
            entry.peers.remove(peer);
        }
    }

    /// Kill the terminal's process and drop its entry.
    pub fn close(&self, id: &str) -> bool {
        self.terminals.lock().unwrap().remove(id).is_some()
    }

    /// Whether a live terminal uses `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.terminals.lock().unwrap().contains_key(id)
    }

    /// Ids of all live terminals.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.terminals.lock().unwrap().keys().cloned().collect()
    }

    /// Kill every terminal process and clear the registry.
    pub fn shutdown(&self) {
        self.terminals.lock().unwrap().clear();
    }
}
