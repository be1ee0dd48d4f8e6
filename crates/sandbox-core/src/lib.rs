//! Shared building blocks for the sandbox session runtime.
//!
//! This crate provides the pieces every other crate speaks in terms of:
//! - `Envelope` - the typed wire unit multiplexed over one connection
//! - `Action` + abort tokens - the command lifecycle model
//! - `Peer` / `PeerSet` - fan-out membership for resource viewers
//! - `FileOverlay` - the in-memory file/folder mirror
//! - `WorkspaceContext` - per-process workspace configuration

pub mod action;
pub mod context;
pub mod envelope;
pub mod overlay;
pub mod peer;

pub use action::{AbortHandle, AbortSignal, Action, ActionId, ActionStatus, abort_channel};
pub use context::WorkspaceContext;
pub use envelope::{Envelope, EnvelopeKind};
pub use overlay::{Dirent, FileOverlay, OverlayError};
pub use peer::{Peer, PeerId, PeerSet};
