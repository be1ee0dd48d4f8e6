//! Per-process workspace configuration.

use std::path::{Path, PathBuf};

/// Default port the preview probe starts from.
pub const DEFAULT_PREVIEW_PORT: u16 = 3001;

/// Workspace configuration shared by every component of a session.
///
/// Configured once at process start and passed by handle; components never
/// read it from ambient state.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    /// Root directory commands and terminals run in.
    pub working_dir: PathBuf,
    /// First port probed when starting a preview listener.
    pub preview_port: u16,
}

impl WorkspaceContext {
    /// Create a context rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            preview_port: DEFAULT_PREVIEW_PORT,
        }
    }

    /// Override the preview probe start port.
    #[must_use]
    pub const fn with_preview_port(mut self, port: u16) -> Self {
        self.preview_port = port;
        self
    }

    /// The workspace root.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
