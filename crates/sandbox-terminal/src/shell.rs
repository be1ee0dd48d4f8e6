//! Shell discovery for interactive terminals and one-shot commands.

use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Returns `(program, argument)` for one-shot command execution.
///
/// Windows: `("cmd", "/C")`; Unix: the user's configured shell with `-c`.
#[must_use]
pub fn shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        let shell = UnixShell::current();
        (shell.path().to_string_lossy().into_owned(), "-c")
    }
}

/// Path to an interactive shell for terminal sessions.
///
/// Windows prefers PowerShell, falling back to cmd.exe. Unix uses `$SHELL`,
/// then a `bash` found on `PATH`, then `/bin/sh`.
#[must_use]
pub fn interactive_shell() -> PathBuf {
    if cfg!(windows) {
        which::which("powershell.exe").unwrap_or_else(|_| PathBuf::from("cmd.exe"))
    } else {
        UnixShell::current().path().to_path_buf()
    }
}

/// Unix shell classified by flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// The shell binary path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Whether this shell supports login mode.
    #[must_use]
    pub const fn login(&self) -> bool {
        matches!(self, Self::Zsh(_) | Self::Bash(_))
    }

    /// The user's rc file for this shell, if it exists.
    #[must_use]
    pub fn config_file(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let config_file = match self {
            Self::Zsh(_) => Some(home.join(".zshrc")),
            Self::Bash(_) => Some(home.join(".bashrc")),
            Self::Sh(_) | Self::Other(_) => None,
        };
        config_file.filter(|p| p.is_file())
    }

    /// A `source <rcfile>` command with the path safely quoted.
    #[must_use]
    pub fn source_command(&self) -> Option<String> {
        let config_file = self.config_file()?;
        let config_file_str = config_file.to_string_lossy();
        let escaped = shlex::try_quote(config_file_str.as_ref()).ok()?;
        Some(format!("source {escaped}"))
    }

    /// The current shell from `$SHELL`, with fallbacks.
    #[must_use]
    pub fn current() -> Self {
        if let Ok(shell) = env::var("SHELL") {
            if let Some(shell) = Self::from_path(Path::new(&shell)) {
                return shell;
            }
        }
        if let Ok(bash) = which::which("bash") {
            return Self::Bash(bash);
        }
        Self::Sh(PathBuf::from("/bin/sh"))
    }

    /// Classify an absolute shell path by its file name.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.is_absolute() || !path.is_file() {
            return None;
        }
        let path_buf = path.to_path_buf();
        if path.file_name() == Some(OsStr::new("zsh")) {
            Some(Self::Zsh(path_buf))
        } else if path.file_name() == Some(OsStr::new("bash")) {
            Some(Self::Bash(path_buf))
        } else if path.file_name() == Some(OsStr::new("sh")) {
            Some(Self::Sh(path_buf))
        } else {
            Some(Self::Other(path_buf))
        }
    }
}
