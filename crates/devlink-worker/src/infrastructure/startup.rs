//! Worker startup: argument validation and token loading.
//!
//! The worker refuses to start unless it is told explicitly where its data
//! directory is and what its socket is called, and unless the token file
//! already exists there.  Nothing is defaulted or inferred: a worker that
//! started without a token would accept any client.

use std::path::{Path, PathBuf};

use devlink_core::protocol::privileged::{socket_file_name, TOKEN_FILE_NAME};
use devlink_core::AuthToken;
use thiserror::Error;
use tracing::info;

/// Error type for worker startup.  Every variant is fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("--data-dir is required")]
    MissingDataDir,

    #[error("data directory {0} does not exist or is not a directory")]
    DataDirNotFound(PathBuf),

    #[error("--socket-name is required")]
    MissingSocketName,

    #[error("invalid socket name {0:?}: use letters, digits, '.', '-' or '_'")]
    InvalidSocketName(String),

    #[error("token file {0} not found; run `devlink token init` first")]
    MissingToken(PathBuf),

    #[error("could not read token file {path}: {source}")]
    TokenUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token file {0} does not hold a valid token")]
    InvalidToken(PathBuf),

    #[error("token file {path} is accessible by other users (mode {mode:o})")]
    InsecureTokenPermissions { path: PathBuf, mode: u32 },

    #[error("could not bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validated worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub data_dir: PathBuf,
    pub socket_name: String,
}

impl WorkerConfig {
    /// Validates the raw command-line values.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if either value is absent or unusable.
    pub fn from_args(
        data_dir: Option<PathBuf>,
        socket_name: Option<String>,
    ) -> Result<Self, StartupError> {
        let data_dir = data_dir.ok_or(StartupError::MissingDataDir)?;
        if !data_dir.is_dir() {
            return Err(StartupError::DataDirNotFound(data_dir));
        }

        let socket_name = socket_name.ok_or(StartupError::MissingSocketName)?;
        if !is_valid_socket_name(&socket_name) {
            return Err(StartupError::InvalidSocketName(socket_name));
        }

        Ok(Self {
            data_dir,
            socket_name,
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join(socket_file_name(&self.socket_name))
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_FILE_NAME)
    }

    /// Loads the token the client wrote with `devlink token init`.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, the wrong size, or (on Unix)
    /// readable by anyone other than its owner.
    pub fn load_token(&self) -> Result<AuthToken, StartupError> {
        let path = self.token_path();
        check_permissions(&path)?;
        let bytes = std::fs::read(&path).map_err(|source| token_read_error(&path, source))?;
        let token = AuthToken::from_bytes(&bytes).map_err(|_| StartupError::InvalidToken(path.clone()))?;
        info!(path = %path.display(), "token loaded");
        Ok(token)
    }
}

fn is_valid_socket_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn token_read_error(path: &Path, source: std::io::Error) -> StartupError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StartupError::MissingToken(path.to_path_buf())
    } else {
        StartupError::TokenUnreadable {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), StartupError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|source| token_read_error(path, source))?;
    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(StartupError::InsecureTokenPermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), StartupError> {
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
