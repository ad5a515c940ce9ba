//! Storage infrastructure: the TOML config file and owner-only secret files.
//!
//! Everything the client persists lives under one data directory: the key
//! store's `identity.key`/`identity.wrap` and the privileged channel's
//! `worker.token`.  Those files are written through [`write_private_file`],
//! which creates them readable by the owner only.

pub mod config;

use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path`, creating or truncating it with mode 0600 on Unix.
///
/// The parent directory is created if missing.
///
/// # Errors
///
/// Returns any I/O error from creating the directory or writing the file.
pub fn write_private_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // An existing file keeps its old mode on open; tighten it explicitly.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()
}

/// Removes `path`, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
