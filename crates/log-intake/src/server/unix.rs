// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unix domain socket path handling.
//!
//! The socket file is created at bind time and removed once the server has stopped.
//! A file left behind by a previous process that did not shut down cleanly is replaced,
//! while a socket still served by another process makes the bind fail.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

// Unix sockets have a limit of 108 bytes on Linux (104 on macOS), keep a safety margin
const MAX_SOCKET_PATH_LEN: usize = 100;

/// Validates a Unix domain socket path.
///
/// # Errors
///
/// Returns an error if:
/// - Path is empty
/// - Path contains null bytes
/// - Path length exceeds 100 bytes
pub fn validate_socket_path(path: &Path) -> io::Result<()> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Unix socket path cannot be empty",
        ));
    }

    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Unix socket path cannot contain null bytes",
        ));
    }

    if bytes.len() > MAX_SOCKET_PATH_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Unix socket path too long: {} bytes (max {} bytes)",
                bytes.len(),
                MAX_SOCKET_PATH_LEN
            ),
        ));
    }

    Ok(())
}

/// Removes the socket file when dropped.
///
/// Tokio's `UnixListener` does not remove its socket file, so the server keeps this
/// guard alive until every connection has been drained.
#[derive(Debug)]
pub struct SocketCleanupGuard {
    path: PathBuf,
}

impl SocketCleanupGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for SocketCleanupGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed Unix socket {}", self.path.display()),
            // Already cleaned up
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove Unix socket file '{}': {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Clears whatever an earlier process left at `path`.
///
/// Symlinks and directories are refused. A socket with a live listener behind it is
/// refused too, anything else is removed.
async fn remove_stale_socket(path: &Path) -> io::Result<()> {
    // Use symlink_metadata to not follow symlinks
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(io::Error::new(
                e.kind(),
                format!(
                    "Failed to check metadata of existing file at {}: {}",
                    path.display(),
                    e
                ),
            ))
        }
    };

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Unix socket path is a symlink, refusing to remove it: {}",
                path.display()
            ),
        ));
    }
    if file_type.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Unix socket path is a directory: {}", path.display()),
        ));
    }

    if file_type.is_socket() && UnixStream::connect(path).await.is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("Unix socket {} is in use by another process", path.display()),
        ));
    }

    debug!("Removing stale file at Unix socket path {}", path.display());
    std::fs::remove_file(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!(
                "Failed to remove existing Unix socket at {}: {}",
                path.display(),
                e
            ),
        )
    })
}

/// Binds a listener at `path`, replacing a stale socket file.
///
/// # Errors
///
/// Returns an error if:
/// - The path is invalid or its parent directory does not exist
/// - The path is a symlink, a directory, or a socket still in use
/// - The bind fails or the permissions cannot be applied
pub async fn bind(
    path: &Path,
    permissions: Option<u32>,
) -> io::Result<(UnixListener, SocketCleanupGuard)> {
    validate_socket_path(path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "Parent directory does not exist for Unix socket path: {}",
                    path.display()
                ),
            ));
        }
    }

    remove_stale_socket(path).await?;

    let listener = UnixListener::bind(path).map_err(|e| {
        let msg = match e.kind() {
            io::ErrorKind::AddrInUse | io::ErrorKind::AlreadyExists => format!(
                "Socket path {} already in use or bound by another process: {}",
                path.display(),
                e
            ),
            io::ErrorKind::PermissionDenied => format!(
                "Permission denied binding {}, check directory permissions: {}",
                path.display(),
                e
            ),
            _ => format!("Failed to bind Unix socket {}: {}", path.display(), e),
        };
        io::Error::new(e.kind(), msg)
    })?;
    // From here on the file is ours and must go away on every exit path
    let guard = SocketCleanupGuard::new(path.to_path_buf());

    if let Some(mode) = permissions {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "Failed to set permissions {:o} on Unix socket {}: {}",
                    mode,
                    path.display(),
                    e
                ),
            )
        })?;
    }

    Ok((listener, guard))
}
