//! Modal pipe client plumbing.
//!
//! A modal pipe server publishes a directory (normally under `/run/mpa/`)
//! containing a `request` FIFO and an optional `info` JSON file. A client
//! writes its name into `request`, the server creates a dedicated FIFO named
//! after the client inside the same directory, and the client opens that FIFO
//! for reading.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tracing::{debug, trace};

/// Directory that holds all modal pipe channels.
pub const PIPE_ROOT: &str = "/run/mpa/";

/// Name of the FIFO clients write their name into.
pub const REQUEST_PIPE: &str = "request";

/// Name of the JSON file describing the channel.
pub const INFO_FILE: &str = "info";

/// How often to look for the client FIFO while waiting on the server.
const CLIENT_PIPE_POLL: Duration = Duration::from_millis(10);

/// `errno` for opening a FIFO for writing while nobody reads it.
const ENXIO: i32 = 6;

/// Longest client name the server accepts.
pub const MAX_CLIENT_NAME_LEN: usize = 64;

/// Errors from the modal pipe handshake.
#[derive(Debug, Error)]
pub enum PipeError {
    /// No server is publishing at this location.
    #[error("no server available at {path}")]
    ServerNotAvailable {
        /// The channel directory.
        path: PathBuf,
    },

    /// The client name cannot be used as a FIFO name.
    #[error("invalid client name '{0}'")]
    InvalidClientName(String),

    /// Writing the client name into the request FIFO failed.
    #[error("failed to send request to {path}: {source}")]
    Request {
        /// The request FIFO.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The server never created the client FIFO.
    #[error("server did not create {path} within {waited:?}")]
    Timeout {
        /// The expected client FIFO.
        path: PathBuf,
        /// How long we waited.
        waited: Duration,
    },

    /// Opening the client FIFO failed.
    #[error("failed to open {path}: {source}")]
    Open {
        /// The client FIFO.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The info file exists but could not be read or parsed.
    #[error("unreadable channel info at {path}: {message}")]
    Info {
        /// The info file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },
}

/// Result type for modal pipe operations.
pub type Result<T> = std::result::Result<T, PipeError>;

/// Contents of a channel's `info` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeInfo {
    /// Channel name.
    pub name: String,
    /// Channel directory.
    pub location: String,
    /// Name of the record type the server publishes.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Name of the publishing process.
    pub server_name: String,
    /// Pipe buffer size the server requested.
    pub size_bytes: Option<u64>,
    /// PID of the publishing process.
    pub server_pid: Option<i64>,
}

/// Path of the request FIFO inside a channel directory.
#[must_use]
pub fn request_pipe_path(dir: &Path) -> PathBuf {
    dir.join(REQUEST_PIPE)
}

/// Path of the dedicated FIFO the server creates for `client_name`.
#[must_use]
pub fn client_pipe_path(dir: &Path, client_name: &str) -> PathBuf {
    dir.join(client_name)
}

/// Check that a client name can be used as a FIFO file name.
///
/// # Errors
///
/// Returns [`PipeError::InvalidClientName`] for empty names, names containing
/// `/` or NUL, reserved file names, or names longer than
/// [`MAX_CLIENT_NAME_LEN`].
pub fn validate_client_name(name: &str) -> Result<()> {
    let reserved = matches!(name, "." | ".." | REQUEST_PIPE | INFO_FILE | "control");
    if name.is_empty()
        || name.len() > MAX_CLIENT_NAME_LEN
        || name.contains('/')
        || name.contains('\0')
        || reserved
    {
        return Err(PipeError::InvalidClientName(name.to_string()));
    }
    Ok(())
}

/// Read the channel's `info` file, if the server wrote one.
///
/// # Errors
///
/// Returns [`PipeError::Info`] if the file exists but is not valid JSON.
pub fn read_info(dir: &Path) -> Result<Option<PipeInfo>> {
    let path = dir.join(INFO_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PipeError::Info {
                path,
                message: e.to_string(),
            })
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| PipeError::Info {
            path,
            message: e.to_string(),
        })
}

/// Ask the server in `dir` to create a FIFO for `client_name`.
///
/// # Errors
///
/// Returns [`PipeError::ServerNotAvailable`] if the request FIFO is missing,
/// or [`PipeError::Request`] if it cannot be written.
pub async fn request_client_pipe(dir: &Path, client_name: &str) -> Result<()> {
    validate_client_name(client_name)?;

    let request = request_pipe_path(dir);
    if !is_fifo(&request).await {
        return Err(PipeError::ServerNotAvailable {
            path: dir.to_path_buf(),
        });
    }

    // ENXIO here means nobody holds the read end: the server is gone but
    // left its directory behind.
    let mut sender = pipe::OpenOptions::new()
        .open_sender(&request)
        .map_err(|source| match source.raw_os_error() {
            Some(ENXIO) => PipeError::ServerNotAvailable {
                path: dir.to_path_buf(),
            },
            _ => PipeError::Request {
                path: request.clone(),
                source,
            },
        })?;

    debug!(request = %request.display(), client = client_name, "Requesting client pipe");
    sender
        .write_all(client_name.as_bytes())
        .await
        .map_err(|source| PipeError::Request {
            path: request,
            source,
        })
}

/// Wait until the server has created the FIFO for `client_name`.
///
/// # Errors
///
/// Returns [`PipeError::Timeout`] if it does not appear within `timeout`.
pub async fn wait_for_client_pipe(
    dir: &Path,
    client_name: &str,
    timeout: Duration,
) -> Result<PathBuf> {
    let path = client_pipe_path(dir, client_name);

    let appeared = tokio::time::timeout(timeout, async {
        while !is_fifo(&path).await {
            trace!(path = %path.display(), "Client pipe not there yet");
            tokio::time::sleep(CLIENT_PIPE_POLL).await;
        }
    })
    .await;

    match appeared {
        Ok(()) => Ok(path),
        Err(_) => Err(PipeError::Timeout {
            path,
            waited: timeout,
        }),
    }
}

/// Open a client FIFO for reading.
///
/// # Errors
///
/// Returns [`PipeError::Open`] if the FIFO cannot be opened.
pub fn open_client_pipe(path: &Path) -> Result<pipe::Receiver> {
    pipe::OpenOptions::new()
        .open_receiver(path)
        .map_err(|source| PipeError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Run the whole client handshake and return the open read end.
///
/// # Errors
///
/// Returns any error from [`request_client_pipe`], [`wait_for_client_pipe`]
/// or [`open_client_pipe`].
pub async fn connect(dir: &Path, client_name: &str, timeout: Duration) -> Result<pipe::Receiver> {
    request_client_pipe(dir, client_name).await?;
    let path = wait_for_client_pipe(dir, client_name, timeout).await?;
    open_client_pipe(&path)
}

async fn is_fifo(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.file_type().is_fifo())
}
