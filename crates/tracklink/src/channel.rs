//! Channel naming and the transport seam.
//!
//! A channel is a named, system-local byte stream. [`ChannelTransport`]
//! turns a channel path and a client identity into a [`ChannelHandle`]
//! that owns the read side of the stream for as long as the reader is
//! connected.

use std::fmt;
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncRead;
#[cfg(target_os = "linux")]
use tracing::{info, warn};

#[cfg(target_os = "linux")]
use crate::detection::DETECTION_TYPE_NAME;
use crate::error::Result;

/// Directory that relative channel names are resolved against.
pub const CHANNEL_ROOT: &str = "/run/mpa/";

/// Channel the perception service publishes detections on.
pub const DEFAULT_CHANNEL: &str = "/run/mpa/tflite_data";

/// Identity this client announces to the server.
pub const DEFAULT_CLIENT_NAME: &str = "voxl-tracking";

/// A resolved channel location.
///
/// Always absolute and always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPath(PathBuf);

impl ChannelPath {
    /// Resolve a channel name or path.
    ///
    /// Names without a leading `/` live under [`CHANNEL_ROOT`].
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        let mut path = if name.starts_with('/') {
            name.to_string()
        } else {
            format!("{CHANNEL_ROOT}{name}")
        };
        if !path.ends_with('/') {
            path.push('/');
        }
        Self(PathBuf::from(path))
    }

    /// The channel directory.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// What the server says about a channel, when it says anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Channel name as published.
    pub name: String,
    /// Channel directory as published.
    pub location: String,
    /// Record type name.
    pub data_type: String,
    /// Publishing process.
    pub server_name: String,
    /// Pipe buffer size the server asked for.
    pub size_bytes: Option<u64>,
    /// Publishing process id.
    pub server_pid: Option<i64>,
}

#[cfg(target_os = "linux")]
impl From<tracklink_linux::PipeInfo> for ChannelInfo {
    fn from(info: tracklink_linux::PipeInfo) -> Self {
        Self {
            name: info.name,
            location: info.location,
            data_type: info.data_type,
            server_name: info.server_name,
            size_bytes: info.size_bytes,
            server_pid: info.server_pid,
        }
    }
}

/// Async byte stream delivered by a channel.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// One open subscription.
///
/// Dropping the handle releases the subscription.
pub struct ChannelHandle {
    path: ChannelPath,
    client_name: String,
    max_queued_bytes: usize,
    info: Option<ChannelInfo>,
    source: ByteSource,
}

impl ChannelHandle {
    /// Wrap an already-open byte source.
    #[must_use]
    pub fn new(
        path: ChannelPath,
        client_name: impl Into<String>,
        max_queued_bytes: usize,
        source: ByteSource,
    ) -> Self {
        Self {
            path,
            client_name: client_name.into(),
            max_queued_bytes,
            info: None,
            source,
        }
    }

    /// Attach server-provided channel info.
    #[must_use]
    pub fn with_info(mut self, info: Option<ChannelInfo>) -> Self {
        self.info = info;
        self
    }

    /// Where this handle is subscribed.
    #[must_use]
    pub fn path(&self) -> &ChannelPath {
        &self.path
    }

    /// The identity announced to the server.
    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Largest buffer delivered in one read.
    #[must_use]
    pub fn max_queued_bytes(&self) -> usize {
        self.max_queued_bytes
    }

    /// Server-provided channel info, if any.
    #[must_use]
    pub fn info(&self) -> Option<&ChannelInfo> {
        self.info.as_ref()
    }

    pub(crate) fn source_mut(&mut self) -> &mut ByteSource {
        &mut self.source
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("path", &self.path)
            .field("client_name", &self.client_name)
            .field("max_queued_bytes", &self.max_queued_bytes)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Opens channels.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Name of this transport (for logging).
    fn name(&self) -> &'static str;

    /// Subscribe to `path` as `client_name`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ChannelConnect`] if the channel cannot be
    /// opened, for example because no server is publishing it.
    async fn open(
        &self,
        path: &ChannelPath,
        client_name: &str,
        max_queued_bytes: usize,
    ) -> Result<ChannelHandle>;
}

/// Modal pipe transport: FIFO handshake under `/run/mpa/`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct ModalPipeTransport {
    connect_timeout: Duration,
}

#[cfg(target_os = "linux")]
impl ModalPipeTransport {
    /// Create a transport that waits up to `connect_timeout` for the server.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn read_info(path: &ChannelPath) -> Option<ChannelInfo> {
        match tracklink_linux::modal_pipe::read_info(path.as_path()) {
            Ok(Some(info)) => {
                info!(
                    name = %info.name,
                    location = %info.location,
                    data_type = %info.data_type,
                    server = %info.server_name,
                    size_bytes = ?info.size_bytes,
                    server_pid = ?info.server_pid,
                    "Channel info"
                );
                if !info.data_type.is_empty() && info.data_type != DETECTION_TYPE_NAME {
                    warn!(
                        expected = DETECTION_TYPE_NAME,
                        actual = %info.data_type,
                        "Channel publishes an unexpected record type"
                    );
                }
                Some(info.into())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring channel info");
                None
            }
        }
    }
}

#[cfg(target_os = "linux")]
#[async_trait::async_trait]
impl ChannelTransport for ModalPipeTransport {
    fn name(&self) -> &'static str {
        "modal-pipe"
    }

    async fn open(
        &self,
        path: &ChannelPath,
        client_name: &str,
        max_queued_bytes: usize,
    ) -> Result<ChannelHandle> {
        let receiver =
            tracklink_linux::modal_pipe::connect(path.as_path(), client_name, self.connect_timeout)
                .await?;
        let info = Self::read_info(path);

        Ok(
            ChannelHandle::new(path.clone(), client_name, max_queued_bytes, Box::new(receiver))
                .with_info(info),
        )
    }
}

/// The transport for this platform.
///
/// # Errors
///
/// Returns [`crate::Error::Platform`] where no channel transport exists.
#[cfg(target_os = "linux")]
pub fn platform_transport(connect_timeout: Duration) -> Result<Box<dyn ChannelTransport>> {
    Ok(Box::new(ModalPipeTransport::new(connect_timeout)))
}

/// The transport for this platform.
///
/// # Errors
///
/// Returns [`crate::Error::Platform`] where no channel transport exists.
#[cfg(not(target_os = "linux"))]
pub fn platform_transport(
    _connect_timeout: std::time::Duration,
) -> Result<Box<dyn ChannelTransport>> {
    Err(crate::Error::platform(
        "modal pipe channels are only available on Linux",
    ))
}
