//! Detection stream reader.
//!
//! [`StreamReader::connect`] subscribes to a channel; [`StreamReader::run`]
//! then reads buffers of up to `max_queued_bytes`, decodes every complete
//! record and hands each one to a [`StreamHandler`]. The reader goes
//! `Disconnected → Connected → Disconnected` exactly once: `run` consumes
//! it, so nothing is delivered after the disconnect callback.

use std::io::Write;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::channel::{ChannelHandle, ChannelPath, ChannelTransport};
use crate::config::MAX_QUEUE_DEPTH;
use crate::decoder::{DecodeStats, RecordDecoder, TailPolicy};
use crate::detection::{DetectionRecord, FixedRecord};
use crate::error::{Error, Result};
use crate::lifecycle::ShutdownToken;

/// Receives reader events.
///
/// Calls are serialized: the reader invokes one method at a time from the
/// task running [`StreamReader::run`].
pub trait StreamHandler<R>: Send {
    /// The channel is open and the reader is about to read.
    fn on_connected(&mut self, channel: &ChannelPath) {
        info!(channel = %channel, "Connected to tflite server");
    }

    /// The stream ended or the reader was stopped.
    fn on_disconnected(&mut self, channel: &ChannelPath) {
        warn!(channel = %channel, "Disconnected from tflite server");
    }

    /// One complete record arrived.
    fn on_record(&mut self, record: &R);
}

/// How records are written by [`ConsoleHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// `class confidence: <value>` per record.
    #[default]
    Confidence,
    /// One JSON object per record.
    Json,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    received_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    detection: &'a DetectionRecord,
}

/// Writes each detection to an output stream.
#[derive(Debug)]
pub struct ConsoleHandler<W> {
    out: W,
    format: RecordFormat,
}

impl ConsoleHandler<std::io::Stdout> {
    /// Print to stdout.
    #[must_use]
    pub fn stdout(format: RecordFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write + Send> ConsoleHandler<W> {
    /// Write to `out`.
    pub fn new(out: W, format: RecordFormat) -> Self {
        Self { out, format }
    }

    /// Give back the output stream.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_record(&mut self, record: &DetectionRecord) -> std::io::Result<()> {
        match self.format {
            RecordFormat::Confidence => {
                writeln!(self.out, "class confidence: {:.6}", record.confidence())
            }
            RecordFormat::Json => {
                let line = JsonLine {
                    received_at: Utc::now(),
                    detection: record,
                };
                serde_json::to_writer(&mut self.out, &line)?;
                writeln!(self.out)
            }
        }
    }
}

impl<W: Write + Send> StreamHandler<DetectionRecord> for ConsoleHandler<W> {
    fn on_record(&mut self, record: &DetectionRecord) {
        if let Err(e) = self.write_record(record) {
            warn!(error = %e, "Cannot write detection");
        }
    }
}

/// Where the reader is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    /// Not subscribed.
    Disconnected,
    /// Subscribed and reading.
    Connected,
}

/// Snapshot of a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderStatus {
    /// Current state.
    pub state: ReaderState,
    /// Channel the reader is bound to.
    pub channel: String,
    /// Decoder totals.
    pub stats: DecodeStats,
}

/// Parameters for [`StreamReader::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Channel to subscribe to.
    pub channel: ChannelPath,
    /// Identity announced to the server.
    pub client_name: String,
    /// Largest buffer read at once.
    pub max_queued_bytes: usize,
    /// Partial-record handling.
    pub tail_policy: TailPolicy,
}

/// Reads and decodes one channel subscription.
#[derive(Debug)]
pub struct StreamReader<R> {
    handle: ChannelHandle,
    decoder: RecordDecoder<R>,
    state: ReaderState,
}

impl<R: FixedRecord + Send> StreamReader<R> {
    /// Open the channel described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `max_queued_bytes` cannot hold
    /// one record or exceeds [`MAX_QUEUE_DEPTH`] records, or
    /// [`Error::ChannelConnect`] if the transport cannot open the channel.
    pub async fn connect(transport: &dyn ChannelTransport, options: &ReaderOptions) -> Result<Self> {
        let limit = R::SIZE.saturating_mul(MAX_QUEUE_DEPTH);
        if options.max_queued_bytes < R::SIZE || options.max_queued_bytes > limit {
            return Err(Error::ConfigValidation {
                message: format!(
                    "max_queued_bytes ({}) must be between one record ({} bytes) and {limit} bytes",
                    options.max_queued_bytes,
                    R::SIZE
                ),
            });
        }

        debug!(
            channel = %options.channel,
            client = %options.client_name,
            transport = transport.name(),
            max_queued_bytes = options.max_queued_bytes,
            "Opening channel"
        );
        let handle = transport
            .open(&options.channel, &options.client_name, options.max_queued_bytes)
            .await?;

        Ok(Self {
            handle,
            decoder: RecordDecoder::new(options.tail_policy),
            state: ReaderState::Disconnected,
        })
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ReaderStatus {
        ReaderStatus {
            state: self.state,
            channel: self.handle.path().to_string(),
            stats: self.decoder.stats(),
        }
    }

    /// The open channel.
    #[must_use]
    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    /// Deliver records to `handler` until the stream ends or `shutdown`
    /// is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelRead`] if reading fails; the handler has
    /// already seen `on_disconnected` by then.
    pub async fn run<H>(mut self, handler: &mut H, shutdown: &ShutdownToken) -> Result<ReaderStatus>
    where
        H: StreamHandler<R> + ?Sized,
    {
        let channel = self.handle.path().clone();
        let mut buf = vec![0u8; self.handle.max_queued_bytes()];

        self.state = ReaderState::Connected;
        handler.on_connected(&channel);

        let failure = loop {
            let read = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                read = self.handle.source_mut().read(&mut buf) => Some(read),
            };

            match read {
                None => {
                    debug!("Reader stopped by shutdown");
                    break None;
                }
                Some(Ok(0)) => {
                    debug!("Channel reached end of stream");
                    break None;
                }
                Some(Ok(n)) => {
                    for record in self.decoder.decode(&buf[..n]) {
                        handler.on_record(&record);
                    }
                }
                Some(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Some(Err(e)) => break Some(e),
            }
        };

        self.decoder.reset();
        self.state = ReaderState::Disconnected;
        handler.on_disconnected(&channel);

        let status = self.status();
        info!(
            buffers = status.stats.buffers,
            records = status.stats.records,
            dropped_bytes = status.stats.dropped_bytes,
            rejected = status.stats.rejected,
            "Reader finished"
        );

        match failure {
            None => Ok(status),
            Some(source) => Err(Error::ChannelRead {
                path: channel.as_path().to_path_buf(),
                source,
            }),
        }
    }
}
