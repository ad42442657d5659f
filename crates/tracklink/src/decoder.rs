//! Stride decoding of concatenated fixed-size records.
//!
//! Each buffer handed to [`RecordDecoder::decode`] is walked in strides of
//! `R::SIZE` bytes. What happens to a trailing partial record depends on the
//! [`TailPolicy`].

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::detection::FixedRecord;

/// What to do with bytes left over after the last complete record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Discard them. Records split across deliveries are lost.
    #[default]
    Drop,
    /// Keep them and prepend them to the next buffer.
    Carry,
}

impl std::fmt::Display for TailPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Carry => write!(f, "carry"),
        }
    }
}

/// Running totals for one decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DecodeStats {
    /// Buffers handed to the decoder.
    pub buffers: u64,
    /// Records decoded.
    pub records: u64,
    /// Bytes discarded as partial tails.
    pub dropped_bytes: u64,
    /// Complete strides the record type refused to decode.
    pub rejected: u64,
}

/// Splits byte buffers into records of type `R`.
#[derive(Debug)]
pub struct RecordDecoder<R> {
    policy: TailPolicy,
    pending: Vec<u8>,
    stats: DecodeStats,
    _record: PhantomData<fn() -> R>,
}

impl<R: FixedRecord> RecordDecoder<R> {
    /// Create a decoder with the given tail policy.
    #[must_use]
    pub fn new(policy: TailPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            stats: DecodeStats::default(),
            _record: PhantomData,
        }
    }

    /// The tail policy in effect.
    #[must_use]
    pub fn policy(&self) -> TailPolicy {
        self.policy
    }

    /// Totals since creation.
    #[must_use]
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Bytes held back for the next buffer (always zero under `Drop`).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode every complete record in `buffer`.
    pub fn decode(&mut self, buffer: &[u8]) -> Vec<R> {
        self.stats.buffers += 1;

        if self.pending.is_empty() {
            let (records, tail) = self.decode_strides(buffer);
            self.keep_tail(tail);
            return records;
        }

        let mut joined = std::mem::take(&mut self.pending);
        joined.extend_from_slice(buffer);
        let (records, tail) = self.decode_strides(&joined);
        self.keep_tail(tail);
        records
    }

    /// Forget any carried bytes, counting them as dropped.
    ///
    /// Called when the stream ends so a half record never survives a
    /// disconnect.
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            trace!(bytes = self.pending.len(), "Discarding carried tail");
            self.stats.dropped_bytes += self.pending.len() as u64;
            self.pending.clear();
        }
    }

    fn decode_strides<'a>(&mut self, bytes: &'a [u8]) -> (Vec<R>, &'a [u8]) {
        let chunks = bytes.chunks_exact(R::SIZE);
        let tail = chunks.remainder();
        let mut records = Vec::with_capacity(bytes.len() / R::SIZE);

        for chunk in chunks {
            match R::decode(chunk) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable record");
                    self.stats.rejected += 1;
                }
            }
        }

        self.stats.records += records.len() as u64;
        (records, tail)
    }

    fn keep_tail(&mut self, tail: &[u8]) {
        if tail.is_empty() {
            return;
        }
        match self.policy {
            TailPolicy::Drop => {
                trace!(bytes = tail.len(), "Dropping partial record");
                self.stats.dropped_bytes += tail.len() as u64;
            }
            TailPolicy::Carry => self.pending.extend_from_slice(tail),
        }
    }
}
