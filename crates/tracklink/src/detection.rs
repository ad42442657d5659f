//! Detection records as published by the perception service.
//!
//! Records arrive as packed, little-endian `ai_detection_t` structs placed
//! back to back in the channel. Every field is read at its fixed offset, so a
//! record never borrows from or outlives the buffer it came from.

use serde::Serialize;

use crate::error::{Error, Result};

/// Magic number at the start of every well-formed record ("VOXL").
pub const DETECTION_MAGIC: u32 = 0x564F_584C;

/// Length of the NUL-padded text fields.
pub const TEXT_FIELD_LEN: usize = 64;

/// Name the server advertises for this record type in its channel info.
pub const DETECTION_TYPE_NAME: &str = "ai_detection_t";

mod offset {
    pub const MAGIC: usize = 0;
    pub const TIMESTAMP_NS: usize = 4;
    pub const CLASS_ID: usize = 12;
    pub const FRAME_ID: usize = 16;
    pub const CLASS_NAME: usize = 20;
    pub const CAM: usize = 84;
    pub const CLASS_CONFIDENCE: usize = 148;
    pub const DETECTION_CONFIDENCE: usize = 152;
    pub const X_MIN: usize = 156;
    pub const Y_MIN: usize = 160;
    pub const X_MAX: usize = 164;
    pub const Y_MAX: usize = 168;
    pub const END: usize = 172;
}

/// A record with a fixed on-the-wire size.
///
/// Implementors decode themselves from exactly `SIZE` bytes; the stream
/// decoder takes care of slicing buffers into strides.
pub trait FixedRecord: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode one record from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `bytes` is shorter than `SIZE`.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Axis-aligned bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x_min: f32,
    /// Top edge.
    pub y_min: f32,
    /// Right edge.
    pub x_max: f32,
    /// Bottom edge.
    pub y_max: f32,
}

impl BoundingBox {
    /// Width of the box (zero if inverted).
    #[must_use]
    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    /// Height of the box (zero if inverted).
    #[must_use]
    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }
}

/// One perception-model output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    /// Should equal [`DETECTION_MAGIC`].
    pub magic_number: u32,
    /// Capture time of the source frame, in nanoseconds.
    pub timestamp_ns: i64,
    /// Model class index.
    pub class_id: u32,
    /// Source frame counter.
    pub frame_id: i32,
    /// Model class label.
    pub class_name: String,
    /// Camera the frame came from.
    pub cam: String,
    /// Confidence in the class label.
    pub class_confidence: f32,
    /// Confidence that there is an object at all.
    pub detection_confidence: f32,
    /// Where the object is.
    pub bbox: BoundingBox,
}

impl DetectionRecord {
    /// The class-confidence score.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.class_confidence
    }

    /// Whether the record starts with the expected magic number.
    #[must_use]
    pub fn has_valid_magic(&self) -> bool {
        self.magic_number == DETECTION_MAGIC
    }

    /// Encode into the packed wire layout.
    ///
    /// Text fields longer than [`TEXT_FIELD_LEN`] are truncated.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; offset::END] {
        let mut out = [0u8; offset::END];
        out[offset::MAGIC..offset::TIMESTAMP_NS].copy_from_slice(&self.magic_number.to_le_bytes());
        out[offset::TIMESTAMP_NS..offset::CLASS_ID].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[offset::CLASS_ID..offset::FRAME_ID].copy_from_slice(&self.class_id.to_le_bytes());
        out[offset::FRAME_ID..offset::CLASS_NAME].copy_from_slice(&self.frame_id.to_le_bytes());
        write_text(&mut out[offset::CLASS_NAME..offset::CAM], &self.class_name);
        write_text(&mut out[offset::CAM..offset::CLASS_CONFIDENCE], &self.cam);
        let floats = [
            (offset::CLASS_CONFIDENCE, self.class_confidence),
            (offset::DETECTION_CONFIDENCE, self.detection_confidence),
            (offset::X_MIN, self.bbox.x_min),
            (offset::Y_MIN, self.bbox.y_min),
            (offset::X_MAX, self.bbox.x_max),
            (offset::Y_MAX, self.bbox.y_max),
        ];
        for (at, value) in floats {
            out[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

impl FixedRecord for DetectionRecord {
    const SIZE: usize = offset::END;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.get(..Self::SIZE).ok_or(Error::Decode {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;

        Ok(Self {
            magic_number: u32::from_le_bytes(field(bytes, offset::MAGIC)),
            timestamp_ns: i64::from_le_bytes(field(bytes, offset::TIMESTAMP_NS)),
            class_id: u32::from_le_bytes(field(bytes, offset::CLASS_ID)),
            frame_id: i32::from_le_bytes(field(bytes, offset::FRAME_ID)),
            class_name: read_text(&bytes[offset::CLASS_NAME..offset::CAM]),
            cam: read_text(&bytes[offset::CAM..offset::CLASS_CONFIDENCE]),
            class_confidence: f32::from_le_bytes(field(bytes, offset::CLASS_CONFIDENCE)),
            detection_confidence: f32::from_le_bytes(field(bytes, offset::DETECTION_CONFIDENCE)),
            bbox: BoundingBox {
                x_min: f32::from_le_bytes(field(bytes, offset::X_MIN)),
                y_min: f32::from_le_bytes(field(bytes, offset::Y_MIN)),
                x_max: f32::from_le_bytes(field(bytes, offset::X_MAX)),
                y_max: f32::from_le_bytes(field(bytes, offset::Y_MAX)),
            },
        })
    }
}

/// Copy `N` bytes starting at `at`. Callers have already checked the length.
fn field<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

fn read_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn write_text(dst: &mut [u8], text: &str) {
    // Keep one byte for the terminator.
    let len = text.len().min(dst.len() - 1);
    dst[..len].copy_from_slice(&text.as_bytes()[..len]);
}
