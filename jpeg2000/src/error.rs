//! Error types for JPEG 2000 pixel data decoding.

use dicom_core::Tag;
use snafu::Snafu;
use std::collections::TryReserveError;

use crate::codec::BitstreamError;

/// The possible error conditions when decoding
/// JPEG 2000 encapsulated pixel data.
///
/// Errors are surfaced to the caller as they are,
/// save for corrupted bitstreams while
/// [forcing a single fragment per frame](crate::DecoderOptions::with_force_single_fragment_per_frame),
/// in which case the frame is skipped instead.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    /// A required attribute is missing
    /// from the DICOM object representing the image.
    #[snafu(display("Missing required attribute `{}`", name))]
    MissingAttribute { name: &'static str },

    /// A required attribute is outside of its supported range.
    #[snafu(display("Unsupported value `{}` for attribute `{}`", value, name))]
    InvalidAttribute { name: &'static str, value: String },

    /// The object has no _Pixel Data_ element.
    MissingPixelData,

    /// The pixel data is not encapsulated.
    NotEncapsulated,

    /// The number of fragments for a frame could not be determined.
    #[snafu(display(
        "Cannot compute number of fragments for frame #{} (starting at item #{})",
        frame,
        start_item
    ))]
    UnresolvableFragmentMapping { frame: u32, start_item: u32 },

    /// A fragment expected to be part of a frame is not in the pixel sequence.
    #[snafu(display("Missing pixel data fragment #{}", index))]
    MissingFragment { index: u32 },

    /// The requested frame is outside the object's frame range.
    #[snafu(display("Frame #{} is out of range (number of frames: {})", frame, frames))]
    FrameOutOfRange { frame: u32, frames: u32 },

    /// The decoded image does not agree with the attributes of the object.
    #[snafu(display(
        "Image data mismatch in frame #{}: {} is {} in the data set but {} in the codestream",
        frame,
        property,
        declared,
        decoded
    ))]
    GeometryMismatch {
        frame: u32,
        property: &'static str,
        declared: String,
        decoded: String,
    },

    /// The bitstream decoder failed on the frame's codestream.
    #[snafu(display("JPEG 2000 bitstream of frame #{} is invalid or incomplete", frame))]
    CorruptedBitstream { frame: u32, source: BitstreamError },

    /// A buffer could not be allocated.
    #[snafu(display("Could not allocate {} bytes", bytes))]
    ResourceExhaustion {
        bytes: usize,
        source: TryReserveError,
    },

    /// The decoded pixel data does not fit in a single data element.
    #[snafu(display("Decoded pixel data of {} bytes is too long for a data element", bytes))]
    PixelDataTooLong { bytes: usize },

    /// The transfer syntax is not supported by this decoder.
    #[snafu(display("Unsupported transfer syntax `{}`", uid))]
    UnsupportedTransferSyntax { uid: String },

    /// An attribute update could not be applied to the object.
    #[snafu(display("Could not update attribute {}: {}", tag, message))]
    ApplyAttribute { tag: Tag, message: String },
}

/// The result of decoding JPEG 2000 pixel data.
pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

impl DecodeError {
    /// Whether the error stems from an invalid or incomplete bitstream,
    /// the only kind of error that the tolerance policy may skip over.
    pub fn is_corrupted_bitstream(&self) -> bool {
        matches!(self, DecodeError::CorruptedBitstream { .. })
    }
}
