//! Interface to the JPEG 2000 bitstream decoder.
//!
//! The entropy decoding of each frame is delegated to
//! an implementation of [`BitstreamDecoder`],
//! which turns a complete codestream into a [`DecodedImage`]:
//! one plane of integer samples per image component.
//!
//! - [`openjpeg`](openjpeg) provides [`OpenJpegDecoder`](openjpeg::OpenJpegDecoder),
//!   backed by [OpenJPEG] through the `jpeg2k` crate.
//!   The `openjp2` feature (enabled by default) uses the
//!   [Rust port of OpenJPEG][OpenJPEG-rs],
//!   whereas `openjpeg-sys` statically links the reference implementation.
//!
//! [OpenJPEG]: https://github.com/uclouvain/openjpeg
//! [OpenJPEG-rs]: https://crates.io/crates/openjp2
use snafu::Snafu;
use std::borrow::Cow;

use crate::codestream;

#[cfg(any(feature = "openjp2", feature = "openjpeg-sys"))]
pub mod openjpeg;

/// **Note:** This module is a stub.
/// Enable either `openjp2` or `openjpeg-sys` to use this module.
#[cfg(not(any(feature = "openjp2", feature = "openjpeg-sys")))]
pub mod openjpeg {}

/// An error reported by a bitstream decoder.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BitstreamError {
    /// The decoder failed with a custom message.
    ///
    /// The [`whatever!`](snafu::whatever) macro can be used
    /// to easily create an error of this kind.
    #[snafu(whatever, display("{}", message))]
    Custom {
        /// The error message.
        message: String,
        /// The underlying error cause, if any.
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync + 'static>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

/// A single component (sample plane) of a decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedComponent {
    /// the width of the component at full resolution
    pub width: u32,
    /// the height of the component at full resolution
    pub height: u32,
    /// the resolution reduction factor:
    /// samples are available at `ceil(dimension / 2^factor)`
    pub factor: u32,
    /// the number of bits per sample
    pub precision: u32,
    /// whether samples are signed
    pub signed: bool,
    /// the samples, in row-major order with a stride of `width`
    pub data: Vec<i32>,
}

impl DecodedComponent {
    /// The width of the component at the resolution it was decoded.
    pub fn effective_width(&self) -> u32 {
        ceil_div_pow2(self.width, self.factor)
    }

    /// The height of the component at the resolution it was decoded.
    pub fn effective_height(&self) -> u32 {
        ceil_div_pow2(self.height, self.factor)
    }

    /// Fetch the sample at the given position,
    /// in coordinates of the decoded resolution.
    ///
    /// Returns `None` if the position is outside of the sample data.
    pub fn sample(&self, row: u32, col: u32) -> Option<i32> {
        if col >= self.effective_width() {
            return None;
        }
        let index = row as usize * self.width as usize + col as usize;
        self.data.get(index).copied()
    }
}

/// The outcome of decoding a JPEG 2000 codestream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// the width of the image grid
    pub width: u32,
    /// the height of the image grid
    pub height: u32,
    /// the decoded image components
    pub components: Vec<DecodedComponent>,
    /// whether the codestream was encoded with the reversible transform
    pub reversible: bool,
}

/// A decoder of JPEG 2000 bitstreams.
///
/// Implementations are expected to behave as pure functions:
/// decoding one codestream must not affect decoding another.
pub trait BitstreamDecoder {
    /// Parse and decode a complete codestream (or JP2 file).
    fn decode(&self, codestream: &[u8]) -> Result<DecodedImage, BitstreamError>;

    /// Check whether a pixel data fragment starts a new image
    /// in the format of this decoder.
    fn is_start_of_image(&self, fragment: &[u8]) -> bool {
        codestream::is_start_of_image(fragment)
    }

    /// A human readable description of the underlying implementation.
    fn description(&self) -> Cow<'static, str>;
}

impl<T> BitstreamDecoder for &T
where
    T: BitstreamDecoder + ?Sized,
{
    fn decode(&self, codestream: &[u8]) -> Result<DecodedImage, BitstreamError> {
        (**self).decode(codestream)
    }

    fn is_start_of_image(&self, fragment: &[u8]) -> bool {
        (**self).is_start_of_image(fragment)
    }

    fn description(&self) -> Cow<'static, str> {
        (**self).description()
    }
}

impl<T> BitstreamDecoder for Box<T>
where
    T: BitstreamDecoder + ?Sized,
{
    fn decode(&self, codestream: &[u8]) -> Result<DecodedImage, BitstreamError> {
        (**self).decode(codestream)
    }

    fn is_start_of_image(&self, fragment: &[u8]) -> bool {
        (**self).is_start_of_image(fragment)
    }

    fn description(&self) -> Cow<'static, str> {
        (**self).description()
    }
}

#[inline]
fn ceil_div_pow2(value: u32, factor: u32) -> u32 {
    if factor >= 32 {
        return u32::from(value > 0);
    }
    ((u64::from(value) + (1_u64 << factor) - 1) >> factor) as u32
}
