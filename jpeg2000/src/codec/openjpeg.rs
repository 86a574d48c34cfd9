//! JPEG 2000 bitstream decoding through OpenJPEG.

use jpeg2k::Image;
use snafu::ResultExt;
use std::borrow::Cow;

use super::{BitstreamDecoder, BitstreamError, DecodedComponent, DecodedImage};
use crate::codestream;

// Check jpeg2k backend conflicts
#[cfg(all(feature = "openjp2", feature = "openjpeg-sys"))]
compile_error!(
    "feature \"openjp2\" and feature \"openjpeg-sys\" cannot be enabled at the same time"
);

/// Bitstream decoder backed by OpenJPEG.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpenJpegDecoder;

impl BitstreamDecoder for OpenJpegDecoder {
    fn decode(&self, codestream: &[u8]) -> Result<DecodedImage, BitstreamError> {
        let image = Image::from_bytes(codestream).whatever_context("jpeg2k decoder failure")?;

        // Note: we cannot use `get_pixels`
        // because it narrows the data down to 8 bits per sample
        let components = image
            .components()
            .iter()
            .map(|component| DecodedComponent {
                width: component.width(),
                height: component.height(),
                factor: 0,
                precision: component.precision(),
                signed: component.is_signed(),
                data: component.data().to_vec(),
            })
            .collect();

        // OpenJPEG does not report the wavelet filter,
        // so it is read from the main header instead
        let reversible = codestream::coding_style(codestream)
            .map(|style| style.is_reversible())
            .unwrap_or(false);

        Ok(DecodedImage {
            width: image.width(),
            height: image.height(),
            components,
            reversible,
        })
    }

    fn description(&self) -> Cow<'static, str> {
        if cfg!(feature = "openjpeg-sys") {
            Cow::Borrowed("OpenJPEG (statically linked) via jpeg2k")
        } else {
            Cow::Borrowed("OpenJPEG (Rust port openjp2) via jpeg2k")
        }
    }
}
