//! Decoding of a single frame out of encapsulated pixel data.

use snafu::{OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::attribute::Geometry;
use crate::codec::{BitstreamDecoder, DecodedImage};
use crate::codestream;
use crate::error::{
    CorruptedBitstreamSnafu, DecodeError, GeometryMismatchSnafu, MissingFragmentSnafu,
    ResourceExhaustionSnafu, Result, UnresolvableFragmentMappingSnafu,
};
use crate::fragment::{fragments_for_frame, FragmentSource, FrameQuery};
use crate::unpack::{unpack, PlanarConfiguration};

/// The result of successfully decoding one frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// the number of fragments which made up the frame
    pub fragment_count: u32,
    /// the item index of the next frame's first fragment
    pub next_item: u32,
    /// whether the frame was encoded with the reversible transform
    pub lossless: bool,
}

/// Decodes frames of one image, one at a time.
///
/// This holds everything which stays the same across frames:
/// the bitstream decoder, the pixel data fragments,
/// and the geometry declared by the data set.
#[derive(Debug)]
pub struct FrameDecoder<'a, B: ?Sized, F: ?Sized> {
    pub bitstream: &'a B,
    pub fragments: &'a F,
    pub geometry: &'a Geometry,
    /// do not trust the basic offset table
    pub ignore_offset_table: bool,
    /// assume a single fragment when the fragments of a frame cannot be determined
    pub force_single_fragment_per_frame: bool,
}

impl<'a, B, F> FrameDecoder<'a, B, F>
where
    B: BitstreamDecoder + ?Sized,
    F: FragmentSource + ?Sized,
{
    /// Determine the number of fragments of a frame.
    ///
    /// Fails if the count cannot be determined or is zero,
    /// unless a single fragment per frame is forced.
    pub fn fragment_count(&self, frame: u32, start_item: u32) -> Result<u32> {
        let query = FrameQuery {
            frame_count: self.geometry.number_of_frames,
            frame_index: frame,
            start_item,
            ignore_offset_table: self.ignore_offset_table,
        };
        let is_start_of_image = |fragment: &[u8]| self.bitstream.is_start_of_image(fragment);
        let count = match fragments_for_frame(&query, self.fragments, &is_start_of_image) {
            Ok(run) => run.count,
            Err(DecodeError::UnresolvableFragmentMapping { .. })
                if self.force_single_fragment_per_frame =>
            {
                0
            }
            Err(e) => return Err(e),
        };

        match count {
            0 if self.force_single_fragment_per_frame
                && start_item < self.fragments.item_count() =>
            {
                warn!(
                    "Cannot compute number of fragments for frame #{}, assuming one",
                    frame
                );
                Ok(1)
            }
            0 => UnresolvableFragmentMappingSnafu { frame, start_item }.fail(),
            count => Ok(count),
        }
    }

    /// Concatenate the fragments `start_item..start_item + count`
    /// into a single codestream.
    pub fn read_codestream(&self, start_item: u32, count: u32) -> Result<Vec<u8>> {
        let end = start_item.saturating_add(count);
        let mut size = 0_usize;
        for index in start_item..end {
            let len = self
                .fragments
                .item_len(index)
                .context(MissingFragmentSnafu { index })?;
            size += len as usize;
        }

        let mut codestream = Vec::new();
        codestream
            .try_reserve_exact(size)
            .context(ResourceExhaustionSnafu { bytes: size })?;
        for index in start_item..end {
            let fragment = self
                .fragments
                .item(index)
                .context(MissingFragmentSnafu { index })?;
            codestream.extend_from_slice(&fragment);
        }
        Ok(codestream)
    }

    /// Decode a frame into its region of the output buffer.
    ///
    /// `start_item` is the item index of the frame's first fragment.
    /// `planar_configuration` is only taken into account for color images.
    pub fn decode_into(
        &self,
        frame: u32,
        start_item: u32,
        planar_configuration: PlanarConfiguration,
        region: &mut [u8],
    ) -> Result<DecodedFrame> {
        debug!(
            "Decoding frame #{} starting at fragment #{}",
            frame, start_item
        );
        let fragment_count = self.fragment_count(frame, start_item)?;
        let codestream = self.read_codestream(start_item, fragment_count)?;

        let trimmed = codestream::trim_to_end_of_image(&codestream);
        if trimmed.len() != codestream.len() {
            warn!(
                "Trimmed {} trailing byte(s) from codestream of frame #{}",
                codestream.len() - trimmed.len(),
                frame
            );
        }

        let image = self
            .bitstream
            .decode(trimmed)
            .context(CorruptedBitstreamSnafu { frame })?;
        drop(codestream);

        validate_geometry(&image, self.geometry, frame)?;
        unpack(&image, self.geometry, frame, region, planar_configuration)?;

        Ok(DecodedFrame {
            fragment_count,
            next_item: start_item + fragment_count,
            lossless: image.reversible,
        })
    }
}

/// Check that a decoded image agrees with the geometry of the data set.
pub fn validate_geometry(image: &DecodedImage, geometry: &Geometry, frame: u32) -> Result<()> {
    let mismatch = |property: &'static str, declared: String, decoded: String| {
        GeometryMismatchSnafu {
            frame,
            property,
            declared,
            decoded,
        }
        .fail()
    };

    if image.width != u32::from(geometry.columns) {
        return mismatch(
            "Columns",
            geometry.columns.to_string(),
            image.width.to_string(),
        );
    }
    if image.height != u32::from(geometry.rows) {
        return mismatch("Rows", geometry.rows.to_string(), image.height.to_string());
    }
    if image.components.len() != usize::from(geometry.samples_per_pixel) {
        return mismatch(
            "SamplesPerPixel",
            geometry.samples_per_pixel.to_string(),
            image.components.len().to_string(),
        );
    }

    let Some(first) = image.components.first() else {
        return mismatch("SamplesPerPixel", geometry.samples_per_pixel.to_string(), "0".into());
    };
    let signed = geometry.pixel_representation.is_signed();
    if first.signed != signed {
        return mismatch(
            "PixelRepresentation",
            u16::from(signed).to_string(),
            u16::from(first.signed).to_string(),
        );
    }

    let bytes_per_sample = geometry.bytes_per_sample();
    let color = geometry.samples_per_pixel > 1;
    if (bytes_per_sample == 1 && first.precision > 8)
        || (bytes_per_sample == 2 && color && first.precision <= 8)
        || first.precision > 16
    {
        return mismatch(
            "sample precision",
            format!("{} byte(s) per sample", bytes_per_sample),
            format!("{} bit(s)", first.precision),
        );
    }

    for other in &image.components[1..] {
        if other.precision != first.precision
            || other.signed != first.signed
            || other.width != first.width
            || other.height != first.height
        {
            return mismatch(
                "component layout",
                format!(
                    "{}x{}, {} bit(s), signed: {}",
                    first.width, first.height, first.precision, first.signed
                ),
                format!(
                    "{}x{}, {} bit(s), signed: {}",
                    other.width, other.height, other.precision, other.signed
                ),
            );
        }
    }

    Ok(())
}
