//! Unpacking of decoded sample planes into native pixel data.
//!
//! The output of each frame is written in little endian,
//! with one or two bytes per sample as the image geometry dictates.
//! Color images are written by pixel and then,
//! if so resolved, rearranged into one plane per component.

use dicom_dictionary_std::{tags, uids};
use snafu::ResultExt;
use tracing::debug;

use crate::attribute::{AttributeSource, Geometry};
use crate::codec::{DecodedComponent, DecodedImage};
use crate::error::{GeometryMismatchSnafu, ResourceExhaustionSnafu, Result};

/// An interpreted representation of the DICOM _Planar Configuration_ attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PlanarConfiguration {
    /// color-by-pixel: R1G1B1R2G2B2...
    ByPixel = 0,
    /// color-by-plane: R1R2...G1G2...B1B2...
    ByPlane = 1,
}

impl PlanarConfiguration {
    /// Interpret the value of a _Planar Configuration_ attribute.
    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0 => Some(PlanarConfiguration::ByPixel),
            1 => Some(PlanarConfiguration::ByPlane),
            _ => None,
        }
    }

    /// The attribute value of this planar configuration.
    pub fn value(self) -> u16 {
        self as u16
    }
}

/// How the planar configuration of decoded color images is chosen.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PlanarConfigurationPolicy {
    /// Keep the planar configuration declared in the data set,
    /// or determine it automatically if absent or invalid.
    #[default]
    Restore,
    /// Determine the planar configuration from the SOP class
    /// and photometric interpretation.
    Auto,
    /// Always write color-by-pixel.
    ColorByPixel,
    /// Always write color-by-plane.
    ColorByPlane,
}

/// Resolve the planar configuration of a decoded color image.
pub fn resolve_planar_configuration<S>(
    policy: PlanarConfigurationPolicy,
    src: &S,
) -> PlanarConfiguration
where
    S: AttributeSource + ?Sized,
{
    let planar_configuration = match policy {
        PlanarConfigurationPolicy::ColorByPixel => PlanarConfiguration::ByPixel,
        PlanarConfigurationPolicy::ColorByPlane => PlanarConfiguration::ByPlane,
        PlanarConfigurationPolicy::Restore => src
            .uint16(tags::PLANAR_CONFIGURATION)
            .and_then(PlanarConfiguration::from_value)
            .unwrap_or_else(|| auto_from(src)),
        PlanarConfigurationPolicy::Auto => auto_from(src),
    };
    debug!(
        "Planar configuration resolved to {} ({:?})",
        planar_configuration.value(),
        policy
    );
    planar_configuration
}

fn auto_from<S>(src: &S) -> PlanarConfiguration
where
    S: AttributeSource + ?Sized,
{
    let sop_class_uid = src.string(tags::SOP_CLASS_UID);
    let photometric_interpretation = src.string(tags::PHOTOMETRIC_INTERPRETATION);
    auto_planar_configuration(
        sop_class_uid.as_deref(),
        photometric_interpretation.as_deref(),
    )
}

/// Determine the planar configuration which an image is expected to have
/// based on its SOP class and photometric interpretation.
///
/// Hardcopy color images are by plane,
/// as are ultrasound images in `YBR_FULL`.
/// Everything else is by pixel.
#[allow(deprecated)]
pub fn auto_planar_configuration(
    sop_class_uid: Option<&str>,
    photometric_interpretation: Option<&str>,
) -> PlanarConfiguration {
    match (sop_class_uid, photometric_interpretation) {
        (Some(uids::HARDCOPY_COLOR_IMAGE_STORAGE), _) => PlanarConfiguration::ByPlane,
        (
            Some(uids::ULTRASOUND_MULTI_FRAME_IMAGE_STORAGE | uids::ULTRASOUND_IMAGE_STORAGE),
            Some("YBR_FULL"),
        ) => PlanarConfiguration::ByPlane,
        _ => PlanarConfiguration::ByPixel,
    }
}

/// The number of bytes used for each decoded sample of a color image.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleWidth {
    One = 1,
    Two = 2,
    Four = 4,
}

impl SampleWidth {
    /// The sample width needed for samples of the given precision.
    pub fn for_precision(precision: u32) -> Self {
        match precision {
            0..=8 => SampleWidth::One,
            9..=16 => SampleWidth::Two,
            _ => SampleWidth::Four,
        }
    }

    /// The sample width matching a number of bytes per sample.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(SampleWidth::One),
            2 => Some(SampleWidth::Two),
            4 => Some(SampleWidth::Four),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        self as usize
    }

    #[inline]
    fn write(self, value: i32, out: &mut [u8]) {
        match self {
            SampleWidth::One => out[0] = value as u8,
            SampleWidth::Two => out.copy_from_slice(&widen_sample(value)),
            SampleWidth::Four => out.copy_from_slice(&(value as u32).to_le_bytes()),
        }
    }
}

/// Widen a sample to 16 bits in little endian.
///
/// Negative values are sign extended,
/// non-negative values are zero extended.
#[inline]
pub fn widen_sample(value: i32) -> [u8; 2] {
    (value as u16).to_le_bytes()
}

/// Copy the decoded components of a frame
/// into that frame's region of the output buffer.
///
/// The image is expected to have been validated against the geometry,
/// with one component per sample.
/// Components decoded at a resolution other than the one declared
/// are rejected rather than resampled.
pub fn unpack(
    image: &DecodedImage,
    geometry: &Geometry,
    frame: u32,
    region: &mut [u8],
    planar_configuration: PlanarConfiguration,
) -> Result<()> {
    let samples_per_pixel = geometry.samples_per_pixel as usize;
    let frame_size = geometry.frame_size();
    if region.len() < frame_size {
        return GeometryMismatchSnafu {
            frame,
            property: "frame size",
            declared: frame_size.to_string(),
            decoded: region.len().to_string(),
        }
        .fail();
    }
    let region = &mut region[..frame_size];

    if image.components.len() != samples_per_pixel {
        return GeometryMismatchSnafu {
            frame,
            property: "SamplesPerPixel",
            declared: samples_per_pixel.to_string(),
            decoded: image.components.len().to_string(),
        }
        .fail();
    }

    let width = if samples_per_pixel == 1 {
        SampleWidth::from_bytes(geometry.bytes_per_sample())
    } else {
        let width = SampleWidth::for_precision(image.components[0].precision);
        Some(width).filter(|w| w.bytes() == geometry.bytes_per_sample())
    };
    let Some(width) = width else {
        return GeometryMismatchSnafu {
            frame,
            property: "bytes per sample",
            declared: geometry.bytes_per_sample().to_string(),
            decoded: SampleWidth::for_precision(image.components[0].precision)
                .bytes()
                .to_string(),
        }
        .fail();
    };

    for component in &image.components {
        check_resolution(component, geometry, frame)?;
    }

    let columns = u32::from(geometry.columns);
    let pixel_size = samples_per_pixel * width.bytes();
    for (i, pixel) in region.chunks_exact_mut(pixel_size).enumerate() {
        let row = i as u32 / columns;
        let col = i as u32 % columns;
        for (component, out) in image
            .components
            .iter()
            .zip(pixel.chunks_exact_mut(width.bytes()))
        {
            let value = component.sample(row, col).ok_or_else(|| {
                GeometryMismatchSnafu {
                    frame,
                    property: "component data length",
                    declared: (geometry.pixels_per_frame()).to_string(),
                    decoded: component.data.len().to_string(),
                }
                .build()
            })?;
            width.write(value, out);
        }
    }

    if samples_per_pixel > 1 && planar_configuration == PlanarConfiguration::ByPlane {
        to_color_by_plane(region, width.bytes())?;
    }
    Ok(())
}

fn check_resolution(component: &DecodedComponent, geometry: &Geometry, frame: u32) -> Result<()> {
    let (width, height) = (component.effective_width(), component.effective_height());
    if width != u32::from(geometry.columns) || height != u32::from(geometry.rows) {
        return GeometryMismatchSnafu {
            frame,
            property: "component resolution",
            declared: format!("{}x{}", geometry.columns, geometry.rows),
            decoded: format!("{}x{}", width, height),
        }
        .fail();
    }
    Ok(())
}

/// Rearrange a frame of 3-component pixel data
/// from color-by-pixel to color-by-plane, in place.
///
/// Trailing bytes which do not make up a whole pixel are left untouched.
pub fn to_color_by_plane(frame: &mut [u8], bytes_per_sample: usize) -> Result<()> {
    let pixel_size = 3 * bytes_per_sample;
    if pixel_size == 0 {
        return Ok(());
    }
    let len = frame.len() / pixel_size * pixel_size;
    let frame = &mut frame[..len];

    let mut planes = Vec::new();
    planes
        .try_reserve_exact(len)
        .context(ResourceExhaustionSnafu { bytes: len })?;
    for component in 0..3 {
        let sample = component * bytes_per_sample..(component + 1) * bytes_per_sample;
        for pixel in frame.chunks_exact(pixel_size) {
            planes.extend_from_slice(&pixel[sample.clone()]);
        }
    }
    frame.copy_from_slice(&planes);
    Ok(())
}

/// Rearrange a frame of 3-component pixel data
/// from color-by-plane to color-by-pixel, in place.
///
/// Trailing bytes which do not make up a whole pixel are left untouched.
pub fn to_color_by_pixel(frame: &mut [u8], bytes_per_sample: usize) -> Result<()> {
    let pixel_size = 3 * bytes_per_sample;
    if pixel_size == 0 {
        return Ok(());
    }
    let len = frame.len() / pixel_size * pixel_size;
    let frame = &mut frame[..len];
    let plane_size = len / 3;

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .context(ResourceExhaustionSnafu { bytes: len })?;
    {
        let (first, rest) = frame.split_at(plane_size);
        let (second, third) = rest.split_at(plane_size);
        for ((a, b), c) in first
            .chunks_exact(bytes_per_sample)
            .zip(second.chunks_exact(bytes_per_sample))
            .zip(third.chunks_exact(bytes_per_sample))
        {
            pixels.extend_from_slice(a);
            pixels.extend_from_slice(b);
            pixels.extend_from_slice(c);
        }
    }
    frame.copy_from_slice(&pixels);
    Ok(())
}
