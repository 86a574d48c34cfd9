//! Utility module for fetching the image attributes of a DICOM object.
//!
//! [`AttributeSource`] is the narrow read interface
//! which the decoder needs from a data set,
//! and [`Geometry`] is the validated shape and encoding of the image
//! which every other part of the decoder works with.

use dicom_core::{DataDictionary, Tag};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use snafu::OptionExt;

use crate::error::{InvalidAttributeSnafu, MissingAttributeSnafu, Result};

/// Read access to the attributes of a DICOM data set.
///
/// Each method returns `None` if the attribute is not found
/// or if its value cannot be interpreted as the requested type.
pub trait AttributeSource {
    /// Retrieve an attribute as an unsigned 16-bit integer.
    fn uint16(&self, tag: Tag) -> Option<u16>;

    /// Retrieve an attribute as a signed 32-bit integer.
    fn sint32(&self, tag: Tag) -> Option<i32>;

    /// Retrieve an attribute as a string,
    /// without leading or trailing padding.
    fn string(&self, tag: Tag) -> Option<String>;
}

impl<D> AttributeSource for InMemDicomObject<D>
where
    D: DataDictionary + Clone,
{
    fn uint16(&self, tag: Tag) -> Option<u16> {
        self.element(tag).ok()?.to_int::<u16>().ok()
    }

    fn sint32(&self, tag: Tag) -> Option<i32> {
        self.element(tag).ok()?.to_int::<i32>().ok()
    }

    fn string(&self, tag: Tag) -> Option<String> {
        let value = self.element(tag).ok()?.to_str().ok()?;
        Some(value.trim_matches(|c| c == ' ' || c == '\0').to_string())
    }
}

/// An interpreted representation of the DICOM _Pixel Representation_ attribute.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum PixelRepresentation {
    /// unsigned pixel data sample values
    Unsigned,
    /// signed pixel data sample values
    Signed,
}

impl PixelRepresentation {
    /// Whether sample values are signed.
    pub fn is_signed(self) -> bool {
        self == PixelRepresentation::Signed
    }
}

/// The shape and encoding of an image,
/// as declared by the attributes of its data set.
///
/// A geometry is only ever built through [`Geometry::from_attributes`],
/// which rejects images outside of what the decoder supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub rows: u16,
    pub columns: u16,
    /// either 1 or 3
    pub samples_per_pixel: u16,
    /// between 1 and 16
    pub bits_stored: u16,
    pub bits_allocated: u16,
    pub high_bit: u16,
    pub pixel_representation: PixelRepresentation,
    /// the number of frames effectively decoded
    pub number_of_frames: u32,
    /// the _Number of Frames_ as found in the data set, if any
    pub declared_frames: Option<i32>,
}

impl Geometry {
    /// Extract and validate the image geometry from a data set.
    ///
    /// `item_count` is the number of items in the pixel data sequence,
    /// including the basic offset table.
    /// The number of frames is limited to the number of fragments,
    /// and defaults to 1 when absent or not positive.
    pub fn from_attributes<S>(src: &S, item_count: u32) -> Result<Self>
    where
        S: AttributeSource + ?Sized,
    {
        let pixel_representation = match required_u16(
            src,
            tags::PIXEL_REPRESENTATION,
            "PixelRepresentation",
        )? {
            0 => PixelRepresentation::Unsigned,
            1 => PixelRepresentation::Signed,
            value => {
                return InvalidAttributeSnafu {
                    name: "PixelRepresentation",
                    value: value.to_string(),
                }
                .fail()
            }
        };

        let samples_per_pixel = required_u16(src, tags::SAMPLES_PER_PIXEL, "SamplesPerPixel")?;
        if samples_per_pixel != 1 && samples_per_pixel != 3 {
            return InvalidAttributeSnafu {
                name: "SamplesPerPixel",
                value: samples_per_pixel.to_string(),
            }
            .fail();
        }

        let rows = required_u16(src, tags::ROWS, "Rows")?;
        if rows == 0 {
            return InvalidAttributeSnafu {
                name: "Rows",
                value: "0",
            }
            .fail();
        }
        let columns = required_u16(src, tags::COLUMNS, "Columns")?;
        if columns == 0 {
            return InvalidAttributeSnafu {
                name: "Columns",
                value: "0",
            }
            .fail();
        }

        let declared_frames = src.sint32(tags::NUMBER_OF_FRAMES);
        let number_of_frames = effective_frame_count(declared_frames, item_count);

        let bits_stored = required_u16(src, tags::BITS_STORED, "BitsStored")?;
        let bits_allocated = required_u16(src, tags::BITS_ALLOCATED, "BitsAllocated")?;
        let high_bit = required_u16(src, tags::HIGH_BIT, "HighBit")?;

        if !(1..=16).contains(&bits_stored) {
            return InvalidAttributeSnafu {
                name: "BitsStored",
                value: bits_stored.to_string(),
            }
            .fail();
        }

        Ok(Geometry {
            rows,
            columns,
            samples_per_pixel,
            bits_stored,
            bits_allocated,
            high_bit,
            pixel_representation,
            number_of_frames,
            declared_frames,
        })
    }

    /// The number of bytes of each sample in the decoded pixel data:
    /// 2 if either _Bits Stored_ or _Bits Allocated_ exceed 8, 1 otherwise.
    pub fn bytes_per_sample(&self) -> usize {
        if self.bits_stored > 8 || self.bits_allocated > 8 {
            2
        } else {
            1
        }
    }

    /// The number of pixels in a single frame.
    pub fn pixels_per_frame(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// The size of a single decoded frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.pixels_per_frame() * self.samples_per_pixel as usize
    }

    /// The size of the whole decoded pixel data in bytes,
    /// rounded up to an even length.
    pub fn total_size(&self) -> usize {
        let size = self.frame_size() * self.number_of_frames as usize;
        size + (size & 1)
    }

    /// Whether the frame count attribute needs to be written back,
    /// either because it was absent or because it did not match
    /// the number of frames decoded.
    pub fn frame_count_needs_update(&self) -> bool {
        self.declared_frames != Some(self.number_of_frames as i32)
    }
}

/// Determine the number of frames to decode
/// from the declared _Number of Frames_,
/// bounded by the number of fragments in the pixel sequence.
fn effective_frame_count(declared: Option<i32>, item_count: u32) -> u32 {
    let mut frames = i64::from(declared.unwrap_or(0));
    if frames >= i64::from(item_count) {
        frames = i64::from(item_count) - 1;
    }
    if frames < 1 {
        frames = 1;
    }
    frames as u32
}

#[inline]
fn required_u16<S>(src: &S, tag: Tag, name: &'static str) -> Result<u16>
where
    S: AttributeSource + ?Sized,
{
    src.uint16(tag).context(MissingAttributeSnafu { name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use dicom_core::{DataElement, PrimitiveValue, VR};

    fn base_object() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(4_u16)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(5_u16)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(12_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(11_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::NUMBER_OF_FRAMES, VR::IS, PrimitiveValue::from("3")),
        ])
    }

    #[test]
    fn reads_geometry() {
        let obj = base_object();
        let geometry = Geometry::from_attributes(&obj, 4).unwrap();
        assert_eq!(geometry.rows, 4);
        assert_eq!(geometry.columns, 5);
        assert_eq!(geometry.samples_per_pixel, 1);
        assert_eq!(geometry.pixel_representation, PixelRepresentation::Signed);
        assert_eq!(geometry.number_of_frames, 3);
        assert_eq!(geometry.declared_frames, Some(3));
        assert_eq!(geometry.bytes_per_sample(), 2);
        assert_eq!(geometry.frame_size(), 40);
        assert_eq!(geometry.total_size(), 120);
        assert!(!geometry.frame_count_needs_update());
    }

    #[test]
    fn frame_count_is_bounded_by_fragments() {
        let obj = base_object();
        // only 2 fragments after the offset table
        let geometry = Geometry::from_attributes(&obj, 3).unwrap();
        assert_eq!(geometry.number_of_frames, 2);
        assert!(geometry.frame_count_needs_update());

        let mut obj = base_object();
        obj.remove_element(tags::NUMBER_OF_FRAMES);
        let geometry = Geometry::from_attributes(&obj, 5).unwrap();
        assert_eq!(geometry.number_of_frames, 1);
        assert_eq!(geometry.declared_frames, None);
        assert!(geometry.frame_count_needs_update());
    }

    #[test]
    fn odd_total_size_is_padded() {
        let mut obj = base_object();
        obj.put(DataElement::new(
            tags::BITS_ALLOCATED,
            VR::US,
            PrimitiveValue::from(8_u16),
        ));
        obj.put(DataElement::new(
            tags::BITS_STORED,
            VR::US,
            PrimitiveValue::from(8_u16),
        ));
        obj.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(3_u16)));
        obj.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(3_u16)));
        obj.remove_element(tags::NUMBER_OF_FRAMES);
        let geometry = Geometry::from_attributes(&obj, 2).unwrap();
        assert_eq!(geometry.bytes_per_sample(), 1);
        assert_eq!(geometry.frame_size(), 9);
        assert_eq!(geometry.total_size(), 10);
    }

    #[test]
    fn rejects_missing_and_unsupported_attributes() {
        let mut obj = base_object();
        obj.remove_element(tags::HIGH_BIT);
        assert!(matches!(
            Geometry::from_attributes(&obj, 4),
            Err(DecodeError::MissingAttribute { name: "HighBit" })
        ));

        let mut obj = base_object();
        obj.put(DataElement::new(
            tags::SAMPLES_PER_PIXEL,
            VR::US,
            PrimitiveValue::from(4_u16),
        ));
        assert!(matches!(
            Geometry::from_attributes(&obj, 4),
            Err(DecodeError::InvalidAttribute {
                name: "SamplesPerPixel",
                ..
            })
        ));

        let mut obj = base_object();
        obj.put(DataElement::new(
            tags::BITS_STORED,
            VR::US,
            PrimitiveValue::from(17_u16),
        ));
        assert!(matches!(
            Geometry::from_attributes(&obj, 4),
            Err(DecodeError::InvalidAttribute {
                name: "BitsStored",
                ..
            })
        ));

        let mut obj = base_object();
        obj.put(DataElement::new(
            tags::PIXEL_REPRESENTATION,
            VR::US,
            PrimitiveValue::from(2_u16),
        ));
        assert!(matches!(
            Geometry::from_attributes(&obj, 4),
            Err(DecodeError::InvalidAttribute {
                name: "PixelRepresentation",
                ..
            })
        ));
    }

    #[test]
    fn strings_are_trimmed() {
        let obj = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("YBR_FULL "),
        )]);
        assert_eq!(
            obj.string(tags::PHOTOMETRIC_INTERPRETATION).as_deref(),
            Some("YBR_FULL")
        );
        assert_eq!(obj.string(tags::SOP_CLASS_UID), None);
    }
}
