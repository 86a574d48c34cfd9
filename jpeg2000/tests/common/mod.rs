//! Utility module for testing the decoder without sample files.
//!
//! [`StubDecoder`] stands in for a real JPEG 2000 decoder.
//! It understands a trivial stream format sharing the JPEG 2000 start
//! and end markers, so that fragment mapping and padding trimming
//! behave as they would with real codestreams:
//!
//! ```text
//! FF 4F FF 51
//! width (u16 BE) height (u16 BE) components (u8) precision (u8) flags (u8)
//! samples, plane by plane (1 byte each, or 2 bytes BE if precision > 8)
//! FF D9
//! ```
//!
//! Flag bit 0 marks signed samples, bit 1 marks a reversible transform.
#![allow(dead_code)]

use dicom_core::value::{InMemFragment, PixelFragmentSequence};
use dicom_core::header::Header;
use dicom_core::{DataElement, DicomValue, Length, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_jpeg2000::{BitstreamDecoder, BitstreamError, DecodedComponent, DecodedImage};
use dicom_object::InMemDicomObject;
use snafu::whatever;
use std::borrow::Cow;

pub const SIGNED: u8 = 0x01;
pub const REVERSIBLE: u8 = 0x02;

/// A decoder of stub codestreams.
#[derive(Debug, Default, Copy, Clone)]
pub struct StubDecoder;

impl BitstreamDecoder for StubDecoder {
    fn decode(&self, codestream: &[u8]) -> Result<DecodedImage, BitstreamError> {
        let Some(body) = codestream
            .strip_prefix(&[0xFF, 0x4F, 0xFF, 0x51][..])
            .and_then(|rest| rest.strip_suffix(&[0xFF, 0xD9][..]))
        else {
            whatever!("missing start or end of codestream");
        };
        if body.len() < 7 {
            whatever!("truncated header");
        }
        let width = u16::from_be_bytes([body[0], body[1]]) as u32;
        let height = u16::from_be_bytes([body[2], body[3]]) as u32;
        let components = body[4] as usize;
        let precision = body[5] as u32;
        let signed = body[6] & SIGNED != 0;
        let reversible = body[6] & REVERSIBLE != 0;

        let sample_len = if precision > 8 { 2 } else { 1 };
        let plane_len = (width * height) as usize * sample_len;
        let samples = &body[7..];
        if samples.len() != plane_len * components {
            whatever!(
                "expected {} bytes of samples, got {}",
                plane_len * components,
                samples.len()
            );
        }

        let components = samples
            .chunks_exact(plane_len)
            .map(|plane| DecodedComponent {
                width,
                height,
                factor: 0,
                precision,
                signed,
                data: plane
                    .chunks_exact(sample_len)
                    .map(|s| match (s, signed) {
                        ([v], false) => i32::from(*v),
                        ([v], true) => i32::from(*v as i8),
                        ([hi, lo], false) => i32::from(u16::from_be_bytes([*hi, *lo])),
                        ([hi, lo], true) => i32::from(i16::from_be_bytes([*hi, *lo])),
                        _ => unreachable!(),
                    })
                    .collect(),
            })
            .collect();

        Ok(DecodedImage {
            width,
            height,
            components,
            reversible,
        })
    }

    fn description(&self) -> Cow<'static, str> {
        Cow::Borrowed("stub")
    }
}

/// Build a stub codestream.
///
/// `planes` holds the samples of each component.
pub fn codestream(width: u16, height: u16, precision: u8, flags: u8, planes: &[&[i32]]) -> Vec<u8> {
    let mut data = vec![0xFF, 0x4F, 0xFF, 0x51];
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.push(planes.len() as u8);
    data.push(precision);
    data.push(flags);
    for plane in planes {
        for &v in *plane {
            if precision > 8 {
                data.extend_from_slice(&(v as i16).to_be_bytes());
            } else {
                data.push(v as u8);
            }
        }
    }
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// A test image, turned into a DICOM object with encapsulated pixel data.
#[derive(Debug, Clone)]
pub struct TestImage {
    pub sop_class_uid: &'static str,
    pub photometric_interpretation: &'static str,
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub pixel_representation: u16,
    pub number_of_frames: Option<&'static str>,
    pub planar_configuration: Option<u16>,
    pub offset_table: Vec<u32>,
    pub fragments: Vec<InMemFragment>,
}

impl TestImage {
    /// An 8-bit monochrome image with one fragment per frame.
    pub fn monochrome(rows: u16, columns: u16, fragments: Vec<InMemFragment>) -> Self {
        TestImage {
            sop_class_uid: uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
            photometric_interpretation: "MONOCHROME2",
            rows,
            columns,
            samples_per_pixel: 1,
            bits_allocated: 8,
            bits_stored: 8,
            pixel_representation: 0,
            number_of_frames: None,
            planar_configuration: None,
            offset_table: Vec::new(),
            fragments,
        }
    }

    pub fn into_object(self) -> InMemDicomObject {
        let mut obj = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(self.sop_class_uid),
            ),
            DataElement::new(
                tags::SOP_INSTANCE_UID,
                VR::UI,
                PrimitiveValue::from("2.25.1234"),
            ),
            DataElement::new(
                tags::SAMPLES_PER_PIXEL,
                VR::US,
                PrimitiveValue::from(self.samples_per_pixel),
            ),
            DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from(self.photometric_interpretation),
            ),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(self.rows)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(self.columns)),
            DataElement::new(
                tags::BITS_ALLOCATED,
                VR::US,
                PrimitiveValue::from(self.bits_allocated),
            ),
            DataElement::new(
                tags::BITS_STORED,
                VR::US,
                PrimitiveValue::from(self.bits_stored),
            ),
            DataElement::new(
                tags::HIGH_BIT,
                VR::US,
                PrimitiveValue::from(self.bits_stored - 1),
            ),
            DataElement::new(
                tags::PIXEL_REPRESENTATION,
                VR::US,
                PrimitiveValue::from(self.pixel_representation),
            ),
        ]);
        if let Some(frames) = self.number_of_frames {
            obj.put(DataElement::new(
                tags::NUMBER_OF_FRAMES,
                VR::IS,
                PrimitiveValue::from(frames),
            ));
        }
        if let Some(planar_configuration) = self.planar_configuration {
            obj.put(DataElement::new(
                tags::PLANAR_CONFIGURATION,
                VR::US,
                PrimitiveValue::from(planar_configuration),
            ));
        }
        obj.put(DataElement::new_with_len(
            tags::PIXEL_DATA,
            VR::OB,
            Length::UNDEFINED,
            DicomValue::PixelSequence(PixelFragmentSequence::new(
                self.offset_table,
                self.fragments,
            )),
        ));
        obj
    }
}

/// Fetch a string attribute without padding.
pub fn string(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(|c| c == ' ' || c == '\0').to_string())
}

/// Fetch the native pixel data as bytes.
pub fn pixel_bytes(obj: &InMemDicomObject) -> Vec<u8> {
    obj.element(tags::PIXEL_DATA)
        .expect("pixel data should be present")
        .to_bytes()
        .expect("pixel data should be native")
        .into_owned()
}

/// The header and value of every element in an object, in tag order.
///
/// Objects with encapsulated pixel data do not compare equal to their
/// own clones, since undefined lengths never match, so tests compare
/// elements through this instead.
pub fn elements(
    obj: &InMemDicomObject,
) -> Vec<(Tag, VR, DicomValue<InMemDicomObject, InMemFragment>)> {
    obj.iter()
        .map(|e| (e.tag(), e.vr(), e.value().clone()))
        .collect()
}
