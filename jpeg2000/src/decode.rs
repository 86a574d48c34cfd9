//! Decoding of whole JPEG 2000 encapsulated images.
//!
//! [`Jpeg2000Decoder`] drives the decoding of every frame in sequence,
//! keeps track of the state of each frame,
//! and collects the attribute changes which the decoded object needs
//! in order to describe its new native pixel data.

use dicom_core::ops::{ApplyOp, AttributeAction, AttributeOp, AttributeSelectorStep};
use dicom_core::value::{InMemFragment, PixelFragmentSequence};
use dicom_core::{DataDictionary, DataElement, DicomValue, Length, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_encoding::{Codec, TransferSyntaxIndex};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{OptionExt, ResultExt};
use std::borrow::Cow;
use std::convert::TryFrom;
use tracing::{debug, warn};

use crate::attribute::{AttributeSource, Geometry};
use crate::codec::BitstreamDecoder;
use crate::error::{
    DecodeError, FrameOutOfRangeSnafu, MissingAttributeSnafu, MissingPixelDataSnafu,
    NotEncapsulatedSnafu, PixelDataTooLongSnafu, ResourceExhaustionSnafu, Result,
};
use crate::fragment::{start_item_for_frame, FragmentSource};
use crate::frame::FrameDecoder;
use crate::unpack::{resolve_planar_configuration, PlanarConfiguration, PlanarConfigurationPolicy};

/// Whether decoding assigns a new SOP Instance UID to the object.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UidCreation {
    /// Keep the SOP Instance UID when decoding.
    #[default]
    Default,
    /// Always assign a new SOP Instance UID.
    Always,
    /// Never assign a new SOP Instance UID.
    Never,
}

/// Options for decoding JPEG 2000 pixel data.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct DecoderOptions {
    /// SOP Instance UID assignment on decoding
    pub uid_creation: UidCreation,
    /// how the planar configuration of color images is chosen
    pub planar_configuration: PlanarConfigurationPolicy,
    /// do not trust the basic offset table when mapping fragments to frames
    pub ignore_offset_table: bool,
    /// skip frames with a corrupted bitstream instead of failing,
    /// assuming a single fragment for frames which cannot be mapped
    pub force_single_fragment_per_frame: bool,
}

impl DecoderOptions {
    /// Create a new set of options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SOP Instance UID assignment mode.
    pub fn with_uid_creation(mut self, uid_creation: UidCreation) -> Self {
        self.uid_creation = uid_creation;
        self
    }

    /// Set the planar configuration policy for color images.
    pub fn with_planar_configuration(mut self, policy: PlanarConfigurationPolicy) -> Self {
        self.planar_configuration = policy;
        self
    }

    /// Set whether to ignore the basic offset table.
    pub fn with_ignore_offset_table(mut self, ignore_offset_table: bool) -> Self {
        self.ignore_offset_table = ignore_offset_table;
        self
    }

    /// Set whether frames with a corrupted bitstream are skipped
    /// instead of failing the whole decoding process.
    pub fn with_force_single_fragment_per_frame(mut self, force: bool) -> Self {
        self.force_single_fragment_per_frame = force;
        self
    }
}

/// The JPEG 2000 coding process of a transfer syntax.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Jpeg2000Process {
    /// JPEG 2000 Image Compression (Lossless Only)
    Lossless,
    /// JPEG 2000 Image Compression
    Lossy,
}

impl Jpeg2000Process {
    /// The UID of the transfer syntax for this process.
    pub fn transfer_syntax(self) -> &'static str {
        match self {
            Jpeg2000Process::Lossless => uids::JPEG2000_LOSSLESS,
            Jpeg2000Process::Lossy => uids::JPEG2000,
        }
    }
}

/// The state of a frame in the decoding process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// not decoded yet
    Pending,
    /// being decoded
    Decoding,
    /// decoded into the output buffer
    Committed,
    /// skipped over because of a corrupted bitstream,
    /// its region of the output is left blank
    Skipped,
    /// decoding failed, aborting the process
    Failed,
}

/// A summary of a successful decoding process.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    /// the final state of each frame
    pub frames: Vec<FrameStatus>,
    /// whether all decoded frames were lossless
    pub lossless: bool,
    /// the planar configuration of the decoded color image
    pub planar_configuration: Option<PlanarConfiguration>,
    /// the attribute changes applied to the object
    pub changes: Vec<AttributeOp>,
}

impl DecodeOutcome {
    /// The number of frames which had to be skipped.
    pub fn skipped_frames(&self) -> usize {
        self.frames
            .iter()
            .filter(|status| **status == FrameStatus::Skipped)
            .count()
    }
}

/// The native pixel data of all frames,
/// before being placed into a DICOM object.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPixelData {
    /// the samples of all frames, in little endian
    pub data: Vec<u8>,
    /// the geometry of the image
    pub geometry: Geometry,
    /// the final state of each frame
    pub frames: Vec<FrameStatus>,
    /// whether all decoded frames were lossless
    pub lossless: bool,
    /// the planar configuration of the decoded color image
    pub planar_configuration: Option<PlanarConfiguration>,
}

/// The nesting level of the object being decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Level {
    /// the main data set
    Root,
    /// an item of a sequence
    Item,
}

/// A decoder of JPEG 2000 encapsulated pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct Jpeg2000Decoder<B> {
    process: Jpeg2000Process,
    options: DecoderOptions,
    bitstream: B,
}

impl<B> Jpeg2000Decoder<B>
where
    B: BitstreamDecoder,
{
    /// Create a decoder for the given coding process,
    /// backed by the given bitstream decoder.
    pub fn new(process: Jpeg2000Process, options: DecoderOptions, bitstream: B) -> Self {
        Jpeg2000Decoder {
            process,
            options,
            bitstream,
        }
    }

    /// The coding process of this decoder.
    pub fn process(&self) -> Jpeg2000Process {
        self.process
    }

    /// The options of this decoder.
    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// The UID of the transfer syntax which this decoder supports.
    pub fn supported_transfer_syntax(&self) -> &'static str {
        self.process.transfer_syntax()
    }

    /// Whether this decoder can convert pixel data
    /// from transfer syntax `from` into transfer syntax `to`.
    ///
    /// Only decoding is supported,
    /// so the target must be a known transfer syntax
    /// with native (non-encapsulated) pixel data.
    pub fn can_change_coding(&self, from: &str, to: &str) -> bool {
        if trim_uid(from) != self.supported_transfer_syntax() {
            return false;
        }
        TransferSyntaxRegistry
            .get(trim_uid(to))
            .map(|ts| matches!(ts.codec(), Codec::None | Codec::Dataset(..)))
            .unwrap_or(false)
    }

    /// The photometric interpretation of the decompressed image.
    pub fn decompressed_color_model<S>(&self, src: &S) -> Result<String>
    where
        S: AttributeSource + ?Sized,
    {
        src.string(tags::PHOTOMETRIC_INTERPRETATION)
            .filter(|value| !value.is_empty())
            .context(MissingAttributeSnafu {
                name: "PhotometricInterpretation",
            })
    }

    /// A description of the underlying bitstream decoder.
    pub fn library_version(&self) -> Cow<'static, str> {
        self.bitstream.description()
    }

    /// Decode the pixel data of a main data set,
    /// replacing it with native pixel data.
    ///
    /// Besides the image pixel attributes,
    /// the SOP common attributes may be updated as well:
    /// _Lossy Image Compression_ is set if any frame was not lossless,
    /// and a new _SOP Instance UID_ is assigned if so requested.
    /// The transfer syntax of the file meta group,
    /// if any, is left for the caller to update.
    ///
    /// On failure, the object is left as it was.
    pub fn decode<D>(&self, obj: &mut InMemDicomObject<D>) -> Result<DecodeOutcome>
    where
        D: DataDictionary + Clone,
    {
        self.decode_at(obj, Level::Root)
    }

    /// Decode the pixel data of a data set nested in a sequence item,
    /// replacing it with native pixel data.
    ///
    /// Unlike [`decode`](Self::decode),
    /// only the image pixel attributes are updated.
    pub fn decode_item<D>(&self, item: &mut InMemDicomObject<D>) -> Result<DecodeOutcome>
    where
        D: DataDictionary + Clone,
    {
        self.decode_at(item, Level::Item)
    }

    fn decode_at<D>(&self, obj: &mut InMemDicomObject<D>, level: Level) -> Result<DecodeOutcome>
    where
        D: DataDictionary + Clone,
    {
        let pixel_data = obj
            .take_element(tags::PIXEL_DATA)
            .ok()
            .context(MissingPixelDataSnafu)?;

        let mut updated = obj.clone();
        match self.decode_into_object(&pixel_data, &mut updated, level) {
            Ok(outcome) => {
                *obj = updated;
                Ok(outcome)
            }
            Err(e) => {
                obj.put(pixel_data);
                Err(e)
            }
        }
    }

    fn decode_into_object<D>(
        &self,
        pixel_data: &DataElement<InMemDicomObject<D>, InMemFragment>,
        obj: &mut InMemDicomObject<D>,
        level: Level,
    ) -> Result<DecodeOutcome>
    where
        D: DataDictionary + Clone,
    {
        let fragments = pixel_sequence(pixel_data)?;
        let decoded = self.decode_pixel_data(&*obj, fragments)?;
        let changes = self.attribute_changes(&decoded, level);

        for op in changes.iter().cloned() {
            let tag = match *op.selector.first_step() {
                AttributeSelectorStep::Tag(tag) => tag,
                AttributeSelectorStep::Nested { tag, .. } => tag,
            };
            obj.apply(op).map_err(|e| DecodeError::ApplyAttribute {
                tag,
                message: e.to_string(),
            })?;
        }
        obj.put(native_pixel_data(&decoded)?);

        Ok(DecodeOutcome {
            frames: decoded.frames,
            lossless: decoded.lossless,
            planar_configuration: decoded.planar_configuration,
            changes,
        })
    }

    /// Decode every frame of an image into native pixel data,
    /// without modifying the data set.
    ///
    /// The geometry is read from `src`.
    pub fn decode_pixel_data<S, F>(&self, src: &S, fragments: &F) -> Result<DecodedPixelData>
    where
        S: AttributeSource + ?Sized,
        F: FragmentSource + ?Sized,
    {
        let geometry = Geometry::from_attributes(src, fragments.item_count())?;
        let frame_count = geometry.number_of_frames;
        let frame_size = geometry.frame_size();
        let mut data = allocate(geometry.total_size())?;

        let frame_decoder = self.frame_decoder(fragments, &geometry);
        let mut frames = vec![FrameStatus::Pending; frame_count as usize];
        let mut lossless = true;
        let mut planar_configuration = None;
        let mut start_item = 1;

        for ((frame, status), region) in (0..frame_count)
            .zip(frames.iter_mut())
            .zip(data.chunks_exact_mut(frame_size))
        {
            *status = FrameStatus::Decoding;

            let planar = if geometry.samples_per_pixel > 1 {
                let planar = resolve_planar_configuration(self.options.planar_configuration, src);
                planar_configuration = Some(planar);
                planar
            } else {
                PlanarConfiguration::ByPixel
            };

            match frame_decoder.decode_into(frame, start_item, planar, region) {
                Ok(decoded) => {
                    lossless &= decoded.lossless;
                    start_item = decoded.next_item;
                    *status = FrameStatus::Committed;
                }
                Err(e)
                    if e.is_corrupted_bitstream()
                        && self.options.force_single_fragment_per_frame =>
                {
                    warn!("{}, ignoring (but image is likely to be incomplete)", e);
                    region.fill(0);
                    start_item += 1;
                    *status = FrameStatus::Skipped;
                }
                Err(e) => {
                    *status = FrameStatus::Failed;
                    debug!("Decoding aborted at frame #{}", frame);
                    return Err(e);
                }
            }
        }

        Ok(DecodedPixelData {
            data,
            geometry,
            frames,
            lossless,
            planar_configuration,
        })
    }

    /// Decode a single frame of a data set, without modifying it.
    ///
    /// The frame's first fragment is located by mapping all frames before it.
    /// Returns the frame's samples in little endian.
    pub fn decode_frame<D>(&self, obj: &InMemDicomObject<D>, frame: u32) -> Result<Vec<u8>>
    where
        D: DataDictionary + Clone,
    {
        let pixel_data = obj
            .element(tags::PIXEL_DATA)
            .ok()
            .context(MissingPixelDataSnafu)?;
        let fragments = pixel_sequence(pixel_data)?;
        let geometry = Geometry::from_attributes(obj, fragments.item_count())?;
        if frame >= geometry.number_of_frames {
            return FrameOutOfRangeSnafu {
                frame,
                frames: geometry.number_of_frames,
            }
            .fail();
        }

        let is_start_of_image = |fragment: &[u8]| self.bitstream.is_start_of_image(fragment);
        let start_item = start_item_for_frame(
            geometry.number_of_frames,
            frame,
            self.options.ignore_offset_table,
            fragments,
            &is_start_of_image,
        )?;

        let planar = if geometry.samples_per_pixel > 1 {
            resolve_planar_configuration(self.options.planar_configuration, obj)
        } else {
            PlanarConfiguration::ByPixel
        };

        let mut data = allocate(geometry.frame_size())?;
        self.frame_decoder(fragments, &geometry)
            .decode_into(frame, start_item, planar, &mut data)?;
        Ok(data)
    }

    fn frame_decoder<'a, F>(
        &'a self,
        fragments: &'a F,
        geometry: &'a Geometry,
    ) -> FrameDecoder<'a, B, F>
    where
        F: FragmentSource + ?Sized,
    {
        FrameDecoder {
            bitstream: &self.bitstream,
            fragments,
            geometry,
            ignore_offset_table: self.options.ignore_offset_table,
            force_single_fragment_per_frame: self.options.force_single_fragment_per_frame,
        }
    }

    /// The attribute changes describing the decoded pixel data.
    fn attribute_changes(&self, decoded: &DecodedPixelData, level: Level) -> Vec<AttributeOp> {
        let mut changes = Vec::new();
        let geometry = &decoded.geometry;

        if let Some(planar_configuration) = decoded.planar_configuration {
            changes.push(AttributeOp::new(
                tags::PLANAR_CONFIGURATION,
                AttributeAction::Set(PrimitiveValue::from(planar_configuration.value())),
            ));
        }

        if geometry.frame_count_needs_update() {
            if let Some(declared) = geometry.declared_frames {
                warn!(
                    "Number of Frames corrected from {} to {}",
                    declared, geometry.number_of_frames
                );
            }
            changes.push(AttributeOp::new(
                tags::NUMBER_OF_FRAMES,
                AttributeAction::SetStr(geometry.number_of_frames.to_string().into()),
            ));
        }

        // SOP common changes only apply to the main data set
        if level == Level::Root {
            if self.options.uid_creation == UidCreation::Always {
                changes.push(AttributeOp::new(
                    tags::SOP_INSTANCE_UID,
                    AttributeAction::SetStr(new_instance_uid().into()),
                ));
            }
            if self.process == Jpeg2000Process::Lossy && !decoded.lossless {
                changes.push(AttributeOp::new(
                    tags::LOSSY_IMAGE_COMPRESSION,
                    AttributeAction::SetStr("01".into()),
                ));
            }
        }

        changes
    }
}

/// Create a new unique identifier in the `2.25` arc,
/// derived from a random UUID.
pub fn new_instance_uid() -> String {
    format!("2.25.{}", uuid::Uuid::new_v4().as_u128())
}

fn pixel_sequence<D>(
    pixel_data: &DataElement<InMemDicomObject<D>, InMemFragment>,
) -> Result<&PixelFragmentSequence<InMemFragment>> {
    match pixel_data.value() {
        DicomValue::PixelSequence(seq) => Ok(seq),
        _ => NotEncapsulatedSnafu.fail(),
    }
}

fn native_pixel_data<D>(
    decoded: &DecodedPixelData,
) -> Result<DataElement<InMemDicomObject<D>, InMemFragment>> {
    let len = element_length(decoded.data.len())?;
    if decoded.geometry.bytes_per_sample() == 1 {
        Ok(DataElement::new_with_len(
            tags::PIXEL_DATA,
            VR::OW,
            len,
            PrimitiveValue::from(decoded.data.clone()),
        ))
    } else {
        let pixels: Vec<u16> = decoded
            .data
            .chunks_exact(2)
            .map(|sample| u16::from_le_bytes([sample[0], sample[1]]))
            .collect();
        Ok(DataElement::new_with_len(
            tags::PIXEL_DATA,
            VR::OW,
            len,
            PrimitiveValue::U16(pixels.into()),
        ))
    }
}

/// The defined length of a data element holding `bytes` bytes.
/// `0xFFFF_FFFF` is reserved for undefined lengths.
fn element_length(bytes: usize) -> Result<Length> {
    match u32::try_from(bytes) {
        Ok(len) if len != u32::MAX => Ok(Length::defined(len)),
        _ => PixelDataTooLongSnafu { bytes }.fail(),
    }
}

fn allocate(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .context(ResourceExhaustionSnafu { bytes: size })?;
    data.resize(size, 0);
    Ok(data)
}

#[inline]
fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(|c| c == '\0' || c == ' ')
}
