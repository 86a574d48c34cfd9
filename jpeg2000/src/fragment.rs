//! Mapping of encapsulated pixel data fragments to frames.
//!
//! Encapsulated pixel data has no mandatory marker
//! of where one frame ends and the next one begins.
//! The basic offset table is optional,
//! and frequently wrong in the wild.
//! The number of fragments of each frame is therefore determined
//! by a fixed sequence of [mapping strategies](MappingStrategy),
//! the first one to reach a verdict being the one to apply.
//!
//! Fragments are addressed by item index,
//! where item 0 is the basic offset table
//! and items `1..item_count` are the actual pixel data fragments.

use dicom_core::value::PixelFragmentSequence;
use std::borrow::Cow;
use tracing::debug;

use crate::error::{Result, UnresolvableFragmentMappingSnafu};

/// The number of bytes of an item header (tag and length)
/// preceding each fragment in the encoded pixel data.
pub const ITEM_HEADER_LENGTH: u64 = 8;

/// Read access to the items of an encapsulated pixel data sequence.
pub trait FragmentSource {
    /// The number of items in the sequence,
    /// including the basic offset table.
    fn item_count(&self) -> u32;

    /// Fetch the bytes of an item.
    /// Item 0 is the basic offset table,
    /// as a sequence of 32-bit unsigned integers in little endian.
    fn item(&self, index: u32) -> Option<Cow<'_, [u8]>>;

    /// The length of an item in bytes.
    fn item_len(&self, index: u32) -> Option<u32> {
        self.item(index).map(|item| item.len() as u32)
    }
}

impl<P> FragmentSource for PixelFragmentSequence<P>
where
    P: AsRef<[u8]>,
{
    fn item_count(&self) -> u32 {
        self.fragments().len() as u32 + 1
    }

    fn item(&self, index: u32) -> Option<Cow<'_, [u8]>> {
        if index == 0 {
            let table = self
                .offset_table()
                .iter()
                .flat_map(|offset| offset.to_le_bytes())
                .collect();
            Some(Cow::Owned(table))
        } else {
            self.fragments()
                .get(index as usize - 1)
                .map(|fragment| Cow::Borrowed(fragment.as_ref()))
        }
    }

    fn item_len(&self, index: u32) -> Option<u32> {
        if index == 0 {
            Some(self.offset_table().len() as u32 * 4)
        } else {
            self.fragments()
                .get(index as usize - 1)
                .map(|fragment| fragment.as_ref().len() as u32)
        }
    }
}

impl<T> FragmentSource for &T
where
    T: FragmentSource + ?Sized,
{
    fn item_count(&self) -> u32 {
        (**self).item_count()
    }

    fn item(&self, index: u32) -> Option<Cow<'_, [u8]>> {
        (**self).item(index)
    }

    fn item_len(&self, index: u32) -> Option<u32> {
        (**self).item_len(index)
    }
}

/// The frame for which the fragments are to be determined.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameQuery {
    /// the total number of frames of the image
    pub frame_count: u32,
    /// the index of the frame, starting at 0
    pub frame_index: u32,
    /// the item index of the frame's first fragment
    pub start_item: u32,
    /// whether the basic offset table should not be trusted
    pub ignore_offset_table: bool,
}

/// The verdict of a mapping strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// the frame spans this many fragments
    Resolved(u32),
    /// no verdict, the next strategy should be tried
    TryNext,
}

/// A way of determining the number of fragments of a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MappingStrategy {
    /// Single-frame images and the last frame of an image
    /// take all remaining fragments.
    RemainingFragments,
    /// One fragment per frame when there are exactly as many fragments as frames.
    OneFragmentPerFrame,
    /// Look up the offset of the next frame in the basic offset table.
    OffsetTable,
    /// Look for the next fragment which starts a new image.
    StartOfImageScan,
}

impl MappingStrategy {
    /// All strategies, in order of precedence.
    pub const ORDER: [MappingStrategy; 4] = [
        MappingStrategy::RemainingFragments,
        MappingStrategy::OneFragmentPerFrame,
        MappingStrategy::OffsetTable,
        MappingStrategy::StartOfImageScan,
    ];

    /// Apply this strategy alone.
    ///
    /// `is_start_of_image` tells whether a fragment starts a new image
    /// in the compressed format in use.
    pub fn apply<F>(
        self,
        query: &FrameQuery,
        fragments: &F,
        is_start_of_image: &dyn Fn(&[u8]) -> bool,
    ) -> Resolution
    where
        F: FragmentSource + ?Sized,
    {
        match self {
            MappingStrategy::RemainingFragments => remaining_fragments(query, fragments),
            MappingStrategy::OneFragmentPerFrame => one_fragment_per_frame(query, fragments),
            MappingStrategy::OffsetTable => offset_table(query, fragments),
            MappingStrategy::StartOfImageScan => {
                start_of_image_scan(query, fragments, is_start_of_image)
            }
        }
    }
}

/// The number of fragments of a frame,
/// along with the strategy which determined it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FragmentRun {
    pub count: u32,
    pub strategy: MappingStrategy,
}

/// Determine how many contiguous fragments,
/// starting at `query.start_item`, belong to the queried frame.
///
/// Fails with [`UnresolvableFragmentMapping`](crate::DecodeError::UnresolvableFragmentMapping)
/// if no strategy reaches a verdict.
/// Note that the count of a resolved run may still be zero
/// if the start item is past the last fragment.
pub fn fragments_for_frame<F>(
    query: &FrameQuery,
    fragments: &F,
    is_start_of_image: &dyn Fn(&[u8]) -> bool,
) -> Result<FragmentRun>
where
    F: FragmentSource + ?Sized,
{
    MappingStrategy::ORDER
        .iter()
        .find_map(
            |&strategy| match strategy.apply(query, fragments, is_start_of_image) {
                Resolution::Resolved(count) => Some(FragmentRun { count, strategy }),
                Resolution::TryNext => None,
            },
        )
        .map(|run| {
            debug!(
                "Frame #{} spans {} fragment(s) from item #{} ({:?})",
                query.frame_index, run.count, query.start_item, run.strategy
            );
            run
        })
        .ok_or_else(|| {
            UnresolvableFragmentMappingSnafu {
                frame: query.frame_index,
                start_item: query.start_item,
            }
            .build()
        })
}

/// Determine the item index of the first fragment of a frame,
/// by mapping every frame before it.
pub fn start_item_for_frame<F>(
    frame_count: u32,
    frame_index: u32,
    ignore_offset_table: bool,
    fragments: &F,
    is_start_of_image: &dyn Fn(&[u8]) -> bool,
) -> Result<u32>
where
    F: FragmentSource + ?Sized,
{
    let mut start_item = 1;
    for frame in 0..frame_index {
        let query = FrameQuery {
            frame_count,
            frame_index: frame,
            start_item,
            ignore_offset_table,
        };
        let run = fragments_for_frame(&query, fragments, is_start_of_image)?;
        if run.count == 0 {
            return UnresolvableFragmentMappingSnafu { frame, start_item }.fail();
        }
        start_item += run.count;
    }
    Ok(start_item)
}

fn remaining_fragments<F>(query: &FrameQuery, fragments: &F) -> Resolution
where
    F: FragmentSource + ?Sized,
{
    if query.frame_count <= 1 || query.frame_index + 1 == query.frame_count {
        Resolution::Resolved(fragments.item_count().saturating_sub(query.start_item))
    } else {
        Resolution::TryNext
    }
}

fn one_fragment_per_frame<F>(query: &FrameQuery, fragments: &F) -> Resolution
where
    F: FragmentSource + ?Sized,
{
    if u64::from(query.frame_count) + 1 == u64::from(fragments.item_count()) {
        Resolution::Resolved(1)
    } else {
        Resolution::TryNext
    }
}

fn offset_table<F>(query: &FrameQuery, fragments: &F) -> Resolution
where
    F: FragmentSource + ?Sized,
{
    if query.ignore_offset_table {
        return Resolution::TryNext;
    }
    let Some(table) = fragments.item(0) else {
        return Resolution::TryNext;
    };
    if table.len() as u64 != u64::from(query.frame_count) * 4 {
        return Resolution::TryNext;
    }

    // offset of the NEXT frame,
    // which exists because the last frame is handled before
    let entry = (query.frame_index as usize + 1) * 4;
    let Some(bytes) = table.get(entry..entry + 4) else {
        return Resolution::TryNext;
    };
    let offset = u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));

    let item_count = fragments.item_count();
    let mut byte_count = 0_u64;
    let mut index = 1;
    while byte_count < offset && index < item_count {
        let Some(len) = fragments.item_len(index) else {
            break;
        };
        index += 1;
        byte_count += u64::from(len) + ITEM_HEADER_LENGTH;
        if byte_count == offset && index > query.start_item {
            return Resolution::Resolved(index - query.start_item);
        }
    }
    Resolution::TryNext
}

fn start_of_image_scan<F>(
    query: &FrameQuery,
    fragments: &F,
    is_start_of_image: &dyn Fn(&[u8]) -> bool,
) -> Resolution
where
    F: FragmentSource + ?Sized,
{
    let item_count = fragments.item_count();
    let mut next = query.start_item;
    loop {
        next += 1;
        if next >= item_count {
            break;
        }
        match fragments.item(next) {
            Some(fragment) if fragment.len() > 3 => {
                if is_start_of_image(&fragment) {
                    return Resolution::Resolved(next - query.start_item);
                }
            }
            _ => break,
        }
    }
    Resolution::TryNext
}
