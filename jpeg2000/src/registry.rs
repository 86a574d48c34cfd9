//! An explicit registry of pixel data decoders,
//! keyed by the transfer syntax they decode.
//!
//! The registry is an ordinary value owned by the caller.
//! Decoders are registered and deregistered through it,
//! and dropping it releases all of them.

use dicom_object::InMemDicomObject;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::codec::BitstreamDecoder;
use crate::decode::{DecodeOutcome, Jpeg2000Decoder};
use crate::error::{Result, UnsupportedTransferSyntaxSnafu};

/// A decoder of encapsulated pixel data
/// which can be kept in a [`DecoderRegistry`].
pub trait PixelDataDecoder {
    /// The UID of the transfer syntax which this decoder supports.
    fn transfer_syntax(&self) -> &'static str;

    /// Decode the pixel data of a main data set in place.
    fn decode(&self, obj: &mut InMemDicomObject) -> Result<DecodeOutcome>;

    /// Decode the pixel data of a data set nested in a sequence item in place.
    fn decode_item(&self, item: &mut InMemDicomObject) -> Result<DecodeOutcome>;

    /// Decode a single frame, without modifying the data set.
    fn decode_frame(&self, obj: &InMemDicomObject, frame: u32) -> Result<Vec<u8>>;

    /// Whether pixel data can be converted from `from` into `to`.
    fn can_change_coding(&self, from: &str, to: &str) -> bool;

    /// A description of the underlying implementation.
    fn library_version(&self) -> Cow<'static, str>;
}

impl<B> PixelDataDecoder for Jpeg2000Decoder<B>
where
    B: BitstreamDecoder,
{
    fn transfer_syntax(&self) -> &'static str {
        self.supported_transfer_syntax()
    }

    fn decode(&self, obj: &mut InMemDicomObject) -> Result<DecodeOutcome> {
        Jpeg2000Decoder::decode(self, obj)
    }

    fn decode_item(&self, item: &mut InMemDicomObject) -> Result<DecodeOutcome> {
        Jpeg2000Decoder::decode_item(self, item)
    }

    fn decode_frame(&self, obj: &InMemDicomObject, frame: u32) -> Result<Vec<u8>> {
        Jpeg2000Decoder::decode_frame(self, obj, frame)
    }

    fn can_change_coding(&self, from: &str, to: &str) -> bool {
        Jpeg2000Decoder::can_change_coding(self, from, to)
    }

    fn library_version(&self) -> Cow<'static, str> {
        Jpeg2000Decoder::library_version(self)
    }
}

/// A collection of pixel data decoders, at most one per transfer syntax.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: BTreeMap<&'static str, Box<dyn PixelDataDecoder + Send + Sync>>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl DecoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the JPEG 2000 decoders,
    /// lossless and lossy, backed by OpenJPEG
    /// and sharing the given options.
    #[cfg(any(feature = "openjp2", feature = "openjpeg-sys"))]
    pub fn with_jpeg2000(options: crate::DecoderOptions) -> Self {
        use crate::codec::openjpeg::OpenJpegDecoder;
        use crate::decode::Jpeg2000Process;

        let mut registry = Self::new();
        for process in [Jpeg2000Process::Lossless, Jpeg2000Process::Lossy] {
            registry.register(Jpeg2000Decoder::new(process, options, OpenJpegDecoder));
        }
        registry
    }

    /// Register a decoder for its transfer syntax,
    /// returning the decoder previously registered for it, if any.
    pub fn register<T>(&mut self, decoder: T) -> Option<Box<dyn PixelDataDecoder + Send + Sync>>
    where
        T: PixelDataDecoder + Send + Sync + 'static,
    {
        self.decoders
            .insert(decoder.transfer_syntax(), Box::new(decoder))
    }

    /// Remove the decoder of a transfer syntax.
    pub fn deregister(&mut self, ts_uid: &str) -> Option<Box<dyn PixelDataDecoder + Send + Sync>> {
        self.decoders.remove(trim_uid(ts_uid))
    }

    /// Fetch the decoder of a transfer syntax.
    pub fn get(&self, ts_uid: &str) -> Option<&(dyn PixelDataDecoder + Send + Sync)> {
        self.decoders.get(trim_uid(ts_uid)).map(|d| d.as_ref())
    }

    /// Remove all decoders.
    pub fn clear(&mut self) {
        self.decoders.clear();
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// The transfer syntaxes with a registered decoder.
    pub fn transfer_syntaxes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Decode the pixel data of a main data set
    /// with the decoder registered for its transfer syntax.
    pub fn decode(&self, ts_uid: &str, obj: &mut InMemDicomObject) -> Result<DecodeOutcome> {
        self.get(ts_uid)
            .ok_or_else(|| {
                UnsupportedTransferSyntaxSnafu {
                    uid: trim_uid(ts_uid),
                }
                .build()
            })?
            .decode(obj)
    }
}

#[inline]
fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(|c| c == '\0' || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BitstreamError, DecodedImage};
    use crate::decode::{DecoderOptions, Jpeg2000Process};
    use crate::error::DecodeError;
    use dicom_dictionary_std::uids;

    struct NoDecoder;

    impl BitstreamDecoder for NoDecoder {
        fn decode(&self, _: &[u8]) -> Result<DecodedImage, BitstreamError> {
            snafu::whatever!("no decoder")
        }

        fn description(&self) -> Cow<'static, str> {
            Cow::Borrowed("none")
        }
    }

    #[test]
    fn register_and_deregister() {
        let mut registry = DecoderRegistry::new();
        assert!(registry.is_empty());
        let options = DecoderOptions::default();

        assert!(registry
            .register(Jpeg2000Decoder::new(
                Jpeg2000Process::Lossless,
                options,
                NoDecoder
            ))
            .is_none());
        assert!(registry
            .register(Jpeg2000Decoder::new(Jpeg2000Process::Lossy, options, NoDecoder))
            .is_none());
        // replacing an existing decoder
        assert!(registry
            .register(Jpeg2000Decoder::new(Jpeg2000Process::Lossy, options, NoDecoder))
            .is_some());
        assert_eq!(registry.len(), 2);

        let decoder = registry.get("1.2.840.10008.1.2.4.90\0").unwrap();
        assert_eq!(decoder.transfer_syntax(), uids::JPEG2000_LOSSLESS);
        assert_eq!(decoder.library_version(), "none");

        assert!(registry.deregister(uids::JPEG2000).is_some());
        assert!(registry.get(uids::JPEG2000).is_none());
        assert!(registry.deregister(uids::JPEG2000).is_none());

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn unsupported_transfer_syntax() {
        let registry = DecoderRegistry::new();
        let mut obj = InMemDicomObject::new_empty();
        assert!(matches!(
            registry.decode(uids::JPEG2000, &mut obj),
            Err(DecodeError::UnsupportedTransferSyntax { .. })
        ));
    }

    #[cfg(any(feature = "openjp2", feature = "openjpeg-sys"))]
    #[test]
    fn jpeg2000_registry() {
        let registry = DecoderRegistry::with_jpeg2000(DecoderOptions::default());
        assert_eq!(
            registry.transfer_syntaxes().collect::<Vec<_>>(),
            vec![uids::JPEG2000_LOSSLESS, uids::JPEG2000]
        );
    }
}
