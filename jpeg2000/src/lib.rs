//! JPEG 2000 decoding of encapsulated DICOM pixel data.
//!
//! This crate turns the encapsulated pixel data of a DICOM object
//! in one of the JPEG 2000 transfer syntaxes
//! (_JPEG 2000 Image Compression (Lossless Only)_ and _JPEG 2000 Image Compression_)
//! into native pixel data, frame by frame.
//!
//! Decoding an image involves:
//!
//! - reading the image geometry from the object's attributes
//!   ([`attribute`]);
//! - determining which pixel data fragments make up each frame,
//!   with or without the help of the basic offset table
//!   ([`fragment`]);
//! - decoding each frame's codestream
//!   through a [`BitstreamDecoder`](codec::BitstreamDecoder)
//!   and checking it against the declared geometry
//!   ([`frame`]);
//! - copying the decoded samples into the native pixel data layout
//!   ([`unpack`]);
//! - updating the attributes which describe the new pixel data
//!   ([`decode`]).
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(feature = "openjp2")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use dicom_jpeg2000::{DecoderOptions, Jpeg2000Decoder, Jpeg2000Process};
//! use dicom_jpeg2000::codec::openjpeg::OpenJpegDecoder;
//! use dicom_object::open_file;
//!
//! let mut obj = open_file("image.dcm")?.into_inner();
//! let decoder = Jpeg2000Decoder::new(
//!     Jpeg2000Process::Lossless,
//!     DecoderOptions::default(),
//!     OpenJpegDecoder,
//! );
//! let outcome = decoder.decode(&mut obj)?;
//! println!("decoded {} frame(s)", outcome.frames.len());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "openjp2"))]
//! # fn main() {}
//! ```
//!
//! ## Features
//!
//! - `openjp2` (default): decode bitstreams with the Rust port of OpenJPEG.
//! - `openjpeg-sys`: decode bitstreams with the statically linked OpenJPEG.
//!   Cannot be enabled together with `openjp2`.
//! - `cli`: build the `dicom-j2k-decode` command line tool.
pub mod attribute;
pub mod codec;
pub mod codestream;
pub mod decode;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod registry;
pub mod unpack;

pub use attribute::{AttributeSource, Geometry, PixelRepresentation};
pub use codec::{BitstreamDecoder, BitstreamError, DecodedComponent, DecodedImage};
pub use decode::{
    DecodeOutcome, DecodedPixelData, DecoderOptions, FrameStatus, Jpeg2000Decoder,
    Jpeg2000Process, UidCreation,
};
pub use error::{DecodeError, Result};
pub use fragment::{FragmentSource, MappingStrategy};
pub use registry::{DecoderRegistry, PixelDataDecoder};
pub use unpack::{PlanarConfiguration, PlanarConfigurationPolicy};
