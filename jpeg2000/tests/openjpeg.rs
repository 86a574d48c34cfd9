//! Test suite for decoding JPEG 2000 sample files with OpenJPEG
#![cfg(any(feature = "openjp2", feature = "openjpeg-sys"))]
mod common;

use common::string;
use dicom_dictionary_std::{tags, uids};
use dicom_jpeg2000::codec::openjpeg::OpenJpegDecoder;
use dicom_jpeg2000::{
    DecoderOptions, DecoderRegistry, FrameStatus, Jpeg2000Decoder, Jpeg2000Process,
};
use dicom_object::{open_file, InMemDicomObject};

fn open_test_file(name: &str) -> (String, InMemDicomObject) {
    let path = dicom_test_files::path(name).unwrap();
    let obj = open_file(path).unwrap();
    let ts = obj.meta().transfer_syntax().to_string();
    (ts, obj.into_inner())
}

fn samples(obj: &InMemDicomObject) -> Vec<u16> {
    obj.element(tags::PIXEL_DATA)
        .unwrap()
        .to_multi_int::<u16>()
        .unwrap()
}

#[test]
fn read_jpeg_2000_lossless() {
    let (ts, mut obj) = open_test_file("WG04/J2KR/NM1_J2KR");
    let (_, reference) = open_test_file("WG04/REF/NM1_UNC");

    let registry = DecoderRegistry::with_jpeg2000(DecoderOptions::default());
    let outcome = registry.decode(&ts, &mut obj).unwrap();

    assert!(outcome.lossless);
    assert_eq!(outcome.skipped_frames(), 0);
    assert!(outcome
        .frames
        .iter()
        .all(|status| *status == FrameStatus::Committed));
    assert_ne!(
        string(&obj, tags::LOSSY_IMAGE_COMPRESSION).as_deref(),
        Some("01")
    );

    let decoded = samples(&obj);
    let expected = samples(&reference);
    assert_eq!(decoded.len(), expected.len(), "pixel data length mismatch");
    assert!(decoded == expected, "lossless pixel data differs from reference");
}

#[test]
fn read_jpeg_2000_lossy() {
    let (ts, mut obj) = open_test_file("WG04/J2KI/NM1_J2KI");
    assert_eq!(ts.trim_end_matches('\0'), uids::JPEG2000);
    let (_, reference) = open_test_file("WG04/REF/NM1_UNC");

    let decoder = Jpeg2000Decoder::new(
        Jpeg2000Process::Lossy,
        DecoderOptions::default(),
        OpenJpegDecoder,
    );
    let outcome = decoder.decode(&mut obj).unwrap();

    assert!(!outcome.lossless);
    assert_eq!(
        string(&obj, tags::LOSSY_IMAGE_COMPRESSION).as_deref(),
        Some("01")
    );

    let decoded = samples(&obj);
    let expected = samples(&reference);
    assert_eq!(decoded.len(), expected.len(), "pixel data length mismatch");

    let err_margin = 256;
    for (i, (got, expected)) in decoded.iter().zip(&expected).enumerate() {
        assert!(
            got.abs_diff(*expected) <= err_margin,
            "sample error at #{}: {} vs {}",
            i,
            got,
            expected
        );
    }
}
