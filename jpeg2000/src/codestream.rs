//! Inspection of JPEG 2000 codestreams at the marker level.
//!
//! Only the handful of markers which matter for reassembling frames
//! out of pixel data fragments are recognized here:
//! the start of a codestream (or JP2 file),
//! the end of a codestream,
//! and the coding style of the main header.

/// Start of codestream
pub const SOC: u16 = 0xFF4F;
/// Image and tile size
pub const SIZ: u16 = 0xFF51;
/// Coding style default
pub const COD: u16 = 0xFF52;
/// Start of tile-part
pub const SOT: u16 = 0xFF90;
/// Start of data
pub const SOD: u16 = 0xFF93;
/// End of codestream
pub const EOC: u16 = 0xFFD9;

/// The signature box at the start of every JP2 file.
pub const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// Check whether the given bytes start a JPEG 2000 image,
/// either as a raw codestream (SOC followed by SIZ)
/// or as a JP2 file.
pub fn is_start_of_image(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0x4F, 0xFF, 0x51]) || is_jp2(data)
}

/// Check whether the given bytes start with the JP2 file signature.
pub fn is_jp2(data: &[u8]) -> bool {
    data.starts_with(&JP2_SIGNATURE)
}

/// Trim trailing bytes until the last byte of the data
/// is the last byte of the EOC marker.
///
/// Encapsulated fragments are padded to an even length,
/// and some writers append further padding on top of that.
/// If no such byte is found, an empty slice is returned.
pub fn trim_to_end_of_image(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b == (EOC & 0xFF) as u8)
        .map_or(0, |i| i + 1);
    &data[..end]
}

/// The wavelet transformation declared in a coding style marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WaveletTransform {
    /// 9-7 irreversible filter
    Irreversible97,
    /// 5-3 reversible filter
    Reversible53,
}

/// The default coding style of a codestream,
/// as declared in its main header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CodingStyle {
    /// the number of wavelet decomposition levels
    pub decomposition_levels: u8,
    /// whether a multiple component transformation is applied
    pub multiple_component_transform: bool,
    /// the wavelet filter
    pub transform: WaveletTransform,
}

impl CodingStyle {
    /// Whether the codestream was encoded without loss,
    /// which is the case when the reversible filter is used.
    pub fn is_reversible(&self) -> bool {
        self.transform == WaveletTransform::Reversible53
    }
}

/// Read the default coding style (COD marker segment)
/// from the main header of a codestream.
///
/// JP2 files are supported by looking up the contiguous codestream
/// embedded in the file.
/// Returns `None` if no codestream or no COD marker
/// could be found before the first tile-part.
pub fn coding_style(data: &[u8]) -> Option<CodingStyle> {
    let start = data
        .windows(4)
        .position(|w| w == [0xFF, 0x4F, 0xFF, 0x51])?;
    // skip SOC, which has no marker segment
    let mut pos = start + 2;

    loop {
        let marker = read_u16(data, pos)?;
        if marker == SOT || marker == SOD || marker == EOC {
            return None;
        }
        let length = read_u16(data, pos + 2)? as usize;
        if length < 2 {
            return None;
        }
        if marker == COD {
            // Lcod(2) Scod(1) SGcod(4) SPcod(5+)
            let segment = data.get(pos + 2..pos + 2 + length)?;
            let multiple_component_transform = *segment.get(6)? != 0;
            let decomposition_levels = *segment.get(7)?;
            let transform = match *segment.get(11)? {
                0 => WaveletTransform::Irreversible97,
                1 => WaveletTransform::Reversible53,
                _ => return None,
            };
            return Some(CodingStyle {
                decomposition_levels,
                multiple_component_transform,
                transform,
            });
        }
        pos += 2 + length;
    }
}

#[inline]
fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let bytes = data.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SOC, a minimal SIZ, COD with the given transform, SOT
    fn main_header(transform: u8) -> Vec<u8> {
        let mut data = vec![0xFF, 0x4F];
        // SIZ with a bogus body of 4 bytes
        data.extend_from_slice(&[0xFF, 0x51, 0x00, 0x06, 0, 0, 0, 0]);
        // COD
        data.extend_from_slice(&[
            0xFF, 0x52, 0x00, 0x0C, // marker, Lcod
            0x00, // Scod
            0x00, 0x00, 0x01, 0x01, // progression, layers, MCT
            0x05, 0x04, 0x04, 0x00, transform, // SPcod
        ]);
        data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
        data
    }

    #[test]
    fn recognizes_start_of_image() {
        assert!(is_start_of_image(&main_header(1)));
        assert!(is_start_of_image(&[
            0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A, 0x00
        ]));
        // JPEG SOI is not JPEG 2000
        assert!(!is_start_of_image(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!is_start_of_image(&[0xFF, 0x4F]));
    }

    #[test]
    fn trims_padding_after_eoc() {
        let data = [0xFF, 0x4F, 0x12, 0xFF, 0xD9, 0x00];
        assert_eq!(trim_to_end_of_image(&data), &data[..5]);
        let data = [0xFF, 0x4F, 0x12, 0xFF, 0xD9];
        assert_eq!(trim_to_end_of_image(&data), &data[..]);
        assert_eq!(trim_to_end_of_image(&[0x01, 0x02]), &[] as &[u8]);
    }

    #[test]
    fn reads_coding_style() {
        let style = coding_style(&main_header(1)).unwrap();
        assert_eq!(style.transform, WaveletTransform::Reversible53);
        assert!(style.is_reversible());
        assert!(style.multiple_component_transform);
        assert_eq!(style.decomposition_levels, 5);

        let style = coding_style(&main_header(0)).unwrap();
        assert!(!style.is_reversible());

        // inside a JP2 file
        let mut jp2 = JP2_SIGNATURE.to_vec();
        jp2.extend_from_slice(&[0x00, 0x00, 0x00, 0x08, b'j', b'p', b'2', b'c']);
        jp2.extend(main_header(1));
        assert!(coding_style(&jp2).unwrap().is_reversible());
    }

    #[test]
    fn coding_style_needs_cod_before_tiles() {
        let mut data = vec![0xFF, 0x4F];
        data.extend_from_slice(&[0xFF, 0x51, 0x00, 0x02]);
        data.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
        assert_eq!(coding_style(&data), None);
        assert_eq!(coding_style(&[0xFF, 0x4F, 0xFF]), None);
    }
}
