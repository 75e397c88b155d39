//! End-to-end decoding tests over hand-assembled segment streams.

use jbig2_decode::{DecodeError, Decoder, decode, decode_config, is_jbig2};

const SIGNATURE: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// File header for a sequential stream with no page count field.
fn sequential_header() -> Vec<u8> {
    let mut out = SIGNATURE.to_vec();
    out.push(0x02);
    out
}

/// File header for a random-access stream with no page count field.
fn random_access_header() -> Vec<u8> {
    let mut out = SIGNATURE.to_vec();
    out.push(0x03);
    out
}

/// A segment header (small page association, one-byte referred numbers)
/// followed by its data.
fn segment(number: u32, kind: u8, referred: &[u32], page: u32, data: &[u8]) -> Vec<u8> {
    segment_header(number, kind, referred, page, data.len() as u32)
        .into_iter()
        .chain(data.iter().copied())
        .collect()
}

fn segment_header(number: u32, kind: u8, referred: &[u32], page: u32, data_length: u32) -> Vec<u8> {
    assert!(number <= 256 && referred.len() <= 4);

    let mut out = number.to_be_bytes().to_vec();
    out.push(kind);
    out.push((referred.len() as u8) << 5);
    for &r in referred {
        assert!(r <= 255);
        out.push(r as u8);
    }
    out.push(page as u8);
    out.extend_from_slice(&data_length.to_be_bytes());
    out
}

/// Page information segment data.
fn page_info(width: u32, height: u32, flags: u8, striping: u16) -> Vec<u8> {
    let mut out = width.to_be_bytes().to_vec();
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // X resolution
    out.extend_from_slice(&0u32.to_be_bytes()); // Y resolution
    out.push(flags);
    out.extend_from_slice(&striping.to_be_bytes());
    out
}

/// Region segment information field.
fn region_info(width: u32, height: u32, x: u32, y: u32, flags: u8) -> Vec<u8> {
    let mut out = width.to_be_bytes().to_vec();
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&x.to_be_bytes());
    out.extend_from_slice(&y.to_be_bytes());
    out.push(flags);
    out
}

/// An MMR-coded all-black 8x2 generic region data part.
///
/// Row 1 is horizontal mode (white run 0, black run 8); row 2 tracks the
/// change elements with two V0 codes.
fn black_8x2_generic_region() -> Vec<u8> {
    let mut data = region_info(8, 2, 0, 0, 0);
    data.push(0x01); // flags: MMR
    data.extend_from_slice(&[0x26, 0xA2, 0xE0]);
    data
}

#[test]
fn empty_page_stream_decodes_to_one_white_page() {
    // A page information segment declaring 8x8 with default pixel 0,
    // followed by end-of-page.
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 8, 0, 0)));
    data.extend(segment(2, 49, &[], 1, &[]));

    let mut decoder = Decoder::new(&data).unwrap();

    let page = decoder.decode().unwrap().expect("one page");
    assert_eq!((page.width(), page.height()), (8, 8));
    assert!(page.data().iter().all(|&b| b == 0));

    assert!(decoder.decode().unwrap().is_none());
}

#[test]
fn default_pixel_fills_the_page_black() {
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 8, 0x04, 0)));
    data.extend(segment(2, 49, &[], 1, &[]));

    let page = decode(&data).unwrap();
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(page.pixel(x, y), 1);
        }
    }
}

/// A Huffman-coded symbol dictionary with one 3x5 all-black symbol: one
/// height class (delta height 5 via Table B.4, delta width 3 via Table B.2,
/// then OOB), an uncompressed collective bitmap (BMSIZE 0 via Table B.1),
/// and the export run lengths 0, 1.
fn one_symbol_dictionary() -> Vec<u8> {
    let mut data = vec![0x00, 0x01]; // flags: SDHUFF, all standard tables
    data.extend_from_slice(&1u32.to_be_bytes()); // SDNUMEXSYMS
    data.extend_from_slice(&1u32.to_be_bytes()); // SDNUMNEWSYMS
    // '1110001' (DH=5) '1110000' (DW=3) '111111' (OOB) '00000' (BMSIZE=0)
    data.extend_from_slice(&[0xE3, 0xC3, 0xF0, 0x00]);
    // Collective bitmap: 5 packed rows of 3 set pixels.
    data.extend_from_slice(&[0xE0, 0xE0, 0xE0, 0xE0, 0xE0]);
    // Export runs 0 and 1 via Table B.1: '00000' '00001'.
    data.extend_from_slice(&[0x00, 0x40]);
    data
}

/// A Huffman-coded text region placing symbol 0 at (1, 1) on an 8x8
/// canvas, composed with OR.
fn one_instance_text_region() -> Vec<u8> {
    let mut data = region_info(8, 8, 0, 0, 0);
    // Flags: SBHUFF, reference corner TOPLEFT.
    data.extend_from_slice(&0x0011u16.to_be_bytes());
    // Huffman flags: all standard table selections.
    data.extend_from_slice(&0x0000u16.to_be_bytes());
    data.extend_from_slice(&1u32.to_be_bytes()); // SBNUMINSTANCES
    // Symbol ID code lengths: run code 1 has a 1-bit prefix, everything
    // else is unused; the single symbol gets code length 1.
    let mut table = vec![0u8; 18];
    table[0] = 0x01;
    data.extend_from_slice(&table);
    // '0' (initial T=1) '100' (strip T=2) '00'+'0000001' (first S=1)
    // '0' (symbol 0) '01' (OOB, end of strip)
    data.extend_from_slice(&[0x40, 0x09]);
    data
}

#[test]
fn symbol_dictionary_and_text_region_place_a_symbol() {
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 8, 0, 0)));
    data.extend(segment(2, 0, &[], 1, &one_symbol_dictionary()));
    data.extend(segment(3, 6, &[2], 1, &one_instance_text_region()));
    data.extend(segment(4, 49, &[], 1, &[]));

    let page = decode(&data).unwrap();
    assert_eq!((page.width(), page.height()), (8, 8));

    for y in 0..8i32 {
        for x in 0..8i32 {
            let inside = (1..4).contains(&x) && (1..6).contains(&y);
            assert_eq!(page.pixel(x, y), u32::from(inside), "({x}, {y})");
        }
    }
}

#[test]
fn mmr_generic_region_decodes_black_pixels() {
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 2, 0, 0)));
    data.extend(segment(2, 39, &[], 1, &black_8x2_generic_region()));
    data.extend(segment(3, 49, &[], 1, &[]));

    let page = decode(&data).unwrap();
    assert_eq!((page.width(), page.height()), (8, 2));
    for y in 0..2 {
        for x in 0..8 {
            assert_eq!(page.pixel(x, y), 1, "({x}, {y})");
        }
    }
}

#[test]
fn halftone_region_pastes_patterns_from_the_dictionary() {
    // Pattern dictionary: MMR, 4 patterns of 4x4 sliced from a 16x4
    // collective bitmap whose columns 0-3 are white and 4-15 black, so
    // pattern 0 is white and patterns 1-3 are black.
    let mut patterns = vec![0x01, 4, 4];
    patterns.extend_from_slice(&3u32.to_be_bytes()); // GRAYMAX
    patterns.extend_from_slice(&[0x36, 0x1F, 0xF0]);

    // Halftone region: 8x8, MMR, a 2x2 grid with cell vector (4, 0) so the
    // cells land at (4n, 4m). Gray values are 0, 1, 2, 3 in raster order.
    let mut halftone = region_info(8, 8, 0, 0, 0);
    halftone.push(0x01); // flags: MMR
    halftone.extend_from_slice(&2u32.to_be_bytes()); // HGW
    halftone.extend_from_slice(&2u32.to_be_bytes()); // HGH
    halftone.extend_from_slice(&0u32.to_be_bytes()); // HGX
    halftone.extend_from_slice(&0u32.to_be_bytes()); // HGY
    halftone.extend_from_slice(&1024u16.to_be_bytes()); // HRX
    halftone.extend_from_slice(&0u16.to_be_bytes()); // HRY
    // Bit-plane 1 (most significant): rows [0 0], [1 1].
    halftone.extend_from_slice(&[0x93, 0x5C]);
    // Bit-plane 0, Gray-coded against plane 1: rows [0 1], [1 0].
    halftone.extend_from_slice(&[0x23, 0xA2, 0x6A, 0xA0]);

    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 8, 0, 0)));
    data.extend(segment(2, 16, &[], 1, &patterns));
    data.extend(segment(3, 22, &[2], 1, &halftone));
    data.extend(segment(4, 49, &[], 1, &[]));

    let page = decode(&data).unwrap();

    // Cell (0,0) got the white pattern, the rest are black.
    for y in 0..8i32 {
        for x in 0..8i32 {
            let white = x < 4 && y < 4;
            assert_eq!(page.pixel(x, y), u32::from(!white), "({x}, {y})");
        }
    }
}

#[test]
fn random_access_streams_parse_headers_before_data() {
    let page_data = page_info(8, 2, 0, 0);
    let region_data = black_8x2_generic_region();

    let mut data = random_access_header();
    data.extend(segment_header(1, 48, &[], 1, page_data.len() as u32));
    data.extend(segment_header(2, 39, &[], 1, region_data.len() as u32));
    data.extend(segment_header(3, 49, &[], 1, 0));
    data.extend(segment_header(4, 51, &[], 1, 0));
    data.extend(page_data);
    data.extend(region_data);

    let page = decode(&data).unwrap();
    assert_eq!((page.width(), page.height()), (8, 2));
    for x in 0..8 {
        assert_eq!(page.pixel(x, 0), 1);
        assert_eq!(page.pixel(x, 1), 1);
    }
}

#[test]
fn truncated_segment_data_is_an_error() {
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 8, 0, 0)));
    // A segment declaring 100 data bytes with only 50 present.
    data.extend(segment_header(2, 39, &[], 1, 100));
    data.extend(std::iter::repeat_n(0u8, 50));

    let mut decoder = Decoder::new(&data).unwrap();
    assert_eq!(decoder.decode(), Err(DecodeError::InvalidSegment));
}

#[test]
fn striped_pages_grow_as_regions_arrive() {
    // Height unknown: the page starts at the maximum stripe size (4 rows)
    // and grows when a region lands below the current bottom edge.
    let mut data = sequential_header();
    data.extend(segment(
        1,
        48,
        &[],
        1,
        &page_info(8, 0xFFFF_FFFF, 0, 0x8000 | 4),
    ));

    let mut region = region_info(8, 2, 0, 4, 0);
    region.push(0x01);
    region.extend_from_slice(&[0x26, 0xA2, 0xE0]);
    data.extend(segment(2, 39, &[], 1, &region));
    data.extend(segment(3, 49, &[], 1, &[]));

    let page = decode(&data).unwrap();
    assert_eq!((page.width(), page.height()), (8, 6));
    assert_eq!(page.pixel(0, 3), 0);
    assert_eq!(page.pixel(0, 4), 1);
    assert_eq!(page.pixel(7, 5), 1);
}

#[test]
fn decode_config_reports_declared_page_dimensions() {
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(640, 480, 0, 0)));
    data.extend(segment(2, 49, &[], 1, &[]));

    assert_eq!(decode_config(&data).unwrap(), (640, 480));
}

#[test]
fn decode_config_fails_without_a_page_information_segment() {
    let mut data = sequential_header();
    data.extend(segment(1, 51, &[], 0, &[]));

    assert_eq!(decode_config(&data), Err(DecodeError::LogicError));
}

#[test]
fn globals_supply_shared_dictionaries() {
    // The symbol dictionary lives in a separate globals buffer (a bare
    // segment stream); the page stream's text region refers to it.
    let globals = segment(2, 0, &[], 0, &one_symbol_dictionary());

    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 8, 0, 0)));
    data.extend(segment(3, 6, &[2], 1, &one_instance_text_region()));
    data.extend(segment(4, 49, &[], 1, &[]));

    let mut decoder = Decoder::with_globals(&data, &globals).unwrap();
    let page = decoder.decode().unwrap().expect("one page");

    assert_eq!(page.pixel(1, 1), 1);
    assert_eq!(page.pixel(3, 5), 1);
    assert_eq!(page.pixel(0, 0), 0);
    assert_eq!(page.pixel(4, 1), 0);
}

#[test]
fn rejects_streams_without_a_signature() {
    assert!(!is_jbig2(b"plain text"));
    assert_eq!(Decoder::new(b"plain text").err(), Some(DecodeError::InvalidHeader));
}

#[test]
fn region_segments_outside_a_page_are_rejected() {
    let mut data = sequential_header();
    // A generic region before any page information segment.
    data.extend(segment(1, 39, &[], 1, &black_8x2_generic_region()));

    let mut decoder = Decoder::new(&data).unwrap();
    assert_eq!(decoder.decode(), Err(DecodeError::LogicError));
}

#[test]
fn gray_adapter_maps_black_to_zero() {
    let mut data = sequential_header();
    data.extend(segment(1, 48, &[], 1, &page_info(8, 2, 0, 0)));
    data.extend(segment(2, 39, &[], 1, &black_8x2_generic_region()));
    data.extend(segment(3, 49, &[], 1, &[]));

    let page = decode(&data).unwrap();
    let gray = page.to_gray_image();
    assert_eq!(gray.dimensions(), (8, 2));
    assert!(gray.pixels().all(|p| p.0 == [0]));
}
