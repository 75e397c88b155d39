//! Segments and segment header parsing (7.2).

use crate::arithmetic_decoder::ArithContext;
use crate::bitmap::Image;
use crate::decode::pattern::PatternDict;
use crate::decode::symbol::SymbolDict;
use crate::error::{DecodeError, Result};
use crate::huffman_table::HuffmanTable;
use crate::reader::BitStream;

/// "This field contains one or more bytes indicating how many other
/// segments are referred to by this segment." Streams declaring more than
/// this are rejected. (7.2.4)
const MAX_REFERRED_SEGMENTS: u32 = 1024;

/// Segment type numbers (7.3) handled by the dispatcher.
pub(crate) mod kind {
    pub(crate) const SYMBOL_DICTIONARY: u8 = 0;
    pub(crate) const INTERMEDIATE_TEXT_REGION: u8 = 4;
    pub(crate) const IMMEDIATE_TEXT_REGION: u8 = 6;
    pub(crate) const IMMEDIATE_LOSSLESS_TEXT_REGION: u8 = 7;
    pub(crate) const PATTERN_DICTIONARY: u8 = 16;
    pub(crate) const INTERMEDIATE_HALFTONE_REGION: u8 = 20;
    pub(crate) const IMMEDIATE_HALFTONE_REGION: u8 = 22;
    pub(crate) const IMMEDIATE_LOSSLESS_HALFTONE_REGION: u8 = 23;
    pub(crate) const INTERMEDIATE_GENERIC_REGION: u8 = 36;
    pub(crate) const IMMEDIATE_GENERIC_REGION: u8 = 38;
    pub(crate) const IMMEDIATE_LOSSLESS_GENERIC_REGION: u8 = 39;
    pub(crate) const INTERMEDIATE_REFINEMENT_REGION: u8 = 40;
    pub(crate) const IMMEDIATE_REFINEMENT_REGION: u8 = 42;
    pub(crate) const IMMEDIATE_LOSSLESS_REFINEMENT_REGION: u8 = 43;
    pub(crate) const PAGE_INFORMATION: u8 = 48;
    pub(crate) const END_OF_PAGE: u8 = 49;
    pub(crate) const END_OF_STRIPE: u8 = 50;
    pub(crate) const END_OF_FILE: u8 = 51;
    pub(crate) const PROFILES: u8 = 52;
    pub(crate) const TABLES: u8 = 53;
    pub(crate) const EXTENSION: u8 = 62;
}

/// What a segment produced when its data part was decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum SegmentResult {
    #[default]
    None,
    Image(Image),
    SymbolDict(SymbolDict),
    PatternDict(PatternDict),
    Table(HuffmanTable),
}

/// A parsed segment. Segments are retained (keyed by number) so that later
/// segments can refer to their dictionaries and intermediate regions.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Segment {
    /// "The valid range of segment numbers is 0 through 0xFFFFFFFF." (7.2.2)
    pub(crate) number: u32,
    /// "Bits 0-5: Segment type." (7.2.3)
    pub(crate) kind: u8,
    /// "Bit 7: Deferred non-retain." (7.2.3)
    pub(crate) deferred_non_retain: bool,
    pub(crate) referred: Vec<u32>,
    /// "This field may contain a value of zero; this value indicates that
    /// this segment is not associated with any page." (7.2.6)
    pub(crate) page_association: u32,
    /// 0xFFFFFFFF means the length is unknown and the data part ends with a
    /// row-count trailer. (7.2.7)
    pub(crate) data_length: u32,
    pub(crate) data_offset: usize,
    pub(crate) result: SegmentResult,
    /// Arithmetic context banks retained for a follow-on symbol dictionary.
    pub(crate) gb_contexts: Vec<ArithContext>,
    pub(crate) gr_contexts: Vec<ArithContext>,
}

impl Segment {
    /// Parse a segment header (7.2).
    ///
    /// Random-access streams without the org-mode-1 layout omit the segment
    /// number and page association from their headers.
    pub(crate) fn parse_header(
        stream: &mut BitStream<'_>,
        random_access: bool,
        org_mode: u8,
    ) -> Result<Segment> {
        let full_header = org_mode == 1 || !random_access;

        let number = if full_header { stream.read_u32()? } else { 0 };

        let flags = stream.read_byte()?;
        let kind = flags & 0x3F;
        let page_association_large = flags & 0x40 != 0;
        let deferred_non_retain = flags & 0x80 != 0;

        // 7.2.4: "The three most significant bits of the first byte in this
        // field determine the length of the field."
        let referred_count = if stream.cur_byte() >> 5 == 7 {
            let count = stream.read_u32()? & 0x1FFF_FFFF;
            if count > MAX_REFERRED_SEGMENTS {
                return Err(DecodeError::InvalidSegment);
            }

            // "Bit 0: Retain bit for this segment. Bits 1-7: retain bits for
            // referred-to segments", one bit per referred segment.
            let retention_bytes = (count as usize + 1).div_ceil(8);
            for _ in 0..retention_bytes {
                stream.read_byte()?;
            }
            count
        } else {
            let byte = stream.read_byte()?;
            let count = (byte >> 5) as u32;
            // "This three-bit subfield must not contain values of 5 and 6."
            if count > 4 {
                return Err(DecodeError::InvalidSegment);
            }
            count
        };

        // 7.2.5: "When the current segment's number is 256 or less, then
        // each referred-to segment number is one byte long" and so on.
        let mut referred = Vec::with_capacity(referred_count as usize);
        for _ in 0..referred_count {
            let value = if number > 65536 {
                stream.read_u32()?
            } else if number > 256 {
                stream.read_u16()? as u32
            } else {
                stream.read_byte()? as u32
            };

            // A segment refers only to segments with lower numbers.
            if full_header && value >= number {
                return Err(DecodeError::InvalidSegment);
            }

            referred.push(value);
        }

        let page_association = if full_header {
            if page_association_large {
                stream.read_u32()?
            } else {
                stream.read_byte()? as u32
            }
        } else {
            0
        };

        let data_length = stream.read_u32()?;

        Ok(Segment {
            number,
            kind,
            deferred_non_retain,
            referred,
            page_association,
            data_length,
            data_offset: stream.offset(),
            result: SegmentResult::default(),
            gb_contexts: Vec::new(),
            gr_contexts: Vec::new(),
        })
    }

    pub(crate) fn image(&self) -> Option<&Image> {
        match &self.result {
            SegmentResult::Image(image) => Some(image),
            _ => None,
        }
    }

    pub(crate) fn symbol_dict(&self) -> Option<&SymbolDict> {
        match &self.result {
            SegmentResult::SymbolDict(dict) => Some(dict),
            _ => None,
        }
    }

    pub(crate) fn pattern_dict(&self) -> Option<&PatternDict> {
        match &self.result {
            SegmentResult::PatternDict(dict) => Some(dict),
            _ => None,
        }
    }

    pub(crate) fn table(&self) -> Option<&HuffmanTable> {
        match &self.result {
            SegmentResult::Table(table) => Some(table),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Segment> {
        let mut stream = BitStream::new(data);
        Segment::parse_header(&mut stream, false, 0)
    }

    #[test]
    fn header_example_1() {
        // 7.2.8, EXAMPLE 1: "A segment header consisting of the sequence of
        // bytes: 0x00 0x00 0x00 0x20 0x86 0x6B 0x02 0x1E 0x05 0x04", plus a
        // data length field.
        let data = [
            0x00, 0x00, 0x00, 0x20, // segment number = 32
            0x86, // flags: type 6, 1-byte page association, deferred
            0x6B, // refers to 3 segments, retention flags
            0x02, 0x1E, 0x05, // referred segments 2, 30, 5
            0x04, // page association = 4
            0x00, 0x00, 0x00, 0x10, // data length = 16
        ];

        let segment = parse(&data).unwrap();
        assert_eq!(segment.number, 32);
        assert_eq!(segment.kind, kind::IMMEDIATE_TEXT_REGION);
        assert!(segment.deferred_non_retain);
        assert_eq!(segment.referred, vec![2, 30, 5]);
        assert_eq!(segment.page_association, 4);
        assert_eq!(segment.data_length, 16);
        assert_eq!(segment.data_offset, data.len());
    }

    #[test]
    fn header_example_2() {
        // 7.2.8, EXAMPLE 2: long-form referred count with two-byte referred
        // segment numbers.
        #[rustfmt::skip]
        let data = [
            0x00, 0x00, 0x02, 0x34, // segment number = 564
            0x40,                   // flags: type 0, 4-byte page association
            0xE0, 0x00, 0x00, 0x09, // long form: 9 referred segments
            0x02, 0xFD,             // retention flags
            0x01, 0x00,             // referred segment 256
            0x00, 0x02,             // referred segment 2
            0x00, 0x1E,             // referred segment 30
            0x00, 0x05,             // referred segment 5
            0x02, 0x00,             // referred segment 512
            0x02, 0x01,             // referred segment 513
            0x02, 0x02,             // referred segment 514
            0x02, 0x03,             // referred segment 515
            0x02, 0x04,             // referred segment 516
            0x00, 0x00, 0x04, 0x01, // page association = 1025
            0x00, 0x00, 0x00, 0x20, // data length = 32
        ];

        let segment = parse(&data).unwrap();
        assert_eq!(segment.number, 564);
        assert_eq!(segment.kind, kind::SYMBOL_DICTIONARY);
        assert!(!segment.deferred_non_retain);
        assert_eq!(
            segment.referred,
            vec![256, 2, 30, 5, 512, 513, 514, 515, 516]
        );
        assert_eq!(segment.page_association, 1025);
        assert_eq!(segment.data_length, 32);
    }

    #[test]
    fn referred_count_cap() {
        // Long-form header declaring 1024 referred segments parses; 1025
        // does not.
        let build = |count: u32| -> Vec<u8> {
            let mut data = vec![0x00, 0x01, 0x00, 0x00]; // number = 65536
            data.push(0x00); // type 0, small page association
            data.extend_from_slice(&(0xE000_0000_u32 | count).to_be_bytes());
            data.extend(std::iter::repeat_n(0u8, (count as usize + 1).div_ceil(8)));
            // Two-byte referred numbers, all zero.
            data.extend(std::iter::repeat_n(0u8, count as usize * 2));
            data.push(0x01); // page association
            data.extend_from_slice(&0u32.to_be_bytes()); // data length
            data
        };

        let segment = parse(&build(1024)).unwrap();
        assert_eq!(segment.referred.len(), 1024);

        assert_eq!(parse(&build(1025)), Err(DecodeError::InvalidSegment));
    }

    #[test]
    fn forward_references_are_rejected() {
        let data = [
            0x00, 0x00, 0x00, 0x05, // segment number = 5
            0x06, // type 6
            0x20, // one referred segment
            0x07, // referred segment 7 > 5
            0x01, // page association
            0x00, 0x00, 0x00, 0x00,
        ];

        assert_eq!(parse(&data), Err(DecodeError::InvalidSegment));
    }
}
