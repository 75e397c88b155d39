//! Huffman tables and the table-driven decoder (Annex B).

use std::sync::LazyLock;

use crate::error::{DecodeError, Result};
use crate::reader::BitStream;

/// A table line definition, before prefix codes are assigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TableLine {
    /// Prefix code length (PREFLEN). A length of 0 marks a line that is
    /// never used.
    preflen: u8,
    /// Number of additional bits (RANGELEN).
    rangelen: u8,
    /// The base value of the line's range.
    range_low: i32,
    /// True for the lower range line, whose offset is subtracted.
    is_lower: bool,
    /// True for the out-of-band line.
    is_oob: bool,
}

impl TableLine {
    pub(crate) const fn new(range_low: i32, preflen: u8, rangelen: u8) -> Self {
        Self {
            preflen,
            rangelen,
            range_low,
            is_lower: false,
            is_oob: false,
        }
    }

    /// A lower range line covering (-∞ ... `range_high`].
    pub(crate) const fn lower(range_high: i32, preflen: u8) -> Self {
        Self {
            preflen,
            rangelen: 32,
            range_low: range_high,
            is_lower: true,
            is_oob: false,
        }
    }

    /// An upper range line covering [`range_low` ... ∞).
    pub(crate) const fn upper(range_low: i32, preflen: u8) -> Self {
        Self {
            preflen,
            rangelen: 32,
            range_low,
            is_lower: false,
            is_oob: false,
        }
    }

    /// The out-of-band marker line.
    pub(crate) const fn oob(preflen: u8) -> Self {
        Self {
            preflen,
            rangelen: 0,
            range_low: 0,
            is_lower: false,
            is_oob: true,
        }
    }
}

/// A table line with its assigned prefix code.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HuffmanLine {
    line: TableLine,
    code: u32,
}

/// Assign canonical prefix codes to a vector of code lengths (B.3).
///
/// "Set: FIRSTCODE[CURLEN] = (FIRSTCODE[CURLEN - 1] + LENCOUNT[CURLEN - 1])
/// × 2" — within one length, codes are handed out in array order.
pub(crate) fn assign_codes(lengths: &[u8]) -> Vec<u32> {
    let lenmax = lengths.iter().copied().max().unwrap_or(0) as usize;

    let mut lencount = vec![0_u32; lenmax + 1];
    for &len in lengths {
        lencount[len as usize] += 1;
    }
    lencount[0] = 0;

    let mut codes = vec![0_u32; lengths.len()];
    let mut firstcode = vec![0_u32; lenmax + 1];

    for curlen in 1..=lenmax {
        firstcode[curlen] = (firstcode[curlen - 1] + lencount[curlen - 1]) << 1;
        let mut curcode = firstcode[curlen];

        for (i, &len) in lengths.iter().enumerate() {
            if len as usize == curlen {
                codes[i] = curcode;
                curcode += 1;
            }
        }
    }

    codes
}

/// A symbol code used by text regions: a prefix code standing for the symbol
/// at its index.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SymbolCode {
    pub(crate) len: u8,
    pub(crate) code: u32,
}

/// Assign canonical codes to symbol code lengths in place.
pub(crate) fn assign_symbol_codes(codes: &mut [SymbolCode]) {
    let lengths: Vec<u8> = codes.iter().map(|c| c.len).collect();
    for (sym, code) in codes.iter_mut().zip(assign_codes(&lengths)) {
        sym.code = code;
    }
}

/// A Huffman table: lines with assigned canonical codes, searched
/// bit-by-bit during decoding (B.4).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HuffmanTable {
    lines: Vec<HuffmanLine>,
    htoob: bool,
}

impl HuffmanTable {
    pub(crate) fn build(defs: &[TableLine]) -> Self {
        let lengths: Vec<u8> = defs.iter().map(|l| l.preflen).collect();
        let codes = assign_codes(&lengths);

        let lines = defs
            .iter()
            .zip(codes)
            .map(|(&line, code)| HuffmanLine { line, code })
            .collect();

        Self {
            lines,
            htoob: defs.iter().any(|l| l.is_oob),
        }
    }

    /// Decode one value (B.4). Returns `None` for the out-of-band value.
    ///
    /// Bits are accumulated one at a time; after each bit the table is
    /// searched for a line whose prefix code matches.
    pub(crate) fn decode(&self, stream: &mut BitStream<'_>) -> Result<Option<i32>> {
        let mut accum: u32 = 0;
        let mut nbits: u8 = 0;

        loop {
            if nbits > 32 {
                return Err(DecodeError::InvalidSegment);
            }

            accum = (accum << 1) | stream.read_bit()?;
            nbits += 1;

            for entry in &self.lines {
                let line = entry.line;
                if line.preflen != nbits || entry.code != accum {
                    continue;
                }

                if line.is_oob {
                    return Ok(None);
                }

                let value = if line.rangelen == 0 {
                    line.range_low
                } else {
                    let offset = stream.read_bits(line.rangelen as u32)? as i32;
                    if line.is_lower {
                        line.range_low.wrapping_sub(offset)
                    } else {
                        line.range_low.wrapping_add(offset)
                    }
                };

                return Ok(Some(value));
            }
        }
    }

    /// Decode one value, treating out-of-band as a malformed stream.
    pub(crate) fn decode_no_oob(&self, stream: &mut BitStream<'_>) -> Result<i32> {
        self.decode(stream)?.ok_or(DecodeError::InvalidSegment)
    }

    pub(crate) fn is_oob_capable(&self) -> bool {
        self.htoob
    }

    /// Read a custom code table from a tables segment (B.2).
    pub(crate) fn from_stream(stream: &mut BitStream<'_>) -> Result<Self> {
        // "Bit 0 is HTOOB for this code table. Bits 1-3 specify the value of
        // HTPS - 1. Bits 4-6 specify the value of HTRS - 1."
        let flags = stream.read_byte()?;
        let htoob = flags & 1 != 0;
        let htps = ((flags >> 1) & 7) + 1;
        let htrs = ((flags >> 4) & 7) + 1;

        let htlow = stream.read_i32()?;
        let hthigh = stream.read_i32()?;

        // "Continue reading table lines until CURRANGELOW > HTHIGH."
        let mut defs = Vec::new();
        let mut currangelow = htlow;

        while currangelow < hthigh {
            let preflen = stream.read_bits(htps as u32)? as u8;
            let rangelen = stream.read_bits(htrs as u32)? as u8;

            defs.push(TableLine::new(currangelow, preflen, rangelen));

            let range_size = 1_i64
                .checked_shl(rangelen as u32)
                .ok_or(DecodeError::InvalidSegment)?;
            let next = currangelow as i64 + range_size;
            currangelow = i32::try_from(next).map_err(|_| DecodeError::InvalidSegment)?;
        }

        // The lower and upper range lines carry only a prefix length; their
        // range length is implicitly 32.
        let preflen = stream.read_bits(htps as u32)? as u8;
        defs.push(TableLine::lower(htlow.wrapping_sub(1), preflen));

        let preflen = stream.read_bits(htps as u32)? as u8;
        defs.push(TableLine::upper(currangelow, preflen));

        if htoob {
            defs.push(TableLine::oob(stream.read_bits(htps as u32)? as u8));
        }

        Ok(Self::build(&defs))
    }
}

/// The fifteen standard tables of Annex B, in standard order (index 0 is
/// Table B.1).
static STANDARD_TABLES: LazyLock<Vec<HuffmanTable>> = LazyLock::new(|| {
    STANDARD_TABLE_DEFS
        .iter()
        .map(|defs| HuffmanTable::build(defs))
        .collect()
});

/// Look up a standard table by its Annex B number (1 through 15).
pub(crate) fn standard_table(number: usize) -> &'static HuffmanTable {
    debug_assert!((1..=15).contains(&number));
    &STANDARD_TABLES[number - 1]
}

use TableLine as L;

#[rustfmt::skip]
static STANDARD_TABLE_DEFS: [&[TableLine]; 15] = [
    // Table B.1
    &[L::new(0, 1, 4), L::new(16, 2, 8), L::new(272, 3, 16), L::upper(65808, 3)],
    // Table B.2
    &[L::new(0, 1, 0), L::new(1, 2, 0), L::new(2, 3, 0), L::new(3, 4, 3),
      L::new(11, 5, 6), L::upper(75, 6), L::oob(6)],
    // Table B.3
    &[L::new(-256, 8, 8), L::new(0, 1, 0), L::new(1, 2, 0), L::new(2, 3, 0),
      L::new(3, 4, 3), L::new(11, 5, 6), L::lower(-257, 8), L::upper(75, 7), L::oob(6)],
    // Table B.4
    &[L::new(1, 1, 0), L::new(2, 2, 0), L::new(3, 3, 0), L::new(4, 4, 3),
      L::new(12, 5, 6), L::upper(76, 5)],
    // Table B.5
    &[L::new(-255, 7, 8), L::new(1, 1, 0), L::new(2, 2, 0), L::new(3, 3, 0),
      L::new(4, 4, 3), L::new(12, 5, 6), L::lower(-256, 7), L::upper(76, 6)],
    // Table B.6
    &[L::new(-2048, 5, 10), L::new(-1024, 4, 9), L::new(-512, 4, 8), L::new(-256, 4, 7),
      L::new(-128, 5, 6), L::new(-64, 5, 5), L::new(-32, 4, 5), L::new(0, 2, 7),
      L::new(128, 3, 7), L::new(256, 3, 8), L::new(512, 4, 9), L::new(1024, 4, 10),
      L::lower(-2049, 6), L::upper(2048, 6)],
    // Table B.7
    &[L::new(-1024, 4, 9), L::new(-512, 3, 8), L::new(-256, 4, 7), L::new(-128, 5, 6),
      L::new(-64, 5, 5), L::new(-32, 4, 5), L::new(0, 4, 5), L::new(32, 5, 5),
      L::new(64, 5, 6), L::new(128, 4, 7), L::new(256, 3, 8), L::new(512, 3, 9),
      L::new(1024, 3, 10), L::lower(-1025, 5), L::upper(2048, 5)],
    // Table B.8
    &[L::new(-15, 8, 3), L::new(-7, 9, 1), L::new(-5, 8, 1), L::new(-3, 9, 0),
      L::new(-2, 7, 0), L::new(-1, 4, 0), L::new(0, 2, 1), L::new(2, 5, 0),
      L::new(3, 6, 0), L::new(4, 3, 4), L::new(20, 6, 1), L::new(22, 4, 4),
      L::new(38, 4, 5), L::new(70, 5, 6), L::new(134, 5, 7), L::new(262, 6, 7),
      L::new(390, 7, 8), L::new(646, 6, 10), L::lower(-16, 9), L::upper(1670, 9),
      L::oob(2)],
    // Table B.9
    &[L::new(-31, 8, 4), L::new(-15, 9, 2), L::new(-11, 8, 2), L::new(-7, 9, 1),
      L::new(-5, 7, 1), L::new(-3, 4, 1), L::new(-1, 3, 1), L::new(1, 3, 1),
      L::new(3, 5, 1), L::new(5, 6, 1), L::new(7, 3, 5), L::new(39, 6, 2),
      L::new(43, 4, 5), L::new(75, 4, 6), L::new(139, 5, 7), L::new(267, 5, 8),
      L::new(523, 6, 8), L::new(779, 7, 9), L::new(1291, 6, 11), L::lower(-32, 9),
      L::upper(3339, 9), L::oob(2)],
    // Table B.10
    &[L::new(-21, 7, 4), L::new(-5, 8, 0), L::new(-4, 7, 0), L::new(-3, 5, 0),
      L::new(-2, 2, 2), L::new(2, 5, 0), L::new(3, 6, 0), L::new(4, 7, 0),
      L::new(5, 8, 0), L::new(6, 2, 6), L::new(70, 5, 5), L::new(102, 6, 5),
      L::new(134, 6, 6), L::new(198, 6, 7), L::new(326, 6, 8), L::new(582, 6, 9),
      L::new(1094, 6, 10), L::new(2118, 7, 11), L::lower(-22, 8), L::upper(4166, 8),
      L::oob(2)],
    // Table B.11
    &[L::new(1, 1, 0), L::new(2, 2, 1), L::new(4, 4, 0), L::new(5, 4, 1),
      L::new(7, 5, 1), L::new(9, 5, 2), L::new(13, 6, 2), L::new(17, 7, 2),
      L::new(21, 7, 3), L::new(29, 7, 4), L::new(45, 7, 5), L::new(77, 7, 6),
      L::upper(141, 7)],
    // Table B.12
    &[L::new(1, 1, 0), L::new(2, 2, 0), L::new(3, 3, 1), L::new(5, 5, 0),
      L::new(6, 5, 1), L::new(8, 6, 1), L::new(10, 7, 0), L::new(11, 7, 1),
      L::new(13, 7, 2), L::new(17, 7, 3), L::new(25, 7, 4), L::new(41, 8, 5),
      L::upper(73, 8)],
    // Table B.13
    &[L::new(1, 1, 0), L::new(2, 3, 0), L::new(3, 4, 0), L::new(4, 5, 0),
      L::new(5, 4, 1), L::new(7, 3, 3), L::new(15, 6, 1), L::new(17, 6, 2),
      L::new(21, 6, 3), L::new(29, 6, 4), L::new(45, 6, 5), L::new(77, 7, 6),
      L::upper(141, 7)],
    // Table B.14
    &[L::new(-2, 3, 0), L::new(-1, 3, 0), L::new(0, 1, 0), L::new(1, 3, 0),
      L::new(2, 3, 0)],
    // Table B.15
    &[L::new(-24, 7, 4), L::new(-8, 6, 2), L::new(-4, 5, 1), L::new(-2, 4, 0),
      L::new(-1, 3, 0), L::new(0, 1, 0), L::new(1, 3, 0), L::new(2, 4, 0),
      L::new(3, 5, 1), L::new(5, 6, 2), L::new(9, 7, 4), L::lower(-25, 7),
      L::upper(25, 7)],
];

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(table: &HuffmanTable, data: &[u8], expected: &[Option<i32>]) {
        let mut stream = BitStream::new(data);
        for (i, &exp) in expected.iter().enumerate() {
            assert_eq!(table.decode(&mut stream).unwrap(), exp, "mismatch at {i}");
        }
    }

    #[test]
    fn canonical_codes_are_distinct_and_in_range() {
        for number in 1..=15 {
            let table = standard_table(number);
            for (i, a) in table.lines.iter().enumerate() {
                if a.line.preflen == 0 {
                    continue;
                }
                assert!(a.code < (1 << a.line.preflen), "table {number} line {i}");
                for b in &table.lines[i + 1..] {
                    if b.line.preflen == a.line.preflen {
                        assert_ne!(a.code, b.code, "table {number} line {i}");
                    }
                }
            }
        }
    }

    #[test]
    fn table_b1_decodes_its_ranges() {
        let table = standard_table(1);

        // 0...15: prefix '0' + 4 bits.
        decode_all(table, &[0b0_0000_000], &[Some(0)]);
        decode_all(table, &[0b0_1111_000], &[Some(15)]);
        // 16...271: prefix '10' + 8 bits.
        decode_all(table, &[0b10_000000, 0b00_000000], &[Some(16)]);
        decode_all(table, &[0b10_111111, 0b11_000000], &[Some(271)]);
        // 65808...∞: prefix '111' + 32 bits.
        decode_all(
            table,
            &[0b111_00000, 0x00, 0x00, 0x00, 0b00000_000],
            &[Some(65808)],
        );
    }

    #[test]
    fn table_b2_signals_out_of_band() {
        let table = standard_table(2);
        assert!(table.is_oob_capable());

        // '111111' is the OOB code, '0' is the value 0.
        decode_all(table, &[0b111111_0_0], &[None, Some(0)]);
    }

    #[test]
    fn lower_range_lines_subtract_their_offset() {
        let table = standard_table(3);

        // Table B.3 lower line: prefix '11111111' + 32 bits, base -257.
        let mut stream = BitStream::new(&[0xFF, 0x00, 0x00, 0x00, 0x05][..]);
        assert_eq!(table.decode(&mut stream).unwrap(), Some(-262));

        // The '11111110' code belongs to the -256...-1 range line instead.
        let mut stream = BitStream::new(&[0b11111110, 0x05][..]);
        assert_eq!(table.decode(&mut stream).unwrap(), Some(-251));
    }

    #[test]
    fn custom_table_roundtrip_matches_table_b1() {
        // Example from B.2: encodes a table equivalent to Table B.1.
        let data = [
            0x42, // flags: HTOOB=0, HTPS=2, HTRS=5
            0x00, 0x00, 0x00, 0x00, // HTLOW = 0
            0x00, 0x01, 0x01, 0x10, // HTHIGH = 65808
            0x49, 0x23, 0x81, 0x80, // table lines
        ];
        let mut stream = BitStream::new(&data[..]);
        let table = HuffmanTable::from_stream(&mut stream).unwrap();

        decode_all(&table, &[0b0_0111_000], &[Some(7)]);
        decode_all(&table, &[0b10_000000, 0b01_000000], &[Some(17)]);
        decode_all(
            &table,
            &[0b110_00000, 0b00000000, 0b0_0000000],
            &[Some(272)],
        );
    }

    #[test]
    fn symbol_codes_follow_array_order_within_a_length() {
        let mut codes = [
            SymbolCode { len: 2, code: 0 },
            SymbolCode { len: 1, code: 0 },
            SymbolCode { len: 2, code: 0 },
        ];
        assign_symbol_codes(&mut codes);

        assert_eq!(codes[1].code, 0b0);
        assert_eq!(codes[0].code, 0b10);
        assert_eq!(codes[2].code, 0b11);
    }
}
