//! MMR (ITU-T T.6 two-dimensional) decoding.
//!
//! Rows are decoded as lists of change-element positions against the
//! previous row, then painted as alternating white/black runs. Black pixels
//! carry the value 1, which is the convention every caller of this module
//! expects (6.2.6).

use std::sync::LazyLock;

use crate::bitmap::Image;
use crate::error::{DecodeError, Result};
use crate::reader::BitStream;

const MODE_PASS: i16 = 0;
const MODE_HORIZ: i16 = 1;
const MODE_V0: i16 = 2;
const MODE_VR1: i16 = 3;
const MODE_VR2: i16 = 4;
const MODE_VR3: i16 = 5;
const MODE_VL1: i16 = 6;
const MODE_VL2: i16 = 7;
const MODE_VL3: i16 = 8;
const MODE_EXT_2D: i16 = 9;
const MODE_EXT_1D: i16 = 10;
const RUN_EOL: i16 = -1;
const RUN_EOF: i16 = -3;

/// One code word: its bit length and the run length (or mode / marker) it
/// stands for.
#[derive(Debug, Clone, Copy)]
struct MmrCode {
    bit_length: u8,
    run_length: i16,
}

const PRIMARY_BITS: u32 = 8;
const SECONDARY_BITS: u32 = 5;
const PEEK_BITS: u32 = 24;

/// A two-level decode table: an 8-bit primary index (short codes replicated
/// across their unused low bits) and a 5-bit secondary index for codes
/// longer than eight bits.
struct DecodeTable {
    primary: Vec<Option<Slot>>,
}

enum Slot {
    Code(MmrCode),
    Sub(Vec<Option<MmrCode>>),
}

impl DecodeTable {
    fn build(codes: &[(u8, u16, i16)]) -> Self {
        let mut primary: Vec<Option<Slot>> = Vec::with_capacity(1 << PRIMARY_BITS);
        primary.resize_with(1 << PRIMARY_BITS, || None);

        for &(bit_length, code_word, run_length) in codes {
            let code = MmrCode {
                bit_length,
                run_length,
            };

            if u32::from(bit_length) <= PRIMARY_BITS {
                let variant_bits = PRIMARY_BITS - u32::from(bit_length);
                let base = (code_word as usize) << variant_bits;
                for variant in 0..(1 << variant_bits) {
                    primary[base | variant] = Some(Slot::Code(code));
                }
            } else {
                let first_idx = (code_word >> (u32::from(bit_length) - PRIMARY_BITS)) as usize;
                let slot = primary[first_idx].get_or_insert_with(|| {
                    let mut sub: Vec<Option<MmrCode>> = Vec::with_capacity(1 << SECONDARY_BITS);
                    sub.resize_with(1 << SECONDARY_BITS, || None);
                    Slot::Sub(sub)
                });

                if let Slot::Sub(sub) = slot
                    && u32::from(bit_length) <= PRIMARY_BITS + SECONDARY_BITS
                {
                    let variant_bits = PRIMARY_BITS + SECONDARY_BITS - u32::from(bit_length);
                    let base = ((code_word as usize) << variant_bits) & ((1 << SECONDARY_BITS) - 1);
                    for variant in 0..(1 << variant_bits) {
                        sub[base | variant] = Some(code);
                    }
                }
            }
        }

        Self { primary }
    }

    fn lookup(&self, code_word: u32) -> Option<MmrCode> {
        let idx = ((code_word >> (PEEK_BITS + 8 - PRIMARY_BITS)) & 0xFF) as usize;
        match self.primary[idx].as_ref()? {
            Slot::Code(code) => Some(*code),
            Slot::Sub(sub) => {
                let idx2 =
                    ((code_word >> (PEEK_BITS + 8 - PRIMARY_BITS - SECONDARY_BITS)) & 0x1F) as usize;
                sub[idx2]
            }
        }
    }
}

#[rustfmt::skip]
static MODE_CODES: [(u8, u16, i16); 12] = [
    (4, 0x1, MODE_PASS),
    (3, 0x1, MODE_HORIZ),
    (1, 0x1, MODE_V0),
    (3, 0x3, MODE_VR1),
    (6, 0x3, MODE_VR2),
    (7, 0x3, MODE_VR3),
    (3, 0x2, MODE_VL1),
    (6, 0x2, MODE_VL2),
    (7, 0x2, MODE_VL3),
    (10, 0xF, MODE_EXT_2D),
    (12, 0xF, MODE_EXT_1D),
    (12, 0x1, RUN_EOL),
];

/// Table 2/T.4 and Table 3/T.4 white run lengths, terminating and make-up.
#[rustfmt::skip]
static WHITE_CODES: [(u8, u16, i16); 106] = [
    (4, 0x07, 2), (4, 0x08, 3), (4, 0x0B, 4), (4, 0x0C, 5), (4, 0x0E, 6), (4, 0x0F, 7),
    (5, 0x12, 128), (5, 0x13, 8), (5, 0x14, 9), (5, 0x1B, 64), (5, 0x07, 10), (5, 0x08, 11),
    (6, 0x17, 192), (6, 0x18, 1664), (6, 0x2A, 16), (6, 0x2B, 17), (6, 0x03, 13), (6, 0x34, 14),
    (6, 0x35, 15), (6, 0x07, 1), (6, 0x08, 12), (7, 0x13, 26), (7, 0x17, 21), (7, 0x18, 28),
    (7, 0x24, 27), (7, 0x27, 18), (7, 0x28, 24), (7, 0x2B, 25), (7, 0x03, 22), (7, 0x37, 256),
    (7, 0x04, 23), (7, 0x08, 20), (7, 0x0C, 19), (8, 0x12, 33), (8, 0x13, 34), (8, 0x14, 35),
    (8, 0x15, 36), (8, 0x16, 37), (8, 0x17, 38), (8, 0x1A, 31), (8, 0x1B, 32), (8, 0x02, 29),
    (8, 0x24, 53), (8, 0x25, 54), (8, 0x28, 39), (8, 0x29, 40), (8, 0x2A, 41), (8, 0x2B, 42),
    (8, 0x2C, 43), (8, 0x2D, 44), (8, 0x03, 30), (8, 0x32, 61), (8, 0x33, 62), (8, 0x34, 63),
    (8, 0x35, 0), (8, 0x36, 320), (8, 0x37, 384), (8, 0x04, 45), (8, 0x4A, 59), (8, 0x4B, 60),
    (8, 0x05, 46), (8, 0x52, 49), (8, 0x53, 50), (8, 0x54, 51), (8, 0x55, 52), (8, 0x58, 55),
    (8, 0x59, 56), (8, 0x5A, 57), (8, 0x5B, 58), (8, 0x64, 448), (8, 0x65, 512), (8, 0x67, 640),
    (8, 0x68, 576), (8, 0x0A, 47), (8, 0x0B, 48), (9, 0x98, 1472), (9, 0x99, 1536),
    (9, 0x9A, 1600), (9, 0x9B, 1728), (9, 0xCC, 704), (9, 0xCD, 768), (9, 0xD2, 832),
    (9, 0xD3, 896), (9, 0xD4, 960), (9, 0xD5, 1024), (9, 0xD6, 1088), (9, 0xD7, 1152),
    (9, 0xD8, 1216), (9, 0xD9, 1280), (9, 0xDA, 1344), (9, 0xDB, 1408), (11, 0x08, 1792),
    (11, 0x0C, 1856), (11, 0x0D, 1920), (12, 0x00, RUN_EOF), (12, 0x01, RUN_EOL),
    (12, 0x12, 1984), (12, 0x13, 2048), (12, 0x14, 2112), (12, 0x15, 2176), (12, 0x16, 2240),
    (12, 0x17, 2304), (12, 0x1C, 2368), (12, 0x1D, 2432), (12, 0x1E, 2496), (12, 0x1F, 2560),
];

/// Table 2/T.4 and Table 3/T.4 black run lengths, terminating and make-up.
#[rustfmt::skip]
static BLACK_CODES: [(u8, u16, i16); 106] = [
    (2, 0x02, 3), (2, 0x03, 2), (3, 0x02, 1), (3, 0x03, 4), (4, 0x02, 6), (4, 0x03, 5),
    (5, 0x03, 7), (6, 0x04, 9), (6, 0x05, 8), (7, 0x04, 10), (7, 0x05, 11), (7, 0x07, 12),
    (8, 0x04, 13), (8, 0x07, 14), (9, 0x18, 15), (10, 0x17, 16), (10, 0x18, 17), (10, 0x37, 0),
    (10, 0x08, 18), (10, 0x0F, 64), (11, 0x17, 24), (11, 0x18, 25), (11, 0x28, 23),
    (11, 0x37, 22), (11, 0x67, 19), (11, 0x68, 20), (11, 0x6C, 21), (11, 0x08, 1792),
    (11, 0x0C, 1856), (11, 0x0D, 1920), (12, 0x00, RUN_EOF), (12, 0x01, RUN_EOL),
    (12, 0x12, 1984), (12, 0x13, 2048), (12, 0x14, 2112), (12, 0x15, 2176), (12, 0x16, 2240),
    (12, 0x17, 2304), (12, 0x1C, 2368), (12, 0x1D, 2432), (12, 0x1E, 2496), (12, 0x1F, 2560),
    (12, 0x24, 52), (12, 0x27, 55), (12, 0x28, 56), (12, 0x2B, 59), (12, 0x2C, 60),
    (12, 0x33, 320), (12, 0x34, 384), (12, 0x35, 448), (12, 0x37, 53), (12, 0x38, 54),
    (12, 0x52, 50), (12, 0x53, 51), (12, 0x54, 44), (12, 0x55, 45), (12, 0x56, 46),
    (12, 0x57, 47), (12, 0x58, 57), (12, 0x59, 58), (12, 0x5A, 61), (12, 0x5B, 256),
    (12, 0x64, 48), (12, 0x65, 49), (12, 0x66, 62), (12, 0x67, 63), (12, 0x68, 30),
    (12, 0x69, 31), (12, 0x6A, 32), (12, 0x6B, 33), (12, 0x6C, 40), (12, 0x6D, 41),
    (12, 0xC8, 128), (12, 0xC9, 192), (12, 0xCA, 26), (12, 0xCB, 27), (12, 0xCC, 28),
    (12, 0xCD, 29), (12, 0xD2, 34), (12, 0xD3, 35), (12, 0xD4, 36), (12, 0xD5, 37),
    (12, 0xD6, 38), (12, 0xD7, 39), (12, 0xDA, 42), (12, 0xDB, 43), (13, 0x4A, 640),
    (13, 0x4B, 704), (13, 0x4C, 768), (13, 0x4D, 832), (13, 0x52, 1280), (13, 0x53, 1344),
    (13, 0x54, 1408), (13, 0x55, 1472), (13, 0x5A, 1536), (13, 0x5B, 1600), (13, 0x64, 1664),
    (13, 0x65, 1728), (13, 0x6C, 512), (13, 0x6D, 576), (13, 0x72, 896), (13, 0x73, 960),
    (13, 0x74, 1024), (13, 0x75, 1088), (13, 0x76, 1152), (13, 0x77, 1216),
];

static MODE_TABLE: LazyLock<DecodeTable> = LazyLock::new(|| DecodeTable::build(&MODE_CODES));
static WHITE_TABLE: LazyLock<DecodeTable> = LazyLock::new(|| DecodeTable::build(&WHITE_CODES));
static BLACK_TABLE: LazyLock<DecodeTable> = LazyLock::new(|| DecodeTable::build(&BLACK_CODES));

/// A Group-4 decoder over the shared segment stream.
pub(crate) struct MmrDecoder<'s, 'a> {
    width: i32,
    height: i32,
    stream: &'s mut BitStream<'a>,
    last_code: u32,
    last_offset: Option<usize>,
}

impl<'s, 'a> MmrDecoder<'s, 'a> {
    pub(crate) fn new(width: u32, height: u32, stream: &'s mut BitStream<'a>) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
            stream,
            last_code: 0,
            last_offset: None,
        }
    }

    /// Decode the whole image, consume trailing EOL codes, and byte-align
    /// the stream.
    pub(crate) fn decode(&mut self) -> Result<Image> {
        let mut image = Image::new(self.width as u32, self.height as u32);

        // A valid change list holds at most width + 1 entries; the slack
        // covers the sentinel entries and one over-push before the bounds
        // check fires.
        let capacity = self.width as usize + 8;
        let mut curr_offsets = vec![0_i32; capacity];
        let mut ref_offsets = vec![0_i32; capacity];
        ref_offsets[0] = self.width;
        let mut ref_count = 1_usize;

        for y in 0..self.height {
            let count = self.decode_row(&mut ref_offsets, ref_count, &mut curr_offsets)?;
            if count > 0 {
                self.paint_row(&mut image, y, &curr_offsets, count);
            }
            ref_offsets.copy_from_slice(&curr_offsets);
            ref_count = count;
        }

        self.skip_trailing_eol();
        self.stream.align();

        Ok(image)
    }

    /// Decode one row of change elements against the reference row.
    fn decode_row(
        &mut self,
        ref_offsets: &mut [i32],
        ref_count: usize,
        curr_offsets: &mut [i32],
    ) -> Result<usize> {
        let width = self.width;
        let mut ref_idx = 0_usize;
        let mut curr_idx = 0_usize;
        let mut bit_pos = 0_i32;
        let mut white_run = true;

        ref_offsets[ref_count] = width;
        ref_offsets[ref_count + 1] = width;
        ref_offsets[ref_count + 2] = width + 1;
        ref_offsets[ref_count + 3] = width + 1;

        let ref_at = |offsets: &[i32], idx: usize| -> i32 {
            offsets.get(idx).copied().unwrap_or(width + 1)
        };

        while bit_pos < width {
            if curr_idx > width as usize {
                return Err(DecodeError::InvalidSegment);
            }

            let Some(code) = self.next_code(&MODE_TABLE) else {
                break;
            };
            self.consume(code.bit_length);

            match code.run_length {
                MODE_PASS => {
                    ref_idx += 1;
                    bit_pos = ref_at(ref_offsets, ref_idx);
                    ref_idx += 1;
                    continue;
                }
                MODE_HORIZ => {
                    for i in 0..2 {
                        let table: &DecodeTable = if (i == 0) == white_run {
                            &WHITE_TABLE
                        } else {
                            &BLACK_TABLE
                        };

                        let mut run = 0_i32;
                        loop {
                            let code = self
                                .next_code(table)
                                .ok_or(DecodeError::InvalidSegment)?;
                            self.consume(code.bit_length);

                            if code.run_length < 0 {
                                return Err(DecodeError::InvalidSegment);
                            }
                            run += code.run_length as i32;

                            // Make-up codes (64 and longer) are followed by
                            // a terminating code.
                            if code.run_length < 64 {
                                break;
                            }
                        }

                        bit_pos += run;
                        curr_offsets[curr_idx] = bit_pos;
                        curr_idx += 1;
                    }

                    while bit_pos < width && ref_at(ref_offsets, ref_idx) <= bit_pos {
                        ref_idx += 2;
                    }
                    continue;
                }
                MODE_V0 => bit_pos = ref_at(ref_offsets, ref_idx),
                MODE_VR1 => bit_pos = ref_at(ref_offsets, ref_idx) + 1,
                MODE_VR2 => bit_pos = ref_at(ref_offsets, ref_idx) + 2,
                MODE_VR3 => bit_pos = ref_at(ref_offsets, ref_idx) + 3,
                MODE_VL1 => bit_pos = ref_at(ref_offsets, ref_idx) - 1,
                MODE_VL2 => bit_pos = ref_at(ref_offsets, ref_idx) - 2,
                MODE_VL3 => bit_pos = ref_at(ref_offsets, ref_idx) - 3,
                _ => return Err(DecodeError::InvalidSegment),
            }

            if bit_pos <= width {
                curr_offsets[curr_idx] = bit_pos;
                curr_idx += 1;
                white_run = !white_run;

                if ref_idx > 0 {
                    ref_idx -= 1;
                } else {
                    ref_idx += 1;
                }
                while bit_pos < width && ref_at(ref_offsets, ref_idx) <= bit_pos {
                    ref_idx += 2;
                }
            }
        }

        if curr_idx == 0 || curr_offsets[curr_idx - 1] != width {
            curr_offsets[curr_idx] = width;
            curr_idx += 1;
        }

        Ok(curr_idx)
    }

    /// Paint the change list as alternating white/black runs.
    fn paint_row(&self, image: &mut Image, y: i32, offsets: &[i32], count: usize) {
        let mut x = 0_i32;
        for (i, &target) in offsets[..count].iter().enumerate() {
            let value = (i % 2) as u32;
            while x < target && x < self.width {
                image.set_pixel(x, y, value);
                x += 1;
            }
        }
    }

    /// Look up the next code without consuming input.
    fn next_code(&mut self, table: &DecodeTable) -> Option<MmrCode> {
        table.lookup(self.next_code_word())
    }

    fn consume(&mut self, bits: u8) {
        self.stream.set_bit_pos(self.stream.bit_pos() + bits as usize);
    }

    /// Peek the next 24 bits, zero-padded past the end of the buffer, left
    /// in the top bits of a 32-bit word.
    fn next_code_word(&mut self) -> u32 {
        let offset = self.stream.bit_pos();

        if self.last_offset != Some(offset) {
            let mut value = 0_u32;
            let mut got = 0_u32;
            while got < PEEK_BITS {
                match self.stream.read_bit() {
                    Ok(bit) => {
                        value = (value << 1) | bit;
                        got += 1;
                    }
                    Err(_) => break,
                }
            }
            value <<= PEEK_BITS - got;
            self.stream.set_bit_pos(offset);

            self.last_code = value << 8;
            self.last_offset = Some(offset);
        }

        self.last_code
    }

    /// Consume any EOL codes that trail the encoded rows (including an EOFB
    /// pair).
    fn skip_trailing_eol(&mut self) {
        while let Some(code) = self.next_code(&MODE_TABLE) {
            if code.run_length != RUN_EOL {
                break;
            }
            self.consume(code.bit_length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8], width: u32, height: u32) -> (Image, usize) {
        let mut stream = BitStream::new(data);
        let image = MmrDecoder::new(width, height, &mut stream)
            .decode()
            .unwrap();
        (image, stream.offset())
    }

    #[test]
    fn all_white_rows_decode_from_v0_codes() {
        // Each all-white 16-pixel row is a single V0 code ('1').
        let (image, consumed) = decode(&[0b1111_0000], 16, 4);

        assert!(image.data().iter().all(|&b| b == 0));
        assert_eq!(consumed, 1);
    }

    #[test]
    fn horizontal_mode_paints_black_runs() {
        // Row 1: horizontal mode, white run 0, black run 8.
        // Row 2: two V0 codes tracking the change elements at 0 and 8.
        let (image, consumed) = decode(&[0x26, 0xA2, 0xE0], 8, 2);

        for y in 0..2 {
            for x in 0..8 {
                assert_eq!(image.pixel(x, y), 1, "({x}, {y})");
            }
        }
        assert_eq!(consumed, 3);
    }

    #[test]
    fn mixed_runs_track_the_reference_row() {
        // 2x2 image: row 0 = [0, 1] (horizontal: white 1, black 1),
        // row 1 = [1, 0] (horizontal: white 0, black 1, then V0).
        let data = [0x23, 0xA2, 0x6A, 0xA0];
        let (image, _) = decode(&data, 2, 2);

        assert_eq!(image.pixel(0, 0), 0);
        assert_eq!(image.pixel(1, 0), 1);
        assert_eq!(image.pixel(0, 1), 1);
        assert_eq!(image.pixel(1, 1), 0);
    }

    #[test]
    fn invalid_run_codes_are_rejected() {
        // A horizontal mode code followed by bits that match no white run
        // length code.
        let data = [0b0010_0000, 0b0001_0000];
        let mut stream = BitStream::new(&data[..]);
        let result = MmrDecoder::new(8, 1, &mut stream).decode();
        assert_eq!(result, Err(DecodeError::InvalidSegment));
    }
}
