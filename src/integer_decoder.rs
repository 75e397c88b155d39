//! Arithmetic integer and symbol-ID decoding procedures (Annex A).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};

/// Prefix selection table of Figure A.1: number of magnitude bits to read
/// and the base value they are added to.
const PREFIX_RANGES: [(u32, i32); 6] = [(2, 0), (4, 4), (6, 20), (8, 84), (12, 340), (32, 4436)];

/// Integer arithmetic decoder (A.2).
///
/// "An invocation of an arithmetic integer decoding procedure involves
/// decoding a sequence of bits, where each bit is decoded using a context
/// formed by the bits decoded previously in this invocation." (A.1)
pub(crate) struct IntDecoder {
    /// "Each arithmetic integer decoding procedure requires 512 bytes of
    /// storage for its context memory." (A.2)
    contexts: Vec<ArithContext>,
}

impl IntDecoder {
    pub(crate) fn new() -> Self {
        Self {
            contexts: vec![ArithContext::default(); 512],
        }
    }

    /// Decode one signed integer. Returns `None` for the out-of-band value.
    ///
    /// "The result of the integer arithmetic decoding procedure is equal to:
    /// V if S = 0; -V if S = 1 and V > 0; OOB if S = 1 and V = 0" (A.2)
    pub(crate) fn decode(&mut self, decoder: &mut ArithDecoder<'_, '_>) -> Option<i32> {
        let mut prev: u32 = 1;

        let s = self.decode_bit(decoder, &mut prev);

        // Walk the prefix tree: the first 0 bit selects the range row.
        let mut row = 0;
        while row < PREFIX_RANGES.len() - 1 {
            if self.decode_bit(decoder, &mut prev) == 0 {
                break;
            }
            row += 1;
        }

        let (bits, base) = PREFIX_RANGES[row];
        let mut magnitude: u32 = 0;
        for _ in 0..bits {
            magnitude = (magnitude << 1) | self.decode_bit(decoder, &mut prev);
        }

        let value = base.wrapping_add(magnitude as i32);
        match (s, value) {
            (0, v) => Some(v),
            (_, 0) => None,
            (_, v) => Some(-v),
        }
    }

    /// Decode one bit and fold it into PREV.
    ///
    /// "PREV always contains the values of the eight most-recently-decoded
    /// bits, plus a leading 1 bit, which is used to indicate the number of
    /// bits decoded so far." (A.2)
    #[inline(always)]
    fn decode_bit(&mut self, decoder: &mut ArithDecoder<'_, '_>, prev: &mut u32) -> u32 {
        let d = decoder.decode(&mut self.contexts[(*prev & 0x1FF) as usize]);

        *prev = if *prev < 256 {
            (*prev << 1) | d
        } else {
            (((*prev << 1) | d) & 511) | 256
        };

        d
    }
}

/// Symbol-ID decoder (A.3), reading exactly SBSYMCODELEN bits.
pub(crate) struct IaidDecoder {
    contexts: Vec<ArithContext>,
    code_len: u32,
}

impl IaidDecoder {
    pub(crate) fn new(code_len: u32) -> Self {
        // "The number of contexts required is 2^SBSYMCODELEN." (A.3)
        Self {
            contexts: vec![ArithContext::default(); 1 << code_len],
            code_len,
        }
    }

    pub(crate) fn decode(&mut self, decoder: &mut ArithDecoder<'_, '_>) -> u32 {
        let mut prev: u32 = 1;

        for _ in 0..self.code_len {
            let d = decoder.decode(&mut self.contexts[prev as usize]);
            prev = (prev << 1) | d;
        }

        prev - (1 << self.code_len)
    }
}
