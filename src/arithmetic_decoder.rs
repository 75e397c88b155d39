//! The arithmetic decoder (Annex E).
//!
//! "The arithmetic decoding procedure receives an arithmetically coded bit
//! sequence and an associated sequence of context labels, and reconstructs
//! the original string of binary symbols." (E.1.1)
//!
//! The decoder reads bytes through the shared segment [`BitStream`] cursor,
//! so the document driver can re-align the stream and continue with the next
//! segment once a coder has pulled all the bits it needs. Past the end of
//! the buffer the stream feeds 0xFF bytes, which the decoder turns into an
//! endless marker run; the `complete` flag records that this has happened.

use crate::reader::BitStream;

/// Arithmetic decoder context (E.2.4).
///
/// "Each context has associated with it an index, I(CX), which identifies a
/// particular probability estimate and its associated MPS value." (E.2.4)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ArithContext {
    /// "I(CX) - Index for context CX"
    index: u8,
    /// "MPS(CX) - The sense of MPS for context CX"
    mps: bool,
}

impl ArithContext {
    #[inline(always)]
    fn mps(&self) -> u32 {
        u32::from(self.mps)
    }

    /// The MPS path of the conditional exchange (E.3.2, Figure E.16).
    #[inline(always)]
    fn next_mps(&mut self, qe: &Qe) -> u32 {
        self.index = qe.nmps;
        self.mps()
    }

    /// The LPS path of the conditional exchange (E.3.2, Figure E.17).
    #[inline(always)]
    fn next_lps(&mut self, qe: &Qe) -> u32 {
        let d = u32::from(!self.mps);

        // "SWITCH(I(CX)) = 1?" -> "MPS(CX) = 1 - MPS(CX)"
        if qe.switch {
            self.mps = !self.mps;
        }
        self.index = qe.nlps;

        d
    }
}

/// The arithmetic decoder state (E.3).
///
/// "State variables used by the arithmetic decoder procedures are described
/// in Table E.1." (E.3.1)
pub(crate) struct ArithDecoder<'s, 'a> {
    stream: &'s mut BitStream<'a>,
    /// "B - The byte pointed to by BP"
    b: u8,
    /// "Chigh and Clow can be thought of as one 32-bit C-register" (E.3.1)
    c: u32,
    /// "A-register" (E.3.1)
    a: u32,
    /// "CT - The bit counter"
    ct: u32,
    /// Set once the byte cursor has passed the end of the data.
    complete: bool,
}

/// Initial value of the A-register (E.3.5).
const DEFAULT_A: u32 = 0x8000;

impl<'s, 'a> ArithDecoder<'s, 'a> {
    /// The INITDEC procedure (E.3.5).
    pub(crate) fn new(stream: &'s mut BitStream<'a>) -> Self {
        let b = stream.cur_byte_arith();
        let mut decoder = Self {
            stream,
            b,
            c: ((b as u32) ^ 0xFF) << 16,
            a: DEFAULT_A,
            ct: 0,
            complete: false,
        };

        decoder.byte_in();
        decoder.c <<= 7;
        decoder.ct -= 7;

        decoder
    }

    /// Whether the segment data has been exhausted. Decoding may continue on
    /// synthesised 1-bits for a while, but a coder that still needs bits once
    /// this is set treats the segment as truncated.
    #[inline(always)]
    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    /// The DECODE procedure (E.3.2): decode one bit using `cx`.
    pub(crate) fn decode(&mut self, cx: &mut ArithContext) -> u32 {
        let qe = &QE_TABLE[cx.index as usize];

        // "A = A - Qe(I(CX))"
        self.a -= qe.qe as u32;

        if (self.c >> 16) < self.a {
            // "A AND 0x8000 = 0?" - no renormalization needed on the fast
            // MPS path.
            if self.a & DEFAULT_A != 0 {
                return cx.mps();
            }

            let d = if self.a < qe.qe as u32 {
                cx.next_lps(qe)
            } else {
                cx.next_mps(qe)
            };
            self.renormalize();
            d
        } else {
            self.c -= self.a << 16;

            let d = if self.a < qe.qe as u32 {
                cx.next_mps(qe)
            } else {
                cx.next_lps(qe)
            };
            self.a = qe.qe as u32;
            self.renormalize();
            d
        }
    }

    /// The BYTEIN procedure (E.3.4).
    ///
    /// "This procedure reads in one byte of data, compensating for any stuff
    /// bits following the 0xFF byte in the process."
    fn byte_in(&mut self) {
        if self.b == 0xFF {
            let b1 = self.stream.next_byte_arith();

            // "If B1 exceeds 0x8F, then B1 must be one of the marker codes."
            if b1 > 0x8F {
                self.ct = 8;
            } else {
                self.stream.add_offset(1);
                self.b = b1;
                self.c = self
                    .c
                    .wrapping_add(0xFE00)
                    .wrapping_sub((self.b as u32) << 9);
                self.ct = 7;
            }
        } else {
            self.stream.add_offset(1);
            self.b = self.stream.cur_byte_arith();
            self.c = self
                .c
                .wrapping_add(0xFF00)
                .wrapping_sub((self.b as u32) << 8);
            self.ct = 8;
        }

        if !self.stream.in_bounds() {
            self.complete = true;
        }
    }

    /// The RENORMD procedure (E.3.3).
    ///
    /// "A counter keeps track of the number of compressed bits in the Clow
    /// section of the C-register. When CT is zero, a new byte is inserted
    /// into Clow in the BYTEIN procedure."
    #[inline(always)]
    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }

            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;

            if self.a & DEFAULT_A != 0 {
                break;
            }
        }
    }
}

/// One row of Table E.1.
#[derive(Debug, Clone, Copy)]
struct Qe {
    /// "`Qe_Value`" - the probability estimate
    qe: u16,
    /// "NMPS" - next index if MPS is coded
    nmps: u8,
    /// "NLPS" - next index if LPS is coded
    nlps: u8,
    /// "SWITCH" - MPS/LPS sense exchange
    switch: bool,
}

macro_rules! qe {
    ($($qe:expr, $nmps:expr, $nlps:expr, $switch:expr),+ $(,)?) => {
        [$(Qe { qe: $qe, nmps: $nmps, nlps: $nlps, switch: $switch }),+]
    };
}

/// "Table E.1 - Qe values and probability estimation process"
#[rustfmt::skip]
static QE_TABLE: [Qe; 47] = qe!(
    // Qe      NMPS NLPS SWITCH
    0x5601,  1,  1, true,
    0x3401,  2,  6, false,
    0x1801,  3,  9, false,
    0x0AC1,  4, 12, false,
    0x0521,  5, 29, false,
    0x0221, 38, 33, false,
    0x5601,  7,  6, true,
    0x5401,  8, 14, false,
    0x4801,  9, 14, false,
    0x3801, 10, 14, false,
    0x3001, 11, 17, false,
    0x2401, 12, 18, false,
    0x1C01, 13, 20, false,
    0x1601, 29, 21, false,
    0x5601, 15, 14, true,
    0x5401, 16, 14, false,
    0x5101, 17, 15, false,
    0x4801, 18, 16, false,
    0x3801, 19, 17, false,
    0x3401, 20, 18, false,
    0x3001, 21, 19, false,
    0x2801, 22, 19, false,
    0x2401, 23, 20, false,
    0x2201, 24, 21, false,
    0x1C01, 25, 22, false,
    0x1801, 26, 23, false,
    0x1601, 27, 24, false,
    0x1401, 28, 25, false,
    0x1201, 29, 26, false,
    0x1101, 30, 27, false,
    0x0AC1, 31, 28, false,
    0x09C1, 32, 29, false,
    0x08A1, 33, 30, false,
    0x0521, 34, 31, false,
    0x0441, 35, 32, false,
    0x02A1, 36, 33, false,
    0x0221, 37, 34, false,
    0x0141, 38, 35, false,
    0x0111, 39, 36, false,
    0x0085, 40, 37, false,
    0x0049, 41, 38, false,
    0x0025, 42, 39, false,
    0x0015, 43, 40, false,
    0x0009, 44, 41, false,
    0x0005, 45, 42, false,
    0x0001, 45, 43, false,
    0x5601, 46, 46, false,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_bits(data: &[u8], count: usize) -> Vec<u32> {
        let mut stream = BitStream::new(data);
        let mut decoder = ArithDecoder::new(&mut stream);
        let mut cx = ArithContext::default();
        (0..count).map(|_| decoder.decode(&mut cx)).collect()
    }

    #[test]
    fn same_input_decodes_to_the_same_bits() {
        let data = [0x84, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20];
        assert_eq!(decode_bits(&data, 64), decode_bits(&data, 64));
    }

    #[test]
    fn context_state_drives_the_output() {
        // Two independent contexts fed the same bytes evolve identically,
        // while a context bank in a different state diverges.
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];

        let mut stream = BitStream::new(&data[..]);
        let mut decoder = ArithDecoder::new(&mut stream);
        let mut cx = ArithContext::default();
        let first: Vec<u32> = (0..16).map(|_| decoder.decode(&mut cx)).collect();

        let again = decode_bits(&data, 16);
        assert_eq!(first, again);
    }

    #[test]
    fn empty_data_synthesises_bits_and_reports_completion() {
        let mut stream = BitStream::new(&[][..]);
        let mut decoder = ArithDecoder::new(&mut stream);
        assert!(decoder.is_complete());

        // Decoding must still terminate and produce bits from the
        // synthesised 0xFF run.
        let mut cx = ArithContext::default();
        for _ in 0..32 {
            let bit = decoder.decode(&mut cx);
            assert!(bit <= 1);
        }
    }

    #[test]
    fn completion_latches_once_the_cursor_passes_the_end() {
        let data = [0x00, 0x00];
        let mut stream = BitStream::new(&data[..]);
        let mut decoder = ArithDecoder::new(&mut stream);

        let mut cx = ArithContext::default();
        for _ in 0..256 {
            decoder.decode(&mut cx);
        }
        assert!(decoder.is_complete());
    }
}
