//! Text region decoding (6.4).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::{ComposeOp, Image};
use crate::decode::MAX_IMAGE_SIZE;
use crate::decode::generic_refinement::RefinementRegion;
use crate::error::{DecodeError, Result};
use crate::huffman_table::{HuffmanTable, SymbolCode, assign_symbol_codes};
use crate::integer_decoder::{IaidDecoder, IntDecoder};
use crate::reader::BitStream;

/// "The reference corner is the corner of the symbol that the coordinates
/// refer to." (7.4.3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefCorner {
    BottomLeft,
    TopLeft,
    BottomRight,
    TopRight,
}

impl RefCorner {
    pub(crate) fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::BottomLeft,
            1 => Self::TopLeft,
            2 => Self::BottomRight,
            _ => Self::TopRight,
        }
    }
}

/// The integer decoding contexts a text region needs. A symbol dictionary
/// performing refinement/aggregation shares one instance across all nested
/// invocations.
pub(crate) struct IntDecoderState {
    pub(crate) iadt: IntDecoder,
    pub(crate) iafs: IntDecoder,
    pub(crate) iads: IntDecoder,
    pub(crate) iait: IntDecoder,
    pub(crate) iari: IntDecoder,
    pub(crate) iardw: IntDecoder,
    pub(crate) iardh: IntDecoder,
    pub(crate) iardx: IntDecoder,
    pub(crate) iardy: IntDecoder,
    pub(crate) iaid: IaidDecoder,
}

impl IntDecoderState {
    pub(crate) fn new(sym_code_len: u32) -> Self {
        Self {
            iadt: IntDecoder::new(),
            iafs: IntDecoder::new(),
            iads: IntDecoder::new(),
            iait: IntDecoder::new(),
            iari: IntDecoder::new(),
            iardw: IntDecoder::new(),
            iardh: IntDecoder::new(),
            iardx: IntDecoder::new(),
            iardy: IntDecoder::new(),
            iaid: IaidDecoder::new(sym_code_len),
        }
    }
}

/// Paste position for one symbol instance, plus the cursor advance its
/// width or height causes.
struct ComposePosition {
    x: i32,
    y: i32,
    increment: i32,
}

/// The text region decoding procedure (6.4): symbol instances placed at
/// (S, T) strip coordinates.
pub(crate) struct TextRegion<'r> {
    pub(crate) refine: bool,
    pub(crate) r_template_1: bool,
    pub(crate) transposed: bool,
    pub(crate) def_pixel: bool,
    pub(crate) ds_offset: i8,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) num_instances: u32,
    pub(crate) strips: u32,
    pub(crate) ref_corner: RefCorner,
    pub(crate) combine_op: ComposeOp,
    pub(crate) symbols: Vec<&'r Image>,
    /// Huffman mode only: a prefix code per symbol.
    pub(crate) symbol_codes: Vec<SymbolCode>,
    pub(crate) fs_table: Option<&'r HuffmanTable>,
    pub(crate) ds_table: Option<&'r HuffmanTable>,
    pub(crate) dt_table: Option<&'r HuffmanTable>,
    pub(crate) rdw_table: Option<&'r HuffmanTable>,
    pub(crate) rdh_table: Option<&'r HuffmanTable>,
    pub(crate) rdx_table: Option<&'r HuffmanTable>,
    pub(crate) rdy_table: Option<&'r HuffmanTable>,
    pub(crate) rsize_table: Option<&'r HuffmanTable>,
    pub(crate) r_at: [i8; 4],
}

impl<'r> TextRegion<'r> {
    fn compose_position(&self, si: i32, ti: i32, wi: u32, hi: u32) -> ComposePosition {
        let (wi, hi) = (wi as i32, hi as i32);

        if !self.transposed {
            let (x, y) = match self.ref_corner {
                RefCorner::TopLeft => (si, ti),
                RefCorner::TopRight => (si - wi + 1, ti),
                RefCorner::BottomLeft => (si, ti - hi + 1),
                RefCorner::BottomRight => (si - wi + 1, ti - hi + 1),
            };
            ComposePosition {
                x,
                y,
                increment: wi - 1,
            }
        } else {
            // In transposed mode T is the horizontal coordinate and S the
            // vertical one; the named corner of the instance sits at
            // (TI, CURS).
            let (x, y) = match self.ref_corner {
                RefCorner::TopLeft => (ti, si),
                RefCorner::TopRight => (ti - wi + 1, si),
                RefCorner::BottomLeft => (ti, si - hi + 1),
                RefCorner::BottomRight => (ti - wi + 1, si - hi + 1),
            };
            ComposePosition {
                x,
                y,
                increment: hi - 1,
            }
        }
    }

    /// "Right" reference corners advance the S cursor by the instance width
    /// (or height, when transposed) before the corner is applied.
    fn pre_advance(&self, wi: u32, hi: u32) -> i64 {
        if !self.transposed
            && matches!(self.ref_corner, RefCorner::TopRight | RefCorner::BottomRight)
        {
            wi as i64 - 1
        } else if self.transposed
            && matches!(
                self.ref_corner,
                RefCorner::BottomLeft | RefCorner::BottomRight
            )
        {
            hi as i64 - 1
        } else {
            0
        }
    }

    fn canvas(&self) -> Result<Image> {
        if self.width > MAX_IMAGE_SIZE || self.height > MAX_IMAGE_SIZE {
            return Err(DecodeError::DimensionOverflow);
        }

        let mut region = Image::new(self.width, self.height);
        if self.def_pixel {
            region.fill(true);
        }
        Ok(region)
    }

    /// Decode the region with the arithmetic coder (6.4, SBHUFF = 0).
    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gr_contexts: &mut [ArithContext],
        state: &mut IntDecoderState,
    ) -> Result<Image> {
        let mut region = self.canvas()?;

        let initial = state
            .iadt
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;
        let mut strip_t = -(initial as i64 * self.strips as i64);
        let mut first_s = 0_i64;
        let mut instances = 0_u32;

        while instances < self.num_instances {
            let delta_t = state
                .iadt
                .decode(decoder)
                .ok_or(DecodeError::InvalidSegment)?;
            strip_t += delta_t as i64 * self.strips as i64;

            let mut first = true;
            let mut cur_s = 0_i64;

            loop {
                if first {
                    let delta_fs = state
                        .iafs
                        .decode(decoder)
                        .ok_or(DecodeError::InvalidSegment)?;
                    first_s += delta_fs as i64;
                    cur_s = first_s;
                    first = false;
                } else {
                    let Some(delta_s) = state.iads.decode(decoder) else {
                        // OOB ends the strip.
                        break;
                    };
                    cur_s += delta_s as i64 + self.ds_offset as i64;
                }

                if instances >= self.num_instances {
                    break;
                }

                let cur_t = if self.strips == 1 {
                    0
                } else {
                    state
                        .iait
                        .decode(decoder)
                        .ok_or(DecodeError::InvalidSegment)?
                };
                let ti = strip_t + cur_t as i64;

                let id = state.iaid.decode(decoder) as usize;
                if id >= self.symbols.len() {
                    return Err(DecodeError::LogicError);
                }

                let refined = if self.refine
                    && state
                        .iari
                        .decode(decoder)
                        .ok_or(DecodeError::InvalidSegment)?
                        != 0
                {
                    Some(self.refine_arith(decoder, gr_contexts, state, id)?)
                } else {
                    None
                };

                let instance: &Image = refined.as_ref().unwrap_or(self.symbols[id]);
                self.place(&mut region, instance, &mut cur_s, ti, true)?;
                instances += 1;
            }
        }

        Ok(region)
    }

    /// Decode the region with Huffman coding (6.4, SBHUFF = 1).
    pub(crate) fn decode_huffman(
        &self,
        stream: &mut BitStream<'_>,
        gr_contexts: &mut [ArithContext],
    ) -> Result<Image> {
        let mut region = self.canvas()?;

        let dt_table = self.dt_table.ok_or(DecodeError::LogicError)?;
        let fs_table = self.fs_table.ok_or(DecodeError::LogicError)?;
        let ds_table = self.ds_table.ok_or(DecodeError::LogicError)?;

        let initial = dt_table.decode_no_oob(stream)?;
        let mut strip_t = -(initial as i64 * self.strips as i64);
        let mut first_s = 0_i64;
        let mut instances = 0_u32;

        while instances < self.num_instances {
            let delta_t = dt_table.decode_no_oob(stream)?;
            strip_t += delta_t as i64 * self.strips as i64;

            let mut first = true;
            let mut cur_s = 0_i64;

            loop {
                if first {
                    first_s += fs_table.decode_no_oob(stream)? as i64;
                    cur_s = first_s;
                    first = false;
                } else {
                    match ds_table.decode(stream)? {
                        None => break,
                        Some(delta_s) => cur_s += delta_s as i64 + self.ds_offset as i64,
                    }
                }

                if instances >= self.num_instances {
                    break;
                }

                let cur_t = if self.strips == 1 {
                    0
                } else {
                    stream.read_bits(log2_strips(self.strips))? as i32
                };
                let ti = strip_t + cur_t as i64;

                let id = self.read_symbol_id(stream)?;
                if id >= self.symbols.len() {
                    return Err(DecodeError::LogicError);
                }

                let refined = if self.refine && stream.read_bit_bool()? {
                    Some(self.refine_huffman(stream, gr_contexts, id)?)
                } else {
                    None
                };

                let instance: &Image = refined.as_ref().unwrap_or(self.symbols[id]);
                self.place(&mut region, instance, &mut cur_s, ti, false)?;
                instances += 1;
            }
        }

        Ok(region)
    }

    /// Paste one instance and advance the S cursor.
    ///
    /// The Huffman path adds the WI − 1 (or HI − 1) advance unconditionally
    /// per 6.4.5; the arithmetic path does not move the cursor backwards
    /// for an empty instance.
    fn place(
        &self,
        region: &mut Image,
        instance: &Image,
        cur_s: &mut i64,
        ti: i64,
        guard_increment: bool,
    ) -> Result<()> {
        let (wi, hi) = (instance.width(), instance.height());

        *cur_s += self.pre_advance(wi, hi);

        let si = i32::try_from(*cur_s).map_err(|_| DecodeError::DimensionOverflow)?;
        let ti = i32::try_from(ti).map_err(|_| DecodeError::DimensionOverflow)?;

        let pos = self.compose_position(si, ti, wi, hi);
        region.compose(instance, pos.x, pos.y, self.combine_op);

        if !guard_increment || pos.increment > 0 {
            *cur_s += pos.increment as i64;
        }

        Ok(())
    }

    /// Refine a symbol instance, arithmetic mode (6.4.11, steps 5-7).
    fn refine_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gr_contexts: &mut [ArithContext],
        state: &mut IntDecoderState,
        id: usize,
    ) -> Result<Image> {
        let rdw = state
            .iardw
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;
        let rdh = state
            .iardh
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;
        let rdx = state
            .iardx
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;
        let rdy = state
            .iardy
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;

        let reference = self.symbols[id];
        let (width, height) = refined_dimensions(reference, rdw, rdh)?;

        let refinement = RefinementRegion {
            template_1: self.r_template_1,
            tpgron: false,
            width,
            height,
            reference,
            dx: refined_shift(rdw, 1, rdx)?,
            dy: refined_shift(rdh, 1, rdy)?,
            at: self.r_at,
        };

        refinement.decode(decoder, gr_contexts)
    }

    /// Refine a symbol instance, Huffman mode: the refinement data is an
    /// embedded arithmetically coded block whose size is declared up front.
    fn refine_huffman(
        &self,
        stream: &mut BitStream<'_>,
        gr_contexts: &mut [ArithContext],
        id: usize,
    ) -> Result<Image> {
        let rdw = self
            .rdw_table
            .ok_or(DecodeError::LogicError)?
            .decode_no_oob(stream)?;
        let rdh = self
            .rdh_table
            .ok_or(DecodeError::LogicError)?
            .decode_no_oob(stream)?;
        let rdx = self
            .rdx_table
            .ok_or(DecodeError::LogicError)?
            .decode_no_oob(stream)?;
        let rdy = self
            .rdy_table
            .ok_or(DecodeError::LogicError)?
            .decode_no_oob(stream)?;
        let _size = self
            .rsize_table
            .ok_or(DecodeError::LogicError)?
            .decode_no_oob(stream)?;
        stream.align();

        let reference = self.symbols[id];
        let (width, height) = refined_dimensions(reference, rdw, rdh)?;

        let refinement = RefinementRegion {
            template_1: self.r_template_1,
            tpgron: false,
            width,
            height,
            reference,
            dx: refined_shift(rdw, 2, rdx)?,
            dy: refined_shift(rdh, 2, rdy)?,
            at: self.r_at,
        };

        let mut decoder = ArithDecoder::new(stream);
        let image = refinement.decode(&mut decoder, gr_contexts)?;
        drop(decoder);

        stream.align();
        stream.add_offset(2);

        Ok(image)
    }

    /// Look up a symbol ID code bit by bit (7.4.3.1.7).
    fn read_symbol_id(&self, stream: &mut BitStream<'_>) -> Result<usize> {
        let mut accum = 0_u32;
        let mut nbits = 0_u8;

        loop {
            if nbits > 32 {
                return Err(DecodeError::InvalidSegment);
            }

            accum = (accum << 1) | stream.read_bit()?;
            nbits += 1;

            for (id, code) in self.symbol_codes.iter().enumerate() {
                if code.len == nbits && code.code == accum {
                    return Ok(id);
                }
            }
        }
    }
}

/// The reference shift of a refined instance: the delta-dimension halved
/// (quartered in Huffman mode) plus the coded offset.
fn refined_shift(delta: i32, shift: u32, offset: i32) -> Result<i32> {
    i32::try_from(offset as i64 + ((delta as i64) >> shift))
        .map_err(|_| DecodeError::DimensionOverflow)
}

/// Apply refinement deltas to a reference symbol's dimensions.
fn refined_dimensions(reference: &Image, rdw: i32, rdh: i32) -> Result<(u32, u32)> {
    let width = reference.width() as i64 + rdw as i64;
    let height = reference.height() as i64 + rdh as i64;

    if width < 0 || width > MAX_IMAGE_SIZE as i64 || height < 0 || height > MAX_IMAGE_SIZE as i64 {
        return Err(DecodeError::DimensionOverflow);
    }

    Ok((width as u32, height as u32))
}

/// ⌈log2(strips)⌉, the width of the per-instance T offset field.
fn log2_strips(strips: u32) -> u32 {
    let mut bits = 1;
    while (1 << bits) < strips {
        bits += 1;
    }
    bits
}

/// Decode the runlength-coded symbol ID code lengths (7.4.3.1.7) and assign
/// canonical codes.
pub(crate) fn decode_symbol_id_codes(
    stream: &mut BitStream<'_>,
    num_syms: u32,
) -> Result<Vec<SymbolCode>> {
    // 35 run codes, each introduced by a 4-bit length.
    let mut run_codes = [SymbolCode::default(); 35];
    for code in run_codes.iter_mut() {
        code.len = stream.read_bits(4)? as u8;
    }
    assign_symbol_codes(&mut run_codes);

    let mut lengths: Vec<u8> = Vec::with_capacity(num_syms as usize);

    while (lengths.len() as u32) < num_syms {
        // Find the next run code bit by bit.
        let mut accum = 0_u32;
        let mut nbits = 0_u8;
        let run_code = loop {
            if nbits > 32 {
                return Err(DecodeError::InvalidSegment);
            }
            accum = (accum << 1) | stream.read_bit()?;
            nbits += 1;

            if let Some(idx) = run_codes
                .iter()
                .position(|c| c.len == nbits && c.code == accum)
            {
                break idx as u32;
            }
        };

        match run_code {
            // "Codes 0 through 31 directly give the code length."
            0..=31 => lengths.push(run_code as u8),
            // "Code 32 repeats the previous code length 3 to 6 times."
            32 => {
                let previous = *lengths.last().ok_or(DecodeError::InvalidSegment)?;
                let repeat = stream.read_bits(2)? as usize + 3;
                lengths.extend(std::iter::repeat_n(previous, repeat));
            }
            // "Code 33 inserts 3 to 10 zero lengths."
            33 => {
                let repeat = stream.read_bits(3)? as usize + 3;
                lengths.extend(std::iter::repeat_n(0, repeat));
            }
            // "Code 34 inserts 11 to 138 zero lengths."
            34 => {
                let repeat = stream.read_bits(7)? as usize + 11;
                lengths.extend(std::iter::repeat_n(0, repeat));
            }
            _ => return Err(DecodeError::InvalidSegment),
        }
    }

    if lengths.len() as u32 != num_syms {
        return Err(DecodeError::InvalidSegment);
    }

    let mut codes: Vec<SymbolCode> = lengths
        .into_iter()
        .map(|len| SymbolCode { len, code: 0 })
        .collect();
    assign_symbol_codes(&mut codes);

    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_codes_expand_repeats_and_zero_runs() {
        // Run code lengths: code 1 and code 32 get 2-bit prefixes, code 33
        // gets a 1-bit prefix, all others unused. Canonical assignment gives
        // code 33 the prefix '0', then code 1 '10' and code 32 '11'.
        let mut bits: Vec<u8> = Vec::new();
        for idx in 0..35_u8 {
            let len = match idx {
                1 | 32 => 2,
                33 => 1,
                _ => 0,
            };
            bits.push(len);
        }

        // Pack the 35 4-bit fields, then: '10' (length 1), '11' + '01'
        // (repeat length 1 four more times), '0' + '000' (three zero
        // lengths).
        let mut packed = Vec::new();
        let mut accum = 0_u32;
        let mut count = 0_u32;
        let mut push_bits = |accum: &mut u32, count: &mut u32, value: u32, n: u32| {
            for i in (0..n).rev() {
                *accum = (*accum << 1) | ((value >> i) & 1);
                *count += 1;
                if *count == 8 {
                    packed.push(*accum as u8);
                    *accum = 0;
                    *count = 0;
                }
            }
        };
        for &len in &bits {
            push_bits(&mut accum, &mut count, len as u32, 4);
        }
        push_bits(&mut accum, &mut count, 0b10, 2);
        push_bits(&mut accum, &mut count, 0b11, 2);
        push_bits(&mut accum, &mut count, 0b01, 2);
        push_bits(&mut accum, &mut count, 0b0, 1);
        push_bits(&mut accum, &mut count, 0b000, 3);
        if count > 0 {
            packed.push((accum << (8 - count)) as u8);
        }

        let mut stream = BitStream::new(&packed[..]);
        let codes = decode_symbol_id_codes(&mut stream, 8).unwrap();

        let lengths: Vec<u8> = codes.iter().map(|c| c.len).collect();
        assert_eq!(lengths, [1, 1, 1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn transposed_corners_swap_the_axes() {
        let region = TextRegion {
            refine: false,
            r_template_1: false,
            transposed: true,
            def_pixel: false,
            ds_offset: 0,
            width: 16,
            height: 16,
            num_instances: 0,
            strips: 1,
            ref_corner: RefCorner::BottomLeft,
            combine_op: ComposeOp::Or,
            symbols: Vec::new(),
            symbol_codes: Vec::new(),
            fs_table: None,
            ds_table: None,
            dt_table: None,
            rdw_table: None,
            rdh_table: None,
            rdx_table: None,
            rdy_table: None,
            rsize_table: None,
            r_at: [0; 4],
        };

        // The bottom-left corner of a 3x4 instance sits at (T, S) = (7, 5).
        let pos = region.compose_position(5, 7, 3, 4);
        assert_eq!((pos.x, pos.y), (7, 2));
        assert_eq!(pos.increment, 3);
    }
}
