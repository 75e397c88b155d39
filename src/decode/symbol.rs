//! Symbol dictionary decoding (6.5).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::{ComposeOp, Image};
use crate::decode::MAX_IMAGE_SIZE;
use crate::decode::generic::GenericRegion;
use crate::decode::generic_refinement::RefinementRegion;
use crate::decode::text::{IntDecoderState, RefCorner, TextRegion};
use crate::error::{DecodeError, Result};
use crate::huffman_table::{HuffmanTable, SymbolCode, standard_table};
use crate::integer_decoder::IntDecoder;
use crate::reader::BitStream;

/// The decoded result: an ordered array of symbol bitmaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SymbolDict {
    pub(crate) images: Vec<Image>,
}

/// The symbol dictionary decoding procedure (6.5): new symbols decoded in
/// height classes, optionally by refining previously decoded symbols, then
/// exported by run-length flags.
pub(crate) struct SymbolDictionary<'r> {
    pub(crate) refagg: bool,
    pub(crate) template: u8,
    pub(crate) r_template_1: bool,
    pub(crate) num_ex_syms: u32,
    pub(crate) num_new_syms: u32,
    pub(crate) input_symbols: Vec<&'r Image>,
    pub(crate) dh_table: Option<&'r HuffmanTable>,
    pub(crate) dw_table: Option<&'r HuffmanTable>,
    pub(crate) bm_size_table: Option<&'r HuffmanTable>,
    pub(crate) agg_inst_table: Option<&'r HuffmanTable>,
    pub(crate) at: [i8; 8],
    pub(crate) r_at: [i8; 4],
}

impl<'r> SymbolDictionary<'r> {
    fn num_input_syms(&self) -> u32 {
        self.input_symbols.len() as u32
    }

    /// ⌈log2(SDNUMINSYMS + SDNUMNEWSYMS)⌉ for the shared IAID contexts.
    fn sym_code_len(&self) -> u32 {
        let total = self.num_input_syms() + self.num_new_syms;
        let mut len = 0;
        while (1_u32 << len) < total {
            len += 1;
        }
        len
    }

    fn add_dimension(current: u32, delta: i32) -> Result<u32> {
        let next = current as i64 + delta as i64;
        if next < 0 || next > MAX_IMAGE_SIZE as i64 {
            return Err(DecodeError::DimensionOverflow);
        }
        Ok(next as u32)
    }

    /// Decode with the arithmetic coder (SDHUFF = 0).
    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gb_contexts: &mut [ArithContext],
        gr_contexts: &mut [ArithContext],
    ) -> Result<SymbolDict> {
        let mut iadh = IntDecoder::new();
        let mut iadw = IntDecoder::new();
        let mut iaai = IntDecoder::new();
        let mut iaex = IntDecoder::new();
        // Shared with nested text region invocations during aggregation.
        let mut text_state = IntDecoderState::new(self.sym_code_len());

        let mut new_symbols: Vec<Image> = Vec::with_capacity(self.num_new_syms as usize);
        let mut height: u32 = 0;

        while (new_symbols.len() as u32) < self.num_new_syms {
            let delta_height = iadh.decode(decoder).ok_or(DecodeError::InvalidSegment)?;
            height = Self::add_dimension(height, delta_height)?;

            let mut width: u32 = 0;

            // "If the result of this decoding is OOB then all the symbols in
            // this height class have been decoded." (6.5.5)
            while let Some(delta_width) = iadw.decode(decoder) {
                if new_symbols.len() as u32 >= self.num_new_syms {
                    return Err(DecodeError::InvalidSegment);
                }
                width = Self::add_dimension(width, delta_width)?;

                if height == 0 || width == 0 {
                    new_symbols.push(Image::new(width, height));
                    continue;
                }

                let symbol = if !self.refagg {
                    let mut region = GenericRegion::new(width, height);
                    region.template = self.template;
                    region.at = self.at;
                    region.decode_arith(decoder, gb_contexts)?
                } else {
                    let instances = iaai.decode(decoder).ok_or(DecodeError::InvalidSegment)?;

                    if instances == 1 {
                        self.refine_one_arith(
                            decoder,
                            gr_contexts,
                            &mut text_state,
                            &new_symbols,
                            width,
                            height,
                        )?
                    } else if instances > 1 {
                        self.aggregate_arith(
                            decoder,
                            gr_contexts,
                            &mut text_state,
                            &new_symbols,
                            width,
                            height,
                            instances as u32,
                        )?
                    } else {
                        return Err(DecodeError::InvalidSegment);
                    }
                };

                new_symbols.push(symbol);
            }
        }

        let total = self.num_input_syms() + self.num_new_syms;
        let flags = self.export_flags(total, || Ok(iaex.decode(decoder)))?;
        self.collect_exported(new_symbols, &flags)
    }

    /// Refine a single previously decoded symbol (6.5.8.2.2, arithmetic).
    fn refine_one_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gr_contexts: &mut [ArithContext],
        state: &mut IntDecoderState,
        new_symbols: &[Image],
        width: u32,
        height: u32,
    ) -> Result<Image> {
        let id = state.iaid.decode(decoder) as usize;
        let reference = self.referenced_symbol(new_symbols, id)?;

        let rdx = state
            .iardx
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;
        let rdy = state
            .iardy
            .decode(decoder)
            .ok_or(DecodeError::InvalidSegment)?;

        let refinement = RefinementRegion {
            template_1: self.r_template_1,
            tpgron: false,
            width,
            height,
            reference,
            dx: rdx,
            dy: rdy,
            at: self.r_at,
        };

        refinement.decode(decoder, gr_contexts)
    }

    /// Decode an aggregate of several instances through a nested text
    /// region (6.5.8.2, Table 17).
    #[allow(clippy::too_many_arguments)]
    fn aggregate_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gr_contexts: &mut [ArithContext],
        state: &mut IntDecoderState,
        new_symbols: &[Image],
        width: u32,
        height: u32,
        instances: u32,
    ) -> Result<Image> {
        let mut symbols: Vec<&Image> =
            Vec::with_capacity(self.input_symbols.len() + new_symbols.len());
        symbols.extend(self.input_symbols.iter().copied());
        symbols.extend(new_symbols.iter());

        let region = TextRegion {
            refine: true,
            r_template_1: self.r_template_1,
            transposed: false,
            def_pixel: false,
            ds_offset: 0,
            width,
            height,
            num_instances: instances,
            strips: 1,
            ref_corner: RefCorner::TopLeft,
            combine_op: ComposeOp::Or,
            symbols,
            symbol_codes: Vec::new(),
            fs_table: None,
            ds_table: None,
            dt_table: None,
            rdw_table: None,
            rdh_table: None,
            rdx_table: None,
            rdy_table: None,
            rsize_table: None,
            r_at: self.r_at,
        };

        region.decode_arith(decoder, gr_contexts, state)
    }

    /// Decode with Huffman coding (SDHUFF = 1).
    pub(crate) fn decode_huffman(
        &self,
        stream: &mut BitStream<'_>,
        gr_contexts: &mut [ArithContext],
    ) -> Result<SymbolDict> {
        let dh_table = self.dh_table.ok_or(DecodeError::LogicError)?;
        let dw_table = self.dw_table.ok_or(DecodeError::LogicError)?;

        let mut new_symbols: Vec<Image> = Vec::with_capacity(self.num_new_syms as usize);
        let mut widths: Vec<u32> = Vec::with_capacity(self.num_new_syms as usize);
        let mut height: u32 = 0;

        while (new_symbols.len() as u32) < self.num_new_syms {
            let delta_height = dh_table.decode_no_oob(stream)?;
            height = Self::add_dimension(height, delta_height)?;

            let mut width: u32 = 0;
            let mut total_width: u32 = 0;
            let class_first = new_symbols.len();

            while let Some(delta_width) = dw_table.decode(stream)? {
                if new_symbols.len() as u32 >= self.num_new_syms {
                    return Err(DecodeError::InvalidSegment);
                }
                width = Self::add_dimension(width, delta_width)?;
                total_width = total_width
                    .checked_add(width)
                    .ok_or(DecodeError::DimensionOverflow)?;

                if self.refagg {
                    if height == 0 || width == 0 {
                        new_symbols.push(Image::new(width, height));
                        continue;
                    }
                    let symbol =
                        self.refine_huffman(stream, gr_contexts, &new_symbols, width, height)?;
                    new_symbols.push(symbol);
                } else {
                    // Widths only; the symbols are sliced out of the height
                    // class collective bitmap afterwards (6.5.9).
                    widths.push(width);
                    new_symbols.push(Image::new(0, 0));
                }
            }

            if !self.refagg {
                self.decode_collective_bitmap(
                    stream,
                    &mut new_symbols,
                    &widths,
                    class_first,
                    total_width,
                    height,
                )?;
            }
        }

        let table_b1 = standard_table(1);
        let total = self.num_input_syms() + self.num_new_syms;
        let flags = self.export_flags(total, || table_b1.decode(stream))?;
        self.collect_exported(new_symbols, &flags)
    }

    /// Decode one refined or aggregated symbol in Huffman mode (6.5.8.2).
    fn refine_huffman(
        &self,
        stream: &mut BitStream<'_>,
        gr_contexts: &mut [ArithContext],
        new_symbols: &[Image],
        width: u32,
        height: u32,
    ) -> Result<Image> {
        let agg_table = self.agg_inst_table.ok_or(DecodeError::LogicError)?;
        let instances = agg_table.decode_no_oob(stream)?;

        if instances == 1 {
            let total = self.num_input_syms() as usize + new_symbols.len();
            let code_len = huffman_sym_code_len(total as u32);

            let id = stream.read_bits(code_len)? as usize;
            let reference = self.referenced_symbol(new_symbols, id)?;

            let rdx = standard_table(15).decode_no_oob(stream)?;
            let rdy = standard_table(15).decode_no_oob(stream)?;
            let _size = standard_table(1).decode_no_oob(stream)?;
            stream.align();

            let refinement = RefinementRegion {
                template_1: self.r_template_1,
                tpgron: false,
                width,
                height,
                reference,
                dx: rdx,
                dy: rdy,
                at: self.r_at,
            };

            let mut decoder = ArithDecoder::new(stream);
            let image = refinement.decode(&mut decoder, gr_contexts)?;
            drop(decoder);

            stream.align();
            stream.add_offset(2);

            Ok(image)
        } else if instances > 1 {
            self.aggregate_huffman(stream, gr_contexts, new_symbols, width, height, instances as u32)
        } else {
            Err(DecodeError::InvalidSegment)
        }
    }

    /// Huffman-mode aggregation: symbol codes are fixed-width, Table 17
    /// supplies the standard tables.
    fn aggregate_huffman(
        &self,
        stream: &mut BitStream<'_>,
        gr_contexts: &mut [ArithContext],
        new_symbols: &[Image],
        width: u32,
        height: u32,
        instances: u32,
    ) -> Result<Image> {
        let mut symbols: Vec<&Image> =
            Vec::with_capacity(self.input_symbols.len() + new_symbols.len());
        symbols.extend(self.input_symbols.iter().copied());
        symbols.extend(new_symbols.iter());

        let code_len = huffman_sym_code_len(symbols.len() as u32);
        let symbol_codes: Vec<SymbolCode> = (0..symbols.len() as u32)
            .map(|i| SymbolCode {
                len: code_len as u8,
                code: i,
            })
            .collect();

        let region = TextRegion {
            refine: true,
            r_template_1: self.r_template_1,
            transposed: false,
            def_pixel: false,
            ds_offset: 0,
            width,
            height,
            num_instances: instances,
            strips: 1,
            ref_corner: RefCorner::TopLeft,
            combine_op: ComposeOp::Or,
            symbols,
            symbol_codes,
            fs_table: Some(standard_table(6)),
            ds_table: Some(standard_table(8)),
            dt_table: Some(standard_table(11)),
            rdw_table: Some(standard_table(15)),
            rdh_table: Some(standard_table(15)),
            rdx_table: Some(standard_table(15)),
            rdy_table: Some(standard_table(15)),
            rsize_table: Some(standard_table(1)),
            r_at: self.r_at,
        };

        region.decode_huffman(stream, gr_contexts)
    }

    /// Decode the height class collective bitmap and slice it into the
    /// class's symbols (6.5.9).
    fn decode_collective_bitmap(
        &self,
        stream: &mut BitStream<'_>,
        new_symbols: &mut [Image],
        widths: &[u32],
        class_first: usize,
        total_width: u32,
        height: u32,
    ) -> Result<()> {
        let bm_size_table = self.bm_size_table.ok_or(DecodeError::LogicError)?;
        let bm_size = bm_size_table.decode_no_oob(stream)?;
        if bm_size < 0 {
            return Err(DecodeError::InvalidSegment);
        }

        // "Skip over any bits remaining in the last byte read."
        stream.align();

        if total_width > MAX_IMAGE_SIZE || height > MAX_IMAGE_SIZE {
            return Err(DecodeError::DimensionOverflow);
        }

        let collective = if bm_size == 0 {
            // "The bitmap is stored uncompressed", packed rows at a stride
            // of ⌈TOTWIDTH/8⌉ bytes.
            let row_bytes = total_width.div_ceil(8);
            let mut bitmap = Image::new(total_width, height);

            for y in 0..height {
                for byte_x in 0..row_bytes {
                    let byte = stream.read_byte()?;
                    for bit in 0..8 {
                        let x = byte_x * 8 + bit;
                        if x < total_width && (byte >> (7 - bit)) & 1 != 0 {
                            bitmap.set_pixel(x as i32, y as i32, 1);
                        }
                    }
                }
            }

            bitmap
        } else {
            // MMR-coded collective bitmap of the declared size.
            let start = stream.offset();
            let mut region = GenericRegion::new(total_width, height);
            region.mmr = true;
            let bitmap = region.decode_mmr(stream)?;
            stream.set_offset(start + bm_size as usize);
            bitmap
        };

        // "B_HC contains the symbols concatenated left-to-right, with no
        // intervening gaps."
        let mut x_offset: u32 = 0;
        for (i, symbol) in new_symbols[class_first..].iter_mut().enumerate() {
            let width = widths[class_first + i];
            *symbol = collective.sub_image(x_offset as i32, 0, width, height);
            x_offset += width;
        }

        Ok(())
    }

    fn referenced_symbol<'s>(&'s self, new_symbols: &'s [Image], id: usize) -> Result<&'s Image> {
        let num_input = self.input_symbols.len();
        if id < num_input {
            Ok(self.input_symbols[id])
        } else {
            new_symbols
                .get(id - num_input)
                .ok_or(DecodeError::LogicError)
        }
    }
}

/// ⌈log2(total)⌉ with a minimum of one bit, as Huffman-coded symbol IDs use
/// at least one bit.
fn huffman_sym_code_len(total: u32) -> u32 {
    let mut len = 1;
    while (1_u32 << len) < total {
        len += 1;
    }
    len
}

impl<'r> SymbolDictionary<'r> {
    /// Read the export flag runs and assemble the exported symbol array
    /// (6.5.10). Exported input symbols are deep copies so later segments
    /// can mutate their dictionaries independently.
    fn export_flags<F>(&self, total: u32, mut read_run: F) -> Result<Vec<bool>>
    where
        F: FnMut() -> Result<Option<i32>>,
    {
        let mut flags = vec![false; total as usize];
        let mut index: u32 = 0;
        let mut current = false;

        while index < total {
            let run = read_run()?.ok_or(DecodeError::InvalidSegment)?;
            if run < 0 || index as u64 + run as u64 > total as u64 {
                return Err(DecodeError::InvalidSegment);
            }

            for flag in flags.iter_mut().skip(index as usize).take(run as usize) {
                *flag = current;
            }

            index += run as u32;
            current = !current;
        }

        Ok(flags)
    }

    fn collect_exported(&self, new_symbols: Vec<Image>, flags: &[bool]) -> Result<SymbolDict> {
        let num_input = self.input_symbols.len();
        let mut images = Vec::with_capacity(self.num_ex_syms as usize);

        for (i, _) in flags.iter().enumerate().filter(|&(_, &flag)| flag) {
            if i < num_input {
                images.push(self.input_symbols[i].clone());
            } else {
                images.push(new_symbols[i - num_input].clone());
            }
        }

        if images.len() as u32 != self.num_ex_syms {
            return Err(DecodeError::InvalidSegment);
        }

        Ok(SymbolDict { images })
    }
}
