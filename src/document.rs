//! The segment dispatcher and page lifecycle driver (clause 8 control
//! structure).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::{ComposeOp, Image};
use crate::decode::generic::GenericRegion;
use crate::decode::generic_refinement::RefinementRegion;
use crate::decode::halftone::HalftoneRegion;
use crate::decode::pattern::PatternDictionary;
use crate::decode::symbol::SymbolDictionary;
use crate::decode::text::{IntDecoderState, RefCorner, TextRegion, decode_symbol_id_codes};
use crate::decode::{
    MAX_IMAGE_SIZE, RegionInfo, generic_context_size, read_at_pixels, refinement_context_size,
};
use crate::error::{DecodeError, Result};
use crate::huffman_table::{HuffmanTable, standard_table};
use crate::page_info::PageInfo;
use crate::reader::BitStream;
use crate::segment::{Segment, SegmentResult, kind};

/// Outcome of one `decode_sequential` pump. Failures are the `Err` branch
/// of the surrounding `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Success,
    PageCompleted,
    EndReached,
}

/// A segment stream being decoded: the byte cursor, the retained segment
/// list, and the page under construction.
pub(crate) struct Document<'a> {
    stream: BitStream<'a>,
    global: Option<Box<Document<'a>>>,
    segments: Vec<Segment>,
    pub(crate) page: Option<Image>,
    pub(crate) page_infos: Vec<PageInfo>,
    pub(crate) in_page: bool,
    data_start: usize,
    random_access: bool,
    org_mode: u8,
    grouped: bool,
}

fn ceil_log2(n: u32) -> u32 {
    let mut bits = 0;
    while (1_u32 << bits) < n {
        bits += 1;
    }
    bits
}

impl<'a> Document<'a> {
    pub(crate) fn new(
        stream: BitStream<'a>,
        global: Option<Document<'a>>,
        random_access: bool,
        org_mode: u8,
        grouped: bool,
    ) -> Self {
        Self {
            stream,
            global: global.map(Box::new),
            segments: Vec::new(),
            page: None,
            page_infos: Vec::new(),
            in_page: false,
            data_start: 0,
            random_access,
            org_mode,
            grouped,
        }
    }

    /// Find a retained segment by number, consulting the global context
    /// first.
    fn lookup<'s>(
        global: Option<&'s Document<'a>>,
        segments: &'s [Segment],
        number: u32,
    ) -> Option<&'s Segment> {
        if let Some(global) = global
            && let Some(found) = global.segments.iter().find(|s| s.number == number)
        {
            return Some(found);
        }

        segments.iter().find(|s| s.number == number)
    }

    /// Decode segments until a page completes or the stream is exhausted.
    ///
    /// Sequential organization decodes each segment's data right after its
    /// header; the grouped (random-access) organization parses all headers
    /// first and then walks the data parts in order.
    pub(crate) fn decode_sequential(&mut self) -> Result<Control> {
        if self.stream.bytes_left() == 0 {
            return Ok(Control::EndReached);
        }
        if self.grouped {
            return self.decode_grouped();
        }

        while self.stream.bytes_left() > 0 {
            let mut segment = match Segment::parse_header(
                &mut self.stream,
                self.random_access,
                self.org_mode,
            ) {
                Ok(segment) => segment,
                Err(err) => {
                    // Trailing bytes that do not form a segment header end
                    // the stream once at least one segment has decoded.
                    if self.segments.is_empty() {
                        return Err(err);
                    }
                    log::warn!("ignoring trailing bytes that are not a segment header");
                    self.stream.set_offset(self.stream.len());
                    break;
                }
            };
            self.data_start = self.stream.offset();

            if segment.data_length != 0xFFFF_FFFF
                && self.data_start + segment.data_length as usize > self.stream.len()
            {
                return Err(DecodeError::InvalidSegment);
            }

            let control = self.parse_segment_data(&mut segment)?;

            match control {
                Control::EndReached => {
                    // "If a file contains an end of file segment, it must be
                    // the last segment." (7.4.11)
                    self.stream.set_offset(self.stream.len());
                    self.segments.push(segment);
                    return Ok(Control::Success);
                }
                Control::PageCompleted => {
                    self.segments.push(segment);
                    return Ok(Control::PageCompleted);
                }
                Control::Success => {}
            }

            if segment.data_length != 0xFFFF_FFFF {
                self.stream
                    .set_offset(self.data_start + segment.data_length as usize);
            } else {
                // Unknown-length segments are consumed in place; skip their
                // four-byte row count trailer.
                self.stream.add_offset(4);
            }

            self.segments.push(segment);
        }

        Ok(Control::Success)
    }

    /// Random-access organization: all headers first, then the data parts
    /// back to back in header order.
    fn decode_grouped(&mut self) -> Result<Control> {
        let mut headers = Vec::new();

        while self.stream.bytes_left() > 0 {
            match Segment::parse_header(&mut self.stream, self.random_access, self.org_mode) {
                Ok(segment) => {
                    let end = segment.kind == kind::END_OF_FILE;
                    headers.push(segment);
                    if end {
                        break;
                    }
                }
                Err(err) => {
                    if headers.is_empty() {
                        return Err(err);
                    }
                    log::warn!("stopping header scan on unparsable bytes");
                    break;
                }
            }
        }

        let mut data_offset = self.stream.offset();

        for mut segment in headers {
            if segment.data_length == 0 {
                self.segments.push(segment);
                continue;
            }
            if segment.data_length == 0xFFFF_FFFF {
                return Err(DecodeError::InvalidSegment);
            }
            if data_offset + segment.data_length as usize > self.stream.len() {
                return Err(DecodeError::InvalidSegment);
            }

            self.stream.set_offset(data_offset);
            self.data_start = data_offset;
            segment.data_offset = data_offset;

            self.parse_segment_data(&mut segment)?;

            data_offset += segment.data_length as usize;
            self.segments.push(segment);
        }

        self.stream.set_offset(self.stream.len());
        Ok(Control::Success)
    }

    /// Walk segment headers, skipping data parts, until the first page
    /// information segment, and report its declared dimensions. Consumes
    /// the stream.
    pub(crate) fn scan_page_info(&mut self) -> Result<(u32, u32)> {
        if self.grouped {
            let mut headers = Vec::new();
            while self.stream.bytes_left() > 0 {
                let Ok(segment) =
                    Segment::parse_header(&mut self.stream, self.random_access, self.org_mode)
                else {
                    break;
                };
                let end = segment.kind == kind::END_OF_FILE;
                headers.push(segment);
                if end {
                    break;
                }
            }

            let mut data_offset = self.stream.offset();
            for segment in headers {
                if segment.kind == kind::PAGE_INFORMATION {
                    self.stream.set_offset(data_offset);
                    let info = PageInfo::parse(&mut self.stream)?;
                    return Ok((info.width, info.height));
                }
                if segment.data_length == 0xFFFF_FFFF {
                    return Err(DecodeError::LogicError);
                }
                data_offset += segment.data_length as usize;
            }

            return Err(DecodeError::LogicError);
        }

        while self.stream.bytes_left() > 0 {
            let Ok(segment) =
                Segment::parse_header(&mut self.stream, self.random_access, self.org_mode)
            else {
                break;
            };

            if segment.kind == kind::PAGE_INFORMATION {
                let info = PageInfo::parse(&mut self.stream)?;
                return Ok((info.width, info.height));
            }
            if segment.kind == kind::END_OF_FILE {
                break;
            }
            if segment.data_length == 0xFFFF_FFFF {
                return Err(DecodeError::LogicError);
            }
            self.stream
                .set_offset(segment.data_offset + segment.data_length as usize);
        }

        Err(DecodeError::LogicError)
    }

    /// Decode one segment's data part, dispatched on its type.
    fn parse_segment_data(&mut self, segment: &mut Segment) -> Result<Control> {
        log::trace!(
            "segment {} type {} page {} length {}",
            segment.number,
            segment.kind,
            segment.page_association,
            segment.data_length
        );

        match segment.kind {
            kind::SYMBOL_DICTIONARY => self.parse_symbol_dict(segment)?,
            kind::INTERMEDIATE_TEXT_REGION
            | kind::IMMEDIATE_TEXT_REGION
            | kind::IMMEDIATE_LOSSLESS_TEXT_REGION => {
                self.require_page()?;
                self.parse_text_region(segment)?;
            }
            kind::PATTERN_DICTIONARY => self.parse_pattern_dict(segment)?,
            kind::INTERMEDIATE_HALFTONE_REGION
            | kind::IMMEDIATE_HALFTONE_REGION
            | kind::IMMEDIATE_LOSSLESS_HALFTONE_REGION => {
                self.require_page()?;
                self.parse_halftone_region(segment)?;
            }
            kind::INTERMEDIATE_GENERIC_REGION
            | kind::IMMEDIATE_GENERIC_REGION
            | kind::IMMEDIATE_LOSSLESS_GENERIC_REGION => {
                self.require_page()?;
                self.parse_generic_region(segment)?;
            }
            kind::INTERMEDIATE_REFINEMENT_REGION
            | kind::IMMEDIATE_REFINEMENT_REGION
            | kind::IMMEDIATE_LOSSLESS_REFINEMENT_REGION => {
                self.require_page()?;
                self.parse_refinement_region(segment)?;
            }
            kind::PAGE_INFORMATION => self.parse_page_info(segment)?,
            kind::END_OF_PAGE => {
                self.in_page = false;
                return Ok(Control::PageCompleted);
            }
            kind::END_OF_STRIPE => {}
            kind::END_OF_FILE => return Ok(Control::EndReached),
            kind::PROFILES | kind::EXTENSION => {}
            kind::TABLES => self.parse_table(segment)?,
            other => {
                log::warn!("skipping segment of unhandled type {other}");
            }
        }

        Ok(Control::Success)
    }

    fn require_page(&self) -> Result<()> {
        if !self.in_page {
            return Err(DecodeError::LogicError);
        }
        Ok(())
    }

    /// Drop the heavy decode results of every segment bound to a released
    /// page. The segments keep their identity so that lookups from global
    /// segments still resolve.
    pub(crate) fn release_page_segments(&mut self, page_number: u32) {
        for segment in &mut self.segments {
            if segment.page_association == page_number {
                segment.result = SegmentResult::None;
                segment.gb_contexts = Vec::new();
                segment.gr_contexts = Vec::new();
            }
        }
    }

    /// Compose a decoded region bitmap onto the page, growing a striped
    /// page first if the region hangs below its current bottom edge.
    fn compose_onto_page(&mut self, info: &RegionInfo, offset: (i32, i32), image: &Image) {
        if let Some(page_info) = self.page_infos.last()
            && page_info.is_striped
            && let Some(page) = &mut self.page
        {
            let bottom = (info.y as i64 + info.height as i64).clamp(0, MAX_IMAGE_SIZE as i64);
            if bottom as u32 > page.height() {
                page.expand(bottom as u32, page_info.default_pixel);
            }
        }

        if let Some(page) = &mut self.page {
            page.compose(image, info.x + offset.0, info.y + offset.1, info.compose_op());
        }
    }

    /// Page information (7.4.8): allocate the page bitmap.
    fn parse_page_info(&mut self, _segment: &mut Segment) -> Result<()> {
        let info = PageInfo::parse(&mut self.stream)?;

        // An unknown height means the page is striped; it starts out at the
        // maximum stripe size and grows as stripes arrive.
        let height = if info.height == 0xFFFF_FFFF {
            info.max_stripe_size as u32
        } else {
            info.height
        };

        if info.width == 0 || height == 0 {
            return Err(DecodeError::InvalidSegment);
        }
        if info.width > MAX_IMAGE_SIZE || height > MAX_IMAGE_SIZE {
            return Err(DecodeError::DimensionOverflow);
        }

        let mut page = Image::new(info.width, height);
        if info.default_pixel {
            page.fill(true);
        }

        self.page = Some(page);
        self.page_infos.push(info);
        self.in_page = true;

        Ok(())
    }

    /// Tables segment (7.4.13): a user-defined Huffman table.
    fn parse_table(&mut self, segment: &mut Segment) -> Result<()> {
        let table = HuffmanTable::from_stream(&mut self.stream)?;
        self.stream.align();
        segment.result = SegmentResult::Table(table);
        Ok(())
    }

    /// Generic region segments (7.4.6).
    fn parse_generic_region(&mut self, segment: &mut Segment) -> Result<()> {
        let info = RegionInfo::parse(&mut self.stream)?;
        info.check_dimensions()?;

        let flags = self.stream.read_byte()?;

        let mut region = GenericRegion::new(info.width, info.height);
        region.mmr = flags & 0x01 != 0;
        region.template = (flags >> 1) & 0x03;
        region.tpgdon = flags & 0x08 != 0;

        if !region.mmr {
            let at_bytes = if region.template == 0 { 8 } else { 2 };
            read_at_pixels(&mut self.stream, &mut region.at, at_bytes)?;
        }

        let image = if region.mmr {
            let image = region.decode_mmr(&mut self.stream)?;
            self.stream.align();
            image
        } else {
            let mut contexts =
                vec![ArithContext::default(); generic_context_size(region.template)];
            let mut decoder = ArithDecoder::new(&mut self.stream);
            let image = region.decode_arith(&mut decoder, &mut contexts)?;
            drop(decoder);
            self.stream.align();
            self.stream.add_offset(2);
            image
        };

        if segment.kind == kind::INTERMEDIATE_GENERIC_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            let rect = region.replace_rect();
            self.compose_onto_page(&info, (rect.left, rect.top), &image);
        }

        Ok(())
    }

    /// Generic refinement region segments (7.4.7).
    fn parse_refinement_region(&mut self, segment: &mut Segment) -> Result<()> {
        let info = RegionInfo::parse(&mut self.stream)?;
        info.check_dimensions()?;

        let flags = self.stream.read_byte()?;
        let template_1 = flags & 0x01 != 0;
        let tpgron = flags & 0x02 != 0;

        let mut at = [0_i8; 4];
        if !template_1 {
            read_at_pixels(&mut self.stream, &mut at, 4)?;
        }

        // "Determine the buffer associated with the region segment that
        // this segment refers to; if there are no referred-to segments,
        // then use the page bitmap as the reference buffer." (7.4.7.5)
        let page_reference;
        let reference: &Image = if segment.referred.is_empty() {
            let page = self.page.as_ref().ok_or(DecodeError::LogicError)?;
            page_reference = page.sub_image(info.x, info.y, info.width, info.height);
            &page_reference
        } else {
            segment
                .referred
                .iter()
                .filter_map(|&number| {
                    Self::lookup(self.global.as_deref(), &self.segments, number)
                })
                .find(|found| {
                    matches!(
                        found.kind,
                        kind::INTERMEDIATE_TEXT_REGION
                            | kind::INTERMEDIATE_HALFTONE_REGION
                            | kind::INTERMEDIATE_GENERIC_REGION
                            | kind::INTERMEDIATE_REFINEMENT_REGION
                    )
                })
                .and_then(Segment::image)
                .ok_or(DecodeError::LogicError)?
        };

        let refinement = RefinementRegion {
            template_1,
            tpgron,
            width: info.width,
            height: info.height,
            reference,
            dx: 0,
            dy: 0,
            at,
        };

        let mut contexts = vec![ArithContext::default(); refinement_context_size(template_1)];
        let mut decoder = ArithDecoder::new(&mut self.stream);
        let image = refinement.decode(&mut decoder, &mut contexts)?;
        drop(decoder);
        self.stream.align();
        self.stream.add_offset(2);

        if segment.kind == kind::INTERMEDIATE_REFINEMENT_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            self.compose_onto_page(&info, (0, 0), &image);
        }

        Ok(())
    }

    /// Pattern dictionary segments (7.4.4).
    fn parse_pattern_dict(&mut self, segment: &mut Segment) -> Result<()> {
        let flags = self.stream.read_byte()?;

        let dictionary = PatternDictionary {
            mmr: flags & 0x01 != 0,
            template: (flags >> 1) & 0x03,
            pattern_width: self.stream.read_byte()?,
            pattern_height: self.stream.read_byte()?,
            gray_max: self.stream.read_u32()?,
        };

        if dictionary.pattern_width == 0 || dictionary.pattern_height == 0 {
            return Err(DecodeError::InvalidSegment);
        }
        if dictionary.gray_max > MAX_IMAGE_SIZE {
            return Err(DecodeError::InvalidSegment);
        }

        let dict = if dictionary.mmr {
            let dict = dictionary.decode_mmr(&mut self.stream)?;
            self.stream.align();
            dict
        } else {
            let mut contexts =
                vec![ArithContext::default(); generic_context_size(dictionary.template)];
            let mut decoder = ArithDecoder::new(&mut self.stream);
            let dict = dictionary.decode_arith(&mut decoder, &mut contexts)?;
            drop(decoder);
            self.stream.align();
            self.stream.add_offset(2);
            dict
        };

        segment.result = SegmentResult::PatternDict(dict);
        Ok(())
    }

    /// Halftone region segments (7.4.5).
    fn parse_halftone_region(&mut self, segment: &mut Segment) -> Result<()> {
        let info = RegionInfo::parse(&mut self.stream)?;
        info.check_dimensions()?;

        let flags = self.stream.read_byte()?;
        let combine_op = match (flags >> 4) & 0x07 {
            0 => ComposeOp::Or,
            1 => ComposeOp::And,
            2 => ComposeOp::Xor,
            3 => ComposeOp::Xnor,
            4 => ComposeOp::Replace,
            _ => return Err(DecodeError::InvalidSegment),
        };

        let grid_width = self.stream.read_u32()?;
        let grid_height = self.stream.read_u32()?;
        let grid_x = self.stream.read_i32()?;
        let grid_y = self.stream.read_i32()?;
        let rx = self.stream.read_u16()?;
        let ry = self.stream.read_u16()?;

        // "The referred-to segment must be a pattern dictionary segment."
        let &[referred] = segment.referred.as_slice() else {
            return Err(DecodeError::LogicError);
        };
        let patterns = Self::lookup(self.global.as_deref(), &self.segments, referred)
            .filter(|found| found.kind == kind::PATTERN_DICTIONARY)
            .and_then(Segment::pattern_dict)
            .map(|dict| dict.patterns.as_slice())
            .ok_or(DecodeError::LogicError)?;
        if patterns.is_empty() {
            return Err(DecodeError::LogicError);
        }

        let region = HalftoneRegion {
            width: info.width,
            height: info.height,
            mmr: flags & 0x01 != 0,
            template: (flags >> 1) & 0x03,
            def_pixel: flags & 0x80 != 0,
            combine_op,
            enable_skip: flags & 0x08 != 0,
            grid_width,
            grid_height,
            grid_x,
            grid_y,
            rx,
            ry,
            patterns,
        };

        let image = if region.mmr {
            self.stream.align();
            let image = region.decode_mmr(&mut self.stream)?;
            self.stream.align();
            image
        } else {
            let mut contexts =
                vec![ArithContext::default(); generic_context_size(region.template)];
            let mut decoder = ArithDecoder::new(&mut self.stream);
            let image = region.decode_arith(&mut decoder, &mut contexts)?;
            drop(decoder);
            self.stream.align();
            self.stream.add_offset(2);
            image
        };

        if segment.kind == kind::INTERMEDIATE_HALFTONE_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            self.compose_onto_page(&info, (0, 0), &image);
        }

        Ok(())
    }

    /// Symbol dictionary segments (7.4.2).
    fn parse_symbol_dict(&mut self, segment: &mut Segment) -> Result<()> {
        let flags = self.stream.read_u16()?;

        let huffman = flags & 0x0001 != 0;
        let refagg = flags & 0x0002 != 0;
        let template = ((flags >> 10) & 0x03) as u8;
        let r_template_1 = (flags >> 12) & 0x01 != 0;
        let context_used = flags & 0x0100 != 0;
        let context_retained = flags & 0x0200 != 0;

        let mut at = [0_i8; 8];
        if !huffman {
            let at_bytes = if template == 0 { 8 } else { 2 };
            read_at_pixels(&mut self.stream, &mut at, at_bytes)?;
        }

        let mut r_at = [0_i8; 4];
        if refagg && !r_template_1 {
            read_at_pixels(&mut self.stream, &mut r_at, 4)?;
        }

        let num_ex_syms = self.stream.read_u32()?;
        let num_new_syms = self.stream.read_u32()?;

        // "Concatenate all the input symbol dictionaries to form SDINSYMS."
        // (6.5.5, step 1)
        let mut input_symbols: Vec<&Image> = Vec::new();
        for &number in &segment.referred {
            let found = Self::lookup(self.global.as_deref(), &self.segments, number)
                .ok_or(DecodeError::LogicError)?;
            if found.kind == kind::SYMBOL_DICTIONARY
                && let Some(dict) = found.symbol_dict()
            {
                input_symbols.extend(dict.images.iter());
            }
        }

        // Table selection (7.4.2.1.6): user-supplied tables come from the
        // referred tables segments in order.
        let mut dh_table = None;
        let mut dw_table = None;
        let mut bm_size_table = None;
        let mut agg_inst_table = None;

        if huffman {
            let user_tables: Vec<&HuffmanTable> = segment
                .referred
                .iter()
                .filter_map(|&number| {
                    Self::lookup(self.global.as_deref(), &self.segments, number)
                })
                .filter(|found| found.kind == kind::TABLES)
                .filter_map(Segment::table)
                .collect();
            let mut next_user = user_tables.into_iter();

            dh_table = Some(match (flags >> 2) & 0x03 {
                0 => standard_table(4),
                1 => standard_table(5),
                3 => next_user.next().ok_or(DecodeError::LogicError)?,
                _ => return Err(DecodeError::InvalidSegment),
            });
            dw_table = Some(match (flags >> 4) & 0x03 {
                0 => standard_table(2),
                1 => standard_table(3),
                3 => next_user.next().ok_or(DecodeError::LogicError)?,
                _ => return Err(DecodeError::InvalidSegment),
            });
            bm_size_table = Some(if flags & 0x0040 != 0 {
                next_user.next().ok_or(DecodeError::LogicError)?
            } else {
                standard_table(1)
            });
            if refagg {
                agg_inst_table = Some(if flags & 0x0080 != 0 {
                    next_user.next().ok_or(DecodeError::LogicError)?
                } else {
                    standard_table(1)
                });
            }
        }

        let gb_size = if huffman {
            0
        } else {
            generic_context_size(template.min(1))
        };
        let gr_size = if refagg {
            refinement_context_size(r_template_1)
        } else {
            0
        };

        let mut gb_contexts = vec![ArithContext::default(); gb_size];
        let mut gr_contexts = vec![ArithContext::default(); gr_size];

        // "If bit 8 is 1, the arithmetic coding context from the first
        // referred-to symbol dictionary is used as the starting state."
        if context_used
            && let Some(&first) = segment.referred.first()
            && let Some(source) = Self::lookup(self.global.as_deref(), &self.segments, first)
        {
            if source.gb_contexts.len() == gb_size {
                gb_contexts.copy_from_slice(&source.gb_contexts);
            }
            if source.gr_contexts.len() == gr_size {
                gr_contexts.copy_from_slice(&source.gr_contexts);
            }
        }

        let dictionary = SymbolDictionary {
            refagg,
            template,
            r_template_1,
            num_ex_syms,
            num_new_syms,
            input_symbols,
            dh_table,
            dw_table,
            bm_size_table,
            agg_inst_table,
            at,
            r_at,
        };

        let dict = if huffman {
            let dict = dictionary.decode_huffman(&mut self.stream, &mut gr_contexts)?;
            self.stream.align();
            dict
        } else {
            let mut decoder = ArithDecoder::new(&mut self.stream);
            let dict = dictionary.decode_arith(&mut decoder, &mut gb_contexts, &mut gr_contexts)?;
            drop(decoder);
            self.stream.align();
            self.stream.add_offset(2);
            dict
        };

        segment.result = SegmentResult::SymbolDict(dict);
        if context_retained {
            segment.gb_contexts = gb_contexts;
            segment.gr_contexts = gr_contexts;
        }

        Ok(())
    }

    /// Text region segments (7.4.3).
    fn parse_text_region(&mut self, segment: &mut Segment) -> Result<()> {
        let info = RegionInfo::parse(&mut self.stream)?;
        info.check_dimensions()?;

        let flags = self.stream.read_u16()?;
        let huffman = flags & 0x0001 != 0;
        let refine = flags & 0x0002 != 0;
        let strips = 1_u32 << ((flags >> 2) & 0x03);
        let ref_corner = RefCorner::from_bits(((flags >> 4) & 0x03) as u8);
        let transposed = flags & 0x0040 != 0;
        let combine_op = match (flags >> 7) & 0x03 {
            0 => ComposeOp::Or,
            1 => ComposeOp::And,
            2 => ComposeOp::Xor,
            _ => ComposeOp::Xnor,
        };
        let def_pixel = flags & 0x0200 != 0;

        // SBDSOFFSET is a signed five-bit field.
        let ds_offset_raw = ((flags >> 10) & 0x1F) as u8;
        let ds_offset = if ds_offset_raw & 0x10 != 0 {
            (ds_offset_raw | 0xE0) as i8
        } else {
            ds_offset_raw as i8
        };

        let r_template_1 = flags & 0x8000 != 0;

        let huffman_flags = if huffman { self.stream.read_u16()? } else { 0 };

        let mut r_at = [0_i8; 4];
        if refine && !r_template_1 {
            read_at_pixels(&mut self.stream, &mut r_at, 4)?;
        }

        let num_instances = self.stream.read_u32()?;

        // "Form SBSYMS by concatenating the exported symbols of the
        // referred symbol dictionaries." (7.4.3.1.5)
        let mut symbols: Vec<&Image> = Vec::new();
        for &number in &segment.referred {
            let found = Self::lookup(self.global.as_deref(), &self.segments, number)
                .ok_or(DecodeError::LogicError)?;
            if found.kind == kind::SYMBOL_DICTIONARY
                && let Some(dict) = found.symbol_dict()
            {
                symbols.extend(dict.images.iter());
            }
        }
        let num_syms = symbols.len() as u32;

        let symbol_codes = if huffman {
            let codes = decode_symbol_id_codes(&mut self.stream, num_syms)?;
            self.stream.align();
            codes
        } else {
            Vec::new()
        };

        // Huffman table selection (7.4.3.1.6).
        let mut fs_table = None;
        let mut ds_table = None;
        let mut dt_table = None;
        let mut rdw_table = None;
        let mut rdh_table = None;
        let mut rdx_table = None;
        let mut rdy_table = None;
        let mut rsize_table = None;

        if huffman {
            let user_tables: Vec<&HuffmanTable> = segment
                .referred
                .iter()
                .filter_map(|&number| {
                    Self::lookup(self.global.as_deref(), &self.segments, number)
                })
                .filter(|found| found.kind == kind::TABLES)
                .filter_map(Segment::table)
                .collect();
            let mut next_user = user_tables.into_iter();

            let mut select = |bits: u16, zero: usize, one: usize, two: Option<usize>| {
                match bits {
                    0 => Ok(standard_table(zero)),
                    1 => Ok(standard_table(one)),
                    2 => match two {
                        Some(idx) => Ok(standard_table(idx)),
                        None => Err(DecodeError::InvalidSegment),
                    },
                    _ => next_user.next().ok_or(DecodeError::LogicError),
                }
            };

            fs_table = Some(select(huffman_flags & 0x03, 6, 7, None)?);
            ds_table = Some(select((huffman_flags >> 2) & 0x03, 8, 9, Some(10))?);
            dt_table = Some(select((huffman_flags >> 4) & 0x03, 11, 12, Some(13))?);
            rdw_table = Some(select((huffman_flags >> 6) & 0x03, 14, 15, None)?);
            rdh_table = Some(select((huffman_flags >> 8) & 0x03, 14, 15, None)?);
            rdx_table = Some(select((huffman_flags >> 10) & 0x03, 14, 15, None)?);
            rdy_table = Some(select((huffman_flags >> 12) & 0x03, 14, 15, None)?);
            rsize_table = Some(if huffman_flags & 0x4000 != 0 {
                next_user.next().ok_or(DecodeError::LogicError)?
            } else {
                standard_table(1)
            });
        }

        let region = TextRegion {
            refine,
            r_template_1,
            transposed,
            def_pixel,
            ds_offset,
            width: info.width,
            height: info.height,
            num_instances,
            strips,
            ref_corner,
            combine_op,
            symbols,
            symbol_codes,
            fs_table,
            ds_table,
            dt_table,
            rdw_table,
            rdh_table,
            rdx_table,
            rdy_table,
            rsize_table,
            r_at,
        };

        let mut gr_contexts = if refine {
            vec![ArithContext::default(); refinement_context_size(r_template_1)]
        } else {
            Vec::new()
        };

        let image = if huffman {
            let image = region.decode_huffman(&mut self.stream, &mut gr_contexts)?;
            self.stream.align();
            image
        } else {
            let mut state = IntDecoderState::new(ceil_log2(num_syms));
            let mut decoder = ArithDecoder::new(&mut self.stream);
            let image = region.decode_arith(&mut decoder, &mut gr_contexts, &mut state)?;
            drop(decoder);
            self.stream.align();
            self.stream.add_offset(2);
            image
        };

        if segment.kind == kind::INTERMEDIATE_TEXT_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            self.compose_onto_page(&info, (0, 0), &image);
        }

        Ok(())
    }
}
