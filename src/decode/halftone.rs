//! Halftone region decoding (6.6) and the gray-scale image decoding
//! procedure it builds on (Annex C).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::{ComposeOp, Image};
use crate::decode::MAX_IMAGE_SIZE;
use crate::decode::generic::GenericRegion;
use crate::error::{DecodeError, Result};
use crate::mmr::MmrDecoder;
use crate::reader::BitStream;

/// The halftone region decoding procedure (6.6): a gray-level grid decoded
/// as Gray-coded bit-planes, rendered by pasting dictionary patterns.
pub(crate) struct HalftoneRegion<'r> {
    /// HBW, HBH
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) mmr: bool,
    pub(crate) template: u8,
    pub(crate) def_pixel: bool,
    pub(crate) combine_op: ComposeOp,
    pub(crate) enable_skip: bool,
    /// HGW, HGH
    pub(crate) grid_width: u32,
    pub(crate) grid_height: u32,
    /// HGX, HGY
    pub(crate) grid_x: i32,
    pub(crate) grid_y: i32,
    /// HRX, HRY: 256 times the halftone grid vector.
    pub(crate) rx: u16,
    pub(crate) ry: u16,
    pub(crate) patterns: &'r [Image],
}

impl<'r> HalftoneRegion<'r> {
    /// Grid cell (m, n) to canvas coordinates (6.6.5.1):
    ///   x = (HGX + m·HRY + n·HRX) >> 8
    ///   y = (HGY + m·HRX − n·HRY) >> 8
    fn grid_coords(&self, m: u32, n: u32) -> (i64, i64) {
        let (m, n) = (m as i64, n as i64);
        let x = (self.grid_x as i64 + m * self.ry as i64 + n * self.rx as i64) >> 8;
        let y = (self.grid_y as i64 + m * self.rx as i64 - n * self.ry as i64) >> 8;
        (x, y)
    }

    /// ⌈log2(HNUMPATS)⌉ bit-planes.
    fn bits_per_value(&self) -> u32 {
        let mut bits = 1;
        while (1_u32 << bits) < self.patterns.len() as u32 {
            bits += 1;
        }
        bits
    }

    fn check_size(&self) -> Result<()> {
        if self.width > MAX_IMAGE_SIZE
            || self.height > MAX_IMAGE_SIZE
            || self.grid_width > MAX_IMAGE_SIZE
            || self.grid_height > MAX_IMAGE_SIZE
        {
            return Err(DecodeError::DimensionOverflow);
        }
        if self.patterns.is_empty() {
            return Err(DecodeError::LogicError);
        }
        Ok(())
    }

    /// Compute HSKIP (6.6.5.1): cells whose pattern falls wholly outside the
    /// region are never decoded.
    fn skip_bitmap(&self) -> Image {
        let pattern_w = self.patterns[0].width() as i64;
        let pattern_h = self.patterns[0].height() as i64;
        let mut skip = Image::new(self.grid_width, self.grid_height);

        for m in 0..self.grid_height {
            for n in 0..self.grid_width {
                let (x, y) = self.grid_coords(m, n);
                let outside = x + pattern_w <= 0
                    || x >= self.width as i64
                    || y + pattern_h <= 0
                    || y >= self.height as i64;
                if outside {
                    skip.set_pixel(n as i32, m as i32, 1);
                }
            }
        }

        skip
    }

    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gb_contexts: &mut [ArithContext],
    ) -> Result<Image> {
        self.check_size()?;

        let skip = self.enable_skip.then(|| self.skip_bitmap());

        let mut region = GenericRegion::new(self.grid_width, self.grid_height);
        region.template = self.template;
        region.skip = skip.as_ref();

        // Table C.4 fixes the adaptive template for gray-scale bit-planes.
        region.at[0] = if self.template <= 1 { 3 } else { 2 };
        region.at[1] = -1;
        if self.template == 0 {
            region.at[2] = -3;
            region.at[3] = -1;
            region.at[4] = 2;
            region.at[5] = -2;
            region.at[6] = -2;
            region.at[7] = -2;
        }

        // "Decode GSPLANES[GSBPP - 1] ... GSPLANES[J] = GSPLANES[J + 1] XOR
        // GSPLANES[J]" (C.5): planes arrive most significant first, each
        // XOR-composed with its predecessor to undo the Gray coding.
        let planes_count = self.bits_per_value() as usize;
        let mut planes: Vec<Option<Image>> = vec![None; planes_count];

        for j in (0..planes_count).rev() {
            let mut plane = region.decode_arith(decoder, gb_contexts)?;
            if let Some(previous) = planes.get(j + 1).and_then(Option::as_ref) {
                plane.compose(previous, 0, 0, ComposeOp::Xor);
            }
            planes[j] = Some(plane);
        }

        let planes: Vec<Image> = planes.into_iter().map(Option::unwrap).collect();
        self.render(&planes)
    }

    pub(crate) fn decode_mmr(&self, stream: &mut BitStream<'_>) -> Result<Image> {
        self.check_size()?;

        let planes_count = self.bits_per_value() as usize;
        let mut planes: Vec<Option<Image>> = vec![None; planes_count];

        for j in (0..planes_count).rev() {
            let mut plane =
                MmrDecoder::new(self.grid_width, self.grid_height, stream).decode()?;
            if let Some(previous) = planes.get(j + 1).and_then(Option::as_ref) {
                plane.compose(previous, 0, 0, ComposeOp::Xor);
            }
            planes[j] = Some(plane);
        }

        let planes: Vec<Image> = planes.into_iter().map(Option::unwrap).collect();
        self.render(&planes)
    }

    /// Assemble gray values from the bit-planes and paste the selected
    /// patterns (6.6.5.2).
    fn render(&self, planes: &[Image]) -> Result<Image> {
        let mut region = Image::new(self.width, self.height);
        if self.def_pixel {
            region.fill(true);
        }

        for m in 0..self.grid_height {
            for n in 0..self.grid_width {
                let mut gray: usize = 0;
                for (i, plane) in planes.iter().enumerate() {
                    gray |= (plane.pixel(n as i32, m as i32) as usize) << i;
                }

                // Clamp out-of-range gray values to the last pattern.
                let pattern = &self.patterns[gray.min(self.patterns.len() - 1)];

                let (x, y) = self.grid_coords(m, n);
                let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
                    continue;
                };
                region.compose(pattern, x, y, self.combine_op);
            }
        }

        Ok(region)
    }
}
