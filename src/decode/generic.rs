//! Generic region decoding (6.2).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::Image;
use crate::decode::MAX_IMAGE_SIZE;
use crate::error::{DecodeError, Result};
use crate::mmr::MmrDecoder;
use crate::reader::BitStream;

/// SLTP context values per template (6.2.5.7, Figures 8-11).
const TPGD_CONTEXT: [u32; 4] = [0x9B25, 0x0795, 0x00E5, 0x0195];

/// Per-template line register parameters for templates 0-2. The registers
/// hold sliding windows of the two rows above the current pixel; template 3
/// has no second row above and is decoded separately.
const LINE1_SHIFT: [u32; 3] = [0x0C, 0x09, 0x07];
const LINE1_MASK: [u32; 3] = [0x07, 0x0F, 0x07];
const LINE2_MASK: [u32; 3] = [0x1F, 0x1F, 0x0F];
const LINE3_MASK: [u32; 3] = [0x0F, 0x07, 0x03];

/// The rectangle of a region that was actually written.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReplaceRect {
    pub(crate) left: i32,
    pub(crate) top: i32,
}

/// The generic region decoding procedure (6.2): a rectangular array of
/// pixels coded one at a time with template-driven contexts, or as an MMR
/// stream.
pub(crate) struct GenericRegion<'r> {
    pub(crate) mmr: bool,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) template: u8,
    pub(crate) tpgdon: bool,
    pub(crate) skip: Option<&'r Image>,
    pub(crate) at: [i8; 8],
    replace_rect: ReplaceRect,
}

impl<'r> GenericRegion<'r> {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            mmr: false,
            width,
            height,
            template: 0,
            tpgdon: false,
            skip: None,
            at: [0; 8],
            replace_rect: ReplaceRect::default(),
        }
    }

    pub(crate) fn replace_rect(&self) -> ReplaceRect {
        self.replace_rect
    }

    /// Decode using MMR coding (6.2.6). Consumes an integral number of bytes
    /// from the stream.
    pub(crate) fn decode_mmr(&mut self, stream: &mut BitStream<'_>) -> Result<Image> {
        self.check_size()?;

        let image = MmrDecoder::new(self.width, self.height, stream).decode()?;
        self.replace_rect = ReplaceRect { left: 0, top: 0 };

        Ok(image)
    }

    /// Decode using a template and arithmetic coding (6.2.5).
    pub(crate) fn decode_arith(
        &mut self,
        decoder: &mut ArithDecoder<'_, '_>,
        contexts: &mut [ArithContext],
    ) -> Result<Image> {
        self.check_size()?;

        let mut image = Image::new(self.width, self.height);
        self.replace_rect = ReplaceRect { left: 0, top: 0 };

        if self.template < 3 {
            self.decode_rows(decoder, contexts, &mut image)?;
        } else {
            self.decode_rows_template3(decoder, contexts, &mut image)?;
        }

        Ok(image)
    }

    fn check_size(&self) -> Result<()> {
        if self.width > MAX_IMAGE_SIZE || self.height > MAX_IMAGE_SIZE {
            return Err(DecodeError::DimensionOverflow);
        }
        Ok(())
    }

    /// Templates 0-2: context from two rows above plus the current row,
    /// tracked in three sliding line registers.
    fn decode_rows(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        contexts: &mut [ArithContext],
        image: &mut Image,
    ) -> Result<()> {
        let opt = self.template as usize;
        let mod2 = (opt % 2) as i32;
        let div2 = (opt / 2) as i32;
        let at_shift = 4 - opt as u32;

        // "1) Set: LTP = 0" (6.2.5.7)
        let mut ltp = false;

        for h in 0..self.height as i32 {
            if self.tpgdon {
                if decoder.is_complete() {
                    return Err(DecodeError::DecoderComplete);
                }
                let sltp = decoder.decode(&mut contexts[TPGD_CONTEXT[opt] as usize]);
                ltp ^= sltp != 0;
            }

            // "If LTP = 1 then set every pixel of the current row of GBREG
            // equal to the corresponding pixel of the row immediately
            // above." (6.2.5.7)
            if ltp {
                image.copy_row(h as u32, h as u32 - 1);
                continue;
            }

            let mut line1 = image.pixel(1 + mod2, h - 2);
            line1 |= image.pixel(mod2, h - 2) << 1;
            if opt == 1 {
                line1 |= image.pixel(0, h - 2) << 2;
            }

            let mut line2 = image.pixel(2 - div2, h - 1);
            line2 |= image.pixel(1 - div2, h - 1) << 1;
            if opt < 2 {
                line2 |= image.pixel(0, h - 1) << 2;
            }

            let mut line3 = 0_u32;

            for w in 0..self.width as i32 {
                let mut value = 0;
                let skip = self
                    .skip
                    .is_some_and(|skip| skip.pixel(w, h) != 0);

                if !skip {
                    if decoder.is_complete() {
                        return Err(DecodeError::DecoderComplete);
                    }

                    let mut context = line3;
                    context |=
                        image.pixel(w + self.at[0] as i32, h + self.at[1] as i32) << at_shift;
                    context |= line2 << (at_shift + 1);
                    context |= line1 << LINE1_SHIFT[opt];
                    if opt == 0 {
                        context |=
                            image.pixel(w + self.at[2] as i32, h + self.at[3] as i32) << 10;
                        context |=
                            image.pixel(w + self.at[4] as i32, h + self.at[5] as i32) << 11;
                        context |=
                            image.pixel(w + self.at[6] as i32, h + self.at[7] as i32) << 15;
                    }

                    value = decoder.decode(&mut contexts[context as usize]);
                }

                if value != 0 {
                    image.set_pixel(w, h, value);
                }

                line1 = ((line1 << 1) | image.pixel(w + 2 + mod2, h - 2)) & LINE1_MASK[opt];
                line2 = ((line2 << 1) | image.pixel(w + 3 - div2, h - 1)) & LINE2_MASK[opt];
                line3 = ((line3 << 1) | value) & LINE3_MASK[opt];
            }
        }

        Ok(())
    }

    /// Template 3: a single row above the current one.
    fn decode_rows_template3(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        contexts: &mut [ArithContext],
        image: &mut Image,
    ) -> Result<()> {
        let mut ltp = false;

        for h in 0..self.height as i32 {
            if self.tpgdon {
                if decoder.is_complete() {
                    return Err(DecodeError::DecoderComplete);
                }
                let sltp = decoder.decode(&mut contexts[TPGD_CONTEXT[3] as usize]);
                ltp ^= sltp != 0;
            }

            if ltp {
                image.copy_row(h as u32, h as u32 - 1);
                continue;
            }

            let mut line1 = image.pixel(1, h - 1);
            line1 |= image.pixel(0, h - 1) << 1;
            let mut line2 = 0_u32;

            for w in 0..self.width as i32 {
                let mut value = 0;
                let skip = self
                    .skip
                    .is_some_and(|skip| skip.pixel(w, h) != 0);

                if !skip {
                    if decoder.is_complete() {
                        return Err(DecodeError::DecoderComplete);
                    }

                    let mut context = line2;
                    context |= image.pixel(w + self.at[0] as i32, h + self.at[1] as i32) << 4;
                    context |= line1 << 5;

                    value = decoder.decode(&mut contexts[context as usize]);
                }

                if value != 0 {
                    image.set_pixel(w, h, value);
                }

                line1 = ((line1 << 1) | image.pixel(w + 2, h - 1)) & 0x1F;
                line2 = ((line2 << 1) | value) & 0x0F;
            }
        }

        Ok(())
    }
}
