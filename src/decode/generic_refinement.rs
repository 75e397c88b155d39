//! Generic refinement region decoding (6.3).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::Image;
use crate::decode::MAX_IMAGE_SIZE;
use crate::error::{DecodeError, Result};

/// The generic refinement region decoding procedure (6.3): a bitmap decoded
/// pixel-by-pixel against a shifted reference bitmap.
pub(crate) struct RefinementRegion<'r> {
    /// GRTEMPLATE: false selects the 13-bit template 0, true the 10-bit
    /// template 1.
    pub(crate) template_1: bool,
    pub(crate) tpgron: bool,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) reference: &'r Image,
    pub(crate) dx: i32,
    pub(crate) dy: i32,
    pub(crate) at: [i8; 4],
}

impl<'r> RefinementRegion<'r> {
    pub(crate) fn decode(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        contexts: &mut [ArithContext],
    ) -> Result<Image> {
        if self.width > MAX_IMAGE_SIZE || self.height > MAX_IMAGE_SIZE {
            return Err(DecodeError::DimensionOverflow);
        }

        if self.template_1 {
            self.decode_template1(decoder, contexts)
        } else {
            self.decode_template0(decoder, contexts)
        }
    }

    /// "TPGRPIX is 1 if a 3 × 3 pixel array in the reference bitmap, centred
    /// at the location corresponding to the current pixel, contains pixels
    /// all of the same value." (6.3.5.6)
    fn typical_pixel(&self, w: i32, h: i32) -> Option<u32> {
        let center = self.reference.pixel(w - self.dx, h - self.dy);

        for dy in -1..=1 {
            for dx in -1..=1 {
                if self.reference.pixel(w - self.dx + dx, h - self.dy + dy) != center {
                    return None;
                }
            }
        }

        Some(center)
    }

    fn decode_template0(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        contexts: &mut [ArithContext],
    ) -> Result<Image> {
        let mut image = Image::new(self.width, self.height);
        let reference = self.reference;
        let (dx, dy) = (self.dx, self.dy);
        let mut ltp = false;

        for h in 0..self.height as i32 {
            if self.tpgron {
                if decoder.is_complete() {
                    return Err(DecodeError::DecoderComplete);
                }
                let sltp = decoder.decode(&mut contexts[0x0010]);
                ltp ^= sltp != 0;
            }

            // Sliding windows over the decoded row above (line0), the
            // current row (line1), and three reference rows (line2-line4).
            let mut line0 = image.pixel(1, h - 1) | (image.pixel(0, h - 1) << 1);
            let mut line1 = 0_u32;
            let mut line2 =
                reference.pixel(-dx + 1, h - dy - 1) | (reference.pixel(-dx, h - dy - 1) << 1);
            let mut line3 = reference.pixel(-dx + 1, h - dy)
                | (reference.pixel(-dx, h - dy) << 1)
                | (reference.pixel(-dx - 1, h - dy) << 2);
            let mut line4 = reference.pixel(-dx + 1, h - dy + 1)
                | (reference.pixel(-dx, h - dy + 1) << 1)
                | (reference.pixel(-dx - 1, h - dy + 1) << 2);

            for w in 0..self.width as i32 {
                let mut value = if ltp {
                    self.typical_pixel(w, h)
                } else {
                    None
                };

                if value.is_none() {
                    let mut context = line4;
                    context |= line3 << 3;
                    context |= line2 << 6;
                    context |= reference
                        .pixel(w - dx + self.at[2] as i32, h - dy + self.at[3] as i32)
                        << 8;
                    context |= line1 << 9;
                    context |= line0 << 10;
                    context |= image.pixel(w + self.at[0] as i32, h + self.at[1] as i32) << 12;

                    if decoder.is_complete() {
                        return Err(DecodeError::DecoderComplete);
                    }
                    value = Some(decoder.decode(&mut contexts[context as usize]));
                }

                let value = value.unwrap_or(0);
                image.set_pixel(w, h, value);

                line0 = ((line0 << 1) | image.pixel(w + 2, h - 1)) & 0x03;
                line1 = ((line1 << 1) | value) & 0x01;
                line2 = ((line2 << 1) | reference.pixel(w - dx + 2, h - dy - 1)) & 0x03;
                line3 = ((line3 << 1) | reference.pixel(w - dx + 2, h - dy)) & 0x07;
                line4 = ((line4 << 1) | reference.pixel(w - dx + 2, h - dy + 1)) & 0x07;
            }
        }

        Ok(image)
    }

    fn decode_template1(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        contexts: &mut [ArithContext],
    ) -> Result<Image> {
        let mut image = Image::new(self.width, self.height);
        let reference = self.reference;
        let (dx, dy) = (self.dx, self.dy);
        let mut ltp = false;

        for h in 0..self.height as i32 {
            if self.tpgron {
                if decoder.is_complete() {
                    return Err(DecodeError::DecoderComplete);
                }
                let sltp = decoder.decode(&mut contexts[0x0008]);
                ltp ^= sltp != 0;
            }

            let mut line0 = image.pixel(1, h - 1)
                | (image.pixel(0, h - 1) << 1)
                | (image.pixel(-1, h - 1) << 2);
            let mut line1 = 0_u32;
            let mut line2 = reference.pixel(-dx, h - dy - 1);
            let mut line3 = reference.pixel(-dx + 1, h - dy)
                | (reference.pixel(-dx, h - dy) << 1)
                | (reference.pixel(-dx - 1, h - dy) << 2);
            let mut line4 =
                reference.pixel(-dx + 1, h - dy + 1) | (reference.pixel(-dx, h - dy + 1) << 1);

            for w in 0..self.width as i32 {
                let mut value = if ltp {
                    self.typical_pixel(w, h)
                } else {
                    None
                };

                if value.is_none() {
                    let mut context = line4;
                    context |= line3 << 2;
                    context |= line2 << 5;
                    context |= line1 << 6;
                    context |= line0 << 7;

                    if decoder.is_complete() {
                        return Err(DecodeError::DecoderComplete);
                    }
                    value = Some(decoder.decode(&mut contexts[context as usize]));
                }

                let value = value.unwrap_or(0);
                image.set_pixel(w, h, value);

                line0 = ((line0 << 1) | image.pixel(w + 2, h - 1)) & 0x07;
                line1 = ((line1 << 1) | value) & 0x01;
                line2 = ((line2 << 1) | reference.pixel(w - dx + 1, h - dy - 1)) & 0x01;
                line3 = ((line3 << 1) | reference.pixel(w - dx + 2, h - dy)) & 0x07;
                line4 = ((line4 << 1) | reference.pixel(w - dx + 2, h - dy + 1)) & 0x03;
            }
        }

        Ok(image)
    }
}
