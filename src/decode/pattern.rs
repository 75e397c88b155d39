//! Pattern dictionary decoding (6.7).

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::bitmap::Image;
use crate::decode::generic::GenericRegion;
use crate::error::{DecodeError, Result};
use crate::reader::BitStream;

/// A decoded pattern dictionary: GRAYMAX + 1 patterns of identical size.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternDict {
    pub(crate) patterns: Vec<Image>,
}

impl PatternDict {
    pub(crate) fn pattern_width(&self) -> u32 {
        self.patterns.first().map_or(0, Image::width)
    }

    pub(crate) fn pattern_height(&self) -> u32 {
        self.patterns.first().map_or(0, Image::height)
    }
}

/// The pattern dictionary decoding procedure (6.7): one collective bitmap
/// of all patterns concatenated left to right, then sliced.
pub(crate) struct PatternDictionary {
    pub(crate) mmr: bool,
    pub(crate) template: u8,
    /// HDPW
    pub(crate) pattern_width: u8,
    /// HDPH
    pub(crate) pattern_height: u8,
    /// GRAYMAX
    pub(crate) gray_max: u32,
}

impl PatternDictionary {
    fn collective_region(&self) -> Result<GenericRegion<'static>> {
        let width = (self.gray_max as u64 + 1) * self.pattern_width as u64;
        let width = u32::try_from(width).map_err(|_| DecodeError::DimensionOverflow)?;

        let mut region = GenericRegion::new(width, self.pattern_height as u32);
        region.mmr = self.mmr;
        region.template = self.template;

        // "GBAT[0] is (-HDPW, 0), placing the first adaptive pixel on the
        // corresponding column of the previous pattern." (6.7.5)
        region.at[0] = (self.pattern_width as i8).wrapping_neg();
        region.at[1] = 0;
        if self.template == 0 {
            region.at[2] = -3;
            region.at[3] = -1;
            region.at[4] = 2;
            region.at[5] = -2;
            region.at[6] = -2;
            region.at[7] = -2;
        }

        Ok(region)
    }

    fn slice(&self, collective: &Image) -> PatternDict {
        let width = self.pattern_width as u32;
        let height = self.pattern_height as u32;

        let patterns = (0..=self.gray_max)
            .map(|gray| collective.sub_image((gray * width) as i32, 0, width, height))
            .collect();

        PatternDict { patterns }
    }

    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_, '_>,
        gb_contexts: &mut [ArithContext],
    ) -> Result<PatternDict> {
        let mut region = self.collective_region()?;
        let collective = region.decode_arith(decoder, gb_contexts)?;

        Ok(self.slice(&collective))
    }

    pub(crate) fn decode_mmr(&self, stream: &mut BitStream<'_>) -> Result<PatternDict> {
        let mut region = self.collective_region()?;
        let collective = region.decode_mmr(stream)?;

        Ok(self.slice(&collective))
    }
}
