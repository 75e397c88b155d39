//! The region and dictionary decoding procedures (clauses 6 and 7.4).

pub(crate) mod generic;
pub(crate) mod generic_refinement;
pub(crate) mod halftone;
pub(crate) mod pattern;
pub(crate) mod symbol;
pub(crate) mod text;

use crate::bitmap::ComposeOp;
use crate::error::{DecodeError, Result};
use crate::reader::BitStream;

/// "Edge-connected regions larger than this are not decoded." Every region
/// dimension is capped at 65 535 pixels.
pub(crate) const MAX_IMAGE_SIZE: u32 = 65_535;

/// The region segment information field (7.4.1).
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionInfo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) flags: u8,
}

impl RegionInfo {
    pub(crate) fn parse(stream: &mut BitStream<'_>) -> Result<Self> {
        let width = stream.read_u32()?;
        let height = stream.read_u32()?;
        let x = stream.read_u32()? as i32;
        let y = stream.read_u32()? as i32;
        let flags = stream.read_byte()?;

        Ok(Self {
            width,
            height,
            x,
            y,
            flags,
        })
    }

    /// The external combination operator (7.4.1.5).
    pub(crate) fn compose_op(&self) -> ComposeOp {
        ComposeOp::from_region_flags(self.flags)
    }

    pub(crate) fn check_dimensions(&self) -> Result<()> {
        if self.width > MAX_IMAGE_SIZE || self.height > MAX_IMAGE_SIZE {
            return Err(DecodeError::DimensionOverflow);
        }
        Ok(())
    }
}

/// Context bank size for a generic template.
pub(crate) fn generic_context_size(template: u8) -> usize {
    match template {
        0 => 1 << 16,
        1 => 1 << 13,
        _ => 1 << 10,
    }
}

/// Context bank size for a refinement template.
pub(crate) fn refinement_context_size(template_1: bool) -> usize {
    if template_1 { 1 << 10 } else { 1 << 13 }
}

/// Read `count` adaptive template coordinate pairs into the head of `at`.
pub(crate) fn read_at_pixels(stream: &mut BitStream<'_>, at: &mut [i8], count: usize) -> Result<()> {
    for slot in at.iter_mut().take(count) {
        *slot = stream.read_byte()? as i8;
    }
    Ok(())
}
