//! Page information segment parsing (7.4.8).

use crate::error::Result;
use crate::reader::BitStream;

/// A parsed page information segment.
#[derive(Debug, Clone)]
pub(crate) struct PageInfo {
    /// "This is a four-byte value containing the width in pixels of the
    /// page's bitmap." (7.4.8.1)
    pub(crate) width: u32,
    /// "A page's bitmap height may be declared to be unknown (by specifying
    /// a height of 0xFFFFFFFF). In this case, the page must be striped."
    /// (7.4.8.2)
    pub(crate) height: u32,
    /// "Bit 2: Page default pixel value. This bit contains the initial
    /// value for every pixel in the page." (7.4.8.5)
    pub(crate) default_pixel: bool,
    /// "Bit 15: Page is striped." (7.4.8.6)
    pub(crate) is_striped: bool,
    /// "Bits 0-14: Maximum stripe size." (7.4.8.6)
    pub(crate) max_stripe_size: u16,
}

impl PageInfo {
    pub(crate) fn parse(stream: &mut BitStream<'_>) -> Result<PageInfo> {
        let width = stream.read_u32()?;
        let height = stream.read_u32()?;

        // X and Y resolution, pixels/metre; not needed for decoding.
        let _x_resolution = stream.read_u32()?;
        let _y_resolution = stream.read_u32()?;

        let flags = stream.read_byte()?;
        let striping = stream.read_u16()?;

        Ok(PageInfo {
            width,
            height,
            default_pixel: flags & 0x04 != 0,
            is_striped: striping & 0x8000 != 0,
            max_stripe_size: striping & 0x7FFF,
        })
    }
}
