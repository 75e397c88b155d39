/*!
A memory-safe, pure-Rust JBIG2 decoder.

`jbig2-decode` decodes JBIG2 images as specified in ITU-T T.88 (also known
as ISO/IEC 14492). JBIG2 is a bi-level image compression standard commonly
used in PDF documents and scanned-document archives.

# Example
```rust,no_run
let data = std::fs::read("image.jb2").unwrap();
let image = jbig2_decode::decode(&data).unwrap();

println!("{}x{} image", image.width(), image.height());
```

Multi-page streams are pumped page by page through [`Decoder`]:

```rust,no_run
let data = std::fs::read("document.jb2").unwrap();
let mut decoder = jbig2_decode::Decoder::new(&data).unwrap();
while let Some(page) = decoder.decode().unwrap() {
    println!("page: {}x{}", page.width(), page.height());
}
```

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

mod arithmetic_decoder;
mod bitmap;
mod decode;
mod document;
mod error;
mod file;
mod huffman_table;
mod integer_decoder;
mod mmr;
mod page_info;
mod reader;
mod segment;

use std::borrow::Cow;

pub use bitmap::Image;
use document::{Control, Document};
pub use error::{DecodeError, Result};
pub use file::is_jbig2;
use file::{StreamConfig, probe, unwrap_container};
use reader::BitStream;

/// A JBIG2 document decoder that surfaces one page at a time.
pub struct Decoder<'a> {
    document: Document<'a>,
    page_index: u32,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a standalone JBIG2 byte stream.
    ///
    /// The stream may be wrapped in a compressed tag-record container or
    /// carry producer quirks (little-endian integers, mislabelled
    /// organization); a configuration probe sorts these out up front and
    /// fails with [`DecodeError::InvalidHeader`] when nothing workable is
    /// found.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let document = Self::build_document(data, None)?;
        Ok(Self {
            document,
            page_index: 0,
        })
    }

    /// Create a decoder with a separate buffer of global segments, as used
    /// by embedded streams whose dictionaries are shared across pages.
    ///
    /// The global segments are decoded eagerly; any global segment that
    /// fails to parse fails construction.
    pub fn with_globals(data: &'a [u8], globals: &'a [u8]) -> Result<Self> {
        let mut global_document = Document::new(
            BitStream::new(globals),
            None,
            false,
            0,
            false,
        );

        loop {
            match global_document.decode_sequential()? {
                Control::EndReached => break,
                Control::PageCompleted | Control::Success => continue,
            }
        }

        let document = Self::build_document(data, Some(global_document))?;
        Ok(Self {
            document,
            page_index: 0,
        })
    }

    fn build_document(data: &'a [u8], global: Option<Document<'a>>) -> Result<Document<'a>> {
        let buffer: Cow<'a, [u8]> = match unwrap_container(data) {
            Some(unwrapped) => Cow::Owned(unwrapped),
            None => Cow::Borrowed(data),
        };

        let config: StreamConfig = match probe(&buffer) {
            Ok(config) => config,
            Err(err) => {
                // A bare segment stream is acceptable when globals carry the
                // file-level context; guess the endianness from the first
                // segment number.
                if global.is_some() {
                    let little_endian = buffer.len() >= 4
                        && buffer[0] != 0
                        && buffer[1] == 0
                        && buffer[2] == 0
                        && buffer[3] == 0;
                    StreamConfig {
                        offset: 0,
                        random_access: false,
                        little_endian,
                        org_mode: 0,
                        grouped: false,
                    }
                } else {
                    return Err(err);
                }
            }
        };

        let mut stream = BitStream::new(buffer);
        stream.set_little_endian(config.little_endian);
        stream.set_offset(config.offset);

        Ok(Document::new(
            stream,
            global,
            config.random_access,
            config.org_mode,
            config.grouped,
        ))
    }

    /// Decode up to the next page boundary. Returns `Ok(None)` once the
    /// stream is exhausted.
    pub fn decode(&mut self) -> Result<Option<Image>> {
        loop {
            match self.document.decode_sequential()? {
                Control::EndReached => {
                    // A stream may end without an explicit end-of-page
                    // segment; surface the page under construction.
                    if self.document.in_page && self.document.page.is_some() {
                        self.document.in_page = false;
                        return Ok(self.take_page());
                    }
                    return Ok(None);
                }
                Control::PageCompleted => {
                    if self.document.page.is_none() {
                        return Err(DecodeError::LogicError);
                    }
                    return Ok(self.take_page());
                }
                Control::Success => {}
            }
        }
    }

    /// Decode every remaining page.
    pub fn decode_all(&mut self) -> Result<Vec<Image>> {
        let mut pages = Vec::new();
        while let Some(page) = self.decode()? {
            pages.push(page);
        }
        Ok(pages)
    }

    fn take_page(&mut self) -> Option<Image> {
        self.page_index += 1;
        let page = self.document.page.take();
        self.document.release_page_segments(self.page_index);
        page
    }
}

/// Decode the first page of a JBIG2 byte stream.
pub fn decode(data: &[u8]) -> Result<Image> {
    Decoder::new(data)?
        .decode()?
        .ok_or(DecodeError::InvalidSegment)
}

/// Peek the declared dimensions of the first page without decoding any
/// pixel data.
pub fn decode_config(data: &[u8]) -> Result<(u32, u32)> {
    let mut decoder = Decoder::new(data)?;
    decoder.document.scan_page_info()
}
