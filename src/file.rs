//! Stream configuration probing (Annex D) and container unwrapping.
//!
//! Real-world producers deviate from Annex D in several ways: some embed
//! the bitstream in a compressed tag-record container, some use
//! little-endian integers, and some mislabel the file organization. The
//! probe scores a small set of candidate layouts against the first segment
//! header and picks the most plausible one.

use std::io::Read;

use crate::error::{DecodeError, Result};

/// "This is an 8-byte sequence containing 0x97 0x4A 0x42 0x32 0x0D 0x0A
/// 0x1A 0x0A." (D.4.1)
pub(crate) const SIGNATURE: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// Whether `data` starts with the JBIG2 file signature.
pub fn is_jbig2(data: &[u8]) -> bool {
    data.starts_with(&SIGNATURE)
}

/// The stream layout selected by the probe.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamConfig {
    /// Byte offset of the first segment header.
    pub(crate) offset: usize,
    pub(crate) random_access: bool,
    pub(crate) little_endian: bool,
    /// Layout variant 1 keeps full segment headers even in random-access
    /// streams.
    pub(crate) org_mode: u8,
    /// True when headers are grouped up front, with the data parts
    /// following back to back.
    pub(crate) grouped: bool,
}

/// Unwrap a compressed tag-record container: a `CWS` signature, a zlib
/// stream holding a bit-width coded rectangle, and tag records whose
/// bits-lossless payload embeds the JBIG2 data. Returns the unwrapped
/// buffer, or `None` if `data` is not such a container.
pub(crate) fn unwrap_container(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() <= 8 || &data[0..3] != b"CWS" {
        return None;
    }

    let mut inflated = Vec::new();
    flate2::read::ZlibDecoder::new(&data[8..])
        .read_to_end(&mut inflated)
        .ok()?;

    let mut payload = inflated.as_slice();

    if let Some(&first) = payload.first() {
        // The header rectangle stores four values of `nbits` bits each
        // after a 5-bit width field, then a 4-byte frame descriptor.
        let nbits = (first >> 3) as usize;
        let rect_bytes = (5 + nbits * 4).div_ceil(8);
        let start = rect_bytes + 4;

        if payload.len() > start {
            payload = &payload[start..];

            while payload.len() >= 2 {
                let tag = payload[0] as usize | ((payload[1] as usize) << 8);
                let tag_code = tag >> 6;
                let mut tag_len = tag & 0x3F;
                let mut header_len = 2;

                // Long-form records carry a 4-byte length.
                if tag_len == 0x3F {
                    if payload.len() < 6 {
                        break;
                    }
                    tag_len = payload[2] as usize
                        | ((payload[3] as usize) << 8)
                        | ((payload[4] as usize) << 16)
                        | ((payload[5] as usize) << 24);
                    header_len = 6;
                }

                if tag_code == 0 {
                    break;
                }

                // Bits-lossless records hold the embedded image data after
                // a short per-record prefix.
                if matches!(tag_code, 6 | 21 | 35 | 90) {
                    let skip = if matches!(tag_code, 35 | 90) { 6 } else { 2 };
                    let payload_offset = header_len + skip;
                    if payload.len() > payload_offset {
                        payload = &payload[payload_offset..];
                        break;
                    }
                }

                let next = header_len + tag_len;
                if payload.len() >= next {
                    payload = &payload[next..];
                } else {
                    break;
                }
            }
        }
    }

    // Re-base on the signature wherever it ended up.
    let start = payload
        .windows(SIGNATURE.len())
        .position(|window| window == SIGNATURE)
        .unwrap_or(0);

    Some(payload[start..].to_vec())
}

fn read_u32_at(data: &[u8], offset: usize, little_endian: bool) -> u32 {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    if little_endian {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    }
}

/// Probe the candidate stream layouts and pick the best scoring one.
pub(crate) fn probe(data: &[u8]) -> Result<StreamConfig> {
    if data.len() < 8 || !is_jbig2(data) {
        return Err(DecodeError::InvalidHeader);
    }

    struct Candidate {
        offset: usize,
        random_access: bool,
        little_endian: bool,
        org_mode: u8,
    }

    // Header offset 9 = flags only, 13 = flags plus the 4-byte page count.
    const CANDIDATES: [(usize, bool, bool, u8); 6] = [
        (9, true, false, 0),
        (9, false, false, 0),
        (9, true, false, 1),
        (13, false, false, 0),
        (13, false, true, 0),
        (9, false, true, 0),
    ];

    let mut best: Option<(i32, StreamConfig)> = None;

    for (offset, random_access, little_endian, org_mode) in CANDIDATES {
        let candidate = Candidate {
            offset,
            random_access,
            little_endian,
            org_mode,
        };

        if data.len() <= candidate.offset + 5 {
            continue;
        }

        // Bit 1 of the flags byte: unknown number of pages. The page count
        // field exists only when it is clear.
        let has_page_count = data[8] & 0x02 == 0;
        if has_page_count && candidate.offset == 9 {
            continue;
        }
        if !has_page_count && candidate.offset == 13 {
            continue;
        }

        // Walk the shape of the first segment header under this layout.
        let full_header = candidate.org_mode == 1 || !candidate.random_access;
        let mut cursor = candidate.offset;
        let mut segment_number = 0_u32;

        if full_header {
            if data.len() < cursor + 4 {
                continue;
            }
            segment_number = read_u32_at(data, cursor, candidate.little_endian);
            cursor += 4;
        }

        if data.len() <= cursor {
            continue;
        }
        let flags = data[cursor];
        cursor += 1;
        let page_association_large = flags & 0x40 != 0;

        if data.len() <= cursor {
            continue;
        }
        let referred_byte = data[cursor];
        cursor += 1;
        let referred_count = (referred_byte >> 5) as usize;
        if referred_count == 7 {
            // Long-form counts are rare enough not to probe on.
            continue;
        }

        let referred_size = if full_header {
            if segment_number > 65536 {
                4
            } else if segment_number > 256 {
                2
            } else {
                1
            }
        } else {
            1
        };
        cursor += referred_count * referred_size;

        if full_header {
            cursor += if page_association_large { 4 } else { 1 };
        }

        if data.len() < cursor + 4 {
            continue;
        }
        let data_length = read_u32_at(data, cursor, candidate.little_endian);
        cursor += 4;

        let remaining = data.len() - cursor;
        let mut score = 0_i32;

        if data_length as usize <= remaining {
            score += 50;
        } else {
            score -= 80;
        }
        if data_length > 0 {
            score += 10;
        }

        let declared_random = data[8] & 0x01 != 0;
        if candidate.random_access == declared_random {
            score += 10;
        }

        // A recognisable second segment header directly after the first
        // marks a grouped (headers-up-front) stream.
        let mut grouped = false;
        if data.len() > cursor + 5 {
            let next_number = read_u32_at(data, cursor, candidate.little_endian);
            let next_kind = data[cursor + 4] & 0x3F;
            if next_number > 0 && next_number < 1000 && next_kind != 0 && next_kind <= 62 {
                grouped = true;
                score += 40;
            }
        }

        if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((
                score,
                StreamConfig {
                    offset: candidate.offset,
                    random_access: candidate.random_access,
                    little_endian: candidate.little_endian,
                    org_mode: candidate.org_mode,
                    grouped,
                },
            ));
        }
    }

    match best {
        Some((score, config)) => {
            log::debug!(
                "probe selected offset {} random_access {} little_endian {} \
                 org_mode {} grouped {} (score {score})",
                config.offset,
                config.random_access,
                config.little_endian,
                config.org_mode,
                config.grouped
            );
            Ok(config)
        }
        None => Err(DecodeError::InvalidHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_detection() {
        assert!(is_jbig2(&[
            0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A, 0x00
        ]));
        assert!(!is_jbig2(b"not a jbig2 file"));
        assert!(!is_jbig2(&[]));
    }

    #[test]
    fn probe_rejects_missing_signature() {
        assert_eq!(
            probe(&[0u8; 32]).unwrap_err(),
            DecodeError::InvalidHeader
        );
    }

    #[test]
    fn probe_selects_sequential_layout() {
        // Signature, flags 0x02 (sequential, no page count), then a page
        // information segment header with a plausible data length.
        let mut data = SIGNATURE.to_vec();
        data.push(0x02);
        data.extend_from_slice(&1u32.to_be_bytes()); // segment number
        data.push(0x30); // type 48
        data.push(0x00); // no referred segments
        data.push(0x01); // page association
        data.extend_from_slice(&19u32.to_be_bytes()); // data length
        data.extend_from_slice(&[0; 19]);

        let config = probe(&data).unwrap();
        assert_eq!(config.offset, 9);
        assert!(!config.random_access);
        assert!(!config.little_endian);
        assert!(!config.grouped);
    }
}
