//! Variable-length integer codec
//!
//! Length and chunk-offset fields use a 7-bit-per-byte encoding, least
//! significant group first, with the high bit of each byte marking a
//! continuation. A `u32` encodes in at most 5 bytes. The header codec may
//! append one extra zero continuation byte to pad a header to an even
//! length, so decoding tolerates exactly one trailing `0x00` group.

use crate::error::{ProtocolError, Result};

/// Maximum number of value-carrying bytes for a `u32`
const MAX_GROUPS: usize = 5;

/// Append the minimal varint encoding of `value` to `out`.
pub fn put_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let group = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(group | 0x80);
        } else {
            out.push(group);
            break;
        }
    }
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed (including any pad
/// byte).
pub fn get_varint(data: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_GROUPS {
            // only a pad group may follow the fifth byte
            if byte != 0 {
                return Err(ProtocolError::VarintOverflow);
            }
            return Ok((value, i + 1));
        }

        let group = byte & 0x7f;
        if i == MAX_GROUPS - 1 && group > 0x0f {
            // bits 28..34 would not fit in 32 bits
            return Err(ProtocolError::VarintOverflow);
        }
        value |= u32::from(group) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(ProtocolError::TruncatedVarint)
}

/// Number of bytes the minimal encoding of `value` occupies.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0xfff_ffff => 4,
        _ => 5,
    }
}
