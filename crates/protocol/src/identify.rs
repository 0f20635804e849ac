//! Identification packet parsing
//!
//! The identify packet describes everything the host needs to bind a driver:
//! supported audio formats, capability bitmaps, class-name strings, interface
//! GUIDs and an optional HID descriptor. A 16-byte preamble is skipped, then
//! eight little-endian u16 offsets locate the individual tables inside the
//! post-preamble region. Each table starts with a one-byte record count.
//!
//! A zero offset or a zero count marks a table the peripheral does not
//! provide; only offsets pointing outside the packet are parse errors.

use crate::error::{ProtocolError, Result};

const PREAMBLE_LEN: usize = 16;
const OFFSET_TABLE_LEN: usize = 16;

const GUID_LEN: usize = 16;

/// Interface GUID identifying one protocol surface of a peripheral
pub type InterfaceGuid = [u8; GUID_LEN];

/// Parsed identification data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identify {
    /// Supported (input, output) audio format pairs
    pub audio_formats: Vec<(u8, u8)>,
    pub capabilities_out: Vec<u8>,
    pub capabilities_in: Vec<u8>,
    /// Class names, most specific first; drivers match on these
    pub classes: Vec<String>,
    pub interfaces: Vec<InterfaceGuid>,
    pub hid_descriptor: Vec<u8>,
}

/// Count-prefixed table of fixed-size records. Returns the record bytes, or
/// an empty slice when the table is absent.
fn parse_info_element<'a>(
    region: &'a [u8],
    offset: usize,
    item_length: usize,
) -> Result<&'a [u8]> {
    if offset == 0 {
        return Ok(&[]);
    }

    let count = *region
        .get(offset)
        .ok_or(ProtocolError::InvalidInfoElement { offset })? as usize;
    if count == 0 {
        return Ok(&[]);
    }

    let start = offset + 1;
    let total = count * item_length;
    region
        .get(start..start + total)
        .ok_or(ProtocolError::InvalidInfoElement { offset })
}

fn parse_classes(region: &[u8], offset: usize) -> Result<Vec<String>> {
    if offset == 0 {
        return Ok(Vec::new());
    }

    let err = ProtocolError::InvalidInfoElement { offset };
    let count = *region.get(offset).ok_or(err)? as usize;

    let mut classes = Vec::with_capacity(count);
    let mut pos = offset + 1;
    for _ in 0..count {
        let len_bytes = region.get(pos..pos + 2).ok_or(err)?;
        let str_len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if str_len == 0 {
            return Err(err);
        }
        let raw = region.get(pos + 2..pos + 2 + str_len).ok_or(err)?;
        classes.push(String::from_utf8_lossy(raw).into_owned());
        pos += 2 + str_len;
    }

    Ok(classes)
}

impl Identify {
    pub fn decode(data: &[u8]) -> Result<Identify> {
        if data.len() < PREAMBLE_LEN + OFFSET_TABLE_LEN {
            return Err(ProtocolError::InvalidPacketLength {
                actual: data.len(),
                expected: PREAMBLE_LEN + OFFSET_TABLE_LEN,
            });
        }

        // offsets are relative to the region right after the preamble, which
        // starts with the offset table itself
        let region = &data[PREAMBLE_LEN..];
        let offset_at = |index: usize| -> usize {
            let base = index * 2;
            u16::from_le_bytes([region[base], region[base + 1]]) as usize
        };

        // offsets 0 and 1 are unused
        let audio_formats = parse_info_element(region, offset_at(2), 2)?
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        let capabilities_out = parse_info_element(region, offset_at(3), 1)?.to_vec();
        let capabilities_in = parse_info_element(region, offset_at(4), 1)?.to_vec();
        let classes = parse_classes(region, offset_at(5))?;
        let interfaces = parse_info_element(region, offset_at(6), GUID_LEN)?
            .chunks_exact(GUID_LEN)
            .map(|raw| {
                let mut guid = [0u8; GUID_LEN];
                guid.copy_from_slice(raw);
                guid
            })
            .collect();
        let hid_descriptor = parse_info_element(region, offset_at(7), 1)?.to_vec();

        Ok(Identify {
            audio_formats,
            capabilities_out,
            capabilities_in,
            classes,
            interfaces,
            hid_descriptor,
        })
    }
}
