//! Fixed-layout internal packets
//!
//! Wire bytes are decoded field by field with explicit bounds checks; none of
//! these layouts is overlaid onto raw buffers.

use crate::error::{ProtocolError, Result};

fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(ProtocolError::InvalidPacketLength {
            actual: data.len(),
            expected,
        });
    }
    Ok(())
}

/// Firmware or hardware version quadruple from the announce packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    fn decode(data: &[u8]) -> Version {
        Version {
            major: u16::from_le_bytes([data[0], data[1]]),
            minor: u16::from_le_bytes([data[2], data[3]]),
            build: u16::from_le_bytes([data[4], data[5]]),
            revision: u16::from_le_bytes([data[6], data[7]]),
        }
    }
}

/// Announce packet: the first thing a peripheral sends after power-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub address: [u8; 6],
    pub vendor_id: u16,
    pub product_id: u16,
    pub firmware: Version,
    pub hardware: Version,
}

impl Announce {
    pub const WIRE_LEN: usize = 28;

    pub fn decode(data: &[u8]) -> Result<Announce> {
        check_len(data, Self::WIRE_LEN)?;

        let mut address = [0u8; 6];
        address.copy_from_slice(&data[0..6]);
        // data[6..8] is reserved
        Ok(Announce {
            address,
            vendor_id: u16::from_le_bytes([data[8], data[9]]),
            product_id: u16::from_le_bytes([data[10], data[11]]),
            firmware: Version::decode(&data[12..20]),
            hardware: Version::decode(&data[20..28]),
        })
    }
}

/// Battery chemistry reported in the status packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryType {
    None,
    Standard,
    Kit,
    Unknown,
}

/// Coarse battery level reported in the status packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Low,
    Normal,
    High,
    Full,
}

/// Status packet: connection state and battery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub connected: bool,
    pub battery_type: BatteryType,
    pub battery_level: BatteryLevel,
}

impl Status {
    pub const WIRE_LEN: usize = 4;

    pub fn decode(data: &[u8]) -> Result<Status> {
        check_len(data, Self::WIRE_LEN)?;

        let status = data[0];
        let battery_type = match (status >> 2) & 0x03 {
            0x00 => BatteryType::None,
            0x01 => BatteryType::Standard,
            0x02 => BatteryType::Kit,
            _ => BatteryType::Unknown,
        };
        let battery_level = match status & 0x03 {
            0x00 => BatteryLevel::Low,
            0x01 => BatteryLevel::Normal,
            0x02 => BatteryLevel::High,
            _ => BatteryLevel::Full,
        };

        Ok(Status {
            connected: status & 0x80 != 0,
            battery_type,
            battery_level,
        })
    }
}

/// Acknowledgment payload echoing the packet it answers.
///
/// `received` reports the bytes accepted so far; `remaining` is nonzero only
/// when acknowledging the start of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge {
    pub command: u8,
    pub options: u8,
    pub received: u16,
    pub remaining: u16,
}

impl Acknowledge {
    pub const WIRE_LEN: usize = 9;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let received = self.received.to_le_bytes();
        let remaining = self.remaining.to_le_bytes();
        [
            0, // reserved
            self.command,
            self.options,
            received[0],
            received[1],
            0,
            0,
            remaining[0],
            remaining[1],
        ]
    }

    pub fn decode(data: &[u8]) -> Result<Acknowledge> {
        check_len(data, Self::WIRE_LEN)?;
        Ok(Acknowledge {
            command: data[1],
            options: data[2],
            received: u16::from_le_bytes([data[3], data[4]]),
            remaining: u16::from_le_bytes([data[7], data[8]]),
        })
    }
}

/// Power mode for the outbound power command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    On = 0x00,
    Sleep = 0x01,
    Off = 0x04,
    Reset = 0x07,
}

/// LED mode for the outbound LED command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedMode {
    Off = 0x00,
    On = 0x01,
    BlinkFast = 0x02,
    BlinkMedium = 0x03,
    BlinkSlow = 0x04,
    FadeSlow = 0x08,
    FadeFast = 0x09,
}

/// Outbound rumble command payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rumble {
    /// Bitmask of the motors the remaining fields apply to
    pub motors: u8,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub strong: u8,
    pub weak: u8,
    pub duration: u8,
    pub delay: u8,
    pub repeat: u8,
}

impl Rumble {
    pub const WIRE_LEN: usize = 9;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        [
            0, // reserved
            self.motors,
            self.left_trigger,
            self.right_trigger,
            self.strong,
            self.weak,
            self.duration,
            self.delay,
            self.repeat,
        ]
    }
}

/// Outbound LED command payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Led {
    pub mode: LedMode,
    pub brightness: u8,
}

impl Led {
    pub const WIRE_LEN: usize = 3;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        [0, self.mode as u8, self.brightness]
    }
}

/// Guide-button (virtual key) packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualKey {
    pub pressed: bool,
}

impl VirtualKey {
    pub const WIRE_LEN: usize = 2;

    pub fn decode(data: &[u8]) -> Result<VirtualKey> {
        check_len(data, Self::WIRE_LEN)?;
        Ok(VirtualKey {
            pressed: data[0] != 0,
        })
    }
}

/// Serial-number packet, requested during identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialNumber {
    pub serial: String,
}

impl SerialNumber {
    pub const WIRE_LEN: usize = 16;

    pub fn decode(data: &[u8]) -> Result<SerialNumber> {
        check_len(data, Self::WIRE_LEN)?;
        let raw = &data[2..];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(SerialNumber {
            serial: String::from_utf8_lossy(&raw[..end]).into_owned(),
        })
    }
}
