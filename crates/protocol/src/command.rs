//! Command bytes
//!
//! Internal commands are defined by the protocol and handled by the session
//! layer; everything else belongs to the bound peripheral driver.

/// Known command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Acknowledge = 0x01,
    Announce = 0x02,
    Status = 0x03,
    Identify = 0x04,
    Power = 0x05,
    Authenticate = 0x06,
    VirtualKey = 0x07,
    AudioControl = 0x08,
    Rumble = 0x09,
    Led = 0x0a,
    HidReport = 0x0b,
    Firmware = 0x0c,
    SerialNumber = 0x1e,
    Input = 0x20,
    AudioSamples = 0x60,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Command> {
        Some(match byte {
            0x01 => Command::Acknowledge,
            0x02 => Command::Announce,
            0x03 => Command::Status,
            0x04 => Command::Identify,
            0x05 => Command::Power,
            0x06 => Command::Authenticate,
            0x07 => Command::VirtualKey,
            0x08 => Command::AudioControl,
            0x09 => Command::Rumble,
            0x0a => Command::Led,
            0x0b => Command::HidReport,
            0x0c => Command::Firmware,
            0x1e => Command::SerialNumber,
            0x20 => Command::Input,
            0x60 => Command::AudioSamples,
            _ => return None,
        })
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}
