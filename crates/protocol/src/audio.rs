//! Audio control packets and stream configuration
//!
//! Audio format negotiation runs over the audio-control command: the host
//! suggests a format, the peripheral either echoes it back (accepted) or
//! answers with the format it wants instead. Chat headsets use a reduced
//! single-byte variant of the format packet and report volume through their
//! own layout.

use crate::error::{ProtocolError, Result};
use crate::header::MIN_HEADER_LEN;
use crate::varint::varint_len;

/// Milliseconds of audio carried by one buffer
pub const AUDIO_INTERVAL_MS: u32 = 8;

/// Sample formats for the main audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioFormat {
    Mono24KHz = 0x09,
    Stereo48KHz = 0x10,
}

impl AudioFormat {
    pub fn from_byte(byte: u8) -> Result<AudioFormat> {
        match byte {
            0x09 => Ok(AudioFormat::Mono24KHz),
            0x10 => Ok(AudioFormat::Stereo48KHz),
            _ => Err(ProtocolError::UnknownAudioFormat(byte)),
        }
    }

    pub fn channels(self) -> u32 {
        match self {
            AudioFormat::Mono24KHz => 1,
            AudioFormat::Stereo48KHz => 2,
        }
    }

    pub fn sample_rate(self) -> u32 {
        match self {
            AudioFormat::Mono24KHz => 24_000,
            AudioFormat::Stereo48KHz => 48_000,
        }
    }
}

/// Sample formats for the chat headset stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatFormat {
    Khz24 = 0x04,
    Khz16 = 0x05,
}

/// Mute state carried in the volume packets
pub const VOLUME_UNMUTED: u8 = 0x04;
pub const VOLUME_MIC_MUTED: u8 = 0x05;

mod subcommand {
    pub const VOLUME_CHAT: u8 = 0x00;
    pub const FORMAT_CHAT: u8 = 0x01;
    pub const FORMAT: u8 = 0x02;
    pub const VOLUME: u8 = 0x03;
}

/// Decoded audio-control packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioControl {
    VolumeChat {
        mute: u8,
        gain_output: u8,
        output: u8,
        input: u8,
    },
    FormatChat {
        in_out: u8,
    },
    Format {
        input: u8,
        output: u8,
    },
    Volume {
        mute: u8,
        output: u8,
        input: u8,
    },
}

impl AudioControl {
    pub fn decode(data: &[u8]) -> Result<AudioControl> {
        let sub = *data.first().ok_or(ProtocolError::InvalidPacketLength {
            actual: 0,
            expected: 1,
        })?;

        let expect = |len: usize| -> Result<()> {
            if data.len() != len {
                return Err(ProtocolError::InvalidPacketLength {
                    actual: data.len(),
                    expected: len,
                });
            }
            Ok(())
        };

        match sub {
            subcommand::VOLUME_CHAT => {
                expect(5)?;
                Ok(AudioControl::VolumeChat {
                    mute: data[1],
                    gain_output: data[2],
                    output: data[3],
                    input: data[4],
                })
            }
            subcommand::FORMAT_CHAT => {
                expect(2)?;
                Ok(AudioControl::FormatChat { in_out: data[1] })
            }
            subcommand::FORMAT => {
                expect(3)?;
                Ok(AudioControl::Format {
                    input: data[1],
                    output: data[2],
                })
            }
            subcommand::VOLUME => {
                expect(8)?;
                Ok(AudioControl::Volume {
                    mute: data[1],
                    output: data[2],
                    input: data[4],
                })
            }
            other => Err(ProtocolError::UnknownAudioControl(other)),
        }
    }
}

/// Outbound format suggestion
pub fn encode_format(input: AudioFormat, output: AudioFormat) -> [u8; 3] {
    [subcommand::FORMAT, input as u8, output as u8]
}

/// Outbound chat-headset format suggestion
pub fn encode_format_chat(in_out: ChatFormat) -> [u8; 2] {
    [subcommand::FORMAT_CHAT, in_out as u8]
}

/// Outbound hardware volume command
pub fn encode_volume(input: u8, output: u8) -> [u8; 8] {
    [subcommand::VOLUME, VOLUME_UNMUTED, output, 0, input, 0, 0, 0]
}

/// Negotiated audio stream parameters, derived once a format is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub format: AudioFormat,
    pub channels: u32,
    pub sample_rate: u32,
    /// Bytes of signed 16-bit samples per [`AUDIO_INTERVAL_MS`] interval
    pub buffer_size: usize,
    /// Bytes of samples per audio packet
    pub fragment_size: usize,
    /// Fragment plus the encoded packet header
    pub packet_size: usize,
}

impl AudioConfig {
    /// Derive the stream parameters for `format`, with the interval buffer
    /// spread over `audio_packet_count` packets.
    pub fn new(format: AudioFormat, audio_packet_count: usize) -> AudioConfig {
        let channels = format.channels();
        let sample_rate = format.sample_rate();
        let buffer_size =
            (sample_rate * channels * 2 * AUDIO_INTERVAL_MS / 1000) as usize;
        let fragment_size = buffer_size / audio_packet_count;

        let mut header_len = MIN_HEADER_LEN + varint_len(fragment_size as u32);
        header_len += header_len % 2;

        AudioConfig {
            format,
            channels,
            sample_rate,
            buffer_size,
            fragment_size,
            packet_size: fragment_size + header_len,
        }
    }
}
