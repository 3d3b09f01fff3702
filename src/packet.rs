//! Packet assembly: header ++ RGB ++ footer.

use crate::color::ColorCommand;
use crate::config::DeviceConfig;
use std::ops::Range;

/// Bytes occupied by the RGB payload.
pub const COLOR_LEN: usize = 3;

/// One outgoing color packet. Built per invocation and dropped after the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
    color_offset: usize,
}

impl Packet {
    pub fn build(header: &[u8], color: ColorCommand, footer: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(header.len() + COLOR_LEN + footer.len());
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&color.to_bytes());
        bytes.extend_from_slice(footer);
        Self {
            bytes,
            color_offset: header.len(),
        }
    }

    pub fn for_config(config: &DeviceConfig, color: ColorCommand) -> Self {
        Self::build(&config.packet_header, color, &config.packet_footer)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Byte range of the RGB payload inside the packet.
    pub fn color_range(&self) -> Range<usize> {
        self.color_offset..self.color_offset + COLOR_LEN
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Packet length a config produces, independent of the color.
pub fn packet_len(config: &DeviceConfig) -> usize {
    config.packet_header.len() + COLOR_LEN + config.packet_footer.len()
}
