// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Packet integrity checks: 8-bit additive checksum and CRC-16/XMODEM.
//!
//! The CRC uses the CCITT polynomial 0x1021 with a zero initial value,
//! no reflection and no final xor. It travels high byte first.

use std::fmt;

const CRC16_POLYNOMIAL: u16 = 0x1021;

const CRC16_TABLE: [u16; 256] = generate_crc16_table();

const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;

        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Error-detection mode negotiated for a whole transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Checksum,
    Crc,
}

impl Mode {
    /// Trailer bytes following the payload
    pub const fn trailer_len(self) -> usize {
        match self {
            Mode::Checksum => 1,
            Mode::Crc => 2,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Checksum => write!(f, "checksum"),
            Mode::Crc => write!(f, "CRC-16"),
        }
    }
}

/// Computed packet trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailer {
    Checksum(u8),
    Crc(u16),
}

impl Trailer {
    /// Writes the wire form into the front of `out`
    pub fn write_to(self, out: &mut [u8]) {
        match self {
            Trailer::Checksum(sum) => out[0] = sum,
            Trailer::Crc(crc) => out[..2].copy_from_slice(&crc.to_be_bytes()),
        }
    }
}

/// Wrapping 8-bit sum of all bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &b| {
        let index = ((crc >> 8) as u8 ^ b) as usize;
        (crc << 8) ^ CRC16_TABLE[index]
    })
}

pub fn compute(mode: Mode, payload: &[u8]) -> Trailer {
    match mode {
        Mode::Checksum => Trailer::Checksum(checksum(payload)),
        Mode::Crc => Trailer::Crc(crc16(payload)),
    }
}

/// Checks a received trailer against the payload.
///
/// A trailer of the wrong length never verifies.
pub fn verify(mode: Mode, payload: &[u8], trailer: &[u8]) -> bool {
    match (mode, trailer) {
        (Mode::Checksum, [sum]) => checksum(payload) == *sum,
        (Mode::Crc, [hi, lo]) => crc16(payload) == u16::from_be_bytes([*hi, *lo]),
        _ => false,
    }
}
