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

//! XMODEM protocol constants and helpers shared by both engines

use std::io;
use std::time::Duration;
use log::debug;
use crate::serial::SerialPort;

/// Start of header - begins a packet with a 128-byte payload
pub const SOH: u8 = 0x01;

/// Start of text - begins a packet with a 1024-byte payload
pub const STX: u8 = 0x02;

/// End of transmission - sender has no more packets
pub const EOT: u8 = 0x04;

/// Acknowledge - packet accepted, or EOT/cancel confirmed
pub const ACK: u8 = 0x06;

/// Negative acknowledge - packet rejected, or checksum mode requested
pub const NAK: u8 = 0x15;

/// Cancel - two in a row abort the transfer
pub const CAN: u8 = 0x18;

/// Receiver requests CRC mode
pub const CRC_REQUEST: u8 = b'C';

/// Fills the remainder of a short final payload (CP/M end-of-file)
pub const PAD: u8 = 0x1A;

/// Number of CAN bytes sent when aborting locally
pub const CANCEL_REPEAT: usize = 3;

/// Payload size class of a packet, selected by its start byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketSize {
    #[default]
    Standard,
    OneK,
}

impl PacketSize {
    pub const fn len(self) -> usize {
        match self {
            PacketSize::Standard => 128,
            PacketSize::OneK => 1024,
        }
    }

    pub const fn start_byte(self) -> u8 {
        match self {
            PacketSize::Standard => SOH,
            PacketSize::OneK => STX,
        }
    }

    pub fn from_start_byte(byte: u8) -> Option<Self> {
        match byte {
            SOH => Some(PacketSize::Standard),
            STX => Some(PacketSize::OneK),
            _ => None,
        }
    }
}

/// Human readable name of a control byte, for logging
pub fn control_name(byte: u8) -> String {
    match byte {
        SOH => "SOH".to_string(),
        STX => "STX".to_string(),
        EOT => "EOT".to_string(),
        ACK => "ACK".to_string(),
        NAK => "NAK".to_string(),
        CAN => "CAN".to_string(),
        CRC_REQUEST => "'C'".to_string(),
        other => format!("0x{:02X}", other),
    }
}

/// Drains the input until a read times out.
///
/// Returns the number of bytes discarded.
pub fn flush_input(port: &mut dyn SerialPort, timeout: Duration) -> io::Result<usize> {
    let mut discarded = 0;
    while port.read_byte(timeout)?.is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!("Flushed {} stale input bytes", discarded);
    }
    Ok(discarded)
}

/// Sends the same control byte `count` times
pub fn send_repeated(port: &mut dyn SerialPort, byte: u8, count: usize) -> io::Result<()> {
    for _ in 0..count {
        port.send_byte(byte)?;
    }
    debug!("Sent: {} x{}", control_name(byte), count);
    Ok(())
}

/// Aborts the transfer from our side with a run of CAN bytes
pub fn send_cancel(port: &mut dyn SerialPort) -> io::Result<()> {
    send_repeated(port, CAN, CANCEL_REPEAT)
}
