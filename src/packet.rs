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

//! On-the-wire packet frame

use crate::checksum::{self, Mode};
use crate::protocol::{PacketSize, PAD};

/// Largest frame: start + number + complement + 1024 payload + 2 CRC, plus one spare
pub const MAX_FRAME_LEN: usize = 1030;

const HEADER_LEN: usize = 3;

/// One packet, stored inline so building or receiving it never allocates
#[derive(Clone)]
pub struct Frame {
    buf: [u8; MAX_FRAME_LEN],
    size: PacketSize,
    mode: Mode,
}

impl Frame {
    /// Empty frame of the given class, start byte already filled in
    pub fn new(size: PacketSize, mode: Mode) -> Self {
        let mut buf = [0u8; MAX_FRAME_LEN];
        buf[0] = size.start_byte();
        Frame { buf, size, mode }
    }

    /// Frames `chunk` as packet `number`.
    ///
    /// A chunk shorter than the payload is followed by one PAD byte and zeros.
    pub fn build(number: u8, chunk: &[u8], size: PacketSize, mode: Mode) -> Self {
        let payload_len = size.len();
        debug_assert!(chunk.len() <= payload_len);

        let mut frame = Frame::new(size, mode);
        frame.buf[1] = number;
        frame.buf[2] = !number;

        let count = chunk.len().min(payload_len);
        frame.buf[HEADER_LEN..HEADER_LEN + count].copy_from_slice(&chunk[..count]);
        if count < payload_len {
            frame.buf[HEADER_LEN + count] = PAD;
        }

        let trailer = checksum::compute(mode, frame.payload());
        trailer.write_to(&mut frame.buf[HEADER_LEN + payload_len..]);
        frame
    }

    pub fn size(&self) -> PacketSize {
        self.size
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Length on the wire, start byte included
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.size.len() + self.mode.trailer_len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.wire_len()]
    }

    /// Everything after the start byte, for the receiver to fill
    pub fn body_mut(&mut self) -> &mut [u8] {
        let len = self.wire_len();
        &mut self.buf[1..len]
    }

    pub fn number(&self) -> u8 {
        self.buf[1]
    }

    pub fn complement(&self) -> u8 {
        self.buf[2]
    }

    /// Packet number and its complement agree
    pub fn header_valid(&self) -> bool {
        self.number() == !self.complement()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_LEN..HEADER_LEN + self.size.len()]
    }

    pub fn trailer(&self) -> &[u8] {
        let start = HEADER_LEN + self.size.len();
        &self.buf[start..start + self.mode.trailer_len()]
    }

    pub fn trailer_valid(&self) -> bool {
        checksum::verify(self.mode, self.payload(), self.trailer())
    }
}
