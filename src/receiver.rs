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

use std::io;
use std::marker::PhantomData;
use std::time::Duration;
use log::{debug, info, warn};
use thiserror::Error;
use crate::checksum::Mode;
use crate::config::XmodemConfig;
use crate::packet::Frame;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sender never started a packet")]
    SyncError,

    #[error("transfer cancelled by sender")]
    RemoteCancelled,

    #[error("too many retransmissions of packet {packet}")]
    TooManyRetries { packet: u8 },
}

// ============================================================================
// States
// ============================================================================

pub struct Negotiating;
pub struct ReceivingHeader;
pub struct ReceivingBody;
pub struct Validating;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    port: &'a mut dyn SerialPort,
    dest: &'a mut [u8],
    config: XmodemConfig,
    frame: Frame,
    // Negotiation character still being sent, None once the sender has started
    try_char: Option<u8>,
    mode: Mode,
    attempt: u32,
    packet_no: u8,
    retrans: u32,
    len: usize,
}

// ============================================================================
// Trait
// ============================================================================

pub enum ReceiverStep<'a> {
    Next(Box<dyn ReceiverState<'a> + 'a>),
    Complete(usize),
}

pub trait ReceiverState<'a>: Send {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S: Send> ReceiverFsm<'a, S> {
    fn transition<T>(self) -> Box<ReceiverFsm<'a, T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            port: self.port,
            dest: self.dest,
            config: self.config,
            frame: self.frame,
            try_char: self.try_char,
            mode: self.mode,
            attempt: self.attempt,
            packet_no: self.packet_no,
            retrans: self.retrans,
            len: self.len,
        })
    }

    fn next<T>(self) -> ReceiverStep<'a>
    where
        ReceiverFsm<'a, T>: ReceiverState<'a> + 'a,
    {
        let next = self.transition::<T>();
        ReceiverStep::Next(next as Box<dyn ReceiverState<'a> + 'a>)
    }

    fn io_error(&self, e: io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<u8>, ReceiverError> {
        self.port.read_byte(timeout).map_err(|e| self.io_error(e))
    }

    fn send(&mut self, byte: u8) -> Result<(), ReceiverError> {
        self.port.send_byte(byte).map_err(|e| self.io_error(e))?;
        debug!("Sent: {}", control_name(byte));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ReceiverError> {
        let timeout = self.config.flush_timeout();
        flush_input(&mut *self.port, timeout).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), ReceiverError> {
        self.flush()?;
        send_cancel(&mut *self.port).map_err(|e| self.io_error(e))
    }

    /// Reads into the frame body, returning false if any byte times out
    fn fill(&mut self, start: usize, end: usize) -> Result<bool, ReceiverError> {
        let timeout = self.config.byte_timeout;
        for i in start..end {
            match self.port.read_byte(timeout) {
                Ok(Some(byte)) => self.frame.body_mut()[i] = byte,
                Ok(None) => return Ok(false),
                Err(e) => return Err(self.io_error(e)),
            }
        }
        Ok(true)
    }

    /// Discards the packet in flight and asks for it again
    fn reject(mut self) -> Result<ReceiverStep<'a>, ReceiverError> {
        self.flush()?;
        self.send(NAK)?;
        self.attempt = 0;
        Ok(self.next::<Negotiating>())
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, Negotiating> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, ReceiverError> {
        let mut fsm = *self;

        if let Some(ch) = fsm.try_char {
            fsm.send(ch)?;
        }

        let timeout = fsm.config.sync_timeout();
        let byte = fsm.read(timeout)?;

        if let Some(size) = byte.and_then(PacketSize::from_start_byte) {
            debug!("Received: {}", control_name(size.start_byte()));
            if let Some(ch) = fsm.try_char.take() {
                fsm.mode = if ch == CRC_REQUEST { Mode::Crc } else { Mode::Checksum };
                info!("Sender started, using {} mode", fsm.mode);
            }
            fsm.frame = Frame::new(size, fsm.mode);
            return Ok(fsm.next::<ReceivingHeader>());
        }

        match byte {
            Some(EOT) => {
                debug!("Received: EOT");
                fsm.flush()?;
                fsm.send(ACK)?;
                info!("Transfer complete, received {} bytes", fsm.len);
                return Ok(ReceiverStep::Complete(fsm.len));
            }
            Some(CAN) => {
                let timeout = fsm.config.byte_timeout;
                if fsm.read(timeout)? == Some(CAN) {
                    warn!("Transfer cancelled by sender");
                    fsm.flush()?;
                    fsm.send(ACK)?;
                    return Err(ReceiverError::RemoteCancelled);
                }
                debug!("Ignoring lone CAN");
            }
            Some(other) => debug!("Ignoring unexpected {}", control_name(other)),
            None => {}
        }

        fsm.attempt += 1;
        if fsm.attempt < fsm.config.sync_retries {
            return Ok(ReceiverStep::Next(Box::new(fsm)));
        }

        if fsm.try_char == Some(CRC_REQUEST) {
            warn!("No answer to CRC request, falling back to checksum mode");
            fsm.try_char = Some(NAK);
            fsm.attempt = 0;
            return Ok(ReceiverStep::Next(Box::new(fsm)));
        }

        warn!("Gave up waiting for a packet after {} attempts", fsm.attempt);
        fsm.abort()?;
        Err(ReceiverError::SyncError)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReceivingHeader> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, ReceiverError> {
        let mut fsm = *self;

        if !fsm.fill(0, 2)? {
            warn!("Timed out reading packet header");
            return fsm.reject();
        }

        debug!("Received header: packet {} / 0x{:02X}", fsm.frame.number(), fsm.frame.complement());
        Ok(fsm.next::<ReceivingBody>())
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReceivingBody> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, ReceiverError> {
        let mut fsm = *self;

        let end = fsm.frame.wire_len() - 1;
        if !fsm.fill(2, end)? {
            warn!("Timed out reading body of packet {}", fsm.frame.number());
            return fsm.reject();
        }

        debug!("Received: {} byte payload", fsm.frame.size().len());
        Ok(fsm.next::<Validating>())
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, Validating> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, ReceiverError> {
        let mut fsm = *self;
        let number = fsm.frame.number();

        if !fsm.frame.header_valid() {
            warn!("Packet {} rejected: complement 0x{:02X} does not match", number, fsm.frame.complement());
            return fsm.reject();
        }

        // The previous number is a retransmission after our ACK was lost
        let duplicate = number == fsm.packet_no.wrapping_sub(1);
        if number != fsm.packet_no && !duplicate {
            warn!("Packet {} rejected: expected {}", number, fsm.packet_no);
            return fsm.reject();
        }

        if !fsm.frame.trailer_valid() {
            warn!("Packet {} rejected: {} mismatch", number, fsm.mode);
            return fsm.reject();
        }

        if duplicate {
            debug!("Packet {} is a duplicate, acknowledging again", number);
        } else {
            let count = fsm.frame.payload().len().min(fsm.dest.len() - fsm.len);
            fsm.dest[fsm.len..fsm.len + count].copy_from_slice(&fsm.frame.payload()[..count]);
            fsm.len += count;
            fsm.packet_no = fsm.packet_no.wrapping_add(1);
            fsm.retrans = fsm.config.max_retransmissions + 1;
            debug!("Accepted packet {} ({} bytes stored, {} total)", number, count, fsm.len);
        }

        fsm.retrans = fsm.retrans.saturating_sub(1);
        if fsm.retrans == 0 {
            warn!("Packet {} retransmitted too many times, cancelling", number);
            fsm.abort()?;
            return Err(ReceiverError::TooManyRetries { packet: number });
        }

        fsm.send(ACK)?;
        fsm.attempt = 0;
        Ok(fsm.next::<Negotiating>())
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> ReceiverFsm<'a, Negotiating> {
    pub fn new(
        port: &'a mut dyn SerialPort,
        dest: &'a mut [u8],
        config: XmodemConfig,
    ) -> Box<dyn ReceiverState<'a> + 'a> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Negotiating>,
            port,
            dest,
            config,
            frame: Frame::new(PacketSize::Standard, Mode::Checksum),
            try_char: Some(CRC_REQUEST),
            mode: Mode::Checksum,
            attempt: 0,
            packet_no: 1,
            retrans: config.max_retransmissions,
            len: 0,
        })
    }
}

/// Receives one transfer into `dest`, returning the number of bytes stored.
///
/// `dest.len()` is the capacity; data beyond it is acknowledged and dropped.
/// The count covers whole payloads, so it includes the sender's padding
/// unless the capacity cut it off.
pub fn receive<'a>(
    port: &'a mut dyn SerialPort,
    dest: &'a mut [u8],
    config: &XmodemConfig,
) -> Result<usize, ReceiverError> {
    info!("Waiting for sender (capacity {} bytes)", dest.len());
    let mut state = ReceiverFsm::<Negotiating>::new(port, dest, *config);

    loop {
        match state.step()? {
            ReceiverStep::Next(next) => state = next,
            ReceiverStep::Complete(len) => return Ok(len),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
