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
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transfer cancelled by receiver")]
    RemoteCancelled,

    #[error("receiver never requested a transfer")]
    NoSync,

    #[error("packet {packet} was never acknowledged")]
    TransmissionFailure { packet: u8 },

    #[error("end of transmission was never acknowledged")]
    EotFailure,
}

impl SenderError {
    /// All data was acknowledged, only the final EOT went unanswered
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, SenderError::EotFailure)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitingMode;
pub struct Sending;
pub struct AwaitingAck;
pub struct EotPhase;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    port: &'a mut dyn SerialPort,
    src: &'a [u8],
    config: XmodemConfig,
    mode: Mode,
    frame: Frame,
    packet_no: u8,
    offset: usize,
    attempt: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub enum SenderStep<'a> {
    Next(Box<dyn SenderState<'a> + 'a>),
    Complete(usize),
}

pub trait SenderState<'a>: Send {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S: Send> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            port: self.port,
            src: self.src,
            config: self.config,
            mode: self.mode,
            frame: self.frame,
            packet_no: self.packet_no,
            offset: self.offset,
            attempt: self.attempt,
        })
    }

    fn next<T>(self) -> SenderStep<'a>
    where
        SenderFsm<'a, T>: SenderState<'a> + 'a,
    {
        let next = self.transition::<T>();
        SenderStep::Next(next as Box<dyn SenderState<'a> + 'a>)
    }

    fn io_error(&self, e: io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<u8>, SenderError> {
        self.port.read_byte(timeout).map_err(|e| self.io_error(e))
    }

    fn send(&mut self, byte: u8) -> Result<(), SenderError> {
        self.port.send_byte(byte).map_err(|e| self.io_error(e))?;
        debug!("Sent: {}", control_name(byte));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SenderError> {
        let timeout = self.config.flush_timeout();
        flush_input(&mut *self.port, timeout).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), SenderError> {
        send_cancel(&mut *self.port).map_err(|e| self.io_error(e))?;
        self.flush()
    }

    /// Checks for the second CAN of a cancel request
    fn remote_cancelled(&mut self) -> Result<bool, SenderError> {
        let timeout = self.config.byte_timeout;
        if self.read(timeout)? != Some(CAN) {
            debug!("Ignoring lone CAN");
            return Ok(false);
        }

        warn!("Transfer cancelled by receiver");
        self.send(ACK)?;
        self.flush()?;
        Ok(true)
    }

    fn transmit_frame(&mut self) -> Result<(), SenderError> {
        let delay = self.config.byte_delay;
        if delay.is_zero() {
            return self.port.write_all(self.frame.as_bytes()).map_err(|e| self.io_error(e));
        }

        // Byte by byte with a pause, for receivers that cannot keep up
        for &byte in self.frame.as_bytes() {
            self.port.send_byte(byte).map_err(|e| self.io_error(e))?;
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, AwaitingMode> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, SenderError> {
        let mut fsm = *self;

        let timeout = fsm.config.sync_timeout();
        match fsm.read(timeout)? {
            Some(CRC_REQUEST) => {
                debug!("Received: 'C'");
                fsm.mode = Mode::Crc;
            }
            Some(NAK) => {
                debug!("Received: NAK");
                fsm.mode = Mode::Checksum;
            }
            Some(CAN) => {
                if fsm.remote_cancelled()? {
                    return Err(SenderError::RemoteCancelled);
                }
                return fsm.retry_sync();
            }
            Some(other) => {
                debug!("Ignoring unexpected {}", control_name(other));
                return fsm.retry_sync();
            }
            None => return fsm.retry_sync(),
        }

        info!("Receiver ready, using {} mode", fsm.mode);
        fsm.attempt = 0;
        Ok(fsm.next::<Sending>())
    }
}

impl<'a> SenderFsm<'a, AwaitingMode> {
    fn retry_sync(mut self) -> Result<SenderStep<'a>, SenderError> {
        self.attempt += 1;
        if self.attempt < self.config.sync_retries {
            return Ok(SenderStep::Next(Box::new(self)));
        }

        warn!("Receiver not ready after {} attempts", self.attempt);
        self.abort()?;
        Err(SenderError::NoSync)
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, Sending> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, SenderError> {
        let mut fsm = *self;

        if fsm.offset >= fsm.src.len() {
            debug!("All {} bytes acknowledged", fsm.src.len());
            fsm.attempt = 0;
            return Ok(fsm.next::<EotPhase>());
        }

        let size = fsm.config.packet_size;
        let end = (fsm.offset + size.len()).min(fsm.src.len());
        fsm.frame = Frame::build(fsm.packet_no, &fsm.src[fsm.offset..end], size, fsm.mode);
        debug!("Prepared packet {} ({} bytes at offset {})", fsm.packet_no, end - fsm.offset, fsm.offset);

        fsm.attempt = 0;
        Ok(fsm.next::<AwaitingAck>())
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, AwaitingAck> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, SenderError> {
        let mut fsm = *self;

        if fsm.attempt >= fsm.config.max_retransmissions {
            warn!("Packet {} not acknowledged after {} attempts, cancelling", fsm.packet_no, fsm.attempt);
            fsm.abort()?;
            return Err(SenderError::TransmissionFailure { packet: fsm.packet_no });
        }

        if fsm.attempt > 0 {
            warn!("Retransmitting packet {} (attempt {})", fsm.packet_no, fsm.attempt + 1);
        }
        fsm.attempt += 1;

        fsm.transmit_frame()?;
        debug!("Sent: packet {}", fsm.packet_no);

        // Must outlast the receiver's flush before it answers NAK
        let timeout = fsm.config.sync_timeout();
        match fsm.read(timeout)? {
            Some(ACK) => {
                debug!("Received: ACK");
                fsm.offset += fsm.frame.size().len();
                fsm.packet_no = fsm.packet_no.wrapping_add(1);
                return Ok(fsm.next::<Sending>());
            }
            Some(CAN) => {
                if fsm.remote_cancelled()? {
                    return Err(SenderError::RemoteCancelled);
                }
            }
            Some(NAK) => debug!("Received: NAK"),
            Some(other) => debug!("Unexpected {} while waiting for ACK", control_name(other)),
            None => debug!("Timed out waiting for ACK"),
        }

        Ok(SenderStep::Next(Box::new(fsm)))
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, EotPhase> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, SenderError> {
        let mut fsm = *self;

        if fsm.attempt >= fsm.config.eot_retries {
            fsm.flush()?;
            warn!("No ACK for EOT after {} attempts", fsm.attempt);
            return Err(SenderError::EotFailure);
        }
        fsm.attempt += 1;

        fsm.send(EOT)?;
        let timeout = fsm.config.sync_timeout();
        if fsm.read(timeout)? == Some(ACK) {
            debug!("Received: ACK");
            fsm.flush()?;
            info!("Transfer complete, sent {} bytes", fsm.src.len());
            return Ok(SenderStep::Complete(fsm.src.len()));
        }

        Ok(SenderStep::Next(Box::new(fsm)))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> SenderFsm<'a, AwaitingMode> {
    pub fn new(
        port: &'a mut dyn SerialPort,
        src: &'a [u8],
        config: XmodemConfig,
    ) -> Box<dyn SenderState<'a> + 'a> {
        Box::new(SenderFsm {
            state: PhantomData::<AwaitingMode>,
            port,
            src,
            config,
            mode: Mode::Checksum,
            frame: Frame::new(config.packet_size, Mode::Checksum),
            packet_no: 1,
            offset: 0,
            attempt: 0,
        })
    }
}

/// Sends all of `src`, returning its length once the receiver acknowledged EOT
pub fn transmit<'a>(
    port: &'a mut dyn SerialPort,
    src: &'a [u8],
    config: &XmodemConfig,
) -> Result<usize, SenderError> {
    info!("Waiting for receiver to send {} bytes", src.len());
    let mut state = SenderFsm::<AwaitingMode>::new(port, src, *config);

    loop {
        match state.step()? {
            SenderStep::Next(next) => state = next,
            SenderStep::Complete(len) => return Ok(len),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
