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

//! XMODEM file transfer over a byte transport.
//!
//! [`receive`] and [`transmit`] run one transfer to completion over any
//! [`SerialPort`]. Both negotiate checksum or CRC-16 mode with the peer,
//! retransmit rejected packets, and give up with a typed error once a retry
//! budget is spent or the peer cancels.

pub mod checksum;
pub mod config;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;

pub use checksum::Mode;
pub use config::XmodemConfig;
pub use protocol::PacketSize;
pub use receiver::{receive, ReceiverError};
pub use sender::{transmit, SenderError};
pub use serial::{RealSerialPort, SerialPort};
