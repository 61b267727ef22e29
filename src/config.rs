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

use std::time::Duration;
use crate::protocol::PacketSize;

/// Default wait for a single byte once a packet is under way
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempts per negotiation phase, and per wait for a packet start
pub const DEFAULT_SYNC_RETRIES: u32 = 16;

/// Budget for a packet that will not advance
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 25;

pub const DEFAULT_EOT_RETRIES: u32 = 10;

/// Timeouts and retry budgets for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmodemConfig {
    pub byte_timeout: Duration,
    pub sync_retries: u32,
    pub max_retransmissions: u32,
    pub eot_retries: u32,
    /// Payload size class used by the sender
    pub packet_size: PacketSize,
    /// Pause after every transmitted byte, for receivers with tiny UART buffers
    pub byte_delay: Duration,
}

impl XmodemConfig {
    pub fn new() -> Self {
        Self {
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
            sync_retries: DEFAULT_SYNC_RETRIES,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            eot_retries: DEFAULT_EOT_RETRIES,
            packet_size: PacketSize::Standard,
            byte_delay: Duration::ZERO,
        }
    }

    pub fn with_byte_timeout(mut self, timeout: Duration) -> Self {
        self.byte_timeout = timeout;
        self
    }

    pub fn with_sync_retries(mut self, retries: u32) -> Self {
        self.sync_retries = retries;
        self
    }

    pub fn with_max_retransmissions(mut self, retries: u32) -> Self {
        self.max_retransmissions = retries;
        self
    }

    pub fn with_eot_retries(mut self, retries: u32) -> Self {
        self.eot_retries = retries;
        self
    }

    pub fn with_packet_size(mut self, size: PacketSize) -> Self {
        self.packet_size = size;
        self
    }

    pub fn with_byte_delay(mut self, delay: Duration) -> Self {
        self.byte_delay = delay;
        self
    }

    /// Wait for a packet start or a negotiation character
    pub fn sync_timeout(&self) -> Duration {
        self.byte_timeout * 2
    }

    /// Per-read wait while draining stale input
    pub fn flush_timeout(&self) -> Duration {
        self.byte_timeout * 3 / 2
    }
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self::new()
    }
}
