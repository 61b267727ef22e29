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

//! End-to-end transfers: the real sender and receiver on two threads,
//! joined by an in-memory byte pipe that can drop or corrupt bytes.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use xmodem::protocol::{ACK, CAN, CRC_REQUEST, EOT, NAK, SOH};
use xmodem::{receive, transmit, ReceiverError, SenderError, SerialPort, XmodemConfig};

type Tamper = Box<dyn FnMut(usize, u8) -> Option<u8> + Send>;

/// One end of a byte pipe
struct PipePort {
    tx: Sender<u8>,
    rx: Receiver<u8>,
    // Sees every outgoing byte with its index; None drops it
    tamper: Option<Tamper>,
    written: usize,
    // Outgoing bytes before tampering
    log: Arc<Mutex<Vec<u8>>>,
}

impl PipePort {
    fn with_tamper(mut self, tamper: impl FnMut(usize, u8) -> Option<u8> + Send + 'static) -> Self {
        self.tamper = Some(Box::new(tamper));
        self
    }

    fn log(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.log)
    }
}

impl SerialPort for PipePort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.log.lock().unwrap().extend_from_slice(buf);
        for &byte in buf {
            let index = self.written;
            self.written += 1;

            let out = match self.tamper.as_mut() {
                Some(tamper) => tamper(index, byte),
                None => Some(byte),
            };

            // Peer may already have finished; the wire just loses the byte
            if let Some(byte) = out {
                let _ = self.tx.send(byte);
            }
        }
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => Ok(Some(byte)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

fn pipe() -> (PipePort, PipePort) {
    let (a_tx, a_rx) = unbounded();
    let (b_tx, b_rx) = unbounded();

    let end = |tx, rx| PipePort {
        tx,
        rx,
        tamper: None,
        written: 0,
        log: Arc::new(Mutex::new(Vec::new())),
    };

    (end(a_tx, b_rx), end(b_tx, a_rx))
}

fn fast_config() -> XmodemConfig {
    XmodemConfig::default().with_byte_timeout(Duration::from_millis(100))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

struct Outcome {
    sent: Result<usize, SenderError>,
    received: Result<usize, ReceiverError>,
    buffer: Vec<u8>,
}

fn run_transfer(
    payload: &[u8],
    capacity: usize,
    mut sender_port: PipePort,
    mut receiver_port: PipePort,
    sender_config: XmodemConfig,
    receiver_config: XmodemConfig,
) -> Outcome {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut buffer = vec![0u8; capacity];

    let (sent, received) = thread::scope(|scope| {
        let sender = scope.spawn(|| transmit(&mut sender_port, payload, &sender_config));
        let received = receive(&mut receiver_port, &mut buffer, &receiver_config);
        (sender.join().expect("sender thread panicked"), received)
    });

    Outcome { sent, received, buffer }
}

#[test]
fn round_trip_crc_mode() {
    for len in [0, 1, 127, 128, 129, 1000, 3 * 1024] {
        let payload = pattern(len);
        let (sender_port, receiver_port) = pipe();

        let outcome = run_transfer(&payload, 4 * 1024, sender_port, receiver_port, fast_config(), fast_config());

        assert_eq!(outcome.sent.expect("send failed"), len);
        let received = outcome.received.expect("receive failed");
        assert_eq!(received, len.div_ceil(128) * 128, "length {}", len);
        assert_eq!(&outcome.buffer[..len], &payload[..], "length {}", len);
    }
}

#[test]
fn round_trip_checksum_mode_after_crc_requests_lost() {
    let payload = pattern(700);
    let (sender_port, receiver_port) = pipe();
    let sender_log = sender_port.log();

    // Every 'C' vanishes on the wire, so only the NAK fallback gets through
    let receiver_port = receiver_port.with_tamper(|_, byte| (byte != CRC_REQUEST).then_some(byte));
    let receiver_config = fast_config().with_sync_retries(4);

    let outcome = run_transfer(&payload, 1024, sender_port, receiver_port, fast_config(), receiver_config);

    assert_eq!(outcome.sent.expect("send failed"), 700);
    assert_eq!(outcome.received.expect("receive failed"), 768);
    assert_eq!(&outcome.buffer[..700], &payload[..]);

    // Six checksum frames of 132 bytes, then EOT
    let log = sender_log.lock().unwrap();
    assert_eq!(log.len(), 6 * 132 + 1);
    assert_eq!(log[0], SOH);
    assert_eq!(*log.last().unwrap(), EOT);
}

#[test]
fn crc_mode_when_first_start_follows_c() {
    let payload = pattern(200);
    let (sender_port, receiver_port) = pipe();
    let sender_log = sender_port.log();
    let receiver_log = receiver_port.log();

    let outcome = run_transfer(&payload, 256, sender_port, receiver_port, fast_config(), fast_config());
    assert!(outcome.sent.is_ok());
    assert!(outcome.received.is_ok());

    assert_eq!(sender_log.lock().unwrap().len(), 2 * 133 + 1);
    assert_eq!(receiver_log.lock().unwrap()[0], CRC_REQUEST);
}

#[test]
fn lost_ack_is_absorbed_as_duplicate() {
    let payload = pattern(512);
    let (sender_port, receiver_port) = pipe();
    let sender_log = sender_port.log();
    let receiver_log = receiver_port.log();

    let mut dropped = false;
    let receiver_port = receiver_port.with_tamper(move |_, byte| {
        if byte == ACK && !dropped {
            dropped = true;
            return None;
        }
        Some(byte)
    });

    let outcome = run_transfer(&payload, 512, sender_port, receiver_port, fast_config(), fast_config());

    assert_eq!(outcome.sent.expect("send failed"), 512);
    assert_eq!(outcome.received.expect("receive failed"), 512);
    assert_eq!(outcome.buffer, payload);

    // Packet 1 went out twice and both copies were acknowledged
    let sent = sender_log.lock().unwrap();
    assert_eq!(sent.len(), 5 * 133 + 1);
    assert_eq!(&sent[..133], &sent[133..266]);

    let acks = receiver_log.lock().unwrap().iter().filter(|&&b| b == ACK).count();
    assert_eq!(acks, 4 + 1 + 1);
}

#[test]
fn corrupted_packet_is_rejected_and_resent() {
    let payload = pattern(256);
    let (sender_port, receiver_port) = pipe();
    let sender_log = sender_port.log();
    let receiver_log = receiver_port.log();

    // Flip one payload bit of the very first transmission
    let sender_port = sender_port.with_tamper(|index, byte| {
        Some(if index == 60 { byte ^ 0x08 } else { byte })
    });

    let outcome = run_transfer(&payload, 256, sender_port, receiver_port, fast_config(), fast_config());

    assert_eq!(outcome.sent.expect("send failed"), 256);
    assert_eq!(outcome.received.expect("receive failed"), 256);
    assert_eq!(outcome.buffer, payload);

    let sent = sender_log.lock().unwrap();
    assert_eq!(sent.len(), 3 * 133 + 1);
    assert_eq!(&sent[..133], &sent[133..266]);

    let replies = receiver_log.lock().unwrap();
    assert_eq!(&replies[..], &[CRC_REQUEST, NAK, ACK, ACK, ACK]);
}

#[test]
fn corrupted_trailer_is_rejected() {
    let payload = pattern(100);
    let (sender_port, receiver_port) = pipe();

    // Low CRC byte of the first frame
    let sender_port = sender_port.with_tamper(|index, byte| {
        Some(if index == 132 { byte ^ 0x80 } else { byte })
    });

    let outcome = run_transfer(&payload, 128, sender_port, receiver_port, fast_config(), fast_config());

    assert_eq!(outcome.sent.expect("send failed"), 100);
    assert_eq!(outcome.received.expect("receive failed"), 128);
    assert_eq!(&outcome.buffer[..100], &payload[..]);
}

#[test]
fn persistent_corruption_fails_instead_of_hanging() {
    let payload = pattern(128);
    let (sender_port, receiver_port) = pipe();

    let sender_port = sender_port.with_tamper(|index, byte| {
        Some(if index % 133 == 10 { byte ^ 0x01 } else { byte })
    });

    let config = fast_config().with_max_retransmissions(5);
    let outcome = run_transfer(&payload, 128, sender_port, receiver_port, config, config);

    assert!(matches!(outcome.sent, Err(SenderError::TransmissionFailure { packet: 1 })));
    assert!(matches!(outcome.received, Err(ReceiverError::RemoteCancelled)));
}

#[test]
fn truncates_to_receiver_capacity() {
    let payload = pattern(1000);
    let (sender_port, receiver_port) = pipe();

    let outcome = run_transfer(&payload, 300, sender_port, receiver_port, fast_config(), fast_config());

    assert_eq!(outcome.sent.expect("send failed"), 1000);
    assert_eq!(outcome.received.expect("receive failed"), 300);
    assert_eq!(outcome.buffer, &payload[..300]);
}

#[test]
fn one_k_packets_round_trip() {
    let payload = pattern(2500);
    let (sender_port, receiver_port) = pipe();
    let sender_log = sender_port.log();

    let sender_config = fast_config().with_packet_size(xmodem::PacketSize::OneK);
    let outcome = run_transfer(&payload, 4096, sender_port, receiver_port, sender_config, fast_config());

    assert_eq!(outcome.sent.expect("send failed"), 2500);
    assert_eq!(outcome.received.expect("receive failed"), 3 * 1024);
    assert_eq!(&outcome.buffer[..2500], &payload[..]);
    assert_eq!(sender_log.lock().unwrap().len(), 3 * 1029 + 1);
}

#[test]
fn three_hundred_bytes_end_to_end() {
    let payload = vec![0x42u8; 300];
    let (sender_port, receiver_port) = pipe();
    let sender_log = sender_port.log();
    let receiver_log = receiver_port.log();

    let outcome = run_transfer(&payload, 300, sender_port, receiver_port, fast_config(), fast_config());

    assert_eq!(outcome.sent.expect("send failed"), 300);
    assert_eq!(outcome.received.expect("receive failed"), 300);
    assert_eq!(outcome.buffer, payload);

    let sent = sender_log.lock().unwrap();
    assert_eq!(sent.len(), 3 * 133 + 1);
    for (i, frame) in sent[..3 * 133].chunks(133).enumerate() {
        let number = (i + 1) as u8;
        assert_eq!(&frame[..3], &[SOH, number, !number]);
    }
    // Last packet: 44 data bytes, PAD, zero fill
    let last = &sent[2 * 133 + 3..2 * 133 + 131];
    assert!(last[..44].iter().all(|&b| b == 0x42));
    assert_eq!(last[44], 0x1A);
    assert!(last[45..].iter().all(|&b| b == 0));
    assert_eq!(sent[3 * 133], EOT);

    assert_eq!(&receiver_log.lock().unwrap()[..], &[CRC_REQUEST, ACK, ACK, ACK, ACK]);
}

// A hand-driven peer lets the tests cancel at a precise point

#[test]
fn receiver_cancel_mid_transfer_stops_sender() {
    let _ = env_logger::builder().is_test(true).try_init();

    let payload = pattern(1000);
    let (mut sender_port, mut peer) = pipe();
    let config = fast_config();

    let result = thread::scope(|scope| {
        let sender = scope.spawn(|| transmit(&mut sender_port, &payload, &config));

        peer.send_byte(CRC_REQUEST).unwrap();
        for _ in 0..133 {
            peer.read_byte(Duration::from_secs(1)).unwrap().expect("frame byte");
        }
        peer.send_byte(ACK).unwrap();
        for _ in 0..133 {
            peer.read_byte(Duration::from_secs(1)).unwrap().expect("frame byte");
        }
        peer.write_all(&[CAN, CAN]).unwrap();

        assert_eq!(peer.read_byte(Duration::from_secs(1)).unwrap(), Some(ACK));
        sender.join().expect("sender thread panicked")
    });

    assert!(matches!(result, Err(SenderError::RemoteCancelled)));
}

#[test]
fn sender_cancel_mid_transfer_stops_receiver() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (mut peer, mut receiver_port) = pipe();
    let config = fast_config();
    let mut buffer = vec![0u8; 1024];

    let frame = xmodem::packet::Frame::build(1, b"partial", xmodem::PacketSize::Standard, xmodem::Mode::Crc);

    let result = thread::scope(|scope| {
        let receiver = scope.spawn(|| receive(&mut receiver_port, &mut buffer, &config));

        assert_eq!(peer.read_byte(Duration::from_secs(1)).unwrap(), Some(CRC_REQUEST));
        peer.write_all(frame.as_bytes()).unwrap();
        assert_eq!(peer.read_byte(Duration::from_secs(1)).unwrap(), Some(ACK));

        peer.write_all(&[CAN, CAN]).unwrap();
        assert_eq!(peer.read_byte(Duration::from_secs(1)).unwrap(), Some(ACK));
        receiver.join().expect("receiver thread panicked")
    });

    assert!(matches!(result, Err(ReceiverError::RemoteCancelled)));
}

#[test]
fn silent_peer_is_a_sync_failure() {
    let (mut sender_port, _receiver_end) = pipe();
    let config = fast_config().with_sync_retries(3);

    let result = transmit(&mut sender_port, b"nobody listening", &config);
    assert!(matches!(result, Err(SenderError::NoSync)));

    let (_sender_end, mut receiver_port) = pipe();
    let mut buffer = [0u8; 128];
    let result = receive(&mut receiver_port, &mut buffer, &config);
    assert!(matches!(result, Err(ReceiverError::SyncError)));
}
