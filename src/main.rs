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

use clap::{Parser, Subcommand};
use log::info;
use serialport::{DataBits, Parity, StopBits};
use std::path::{Path, PathBuf};
use std::time::Duration;
use xmodem::protocol::PAD;
use xmodem::{PacketSize, RealSerialPort, ReceiverError, SenderError, XmodemConfig};

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM file transfer over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Per-byte read timeout in milliseconds; packet sync waits twice as long
    #[arg(long, default_value = "1000", value_name = "MS")]
    timeout: u64,

    /// Delay in milliseconds between sending each byte of a packet
    #[arg(long, default_value = "0", value_name = "MS")]
    byte_delay: u8,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file using the XMODEM protocol
    Send {
        /// File to send
        file: PathBuf,

        /// Use 1024-byte packets (XMODEM-1K)
        #[arg(long = "1k")]
        one_k: bool,
    },
    /// Receive a file using the XMODEM protocol
    Receive {
        /// Where to save the received data
        file: PathBuf,

        /// Largest transfer accepted; anything beyond is dropped
        #[arg(long, default_value = "16777216", value_name = "BYTES")]
        max_size: usize,

        /// Strip the trailing 0x1A padding of the last packet
        #[arg(long)]
        trim: bool,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Opening serial port: {}", cli.port);
    info!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let mut serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let config = XmodemConfig::new()
        .with_byte_timeout(Duration::from_millis(cli.timeout))
        .with_byte_delay(Duration::from_millis(cli.byte_delay as u64));

    match cli.command {
        Commands::Send { file, one_k } => {
            let size = if one_k { PacketSize::OneK } else { PacketSize::Standard };
            let config = config.with_packet_size(size);

            info!("Sending file: {}", file.display());
            info!("Prepare your terminal emulator to receive data now...");
            match send_file(&mut serial_port, &file, &config) {
                Ok(sent) => info!("File sent successfully ({} bytes)", sent),
                Err(e) if e.is_unconfirmed() => {
                    eprintln!("Send unconfirmed: {} (data was acknowledged, it probably arrived)", e);
                    std::process::exit(4);
                }
                Err(e) => {
                    eprintln!("Send failed: {}", e);
                    std::process::exit(if matches!(e, SenderError::Io(_)) { 1 } else { 4 });
                }
            }
        }
        Commands::Receive { file, max_size, trim } => {
            info!("Receiving to: {}", file.display());
            info!("Send data using the XMODEM protocol from your terminal emulator now...");
            match receive_file(&mut serial_port, &file, max_size, trim, &config) {
                Ok(saved) => info!("File received successfully ({} bytes saved)", saved),
                Err(e) => {
                    eprintln!("Receive failed: {}", e);
                    std::process::exit(if matches!(e, ReceiverError::Io(_)) { 1 } else { 3 });
                }
            }
        }
    }
}

fn send_file(serial_port: &mut RealSerialPort, file: &Path, config: &XmodemConfig) -> Result<usize, SenderError> {
    if !file.exists() {
        return Err(SenderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let data = std::fs::read(file)?;
    xmodem::transmit(serial_port, &data, config)
}

fn receive_file(
    serial_port: &mut RealSerialPort,
    file: &Path,
    max_size: usize,
    trim: bool,
    config: &XmodemConfig,
) -> Result<usize, ReceiverError> {
    let mut buffer = vec![0u8; max_size];
    let len = xmodem::receive(serial_port, &mut buffer, config)?;

    let data = if trim { strip_padding(&buffer[..len]) } else { &buffer[..len] };
    std::fs::write(file, data)?;
    Ok(data.len())
}

/// Drops a trailing PAD byte and the zero fill after it.
///
/// Data is returned unchanged when its last non-zero byte is not PAD.
fn strip_padding(data: &[u8]) -> &[u8] {
    match data.iter().rposition(|&b| b != 0) {
        Some(last) if data[last] == PAD => &data[..last],
        _ => data,
    }
}
