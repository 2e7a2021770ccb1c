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

// Netloader protocol implementation
mod display;
mod echo;
mod frame;
mod launch;
mod metadata;
mod protocol;
mod receiver;
mod sector;
mod sender;
mod serial;
mod store;
mod transport;

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use display::{LogDisplay, StatusDisplay};
use launch::CommandLauncher;
use protocol::{DEFAULT_HOST, DEFAULT_IMAGE_NAME, DEFAULT_TCP_PORT};
use sector::SectorAccumulator;
use serial::{RealSerialPort, TcpLink};
use store::{BlockStore, DirectoryStore};
use transport::{AtModem, ModemConfig};

#[derive(Parser)]
#[command(name = "netloader")]
#[command(about = "Netloader protocol implementation for loading game images over a WiFi modem", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Log filter (e.g. info, netloader=trace). RUST_LOG takes precedence.
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive an image through an AT-command modem on a serial port
    Receive {
        /// Serial port the modem is attached to (e.g., /dev/ttyUSB0 or COM1)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value = "115200")]
        baud: u32,

        /// Data bits (5, 6, 7, or 8)
        #[arg(long, default_value = "8", value_name = "BITS")]
        data_bits: u8,

        /// Parity (none, odd, or even)
        #[arg(long, default_value = "none")]
        parity: String,

        /// Stop bits (1 or 2)
        #[arg(long, default_value = "1", value_name = "BITS")]
        stop_bits: u8,

        /// Directory holding the pre-allocated image file
        #[arg(short, long, default_value = ".")]
        media: PathBuf,

        /// Name of the pre-allocated image file
        #[arg(short, long, default_value = DEFAULT_IMAGE_NAME)]
        image: String,

        /// Delay in microseconds after consuming each received byte
        #[arg(long, default_value = "100", value_name = "US")]
        byte_pacing_us: u64,

        /// Pause in milliseconds between the modem's send prompt and the payload
        #[arg(long, default_value = "33", value_name = "MS")]
        send_settle_ms: u64,

        /// Give up after this many milliseconds without link activity
        #[arg(long, value_name = "MS")]
        link_timeout_ms: Option<u64>,

        /// Assume the modem is already in server mode
        #[arg(long)]
        skip_modem_init: bool,

        /// Program to run with the received image as its argument
        #[arg(long, value_name = "PROGRAM")]
        launch: Option<PathBuf>,
    },
    /// Send an image to a receiver over TCP
    Send {
        /// Receiver address
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Receiver TCP port
        #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
        tcp_port: u16,

        /// Image to send
        #[arg(short, long)]
        input: PathBuf,

        /// Send the file even if it is not a .uze image
        #[arg(short, long)]
        force: bool,

        /// How long to wait for each echo, in milliseconds
        #[arg(long, default_value = "10000", value_name = "MS")]
        reply_timeout_ms: u64,
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

fn init_logging(debug: bool, log_level: Option<&str>) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.unwrap_or(fallback)))
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Reports a setup failure the way a transfer fault would be shown, then exits.
fn fail(display: &mut dyn StatusDisplay, message: String) -> ! {
    display.fault(&message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_level.as_deref());

    let mut display = LogDisplay;

    match cli.command {
        Commands::Receive {
            port,
            baud,
            data_bits,
            parity,
            stop_bits,
            media,
            image,
            byte_pacing_us,
            send_settle_ms,
            link_timeout_ms,
            skip_modem_init,
            launch,
        } => {
            let data_bits = parse_data_bits(data_bits).unwrap_or_else(|e| fail(&mut display, e));
            let parity = parse_parity(&parity).unwrap_or_else(|e| fail(&mut display, e));
            let stop_bits = parse_stop_bits(stop_bits).unwrap_or_else(|e| fail(&mut display, e));

            info!("Opening serial port: {}", port);
            debug!("Settings: {} baud, {:?}, {:?}, {:?}", baud, data_bits, parity, stop_bits);

            let serial_port = RealSerialPort::open(&port, baud, data_bits, parity, stop_bits)
                .unwrap_or_else(|e| fail(&mut display, format!("Failed to open serial port: {}", e)));

            let config = ModemConfig {
                send_settle: Duration::from_millis(send_settle_ms),
                link_timeout: link_timeout_ms.map(Duration::from_millis),
                ..ModemConfig::default()
            };
            let mut modem = AtModem::new(Box::new(serial_port), config);

            if !skip_modem_init {
                info!("Initializing modem");
                if let Err(e) = modem.initialize() {
                    fail(&mut display, format!("Modem initialization failed: {}", e));
                }
            }

            let (sectors, image_path) = open_image(&media, &image)
                .unwrap_or_else(|e| fail(&mut display, e.to_string()));

            info!("Waiting for sender, receiving into {}", image_path.display());
            let launcher = CommandLauncher::new(launch, image_path);

            // The receiver has already shown its fault
            if receive_image(modem, sectors, launcher, Duration::from_micros(byte_pacing_us)).is_err() {
                std::process::exit(1);
            }
            info!("Image received successfully!");
        }
        Commands::Send { host, tcp_port, input, force, reply_timeout_ms } => {
            info!("Sending {} to {}:{}", input.display(), host, tcp_port);
            if let Err(e) = send_image(&host, tcp_port, &input, force, Duration::from_millis(reply_timeout_ms)) {
                fail(&mut display, format!("Send failed: {}", e));
            }
            info!("Image sent successfully!");
        }
    }
}

/// Mounts the media directory and opens the accumulator on the image file.
fn open_image(media: &Path, image: &str) -> Result<(SectorAccumulator, PathBuf), store::StoreError> {
    let mut store = DirectoryStore::mount(media)?;

    let path = store
        .locate(image)?
        .and_then(|handle| store.path_of(handle))
        .map(Path::to_path_buf)
        .unwrap_or_else(|| media.join(image));

    let sectors = SectorAccumulator::open(Box::new(store), image)?;
    Ok((sectors, path))
}

fn receive_image(
    modem: AtModem,
    sectors: SectorAccumulator,
    launcher: CommandLauncher,
    byte_pacing: Duration,
) -> Result<(), receiver::ReceiverError> {
    use receiver::{AwaitingFrameCount, ReceiverFsm};

    let mut state = ReceiverFsm::<AwaitingFrameCount>::new(
        Box::new(modem),
        sectors,
        Box::new(LogDisplay),
        Box::new(launcher),
        byte_pacing,
    );

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(receiver::ReceiverError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn send_image(
    host: &str,
    port: u16,
    input: &Path,
    force: bool,
    reply_timeout: Duration,
) -> Result<(), sender::SenderError> {
    use sender::{SendFrameCount, SenderFsm};

    let (file, size, metadata) = sender::open_image(input, force)?;
    if !metadata.name.is_empty() {
        info!("{}", metadata);
    }

    let link = TcpLink::connect(host, port, reply_timeout)?;
    let mut state = SenderFsm::<SendFrameCount>::new(
        Box::new(link),
        file,
        size,
        reply_timeout,
        Duration::from_millis(150),
    );

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(sender::SenderError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
