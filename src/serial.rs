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

//! Raw byte links. The receiver talks to the WiFi modem over a serial line;
//! the sender reaches the same modem's TCP server over the network.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// Link Trait
// ============================================================================

/// Byte link under both ends of the netloader protocol. Everything above it
/// (AT commands, `+IPD` framing, echoes) is plain bytes at this level.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Reads whatever is available, failing with `TimedOut` if nothing
    /// arrives within `timeout`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// UART line to the ESP8266-style modem. Opened with a 1 ms timeout so the
/// modem receive buffer can be polled without stalling the pacing loop.
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(1))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }
}

// ============================================================================
// TCP Link Implementation
// ============================================================================

/// TCP connection to the modem's server, used by the sending side
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {}:{}", host, port),
        );

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(TcpLink { stream });
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }
}

impl SerialPort for TcpLink {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        // A zero read timeout is rejected by the socket layer
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;

        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                e,
            )),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Scripted Modem Line for Testing
// ============================================================================

/// Plays back what the modem says and records what the loader sends it.
#[cfg(test)]
pub struct MockSerialPort {
    // Modem output; `None` is a quiet poll that ends the current burst
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Commands and payload bytes sent to the modem
    write_log: Vec<u8>,
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

/// One modem burst: the bytes arrive back to back, then the line goes quiet
/// for a poll, which is how a frame boundary looks to the receiver.
#[cfg(test)]
pub fn burst(bytes: &[u8]) -> Vec<Option<u8>> {
    let mut out: Vec<Option<u8>> = bytes.iter().copied().map(Some).collect();
    out.push(None);
    out
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Script exhausted: the modem has nothing more to say
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "modem script exhausted"
            ));
        }

        // Quiet poll between bursts
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "modem quiet"
            ));
        }

        // Hand over the rest of the current burst, as much as fits
        let burst = self.read_buffer[self.read_pos..].iter().map_while(|entry| *entry);
        let mut bytes_read = 0;
        for (slot, byte) in buf.iter_mut().zip(burst) {
            *slot = byte;
            bytes_read += 1;
        }
        self.read_pos += bytes_read;

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "modem script left {} entries unread ({} of {} consumed)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "bytes sent to the modem differ\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
