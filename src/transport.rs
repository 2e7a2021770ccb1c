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

//! AT-command modem transport.
//!
//! The modem delivers link traffic and its own status text over one serial
//! line. [`AtModem`] keeps a receive buffer fed by polling the port, which
//! stands in for the interrupt-driven buffer of the console firmware.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no {waiting_for} after {waited:?}")]
    Timeout {
        waiting_for: String,
        waited: Duration,
    },
}

// ============================================================================
// Trait
// ============================================================================

/// Link primitives the loader consumes
pub trait Transport: Send {
    /// Bytes received and not yet read
    fn unread_byte_count(&mut self) -> Result<usize, TransportError>;

    fn read_byte(&mut self) -> Result<u8, TransportError>;

    /// Announces `length` outgoing bytes and blocks until the modem prompts.
    fn send_prepare(&mut self, length: usize) -> Result<(), TransportError>;

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    fn send_terminator(&mut self) -> Result<(), TransportError>;

    /// Blocks until `expected` appears on the link.
    fn wait_for_ack(&mut self, expected: &[u8]) -> Result<(), TransportError>;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// How long a single poll of the serial port may block
    pub poll_interval: Duration,
    /// Pause after the send prompt before writing payload bytes
    pub send_settle: Duration,
    /// Give up waiting after this long. `None` waits forever.
    pub link_timeout: Option<Duration>,
}

impl Default for ModemConfig {
    fn default() -> Self {
        ModemConfig {
            poll_interval: Duration::from_millis(1),
            send_settle: Duration::from_millis(33),
            link_timeout: None,
        }
    }
}

// ============================================================================
// AT Modem
// ============================================================================

pub struct AtModem {
    serial: Box<dyn SerialPort>,
    rx: VecDeque<u8>,
    config: ModemConfig,
    last_activity: Instant,
}

impl AtModem {
    pub fn new(serial: Box<dyn SerialPort>, config: ModemConfig) -> Self {
        AtModem {
            serial,
            rx: VecDeque::new(),
            config,
            last_activity: Instant::now(),
        }
    }

    /// Puts the modem in server mode so the sender can connect.
    pub fn initialize(&mut self) -> Result<(), TransportError> {
        for command in MODEM_INIT {
            self.serial.write_all(command)?;
            debug!(command = %String::from_utf8_lossy(command).trim_end(), "sent modem command");
            self.wait_for_ack(MODEM_OK)?;
        }
        Ok(())
    }

    /// Moves whatever the port has into the receive buffer.
    fn pump(&mut self) -> Result<usize, TransportError> {
        let mut buf = [0u8; 64];
        match self.serial.read_timeout(&mut buf, self.config.poll_interval) {
            Ok(n) => {
                if n > 0 {
                    self.rx.extend(&buf[..n]);
                    self.last_activity = Instant::now();
                    trace!(bytes = n, "link receive");
                }
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn check_deadline(&self, since: Instant, waiting_for: &str) -> Result<(), TransportError> {
        match self.config.link_timeout {
            Some(limit) if since.elapsed() >= limit => Err(TransportError::Timeout {
                waiting_for: waiting_for.to_string(),
                waited: since.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

impl Transport for AtModem {
    fn unread_byte_count(&mut self) -> Result<usize, TransportError> {
        if self.rx.is_empty() && self.pump()? == 0 {
            self.check_deadline(self.last_activity, "incoming data")?;
        }
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> Result<u8, TransportError> {
        let started = Instant::now();
        loop {
            if let Some(byte) = self.rx.pop_front() {
                return Ok(byte);
            }
            if self.pump()? == 0 {
                self.check_deadline(started, "incoming byte")?;
            }
        }
    }

    fn send_prepare(&mut self, length: usize) -> Result<(), TransportError> {
        let mut command = SEND_COMMAND.to_vec();
        command.extend_from_slice(length.to_string().as_bytes());
        command.extend_from_slice(TERMINATOR);
        self.serial.write_all(&command)?;

        self.wait_for_ack(SEND_PROMPT)?;
        if !self.config.send_settle.is_zero() {
            std::thread::sleep(self.config.send_settle);
        }
        Ok(())
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.serial.write_all(bytes)?;
        Ok(())
    }

    fn send_terminator(&mut self) -> Result<(), TransportError> {
        self.serial.write_all(TERMINATOR)?;
        Ok(())
    }

    fn wait_for_ack(&mut self, expected: &[u8]) -> Result<(), TransportError> {
        let started = Instant::now();
        loop {
            if let Some(end) = find_token(self.rx.make_contiguous(), expected) {
                let skipped = end - expected.len();
                if skipped > 0 {
                    trace!(skipped, "discarded modem chatter");
                }
                self.rx.drain(..end);
                return Ok(());
            }
            if self.pump()? == 0 {
                self.check_deadline(started, &format!("{:?}", String::from_utf8_lossy(expected)))?;
            }
        }
    }
}

/// Index just past the first occurrence of `token` in `haystack`.
fn find_token(haystack: &[u8], token: &[u8]) -> Option<usize> {
    if token.is_empty() {
        return Some(0);
    }
    haystack
        .windows(token.len())
        .position(|window| window == token)
        .map(|start| start + token.len())
}

// ============================================================================
// Test Scripts
// ============================================================================

#[cfg(test)]
pub mod script {
    use super::*;
    use crate::serial::burst;

    /// No pauses, and a short timeout so a broken script fails instead of hanging
    pub fn quiet_config() -> ModemConfig {
        ModemConfig {
            poll_interval: Duration::ZERO,
            send_settle: Duration::ZERO,
            link_timeout: Some(Duration::from_millis(200)),
        }
    }

    /// Modem replies to one echo of `len` bytes
    pub fn echo_replies(len: usize) -> Vec<Option<u8>> {
        let mut replies = burst(format!("AT+CIPSEND=0,{}\r\n\r\nOK\r\n> ", len).as_bytes());
        replies.extend(burst(format!("\r\nRecv {} bytes\r\n\r\nSEND OK\r\n", len).as_bytes()));
        replies
    }

    /// What the loader writes for one echo of `payload`
    pub fn echo_writes(payload: &[u8]) -> Vec<u8> {
        let mut writes = format!("AT+CIPSEND=0,{}\r\n", payload.len()).into_bytes();
        writes.extend_from_slice(payload);
        writes.extend_from_slice(TERMINATOR);
        writes
    }

    /// A frame as the modem delivers it
    pub fn incoming(payload: &[u8]) -> Vec<Option<u8>> {
        let mut bytes = format!("\r\n+IPD,0,{}:", payload.len()).into_bytes();
        bytes.extend_from_slice(payload);
        burst(&bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
