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

//! NetLoader protocol constants

/// Payload bytes per frame; the sender must use the same value
pub const FRAME_SIZE: usize = 128;

/// Bytes per sector of the block store
pub const SECTOR_SIZE: usize = 512;

const _: () = assert!(SECTOR_SIZE % FRAME_SIZE == 0, "frame size must divide sector size");

/// Frames that make up one sector
pub const FRAMES_PER_SECTOR: usize = SECTOR_SIZE / FRAME_SIZE;

/// Ends the link header that precedes every payload
pub const DELIMITER: u8 = b':';

/// End-of-transfer marker, sent by the peer as a payload and echoed back
pub const SENTINEL: &[u8; 4] = b"DONE";

/// Magic at the start of a .uze game image
pub const UZE_MAGIC: &[u8; 6] = b"UZEBOX";

/// Image file the loader writes into on the block store
pub const DEFAULT_IMAGE_NAME: &str = "NETLOAD.BIN";

/// Soft access point address of the modem
pub const DEFAULT_HOST: &str = "192.168.4.1";

/// TCP port the modem's server listens on
pub const DEFAULT_TCP_PORT: u16 = 333;

// ============================================================================
// AT command set
// ============================================================================

/// Modem bring-up: station + soft AP, multiple connections, server, no peer info
pub const MODEM_INIT: [&[u8]; 4] = [
    b"AT+CWMODE=3\r\n",
    b"AT+CIPMUX=1\r\n",
    b"AT+CIPSERVER=1\r\n",
    b"AT+CIPDINFO=0\r\n",
];

/// Reply to a successful configuration command
pub const MODEM_OK: &[u8] = b"OK\r\n";

/// Prefix of the send command; followed by the decimal byte count
pub const SEND_COMMAND: &[u8] = b"AT+CIPSEND=0,";

/// Prompt issued once the modem accepts bytes to send
pub const SEND_PROMPT: &[u8] = b"> ";

/// Acknowledgment that a send went out on the link
pub const SEND_OK: &[u8] = b"SEND OK\r\n";

/// Line terminator
pub const TERMINATOR: &[u8] = b"\r\n";

// ============================================================================
// Game image header layout
// ============================================================================

/// Low byte of the release year
pub const YEAR_LOW_OFFSET: usize = 12;

/// High byte of the release year
pub const YEAR_HIGH_OFFSET: usize = 13;

/// Game name, 31 bytes
pub const NAME_RANGE: std::ops::Range<usize> = 14..45;

/// Author, 31 bytes; byte 45 is a separator
pub const AUTHOR_RANGE: std::ops::Range<usize> = 46..77;
