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

//! Frame extraction from the raw link byte stream.
//!
//! Each payload arrives behind a link header of varying length that ends in
//! [`DELIMITER`]. The header is discarded and the payload is left-compacted
//! into a [`ChunkBuffer`].

use std::time::Duration;
use thiserror::Error;
use tracing::trace;
use crate::protocol::*;
use crate::transport::{Transport, TransportError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame payload exceeds {capacity} bytes")]
    Overflow { capacity: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ============================================================================
// Chunk Buffer
// ============================================================================

/// Scratch space for one frame payload.
///
/// Not cleared between frames; bytes past the current payload length are
/// whatever an earlier frame left there.
pub struct ChunkBuffer {
    bytes: [u8; FRAME_SIZE],
}

impl ChunkBuffer {
    pub fn new() -> Self {
        ChunkBuffer { bytes: [0; FRAME_SIZE] }
    }

    fn write(&mut self, index: usize, byte: u8) -> Result<(), FrameError> {
        let slot = self.bytes.get_mut(index).ok_or(FrameError::Overflow { capacity: FRAME_SIZE })?;
        *slot = byte;
        Ok(())
    }

    pub fn payload(&self, length: usize) -> &[u8] {
        &self.bytes[..length.min(FRAME_SIZE)]
    }
}

// ============================================================================
// Frame Extractor
// ============================================================================

/// Streaming delimiter scanner for a single drain cycle
pub struct FrameExtractor {
    position: usize,
    header_len: Option<usize>,
}

impl FrameExtractor {
    pub fn new() -> Self {
        FrameExtractor { position: 0, header_len: None }
    }

    /// Index of the delimiter in the stream, once seen
    pub fn delimiter_index(&self) -> Option<usize> {
        self.header_len.map(|len| len - 1)
    }

    pub fn feed(&mut self, byte: u8, chunk: &mut ChunkBuffer) -> Result<(), FrameError> {
        match self.header_len {
            Some(header_len) => chunk.write(self.position - header_len, byte)?,
            None if byte == DELIMITER => self.header_len = Some(self.position + 1),
            None => {}
        }
        self.position += 1;
        Ok(())
    }

    /// Payload bytes written so far; zero if no delimiter was seen
    pub fn payload_len(&self) -> usize {
        match self.header_len {
            Some(header_len) => self.position - header_len,
            None => 0,
        }
    }
}

/// Reads until the transport has nothing left unread, pausing `pacing`
/// between bytes, and returns the payload length written into `chunk`.
pub fn drain_frame(
    transport: &mut dyn Transport,
    chunk: &mut ChunkBuffer,
    pacing: Duration,
) -> Result<usize, FrameError> {
    let mut extractor = FrameExtractor::new();

    while transport.unread_byte_count()? > 0 {
        let byte = transport.read_byte()?;
        extractor.feed(byte, chunk)?;

        if !pacing.is_zero() {
            std::thread::sleep(pacing);
        }
    }

    trace!(
        delimiter = ?extractor.delimiter_index(),
        payload = extractor.payload_len(),
        "drained frame"
    );
    Ok(extractor.payload_len())
}

// ============================================================================
// Payload Interpretation
// ============================================================================

/// Decodes a frame count the way C `atoi` does: leading whitespace, an
/// optional sign, then digits up to the first non-digit. No digits is 0.
pub fn decode_frame_count(payload: &[u8]) -> i32 {
    let mut bytes = payload
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace() || *b == 0x0b)
        .peekable();

    let negative = match bytes.peek() {
        Some(&b'-') => { bytes.next(); true }
        Some(&b'+') => { bytes.next(); false }
        _ => false,
    };

    let magnitude = bytes
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, digit| (acc * 10 + (digit - b'0') as i64).min(i64::from(i32::MAX) + 1));

    let value = if negative { -magnitude } else { magnitude };
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// True when the payload starts with the full end-of-transfer marker.
pub fn is_sentinel(payload: &[u8]) -> bool {
    payload.starts_with(SENTINEL)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{burst, MockSerialPort};
    use crate::transport::AtModem;
    use crate::transport::script::quiet_config;

    fn extract(stream: &[u8]) -> (Vec<u8>, Option<usize>) {
        let mut chunk = ChunkBuffer::new();
        let mut extractor = FrameExtractor::new();
        for &byte in stream {
            extractor.feed(byte, &mut chunk).expect("fits");
        }
        (chunk.payload(extractor.payload_len()).to_vec(), extractor.delimiter_index())
    }

    fn modem(responses: Vec<Option<u8>>) -> AtModem {
        AtModem::new(Box::new(MockSerialPort::new(responses, Vec::new())), quiet_config())
    }

    #[test]
    fn test_header_is_discarded() {
        let (payload, delimiter) = extract(b"+IPD,0,2:42");
        assert_eq!(payload, b"42");
        assert_eq!(delimiter, Some(8));
    }

    #[test]
    fn test_only_first_delimiter_counts() {
        let (payload, delimiter) = extract(b"\r\n+IPD,0,5:a:b:c");
        assert_eq!(payload, b"a:b:c");
        assert_eq!(delimiter, Some(10));
    }

    #[test]
    fn test_missing_delimiter_yields_empty_payload() {
        let (payload, delimiter) = extract(b"WIFI CONNECTED\r\n");
        assert!(payload.is_empty());
        assert_eq!(delimiter, None);
    }

    #[test]
    fn test_full_frame_fits() {
        let mut stream = b"+IPD,0,128:".to_vec();
        stream.extend((0..FRAME_SIZE).map(|i| i as u8));
        let (payload, _) = extract(&stream);
        assert_eq!(payload.len(), FRAME_SIZE);
        assert_eq!(payload[127], 127);
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut chunk = ChunkBuffer::new();
        let mut extractor = FrameExtractor::new();
        extractor.feed(DELIMITER, &mut chunk).unwrap();
        for _ in 0..FRAME_SIZE {
            extractor.feed(0xAA, &mut chunk).unwrap();
        }
        match extractor.feed(0xAA, &mut chunk) {
            Err(FrameError::Overflow { capacity }) => assert_eq!(capacity, FRAME_SIZE),
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_keeps_stale_bytes() {
        let mut chunk = ChunkBuffer::new();
        let mut extractor = FrameExtractor::new();
        for &byte in b":ABCDEF" {
            extractor.feed(byte, &mut chunk).unwrap();
        }
        let mut extractor = FrameExtractor::new();
        for &byte in b"xx:12" {
            extractor.feed(byte, &mut chunk).unwrap();
        }
        assert_eq!(chunk.payload(extractor.payload_len()), b"12");
        assert_eq!(chunk.payload(6), b"12CDEF");
    }

    #[test]
    fn test_drain_frame_reads_one_burst() {
        let mut responses = burst(b"+IPD,0,3:abc");
        responses.extend(burst(b"+IPD,0,3:def"));
        let mut modem = modem(responses);
        let mut chunk = ChunkBuffer::new();

        let len = drain_frame(&mut modem, &mut chunk, Duration::ZERO).unwrap();
        assert_eq!(chunk.payload(len), b"abc");

        let len = drain_frame(&mut modem, &mut chunk, Duration::ZERO).unwrap();
        assert_eq!(chunk.payload(len), b"def");
    }

    #[test]
    fn test_decode_frame_count() {
        assert_eq!(decode_frame_count(b"3"), 3);
        assert_eq!(decode_frame_count(b"0"), 0);
        assert_eq!(decode_frame_count(b"1024"), 1024);
        assert_eq!(decode_frame_count(b"  17\r\n"), 17);
        assert_eq!(decode_frame_count(b"+8"), 8);
        assert_eq!(decode_frame_count(b"-5"), -5);
        assert_eq!(decode_frame_count(b"12abc"), 12);
        assert_eq!(decode_frame_count(b"abc"), 0);
        assert_eq!(decode_frame_count(b""), 0);
        assert_eq!(decode_frame_count(b"99999999999999"), i32::MAX);
    }

    #[test]
    fn test_decode_frame_count_exact_for_all_small_values() {
        for n in 0..5000 {
            assert_eq!(decode_frame_count(n.to_string().as_bytes()), n);
        }
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_sentinel(b"DONE"));
        assert!(is_sentinel(b"DONE and then some"));
        assert!(!is_sentinel(b"DON"));
        assert!(!is_sentinel(b"done"));
        assert!(!is_sentinel(b"xDONE"));
        assert!(!is_sentinel(b""));
    }
}
