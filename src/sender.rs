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

use std::marker::PhantomData;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use crate::metadata::GameMetadata;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{}' doesn't appear to be a valid .uze file. Use --force to send it anyways.", .0.display())]
    NotUzeImage(PathBuf),

    #[error("Data mismatch (in state: {state})\nExpected: {expected:02X?}\nReceiver replied: {received:02X?}")]
    Mismatch {
        state: &'static str,
        expected: Vec<u8>,
        received: Vec<u8>,
    },

    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct SendFrameCount;
pub struct SendChunk;
pub struct SendSentinel;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    link: Box<dyn SerialPort>,
    image: File,
    total_chunks: u64,
    current_chunk: u64,
    reply_timeout: Duration,
    settle: Duration,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            link: self.link,
            image: self.image,
            total_chunks: self.total_chunks,
            current_chunk: self.current_chunk,
            reply_timeout: self.reply_timeout,
            settle: self.settle,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, Self::state_name())
        ))
    }

    /// Sends `payload` and requires the receiver to echo it back unchanged.
    fn exchange(&mut self, payload: &[u8]) -> Result<(), SenderError> {
        self.link.write_all(payload).map_err(|e| self.io_error(e))?;

        let reply = self.read_reply(payload.len()).map_err(|e| self.io_error(e))?;
        if reply != payload {
            return Err(SenderError::Mismatch {
                state: Self::state_name(),
                expected: payload.to_vec(),
                received: reply,
            });
        }
        Ok(())
    }

    fn read_reply(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut reply = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            filled += self.link.read_timeout(&mut reply[filled..], remaining)?;
        }
        Ok(reply)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<SendFrameCount> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let count = fsm.total_chunks.to_string();
        debug!(chunks = fsm.total_chunks, "sending frame count");
        fsm.exchange(count.as_bytes())?;

        if !fsm.settle.is_zero() {
            std::thread::sleep(fsm.settle);
        }

        let next = fsm.transition::<SendChunk>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendChunk> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        if fsm.current_chunk >= fsm.total_chunks {
            let next = fsm.transition::<SendSentinel>();
            return Ok(next as Box<dyn SenderState>);
        }

        let mut buffer = [0u8; FRAME_SIZE];
        let len = read_chunk(&mut fsm.image, &mut buffer).map_err(|e| fsm.io_error(e))?;
        if len == 0 {
            // Image shrank while sending
            let next = fsm.transition::<SendSentinel>();
            return Ok(next as Box<dyn SenderState>);
        }

        debug!(chunk = fsm.current_chunk, of = fsm.total_chunks, bytes = len, "sending chunk");
        fsm.exchange(&buffer[..len])?;
        fsm.current_chunk += 1;

        if fsm.current_chunk % FRAMES_PER_SECTOR as u64 == 0 || fsm.current_chunk == fsm.total_chunks {
            info!("{}/{} chunks sent", fsm.current_chunk, fsm.total_chunks);
        }

        Ok(Box::new(fsm) as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendSentinel> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        fsm.exchange(SENTINEL)?;
        info!("Done!");
        Err(SenderError::TransferComplete)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<SendFrameCount> {
    pub fn new(
        link: Box<dyn SerialPort>,
        image: File,
        image_size: u64,
        reply_timeout: Duration,
        settle: Duration,
    ) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<SendFrameCount>,
            link,
            image,
            total_chunks: image_size.div_ceil(FRAME_SIZE as u64),
            current_chunk: 0,
            reply_timeout,
            settle,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Opens a game image, checking its magic unless `force` is set. Returns the
/// file rewound to the start, its size and the header metadata.
pub fn open_image(path: &Path, force: bool) -> Result<(File, u64, GameMetadata), SenderError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut header = [0u8; SECTOR_SIZE];
    let len = read_chunk(&mut file, &mut header)?;
    let header = &header[..len];

    if !header.starts_with(UZE_MAGIC) && !force {
        return Err(SenderError::NotUzeImage(path.to_path_buf()));
    }

    file.seek(SeekFrom::Start(0))?;
    Ok((file, size, GameMetadata::from_header(header)))
}

/// Fills `buf` as far as the file allows.
fn read_chunk(file: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;
    use tempfile::TempDir;

    fn run_sender(mut fsm: Box<dyn SenderState>) -> Result<(), SenderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn uze_image(len: usize) -> Vec<u8> {
        let mut image: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        image[..6].copy_from_slice(UZE_MAGIC);
        image[YEAR_LOW_OFFSET] = 0xE2;
        image[YEAR_HIGH_OFFSET] = 0x07;
        image[NAME_RANGE.start..NAME_RANGE.start + 5].copy_from_slice(b"Arkan");
        image[NAME_RANGE.start + 5] = 0;
        image
    }

    fn sender_for(dir: &TempDir, image: &[u8], responses: Vec<u8>, expected_writes: Vec<u8>) -> Box<dyn SenderState> {
        let path = dir.path().join("game.uze");
        std::fs::write(&path, image).unwrap();
        let (file, size, _) = open_image(&path, true).unwrap();

        let link = Box::new(MockSerialPort::new(
            responses.into_iter().map(Some).collect(),
            expected_writes,
        ));
        SenderFsm::<SendFrameCount>::new(link, file, size, Duration::from_millis(100), Duration::ZERO)
    }

    #[test]
    fn test_open_image_reads_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("arkan.uze");
        std::fs::write(&path, uze_image(300)).unwrap();

        let (_, size, meta) = open_image(&path, false).unwrap();
        assert_eq!(size, 300);
        assert_eq!(meta.name, b"Arkan");
        assert_eq!(meta.year, 2018);
    }

    #[test]
    fn test_open_image_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"just some text").unwrap();

        assert!(matches!(open_image(&path, false), Err(SenderError::NotUzeImage(_))));
        assert!(open_image(&path, true).is_ok());
    }

    #[test]
    fn test_sender_full_transfer() {
        let dir = TempDir::new().unwrap();
        let image = uze_image(200);

        let mut traffic = b"2".to_vec();
        traffic.extend_from_slice(&image[..128]);
        traffic.extend_from_slice(&image[128..]);
        traffic.extend_from_slice(SENTINEL);

        let fsm = sender_for(&dir, &image, traffic.clone(), traffic);
        run_sender(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_sender_empty_image() {
        let dir = TempDir::new().unwrap();
        let mut traffic = b"0".to_vec();
        traffic.extend_from_slice(SENTINEL);

        let fsm = sender_for(&dir, &[], traffic.clone(), traffic);
        run_sender(fsm).expect("transfer should complete");
    }

    #[test]
    fn test_sender_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let image = uze_image(1300);

        let fsm = sender_for(&dir, &image, b"10".to_vec(), b"11".to_vec());
        match run_sender(fsm) {
            Err(SenderError::Mismatch { state, expected, received }) => {
                assert_eq!(state, "SendFrameCount");
                assert_eq!(expected, b"11");
                assert_eq!(received, b"10");
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_chunk_echo_mismatch() {
        let dir = TempDir::new().unwrap();
        let image = uze_image(128);

        let mut corrupted = image.clone();
        corrupted[40] ^= 0xFF;

        let mut responses = b"1".to_vec();
        responses.extend_from_slice(&corrupted);
        let mut expected_writes = b"1".to_vec();
        expected_writes.extend_from_slice(&image);

        let fsm = sender_for(&dir, &image, responses, expected_writes);
        assert!(matches!(run_sender(fsm), Err(SenderError::Mismatch { state: "SendChunk", .. })));
    }

    #[test]
    fn test_sender_requires_sentinel_reply() {
        let dir = TempDir::new().unwrap();
        let mut responses = b"0".to_vec();
        responses.extend_from_slice(b"NOPE");
        let mut expected_writes = b"0".to_vec();
        expected_writes.extend_from_slice(SENTINEL);

        let fsm = sender_for(&dir, &[], responses, expected_writes);
        assert!(matches!(run_sender(fsm), Err(SenderError::Mismatch { state: "SendSentinel", .. })));
    }

    #[test]
    fn test_sender_reply_timeout() {
        let dir = TempDir::new().unwrap();
        let image = uze_image(128);

        let fsm = sender_for(&dir, &image, b"1".to_vec(), {
            let mut writes = b"1".to_vec();
            writes.extend_from_slice(&image);
            writes
        });
        match run_sender(fsm) {
            Err(SenderError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::TimedOut);
                assert!(e.to_string().contains("SendChunk"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
