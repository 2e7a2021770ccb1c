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

//! Reassembly of frame payloads into store sectors.

use tracing::debug;
use crate::metadata::GameMetadata;
use crate::protocol::*;
use crate::store::{BlockStore, StoreError};

/// Copy of the first sector as it was assembled
pub struct FirstSectorSnapshot {
    bytes: [u8; SECTOR_SIZE],
}

impl FirstSectorSnapshot {
    pub fn metadata(&self) -> GameMetadata {
        GameMetadata::from_header(self.bytes())
    }

    pub fn bytes(&self) -> &[u8; SECTOR_SIZE] {
        &self.bytes
    }
}

/// Position after an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub sector_ordinal: u32,
    pub buffer_offset: usize,
    pub flushed: bool,
}

pub struct SectorAccumulator {
    store: Box<dyn BlockStore>,
    buffer: [u8; SECTOR_SIZE],
    first_sector: FirstSectorSnapshot,
    offset: usize,
    ordinal: u32,
}

impl SectorAccumulator {
    /// Finds `image_name` on the store and loads its first sector.
    pub fn open(mut store: Box<dyn BlockStore>, image_name: &str) -> Result<Self, StoreError> {
        let handle = store
            .locate(image_name)?
            .ok_or_else(|| StoreError::NotFound(image_name.to_string()))?;
        store.select(handle)?;

        let mut buffer = [0u8; SECTOR_SIZE];
        store.read_sector(&mut buffer)?;

        Ok(SectorAccumulator {
            store,
            buffer,
            first_sector: FirstSectorSnapshot { bytes: [0; SECTOR_SIZE] },
            offset: 0,
            ordinal: 0,
        })
    }

    pub fn sector_ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn buffer_offset(&self) -> usize {
        self.offset
    }

    pub fn first_sector(&self) -> &FirstSectorSnapshot {
        &self.first_sector
    }

    /// Writes one frame payload at the running offset. The offset always
    /// advances by a whole frame, so a short payload leaves the rest of its
    /// slot holding what the store read back.
    pub fn append(&mut self, payload: &[u8]) -> Result<AppendOutcome, StoreError> {
        debug_assert!(payload.len() <= FRAME_SIZE);
        debug_assert!(self.offset % FRAME_SIZE == 0 && self.offset < SECTOR_SIZE);

        let end = self.offset + payload.len();
        self.buffer[self.offset..end].copy_from_slice(payload);
        if self.ordinal == 0 {
            self.first_sector.bytes[self.offset..end].copy_from_slice(payload);
        }

        let flushed = self.offset == SECTOR_SIZE - FRAME_SIZE;
        if flushed {
            self.offset = 0;
            self.store.write_sector(&self.buffer)?;
            self.store.advance_to_next_sector();
            self.store.read_sector(&mut self.buffer)?;
            self.ordinal += 1;
            debug!(sector = self.ordinal, "sector flushed");
        } else {
            self.offset += FRAME_SIZE;
        }

        Ok(AppendOutcome {
            sector_ordinal: self.ordinal,
            buffer_offset: self.offset,
            flushed,
        })
    }

    /// Writes out the partial sector and rewinds the store.
    pub fn finish(&mut self) -> Result<(), StoreError> {
        self.store.write_sector(&self.buffer)?;
        self.store.reset_sector_position();
        debug!(sector = self.ordinal, offset = self.offset, "final sector written");
        Ok(())
    }
}

// ============================================================================
// Mock Store for Testing
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock::{MockStore, StoreEvent};

    fn frame(fill: u8) -> [u8; FRAME_SIZE] {
        [fill; FRAME_SIZE]
    }

    #[test]
    fn test_open_reads_first_sector() {
        let (store, log) = MockStore::new(2);
        let acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();
        assert_eq!(acc.sector_ordinal(), 0);
        assert_eq!(acc.buffer_offset(), 0);
        assert_eq!(*log.lock().unwrap(), vec![StoreEvent::Read(0)]);
    }

    #[test]
    fn test_open_missing_file() {
        let (store, _log) = MockStore::new(1);
        match SectorAccumulator::open(Box::new(store), "OTHER.BIN") {
            Err(StoreError::NotFound(name)) => assert_eq!(name, "OTHER.BIN"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("open should fail"),
        }
    }

    #[test]
    fn test_offset_advances_by_frame() {
        let (store, _log) = MockStore::new(2);
        let mut acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();

        for i in 1..FRAMES_PER_SECTOR {
            let outcome = acc.append(&frame(i as u8)).unwrap();
            assert_eq!(outcome, AppendOutcome {
                sector_ordinal: 0,
                buffer_offset: i * FRAME_SIZE,
                flushed: false,
            });
        }
    }

    #[test]
    fn test_fourth_frame_flushes_sector() {
        let (store, log) = MockStore::new(3);
        let mut acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();

        for i in 0..FRAMES_PER_SECTOR - 1 {
            acc.append(&frame(i as u8)).unwrap();
        }
        let outcome = acc.append(&frame(9)).unwrap();
        assert_eq!(outcome, AppendOutcome { sector_ordinal: 1, buffer_offset: 0, flushed: true });

        let writes = MockStore::writes(&log);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0);
        assert!(writes[0].1[..FRAME_SIZE].iter().all(|&b| b == 0));
        assert!(writes[0].1[3 * FRAME_SIZE..].iter().all(|&b| b == 9));

        assert_eq!(
            *log.lock().unwrap(),
            vec![StoreEvent::Read(0), StoreEvent::Write(0, writes[0].1.clone()), StoreEvent::Read(1)]
        );
        assert_eq!(acc.first_sector().bytes()[..], writes[0].1[..]);
    }

    #[test]
    fn test_flush_every_sector_worth_of_frames() {
        let (store, log) = MockStore::new(8);
        let mut acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();

        let mut flushes = 0;
        for i in 0..5 * FRAMES_PER_SECTOR + 2 {
            let outcome = acc.append(&frame(i as u8)).unwrap();
            assert_eq!(outcome.buffer_offset, ((i + 1) * FRAME_SIZE) % SECTOR_SIZE);
            if outcome.flushed {
                flushes += 1;
                assert_eq!((i + 1) % FRAMES_PER_SECTOR, 0);
            }
        }
        assert_eq!(flushes, 5);
        assert_eq!(MockStore::writes(&log).len(), 5);
        assert_eq!(acc.sector_ordinal(), 5);
    }

    #[test]
    fn test_short_payload_keeps_stored_bytes() {
        let (store, log) = MockStore::new(2);
        let mut acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();

        let outcome = acc.append(b"tail").unwrap();
        assert_eq!(outcome.buffer_offset, FRAME_SIZE);
        acc.finish().unwrap();

        let writes = MockStore::writes(&log);
        assert_eq!(&writes[0].1[..4], b"tail");
        assert!(writes[0].1[4..].iter().all(|&b| b == 0xFF));
        assert_eq!(log.lock().unwrap().last(), Some(&StoreEvent::Reset));
    }

    #[test]
    fn test_snapshot_frozen_after_first_sector() {
        let (store, _log) = MockStore::new(3);
        let mut acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();

        for _ in 0..FRAMES_PER_SECTOR {
            acc.append(&frame(0x41)).unwrap();
        }
        for _ in 0..FRAMES_PER_SECTOR {
            acc.append(&frame(0x42)).unwrap();
        }
        assert!(acc.first_sector().bytes().iter().all(|&b| b == 0x41));
    }

    #[test]
    fn test_write_failure_propagates() {
        let (mut store, _log) = MockStore::new(1);
        store.fail_writes = true;
        let mut acc = SectorAccumulator::open(Box::new(store), DEFAULT_IMAGE_NAME).unwrap();

        for _ in 0..FRAMES_PER_SECTOR - 1 {
            acc.append(&frame(1)).unwrap();
        }
        assert!(matches!(acc.append(&frame(1)), Err(StoreError::WriteFailed { sector: 0, .. })));
    }
}
