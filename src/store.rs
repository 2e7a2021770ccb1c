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

//! Sector-addressed block store.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use crate::protocol::SECTOR_SIZE;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No storage medium at '{}'", .0.display())]
    MediumAbsent(PathBuf),

    #[error("File doesn't exist: {0}")]
    NotFound(String),

    #[error("No file selected")]
    NoSelection,

    #[error("Reading sector {sector} failed")]
    ReadFailed {
        sector: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Writing sector {sector} failed")]
    WriteFailed {
        sector: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Trait
// ============================================================================

/// Opaque reference to a located file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub usize);

/// Storage driver consumed by the sector accumulator. Reads and writes always
/// address the sector at the current position of the selected file.
pub trait BlockStore: Send {
    fn locate(&mut self, name: &str) -> Result<Option<FileHandle>, StoreError>;

    /// Selects a file and moves to its first sector.
    fn select(&mut self, handle: FileHandle) -> Result<(), StoreError>;

    fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), StoreError>;

    fn write_sector(&mut self, buf: &[u8; SECTOR_SIZE]) -> Result<(), StoreError>;

    fn advance_to_next_sector(&mut self);

    fn reset_sector_position(&mut self);
}

// ============================================================================
// Directory-backed Store
// ============================================================================

/// A host directory standing in for a FAT-formatted card. Files are matched
/// by their 8.3 short name.
pub struct DirectoryStore {
    root: PathBuf,
    entries: Vec<PathBuf>,
    selected: Option<File>,
    sector: u64,
}

impl DirectoryStore {
    pub fn mount(root: &Path) -> Result<Self, StoreError> {
        if !root.is_dir() {
            return Err(StoreError::MediumAbsent(root.to_path_buf()));
        }

        Ok(DirectoryStore {
            root: root.to_path_buf(),
            entries: Vec::new(),
            selected: None,
            sector: 0,
        })
    }

    pub fn path_of(&self, handle: FileHandle) -> Option<&Path> {
        self.entries.get(handle.0).map(PathBuf::as_path)
    }

    fn file(&mut self) -> Result<&mut File, StoreError> {
        self.selected.as_mut().ok_or(StoreError::NoSelection)
    }

    fn offset(&self) -> u64 {
        self.sector * SECTOR_SIZE as u64
    }
}

impl BlockStore for DirectoryStore {
    fn locate(&mut self, name: &str) -> Result<Option<FileHandle>, StoreError> {
        let wanted = short_name(name);

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(candidate) = entry.file_name().to_str().map(short_name) else {
                continue;
            };

            if candidate == wanted {
                let path = entry.path();
                if let Some(index) = self.entries.iter().position(|known| *known == path) {
                    return Ok(Some(FileHandle(index)));
                }

                debug!(path = %path.display(), "located image file");
                self.entries.push(path);
                return Ok(Some(FileHandle(self.entries.len() - 1)));
            }
        }

        Ok(None)
    }

    fn select(&mut self, handle: FileHandle) -> Result<(), StoreError> {
        let path = self.entries
            .get(handle.0)
            .ok_or_else(|| StoreError::NotFound(format!("handle {}", handle.0)))?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        self.selected = Some(file);
        self.sector = 0;
        Ok(())
    }

    fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), StoreError> {
        let sector = self.sector;
        let offset = self.offset();
        let file = self.file()?;
        let read_failed = |source| StoreError::ReadFailed { sector, source };

        file.seek(SeekFrom::Start(offset)).map_err(read_failed)?;

        // Past the end of the file reads as zero
        let mut filled = 0;
        while filled < SECTOR_SIZE {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(read_failed(e)),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_sector(&mut self, buf: &[u8; SECTOR_SIZE]) -> Result<(), StoreError> {
        let sector = self.sector;
        let offset = self.offset();
        let file = self.file()?;
        let write_failed = |source| StoreError::WriteFailed { sector, source };

        file.seek(SeekFrom::Start(offset)).map_err(write_failed)?;
        file.write_all(buf).map_err(write_failed)?;
        file.flush().map_err(write_failed)?;
        debug!(sector, "wrote sector");
        Ok(())
    }

    fn advance_to_next_sector(&mut self) {
        self.sector += 1;
    }

    fn reset_sector_position(&mut self) {
        self.sector = 0;
    }
}

/// Folds a file name into the padded 11-byte 8.3 form, uppercased.
fn short_name(name: &str) -> [u8; 11] {
    let mut result = [b' '; 11];

    let upper = name.to_uppercase();
    let parts: Vec<&str> = upper.splitn(2, '.').collect();

    for (i, ch) in parts.first().unwrap_or(&"").bytes().take(8).enumerate() {
        result[i] = ch;
    }

    if let Some(ext) = parts.get(1) {
        let ext_first = ext.split('.').next().unwrap_or("");
        for (i, ch) in ext_first.bytes().take(3).enumerate() {
            result[8 + i] = ch;
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
