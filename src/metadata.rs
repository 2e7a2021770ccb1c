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

use std::borrow::Cow;
use std::fmt;
use crate::protocol::*;

/// Name, author and year read from a game image header. Text fields hold
/// the header bytes as stored, up to the first NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMetadata {
    pub name: Vec<u8>,
    pub author: Vec<u8>,
    pub year: u16,
}

impl GameMetadata {
    /// Slices the fixed header fields out of `header`. Bytes beyond the end
    /// of a short header read as zero.
    pub fn from_header(header: &[u8]) -> Self {
        let byte_at = |i: usize| header.get(i).copied().unwrap_or(0);

        GameMetadata {
            name: text_field(header, NAME_RANGE),
            author: text_field(header, AUTHOR_RANGE),
            year: u16::from_le_bytes([byte_at(YEAR_LOW_OFFSET), byte_at(YEAR_HIGH_OFFSET)]),
        }
    }

    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn display_author(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.author)
    }
}

impl fmt::Display for GameMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {} ({})", self.display_name(), self.display_author(), self.year)
    }
}

/// Fixed-width text ends at the first NUL, like a C string
fn text_field(header: &[u8], range: std::ops::Range<usize>) -> Vec<u8> {
    let start = range.start.min(header.len());
    let end = range.end.min(header.len());
    let raw = &header[start..end];
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    raw[..len].to_vec()
}

// ============================================================================
// Tests
// ============================================================================
