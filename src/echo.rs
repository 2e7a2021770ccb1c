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

//! Echo of every received payload back to the sender, which compares it with
//! what it sent. Only the round trip is checked; there is no checksum.

use tracing::trace;
use crate::protocol::SEND_OK;
use crate::transport::{Transport, TransportError};

/// Sends `payload` back over the link and blocks until the modem confirms.
pub fn verify(transport: &mut dyn Transport, payload: &[u8]) -> Result<(), TransportError> {
    transport.send_prepare(payload.len())?;
    transport.send_bytes(payload)?;
    transport.send_terminator()?;
    transport.wait_for_ack(SEND_OK)?;
    trace!(bytes = payload.len(), "echo confirmed");
    Ok(())
}
