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
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use crate::display::StatusDisplay;
use crate::echo;
use crate::frame::{self, ChunkBuffer, FrameError};
use crate::launch::Launcher;
use crate::metadata::GameMetadata;
use crate::protocol::*;
use crate::sector::SectorAccumulator;
use crate::store::StoreError;
use crate::transport::{Transport, TransportError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("{source} (in state: {state})")]
    Link {
        state: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("{source} (in state: {state})")]
    Frame {
        state: &'static str,
        #[source]
        source: FrameError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Launching image failed: {0}")]
    Launch(#[source] std::io::Error),

    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitingFrameCount;
pub struct ReceivingPayload;
pub struct Complete;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    AwaitingFrameCount,
    ReceivingPayload,
    Complete,
}

pub trait Phase {
    const PHASE: TransferPhase;
}

impl Phase for AwaitingFrameCount {
    const PHASE: TransferPhase = TransferPhase::AwaitingFrameCount;
}

impl Phase for ReceivingPayload {
    const PHASE: TransferPhase = TransferPhase::ReceivingPayload;
}

impl Phase for Complete {
    const PHASE: TransferPhase = TransferPhase::Complete;
}

/// Counters carried through every state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferContext {
    /// As announced by the sender; not validated
    pub total_frame_count: i32,
    pub frames_received: u32,
    pub sector_ordinal: u32,
    pub buffer_offset: usize,
}

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    transport: Box<dyn Transport>,
    sectors: SectorAccumulator,
    display: Box<dyn StatusDisplay>,
    launcher: Box<dyn Launcher>,
    chunk: ChunkBuffer,
    context: TransferContext,
    metadata: Option<GameMetadata>,
    byte_pacing: Duration,
}

// ============================================================================
// Traits
// ============================================================================

/// Read-only view of a receiver in any state
pub trait Inspect {
    fn phase(&self) -> TransferPhase;

    fn context(&self) -> &TransferContext;

    fn metadata(&self) -> Option<&GameMetadata>;
}

pub trait ReceiverState: Inspect + Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

impl<S: Phase> Inspect for ReceiverFsm<S> {
    fn phase(&self) -> TransferPhase {
        S::PHASE
    }

    fn context(&self) -> &TransferContext {
        &self.context
    }

    fn metadata(&self) -> Option<&GameMetadata> {
        self.metadata.as_ref()
    }
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            transport: self.transport,
            sectors: self.sectors,
            display: self.display,
            launcher: self.launcher,
            chunk: self.chunk,
            context: self.context,
            metadata: self.metadata,
            byte_pacing: self.byte_pacing,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    fn link_error(source: TransportError) -> ReceiverError {
        ReceiverError::Link { state: Self::state_name(), source }
    }

    fn frame_error(source: FrameError) -> ReceiverError {
        ReceiverError::Frame { state: Self::state_name(), source }
    }

    /// Shows a fatal error to the operator before handing it back. Every
    /// error leaving a step other than `TransferComplete` goes through here.
    fn fail(&mut self, err: ReceiverError) -> ReceiverError {
        self.display.fault(&err.to_string());
        err
    }

    /// Drains the next frame into the chunk buffer. `None` when nothing is
    /// waiting, or when the input carried no delimiter.
    fn next_frame(&mut self) -> Result<Option<usize>, ReceiverError> {
        if self.transport.unread_byte_count().map_err(|e| self.fail(Self::link_error(e)))? == 0 {
            return Ok(None);
        }

        let len = frame::drain_frame(self.transport.as_mut(), &mut self.chunk, self.byte_pacing)
            .map_err(|e| self.fail(Self::frame_error(e)))?;

        if len == 0 {
            warn!(state = Self::state_name(), "discarding input without a frame delimiter");
            return Ok(None);
        }
        Ok(Some(len))
    }

    fn echo(&mut self, len: usize) -> Result<(), ReceiverError> {
        echo::verify(self.transport.as_mut(), self.chunk.payload(len))
            .map_err(|e| self.fail(Self::link_error(e)))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<AwaitingFrameCount> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let Some(len) = fsm.next_frame()? else {
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        };

        let total = frame::decode_frame_count(fsm.chunk.payload(len));
        fsm.context.total_frame_count = total;
        info!(total, "frame count received");

        fsm.echo(len)?;
        fsm.display.progress(0, total);

        let next = fsm.transition::<ReceivingPayload>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<ReceivingPayload> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let Some(len) = fsm.next_frame()? else {
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        };

        fsm.echo(len)?;

        if frame::is_sentinel(fsm.chunk.payload(len)) {
            info!(
                received = fsm.context.frames_received,
                expected = fsm.context.total_frame_count,
                "end of transfer"
            );
            echo::verify(fsm.transport.as_mut(), SENTINEL).map_err(|e| fsm.fail(Self::link_error(e)))?;

            let next = fsm.transition::<Complete>();
            return Ok(next as Box<dyn ReceiverState>);
        }

        let outcome = match fsm.sectors.append(fsm.chunk.payload(len)) {
            Ok(outcome) => outcome,
            Err(e) => return Err(fsm.fail(e.into())),
        };

        fsm.context.frames_received += 1;
        fsm.context.sector_ordinal = fsm.sectors.sector_ordinal();
        fsm.context.buffer_offset = fsm.sectors.buffer_offset();
        debug!(
            frame = fsm.context.frames_received,
            bytes = len,
            sector = outcome.sector_ordinal,
            offset = outcome.buffer_offset,
            "frame stored"
        );

        if outcome.flushed && outcome.sector_ordinal == 1 && fsm.metadata.is_none() {
            let metadata = fsm.sectors.first_sector().metadata();
            fsm.display.game_info(&metadata);
            fsm.metadata = Some(metadata);
        }

        fsm.display.progress(fsm.context.frames_received, fsm.context.total_frame_count);
        Ok(Box::new(fsm) as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<Complete> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        if let Err(e) = fsm.sectors.finish() {
            return Err(fsm.fail(e.into()));
        }
        info!(frames = fsm.context.frames_received, "image written");

        if let Err(e) = fsm.launcher.launch() {
            return Err(fsm.fail(ReceiverError::Launch(e)));
        }
        Err(ReceiverError::TransferComplete)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<AwaitingFrameCount> {
    pub fn new(
        transport: Box<dyn Transport>,
        sectors: SectorAccumulator,
        display: Box<dyn StatusDisplay>,
        launcher: Box<dyn Launcher>,
        byte_pacing: Duration,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<AwaitingFrameCount>,
            transport,
            sectors,
            display,
            launcher,
            chunk: ChunkBuffer::new(),
            context: TransferContext::default(),
            metadata: None,
            byte_pacing,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
