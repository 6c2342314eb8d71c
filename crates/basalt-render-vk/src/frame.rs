// SPDX-License-Identifier: CEPL-1.0
//! Per-frame acquire/record/submit/present cycle.

use tracing::trace;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitingOnFence,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    /// Out of date. Nothing was acquired and the swapchain must be recreated.
    /// A suboptimal image is returned as `Image` and reported by present.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { frame: u64, slot: usize, image: u32 },
    /// The frame was abandoned or presented against a stale swapchain.
    /// `advanced` tells whether the frame counter moved.
    Stale { advanced: bool },
}

impl FrameOutcome {
    pub fn needs_recreate(&self) -> bool {
        matches!(self, FrameOutcome::Stale { .. })
    }
}

/// GPU side of a frame. Every call except the stale results is fatal on
/// error.
pub trait FrameBackend {
    /// Number of frame slots; the driver cycles `frame % slot_count`.
    fn slot_count(&self) -> usize;

    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquires the next image and, on success, resets the slot's fence.
    fn acquire_image(&mut self, slot: usize) -> Result<Acquire>;

    fn record(&mut self, slot: usize, image: u32) -> Result<()>;

    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image: u32) -> Result<Present>;
}

#[derive(Debug)]
pub struct FrameDriver {
    frame: u64,
    state: FrameState,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            frame: 0,
            state: FrameState::Idle,
        }
    }

    /// Frames presented so far, stale presents included.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn slot(&self, slot_count: usize) -> usize {
        if slot_count == 0 {
            0
        } else {
            (self.frame % slot_count as u64) as usize
        }
    }

    /// Where the last frame stopped. `Idle` after any non-fatal outcome.
    pub fn state(&self) -> FrameState {
        self.state
    }

    fn enter(&mut self, state: FrameState) {
        trace!(frame = self.frame, from = ?self.state, to = ?state, "frame state");
        self.state = state;
    }

    pub fn run_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let slot = self.slot(backend.slot_count());

        self.enter(FrameState::WaitingOnFence);
        backend.wait_for_slot(slot)?;

        self.enter(FrameState::Acquiring);
        let image = match backend.acquire_image(slot)? {
            Acquire::Image(i) => i,
            Acquire::Stale => {
                self.enter(FrameState::Idle);
                return Ok(FrameOutcome::Stale { advanced: false });
            }
        };

        self.enter(FrameState::Recording);
        backend.record(slot, image)?;

        self.enter(FrameState::Submitted);
        backend.submit(slot)?;

        self.enter(FrameState::Presenting);
        let presented = backend.present(slot, image)?;
        let frame = self.frame;
        self.frame += 1;
        self.enter(FrameState::Idle);

        Ok(match presented {
            Present::Done => FrameOutcome::Presented { frame, slot, image },
            Present::Stale => FrameOutcome::Stale { advanced: true },
        })
    }
}
