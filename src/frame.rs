// Frame synchronization - the per-frame render loop
//
// Each call to `FrameLoop::draw_frame` walks one frame slot through:
//
//   wait fence -> acquire image -> reset fence -> record -> submit -> present
//
// Semaphores order the GPU work (acquire -> submit -> present) and are
// never observed by the CPU; the slot's fence is the only CPU-visible
// signal and keeps the CPU from re-recording a command buffer the GPU is
// still executing. A stale chain is rebuilt in place and the loop carries on.
//
// The GPU side is reached through `FrameBackend` so the ordering rules can be
// exercised without a driver.

use ash::vk;

use crate::error::RenderError;
use crate::window::{wait_for_usable_size, EventSource, ResizeSignal};

/// Number of frame slots the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Slot used by the frame after `slot`
pub fn next_slot(slot: usize) -> usize {
    (slot + 1) % MAX_FRAMES_IN_FLIGHT
}

/// Result of asking the chain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Usable, but no longer an exact match for the surface
    Suboptimal(u32),
    /// Unusable; the chain must be rebuilt before anything is submitted
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Result of asking for a chain rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRebuild {
    Rebuilt,
    /// The surface has no area right now; the old chain was kept
    SurfaceNotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Acquire found the chain stale; nothing was recorded or submitted
    Abandoned { recreated: bool },
    Presented {
        slot: usize,
        image_index: u32,
        recreated: bool,
    },
}

/// GPU-side operations the render loop drives, all addressed by frame slot
pub trait FrameBackend {
    /// Block (without timeout) until the slot's fence is signalled
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError>;

    /// Request the next image, signalling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError>;

    /// Return the slot's fence to the unsignalled state
    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError>;

    /// Reset and re-record the slot's command buffer against `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError>;

    /// Submit the slot's command buffer; signals render-finished and the fence
    fn submit(&mut self, slot: usize) -> Result<(), RenderError>;

    /// Present `image_index` once the slot's render-finished semaphore fires
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, RenderError>;

    /// Drain the GPU, then rebuild the chain and everything sized by it
    fn recreate_swapchain(&mut self, framebuffer_size: vk::Extent2D) -> Result<ChainRebuild, RenderError>;
}

pub struct FrameLoop {
    current_frame: usize,
    resize: ResizeSignal,
}

impl FrameLoop {
    pub fn new(resize: ResizeSignal) -> Self {
        Self {
            current_frame: 0,
            resize,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn draw_frame<B, W>(&mut self, backend: &mut B, window: &mut W) -> Result<FrameOutcome, RenderError>
    where
        B: FrameBackend + ?Sized,
        W: EventSource + ?Sized,
    {
        let slot = self.current_frame;

        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                log::debug!("Acquired image {} from a suboptimal swapchain", index);
                index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, skipping frame");
                // The fence stays signalled: nothing will be submitted through it.
                let recreated = recreate(backend, window)?;
                return Ok(FrameOutcome::Abandoned { recreated });
            }
        };

        // Only reset once we know work will be submitted on this slot.
        backend.reset_slot(slot)?;

        backend.record(slot, image_index)?;
        backend.submit(slot)?;

        let presented = backend.present(slot, image_index)?;

        // Cleared before recreating so a resize arriving meanwhile is kept.
        let resize_pending = self.resize.take();
        let recreated = if presented != PresentOutcome::Presented || resize_pending {
            log::debug!(
                "Recreating swapchain after present ({:?}, resize pending: {})",
                presented,
                resize_pending
            );
            recreate(backend, window)?
        } else {
            false
        };

        self.current_frame = next_slot(slot);

        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            recreated,
        })
    }
}

/// Waits out a minimized window, then rebuilds the chain.
///
/// The surface can still report no area after the window looked usable, so
/// a refused rebuild waits for the next event and tries again.
/// Returns `false` if the window closed before a rebuild went through.
fn recreate<B, W>(backend: &mut B, window: &mut W) -> Result<bool, RenderError>
where
    B: FrameBackend + ?Sized,
    W: EventSource + ?Sized,
{
    loop {
        let Some(size) = wait_for_usable_size(window) else {
            return Ok(false);
        };

        match backend.recreate_swapchain(size)? {
            ChainRebuild::Rebuilt => return Ok(true),
            ChainRebuild::SurfaceNotReady => {
                log::debug!("Surface not ready at {}x{}, waiting for events", size.width, size.height);
                window.wait_events();
                if window.close_requested() {
                    return Ok(false);
                }
            }
        }
    }
}
