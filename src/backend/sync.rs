// Synchronization primitives
//
// Semaphores order acquire -> render -> present on the GPU; the fence lets
// the CPU wait for the previous frame before reusing its command buffer.
// Only one frame is ever in flight.

use ash::vk;
use std::sync::Arc;

use super::gpu::GpuDevice;
use crate::error::{Result, VkResultExt};

/// What the CPU knows about the in-flight fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceGate {
    /// Signaled or about to be: waiting on it will return.
    Armed,
    /// Reset and never resubmitted; nothing will ever signal it.
    Unarmed,
}

/// Frame synchronization set
pub struct FrameSync<D: GpuDevice> {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    gate: FenceGate,
    device: Arc<D>,
}

impl<D: GpuDevice> FrameSync<D> {
    pub fn new(device: Arc<D>) -> Result<Self> {
        let mut this = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            gate: FenceGate::Armed,
            device,
        };

        this.image_available = this
            .device
            .create_semaphore()
            .during("create image-available semaphore")?;
        this.render_finished = this
            .device
            .create_semaphore()
            .during("create render-finished semaphore")?;
        // Start signaled so the first frame does not wait forever
        this.in_flight_fence = this
            .device
            .create_fence(true)
            .during("create in-flight fence")?;

        Ok(this)
    }

    pub fn gate(&self) -> FenceGate {
        self.gate
    }

    /// Wait for the previous frame and reset the fence for this one. Skipped
    /// when the fence is already unarmed.
    pub fn wait_and_reset(&mut self, timeout: std::time::Duration) -> Result<()> {
        if self.gate == FenceGate::Unarmed {
            log::debug!("In-flight fence was never resubmitted, not waiting on it");
            return Ok(());
        }

        self.device
            .wait_for_fence(self.in_flight_fence, timeout.as_nanos() as u64)
            .bounded("wait for in-flight fence", timeout)?;
        self.device
            .reset_fence(self.in_flight_fence)
            .during("reset in-flight fence")?;
        self.gate = FenceGate::Unarmed;
        Ok(())
    }

    /// Record that a submit carrying the fence was accepted.
    pub fn mark_armed(&mut self) {
        self.gate = FenceGate::Armed;
    }
}

impl<D: GpuDevice> Drop for FrameSync<D> {
    fn drop(&mut self) {
        if self.in_flight_fence != vk::Fence::null() {
            self.device.destroy_fence(self.in_flight_fence);
        }
        if self.render_finished != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.render_finished);
        }
        if self.image_available != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.image_available);
        }
    }
}
