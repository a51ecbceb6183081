// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync. The in-flight fence
// starts signaled so the first wait on a fresh slot returns immediately.

use std::sync::Arc;

use ash::vk;

use super::error::RenderResult;
use super::VulkanDevice;

/// Per-slot sync objects.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.in_flight_fence, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}

/// Everything one frame-in-flight slot owns: its command buffer and sync
/// objects. Indexed by the frame cursor, never by swapchain image index.
pub struct FrameResources {
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
}

impl FrameResources {
    pub fn new(device: &Arc<VulkanDevice>, command_buffer: vk::CommandBuffer) -> RenderResult<Self> {
        Ok(Self {
            command_buffer,
            sync: FrameSync::new(device)?,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        // The command buffer is freed with its pool
        self.sync.destroy(device);
    }
}

/// Frame-in-flight slot index, advancing modulo the slot count.
#[derive(Debug, Clone, Copy)]
pub struct FrameCursor {
    current: usize,
    count: usize,
}

impl FrameCursor {
    pub fn new(count: usize) -> Self {
        debug_assert!(count > 0);
        Self { current: 0, count }
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_cycles_with_slot_count_period() {
        let mut cursor = FrameCursor::new(2);
        for k in 0..7usize {
            assert_eq!(cursor.index(), k % 2);
            cursor.advance();
        }
    }

    #[test]
    fn cursor_matches_modulo_after_k_advances() {
        let mut cursor = FrameCursor::new(3);
        for _ in 0..10 {
            cursor.advance();
        }
        assert_eq!(cursor.index(), 10 % 3);
    }
}
