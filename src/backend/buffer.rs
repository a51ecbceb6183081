// Buffer utilities for vertex, index, and staging buffers
//
// Memory comes from the device's gpu-allocator instance; CpuToGpu buffers
// stay persistently mapped for the lifetime of the buffer.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::error::{RenderResult, RendererError};
use super::VulkanDevice;

/// A GPU buffer plus its allocation, released on drop.
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl DeviceBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        })
    }

    /// Copy `data` into the mapped allocation at `offset` bytes.
    ///
    /// Only valid for host-visible locations; the caller checks capacity
    /// before writing.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.size as usize);
        if let Some(mapped) = self.allocation.as_mut().and_then(|a| a.mapped_slice_mut()) {
            mapped[offset..offset + data.len()].copy_from_slice(data);
        } else {
            log::error!("write to unmapped buffer ignored");
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator().free(allocation);
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Record and synchronously submit a one-shot command buffer on the
/// graphics queue. Used for texture uploads outside the frame loop.
pub fn submit_one_shot<F>(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    record: F,
) -> RenderResult<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }?[0];

    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    // The command buffer is freed on every exit path, success or not
    let result = (|| -> RenderResult<()> {
        unsafe {
            device.device.begin_command_buffer(command_buffer, &begin_info)?;
            record(command_buffer);
            device.device.end_command_buffer(command_buffer)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                .map_err(RendererError::SubmitFailed)?;
            device.device.queue_wait_idle(device.graphics_queue)?;
        }
        Ok(())
    })();

    unsafe {
        device.device.free_command_buffers(pool, &[command_buffer]);
    }
    result
}

/// Linear-offset staging into the shared vertex/index buffers.
///
/// Offsets are in units (vertices, indices), reset at the start of every
/// frame. A reservation that would exceed either capacity fails without
/// moving the offsets.
#[derive(Debug, Clone)]
pub struct DrawStaging {
    vertex_offset: usize,
    element_offset: usize,
    max_vertices: usize,
    max_elements: usize,
}

impl DrawStaging {
    pub fn new(max_vertices: usize, max_elements: usize) -> Self {
        Self {
            vertex_offset: 0,
            element_offset: 0,
            max_vertices,
            max_elements,
        }
    }

    pub fn reset(&mut self) {
        self.vertex_offset = 0;
        self.element_offset = 0;
    }

    /// Reserve room for one draw; returns the base offsets on success.
    pub fn try_stage(&mut self, vertices: usize, elements: usize) -> Option<(usize, usize)> {
        if self.vertex_offset + vertices > self.max_vertices
            || self.element_offset + elements > self.max_elements
        {
            return None;
        }
        let base = (self.vertex_offset, self.element_offset);
        self.vertex_offset += vertices;
        self.element_offset += elements;
        Some(base)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_offset
    }

    pub fn element_count(&self) -> usize {
        self.element_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_advances_by_exact_counts() {
        let mut staging = DrawStaging::new(100, 100);
        assert_eq!(staging.try_stage(4, 6), Some((0, 0)));
        assert_eq!(staging.try_stage(4, 6), Some((4, 6)));
        assert_eq!(staging.vertex_count(), 8);
        assert_eq!(staging.element_count(), 12);
    }

    #[test]
    fn rejection_leaves_offsets_unchanged() {
        let mut staging = DrawStaging::new(4, 6);
        assert_eq!(staging.try_stage(4, 6), Some((0, 0)));
        assert_eq!(staging.try_stage(1, 1), None);
        assert_eq!(staging.try_stage(1, 1), None);
        assert_eq!(staging.vertex_count(), 4);
        assert_eq!(staging.element_count(), 6);
    }

    #[test]
    fn two_quads_fill_twelve_twelve_exactly() {
        // quad = 4 vertices / 6 indices against 12/12 capacity
        let mut staging = DrawStaging::new(12, 12);
        assert!(staging.try_stage(4, 6).is_some());
        assert!(staging.try_stage(4, 6).is_some());
        assert_eq!(staging.vertex_count(), 8);
        assert_eq!(staging.element_count(), 12);
        assert!(staging.try_stage(4, 6).is_none());
        assert!(staging.try_stage(1, 1).is_none());
    }

    #[test]
    fn reset_restores_full_capacity() {
        let mut staging = DrawStaging::new(4, 6);
        assert!(staging.try_stage(4, 6).is_some());
        staging.reset();
        assert_eq!(staging.try_stage(4, 6), Some((0, 0)));
    }

    #[test]
    fn either_capacity_limits() {
        let mut staging = DrawStaging::new(8, 6);
        assert!(staging.try_stage(4, 6).is_some());
        // element capacity exhausted even though vertices remain
        assert!(staging.try_stage(4, 6).is_none());
    }
}
