// Texture array - webcam frames and derived layers
//
// One fixed-size 2-D array image; layers are overwritten in place through
// staging-buffer copies. Nearest filtering, no mips, no resizing.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::buffer::{submit_one_shot, DeviceBuffer};
use super::error::RenderResult;
use super::VulkanDevice;

/// Number of layers in the texture array.
pub const MAX_TEXTURES: usize = 4;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const BYTES_PER_PIXEL: usize = 4;

/// Upload call contract: non-empty data of exactly one layer, layer index
/// in range. Violations fail the call, never the frame.
pub fn validate_upload(data_len: usize, layer: usize, layer_size: usize) -> bool {
    data_len != 0 && data_len == layer_size && layer < MAX_TEXTURES
}

pub struct TextureArray {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    image: vk::Image,
    allocation: Option<Allocation>,
    width: u32,
    height: u32,
    device: Arc<VulkanDevice>,
}

impl TextureArray {
    pub fn new(
        device: Arc<VulkanDevice>,
        command_pool: vk::CommandPool,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        log::info!(
            "Creating {}x{} texture array with {} layers",
            width,
            height,
            MAX_TEXTURES
        );

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(MAX_TEXTURES as u32)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }?;
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: "texture array",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D_ARRAY)
            .format(TEXTURE_FORMAT)
            .subresource_range(subresource_all_layers());

        let view = unsafe { device.device.create_image_view(&view_info, None) }?;

        // Nearest filtering: frame pixels map 1:1, no smoothing wanted
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST);

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }?;

        // Sampling an untouched layer must still be defined, so move every
        // layer to shader-read up front
        submit_one_shot(&device, command_pool, |cmd| {
            let barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_all_layers())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::SHADER_READ);

            unsafe {
                device.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier.build()],
                );
            }
        })?;

        Ok(Self {
            view,
            sampler,
            image,
            allocation: Some(allocation),
            width,
            height,
            device,
        })
    }

    /// Bytes one full layer occupies.
    pub fn layer_size(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Overwrite one layer with tightly packed RGBA data.
    ///
    /// The caller has already validated the layer index and data length.
    pub fn upload(
        &self,
        data: &[u8],
        layer: u32,
        command_pool: vk::CommandPool,
    ) -> RenderResult<()> {
        let mut staging = DeviceBuffer::new(
            self.device.clone(),
            "texture staging",
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(0, data);

        let subresource = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: layer,
            layer_count: 1,
        };

        let device = &self.device;
        submit_one_shot(device, command_pool, |cmd| unsafe {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(subresource)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer.build()],
            );

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: self.width,
                    height: self.height,
                    depth: 1,
                });

            device.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region.build()],
            );

            let to_sampling = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(subresource)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);

            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_sampling.build()],
            );
        })
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for TextureArray {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
            self.device.device.destroy_image_view(self.view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator().free(allocation);
        }
        unsafe {
            self.device.device.destroy_image(self.image, None);
        }
    }
}

fn subresource_all_layers() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: MAX_TEXTURES as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYER: usize = 640 * 480 * BYTES_PER_PIXEL;

    #[test]
    fn empty_data_is_rejected() {
        assert!(!validate_upload(0, 0, LAYER));
    }

    #[test]
    fn out_of_range_layer_is_rejected() {
        assert!(validate_upload(LAYER, MAX_TEXTURES - 1, LAYER));
        assert!(!validate_upload(LAYER, MAX_TEXTURES, LAYER));
        assert!(!validate_upload(LAYER, MAX_TEXTURES + 3, LAYER));
    }

    #[test]
    fn mis_sized_data_is_rejected() {
        assert!(!validate_upload(LAYER - 1, 0, LAYER));
        assert!(!validate_upload(LAYER + 4, 0, LAYER));
        assert!(validate_upload(LAYER, 0, LAYER));
    }
}
