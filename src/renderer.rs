// Vulkan renderer - construction wiring and the per-frame state machine
//
// Frame protocol, in exactly this order:
//   clear() -> add()* / update_texture()* -> render() -> present()
// and end_loop() before teardown.
//
// Each frame-in-flight slot moves Idle -> Recording -> Submitted and back to
// Idle when its fence signals. The slot index is advanced by present() and is
// never the same thing as the swapchain image index.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::buffer::{DeviceBuffer, DrawStaging};
use crate::backend::pipeline;
use crate::backend::shader::ShaderModule;
use crate::backend::sync::{FrameCursor, FrameResources};
use crate::backend::texture::{validate_upload, TextureArray};
use crate::backend::{RenderResult, RendererError, Swapchain, VulkanDevice};
use crate::scene::{Object, Vertex};

/// Frame-in-flight slot count. CPU recording of frame N+1 overlaps GPU
/// execution of frame N; the per-slot fence is the only backpressure.
pub const FRAMES_IN_FLIGHT: usize = 2;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Construction parameters, typically read from config.toml.
pub struct RendererDesc {
    pub vertex_shader_path: PathBuf,
    pub fragment_shader_path: PathBuf,
    pub max_vertices: usize,
    pub max_elements: usize,
    pub texture_width: u32,
    pub texture_height: u32,
}

/// The explicit-API renderer.
///
/// Field order matters for Drop: raw handles are destroyed in the Drop impl,
/// then the RAII fields release in declaration order, the device last.
pub struct VulkanRenderer {
    // Raw handles, destroyed by hand in reverse creation order
    frames: Vec<FrameResources>,
    command_pool: vk::CommandPool,
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: vk::Pipeline,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    descriptor_set_layout: vk::DescriptorSetLayout,

    // Frame state
    cursor: FrameCursor,
    staging: DrawStaging,
    /// Image acquired by clear(), consumed by present(). None while no
    /// frame is open or when the current frame was skipped.
    current_image: Option<u32>,
    /// Rebuild scheduled by an out-of-date/suboptimal acquire or present,
    /// honored at the start of the next clear().
    needs_rebuild: bool,
    vertex_shader_path: PathBuf,
    fragment_shader_path: PathBuf,

    // RAII resources
    vertex_buffer: DeviceBuffer,
    index_buffer: DeviceBuffer,
    texture: TextureArray,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl VulkanRenderer {
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
        app_name: &str,
        enable_validation: bool,
        desc: RendererDesc,
    ) -> RenderResult<Self> {
        let device =
            VulkanDevice::new(display_handle, window_handle, app_name, enable_validation)?;

        let swapchain = Swapchain::new(device.clone(), width, height, None)?;

        let vertex_buffer = DeviceBuffer::new(
            device.clone(),
            "vertex buffer",
            (desc.max_vertices * std::mem::size_of::<Vertex>()) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        let index_buffer = DeviceBuffer::new(
            device.clone(),
            "index buffer",
            (desc.max_elements * std::mem::size_of::<u32>()) as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        let texture = match TextureArray::new(
            device.clone(),
            command_pool,
            desc.texture_width,
            desc.texture_height,
        ) {
            Ok(texture) => texture,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up any half-built state: destroying a
        // null handle is a no-op
        let mut renderer = Self {
            frames: Vec::new(),
            command_pool,
            framebuffers: Vec::new(),
            pipeline: vk::Pipeline::null(),
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            cursor: FrameCursor::new(FRAMES_IN_FLIGHT),
            staging: DrawStaging::new(desc.max_vertices, desc.max_elements),
            current_image: None,
            needs_rebuild: false,
            vertex_shader_path: desc.vertex_shader_path,
            fragment_shader_path: desc.fragment_shader_path,
            vertex_buffer,
            index_buffer,
            texture,
            swapchain,
            device,
        };
        renderer.create_pipeline_objects()?;
        renderer.create_frame_resources()?;

        log::info!("Renderer initialized");
        Ok(renderer)
    }

    fn create_pipeline_objects(&mut self) -> RenderResult<()> {
        self.render_pass = pipeline::create_render_pass(&self.device, self.swapchain.format)?;
        self.descriptor_set_layout = pipeline::create_descriptor_set_layout(&self.device)?;

        // Shader modules only live until the pipeline holds its own copy
        let vert = ShaderModule::from_path(self.device.clone(), &self.vertex_shader_path)?;
        let frag = ShaderModule::from_path(self.device.clone(), &self.fragment_shader_path)?;
        let (pipeline, pipeline_layout) = pipeline::create_graphics_pipeline(
            &self.device,
            self.render_pass,
            self.descriptor_set_layout,
            vert.module,
            frag.module,
        )?;
        self.pipeline = pipeline;
        self.pipeline_layout = pipeline_layout;

        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &self.swapchain.image_views,
            self.render_pass,
            self.swapchain.extent,
        )?;

        let (descriptor_pool, descriptor_set) = pipeline::create_descriptor_set(
            &self.device,
            self.descriptor_set_layout,
            self.texture.descriptor_info(),
        )?;
        self.descriptor_pool = descriptor_pool;
        self.descriptor_set = descriptor_set;

        Ok(())
    }

    fn create_frame_resources(&mut self) -> RenderResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(FRAMES_IN_FLIGHT as u32);

        let command_buffers =
            unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?;

        for command_buffer in command_buffers {
            let frame = FrameResources::new(&self.device, command_buffer)?;
            self.frames.push(frame);
        }
        Ok(())
    }

    /// Begin a frame: wait for this slot's previous use, acquire an image,
    /// and open the render pass. Resets the staging offsets.
    ///
    /// An out-of-date swapchain triggers a rebuild and a retried acquire; if
    /// the surface still is not usable the frame is skipped, not failed.
    pub fn clear(&mut self) -> RenderResult<()> {
        self.current_image = None;

        if self.needs_rebuild {
            self.rebuild_swapchain()?;
            self.needs_rebuild = false;
        }

        let (fence, image_available, command_buffer) = {
            let frame = &self.frames[self.cursor.index()];
            (
                frame.sync.in_flight_fence,
                frame.sync.image_available,
                frame.command_buffer,
            )
        };

        // The GPU must be done with this slot's command buffer before we
        // record into it again
        unsafe {
            self.device
                .device
                .wait_for_fences(&[fence], true, u64::MAX)?;
        }

        let mut acquired = self.swapchain.acquire_next_image(image_available)?;
        if acquired.is_none() {
            self.rebuild_swapchain()?;
            acquired = self.swapchain.acquire_next_image(image_available)?;
        }
        let Some((image_index, suboptimal)) = acquired else {
            log::debug!("Surface still out of date after rebuild; skipping frame");
            self.needs_rebuild = true;
            return Ok(());
        };
        if suboptimal {
            self.needs_rebuild = true;
        }

        // Reset only after a successful acquire; a skipped frame must leave
        // the fence signaled or the next wait would never return
        unsafe {
            self.device.device.reset_fences(&[fence])?;

            self.device.device.reset_command_buffer(
                command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            let begin_info = vk::CommandBufferBeginInfo::builder();
            self.device
                .device
                .begin_command_buffer(command_buffer, &begin_info)?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            }];
            let render_pass_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(self.framebuffers[image_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.swapchain.extent,
                })
                .clear_values(&clear_values);

            self.device.device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
            self.device.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
            self.device.device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[self.vertex_buffer.buffer],
                &[0],
            );
            self.device.device.cmd_bind_index_buffer(
                command_buffer,
                self.index_buffer.buffer,
                0,
                vk::IndexType::UINT32,
            );
            self.device.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
        }

        self.staging.reset();
        self.current_image = Some(image_index);
        Ok(())
    }

    /// Stage one object's transformed vertices and rebased indices.
    ///
    /// Returns false, leaving the staging offsets untouched, when either
    /// capacity would be exceeded or no frame is open.
    pub fn add(&mut self, object: &Object) -> bool {
        if self.current_image.is_none() {
            return false;
        }

        let vertices = object.transformed_data();
        let indices = &object.indices;
        let Some((vertex_base, element_base)) =
            self.staging.try_stage(vertices.len(), indices.len())
        else {
            return false;
        };

        self.vertex_buffer.write(
            vertex_base * std::mem::size_of::<Vertex>(),
            bytemuck::cast_slice(vertices),
        );

        let shifted = rebase_indices(indices, vertex_base as u32);
        self.index_buffer.write(
            element_base * std::mem::size_of::<u32>(),
            bytemuck::cast_slice(&shifted),
        );

        true
    }

    /// Replace one texture array layer with tightly packed RGBA pixels.
    ///
    /// Contract violations (empty or mis-sized data, layer out of range)
    /// return false without touching the GPU.
    pub fn update_texture(&mut self, data: &[u8], layer: usize) -> bool {
        if !validate_upload(data.len(), layer, self.texture.layer_size()) {
            log::debug!(
                "Rejected texture upload: {} bytes into layer {}",
                data.len(),
                layer
            );
            return false;
        }

        match self.texture.upload(data, layer as u32, self.command_pool) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Texture upload failed: {}", e);
                false
            }
        }
    }

    /// Draw everything staged since clear(), close the pass, and submit.
    pub fn render(&mut self) -> RenderResult<()> {
        let Some(_image_index) = self.current_image else {
            return Ok(());
        };
        let frame = &self.frames[self.cursor.index()];
        let command_buffer = frame.command_buffer;

        unsafe {
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: self.swapchain.extent.width as f32,
                height: self.swapchain.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            };
            self.device
                .device
                .cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device
                .device
                .cmd_set_scissor(command_buffer, 0, &[scissor]);

            log::trace!(
                "Drawing {} vertices / {} indices",
                self.staging.vertex_count(),
                self.staging.element_count()
            );
            self.device.device.cmd_draw_indexed(
                command_buffer,
                self.staging.element_count() as u32,
                1,
                0,
                0,
                0,
            );

            self.device.device.cmd_end_render_pass(command_buffer);
            self.device.device.end_command_buffer(command_buffer)?;

            let wait_semaphores = [frame.sync.image_available];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = [command_buffer];
            let signal_semaphores = [frame.sync.render_finished];

            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    frame.sync.in_flight_fence,
                )
                .map_err(RendererError::SubmitFailed)?;
        }

        Ok(())
    }

    /// Queue the presentation and advance the frame slot.
    ///
    /// A stale surface schedules a rebuild for the next clear(); it is not
    /// handled synchronously here.
    pub fn present(&mut self) -> RenderResult<()> {
        if let Some(image_index) = self.current_image.take() {
            let frame = &self.frames[self.cursor.index()];
            let rebuild = self.swapchain.present(
                self.device.present_queue,
                image_index,
                &[frame.sync.render_finished],
            )?;
            if rebuild {
                self.needs_rebuild = true;
            }
        }

        self.cursor.advance();
        Ok(())
    }

    /// Block until the device is idle. Must run before teardown.
    pub fn end_loop(&mut self) -> RenderResult<()> {
        self.device.wait_idle()
    }

    /// Tear down and rebuild the swapchain-dependent objects. The render
    /// pass and pipeline survive unless the surface format changed.
    fn rebuild_swapchain(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        log::debug!("Rebuilding swapchain");

        // Framebuffers go first; they reference the old image views
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
        self.framebuffers.clear();

        let old_format = self.swapchain.format;
        let vk::Extent2D { width, height } = self.swapchain.extent;

        // The retired swapchain stays alive until the new one exists
        let new_swapchain =
            Swapchain::new(self.device.clone(), width, height, Some(&self.swapchain))?;
        let retired = std::mem::replace(&mut self.swapchain, new_swapchain);
        drop(retired);

        if self.swapchain.format != old_format {
            log::info!(
                "Surface format changed ({:?} -> {:?}); rebuilding pipeline",
                old_format,
                self.swapchain.format
            );
            unsafe {
                self.device.device.destroy_pipeline(self.pipeline, None);
                self.device
                    .device
                    .destroy_pipeline_layout(self.pipeline_layout, None);
                self.device.device.destroy_render_pass(self.render_pass, None);
            }
            self.pipeline = vk::Pipeline::null();
            self.pipeline_layout = vk::PipelineLayout::null();
            self.render_pass = vk::RenderPass::null();

            self.render_pass =
                pipeline::create_render_pass(&self.device, self.swapchain.format)?;
            let vert = ShaderModule::from_path(self.device.clone(), &self.vertex_shader_path)?;
            let frag =
                ShaderModule::from_path(self.device.clone(), &self.fragment_shader_path)?;
            let (new_pipeline, new_layout) = pipeline::create_graphics_pipeline(
                &self.device,
                self.render_pass,
                self.descriptor_set_layout,
                vert.module,
                frag.module,
            )?;
            self.pipeline = new_pipeline;
            self.pipeline_layout = new_layout;
        }

        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &self.swapchain.image_views,
            self.render_pass,
            self.swapchain.extent,
        )?;

        Ok(())
    }
}

/// Index values rebased onto the object's slot in the shared vertex buffer.
fn rebase_indices(indices: &[u32], vertex_base: u32) -> Vec<u32> {
    indices.iter().map(|&i| i + vertex_base).collect()
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer resources...");

        // No destruction while the GPU may still reference these objects
        let _ = self.device.wait_idle();

        unsafe {
            for frame in &self.frames {
                frame.destroy(&self.device.device);
            }
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }

        // Image views, swapchain, buffers, texture, and the device itself
        // release in field order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_shift_by_vertex_base() {
        assert_eq!(
            rebase_indices(&[0, 1, 2, 2, 3, 0], 4),
            vec![4, 5, 6, 6, 7, 4]
        );
    }

    #[test]
    fn zero_base_is_identity() {
        let indices = [0u32, 2, 1];
        assert_eq!(rebase_indices(&indices, 0), indices.to_vec());
    }
}
