// Swapchain - window presentation
//
// Manages the chain of images we render to and present to the screen.
// Recreated wholesale when the surface goes out of date; the retired chain
// is handed to the new one so it is only destroyed after the rebuild
// succeeds.

use std::sync::Arc;

use ash::vk;

use super::error::{RenderResult, RendererError};
use super::VulkanDevice;

/// Desired image count: device minimum + 1, clamped to the maximum when the
/// device advertises one (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

/// Prefer 8-bit BGRA sRGB; otherwise the first supported format. The list
/// is never empty for a selected device.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

/// Prefer low-latency triple buffering; FIFO is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface-controlled extent when reported, otherwise the window size
/// clamped to the surface bounds.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Build the swapchain and one view per image. `old` is the retired
    /// swapchain during a rebuild; it stays alive until this returns.
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        old: Option<&Swapchain>,
    ) -> RenderResult<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }?;
        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }?;
        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }?;

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps);

        log::info!("Present mode: {:?}", present_mode);

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        // Exclusive when one family owns both roles, concurrent otherwise
        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(
                old.map(|s| s.swapchain).unwrap_or(vk::SwapchainKHR::null()),
            );
        create_info = if families.shared {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::SwapchainCreationFailed)?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;
        log::info!("Created swapchain with {} images", images.len());

        let image_views = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&create_info, None) }
                    .map_err(RendererError::Vulkan)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            swapchain_loader,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire the next image for rendering.
    ///
    /// `Ok(None)` means the swapchain is out of date and must be rebuilt.
    /// The `bool` is the suboptimal flag: usable, but schedule a rebuild.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> RenderResult<Option<(u32, bool)>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Present the rendered image.
    ///
    /// `Ok(true)` means the surface changed underneath us and a rebuild
    /// should happen before the next frame.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RenderResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(RendererError::PresentFailed(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_min_plus_one() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn image_count_clamps_to_max() {
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        assert_eq!(choose_image_count(&caps(7, 0)), 8);
    }

    #[test]
    fn format_prefers_bgra_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_falls_back_to_first_supported() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&c, 100, 100), c.current_extent);
    }

    #[test]
    fn extent_clamps_window_size_when_unconstrained() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        c.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        c.max_image_extent = vk::Extent2D { width: 1920, height: 1080 };
        let extent = choose_extent(&c, 4096, 16);
        assert_eq!(extent, vk::Extent2D { width: 1920, height: 64 });
    }
}
