// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash; every GPU object is released on drop or by an
// explicit destroy call in reverse creation order.

pub mod buffer;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use error::{RenderResult, RendererError};
pub use swapchain::Swapchain;
