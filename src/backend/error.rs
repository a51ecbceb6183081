// Backend error taxonomy
//
// Setup errors are fatal and surface from the constructor; out-of-date
// swapchains are handled internally and never appear here.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to load the Vulkan library: {0}")]
    LoadingFailed(#[from] ash::LoadingError),

    #[error("no Vulkan-capable adapter found")]
    NoAdapterFound,

    #[error("no adapter satisfies the device requirements")]
    NoSuitableAdapter,

    #[error("no queue family supports graphics and presentation")]
    NoQueueFamilies,

    #[error("unsupported window handle type")]
    UnsupportedWindowHandle,

    #[error("shader {path:?}: {reason}")]
    ShaderLoadFailed { path: PathBuf, reason: String },

    #[error("swapchain creation failed: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(vk::Result),

    #[error("queue submission failed: {0}")]
    SubmitFailed(vk::Result),

    #[error("presentation failed: {0}")]
    PresentFailed(vk::Result),

    #[error("device memory allocation failed: {0}")]
    AllocationFailed(#[from] gpu_allocator::AllocationError),

    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
}

pub type RenderResult<T> = std::result::Result<T, RendererError>;
