// Backend module - Vulkan abstraction layer
//
// Design: thin RAII wrappers around ash. Everything above the instance and
// device talks to the GPU through the `GpuDevice` trait.

pub mod adapter;
pub mod capability;
pub mod command;
pub mod device;
pub mod frame;
pub mod gpu;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use device::VulkanDevice;
pub use frame::{FrameOutcome, FrameStats};
pub use gpu::GpuDevice;
pub use swapchain::Swapchain;
