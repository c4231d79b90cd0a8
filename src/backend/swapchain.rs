// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Parameter choice is split into small pure functions; creation owns the
// swapchain and its views as one unit.

use ash::{prelude::VkResult, vk};
use std::sync::Arc;

use super::adapter::ResolvedQueues;
use super::gpu::GpuDevice;
use super::surface::SurfaceSupport;
use crate::error::{RenderError, Result, VkResultExt};

/// Prefer 8-bit BGRA sRGB, otherwise whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO: vsync, no tearing, guaranteed to be available.
pub fn choose_present_mode(_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// Use the surface's own extent unless it is the `u32::MAX` "undefined"
/// marker, in which case the drawable size is clamped into range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != u32::MAX && current.height != u32::MAX {
        log::debug!(
            "Swapchain extent as specified by capabilities: {}x{}",
            current.width,
            current.height
        );
        return current;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    let extent = vk::Extent2D {
        width: drawable.width.clamp(min.width, max.width),
        height: drawable.height.clamp(min.height, max.height),
    };
    log::debug!(
        "Clamped drawable size {}x{} to {}x{}",
        drawable.width,
        drawable.height,
        extent.width,
        extent.height
    );
    extent
}

/// One image above the minimum when a maximum is reported; a maximum of 0
/// means unbounded and the minimum is used as is.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    if max == 0 {
        min
    } else {
        (min + 1).min(max).max(min)
    }
}

/// Exclusive access when one family does both jobs, concurrent otherwise.
pub fn choose_sharing(queues: ResolvedQueues) -> (vk::SharingMode, Vec<u32>) {
    if queues.is_shared() {
        (vk::SharingMode::EXCLUSIVE, vec![queues.graphics])
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![queues.graphics, queues.present],
        )
    }
}

pub struct Swapchain<D: GpuDevice> {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub sharing_mode: vk::SharingMode,
    device: Arc<D>,
}

impl<D: GpuDevice> Swapchain<D> {
    pub fn new(
        device: Arc<D>,
        surface: vk::SurfaceKHR,
        support: &SurfaceSupport,
        drawable: vk::Extent2D,
    ) -> Result<Self> {
        let capabilities = &support.capabilities;

        let format = choose_surface_format(&support.formats).ok_or(RenderError::Vulkan {
            op: "choose surface format",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(capabilities, drawable);
        let image_count = choose_image_count(capabilities);
        let (sharing_mode, family_indices) = choose_sharing(device.queue_families());

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            image_count,
            sharing_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = device
            .create_swapchain(&create_info)
            .during("create swapchain")?;

        // From here on, dropping `this` releases whatever exists so far
        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
            sharing_mode,
            device,
        };

        this.images = this
            .device
            .swapchain_images(swapchain)
            .during("get swapchain images")?;
        log::info!("Number of swapchain images: {}", this.images.len());
        if this.images.is_empty() {
            return Err(RenderError::Vulkan {
                op: "get swapchain images",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        }

        for i in 0..this.images.len() {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(this.images[i])
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
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
            let view = this
                .device
                .create_image_view(&view_info)
                .during("create swapchain image view")?;
            this.image_views.push(view);
        }

        Ok(this)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.device
            .acquire_next_image(self.swapchain, timeout_ns, semaphore)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VkResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        self.device.queue_present(queue, &present_info)
    }
}

impl<D: GpuDevice> Drop for Swapchain<D> {
    fn drop(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}
