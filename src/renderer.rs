// Renderer - owns every Vulkan object and builds them in order
//
//   capabilities -> instance -> surface -> adapter -> device
//     -> swapchain -> pipeline -> commands -> sync
//
// Teardown is the exact reverse, driven by struct field order. `RenderCore`
// holds the per-device part and is generic over the device bridge so the
// whole lifecycle can run against a mock.

use ash::{vk, Entry};
use raw_window_handle::HasDisplayHandle;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;

use crate::backend::adapter::{find_queue_families, select_adapter, AdapterCapabilities};
use crate::backend::capability::CapabilityNegotiator;
use crate::backend::command::CommandContext;
use crate::backend::device::{VulkanDevice, REQUIRED_DEVICE_EXTENSIONS};
use crate::backend::frame::{FrameExecutor, FrameOutcome, FrameSettings, FrameStats};
use crate::backend::gpu::GpuDevice;
use crate::backend::instance::{ValidationSettings, VulkanInstance};
use crate::backend::pipeline::PipelineState;
use crate::backend::shader;
use crate::backend::surface::{self, Surface, SurfaceSupport};
use crate::backend::swapchain::Swapchain;
use crate::backend::sync::FrameSync;
use crate::config::Config;
use crate::error::Result;

/// The part of initialization an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Capabilities,
    Instance,
    Surface,
    Adapter,
    Device,
    Swapchain,
    Pipeline,
    Commands,
    Sync,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStage::Capabilities => "instance capabilities",
            InitStage::Instance => "instance",
            InitStage::Surface => "surface",
            InitStage::Adapter => "adapter",
            InitStage::Device => "logical device",
            InitStage::Swapchain => "swapchain",
            InitStage::Pipeline => "pipeline",
            InitStage::Commands => "command buffer",
            InitStage::Sync => "synchronization objects",
        };
        f.write_str(name)
    }
}

fn stage<T>(stage: InitStage, build: impl FnOnce() -> Result<T>) -> Result<T> {
    log::debug!("Creating {}", stage);
    build().map_err(|err| err.at(stage))
}

/// Swapchain, pipeline and per-frame resources of one device.
pub struct RenderCore<D: GpuDevice> {
    // Reverse order of creation
    frame: FrameExecutor<D>,
    pipeline: PipelineState<D>,
    swapchain: Swapchain<D>,
    device: Arc<D>,
}

impl<D: GpuDevice> RenderCore<D> {
    pub fn new(
        device: Arc<D>,
        surface: vk::SurfaceKHR,
        support: &SurfaceSupport,
        drawable: vk::Extent2D,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        settings: FrameSettings,
    ) -> Result<Self> {
        let swapchain = stage(InitStage::Swapchain, || {
            Swapchain::new(device.clone(), surface, support, drawable)
        })?;
        let pipeline = stage(InitStage::Pipeline, || {
            PipelineState::new(device.clone(), &swapchain, vertex_spirv, fragment_spirv)
        })?;
        let commands = stage(InitStage::Commands, || CommandContext::new(device.clone()))?;
        let sync = stage(InitStage::Sync, || FrameSync::new(device.clone()))?;

        Ok(Self {
            frame: FrameExecutor::new(device.clone(), commands, sync, settings),
            pipeline,
            swapchain,
            device,
        })
    }

    pub fn render_frame(&mut self) -> FrameOutcome {
        self.frame.render_frame(&self.swapchain, &self.pipeline)
    }

    pub fn stats(&self) -> FrameStats {
        self.frame.stats()
    }
}

impl<D: GpuDevice> Drop for RenderCore<D> {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Waiting for device idle before teardown failed: {}", e);
        }
        let stats = self.frame.stats();
        log::info!(
            "Releasing render resources ({} frames presented, {} skipped)",
            stats.presented,
            stats.skipped
        );
    }
}

/// The complete renderer for one window.
pub struct Renderer {
    core: RenderCore<VulkanDevice>,
    device: Arc<VulkanDevice>,
    surface: Surface,
    instance: Arc<VulkanInstance>,
}

impl Renderer {
    pub fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let validation = ValidationSettings {
            enabled: cfg!(debug_assertions) && config.debug.validation_layers,
            abort_on_error: config.debug.abort_on_validation_error,
        };

        let (entry, resolved) = stage(InitStage::Capabilities, || {
            let entry = unsafe { Entry::load() }?;
            let display = window.display_handle()?.as_raw();

            let mut extensions = surface::required_extensions(display)?;
            let (debug_extensions, layers) = validation.requirements();
            extensions.extend(debug_extensions);

            let negotiator = CapabilityNegotiator::new(entry);
            let resolved = negotiator.negotiate(&extensions, &layers)?;
            Ok((negotiator.into_source(), resolved))
        })?;

        let instance = stage(InitStage::Instance, || {
            VulkanInstance::new(entry, &config.window.title, &resolved, validation)
        })?;
        if validation.enabled && !instance.has_validation() {
            log::warn!("Validation requested but the debug messenger is not active");
        }

        let surface = stage(InitStage::Surface, || Surface::new(instance.clone(), window))?;

        let (adapter, queues) = stage(InitStage::Adapter, || {
            let adapters = AdapterCapabilities::enumerate(&instance.instance, &surface)?;
            let adapter = select_adapter(&adapters, &REQUIRED_DEVICE_EXTENSIONS)?.clone();
            let queues = find_queue_families(&adapter.queue_families, |family| {
                surface.supports_present(adapter.handle, family)
            })
            .resolve()?;
            log::info!(
                "Queue families: graphics {}, present {}",
                queues.graphics,
                queues.present
            );
            Ok((adapter, queues))
        })?;

        let device = stage(InitStage::Device, || {
            VulkanDevice::new(instance.clone(), &adapter, queues)
        })?;

        // Queried again now that the adapter is fixed
        let support = stage(InitStage::Swapchain, || surface.query_support(adapter.handle))?;
        let (vertex, fragment) = stage(InitStage::Pipeline, || {
            Ok((
                shader::load_spirv(&config.shaders.vertex)?,
                shader::load_spirv(&config.shaders.fragment)?,
            ))
        })?;

        let size = window.inner_size();
        let drawable = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let settings = FrameSettings {
            clear_color: config.graphics.clear_color,
            timeout: Duration::from_millis(config.graphics.frame_timeout_ms),
        };

        let core = RenderCore::new(
            device.clone(),
            surface.handle,
            &support,
            drawable,
            &vertex,
            &fragment,
            settings,
        )?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            core,
            device,
            surface,
            instance,
        })
    }

    pub fn render_frame(&mut self) -> FrameOutcome {
        self.core.render_frame()
    }

    pub fn stats(&self) -> FrameStats {
        self.core.stats()
    }

    pub fn device_name(&self) -> &str {
        &self.device.name
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(
            "Cleaning up Vulkan resources (surface {:?}, instance {:?})...",
            self.surface.handle,
            self.instance.instance.handle()
        );
    }
}
