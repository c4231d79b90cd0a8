// Per-frame executor
//
// wait fence -> acquire -> record -> submit -> present, one frame in
// flight. A failing step skips the frame; the next redraw starts over.

use ash::vk;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::command::{CommandContext, DrawTarget};
use super::gpu::GpuDevice;
use super::pipeline::PipelineState;
use super::swapchain::Swapchain;
use super::sync::FrameSync;
use crate::error::{RenderError, VkResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    WaitFence,
    AcquireImage,
    RecordCommands,
    Submit,
    Present,
}

impl fmt::Display for FrameStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStep::WaitFence => "wait fence",
            FrameStep::AcquireImage => "acquire image",
            FrameStep::RecordCommands => "record commands",
            FrameStep::Submit => "submit",
            FrameStep::Present => "present",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub clear_color: [f32; 4],
    /// Upper bound for every fence and acquire wait
    pub timeout: Duration,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            clear_color: [1.0, 0.0, 1.0, 1.0],
            timeout: Duration::from_millis(1000),
        }
    }
}

type StepResult<T> = std::result::Result<T, (FrameStep, RenderError)>;

trait AtStep<T> {
    fn at_step(self, step: FrameStep) -> StepResult<T>;
}

impl<T> AtStep<T> for crate::error::Result<T> {
    fn at_step(self, step: FrameStep) -> StepResult<T> {
        self.map_err(|err| (step, err))
    }
}

pub struct FrameExecutor<D: GpuDevice> {
    // Drop order: sync objects, then the command pool
    sync: FrameSync<D>,
    commands: CommandContext<D>,
    settings: FrameSettings,
    stats: FrameStats,
    suboptimal_reported: bool,
    device: Arc<D>,
}

impl<D: GpuDevice> FrameExecutor<D> {
    pub fn new(
        device: Arc<D>,
        commands: CommandContext<D>,
        sync: FrameSync<D>,
        settings: FrameSettings,
    ) -> Self {
        Self {
            sync,
            commands,
            settings,
            stats: FrameStats::default(),
            suboptimal_reported: false,
            device,
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Render and present one frame. Never fails: a broken frame is logged
    /// and reported as skipped.
    pub fn render_frame(
        &mut self,
        swapchain: &Swapchain<D>,
        pipeline: &PipelineState<D>,
    ) -> FrameOutcome {
        match self.run(swapchain, pipeline) {
            Ok(()) => {
                self.stats.presented += 1;
                FrameOutcome::Presented
            }
            Err((step, err)) => {
                log::warn!("frame skipped at {}: {}", step, err);
                self.stats.skipped += 1;
                FrameOutcome::Skipped
            }
        }
    }

    fn run(&mut self, swapchain: &Swapchain<D>, pipeline: &PipelineState<D>) -> StepResult<()> {
        let timeout = self.settings.timeout;

        self.sync
            .wait_and_reset(timeout)
            .at_step(FrameStep::WaitFence)?;

        let (image_index, suboptimal) = swapchain
            .acquire_next_image(timeout.as_nanos() as u64, self.sync.image_available)
            .bounded("acquire next image", timeout)
            .at_step(FrameStep::AcquireImage)?;
        if suboptimal {
            self.report_suboptimal();
        }

        let framebuffer = pipeline
            .framebuffer(image_index)
            .ok_or(RenderError::Vulkan {
                op: "look up framebuffer",
                result: vk::Result::ERROR_OUT_OF_DATE_KHR,
            })
            .at_step(FrameStep::RecordCommands)?;
        self.commands
            .record_triangle(&DrawTarget {
                render_pass: pipeline.render_pass,
                framebuffer,
                pipeline: pipeline.pipeline,
                extent: swapchain.extent,
                clear_color: self.settings.clear_color,
            })
            .at_step(FrameStep::RecordCommands)?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [self.commands.buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.device
            .queue_submit(
                self.device.graphics_queue(),
                &submit_info,
                self.sync.in_flight_fence,
            )
            .during("submit draw command buffer")
            .at_step(FrameStep::Submit)?;
        self.sync.mark_armed();

        let suboptimal = swapchain
            .present(self.device.present_queue(), image_index, &signal_semaphores)
            .during("present")
            .at_step(FrameStep::Present)?;
        if suboptimal {
            self.report_suboptimal();
        }

        Ok(())
    }

    fn report_suboptimal(&mut self) {
        if !self.suboptimal_reported {
            log::info!("Swapchain is suboptimal for the surface, continuing");
            self.suboptimal_reported = true;
        }
    }
}
