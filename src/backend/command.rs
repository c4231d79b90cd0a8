// Command pool + the single command buffer re-recorded every frame

use ash::vk;
use std::sync::Arc;

use super::gpu::GpuDevice;
use crate::error::{Result, VkResultExt};

/// Everything `record_triangle` needs to know about the target image.
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

pub struct CommandContext<D: GpuDevice> {
    pub pool: vk::CommandPool,
    /// Freed together with the pool
    pub buffer: vk::CommandBuffer,
    device: Arc<D>,
}

impl<D: GpuDevice> CommandContext<D> {
    pub fn new(device: Arc<D>) -> Result<Self> {
        let family = device.queue_families().graphics;
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family);

        let pool = device
            .create_command_pool(&pool_info)
            .during("create command pool")?;
        let mut this = Self {
            pool,
            buffer: vk::CommandBuffer::null(),
            device,
        };

        this.buffer = this
            .device
            .allocate_command_buffer(pool)
            .during("allocate command buffer")?;
        log::debug!(
            "Command buffer {:?} allocated from pool {:?} (family {})",
            this.buffer,
            pool,
            family
        );
        Ok(this)
    }

    /// Reset and record: clear, bind, dynamic viewport/scissor, 3 vertices.
    pub fn record_triangle(&self, target: &DrawTarget) -> Result<()> {
        let cmd = self.buffer;
        let device = self.device.as_ref();

        device
            .reset_command_buffer(cmd)
            .during("reset command buffer")?;
        device
            .begin_command_buffer(cmd)
            .during("begin command buffer")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: target.clear_color,
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info);
        device.cmd_bind_pipeline(cmd, target.pipeline);
        device.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: target.extent.width as f32,
                height: target.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        device.cmd_set_scissor(cmd, render_area);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd).during("end command buffer")
    }
}

impl<D: GpuDevice> Drop for CommandContext<D> {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}
