// Recording GpuDevice for unit tests
//
// Hands out fake handles, keeps track of which ones are alive, records
// every call in order and can be told to fail a given operation.
// Submitted work completes instantly unless the GPU is "stalled".

use ash::vk::Handle;
use ash::{prelude::VkResult, vk};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::adapter::ResolvedQueues;
use super::gpu::GpuDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Swapchain,
    SwapchainImages,
    ImageView,
    RenderPass,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
    WaitFence,
    ResetFence,
    Acquire,
    ResetCommandBuffer,
    BeginCommandBuffer,
    EndCommandBuffer,
    Submit,
    Present,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WaitIdle,
    Create(Op, u64),
    Destroy(Op, u64),
    WaitFence(u64),
    ResetFence(u64),
    Acquire {
        semaphore: u64,
    },
    ResetCommandBuffer(u64),
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    BeginRenderPass {
        framebuffer: u64,
        extent: (u32, u32),
        clear_color: [f32; 4],
    },
    BindPipeline(u64),
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor {
        extent: (u32, u32),
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    EndRenderPass,
    Submit {
        queue: u64,
        wait: Vec<u64>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        signal: Vec<u64>,
        command_buffers: Vec<u64>,
        fence: u64,
    },
    Present {
        queue: u64,
        image_index: u32,
        wait: Vec<u64>,
    },
}

#[derive(Debug, Clone)]
pub struct SwapchainRecord {
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub format: vk::Format,
    pub extent: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct ImageViewRecord {
    pub image: u64,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    /// r, g, b, a
    pub swizzle: [vk::ComponentSwizzle; 4],
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone)]
pub struct RenderPassRecord {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpass_count: u32,
    pub color_attachment_count: u32,
    pub dependencies: Vec<vk::SubpassDependency>,
}

#[derive(Debug, Clone)]
pub struct PipelineRecord {
    pub stage_count: u32,
    pub vertex_binding_count: u32,
    pub vertex_attribute_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend_enable: bool,
    pub has_depth_stencil: bool,
}

#[derive(Default)]
struct State {
    next_raw: u64,
    live: BTreeMap<u64, Op>,
    created: Vec<(Op, u64)>,
    destroyed: Vec<(Op, u64)>,
    calls: Vec<Call>,
    failures: HashMap<Op, (usize, vk::Result)>,
    attempts: HashMap<Op, usize>,
    image_count: Option<u32>,
    images_len: u32,
    next_image: u32,
    fences: HashMap<u64, bool>,
    stalled: bool,
    swapchain: Option<SwapchainRecord>,
    image_views: Vec<ImageViewRecord>,
    render_pass: Option<RenderPassRecord>,
    pipeline: Option<PipelineRecord>,
    framebuffer_attachments: Vec<u64>,
}

pub struct MockDevice {
    queues: ResolvedQueues,
    state: RefCell<State>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Self::with_queues(0, 0)
    }

    pub fn with_queues(graphics: u32, present: u32) -> Arc<Self> {
        Arc::new(Self {
            queues: ResolvedQueues { graphics, present },
            state: RefCell::new(State {
                next_raw: 0x1000,
                ..Default::default()
            }),
        })
    }

    /// Let `op` succeed `successes` times, then fail every later attempt.
    pub fn fail_after(&self, op: Op, successes: usize, result: vk::Result) {
        self.state.borrow_mut().failures.insert(op, (successes, result));
    }

    pub fn fail(&self, op: Op, result: vk::Result) {
        self.fail_after(op, 0, result);
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Submitted work never completes while stalled.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    pub fn set_swapchain_image_count(&self, count: u32) {
        self.state.borrow_mut().image_count = Some(count);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn created(&self) -> Vec<(Op, u64)> {
        self.state.borrow().created.clone()
    }

    pub fn destroyed(&self) -> Vec<(Op, u64)> {
        self.state.borrow().destroyed.clone()
    }

    pub fn created_count(&self, op: Op) -> usize {
        self.state.borrow().created.iter().filter(|(o, _)| *o == op).count()
    }

    pub fn live_count(&self, op: Op) -> usize {
        self.state.borrow().live.values().filter(|o| **o == op).count()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences.get(&fence.as_raw()).copied().unwrap_or(false)
    }

    pub fn swapchain_record(&self) -> Option<SwapchainRecord> {
        self.state.borrow().swapchain.clone()
    }

    /// Create infos of every image view, in creation order.
    pub fn image_view_records(&self) -> Vec<ImageViewRecord> {
        self.state.borrow().image_views.clone()
    }

    pub fn render_pass_record(&self) -> Option<RenderPassRecord> {
        self.state.borrow().render_pass.clone()
    }

    pub fn pipeline_record(&self) -> Option<PipelineRecord> {
        self.state.borrow().pipeline.clone()
    }

    /// Image views bound to each framebuffer, in creation order.
    pub fn framebuffer_attachments(&self) -> Vec<u64> {
        self.state.borrow().framebuffer_attachments.clone()
    }

    /// Panics if any tracked handle is still alive.
    pub fn assert_all_released(&self) {
        let state = self.state.borrow();
        assert!(state.live.is_empty(), "leaked handles: {:?}", state.live);
    }

    fn attempt(&self, op: Op) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let attempts = state.attempts.entry(op).or_insert(0);
        *attempts += 1;
        let attempt = *attempts;
        match state.failures.get(&op) {
            Some(&(successes, result)) if attempt > successes => Err(result),
            _ => Ok(()),
        }
    }

    fn fresh_raw(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_raw += 1;
        state.next_raw
    }

    fn create<H: Handle>(&self, op: Op) -> VkResult<H> {
        self.attempt(op)?;
        let raw = self.fresh_raw();
        let mut state = self.state.borrow_mut();
        state.live.insert(raw, op);
        state.created.push((op, raw));
        state.calls.push(Call::Create(op, raw));
        Ok(H::from_raw(raw))
    }

    fn destroy<H: Handle>(&self, op: Op, handle: H) {
        let raw = handle.as_raw();
        let mut state = self.state.borrow_mut();
        match state.live.remove(&raw) {
            Some(kind) if kind == op => {}
            Some(kind) => panic!("destroying {raw:#x} as {op:?}, but it is a {kind:?}"),
            None => panic!("double free or unknown {op:?} handle {raw:#x}"),
        }
        state.destroyed.push((op, raw));
        state.calls.push(Call::Destroy(op, raw));
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn queue(&self, family: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + family as u64)
    }
}

unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

fn raws<H: Handle + Copy>(handles: &[H]) -> Vec<u64> {
    handles.iter().map(|h| h.as_raw()).collect()
}

impl GpuDevice for MockDevice {
    fn queue_families(&self) -> ResolvedQueues {
        self.queues
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.queue(self.queues.graphics)
    }

    fn present_queue(&self) -> vk::Queue {
        self.queue(self.queues.present)
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let record = SwapchainRecord {
            sharing_mode: info.image_sharing_mode,
            queue_family_indices: unsafe {
                slice(info.p_queue_family_indices, info.queue_family_index_count).to_vec()
            },
            min_image_count: info.min_image_count,
            present_mode: info.present_mode,
            format: info.image_format,
            extent: (info.image_extent.width, info.image_extent.height),
        };
        let swapchain = self.create(Op::Swapchain)?;
        self.state.borrow_mut().swapchain = Some(record);
        Ok(swapchain)
    }

    fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.attempt(Op::SwapchainImages)?;
        let count = {
            let state = self.state.borrow();
            state
                .image_count
                .or_else(|| state.swapchain.as_ref().map(|s| s.min_image_count))
                .unwrap_or(2)
        };
        self.state.borrow_mut().images_len = count;
        Ok((0..count)
            .map(|_| vk::Image::from_raw(self.fresh_raw()))
            .collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy(Op::Swapchain, swapchain);
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.record(Call::Acquire {
            semaphore: semaphore.as_raw(),
        });
        self.attempt(Op::Acquire)?;
        let mut state = self.state.borrow_mut();
        let index = state.next_image % state.images_len.max(1);
        state.next_image += 1;
        Ok((index, false))
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> VkResult<bool> {
        let (wait, image_index) = unsafe {
            (
                raws(slice(info.p_wait_semaphores, info.wait_semaphore_count)),
                slice(info.p_image_indices, info.swapchain_count)[0],
            )
        };
        self.record(Call::Present {
            queue: queue.as_raw(),
            image_index,
            wait,
        });
        self.attempt(Op::Present)?;
        Ok(false)
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let range = info.subresource_range;
        let record = ImageViewRecord {
            image: info.image.as_raw(),
            view_type: info.view_type,
            format: info.format,
            swizzle: [
                info.components.r,
                info.components.g,
                info.components.b,
                info.components.a,
            ],
            aspect_mask: range.aspect_mask,
            base_mip_level: range.base_mip_level,
            level_count: range.level_count,
            base_array_layer: range.base_array_layer,
            layer_count: range.layer_count,
        };
        let view = self.create(Op::ImageView)?;
        self.state.borrow_mut().image_views.push(record);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(Op::ImageView, view);
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        let record = unsafe {
            let subpasses = slice(info.p_subpasses, info.subpass_count);
            RenderPassRecord {
                attachments: slice(info.p_attachments, info.attachment_count).to_vec(),
                subpass_count: info.subpass_count,
                color_attachment_count: subpasses
                    .first()
                    .map(|s| s.color_attachment_count)
                    .unwrap_or(0),
                dependencies: slice(info.p_dependencies, info.dependency_count).to_vec(),
            }
        };
        let render_pass = self.create(Op::RenderPass)?;
        self.state.borrow_mut().render_pass = Some(record);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(Op::RenderPass, render_pass);
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        self.create(Op::ShaderModule)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(Op::ShaderModule, module);
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        self.create(Op::PipelineLayout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(Op::PipelineLayout, layout);
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let record = unsafe {
            let vertex_input = &*info.p_vertex_input_state;
            let input_assembly = &*info.p_input_assembly_state;
            let viewport = &*info.p_viewport_state;
            let raster = &*info.p_rasterization_state;
            let blend = &*info.p_color_blend_state;
            let dynamic = &*info.p_dynamic_state;
            PipelineRecord {
                stage_count: info.stage_count,
                vertex_binding_count: vertex_input.vertex_binding_description_count,
                vertex_attribute_count: vertex_input.vertex_attribute_description_count,
                topology: input_assembly.topology,
                dynamic_states: slice(dynamic.p_dynamic_states, dynamic.dynamic_state_count)
                    .to_vec(),
                viewport_count: viewport.viewport_count,
                scissor_count: viewport.scissor_count,
                polygon_mode: raster.polygon_mode,
                cull_mode: raster.cull_mode,
                front_face: raster.front_face,
                blend_enable: slice(blend.p_attachments, blend.attachment_count)
                    .iter()
                    .any(|a| a.blend_enable == vk::TRUE),
                has_depth_stencil: !info.p_depth_stencil_state.is_null(),
            }
        };
        let pipeline = self.create(Op::Pipeline)?;
        self.state.borrow_mut().pipeline = Some(record);
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(Op::Pipeline, pipeline);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        let attachment = unsafe { raws(slice(info.p_attachments, info.attachment_count)) };
        let framebuffer = self.create(Op::Framebuffer)?;
        self.state
            .borrow_mut()
            .framebuffer_attachments
            .extend(attachment);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(Op::Framebuffer, framebuffer);
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        self.create(Op::CommandPool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy(Op::CommandPool, pool);
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        // Owned by the pool, so not tracked as a live handle
        self.attempt(Op::CommandBuffer)?;
        let raw = self.fresh_raw();
        self.state.borrow_mut().created.push((Op::CommandBuffer, raw));
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::ResetCommandBuffer(cmd.as_raw()));
        self.attempt(Op::ResetCommandBuffer)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::BeginCommandBuffer(cmd.as_raw()));
        self.attempt(Op::BeginCommandBuffer)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::EndCommandBuffer(cmd.as_raw()));
        self.attempt(Op::EndCommandBuffer)
    }

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        let clear_color = unsafe {
            slice(info.p_clear_values, info.clear_value_count)
                .first()
                .map(|v| v.color.float32)
                .unwrap_or_default()
        };
        self.record(Call::BeginRenderPass {
            framebuffer: info.framebuffer.as_raw(),
            extent: (info.render_area.extent.width, info.render_area.extent.height),
            clear_color,
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.record(Call::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline(pipeline.as_raw()));
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(Call::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(Call::SetScissor {
            extent: (scissor.extent.width, scissor.extent.height),
        });
    }

    fn cmd_draw(
        &self,
        _cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(Call::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submit: &vk::SubmitInfo,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let call = unsafe {
            Call::Submit {
                queue: queue.as_raw(),
                wait: raws(slice(submit.p_wait_semaphores, submit.wait_semaphore_count)),
                wait_stages: slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count)
                    .to_vec(),
                signal: raws(slice(
                    submit.p_signal_semaphores,
                    submit.signal_semaphore_count,
                )),
                command_buffers: raws(slice(
                    submit.p_command_buffers,
                    submit.command_buffer_count,
                )),
                fence: fence.as_raw(),
            }
        };
        self.record(call);
        self.attempt(Op::Submit)?;

        let mut state = self.state.borrow_mut();
        if !state.stalled {
            state.fences.insert(fence.as_raw(), true);
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.create(Op::Semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy(Op::Semaphore, semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.create(Op::Fence)?;
        self.state.borrow_mut().fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.destroy(Op::Fence, fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        self.record(Call::WaitFence(fence.as_raw()));
        self.attempt(Op::WaitFence)?;
        if self.fence_signaled(fence) {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.record(Call::ResetFence(fence.as_raw()));
        self.attempt(Op::ResetFence)?;
        self.state.borrow_mut().fences.insert(fence.as_raw(), false);
        Ok(())
    }
}
