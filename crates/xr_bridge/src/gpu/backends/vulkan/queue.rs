//! Command list replay and submission
//!
//! Each executed [`CommandList`] is replayed into a primary command buffer
//! and submitted on the device queue. A private timeline semaphore counts
//! submissions so finished command buffers can be recycled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;

use crate::gpu::{CommandList, CommandQueue, GpuCommand, GpuError, GpuFence, GpuResult, ResourceState};

use super::context::api_error;
use super::fence::VulkanFence;
use super::resources::{image_layout, layout_barrier, ResourceTables, Shared};

struct CommandPool {
    pool: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
    pending: VecDeque<(vk::CommandBuffer, u64)>,
    submitted: u64,
}

/// [`CommandQueue`] over the device's graphics queue
pub struct VulkanQueue {
    shared: Arc<Shared>,
    commands: Mutex<CommandPool>,
    timeline: VulkanFence,
}

impl VulkanQueue {
    pub(crate) fn new(shared: Arc<Shared>) -> GpuResult<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(shared.context.queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { shared.device().create_command_pool(&info, None) }.map_err(api_error("vkCreateCommandPool"))?;
        let timeline = match VulkanFence::new(Arc::clone(&shared), 0) {
            Ok(fence) => fence,
            Err(err) => {
                unsafe { shared.device().destroy_command_pool(pool, None) };
                return Err(err);
            }
        };
        Ok(Self {
            shared,
            commands: Mutex::new(CommandPool { pool, free: Vec::new(), pending: VecDeque::new(), submitted: 0 }),
            timeline,
        })
    }

    fn next_command_buffer(&self, commands: &mut CommandPool) -> GpuResult<vk::CommandBuffer> {
        let completed = self.timeline.completed_value();
        while let Some(&(buffer, value)) = commands.pending.front() {
            if value > completed {
                break;
            }
            commands.pending.pop_front();
            commands.free.push(buffer);
        }
        if let Some(buffer) = commands.free.pop() {
            unsafe { self.shared.device().reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty()) }
                .map_err(api_error("vkResetCommandBuffer"))?;
            return Ok(buffer);
        }
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(commands.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers =
            unsafe { self.shared.device().allocate_command_buffers(&info) }.map_err(api_error("vkAllocateCommandBuffers"))?;
        buffers.into_iter().next().ok_or(GpuError::OutOfMemory { requested: 0 })
    }

    /// Submit `buffers` and signal `signals`, then count the submission
    fn submit(&self, commands: &mut CommandPool, buffers: &[vk::CommandBuffer], signals: &[(vk::Semaphore, u64)]) -> GpuResult<u64> {
        let value = commands.submitted + 1;
        let mut semaphores: Vec<vk::Semaphore> = signals.iter().map(|(semaphore, _)| *semaphore).collect();
        let mut values: Vec<u64> = signals.iter().map(|(_, value)| *value).collect();
        semaphores.push(self.timeline.semaphore());
        values.push(value);

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&values);
        let submit = vk::SubmitInfo::builder()
            .command_buffers(buffers)
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info)
            .build();
        {
            let queue = self.shared.context.lock_queue();
            unsafe { self.shared.device().queue_submit(*queue, &[submit], vk::Fence::null()) }
                .map_err(api_error("vkQueueSubmit"))?;
        }
        commands.submitted = value;
        Ok(value)
    }

    /// Signal a binary semaphore after all submitted work, for presentation
    pub(crate) fn signal_binary(&self, semaphore: vk::Semaphore) -> GpuResult<()> {
        let semaphores = [semaphore];
        let submit = vk::SubmitInfo::builder().signal_semaphores(&semaphores).build();
        let queue = self.shared.context.lock_queue();
        unsafe { self.shared.device().queue_submit(*queue, &[submit], vk::Fence::null()) }
            .map_err(api_error("vkQueueSubmit"))
    }
}

impl CommandQueue for VulkanQueue {
    fn execute(&self, list: &CommandList) -> GpuResult<()> {
        list.ensure_closed()?;
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        let buffer = self.next_command_buffer(&mut commands)?;

        let begin = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let device = self.shared.device();
        unsafe { device.begin_command_buffer(buffer, &begin) }.map_err(api_error("vkBeginCommandBuffer"))?;
        let replayed = {
            let resources = self.shared.resources();
            Replay::new(device, buffer, &resources).run(list.commands())
        };
        let ended = unsafe { device.end_command_buffer(buffer) }.map_err(api_error("vkEndCommandBuffer"));
        if let Err(err) = replayed.and(ended) {
            commands.free.push(buffer);
            return Err(err);
        }

        let value = self.submit(&mut commands, &[buffer], &[])?;
        commands.pending.push_back((buffer, value));
        log::trace!("Submitted '{}' ({} commands) as {value}", list.label(), list.commands().len());
        Ok(())
    }

    fn signal(&self, fence: &Arc<dyn GpuFence>, value: u64) -> GpuResult<()> {
        let fence = fence.as_any().downcast_ref::<VulkanFence>().ok_or_else(|| GpuError::InvalidOperation {
            reason: "Fence was not created by the Vulkan device".to_string(),
        })?;
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        self.submit(&mut commands, &[], &[(fence.semaphore(), value)])?;
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.shared.context.wait_queue_idle()
    }
}

impl Drop for VulkanQueue {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::warn!("Queue teardown without idle: {err}");
        }
        let commands = self.commands.get_mut().unwrap_or_else(PoisonError::into_inner);
        unsafe { self.shared.device().destroy_command_pool(commands.pool, None) };
    }
}

/// Translation state while replaying one list
struct Replay<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    resources: &'a ResourceTables,
    target: Option<(vk::ImageView, vk::Extent2D)>,
    rendering: bool,
    layout: Option<vk::PipelineLayout>,
    shader_resources: Option<crate::gpu::DescriptorHeapHandle>,
    samplers: Option<crate::gpu::DescriptorHeapHandle>,
    shader_resource_slot: u32,
    sampler_slot: u32,
}

impl<'a> Replay<'a> {
    fn new(device: &'a ash::Device, cmd: vk::CommandBuffer, resources: &'a ResourceTables) -> Self {
        Self {
            device,
            cmd,
            resources,
            target: None,
            rendering: false,
            layout: None,
            shader_resources: None,
            samplers: None,
            shader_resource_slot: 0,
            sampler_slot: 0,
        }
    }

    fn run(mut self, commands: &[GpuCommand]) -> GpuResult<()> {
        for command in commands {
            self.apply(command)?;
        }
        self.end_rendering();
        Ok(())
    }

    fn apply(&mut self, command: &GpuCommand) -> GpuResult<()> {
        let (device, cmd) = (self.device, self.cmd);
        match command {
            GpuCommand::ResourceBarrier { image, before, after } => {
                self.end_rendering();
                let image = self.resources.image(*image)?;
                let barrier = layout_barrier(
                    image.image,
                    image_layout(*before, image.presentable),
                    image_layout(*after, image.presentable),
                );
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
            GpuCommand::SetRenderTarget { heap, slot } => {
                self.end_rendering();
                self.bind_target(*heap, *slot)?;
            }
            GpuCommand::ClearRenderTarget { heap, slot, color } => {
                self.end_rendering();
                self.bind_target(*heap, *slot)?;
                self.begin_rendering(Some(*color))?;
            }
            GpuCommand::SetViewport(viewport) => unsafe {
                let viewport = vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                device.cmd_set_viewport(cmd, 0, &[viewport]);
            },
            GpuCommand::SetScissor(rect) => unsafe {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: rect.offset.x, y: rect.offset.y },
                    extent: vk::Extent2D {
                        width: u32::try_from(rect.extent.width).unwrap_or(0),
                        height: u32::try_from(rect.extent.height).unwrap_or(0),
                    },
                };
                device.cmd_set_scissor(cmd, 0, &[scissor]);
            },
            GpuCommand::SetDescriptorHeaps { shader_resources, samplers } => {
                self.shader_resources = Some(*shader_resources);
                self.samplers = Some(*samplers);
            }
            GpuCommand::SetGraphicsRootSignature(root_signature) => {
                self.layout = Some(self.resources.layout(*root_signature)?);
            }
            GpuCommand::SetPipelineState(pipeline) => {
                let pipeline = self.resources.pipeline(*pipeline)?;
                unsafe { device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline) };
            }
            GpuCommand::SetShaderResource { slot } => self.shader_resource_slot = *slot,
            GpuCommand::SetSampler { slot } => self.sampler_slot = *slot,
            GpuCommand::SetRootConstants(constants) => {
                let layout = self.layout.ok_or_else(|| missing("root signature"))?;
                unsafe {
                    device.cmd_push_constants(
                        cmd,
                        layout,
                        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                        0,
                        bytemuck::cast_slice(constants.as_words()),
                    );
                }
            }
            GpuCommand::DrawInstanced { vertex_count, instance_count } => {
                if !self.rendering {
                    self.begin_rendering(None)?;
                }
                let layout = self.layout.ok_or_else(|| missing("root signature"))?;
                let srv_heap = self.shader_resources.ok_or_else(|| missing("shader resource heap"))?;
                let sampler_heap = self.samplers.ok_or_else(|| missing("sampler heap"))?;
                let sets = [
                    self.resources.heap(srv_heap)?.set(self.shader_resource_slot)?,
                    self.resources.heap(sampler_heap)?.set(self.sampler_slot)?,
                ];
                unsafe {
                    device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, 0, &sets, &[]);
                    device.cmd_draw(cmd, *vertex_count, *instance_count, 0, 0);
                }
            }
        }
        Ok(())
    }

    fn bind_target(&mut self, heap: crate::gpu::DescriptorHeapHandle, slot: u32) -> GpuResult<()> {
        let image = self.resources.image(self.resources.heap(heap)?.render_target(slot)?)?;
        self.target = Some((image.view, vk::Extent2D { width: image.desc.width, height: image.desc.height }));
        Ok(())
    }

    fn begin_rendering(&mut self, clear: Option<[f32; 4]>) -> GpuResult<()> {
        let (view, extent) = self.target.ok_or_else(|| missing("render target"))?;
        let attachment = [vk::RenderingAttachmentInfo::builder()
            .image_view(view)
            .image_layout(image_layout(ResourceState::RENDER_TARGET, false))
            .load_op(if clear.is_some() { vk::AttachmentLoadOp::CLEAR } else { vk::AttachmentLoadOp::LOAD })
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue { color: vk::ClearColorValue { float32: clear.unwrap_or_default() } })
            .build()];
        let info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
            .layer_count(1)
            .color_attachments(&attachment);
        unsafe { self.device.cmd_begin_rendering(self.cmd, &info) };
        self.rendering = true;
        Ok(())
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.device.cmd_end_rendering(self.cmd) };
            self.rendering = false;
        }
    }
}

fn missing(what: &str) -> GpuError {
    GpuError::InvalidOperation { reason: format!("Draw recorded without a bound {what}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binding_message() {
        assert_eq!(
            missing("sampler heap").to_string(),
            "Invalid operation: Draw recorded without a bound sampler heap"
        );
    }
}
