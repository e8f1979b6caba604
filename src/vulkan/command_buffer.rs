use ash::vk;

use crate::ref_counted::RefCounted;

use super::{command_pool::CommandPool, context::Context};

/// A primary command buffer. Freed when dropped, so it has to outlive its GPU execution.
pub struct CommandBuffer {
    pub inner: vk::CommandBuffer,
    command_pool: CommandPool,
}

impl CommandBuffer {
    pub fn new(command_pool: CommandPool) -> Self {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(1)
            .command_pool(*command_pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        let inner = unsafe {
            command_pool
                .context()
                .device
                .allocate_command_buffers(&allocate_info)
        }
        .expect("Could not allocate command buffers")[0];

        Self {
            inner,
            command_pool,
        }
    }

    pub fn context(&self) -> &RefCounted<Context> {
        self.command_pool.context()
    }

    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe {
            self.context()
                .device
                .begin_command_buffer(self.inner, &begin_info)
        }
        .expect("Could not begin command buffer");
    }

    pub fn end(&self) {
        unsafe { self.context().device.end_command_buffer(self.inner) }
            .expect("Could not end command buffer");
    }

    pub fn reset(&self) {
        unsafe {
            self.context()
                .device
                .reset_command_buffer(self.inner, vk::CommandBufferResetFlags::empty())
        }
        .expect("Could not reset command buffer");
    }

    /// Submits to the context's queue. Each wait semaphore comes with the stage that waits on it.
    pub fn submit(
        &self,
        wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal: &[vk::Semaphore],
        fence: vk::Fence,
    ) {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = wait.iter().copied().unzip();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(std::slice::from_ref(&self.inner))
            .signal_semaphores(signal)
            .build();

        let context = self.context();
        unsafe {
            context
                .device
                .queue_submit(context.queue, std::slice::from_ref(&submit_info), fence)
        }
        .expect("Could not submit to queue");
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.context()
                .device
                .free_command_buffers(*self.command_pool, std::slice::from_ref(&self.inner))
        }
    }
}

pub struct Fence {
    pub inner: vk::Fence,
    context: RefCounted<Context>,
}

impl Fence {
    pub fn new(context: RefCounted<Context>, signaled: bool) -> Self {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let inner = unsafe { context.device.create_fence(&create_info, None) }
            .expect("Could not create fence");
        Self { inner, context }
    }

    pub fn wait(&self) {
        unsafe {
            self.context
                .device
                .wait_for_fences(std::slice::from_ref(&self.inner), true, u64::MAX)
        }
        .expect("Could not wait for fence");
    }

    pub fn reset(&self) {
        unsafe {
            self.context
                .device
                .reset_fences(std::slice::from_ref(&self.inner))
        }
        .expect("Could not reset fence");
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_fence(self.inner, None) };
    }
}

pub struct PipelineBarrier {
    pub memory_barriers: Vec<MemoryBarrier>,
    pub image_memory_barriers: Vec<ImageMemoryBarrier>,
}

#[derive(Clone, Copy)]
pub struct MemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

#[derive(Clone, Copy)]
pub struct ImageMemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: vk::Image,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl MemoryBarrier {
    /// Makes acceleration structure builds visible to ray tracing shaders.
    pub fn acceleration_structure_build_to_trace() -> Self {
        Self {
            src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            dst_stage_mask: vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            dst_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        }
    }
}

impl PipelineBarrier {
    pub fn execute(self, command_buffer: vk::CommandBuffer, context: &Context) {
        let memory_barriers: Vec<_> = self
            .memory_barriers
            .into_iter()
            .map(|v| {
                vk::MemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .build() // Calling build is legal here
            })
            .collect();

        let image_memory_barriers: Vec<_> = self
            .image_memory_barriers
            .into_iter()
            .map(|v| {
                vk::ImageMemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .old_layout(v.old_layout)
                    .new_layout(v.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(v.image)
                    .subresource_range(v.subresource_range)
                    .build()
            })
            .collect();

        unsafe {
            context.synchronisation2_loader.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::builder()
                    .memory_barriers(&memory_barriers)
                    .image_memory_barriers(&image_memory_barriers),
            );
        };
    }
}
