use std::ops::Deref;

use ash::vk;

use crate::ref_counted::RefCounted;

use super::{
    command_buffer::{CommandBuffer, Fence},
    context::Context,
};

#[derive(Clone)]
pub struct CommandPool {
    inner: RefCounted<CommandPoolImpl>,
}

impl CommandPool {
    pub fn new(context: RefCounted<Context>) -> Self {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { context.device.create_command_pool(&create_info, None) }
            .expect("Could not create command pool");

        Self {
            inner: RefCounted::new(CommandPoolImpl {
                inner: command_pool,
                context,
            }),
        }
    }

    pub fn context(&self) -> &RefCounted<Context> {
        &self.inner.context
    }

    pub fn allocate_primary(&self) -> CommandBuffer {
        CommandBuffer::new(self.clone())
    }

    /// Records a command buffer with `record`, submits it and blocks until the GPU is done.
    /// Everything `record` references only has to outlive this call.
    pub fn one_time_submit<R>(&self, record: impl FnOnce(vk::CommandBuffer) -> R) -> R {
        let command_buffer = self.allocate_primary();
        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = record(command_buffer.inner);
        command_buffer.end();

        let fence = Fence::new(self.context().add_ref(), false);
        command_buffer.submit(&[], &[], fence.inner);
        fence.wait();

        result
    }
}

struct CommandPoolImpl {
    inner: vk::CommandPool,
    context: RefCounted<Context>,
}

impl Drop for CommandPoolImpl {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_command_pool(self.inner, None) };
    }
}

impl Deref for CommandPool {
    type Target = vk::CommandPool;

    fn deref(&self) -> &Self::Target {
        &self.inner.inner
    }
}
