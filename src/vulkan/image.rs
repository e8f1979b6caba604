use ash::vk;

use crate::ref_counted::RefCounted;

use super::{
    buffer::Buffer,
    command_buffer::{ImageMemoryBarrier, PipelineBarrier},
    context::Context,
    memory::allocate_memory,
};

/// A device-local 2D image with a single mip level and array layer.
pub struct Image {
    pub inner: vk::Image,
    pub memory: vk::DeviceMemory,

    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,

    context: RefCounted<Context>,
}

impl Image {
    pub fn new(
        context: RefCounted<Context>,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Image {
        let device = &context.device;

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image =
            unsafe { device.create_image(&create_info, None) }.expect("Could not create image");

        let memory_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = allocate_memory(
            &context,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &memory_requirements,
            vk::MemoryAllocateFlags::empty(),
        );

        unsafe { device.bind_image_memory(image, memory, 0) }.expect("Could not bind image memory");

        Self {
            inner: image,
            memory,
            format,
            extent,
            usage,
            context,
        }
    }

    pub fn context(&self) -> &RefCounted<Context> {
        &self.context
    }

    pub fn transition(
        &self,
        command_buffer: vk::CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        PipelineBarrier {
            memory_barriers: vec![],
            image_memory_barriers: vec![layout_transition(self.inner, old_layout, new_layout)],
        }
        .execute(command_buffer, &self.context);
    }

    /// Copies tightly packed texels into the image, which must be in TRANSFER_DST_OPTIMAL.
    pub fn copy_from_buffer<T>(&self, command_buffer: vk::CommandBuffer, buffer: &Buffer<T>) {
        let buffer_image_copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_subresource_layers(),
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
        };

        unsafe {
            self.context.device.cmd_copy_buffer_to_image(
                command_buffer,
                buffer.get_vk_buffer(),
                self.inner,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&buffer_image_copy),
            )
        };
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_image(self.inner, None) };
        unsafe { self.context.device.free_memory(self.memory, None) };
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Stages and accesses that touch an image while it sits in `layout`.
fn layout_usage(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match layout {
        // Has to overlap the acquire semaphore's wait stage
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::NONE)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    }
}

pub fn layout_transition(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> ImageMemoryBarrier {
    let (src_stage_mask, src_access_mask) = layout_usage(old_layout);
    let (dst_stage_mask, dst_access_mask) = layout_usage(new_layout);

    ImageMemoryBarrier {
        src_stage_mask,
        src_access_mask,
        dst_stage_mask,
        dst_access_mask,
        old_layout,
        new_layout,
        image,
        subresource_range: color_subresource_range(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_image_copy_waits_for_the_trace() {
        let barrier = layout_transition(
            vk::Image::null(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(
            barrier.src_stage_mask,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
        );
        assert!(barrier
            .src_access_mask
            .contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_READ);
    }

    #[test]
    fn acquired_images_have_nothing_to_flush() {
        let barrier = layout_transition(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
    }
}
