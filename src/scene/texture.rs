use ash::vk;

use crate::{
    ref_counted::RefCounted,
    vulkan::{
        buffer::Buffer,
        command_pool::CommandPool,
        image::Image,
        image_view::{ImageView, Sampler},
    },
};

pub struct Texture {
    pub image_view: ImageView,
    pub sampler: Sampler,
}

impl Texture {
    /// Uploads tightly packed RGBA8 pixels. Blocks until the copy is done.
    pub fn from_rgba8(
        command_pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Self {
        assert_eq!(
            pixels.len(),
            width as usize * height as usize * 4,
            "Expected {}x{} RGBA8 pixels",
            width,
            height
        );
        let context = command_pool.context();

        let image = RefCounted::new(Image::new(
            context.add_ref(),
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent2D { width, height },
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ));

        let staging_buffer: Buffer<u8> = Buffer::new(
            context.add_ref(),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        staging_buffer.copy_data(pixels);

        command_pool.one_time_submit(|command_buffer| {
            image.transition(
                command_buffer,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            image.copy_from_buffer(command_buffer, &staging_buffer);
            image.transition(
                command_buffer,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        });

        Self {
            image_view: ImageView::new_color(image),
            sampler: Sampler::linear_repeat(context.add_ref()),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image_view.image.extent
    }
}
