use ash::vk;

use crate::ref_counted::RefCounted;

use super::{
    context::Context,
    image::{color_subresource_range, Image},
};

pub struct ImageView {
    pub inner: vk::ImageView,

    pub image: RefCounted<Image>,
    context: RefCounted<Context>,
}

impl ImageView {
    pub fn new_color(image: RefCounted<Image>) -> Self {
        let context = image.context().add_ref();
        let create_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(color_subresource_range())
            .image(image.inner);

        let inner = unsafe { context.device.create_image_view(&create_info, None) }
            .expect("Could not create image view");

        Self {
            inner,
            image,
            context,
        }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_image_view(self.inner, None) };
    }
}

pub struct Sampler {
    pub inner: vk::Sampler,
    context: RefCounted<Context>,
}

impl Sampler {
    /// Linear filtering, repeating in both directions.
    pub fn linear_repeat(context: RefCounted<Context>) -> Self {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);

        let inner = unsafe { context.device.create_sampler(&create_info, None) }
            .expect("Could not create sampler");

        Self { inner, context }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_sampler(self.inner, None) };
    }
}
