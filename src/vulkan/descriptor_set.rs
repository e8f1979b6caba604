use ash::vk;

use crate::ref_counted::RefCounted;

use super::{
    buffer::Buffer,
    context::Context,
    image_view::{ImageView, Sampler},
};

/// A descriptor set with its own pool. Bindings can be rewritten one at a time.
pub struct DescriptorSet {
    pub inner: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    context: RefCounted<Context>,
}

impl DescriptorSet {
    /// `variable_count` is the size given to the layout's variable-count binding, if it has one.
    pub fn new(
        context: RefCounted<Context>,
        set_layout: vk::DescriptorSetLayout,
        pool_sizes: &[vk::DescriptorPoolSize],
        variable_count: u32,
    ) -> Self {
        let device = &context.device;

        let pool_create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_create_info, None) }
            .expect("Could not create descriptor pool");

        let variable_counts = [variable_count];
        let mut variable_count_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder()
                .descriptor_counts(&variable_counts);

        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(std::slice::from_ref(&set_layout))
            .push_next(&mut variable_count_info);

        let inner = unsafe { device.allocate_descriptor_sets(&allocate_info) }
            .expect("Could not allocate descriptor set")[0];

        Self {
            inner,
            pool,
            context,
        }
    }

    /// Rewrites only the given bindings. Writes of empty image arrays are skipped.
    pub fn write(&self, writes: &[WriteDescriptorSet]) {
        let writes: Vec<_> = writes.iter().filter(|write| !write.is_empty()).collect();

        let mut acceleration_structure_infos: Vec<_> = writes
            .iter()
            .map(|write| match &write.info {
                DescriptorInfo::AccelerationStructure(handle) => {
                    vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                        .acceleration_structures(std::slice::from_ref(handle))
                        .build()
                }
                _ => vk::WriteDescriptorSetAccelerationStructureKHR::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(acceleration_structure_infos.iter_mut())
            .map(|(write, acceleration_structure_info)| {
                let vk_write = vk::WriteDescriptorSet::builder()
                    .dst_set(self.inner)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.info.descriptor_type());

                match &write.info {
                    DescriptorInfo::UniformBuffer(info) | DescriptorInfo::StorageBuffer(info) => {
                        vk_write.buffer_info(std::slice::from_ref(info)).build()
                    }
                    DescriptorInfo::StorageImage(info) => {
                        vk_write.image_info(std::slice::from_ref(info)).build()
                    }
                    DescriptorInfo::SampledImages(infos) => vk_write.image_info(infos).build(),
                    DescriptorInfo::AccelerationStructure(_) => {
                        let mut vk_write = vk_write.push_next(acceleration_structure_info).build();
                        vk_write.descriptor_count = 1;
                        vk_write
                    }
                }
            })
            .collect();

        log::debug!("Writing {} descriptor bindings", vk_writes.len());
        unsafe { self.context.device.update_descriptor_sets(&vk_writes, &[]) };
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // Freeing the pool frees the set
        unsafe { self.context.device.destroy_descriptor_pool(self.pool, None) };
    }
}

pub struct WriteDescriptorSet {
    pub binding: u32,
    info: DescriptorInfo,
}

enum DescriptorInfo {
    UniformBuffer(vk::DescriptorBufferInfo),
    StorageBuffer(vk::DescriptorBufferInfo),
    StorageImage(vk::DescriptorImageInfo),
    SampledImages(Vec<vk::DescriptorImageInfo>),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl DescriptorInfo {
    fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorInfo::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorInfo::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorInfo::StorageImage(_) => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorInfo::SampledImages(_) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorInfo::AccelerationStructure(_) => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

impl WriteDescriptorSet {
    pub fn uniform_buffer<T>(binding: u32, buffer: &Buffer<T>) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::UniformBuffer(buffer.descriptor_info()),
        }
    }

    pub fn storage_buffer<T>(binding: u32, buffer: &Buffer<T>) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::StorageBuffer(buffer.descriptor_info()),
        }
    }

    pub fn storage_image(binding: u32, image_view: &ImageView) -> WriteDescriptorSet {
        let info = vk::DescriptorImageInfo::builder()
            .image_view(image_view.inner)
            .image_layout(vk::ImageLayout::GENERAL)
            .build();

        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::StorageImage(info),
        }
    }

    /// Fills the start of a combined image sampler array. The images must be in
    /// SHADER_READ_ONLY_OPTIMAL.
    pub fn sampled_images<'a>(
        binding: u32,
        images: impl IntoIterator<Item = (&'a ImageView, &'a Sampler)>,
    ) -> WriteDescriptorSet {
        let infos = images
            .into_iter()
            .map(|(image_view, sampler)| {
                vk::DescriptorImageInfo::builder()
                    .sampler(sampler.inner)
                    .image_view(image_view.inner)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .build()
            })
            .collect();

        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::SampledImages(infos),
        }
    }

    pub fn acceleration_structure(
        binding: u32,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            info: DescriptorInfo::AccelerationStructure(acceleration_structure),
        }
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        self.info.descriptor_type()
    }

    fn is_empty(&self) -> bool {
        matches!(&self.info, DescriptorInfo::SampledImages(infos) if infos.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_texture_arrays_are_not_written() {
        let empty = WriteDescriptorSet::sampled_images(7, std::iter::empty());
        assert!(empty.is_empty());
        assert_eq!(
            empty.descriptor_type(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );

        let tlas = WriteDescriptorSet::acceleration_structure(
            0,
            vk::AccelerationStructureKHR::null(),
        );
        assert!(!tlas.is_empty());
        assert_eq!(
            tlas.descriptor_type(),
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
    }
}
