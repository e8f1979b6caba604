use ash::vk;

use crate::{
    ref_counted::RefCounted,
    utility::aligned_size,
    vulkan::{buffer::Buffer, context::Context},
};

use super::shader_source::RayTracingStage;

/// Which shader groups go into which table. Indices point into the pipeline's group list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub handle_size: u32,
    /// Stride between handles inside a table
    pub aligned_handle_size: u32,
    pub raygen: Vec<usize>,
    pub miss: Vec<usize>,
    pub hit: Vec<usize>,
}

impl TableLayout {
    pub fn new(stages: &[RayTracingStage], handle_size: u32, handle_alignment: u32) -> Self {
        let groups_of = |wanted: &[RayTracingStage]| -> Vec<usize> {
            stages
                .iter()
                .enumerate()
                .filter(|(_, stage)| wanted.contains(*stage))
                .map(|(group, _)| group)
                .collect()
        };

        Self {
            handle_size,
            aligned_handle_size: aligned_size(handle_size, handle_alignment),
            raygen: groups_of(&[RayTracingStage::Generate]),
            miss: groups_of(&[RayTracingStage::Miss, RayTracingStage::ShadowMiss]),
            hit: groups_of(&[RayTracingStage::Hit]),
        }
    }

    /// Copies the handles of `groups` out of the tightly packed `handles`, one per stride.
    pub fn table_data(&self, handles: &[u8], groups: &[usize]) -> Vec<u8> {
        let handle_size = self.handle_size as usize;
        let stride = self.aligned_handle_size as usize;

        let mut data = vec![0u8; groups.len() * stride];
        for (slot, &group) in groups.iter().enumerate() {
            data[slot * stride..slot * stride + handle_size]
                .copy_from_slice(&handles[group * handle_size..(group + 1) * handle_size]);
        }
        data
    }

    pub fn region(
        &self,
        device_address: vk::DeviceAddress,
        count: usize,
    ) -> vk::StridedDeviceAddressRegionKHR {
        let stride = self.aligned_handle_size as vk::DeviceSize;
        vk::StridedDeviceAddressRegionKHR {
            device_address,
            stride,
            size: stride * count as vk::DeviceSize,
        }
    }
}

/// One small buffer per table, each exposed as a strided region for `cmd_trace_rays`.
pub struct ShaderBindingTable {
    pub raygen_region: vk::StridedDeviceAddressRegionKHR,
    pub miss_region: vk::StridedDeviceAddressRegionKHR,
    pub hit_region: vk::StridedDeviceAddressRegionKHR,
    pub callable_region: vk::StridedDeviceAddressRegionKHR,
    _raygen: Buffer<u8>,
    _miss: Buffer<u8>,
    _hit: Buffer<u8>,
}

impl ShaderBindingTable {
    pub fn new(
        context: &RefCounted<Context>,
        pipeline: vk::Pipeline,
        stages: &[RayTracingStage],
    ) -> Self {
        let properties = &context
            .context_raytracing
            .physical_device_ray_tracing_pipeline_properties_khr;
        let layout = TableLayout::new(
            stages,
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
        );

        let group_count = stages.len() as u32;
        let handles = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    (group_count * layout.handle_size) as usize,
                )
        }
        .expect("Could not get shader group handles");

        let create_table = |groups: &[usize]| -> (Buffer<u8>, vk::StridedDeviceAddressRegionKHR) {
            let data = layout.table_data(&handles, groups);
            let buffer: Buffer<u8> = Buffer::new(
                context.add_ref(),
                data.len() as vk::DeviceSize,
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            );
            buffer.copy_data(&data);
            let region = layout.region(buffer.get_device_address(), groups.len());
            (buffer, region)
        };

        let (raygen, raygen_region) = create_table(&layout.raygen);
        let (miss, miss_region) = create_table(&layout.miss);
        let (hit, hit_region) = create_table(&layout.hit);

        log::debug!(
            "Shader binding table with {} miss shaders, stride {}",
            layout.miss.len(),
            layout.aligned_handle_size
        );

        Self {
            raygen_region,
            miss_region,
            hit_region,
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
            _raygen: raygen,
            _miss: miss,
            _hit: hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STAGES: [RayTracingStage; 4] = RayTracingStage::ALL;

    #[test]
    fn stages_map_to_their_tables() {
        let layout = TableLayout::new(&ALL_STAGES, 32, 64);
        assert_eq!(layout.aligned_handle_size, 64);
        assert_eq!(layout.raygen, vec![0]);
        assert_eq!(layout.hit, vec![1]);
        assert_eq!(layout.miss, vec![2, 3]);

        let without_shadow = TableLayout::new(&ALL_STAGES[..3], 32, 32);
        assert_eq!(without_shadow.miss, vec![2]);
    }

    #[test]
    fn table_data_spaces_handles_by_the_stride() {
        let layout = TableLayout::new(&ALL_STAGES, 4, 8);
        let handles: Vec<u8> = (0..16).collect();

        let miss = layout.table_data(&handles, &layout.miss);
        assert_eq!(miss, vec![8, 9, 10, 11, 0, 0, 0, 0, 12, 13, 14, 15, 0, 0, 0, 0]);

        let hit = layout.table_data(&handles, &layout.hit);
        assert_eq!(hit, vec![4, 5, 6, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn regions_cover_every_handle() {
        let layout = TableLayout::new(&ALL_STAGES, 32, 64);
        let region = layout.region(0x1000, 2);
        assert_eq!(region.device_address, 0x1000);
        assert_eq!(region.stride, 64);
        assert_eq!(region.size, 128);
    }
}
