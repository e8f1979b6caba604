use ash::vk;

use crate::{
    ref_counted::RefCounted,
    vulkan::{
        acceleration_structure::{aligned_scratch_address, AccelerationStructure},
        buffer::Buffer,
        command_pool::CommandPool,
    },
};

use super::{material::Material, vertex::Vertex};

/// Buffer addresses the hit shader uses to fetch a mesh's vertices and triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MeshDescription {
    pub vertex_buffer_address: vk::DeviceAddress,
    pub index_buffer_address: vk::DeviceAddress,
}

/// A triangle list with its bottom level acceleration structure. The BLAS is built once when the
/// mesh is created and never changes.
pub struct Mesh {
    pub material: RefCounted<Material>,
    pub vertex_count: u32,
    pub triangle_count: u32,
    // Rust will drop these fields in the order they are declared
    blas: AccelerationStructure,
    vertex_buffer: Buffer<Vertex>,
    index_buffer: Buffer<[u32; 3]>,
    _transform_buffer: Buffer<vk::TransformMatrixKHR>,
}

pub const IDENTITY_TRANSFORM: vk::TransformMatrixKHR = vk::TransformMatrixKHR {
    matrix: [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    ],
};

impl Mesh {
    /// Uploads the geometry and builds the BLAS, blocking until the build finished. A mesh
    /// without triangles still gets a valid, empty BLAS.
    pub fn new(
        command_pool: &CommandPool,
        vertices: &[Vertex],
        indices: &[[u32; 3]],
        material: RefCounted<Material>,
    ) -> Self {
        let context = command_pool.context();
        let vertex_count = vertices.len() as u32;
        let triangle_count = indices.len() as u32;

        let input_usage = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        let host_visible =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let vertex_buffer: Buffer<Vertex> = Buffer::new(
            context.add_ref(),
            std::mem::size_of_val(vertices) as vk::DeviceSize,
            input_usage,
            host_visible,
        );
        vertex_buffer.copy_data(vertices);

        let index_buffer: Buffer<[u32; 3]> = Buffer::new(
            context.add_ref(),
            std::mem::size_of_val(indices) as vk::DeviceSize,
            input_usage,
            host_visible,
        );
        index_buffer.copy_data(indices);

        let transform_buffer: Buffer<vk::TransformMatrixKHR> = Buffer::new(
            context.add_ref(),
            std::mem::size_of::<vk::TransformMatrixKHR>() as vk::DeviceSize,
            input_usage,
            host_visible,
        );
        transform_buffer.copy_data(&IDENTITY_TRANSFORM);

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(Vertex::POSITION_FORMAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: vertex_buffer.get_device_address(),
            })
            .vertex_stride(Vertex::stride())
            .max_vertex(vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: index_buffer.get_device_address(),
            })
            .transform_data(vk::DeviceOrHostAddressConstKHR {
                device_address: transform_buffer.get_device_address(),
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();

        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&geometry))
            .build();

        let acceleration_structure_loader = &context.context_raytracing.acceleration_structure;
        let size_info = unsafe {
            acceleration_structure_loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[triangle_count],
            )
        };

        let blas = AccelerationStructure::new(
            context.add_ref(),
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &size_info,
        );

        let scratch_buffer =
            AccelerationStructure::scratch_buffer(context, size_info.build_scratch_size);
        let scratch_alignment = context
            .context_raytracing
            .physical_device_acceleration_structure_properties_khr
            .min_acceleration_structure_scratch_offset_alignment;

        build_info.dst_acceleration_structure = blas.inner;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: aligned_scratch_address(
                scratch_buffer.get_device_address(),
                scratch_alignment,
            ),
        };

        let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count: triangle_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        };

        command_pool.one_time_submit(|command_buffer| unsafe {
            acceleration_structure_loader.cmd_build_acceleration_structures(
                command_buffer,
                std::slice::from_ref(&build_info),
                &[std::slice::from_ref(&build_range_info)],
            )
        });
        drop(scratch_buffer);

        log::debug!(
            "Built BLAS with {} triangles at {:#x}",
            triangle_count,
            blas.device_address
        );

        Self {
            material,
            vertex_count,
            triangle_count,
            blas,
            vertex_buffer,
            index_buffer,
            _transform_buffer: transform_buffer,
        }
    }

    /// Cached when the BLAS was built
    pub fn blas_device_address(&self) -> vk::DeviceAddress {
        self.blas.device_address
    }

    pub fn description(&self) -> MeshDescription {
        MeshDescription {
            vertex_buffer_address: self.vertex_buffer.get_device_address(),
            index_buffer_address: self.index_buffer.get_device_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_description_is_two_addresses() {
        assert_eq!(std::mem::size_of::<MeshDescription>(), 16);
    }

    #[test]
    fn identity_transform_is_row_major() {
        let m = IDENTITY_TRANSFORM.matrix;
        assert_eq!([m[0], m[5], m[10]], [1.0, 1.0, 1.0]);
        assert_eq!([m[3], m[7], m[11]], [0.0, 0.0, 0.0]);
    }
}
