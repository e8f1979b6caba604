use ash::vk;

use crate::ref_counted::RefCounted;

use super::{buffer::Buffer, context::Context};

/// An acceleration structure together with the device-local buffer that stores it.
pub struct AccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    pub ty: vk::AccelerationStructureTypeKHR,
    /// Bytes reserved for the structure. A rebuild needing more has to create a new one.
    pub size: vk::DeviceSize,
    pub device_address: vk::DeviceAddress,
    // Rust will drop these fields in the order they are declared
    _buffer: Buffer<u8>,
    context: RefCounted<Context>,
}

impl AccelerationStructure {
    // See https://github.com/SaschaWillems/Vulkan/blob/a467d941599a2cef5bd0eff696999bca8d75ee23/base/VulkanRaytracingSample.cpp#L149
    pub fn new(
        context: RefCounted<Context>,
        ty: vk::AccelerationStructureTypeKHR,
        build_size_info: &vk::AccelerationStructureBuildSizesInfoKHR,
    ) -> Self {
        let size = build_size_info.acceleration_structure_size;
        let buffer: Buffer<u8> = Buffer::new(
            context.add_ref(),
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.get_vk_buffer())
            .size(size)
            .ty(ty);

        let inner = unsafe {
            context
                .context_raytracing
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }
        .expect("Could not create acceleration structure");

        let device_address = {
            let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                .acceleration_structure(inner);

            unsafe {
                context
                    .context_raytracing
                    .acceleration_structure
                    .get_acceleration_structure_device_address(&address_info)
            }
        };

        log::debug!("Created {:?} acceleration structure of {} bytes", ty, size);

        Self {
            inner,
            ty,
            size,
            device_address,
            _buffer: buffer,
            context,
        }
    }

    /// Builds a scratch buffer big enough for `scratch_size` bytes, aligned the way the device
    /// wants scratch addresses aligned.
    pub fn scratch_buffer(
        context: &RefCounted<Context>,
        scratch_size: vk::DeviceSize,
    ) -> Buffer<u8> {
        let alignment = context
            .context_raytracing
            .physical_device_acceleration_structure_properties_khr
            .min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize;

        Buffer::new(
            context.add_ref(),
            scratch_size + alignment,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }
}

/// Rounds a scratch buffer address up to the device's scratch alignment.
pub fn aligned_scratch_address(address: vk::DeviceAddress, alignment: u32) -> vk::DeviceAddress {
    let alignment = alignment.max(1) as vk::DeviceAddress;
    (address + alignment - 1) / alignment * alignment
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .context_raytracing
                .acceleration_structure
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}
