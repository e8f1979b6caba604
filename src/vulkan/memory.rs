use ash::vk;

use super::context::Context;

/// First memory type allowed by `memory_req` whose properties include all of `flags`.
///
/// This is a plain linear scan, the first match wins even if a later type fits better.
pub fn find_memorytype_index(
    memory_req: &vk::MemoryRequirements,
    memory_prop: &vk::PhysicalDeviceMemoryProperties,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_prop.memory_types[..memory_prop.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            (memory_req.memory_type_bits & (1 << index)) != 0
                && memory_type.property_flags & flags == flags
        })
        .map(|(index, _memory_type)| index as u32)
}

/// Allocates device memory for `requirements`. Panics when no memory type matches.
pub fn allocate_memory(
    context: &Context,
    property_flags: vk::MemoryPropertyFlags,
    requirements: &vk::MemoryRequirements,
    allocate_flags: vk::MemoryAllocateFlags,
) -> vk::DeviceMemory {
    let memorytype_index = find_memorytype_index(
        requirements,
        &context.device_memory_properties,
        property_flags,
    )
    .unwrap_or_else(|| {
        panic!(
            "Could not find memorytype with {:?} for type bits {:#b}",
            property_flags, requirements.memory_type_bits
        )
    });

    let mut allocate_flags_info = vk::MemoryAllocateFlagsInfo::builder().flags(allocate_flags);

    let mut allocate_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memorytype_index);
    if !allocate_flags.is_empty() {
        allocate_info = allocate_info.push_next(&mut allocate_flags_info);
    }

    unsafe { context.device.allocate_memory(&allocate_info, None) }
        .expect("Could not allocate memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(
        types: &[vk::MemoryPropertyFlags],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (memory_type, &flags) in properties.memory_types.iter_mut().zip(types) {
            memory_type.property_flags = flags;
        }
        properties
    }

    fn requirements(memory_type_bits: u32) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits,
        }
    }

    #[test]
    fn picks_the_first_matching_type_not_the_tightest() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memorytype_index(
            &requirements(0b111),
            &properties,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn respects_the_allowed_type_bits() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        let index = find_memorytype_index(
            &requirements(0b10),
            &properties,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn requires_all_property_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        let index = find_memorytype_index(
            &requirements(0b11),
            &properties,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, None);
    }

    #[test]
    fn ignores_types_past_the_reported_count() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let index = find_memorytype_index(
            &requirements(0b11),
            &properties,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        );
        assert_eq!(index, None);
    }
}
