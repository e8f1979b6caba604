use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use ash::{self, vk};

use crate::ref_counted::RefCounted;

use super::{context::Context, memory::allocate_memory};

pub trait IntoSlice<T> {
    fn as_sliced(&self) -> &[T];
}

impl<T> IntoSlice<T> for T {
    fn as_sliced(&self) -> &[T] {
        std::slice::from_ref(self)
    }
}

impl<T> IntoSlice<T> for [T] {
    fn as_sliced(&self) -> &[T] {
        self
    }
}

impl<T> IntoSlice<T> for Vec<T> {
    fn as_sliced(&self) -> &[T] {
        self
    }
}

pub struct UntypedBuffer {
    pub inner: vk::Buffer,
    pub usage: vk::BufferUsageFlags,
    pub memory: vk::DeviceMemory,
    pub memory_property_flags: vk::MemoryPropertyFlags,
    pub allocate_flags: vk::MemoryAllocateFlags,
    /// Size in bytes, never zero
    pub size: vk::DeviceSize,
    device_address: Option<vk::DeviceAddress>,
    mapped: AtomicBool,
    context: RefCounted<Context>,
}

impl UntypedBuffer {
    /// GPU address of the first byte. Queried once at creation, so it never changes while the
    /// buffer lives.
    pub fn get_device_address(&self) -> vk::DeviceAddress {
        self.device_address
            .expect("Buffer was not created with the device address allocate flag")
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.inner,
            offset: 0,
            range: self.size,
        }
    }
}

/// Buffers that are read through a device address need their memory allocated with the matching
/// flag.
pub fn allocate_flags_for_usage(usage: vk::BufferUsageFlags) -> vk::MemoryAllocateFlags {
    if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
        vk::MemoryAllocateFlags::DEVICE_ADDRESS
    } else {
        vk::MemoryAllocateFlags::empty()
    }
}

pub struct Buffer<T: ?Sized> {
    inner: RefCounted<UntypedBuffer>,
    _marker: PhantomData<T>,
}

impl<T> Buffer<T> {
    /// Creates the buffer, allocates and binds its memory. `size` is in bytes.
    pub fn new(
        context: RefCounted<Context>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_property_flags: vk::MemoryPropertyFlags,
    ) -> Buffer<T> {
        Self::with_allocate_flags(
            context,
            size,
            usage,
            memory_property_flags,
            allocate_flags_for_usage(usage),
        )
    }

    pub fn with_allocate_flags(
        context: RefCounted<Context>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_property_flags: vk::MemoryPropertyFlags,
        allocate_flags: vk::MemoryAllocateFlags,
    ) -> Buffer<T> {
        let device = &context.device;

        // Vulkan rejects empty buffers
        let size = size.max(1);

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer =
            unsafe { device.create_buffer(&create_info, None) }.expect("Could not create buffer");

        let buffer_memory_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = allocate_memory(
            &context,
            memory_property_flags,
            &buffer_memory_requirements,
            allocate_flags,
        );

        unsafe { device.bind_buffer_memory(buffer, memory, 0) }
            .expect("Could not bind buffer memory for buffer");

        let device_address = (allocate_flags.contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS)
            && usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS))
        .then(|| {
            let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
            unsafe {
                context
                    .buffer_device_address
                    .get_buffer_device_address(&info)
            }
        });

        let untyped = RefCounted::new(UntypedBuffer {
            inner: buffer,
            usage,
            memory,
            memory_property_flags,
            allocate_flags,
            size,
            device_address,
            mapped: AtomicBool::new(false),
            context,
        });
        Buffer {
            inner: untyped,
            _marker: PhantomData,
        }
    }
}

impl<T> Buffer<T> {
    pub fn get_vk_buffer(&self) -> vk::Buffer {
        self.inner.inner
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.inner.size
    }

    pub fn get_device_address(&self) -> vk::DeviceAddress {
        self.inner.get_device_address()
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.inner.descriptor_info()
    }

    /// Maps the whole buffer for host access until the guard is dropped. A buffer can only be
    /// mapped once at a time.
    pub fn map(&self) -> MappedBuffer<'_, T> {
        let buffer = &*self.inner;
        assert!(
            buffer
                .memory_property_flags
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            "Only host visible buffers can be mapped"
        );
        assert!(
            !buffer.mapped.swap(true, Ordering::AcqRel),
            "Buffer is already mapped"
        );

        let ptr = unsafe {
            buffer.context.device.map_memory(
                buffer.memory,
                0,
                buffer.size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .expect("Could not map memory") as *mut T;

        MappedBuffer {
            buffer,
            ptr,
            len: buffer.size as usize / std::mem::size_of::<T>().max(1),
            _marker: PhantomData,
        }
    }

    pub fn copy_data<U: IntoSlice<T> + ?Sized>(&self, data: &U) {
        let data = data.as_sliced();
        let mut mapped = self.map();
        assert!(
            data.len() <= mapped.len(),
            "Copying {} elements into a buffer that holds {}",
            data.len(),
            mapped.len()
        );

        unsafe {
            mapped
                .as_mut_ptr()
                .copy_from_nonoverlapping(data.as_ptr(), data.len())
        };
    }
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.add_ref(),
            _marker: PhantomData,
        }
    }
}

/// Host view of a mapped buffer. Unmaps on drop.
pub struct MappedBuffer<'a, T> {
    buffer: &'a UntypedBuffer,
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> Deref for MappedBuffer<'a, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<'a, T> DerefMut for MappedBuffer<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<'a, T> Drop for MappedBuffer<'a, T> {
    fn drop(&mut self) {
        unsafe { self.buffer.context.device.unmap_memory(self.buffer.memory) };
        self.buffer.mapped.store(false, Ordering::Release);
    }
}

impl Drop for UntypedBuffer {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe { device.destroy_buffer(self.inner, None) };
        unsafe { device.free_memory(self.memory, None) };
    }
}

impl<T> Deref for Buffer<T> {
    type Target = vk::Buffer;

    fn deref(&self) -> &Self::Target {
        &self.inner.inner
    }
}
