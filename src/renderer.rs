pub mod shader_types;

use ash::vk;
use crevice::{std140::AsStd140, std430::AsStd430};

use crate::{
    camera::Camera,
    pipeline::{shader_source::ShaderSource, DescriptorDeclaration, RayTracingPipeline},
    ref_counted::RefCounted,
    scene::{
        light::{GpuLight, Std430GpuLight},
        material::Std430MaterialProxy,
        mesh::MeshDescription,
        texture::Texture,
        Scene,
    },
    vulkan::{
        buffer::Buffer,
        command_buffer::{CommandBuffer, Fence, PipelineBarrier},
        command_pool::CommandPool,
        context::Context,
        descriptor_set::{DescriptorSet, WriteDescriptorSet},
        image::{color_subresource_layers, layout_transition, Image},
        image_view::ImageView,
        swapchain::SwapchainContainer,
        window_settings::PresentMode,
    },
};

/// Binding indices of the renderer's descriptor set
pub mod bindings {
    pub const TLAS: u32 = 0;
    pub const STORAGE_IMAGE: u32 = 1;
    pub const CAMERA: u32 = 2;
    pub const MESH_DESCRIPTIONS: u32 = 3;
    pub const LIGHT_METADATA: u32 = 4;
    pub const LIGHTS: u32 = 5;
    pub const MATERIALS: u32 = 6;
    pub const TEXTURES: u32 = 7;
}

pub const MAX_TEXTURES: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

impl FrameState {
    pub fn next(self) -> Self {
        match self {
            FrameState::Idle => FrameState::Acquiring,
            FrameState::Acquiring => FrameState::Recording,
            FrameState::Recording => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presented,
            FrameState::Presented => FrameState::Idle,
        }
    }
}

/// In binding order
pub fn descriptor_declarations() -> Vec<DescriptorDeclaration> {
    let stages = vk::ShaderStageFlags::RAYGEN_KHR
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR
        | vk::ShaderStageFlags::MISS_KHR;
    let single = |ty| DescriptorDeclaration::single(ty, stages);

    vec![
        single(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR),
        single(vk::DescriptorType::STORAGE_IMAGE),
        single(vk::DescriptorType::UNIFORM_BUFFER),
        single(vk::DescriptorType::STORAGE_BUFFER),
        single(vk::DescriptorType::UNIFORM_BUFFER),
        single(vk::DescriptorType::STORAGE_BUFFER),
        single(vk::DescriptorType::STORAGE_BUFFER),
        DescriptorDeclaration::variable(
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stages,
            MAX_TEXTURES,
        ),
    ]
}

/// Whether two texture lists differ in length or in identity at any position
pub fn textures_changed<T>(bound: &[RefCounted<T>], current: &[RefCounted<T>]) -> bool {
    bound.len() != current.len()
        || bound
            .iter()
            .zip(current)
            .any(|(a, b)| !RefCounted::ptr_eq(a, b))
}

/// The format the ray generation shader writes to. Prefers the swapchain format so that a plain
/// copy is enough, otherwise falls back to a format that needs a blit.
pub fn pick_storage_format(
    swapchain_format: vk::Format,
    supports_storage: impl Fn(vk::Format) -> bool,
) -> Option<vk::Format> {
    [swapchain_format, vk::Format::R8G8B8A8_UNORM]
        .into_iter()
        .find(|&format| supports_storage(format))
}

fn supports_storage(context: &Context, format: vk::Format) -> bool {
    let properties = unsafe {
        context
            .instance
            .get_physical_device_format_properties(context.physical_device, format)
    };
    properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::STORAGE_IMAGE | vk::FormatFeatureFlags::TRANSFER_SRC)
}

/// Empty arrays still get a one byte buffer, since descriptors cannot point at nothing
fn storage_array_size(data_len_bytes: usize) -> vk::DeviceSize {
    (data_len_bytes as vk::DeviceSize).max(1)
}

fn needs_reallocation(current_size: vk::DeviceSize, data_len_bytes: usize) -> bool {
    current_size != storage_array_size(data_len_bytes)
}

/// Copies `data` into `buffer`, first replacing it when the byte size changed. Returns whether
/// the buffer was replaced, which means its descriptor has to be rewritten.
fn upload_storage_array<T>(
    buffer: &mut Buffer<T>,
    context: &RefCounted<Context>,
    data: &[T],
) -> bool {
    let data_len_bytes = std::mem::size_of_val(data);
    let reallocated = needs_reallocation(buffer.size(), data_len_bytes);
    if reallocated {
        *buffer = storage_buffer(context, storage_array_size(data_len_bytes));
    }
    buffer.copy_data(data);
    reallocated
}

fn storage_buffer<T>(context: &RefCounted<Context>, size: vk::DeviceSize) -> Buffer<T> {
    Buffer::new(
        context.add_ref(),
        size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

fn uniform_buffer<T: AsStd140>(context: &RefCounted<Context>) -> Buffer<T::Output> {
    Buffer::new(
        context.add_ref(),
        T::std140_size_static() as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

/// Traces the scene into a storage image and copies it to the swapchain, one frame at a time.
/// Every frame drains completely before the next one starts.
pub struct Renderer {
    state: FrameState,

    // Rust will drop these fields in the order they are declared
    descriptor_set: DescriptorSet,
    pipeline: RayTracingPipeline,

    camera_buffer: Buffer<shader_types::Std140Camera>,
    light_metadata_buffer: Buffer<shader_types::Std140LightMetadata>,
    mesh_description_buffer: Buffer<MeshDescription>,
    light_buffer: Buffer<Std430GpuLight>,
    material_buffer: Buffer<Std430MaterialProxy>,
    bound_textures: Vec<RefCounted<Texture>>,
    bound_tlas: vk::AccelerationStructureKHR,

    storage_image: ImageView,
    command_buffer: CommandBuffer,
    fence: Fence,
    swapchain: SwapchainContainer,
    context: RefCounted<Context>,
}

impl Renderer {
    pub fn new(
        command_pool: &CommandPool,
        framebuffer_size: vk::Extent2D,
        present_mode: PresentMode,
        shader_source: &dyn ShaderSource,
    ) -> Self {
        let context = command_pool.context().add_ref();

        let swapchain = SwapchainContainer::new(context.add_ref(), framebuffer_size, present_mode);

        let storage_image = {
            let swapchain_format = swapchain.surface_format.format;
            let format = pick_storage_format(swapchain_format, |format| {
                supports_storage(&context, format)
            })
            .expect("Could not find a storage image format");
            if format != swapchain_format {
                log::info!(
                    "{:?} cannot be a storage image, rendering to {:?} and blitting",
                    swapchain_format,
                    format
                );
            }

            let image = Image::new(
                context.add_ref(),
                format,
                swapchain.extent,
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
            );
            command_pool.one_time_submit(|command_buffer| {
                image.transition(
                    command_buffer,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                )
            });
            ImageView::new_color(RefCounted::new(image))
        };

        let pipeline = RayTracingPipeline::new(
            context.add_ref(),
            descriptor_declarations(),
            shader_source,
        );
        let descriptor_set = pipeline.create_descriptor_set(MAX_TEXTURES);

        let camera_buffer = uniform_buffer::<shader_types::Camera>(&context);
        let light_metadata_buffer = uniform_buffer::<shader_types::LightMetadata>(&context);
        let mesh_description_buffer = storage_buffer(&context, storage_array_size(0));
        let light_buffer = storage_buffer(&context, storage_array_size(0));
        let material_buffer = storage_buffer(&context, storage_array_size(0));

        descriptor_set.write(&[
            WriteDescriptorSet::storage_image(bindings::STORAGE_IMAGE, &storage_image),
            WriteDescriptorSet::uniform_buffer(bindings::CAMERA, &camera_buffer),
            WriteDescriptorSet::storage_buffer(
                bindings::MESH_DESCRIPTIONS,
                &mesh_description_buffer,
            ),
            WriteDescriptorSet::uniform_buffer(bindings::LIGHT_METADATA, &light_metadata_buffer),
            WriteDescriptorSet::storage_buffer(bindings::LIGHTS, &light_buffer),
            WriteDescriptorSet::storage_buffer(bindings::MATERIALS, &material_buffer),
        ]);

        Self {
            state: FrameState::Idle,
            descriptor_set,
            pipeline,
            camera_buffer,
            light_metadata_buffer,
            mesh_description_buffer,
            light_buffer,
            material_buffer,
            bound_textures: Vec::new(),
            bound_tlas: vk::AccelerationStructureKHR::null(),
            storage_image,
            command_buffer: command_pool.allocate_primary(),
            fence: Fence::new(context.add_ref(), false),
            swapchain,
            context,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    fn advance(&mut self) {
        self.state = self.state.next();
    }

    /// Renders and presents one frame. Blocks until the GPU has finished it.
    pub fn render(&mut self, scene: &mut Scene, camera: &Camera) {
        debug_assert_eq!(self.state, FrameState::Idle);
        let mut writes = self.update_buffers(scene, camera);

        self.advance();
        let image_index = self.swapchain.acquire_next_image();
        let swapchain_image = self.swapchain.images[image_index as usize];

        self.advance();
        let command_buffer = self.command_buffer.inner;
        self.command_buffer.reset();
        self.command_buffer
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        scene.update(command_buffer);
        if let Some(tlas) = scene.tlas() {
            if tlas.inner != self.bound_tlas {
                writes.push(WriteDescriptorSet::acceleration_structure(
                    bindings::TLAS,
                    tlas.inner,
                ));
                self.bound_tlas = tlas.inner;
            }
        }
        // The set is not bound yet in this command buffer, so it may still be written
        if !writes.is_empty() {
            self.descriptor_set.write(&writes);
        }

        self.pipeline.bind(command_buffer, &self.descriptor_set);
        self.pipeline.trace_rays(command_buffer, self.swapchain.extent);
        self.record_copy_to_swapchain(command_buffer, swapchain_image);
        self.command_buffer.end();

        self.advance();
        self.command_buffer.submit(
            &[(
                self.swapchain.image_available,
                vk::PipelineStageFlags::ALL_COMMANDS,
            )],
            &[self.swapchain.render_complete],
            self.fence.inner,
        );
        self.fence.wait();
        self.fence.reset();

        self.advance();
        self.swapchain.present(image_index);

        self.advance();
    }

    /// Fills the uniform and storage buffers. Returns the descriptor writes for every buffer that
    /// had to be replaced.
    fn update_buffers(&mut self, scene: &Scene, camera: &Camera) -> Vec<WriteDescriptorSet> {
        let mut writes = Vec::new();

        self.camera_buffer.copy_data(
            &shader_types::Camera {
                view_inverse: camera.view_inverse(),
                projection_inverse: camera.projection_inverse(),
            }
            .as_std140(),
        );

        let lights: Vec<_> = scene
            .light_proxies()
            .into_iter()
            .map(|proxy| GpuLight::from(proxy).as_std430())
            .collect();
        self.light_metadata_buffer.copy_data(
            &shader_types::LightMetadata {
                light_count: lights.len() as u32,
                sun_direction: scene.sun_direction(),
            }
            .as_std140(),
        );
        if upload_storage_array(&mut self.light_buffer, &self.context, &lights) {
            writes.push(WriteDescriptorSet::storage_buffer(
                bindings::LIGHTS,
                &self.light_buffer,
            ));
        }

        let mesh_descriptions = scene.mesh_descriptions();
        if upload_storage_array(
            &mut self.mesh_description_buffer,
            &self.context,
            &mesh_descriptions,
        ) {
            writes.push(WriteDescriptorSet::storage_buffer(
                bindings::MESH_DESCRIPTIONS,
                &self.mesh_description_buffer,
            ));
        }

        let (materials, mut textures) = scene.material_proxies();
        let materials: Vec<_> = materials.iter().map(AsStd430::as_std430).collect();
        if upload_storage_array(&mut self.material_buffer, &self.context, &materials) {
            writes.push(WriteDescriptorSet::storage_buffer(
                bindings::MATERIALS,
                &self.material_buffer,
            ));
        }

        if textures.len() > MAX_TEXTURES as usize {
            log::warn!(
                "Scene uses {} textures, only the first {} are bound",
                textures.len(),
                MAX_TEXTURES
            );
            textures.truncate(MAX_TEXTURES as usize);
        }
        if textures_changed(&self.bound_textures, &textures) {
            writes.push(WriteDescriptorSet::sampled_images(
                bindings::TEXTURES,
                textures
                    .iter()
                    .map(|texture| (&texture.image_view, &texture.sampler)),
            ));
            self.bound_textures = textures;
        }

        if !writes.is_empty() {
            log::debug!("Rebinding {} scene buffers", writes.len());
        }
        writes
    }

    fn record_copy_to_swapchain(
        &self,
        command_buffer: vk::CommandBuffer,
        swapchain_image: vk::Image,
    ) {
        let storage_image = self.storage_image.image.inner;

        PipelineBarrier {
            memory_barriers: vec![],
            image_memory_barriers: vec![
                layout_transition(
                    storage_image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                ),
                layout_transition(
                    swapchain_image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ),
            ],
        }
        .execute(command_buffer, &self.context);

        let extent = self.swapchain.extent;
        if self.storage_image.image.format == self.swapchain.surface_format.format {
            let region = vk::ImageCopy {
                src_subresource: color_subresource_layers(),
                src_offset: vk::Offset3D::default(),
                dst_subresource: color_subresource_layers(),
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            unsafe {
                self.context.device.cmd_copy_image(
                    command_buffer,
                    storage_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                )
            };
        } else {
            // Same size, so the blit only converts the format
            let corners = [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: extent.width as i32,
                    y: extent.height as i32,
                    z: 1,
                },
            ];
            let region = vk::ImageBlit {
                src_subresource: color_subresource_layers(),
                src_offsets: corners,
                dst_subresource: color_subresource_layers(),
                dst_offsets: corners,
            };
            unsafe {
                self.context.device.cmd_blit_image(
                    command_buffer,
                    storage_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                    vk::Filter::NEAREST,
                )
            };
        }

        PipelineBarrier {
            memory_barriers: vec![],
            image_memory_barriers: vec![
                layout_transition(
                    storage_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::GENERAL,
                ),
                layout_transition(
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                ),
            ],
        }
        .execute(command_buffer, &self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_states_cycle_back_to_idle() {
        let mut state = FrameState::Idle;
        let mut visited = vec![state];
        for _ in 0..5 {
            state = state.next();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                FrameState::Idle,
                FrameState::Acquiring,
                FrameState::Recording,
                FrameState::Submitted,
                FrameState::Presented,
                FrameState::Idle,
            ]
        );
    }

    #[test]
    fn declarations_match_the_binding_constants() {
        let declarations = descriptor_declarations();
        assert_eq!(declarations.len(), bindings::TEXTURES as usize + 1);

        let ty = |binding: u32| declarations[binding as usize].ty;
        assert_eq!(
            ty(bindings::TLAS),
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
        assert_eq!(ty(bindings::STORAGE_IMAGE), vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(ty(bindings::CAMERA), vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ty(bindings::LIGHT_METADATA), vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ty(bindings::MATERIALS), vk::DescriptorType::STORAGE_BUFFER);

        let textures = declarations[bindings::TEXTURES as usize];
        assert!(textures.variable_count);
        assert_eq!(textures.count, MAX_TEXTURES);
        assert!(declarations[..bindings::TEXTURES as usize]
            .iter()
            .all(|declaration| !declaration.variable_count));
    }

    #[test]
    fn texture_lists_compare_by_identity() {
        let wood = RefCounted::new("wood");
        let brick = RefCounted::new("brick");
        let other_wood = RefCounted::new("wood");

        let bound = vec![wood.add_ref(), brick.add_ref()];
        assert!(!textures_changed(&bound, &[wood.add_ref(), brick.add_ref()]));
        assert!(textures_changed(&bound, &[other_wood, brick.add_ref()]));
        assert!(textures_changed(&bound, &[wood.add_ref()]));
        assert!(textures_changed(&[], &[wood]));
    }

    #[test]
    fn storage_image_falls_back_when_the_swapchain_format_cannot_be_written() {
        let everything = |_: vk::Format| true;
        assert_eq!(
            pick_storage_format(vk::Format::B8G8R8A8_UNORM, everything),
            Some(vk::Format::B8G8R8A8_UNORM)
        );

        let no_srgb = |format: vk::Format| format != vk::Format::B8G8R8A8_SRGB;
        assert_eq!(
            pick_storage_format(vk::Format::B8G8R8A8_SRGB, no_srgb),
            Some(vk::Format::R8G8B8A8_UNORM)
        );

        assert_eq!(pick_storage_format(vk::Format::B8G8R8A8_SRGB, |_| false), None);
    }

    #[test]
    fn storage_arrays_are_only_reallocated_when_their_size_changes() {
        let lights = std::mem::size_of::<Std430GpuLight>();
        assert!(!needs_reallocation(2 * lights as vk::DeviceSize, 2 * lights));
        assert!(needs_reallocation(2 * lights as vk::DeviceSize, 3 * lights));
        assert!(needs_reallocation(2 * lights as vk::DeviceSize, lights));
    }

    #[test]
    fn empty_storage_arrays_keep_their_one_byte_buffer() {
        assert_eq!(storage_array_size(0), 1);
        assert!(!needs_reallocation(storage_array_size(0), 0));
        assert!(needs_reallocation(storage_array_size(0), 16));
        assert!(needs_reallocation(16, 0));
    }
}
