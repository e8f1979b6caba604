pub mod instances;
pub mod light;
pub mod material;
pub mod mesh;
pub mod model;
pub mod object;
pub mod texture;
pub mod vertex;

use ash::vk;
use ultraviolet::Vec3;

use crate::{
    ref_counted::RefCounted,
    vulkan::{
        acceleration_structure::{aligned_scratch_address, AccelerationStructure},
        buffer::Buffer,
        command_buffer::{MemoryBarrier, PipelineBarrier},
        command_pool::CommandPool,
        context::Context,
    },
};

use self::{
    instances::{
        flatten, instance_count, instance_record, BuildMode, Placement, TextureTable, TlasState,
        TlasTracker,
    },
    light::{sun_direction, Light, LightProxy},
    material::MaterialProxy,
    mesh::{Mesh, MeshDescription},
    model::Model,
    object::Object,
    texture::Texture,
};

pub use self::light::DEFAULT_SUN_DIRECTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightId(usize);


type InstanceBuffer = Buffer<vk::AccelerationStructureInstanceKHR>;

/// Owns the placed objects, the lights and the top level acceleration structure over them.
pub struct Scene {
    objects: Vec<Object>,
    lights: Vec<Light>,
    tracker: TlasTracker,
    last_build_mode: Option<BuildMode>,
    // Rust will drop these fields in the order they are declared
    tlas: Option<AccelerationStructure>,
    instance_buffer: Option<InstanceBuffer>,
    scratch_buffer: Option<Buffer<u8>>,
    context: RefCounted<Context>,
}

impl Placement for Object {
    type Mesh = Mesh;

    fn meshes(&self) -> &[RefCounted<Mesh>] {
        &self.model.meshes
    }
}

impl Scene {
    pub fn new(context: RefCounted<Context>) -> Self {
        Self {
            objects: Vec::new(),
            lights: Vec::new(),
            tracker: TlasTracker::default(),
            last_build_mode: None,
            tlas: None,
            instance_buffer: None,
            scratch_buffer: None,
            context,
        }
    }

    /// Places a model in the scene. The next update does a full TLAS build.
    pub fn add_object(&mut self, model: RefCounted<Model>) -> ObjectId {
        self.objects.push(Object::new(model));
        self.tracker.mark_topology_dirty();
        ObjectId(self.objects.len() - 1)
    }

    pub fn add_light(&mut self, light: Light) -> LightId {
        self.lights.push(light);
        LightId(self.lights.len() - 1)
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.0]
    }

    /// Transform changes are picked up by the next update
    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.0]
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn light(&self, id: LightId) -> &Light {
        &self.lights[id.0]
    }

    pub fn light_mut(&mut self, id: LightId) -> &mut Light {
        &mut self.lights[id.0]
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn tlas(&self) -> Option<&AccelerationStructure> {
        self.tlas.as_ref()
    }

    pub fn tlas_state(&self) -> TlasState {
        self.tracker.state()
    }

    pub fn last_build_mode(&self) -> Option<BuildMode> {
        self.last_build_mode
    }

    pub fn instance_count(&self) -> usize {
        instance_count(&self.objects)
    }

    /// Records a TLAS build or refit into `command_buffer`, followed by a barrier that makes it
    /// visible to ray tracing shaders. The command buffer must finish executing before the next
    /// call, since the instance and scratch buffers are reused.
    pub fn update(&mut self, command_buffer: vk::CommandBuffer) {
        let instance_count = self.instance_count();
        let mode = self.tracker.next_build_mode(instance_count);

        let instances: Vec<_> = flatten(&self.objects)
            .map(|instance| {
                instance_record(
                    instance.custom_index,
                    &instance.object.transform(),
                    instance.mesh.blas_device_address(),
                    instance.mesh.material.instance_mask(),
                )
            })
            .collect();

        let instance_buffer =
            ensure_instance_buffer(&mut self.instance_buffer, &self.context, instance_count);
        instance_buffer.copy_data(&instances);
        let instance_buffer_address = instance_buffer.get_device_address();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instance_buffer_address,
                    })
                    .build(),
            })
            .build();

        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(
                vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
                    | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE,
            )
            .mode(match mode {
                BuildMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
                BuildMode::Update => vk::BuildAccelerationStructureModeKHR::UPDATE,
            })
            .geometries(std::slice::from_ref(&geometry))
            .build();

        let acceleration_structure_loader =
            &self.context.context_raytracing.acceleration_structure;
        let size_info = unsafe {
            acceleration_structure_loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[instance_count as u32],
            )
        };

        // A refit keeps the size, a rebuild may need a bigger TLAS
        let too_small = |tlas: &AccelerationStructure| {
            mode == BuildMode::Build && tlas.size < size_info.acceleration_structure_size
        };
        let tlas = match &mut self.tlas {
            Some(tlas) if !too_small(tlas) => tlas.inner,
            slot => {
                slot.insert(AccelerationStructure::new(
                    self.context.add_ref(),
                    vk::AccelerationStructureTypeKHR::TOP_LEVEL,
                    &size_info,
                ))
                .inner
            }
        };

        build_info.dst_acceleration_structure = tlas;
        if mode == BuildMode::Update {
            build_info.src_acceleration_structure = tlas;
        }

        let scratch_size = match mode {
            BuildMode::Build => size_info.build_scratch_size,
            BuildMode::Update => size_info.update_scratch_size,
        };
        let scratch_alignment = self
            .context
            .context_raytracing
            .physical_device_acceleration_structure_properties_khr
            .min_acceleration_structure_scratch_offset_alignment;
        let scratch_address =
            ensure_scratch_buffer(&mut self.scratch_buffer, &self.context, scratch_size)
                .get_device_address();
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: aligned_scratch_address(scratch_address, scratch_alignment),
        };

        let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count: instance_count as u32,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        };

        // BLAS builds and the previous TLAS build have to land before this one reads them
        PipelineBarrier {
            memory_barriers: vec![MemoryBarrier {
                src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
                dst_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                dst_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            }],
            image_memory_barriers: vec![],
        }
        .execute(command_buffer, &self.context);

        unsafe {
            acceleration_structure_loader.cmd_build_acceleration_structures(
                command_buffer,
                std::slice::from_ref(&build_info),
                &[std::slice::from_ref(&build_range_info)],
            )
        };

        PipelineBarrier {
            memory_barriers: vec![MemoryBarrier::acceleration_structure_build_to_trace()],
            image_memory_barriers: vec![],
        }
        .execute(command_buffer, &self.context);

        log::debug!("{:?} TLAS over {} instances", mode, instance_count);
        self.tracker.record(mode, instance_count);
        self.last_build_mode = Some(mode);
    }

    /// Runs [`Scene::update`] in its own command buffer and waits for it.
    pub fn commit(&mut self, command_pool: &CommandPool) {
        command_pool.one_time_submit(|command_buffer| self.update(command_buffer));
    }

    pub fn sun_direction(&self) -> Vec3 {
        sun_direction(&self.lights)
    }

    /// One entry per instance, indexed by custom index
    pub fn mesh_descriptions(&self) -> Vec<MeshDescription> {
        flatten(&self.objects)
            .map(|instance| instance.mesh.description())
            .collect()
    }

    pub fn light_proxies(&self) -> Vec<LightProxy> {
        self.lights.iter().map(Light::proxy).collect()
    }

    /// One material per instance, indexed by custom index, plus the textures they index into.
    /// Recomputed on every call, since any update may change which textures are referenced.
    pub fn material_proxies(&self) -> (Vec<MaterialProxy>, Vec<RefCounted<Texture>>) {
        let mut textures = TextureTable::default();
        let proxies = flatten(&self.objects)
            .map(|instance| {
                let material = &instance.mesh.material;
                let albedo_texture_index = textures.index_of(material.albedo_texture.as_ref());
                let roughness_texture_index =
                    textures.index_of(material.roughness_texture.as_ref());
                material.proxy(albedo_texture_index, roughness_texture_index)
            })
            .collect();
        (proxies, textures.into_textures())
    }
}

/// Reuses the instance buffer while it is big enough.
fn ensure_instance_buffer<'a>(
    slot: &'a mut Option<InstanceBuffer>,
    context: &RefCounted<Context>,
    instance_count: usize,
) -> &'a InstanceBuffer {
    let size = (instance_count.max(1)
        * std::mem::size_of::<vk::AccelerationStructureInstanceKHR>())
        as vk::DeviceSize;

    match slot {
        Some(buffer) if buffer.size() >= size => {}
        _ => {
            *slot = Some(Buffer::new(
                context.add_ref(),
                size,
                vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ));
        }
    }
    slot.as_ref().unwrap()
}

fn ensure_scratch_buffer<'a>(
    slot: &'a mut Option<Buffer<u8>>,
    context: &RefCounted<Context>,
    scratch_size: vk::DeviceSize,
) -> &'a Buffer<u8> {
    let alignment = context
        .context_raytracing
        .physical_device_acceleration_structure_properties_khr
        .min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize;

    match slot {
        Some(buffer) if buffer.size() >= scratch_size + alignment => {}
        _ => {
            *slot = Some(AccelerationStructure::scratch_buffer(context, scratch_size));
        }
    }
    slot.as_ref().unwrap()
}
