use ash::vk;
use ray_cat::{
    error::RendererError,
    loader::triangle_model,
    ref_counted::RefCounted,
    scene::{
        instances::{BuildMode, TlasState},
        light::Light,
        material::{Material, OPAQUE_MASK, REFRACTIVE_MASK},
        mesh::Mesh,
        model::Model,
        texture::Texture,
        vertex::Vertex,
        Scene, DEFAULT_SUN_DIRECTION,
    },
    vulkan::{buffer::Buffer, command_pool::CommandPool, context::Context},
};
use ultraviolet::Vec3;

/// `None` when this machine cannot ray trace
fn headless() -> Option<CommandPool> {
    match Context::new(None) {
        Ok(context) => Some(CommandPool::new(RefCounted::new(context))),
        Err(err @ (RendererError::DriverNotFound | RendererError::NoSuitableDevice)) => {
            eprintln!("Skipping GPU test: {}", err);
            None
        }
        Err(err) => panic!("Could not create a headless context: {}", err),
    }
}

fn quad(command_pool: &CommandPool, material: Material) -> RefCounted<Mesh> {
    let normal = [0.0, 0.0, 1.0];
    let vertices = [
        Vertex::new([-1.0, -1.0, 0.0], normal, [0.0, 0.0]),
        Vertex::new([1.0, -1.0, 0.0], normal, [1.0, 0.0]),
        Vertex::new([1.0, 1.0, 0.0], normal, [1.0, 1.0]),
        Vertex::new([-1.0, 1.0, 0.0], normal, [0.0, 1.0]),
    ];
    RefCounted::new(Mesh::new(
        command_pool,
        &vertices,
        &[[0, 1, 2], [2, 3, 0]],
        RefCounted::new(material),
    ))
}

#[test]
fn triangle_scene_has_a_tlas_and_one_mesh_description() {
    let Some(command_pool) = headless() else {
        return;
    };

    let mut scene = Scene::new(command_pool.context().add_ref());
    scene.add_object(triangle_model(&command_pool));
    scene.commit(&command_pool);

    let tlas = scene.tlas().expect("Committed scene has a TLAS");
    assert_ne!(tlas.device_address, 0);
    assert_eq!(scene.tlas_state(), TlasState::Built);

    let descriptions = scene.mesh_descriptions();
    assert_eq!(descriptions.len(), 1);
    assert_ne!(descriptions[0].vertex_buffer_address, 0);
    assert_ne!(descriptions[0].index_buffer_address, 0);
}

#[test]
fn recommitting_refits_until_an_object_is_added() {
    let Some(command_pool) = headless() else {
        return;
    };

    let mut scene = Scene::new(command_pool.context().add_ref());
    let triangle = scene.add_object(triangle_model(&command_pool));
    scene.commit(&command_pool);
    assert_eq!(scene.last_build_mode(), Some(BuildMode::Build));

    scene
        .object_mut(triangle)
        .set_translation(Vec3::new(0.0, 1.0, 0.0));
    scene.commit(&command_pool);
    assert_eq!(scene.last_build_mode(), Some(BuildMode::Update));
    assert_eq!(scene.tlas_state(), TlasState::Updated);

    let model = RefCounted::new(Model::new(
        "quad",
        vec![quad(&command_pool, Material::default())],
    ));
    scene.add_object(model);
    scene.commit(&command_pool);
    assert_eq!(scene.last_build_mode(), Some(BuildMode::Build));
    assert_eq!(scene.instance_count(), 2);
    assert_eq!(scene.mesh_descriptions().len(), 2);
}

#[test]
fn device_addresses_do_not_change() {
    let Some(command_pool) = headless() else {
        return;
    };

    let buffer: Buffer<u32> = Buffer::new(
        command_pool.context().add_ref(),
        64,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    );
    let first = buffer.get_device_address();
    buffer.copy_data(&[1u32, 2, 3, 4][..]);
    assert_ne!(first, 0);
    assert_eq!(buffer.get_device_address(), first);
    assert_eq!(buffer.clone().get_device_address(), first);
}

#[test]
fn empty_meshes_still_get_a_blas() {
    let Some(command_pool) = headless() else {
        return;
    };

    let empty = RefCounted::new(Mesh::new(
        &command_pool,
        &[],
        &[],
        RefCounted::new(Material::default()),
    ));
    assert_eq!(empty.triangle_count, 0);

    let mut scene = Scene::new(command_pool.context().add_ref());
    scene.add_object(RefCounted::new(Model::new("empty", vec![empty])));
    scene.commit(&command_pool);
    assert!(scene.tlas().is_some());
}

#[test]
fn shared_textures_get_one_index_and_masks_follow_the_material() {
    let Some(command_pool) = headless() else {
        return;
    };

    let pixels = [255u8; 2 * 2 * 4];
    let texture = RefCounted::new(Texture::from_rgba8(&command_pool, 2, 2, &pixels));
    assert_eq!(texture.extent().width, 2);

    let opaque = quad(
        &command_pool,
        Material {
            albedo_texture: Some(texture.add_ref()),
            ..Material::default()
        },
    );
    let glass = quad(
        &command_pool,
        Material {
            ior: 1.5,
            albedo_texture: Some(texture.add_ref()),
            roughness_texture: Some(texture.add_ref()),
            ..Material::default()
        },
    );
    assert_eq!(opaque.material.instance_mask(), OPAQUE_MASK);
    assert_eq!(glass.material.instance_mask(), REFRACTIVE_MASK);

    let mut scene = Scene::new(command_pool.context().add_ref());
    scene.add_object(RefCounted::new(Model::new("quads", vec![opaque, glass])));
    scene.commit(&command_pool);

    let (materials, textures) = scene.material_proxies();
    assert_eq!(materials.len(), 2);
    assert_eq!(textures.len(), 1);
    assert!(RefCounted::ptr_eq(&textures[0], &texture));
    assert!(materials
        .iter()
        .all(|material| material.albedo_texture_index == 0));
    assert_eq!(materials[1].roughness_texture_index, 0);
    assert_eq!(materials[1].ior, 1.5);
}

#[test]
fn objects_and_lights_are_edited_through_their_ids() {
    let Some(command_pool) = headless() else {
        return;
    };

    let mut scene = Scene::new(command_pool.context().add_ref());
    let triangle = scene.add_object(triangle_model(&command_pool));
    scene
        .object_mut(triangle)
        .translate(Vec3::new(0.0, 2.0, 0.0));
    assert_eq!(scene.object(triangle).position(), Vec3::new(0.0, 2.0, 0.0));

    let lamp = scene.add_light(Light::point());
    let sun = scene.add_light(Light::directional());
    assert_eq!(scene.sun_direction(), DEFAULT_SUN_DIRECTION);

    let sideways = Vec3::new(1.0, 0.0, 0.0);
    if let Light::Directional { direction, .. } = scene.light_mut(sun) {
        *direction = sideways;
    }
    scene.light_mut(lamp).set_intensity(3.0);
    assert_eq!(scene.sun_direction(), sideways);
    assert_eq!(scene.light(lamp).intensity(), 3.0);
    assert_eq!(scene.light_proxies().len(), 2);
}
