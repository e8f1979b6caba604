use std::{collections::HashMap, path::Path};

use anyhow::Context as _;
use gltf::{image::Format, Semantic};
use ultraviolet::{Mat4, Vec3};

use crate::{
    ref_counted::RefCounted,
    scene::{material::Material, mesh::Mesh, model::Model, texture::Texture, vertex::Vertex},
    vulkan::command_pool::CommandPool,
};

struct LoadingData<'a> {
    command_pool: &'a CommandPool,
    buffers: Vec<gltf::buffer::Data>,
    images: Vec<gltf::image::Data>,
    /// Keyed by glTF material index, `None` is the default material
    materials: HashMap<Option<usize>, RefCounted<Material>>,
    /// Keyed by glTF image index
    textures: HashMap<usize, Option<RefCounted<Texture>>>,
    meshes: Vec<RefCounted<Mesh>>,
}

/// Loads every triangle primitive of a glTF file into one model, with node transforms baked in.
/// Blocks until all textures are uploaded and all BLASes are built.
pub fn load_model(
    command_pool: &CommandPool,
    path: impl AsRef<Path>,
) -> anyhow::Result<RefCounted<Model>> {
    let path = path.as_ref();
    let (document, buffers, images) =
        gltf::import(path).with_context(|| format!("Could not import {:?}", path))?;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .with_context(|| format!("{:?} contains no scene", path))?;

    let mut loading_data = LoadingData {
        command_pool,
        buffers,
        images,
        materials: HashMap::new(),
        textures: HashMap::new(),
        meshes: Vec::new(),
    };
    for node in scene.nodes() {
        load_node(&mut loading_data, &node, Mat4::identity());
    }

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    log::info!(
        "Loaded {:?} with {} meshes, {} materials and {} textures",
        path,
        loading_data.meshes.len(),
        loading_data.materials.len(),
        loading_data.textures.values().flatten().count()
    );

    Ok(RefCounted::new(Model::new(name, loading_data.meshes)))
}

fn load_node(loading_data: &mut LoadingData, node: &gltf::Node<'_>, parent_transform: Mat4) {
    let global_transform = parent_transform * Mat4::from(node.transform().matrix());

    for child in node.children() {
        load_node(loading_data, &child, global_transform);
    }

    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!(
                    "Skipping {:?} primitive of mesh {:?}",
                    primitive.mode(),
                    mesh.name()
                );
                continue;
            }
            let material = load_material(loading_data, &primitive.material());
            if let Some(mesh) = load_mesh(loading_data, &primitive, &global_transform, material) {
                loading_data.meshes.push(RefCounted::new(mesh));
            }
        }
    }
}

fn load_mesh(
    loading_data: &LoadingData,
    primitive: &gltf::Primitive<'_>,
    transform: &Mat4,
    material: RefCounted<Material>,
) -> Option<Mesh> {
    if primitive.get(&Semantic::Positions).is_none() {
        log::warn!("Skipping primitive without positions");
        return None;
    }

    let reader =
        primitive.reader(|buffer| loading_data.buffers.get(buffer.index()).map(|v| &v.0[..]));

    let positions: Vec<[f32; 3]> = reader.read_positions()?.collect();
    let normals: Box<dyn Iterator<Item = [f32; 3]>> = match reader.read_normals() {
        Some(normals) => Box::new(normals),
        None => Box::new(std::iter::repeat([0.0, 1.0, 0.0])),
    };
    let tex_coords: Box<dyn Iterator<Item = [f32; 2]>> = match reader.read_tex_coords(0) {
        Some(tex_coords) => Box::new(tex_coords.into_f32()),
        None => Box::new(std::iter::repeat([0.0, 0.0])),
    };

    let normal_matrix = transform.inversed().transposed();
    let vertices: Vec<Vertex> = positions
        .iter()
        .zip(normals.zip(tex_coords))
        .map(|(&position, (normal, uv))| {
            let position = transform.transform_point3(Vec3::from(position));
            let normal = normal_matrix
                .transform_vec3(Vec3::from(normal))
                .normalized();
            Vertex::new(position.into(), normal.into(), uv)
        })
        .collect();

    let indices: Vec<u32> = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..vertices.len() as u32).collect());

    Some(Mesh::new(
        loading_data.command_pool,
        &vertices,
        &triangles(&indices),
        material,
    ))
}

/// Groups a flat index list into triangles. A trailing partial triangle is dropped.
pub fn triangles(indices: &[u32]) -> Vec<[u32; 3]> {
    let chunks = indices.chunks_exact(3);
    if !chunks.remainder().is_empty() {
        log::warn!(
            "Index count {} is not a multiple of three, dropping the rest",
            indices.len()
        );
    }
    chunks.map(|chunk| [chunk[0], chunk[1], chunk[2]]).collect()
}

fn load_material(
    loading_data: &mut LoadingData,
    material: &gltf::Material<'_>,
) -> RefCounted<Material> {
    if let Some(loaded) = loading_data.materials.get(&material.index()) {
        return loaded.add_ref();
    }

    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, _] = pbr.base_color_factor();

    // Only transmissive materials refract
    let ior = if material.transmission().is_some() {
        material.ior().unwrap_or(1.5)
    } else {
        -1.0
    };

    let albedo_texture = pbr
        .base_color_texture()
        .and_then(|info| load_texture(loading_data, info.texture().source().index()));
    let roughness_texture = pbr
        .metallic_roughness_texture()
        .and_then(|info| load_texture(loading_data, info.texture().source().index()));

    let loaded = RefCounted::new(Material {
        albedo: Vec3::new(r, g, b),
        roughness: pbr.roughness_factor(),
        metallic: pbr.metallic_factor(),
        ior,
        albedo_texture,
        roughness_texture,
    });
    loading_data
        .materials
        .insert(material.index(), loaded.add_ref());
    loaded
}

fn load_texture(loading_data: &mut LoadingData, image_index: usize) -> Option<RefCounted<Texture>> {
    if let Some(texture) = loading_data.textures.get(&image_index) {
        return texture.as_ref().map(RefCounted::add_ref);
    }

    let image = &loading_data.images[image_index];
    let texture = match to_rgba8(image.format, &image.pixels) {
        Some(pixels) => Some(RefCounted::new(Texture::from_rgba8(
            loading_data.command_pool,
            image.width,
            image.height,
            &pixels,
        ))),
        None => {
            log::warn!(
                "Unsupported image format {:?} for image {}",
                image.format,
                image_index
            );
            None
        }
    };

    loading_data
        .textures
        .insert(image_index, texture.as_ref().map(RefCounted::add_ref));
    texture
}

/// Expands 8 and 16 bit images to RGBA8. Float images are not supported.
pub fn to_rgba8(format: Format, pixels: &[u8]) -> Option<Vec<u8>> {
    let (channels, bytes_per_channel) = match format {
        Format::R8 => (1, 1),
        Format::R8G8 => (2, 1),
        Format::R8G8B8 => (3, 1),
        Format::R8G8B8A8 => (4, 1),
        Format::R16 => (1, 2),
        Format::R16G16 => (2, 2),
        Format::R16G16B16 => (3, 2),
        Format::R16G16B16A16 => (4, 2),
        _ => return None,
    };

    let pixel_size = channels * bytes_per_channel;
    let mut rgba = Vec::with_capacity(pixels.len() / pixel_size * 4);
    for pixel in pixels.chunks_exact(pixel_size) {
        // Little endian, so the high byte of a 16 bit channel comes second
        let channel = |index: usize| pixel[index * bytes_per_channel + bytes_per_channel - 1];
        let texel = match channels {
            1 => [channel(0), channel(0), channel(0), 255],
            2 => [channel(0), channel(1), 0, 255],
            3 => [channel(0), channel(1), channel(2), 255],
            _ => [channel(0), channel(1), channel(2), channel(3)],
        };
        rgba.extend_from_slice(&texel);
    }
    Some(rgba)
}

/// A single grey triangle facing the camera, for when there is no model to load.
pub fn triangle_model(command_pool: &CommandPool) -> RefCounted<Model> {
    let normal = [0.0, 0.0, 1.0];
    let vertices = [
        Vertex::new([1.0, 1.0, 0.0], normal, [1.0, 0.0]),
        Vertex::new([-1.0, 1.0, 0.0], normal, [0.0, 0.0]),
        Vertex::new([0.0, -1.0, 0.0], normal, [0.5, 1.0]),
    ];
    let mesh = Mesh::new(
        command_pool,
        &vertices,
        &[[0, 1, 2]],
        RefCounted::new(Material::default()),
    );
    RefCounted::new(Model::new("triangle", vec![RefCounted::new(mesh)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_grouped_into_triangles() {
        assert_eq!(triangles(&[0, 1, 2, 2, 1, 3]), vec![[0, 1, 2], [2, 1, 3]]);
        assert_eq!(triangles(&[0, 1, 2, 3]), vec![[0, 1, 2]]);
        assert!(triangles(&[]).is_empty());
    }

    #[test]
    fn rgb_gets_an_opaque_alpha() {
        let rgba = to_rgba8(Format::R8G8B8, &[10, 20, 30, 40, 50, 60]).unwrap();
        assert_eq!(rgba, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn grey_and_sixteen_bit_images_are_expanded() {
        assert_eq!(to_rgba8(Format::R8, &[7]).unwrap(), vec![7, 7, 7, 255]);

        let sixteen_bit = [0x34, 0x12, 0xff, 0xab, 0x00, 0x80, 0x01, 0xff];
        assert_eq!(
            to_rgba8(Format::R16G16B16A16, &sixteen_bit).unwrap(),
            vec![0x12, 0xab, 0x80, 0xff]
        );

        assert!(to_rgba8(Format::R32G32B32FLOAT, &[0; 12]).is_none());
    }
}
