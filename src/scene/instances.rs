use ash::vk;
use ultraviolet::Mat4;

use crate::ref_counted::RefCounted;

use super::material::NO_TEXTURE;

/// Something placed in the scene that contributes one TLAS instance per mesh.
pub trait Placement {
    type Mesh;

    fn meshes(&self) -> &[RefCounted<Self::Mesh>];
}

pub struct FlatInstance<'a, P: Placement> {
    /// Position in the flat per-instance arrays (mesh descriptions, materials)
    pub custom_index: u32,
    pub object: &'a P,
    pub mesh: &'a P::Mesh,
}

/// The one canonical walk over the scene. Instance records, mesh descriptions and material
/// proxies are all produced from it, so `custom_index` always points at the matching entry.
pub fn flatten<P: Placement>(objects: &[P]) -> impl Iterator<Item = FlatInstance<'_, P>> {
    objects
        .iter()
        .flat_map(|object| object.meshes().iter().map(move |mesh| (object, &**mesh)))
        .enumerate()
        .map(|(index, (object, mesh))| {
            assert!(index < (1 << 24), "Custom indices only have 24 bits");
            FlatInstance {
                custom_index: index as u32,
                object,
                mesh,
            }
        })
}

pub fn instance_count<P: Placement>(objects: &[P]) -> usize {
    objects.iter().map(|object| object.meshes().len()).sum()
}

/// Vulkan wants the top three rows of the object to world matrix, row by row.
pub fn to_transform_matrix(transform: &Mat4) -> vk::TransformMatrixKHR {
    let mut matrix = [0.0; 12];
    for row in 0..3 {
        for column in 0..4 {
            matrix[row * 4 + column] = transform.cols[column][row];
        }
    }
    vk::TransformMatrixKHR { matrix }
}

pub fn instance_record(
    custom_index: u32,
    transform: &Mat4,
    blas_device_address: vk::DeviceAddress,
    mask: u8,
) -> vk::AccelerationStructureInstanceKHR {
    vk::AccelerationStructureInstanceKHR {
        transform: to_transform_matrix(transform),
        instance_custom_index_and_mask: vk::Packed24_8::new(custom_index, mask),
        // Single hit group. Culling stays off for refraction and double sided surfaces.
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: blas_device_address,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlasState {
    Empty,
    Built,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Full rebuild
    Build,
    /// Refit of the existing TLAS. Only transforms and masks may have changed.
    Update,
}

/// Decides between rebuilding and refitting the TLAS.
#[derive(Debug)]
pub struct TlasTracker {
    state: TlasState,
    built_instance_count: usize,
    topology_dirty: bool,
}

impl Default for TlasTracker {
    fn default() -> Self {
        Self {
            state: TlasState::Empty,
            built_instance_count: 0,
            topology_dirty: true,
        }
    }
}

impl TlasTracker {
    pub fn state(&self) -> TlasState {
        self.state
    }

    /// Objects were added or removed
    pub fn mark_topology_dirty(&mut self) {
        self.topology_dirty = true;
    }

    pub fn next_build_mode(&self, instance_count: usize) -> BuildMode {
        if self.state == TlasState::Empty || self.topology_dirty {
            BuildMode::Build
        } else if instance_count != self.built_instance_count {
            log::warn!(
                "Instance count changed from {} to {} without a rebuild, rebuilding the TLAS",
                self.built_instance_count,
                instance_count
            );
            BuildMode::Build
        } else {
            BuildMode::Update
        }
    }

    pub fn record(&mut self, mode: BuildMode, instance_count: usize) {
        self.state = match mode {
            BuildMode::Build => TlasState::Built,
            BuildMode::Update => TlasState::Updated,
        };
        self.built_instance_count = instance_count;
        self.topology_dirty = false;
    }
}

/// Assigns indices to textures by identity, in the order they are first seen.
pub struct TextureTable<T> {
    textures: Vec<RefCounted<T>>,
}

impl<T> Default for TextureTable<T> {
    fn default() -> Self {
        Self {
            textures: Vec::new(),
        }
    }
}

impl<T> TextureTable<T> {
    pub fn index_of(&mut self, texture: Option<&RefCounted<T>>) -> i32 {
        let Some(texture) = texture else {
            return NO_TEXTURE;
        };

        let index = match self
            .textures
            .iter()
            .position(|known| RefCounted::ptr_eq(known, texture))
        {
            Some(index) => index,
            None => {
                self.textures.push(texture.add_ref());
                self.textures.len() - 1
            }
        };
        index as i32
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn into_textures(self) -> Vec<RefCounted<T>> {
        self.textures
    }
}

#[cfg(test)]
mod tests {
    use ultraviolet::Vec3;

    use super::*;

    struct FakeObject {
        meshes: Vec<RefCounted<&'static str>>,
    }

    impl Placement for FakeObject {
        type Mesh = &'static str;

        fn meshes(&self) -> &[RefCounted<Self::Mesh>] {
            &self.meshes
        }
    }

    fn object(names: &[&'static str]) -> FakeObject {
        FakeObject {
            meshes: names.iter().map(|name| RefCounted::new(*name)).collect(),
        }
    }

    #[test]
    fn flatten_numbers_meshes_across_objects() {
        let objects = [object(&["a", "b"]), object(&[]), object(&["c"])];
        let flat: Vec<_> = flatten(&objects)
            .map(|instance| (instance.custom_index, *instance.mesh))
            .collect();
        assert_eq!(flat, vec![(0, "a"), (1, "b"), (2, "c")]);
        assert_eq!(instance_count(&objects), 3);

        let second = flatten(&objects).nth(2).unwrap();
        assert!(std::ptr::eq(second.object, &objects[2]));
    }

    #[test]
    fn transform_matrix_is_the_transposed_top_rows() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))
            * Mat4::from_nonuniform_scale(Vec3::new(4.0, 5.0, 6.0));
        let matrix = to_transform_matrix(&transform).matrix;
        assert_eq!(
            matrix,
            [
                4.0, 0.0, 0.0, 1.0, //
                0.0, 5.0, 0.0, 2.0, //
                0.0, 0.0, 6.0, 3.0,
            ]
        );
    }

    #[test]
    fn instance_record_packs_index_mask_and_flags() {
        let record = instance_record(42, &Mat4::identity(), 0xdead_b000, 0x02);
        assert_eq!(record.instance_custom_index_and_mask.low_24(), 42);
        assert_eq!(record.instance_custom_index_and_mask.high_8(), 0x02);
        assert_eq!(
            record
                .instance_shader_binding_table_record_offset_and_flags
                .low_24(),
            0
        );
        assert_eq!(
            record
                .instance_shader_binding_table_record_offset_and_flags
                .high_8() as u32,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(
            unsafe { record.acceleration_structure_reference.device_handle },
            0xdead_b000
        );
    }

    #[test]
    fn second_commit_refits() {
        let mut tracker = TlasTracker::default();
        assert_eq!(tracker.state(), TlasState::Empty);
        assert_eq!(tracker.next_build_mode(2), BuildMode::Build);
        tracker.record(BuildMode::Build, 2);
        assert_eq!(tracker.state(), TlasState::Built);

        assert_eq!(tracker.next_build_mode(2), BuildMode::Update);
        tracker.record(BuildMode::Update, 2);
        assert_eq!(tracker.state(), TlasState::Updated);
        assert_eq!(tracker.next_build_mode(2), BuildMode::Update);
    }

    #[test]
    fn new_objects_force_a_rebuild() {
        let mut tracker = TlasTracker::default();
        tracker.record(BuildMode::Build, 1);
        tracker.mark_topology_dirty();
        assert_eq!(tracker.next_build_mode(2), BuildMode::Build);
    }

    #[test]
    fn changed_instance_count_falls_back_to_a_rebuild() {
        let mut tracker = TlasTracker::default();
        tracker.record(BuildMode::Build, 3);
        assert_eq!(tracker.next_build_mode(4), BuildMode::Build);
    }

    #[test]
    fn textures_are_deduplicated_by_identity() {
        let brick = RefCounted::new("brick".to_string());
        let also_brick = RefCounted::new("brick".to_string());
        let wood = RefCounted::new("wood".to_string());

        let mut table = TextureTable::default();
        assert_eq!(table.index_of(Some(&wood)), 0);
        assert_eq!(table.index_of(None), NO_TEXTURE);
        assert_eq!(table.index_of(Some(&brick)), 1);
        assert_eq!(table.index_of(Some(&wood.add_ref())), 0);
        assert_eq!(table.index_of(Some(&also_brick)), 2);
        assert_eq!(table.index_of(Some(&brick)), 1);

        let textures = table.into_textures();
        assert_eq!(textures.len(), 3);
        assert!(RefCounted::ptr_eq(&textures[0], &wood));
        assert!(RefCounted::ptr_eq(&textures[1], &brick));
        assert!(RefCounted::ptr_eq(&textures[2], &also_brick));
    }
}
