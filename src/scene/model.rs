use crate::ref_counted::RefCounted;

use super::mesh::Mesh;

/// Meshes loaded from one source, such as a glTF file. Placed into a scene through an `Object`.
pub struct Model {
    pub name: String,
    pub meshes: Vec<RefCounted<Mesh>>,
}

impl Model {
    pub fn new(name: impl Into<String>, meshes: Vec<RefCounted<Mesh>>) -> Self {
        Self {
            name: name.into(),
            meshes,
        }
    }
}
