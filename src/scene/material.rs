use crevice::std430::AsStd430;
use ultraviolet::Vec3;

use crate::ref_counted::RefCounted;

use super::texture::Texture;

/// Instance mask for geometry that stops rays
pub const OPAQUE_MASK: u8 = 0x01;
/// Instance mask for dielectrics that rays pass into
pub const REFRACTIVE_MASK: u8 = 0x02;

/// Texture index meaning "no texture"
pub const NO_TEXTURE: i32 = -1;

pub struct Material {
    pub albedo: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    /// Index of refraction. Zero or negative means opaque.
    pub ior: f32,
    pub albedo_texture: Option<RefCounted<Texture>>,
    pub roughness_texture: Option<RefCounted<Texture>>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::new(0.5, 0.5, 0.5),
            roughness: 1.0,
            metallic: 0.0,
            ior: -1.0,
            albedo_texture: None,
            roughness_texture: None,
        }
    }
}

impl Material {
    pub fn is_refractive(&self) -> bool {
        self.ior > 0.0
    }

    /// Exactly one of the two masks.
    pub fn instance_mask(&self) -> u8 {
        if self.is_refractive() {
            REFRACTIVE_MASK
        } else {
            OPAQUE_MASK
        }
    }

    pub fn proxy(&self, albedo_texture_index: i32, roughness_texture_index: i32) -> MaterialProxy {
        MaterialProxy {
            albedo: self.albedo,
            roughness: self.roughness,
            metallic: self.metallic,
            ior: self.ior,
            albedo_texture_index,
            roughness_texture_index,
        }
    }
}

/// Per-instance material record read by the hit shader.
#[derive(AsStd430, Debug, Clone, Copy, PartialEq)]
pub struct MaterialProxy {
    pub albedo: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub ior: f32,
    pub albedo_texture_index: i32,
    pub roughness_texture_index: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_partition_by_index_of_refraction() {
        for ior in [-1.0, 0.0, 0.5, 1.5] {
            let material = Material {
                ior,
                ..Material::default()
            };
            let mask = material.instance_mask();
            assert!(mask == OPAQUE_MASK || mask == REFRACTIVE_MASK);
            assert_eq!(mask == REFRACTIVE_MASK, ior > 0.0);
        }
        assert_eq!(OPAQUE_MASK & REFRACTIVE_MASK, 0);
    }

    #[test]
    fn proxy_carries_the_texture_indices() {
        let proxy = Material::default().proxy(3, NO_TEXTURE);
        assert_eq!(proxy.albedo, Vec3::new(0.5, 0.5, 0.5));
        assert_eq!(proxy.ior, -1.0);
        assert_eq!(proxy.albedo_texture_index, 3);
        assert_eq!(proxy.roughness_texture_index, NO_TEXTURE);
    }
}
