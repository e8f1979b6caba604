use crevice::std140::AsStd140;
use ultraviolet::{Mat4, Vec3};

#[derive(AsStd140)]
pub struct Camera {
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
}

#[derive(AsStd140)]
pub struct LightMetadata {
    pub light_count: u32,
    pub sun_direction: Vec3,
}
