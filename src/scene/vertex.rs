use ash::vk;

/// Vertex layout shared by the BLAS build input and the hit shader, which reads it through the
/// mesh's vertex buffer address.
#[derive(Clone, Debug, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const POSITION_FORMAT: vk::Format = vk::Format::R32G32B32_SFLOAT;

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    pub fn stride() -> vk::DeviceSize {
        std::mem::size_of::<Self>() as vk::DeviceSize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertices_are_tightly_packed() {
        assert_eq!(Vertex::stride(), 32);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);
    }
}
