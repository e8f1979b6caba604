use ultraviolet::{Mat4, Vec3};

use crate::ref_counted::RefCounted;

use super::model::Model;

/// A model placed in the scene.
pub struct Object {
    pub model: RefCounted<Model>,
    position: Vec3,
    /// Euler angles in degrees
    rotation: Vec3,
    scale: Vec3,
    transform: Mat4,
}

impl Object {
    pub fn new(model: RefCounted<Model>) -> Self {
        Self {
            model,
            position: Vec3::zero(),
            rotation: Vec3::zero(),
            scale: Vec3::one(),
            transform: Mat4::identity(),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn scale_factors(&self) -> Vec3 {
        self.scale
    }

    /// Object to world
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_translation(&mut self, position: Vec3) {
        self.position = position;
        self.update_transform();
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
        self.update_transform();
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
        self.update_transform();
    }

    pub fn rotate(&mut self, delta: Vec3) {
        self.rotation += delta;
        self.update_transform();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.update_transform();
    }

    /// Adds to the current scale factors
    pub fn scale(&mut self, delta: Vec3) {
        self.scale += delta;
        self.update_transform();
    }

    // Rebuilt from the stored components every time, so nothing accumulates
    fn update_transform(&mut self) {
        self.transform = Mat4::from_translation(self.position)
            * Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians())
            * Mat4::from_nonuniform_scale(self.scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_model() -> RefCounted<Model> {
        RefCounted::new(Model::new("empty", Vec::new()))
    }

    #[test]
    fn set_translation_ignores_rotation_and_scale_history() {
        let mut object = Object::new(empty_model());
        object.rotate(Vec3::new(30.0, 45.0, 10.0));
        object.scale(Vec3::new(1.0, 0.5, 2.0));
        object.translate(Vec3::new(9.0, 9.0, 9.0));

        let position = Vec3::new(1.0, -2.0, 3.0);
        object.set_translation(position);
        let translation = object.transform().cols[3];
        assert_eq!(translation.truncated(), position);
        assert_eq!(translation.w, 1.0);

        assert_eq!(object.position(), position);
        assert_eq!(object.rotation(), Vec3::new(30.0, 45.0, 10.0));
        assert_eq!(object.scale_factors(), Vec3::new(2.0, 1.5, 3.0));
    }

    #[test]
    fn rotation_does_not_drift() {
        let mut object = Object::new(empty_model());
        for _ in 0..360 {
            object.rotate(Vec3::new(0.0, 1.0, 0.0));
        }
        object.set_rotation(Vec3::new(0.0, 90.0, 0.0));

        let mut reference = Object::new(empty_model());
        reference.set_rotation(Vec3::new(0.0, 90.0, 0.0));
        assert_eq!(object.transform(), reference.transform());
    }

    #[test]
    fn scale_is_applied_before_rotation() {
        let mut object = Object::new(empty_model());
        object.set_scale(Vec3::new(2.0, 1.0, 1.0));
        object.set_rotation(Vec3::new(0.0, 0.0, 90.0));

        let x = object.transform().transform_vec3(Vec3::unit_x());
        assert!((x - Vec3::new(0.0, 2.0, 0.0)).mag() < 1e-5, "{:?}", x);
    }
}
