use ultraviolet::{projection, Mat4, Vec3, Vec4};

/// Which movement keys are held down this frame
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CameraInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub turn_left: bool,
    pub turn_right: bool,
    pub look_up: bool,
    pub look_down: bool,
}

#[derive(Debug)]
pub struct Camera {
    pub position: Vec3,
    /// Euler angles in degrees, applied x, then y, then z
    pub rotation: Vec3,
    pub settings: CameraSettings,
}

#[derive(Debug)]
pub struct CameraSettings {
    pub z_near: f32,
    pub z_far: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aspect_ratio: f32,
    pub movement_speed: f32,
    /// Degrees per second
    pub rotation_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            z_near: 0.01,
            z_far: 1000.0,
            fov: 60.0,
            aspect_ratio: 1.0,
            movement_speed: 2.0,
            rotation_speed: 100.0,
        }
    }
}

impl Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            position: Vec3::zero(),
            rotation: Vec3::zero(),
            settings,
        }
    }

    pub fn set_translation(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
    }

    pub fn rotate(&mut self, delta: Vec3) {
        self.rotation += delta;
    }

    pub fn update_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.settings.aspect_ratio = aspect_ratio;
    }

    fn orientation(&self) -> Mat4 {
        Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians())
    }

    /// Camera to world
    pub fn view_inverse(&self) -> Mat4 {
        Mat4::from_translation(self.position) * self.orientation()
    }

    /// World to camera
    pub fn view_matrix(&self) -> Mat4 {
        self.view_inverse().inversed()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        projection::rh_yup::perspective_vk(
            self.settings.fov.to_radians(),
            self.settings.aspect_ratio,
            self.settings.z_near,
            self.settings.z_far,
        )
    }

    pub fn projection_inverse(&self) -> Mat4 {
        self.projection_matrix().inversed()
    }

    /// in world-space
    pub fn forward(&self) -> Vec3 {
        (self.orientation() * Vec4::new(0.0, 0.0, -1.0, 0.0))
            .truncated()
            .normalized()
    }

    /// in world-space
    pub fn right(&self) -> Vec3 {
        (self.orientation() * Vec4::new(1.0, 0.0, 0.0, 0.0))
            .truncated()
            .normalized()
    }

    pub fn update(&mut self, delta_seconds: f32, input: CameraInput) {
        let move_delta = delta_seconds * self.settings.movement_speed;
        let forward = self.forward();
        let right = self.right();

        if input.forward {
            self.position += forward * move_delta;
        }
        if input.backward {
            self.position -= forward * move_delta;
        }
        if input.right {
            self.position += right * move_delta;
        }
        if input.left {
            self.position -= right * move_delta;
        }

        let turn_delta = delta_seconds * self.settings.rotation_speed;
        if input.turn_left {
            self.rotation.y += turn_delta;
        }
        if input.turn_right {
            self.rotation.y -= turn_delta;
        }
        if input.look_up {
            self.rotation.x += turn_delta;
        }
        if input.look_down {
            self.rotation.x -= turn_delta;
        }
    }
}
