use crevice::std430::AsStd430;
use ultraviolet::Vec3;

/// Sun direction used when there is no directional light
pub const DEFAULT_SUN_DIRECTION: Vec3 = Vec3::new(0.0, -1.0, 0.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Directional { direction: Vec3, intensity: f32 },
    Point { position: Vec3, intensity: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LightType {
    Directional = 0,
    Point = 1,
}

/// Flat description of a light, tagged by its type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightProxy {
    pub ty: LightType,
    pub direction_or_position: Vec3,
    pub intensity: f32,
}

/// GPU layout of a [`LightProxy`]
#[derive(AsStd430, Debug, Clone, Copy)]
pub struct GpuLight {
    pub direction_or_position: Vec3,
    pub intensity: f32,
    pub ty: u32,
}

impl Light {
    /// Points straight down with no intensity
    pub fn directional() -> Self {
        Light::Directional {
            direction: Vec3::new(0.0, -1.0, 0.0),
            intensity: 0.0,
        }
    }

    pub fn point() -> Self {
        Light::Point {
            position: Vec3::zero(),
            intensity: 0.0,
        }
    }

    pub fn intensity(&self) -> f32 {
        match *self {
            Light::Directional { intensity, .. } | Light::Point { intensity, .. } => intensity,
        }
    }

    pub fn set_intensity(&mut self, value: f32) {
        match self {
            Light::Directional { intensity, .. } | Light::Point { intensity, .. } => {
                *intensity = value
            }
        }
    }

    pub fn proxy(&self) -> LightProxy {
        match *self {
            Light::Directional {
                direction,
                intensity,
            } => LightProxy {
                ty: LightType::Directional,
                direction_or_position: direction,
                intensity,
            },
            Light::Point {
                position,
                intensity,
            } => LightProxy {
                ty: LightType::Point,
                direction_or_position: position,
                intensity,
            },
        }
    }
}

/// Direction of the first directional light
pub fn sun_direction(lights: &[Light]) -> Vec3 {
    lights
        .iter()
        .find_map(|light| match light {
            Light::Directional { direction, .. } => Some(*direction),
            Light::Point { .. } => None,
        })
        .unwrap_or(DEFAULT_SUN_DIRECTION)
}

impl From<LightProxy> for GpuLight {
    fn from(proxy: LightProxy) -> Self {
        Self {
            direction_or_position: proxy.direction_or_position,
            intensity: proxy.intensity,
            ty: proxy.ty as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directional_proxy() {
        let light = Light::Directional {
            direction: Vec3::new(0.0, -1.0, 0.0),
            intensity: 0.8,
        };
        let proxy = light.proxy();
        assert_eq!(proxy.ty, LightType::Directional);
        assert_eq!(proxy.direction_or_position, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(proxy.intensity, 0.8);
    }

    #[test]
    fn point_proxy_carries_the_position() {
        let mut light = Light::point();
        if let Light::Point { position, .. } = &mut light {
            *position = Vec3::new(1.0, 2.0, 3.0);
        }
        light.set_intensity(5.0);

        let gpu = GpuLight::from(light.proxy());
        assert_eq!(gpu.ty, 1);
        assert_eq!(gpu.direction_or_position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(gpu.intensity, 5.0);
        assert_eq!(light.intensity(), 5.0);
    }

    #[test]
    fn sun_falls_back_to_straight_down() {
        assert_eq!(sun_direction(&[]), DEFAULT_SUN_DIRECTION);
        assert_eq!(sun_direction(&[Light::point()]), DEFAULT_SUN_DIRECTION);
    }

    #[test]
    fn sun_is_the_first_directional_light() {
        let first = Vec3::new(1.0, 0.0, 0.0);
        let second = Vec3::new(0.0, 0.0, 1.0);
        let lights = [
            Light::point(),
            Light::Directional {
                direction: first,
                intensity: 1.0,
            },
            Light::Directional {
                direction: second,
                intensity: 2.0,
            },
        ];
        assert_eq!(sun_direction(&lights), first);
    }

    #[test]
    fn default_directional_light_is_dark_and_points_down() {
        let light = Light::directional();
        assert_eq!(light.intensity(), 0.0);
        assert_eq!(sun_direction(&[light]), DEFAULT_SUN_DIRECTION);
    }
}
