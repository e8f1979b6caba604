use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ultraviolet::Vec3;

use crate::vulkan::window_settings::PresentMode;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub scene_path: String,
    pub shader_directory: String,
    pub present_mode: PresentMode,
    pub window_width: u32,
    pub window_height: u32,
    pub cached: CachedData,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scene_path: "assets/scene.glb".to_string(),
            shader_directory: "shaders".to_string(),
            present_mode: PresentMode::Mailbox,
            window_width: 1280,
            window_height: 720,
            cached: CachedData::default(),
        }
    }
}

impl Config {
    pub fn from_str(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Reads the config file. A missing file is created with the defaults, an unreadable one is
    /// left alone and the defaults are used.
    pub fn load_config(&mut self) -> &mut Config {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content).unwrap_or_else(|err| {
                log::warn!("Could not parse {:?}, using defaults: {}", self.path, err);
                Config::default()
            }),
            Err(_) => {
                self.config = Some(Config::default());
                if let Err(err) = self.save_config() {
                    log::warn!("Could not write default config to {:?}: {}", self.path, err);
                }
                Config::default()
            }
        };
        self.config.insert(config)
    }

    pub fn get_or_load_config(&mut self) -> &mut Config {
        if self.config.is_none() {
            self.load_config();
        }
        self.config.get_or_insert_with(Config::default)
    }

    pub fn save_config(&self) -> anyhow::Result<()> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config)?;
            std::fs::write(&self.path, content)?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CachedData {
    pub camera: Option<CameraPosition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CameraPosition {
    pub position: Vec3,
    /// Euler angles in degrees
    pub rotation: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut loader = ConfigFileLoader::new(&path);
        let config = loader.load_config();
        assert_eq!(config.shader_directory, "shaders");
        assert_eq!(config.present_mode, PresentMode::Mailbox);
        assert!(path.exists());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "scene_path": "cornell.glb", "present_mode": "Fifo" }"#)
            .unwrap();

        let mut loader = ConfigFileLoader::new(&path);
        let config = loader.get_or_load_config();
        assert_eq!(config.scene_path, "cornell.glb");
        assert_eq!(config.present_mode, PresentMode::Fifo);
        assert_eq!(config.window_width, 1280);
        assert!(config.cached.camera.is_none());
    }

    #[test]
    fn broken_file_falls_back_to_defaults_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut loader = ConfigFileLoader::new(&path);
        assert_eq!(loader.load_config().scene_path, "assets/scene.glb");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn saved_camera_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut loader = ConfigFileLoader::new(&path);
        let camera = CameraPosition {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, 90.0, 0.0),
        };
        loader.load_config().cached.camera = Some(camera);
        loader.save_config().unwrap();

        let mut reloaded = ConfigFileLoader::new(&path);
        assert_eq!(reloaded.load_config().cached.camera, Some(camera));
    }
}
