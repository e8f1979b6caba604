pub mod camera;
pub mod config_loader;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod ref_counted;
pub mod renderer;
pub mod scene;
pub mod time;
pub mod utility;
pub mod vulkan;
pub mod window;
