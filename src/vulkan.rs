pub mod acceleration_structure;
pub mod buffer;
pub mod command_buffer;
pub mod command_pool;
pub mod context;
pub mod descriptor_set;
pub mod image;
pub mod image_view;
pub mod memory;
pub mod shader_create_info;
pub mod swapchain;
pub mod window_settings;
