use thiserror::Error;

/// Startup failures a caller can react to. Everything past context creation is fatal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererError {
    #[error("Vulkan driver not found or required instance extensions are unsupported")]
    DriverNotFound,
    #[error("No physical device supports hardware ray tracing")]
    NoSuitableDevice,
    #[error("Could not create the logical device")]
    InvalidDevice,
}
