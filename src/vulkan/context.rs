use std::ffi::{c_void, CStr};

use ash::{
    extensions::{
        ext::DebugUtils,
        khr::{
            AccelerationStructure, BufferDeviceAddress, DeferredHostOperations,
            RayTracingPipeline, Synchronization2,
        },
    },
    vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo},
};

use crate::{error::RendererError, window::WindowProvider};

pub struct Context {
    _entry: ash::Entry,
    pub instance: ash::Instance,

    /// Only in debug builds that have the validation layer installed
    debug_messenger: Option<DebugMessenger>,

    /// Missing when running headless
    pub surface: Option<ContextSurface>,

    pub context_raytracing: ContextRaytracing,
    pub synchronisation2_loader: Synchronization2,

    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,

    pub device: ash::Device,
    pub queue: vk::Queue,

    pub buffer_device_address: BufferDeviceAddress,
    pub device_memory_properties: vk::PhysicalDeviceMemoryProperties,
}

pub struct ContextSurface {
    pub loader: ash::extensions::khr::Surface,
    pub inner: vk::SurfaceKHR,
}

struct DebugMessenger {
    loader: DebugUtils,
    inner: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    fn new(entry: &ash::Entry, instance: &ash::Instance) -> Self {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let loader = DebugUtils::new(entry, instance);
        let inner = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .expect("Could not create debug messenger");
        Self { loader, inner }
    }

    fn destroy(&self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.inner, None) };
    }
}

/// Validation messages go through the `log` crate, so `RUST_LOG` filters them too
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };
    log::log!(
        target: "vulkan",
        debug_message_level(message_severity),
        "{:?}: {}",
        message_type,
        message
    );
    vk::FALSE
}

pub fn debug_message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

pub struct ContextRaytracing {
    pub ray_tracing_pipeline: RayTracingPipeline,
    pub physical_device_ray_tracing_pipeline_properties_khr:
        vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,

    pub acceleration_structure: AccelerationStructure,
    pub physical_device_acceleration_structure_properties_khr:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
}

impl Context {
    /// Creates instance, device and queue. Pass a window to also get a surface and swapchain
    /// support, or `None` for a headless context.
    pub fn new(window: Option<&dyn WindowProvider>) -> Result<Self, RendererError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|err| {
            log::error!("Could not load vulkan library: {}", err);
            RendererError::DriverNotFound
        })?;

        let mut instance_extensions = match window {
            Some(window) => window.required_extensions()?,
            None => Vec::new(),
        };
        let validation = cfg!(debug_assertions) && validation_available(&entry);
        if validation {
            log::info!("Enabling {:?}", VALIDATION_LAYER);
            instance_extensions.push(DebugUtils::name());
        }
        check_instance_extensions(&entry, &instance_extensions)?;

        let instance = {
            let extension_names: Vec<_> = instance_extensions
                .iter()
                .map(|name| name.as_ptr())
                .collect();
            let layer_names = if validation {
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                Vec::new()
            };

            let app_info = ApplicationInfo::builder()
                .application_name(APPLICATION_NAME)
                .api_version(vk::API_VERSION_1_3);
            let create_info = InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);
            unsafe { entry.create_instance(&create_info, None) }.map_err(|err| {
                log::error!("Could not create instance: {}", err);
                RendererError::DriverNotFound
            })?
        };

        let debug_messenger = validation.then(|| DebugMessenger::new(&entry, &instance));

        let surface = window.map(|window| {
            let inner = unsafe {
                ash_window::create_surface(
                    &entry,
                    &instance,
                    window.raw_display_handle(),
                    window.raw_window_handle(),
                    None,
                )
            }
            .expect("Could not create surface");

            let loader = ash::extensions::khr::Surface::new(&entry, &instance);

            ContextSurface { loader, inner }
        });

        let destroy_instance = |surface: Option<ContextSurface>| unsafe {
            if let Some(surface) = surface {
                surface.loader.destroy_surface(surface.inner, None);
            }
            if let Some(debug_messenger) = &debug_messenger {
                debug_messenger.destroy();
            }
            instance.destroy_instance(None);
        };

        let device_extensions = required_device_extensions(surface.is_some());

        let Some((physical_device, queue_family_index)) =
            find_physical_device(&instance, surface.as_ref(), &device_extensions)
        else {
            log::error!("None of the physical devices support ray tracing");
            destroy_instance(surface);
            return Err(RendererError::NoSuitableDevice);
        };

        let device = match create_logical_device(
            &instance,
            physical_device,
            queue_family_index,
            &device_extensions,
        ) {
            Ok(device) => device,
            Err(err) => {
                log::error!("Could not create logical device: {}", err);
                destroy_instance(surface);
                return Err(RendererError::InvalidDevice);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let synchronisation2_loader = Synchronization2::new(&instance, &device);

        let ray_tracing_pipeline = RayTracingPipeline::new(&instance, &device);
        let physical_device_ray_tracing_pipeline_properties_khr =
            unsafe { RayTracingPipeline::get_properties(&instance, physical_device) };

        let acceleration_structure = AccelerationStructure::new(&instance, &device);
        let physical_device_acceleration_structure_properties_khr =
            unsafe { AccelerationStructure::get_properties(&instance, physical_device) };

        let buffer_device_address = BufferDeviceAddress::new(&instance, &device);

        let context_raytracing = ContextRaytracing {
            ray_tracing_pipeline,
            physical_device_ray_tracing_pipeline_properties_khr,
            acceleration_structure,
            physical_device_acceleration_structure_properties_khr,
        };

        let device_memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,

            surface,

            context_raytracing,
            synchronisation2_loader,

            physical_device,
            queue_family_index,

            device,
            queue,
            buffer_device_address,
            device_memory_properties,
        })
    }

    pub fn wait_idle(&self) {
        unsafe { self.device.device_wait_idle() }.expect("Could not wait for device idle");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };

        if let Some(surface) = &self.surface {
            unsafe { surface.loader.destroy_surface(surface.inner, None) };
        }

        if let Some(debug_messenger) = &self.debug_messenger {
            debug_messenger.destroy();
        }

        unsafe { self.instance.destroy_instance(None) };
    }
}

const APPLICATION_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"ray-cat\0") };

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

fn validation_available(entry: &ash::Entry) -> bool {
    let layers = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default();
    let extensions = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default();

    let layer_names: Vec<&CStr> = layers
        .iter()
        .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
        .collect();
    let extension_names: Vec<&CStr> = extensions
        .iter()
        .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) })
        .collect();

    let available = supports_validation(&layer_names, &extension_names);
    if !available {
        log::warn!("{:?} is not installed, running without validation", VALIDATION_LAYER);
    }
    available
}

/// The layer is useless without a messenger to report through
pub fn supports_validation(layers: &[&CStr], instance_extensions: &[&CStr]) -> bool {
    layers.contains(&VALIDATION_LAYER) && instance_extensions.contains(&DebugUtils::name())
}

/// Device extensions the renderer cannot run without. The swapchain is only needed with a window.
pub fn required_device_extensions(windowed: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![
        Synchronization2::name(),
        AccelerationStructure::name(),
        RayTracingPipeline::name(),
        DeferredHostOperations::name(),
        BufferDeviceAddress::name(),
    ];
    if windowed {
        extensions.push(ash::extensions::khr::Swapchain::name());
    }
    extensions
}

fn check_instance_extensions(
    entry: &ash::Entry,
    required: &[&'static CStr],
) -> Result<(), RendererError> {
    let properties = entry
        .enumerate_instance_extension_properties(None)
        .map_err(|_| RendererError::DriverNotFound)?;
    let supported: Vec<&CStr> = properties
        .iter()
        .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
        .collect();

    match required.iter().find(|ext| !supported.contains(*ext)) {
        Some(missing) => {
            log::error!("Instance extension {:?} is not supported", missing);
            Err(RendererError::DriverNotFound)
        }
        None => Ok(()),
    }
}

/// Higher is better. Unsuitable devices are filtered out before ranking.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 0,
    }
}

fn find_physical_device(
    instance: &ash::Instance,
    surface: Option<&ContextSurface>,
    device_extensions: &[&'static CStr],
) -> Option<(vk::PhysicalDevice, u32)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .expect("Could not enumerate physical devices");

    let (physical_device, queue_family_index) = physical_devices
        .into_iter()
        .filter(|pd| {
            let properties = unsafe { instance.get_physical_device_properties(*pd) };
            properties.api_version >= vk::API_VERSION_1_3
        })
        .filter(|pd| {
            let extension_properties =
                unsafe { instance.enumerate_device_extension_properties(*pd) }
                    .expect("Could not enumerate device extension properties");
            let supported_extensions: Vec<&CStr> = extension_properties
                .iter()
                .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
                .collect();

            device_extensions
                .iter()
                .all(|ext| supported_extensions.contains(ext))
        })
        .filter(|pd| supports_ray_tracing_features(instance, *pd))
        .filter_map(|pd| {
            unsafe { instance.get_physical_device_queue_family_properties(pd) }
                .iter()
                .enumerate()
                .position(|(index, info)| {
                    let supports_graphics = info.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                    let supports_surface = surface.map_or(true, |surface| {
                        unsafe {
                            surface.loader.get_physical_device_surface_support(
                                pd,
                                index as u32,
                                surface.inner,
                            )
                        }
                        .unwrap_or(false)
                    });

                    supports_graphics && supports_surface
                })
                .map(|i| (pd, i as u32))
        })
        .max_by_key(|(pd, _)| {
            let device_type = unsafe { instance.get_physical_device_properties(*pd) }.device_type;
            device_type_score(device_type)
        })?;

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
    log::info!(
        "Using {:?} ({:?}), queue family {}",
        device_name,
        properties.device_type,
        queue_family_index
    );

    Some((physical_device, queue_family_index))
}

fn supports_ray_tracing_features(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> bool {
    let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default();
    let mut ray_tracing_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();

    {
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut vulkan12_features)
            .push_next(&mut ray_tracing_pipeline_features)
            .push_next(&mut acceleration_structure_features);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
    }

    [
        vulkan12_features.buffer_device_address,
        vulkan12_features.runtime_descriptor_array,
        vulkan12_features.descriptor_binding_variable_descriptor_count,
        vulkan12_features.descriptor_binding_partially_bound,
        vulkan12_features.shader_sampled_image_array_non_uniform_indexing,
        ray_tracing_pipeline_features.ray_tracing_pipeline,
        acceleration_structure_features.acceleration_structure,
    ]
    .into_iter()
    .all(|feature| feature == vk::TRUE)
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    device_extensions: &[&'static CStr],
) -> ash::prelude::VkResult<ash::Device> {
    let device_extensions: Vec<_> = device_extensions.iter().map(|ext| ext.as_ptr()).collect();

    let queue_priorities = [1.0];
    let queue_create_info = DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities)
        .build();

    let mut physical_device_vulkan12_features = vk::PhysicalDeviceVulkan12Features {
        buffer_device_address: vk::TRUE,
        runtime_descriptor_array: vk::TRUE,
        descriptor_binding_variable_descriptor_count: vk::TRUE,
        descriptor_binding_partially_bound: vk::TRUE,
        shader_sampled_image_array_non_uniform_indexing: vk::TRUE,
        ..vk::PhysicalDeviceVulkan12Features::default()
    };

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut enabled_ray_tracing_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR {
            ray_tracing_pipeline: vk::TRUE,
            ..vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
        };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    let create_info = DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&device_extensions)
        .push_next(&mut physical_device_vulkan12_features)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut enabled_ray_tracing_pipeline_features)
        .push_next(&mut enabled_acceleration_structure_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_gpus_outrank_integrated_ones() {
        let discrete = device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let cpu = device_type_score(vk::PhysicalDeviceType::CPU);
        assert!(discrete > integrated);
        assert!(integrated > cpu);
    }

    #[test]
    fn swapchain_is_only_required_with_a_window() {
        let swapchain = ash::extensions::khr::Swapchain::name();
        assert!(!required_device_extensions(false).contains(&swapchain));
        assert!(required_device_extensions(true).contains(&swapchain));
        assert!(required_device_extensions(false).contains(&AccelerationStructure::name()));
    }

    #[test]
    fn validation_needs_both_the_layer_and_debug_utils() {
        let surface = ash::extensions::khr::Surface::name();
        assert!(supports_validation(
            &[VALIDATION_LAYER],
            &[surface, DebugUtils::name()]
        ));
        assert!(!supports_validation(&[VALIDATION_LAYER], &[surface]));
        assert!(!supports_validation(&[], &[DebugUtils::name()]));
    }

    #[test]
    fn validation_messages_are_logged_by_severity() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(debug_message_level(Severity::ERROR), log::Level::Error);
        assert_eq!(debug_message_level(Severity::WARNING), log::Level::Warn);
        assert_eq!(debug_message_level(Severity::INFO), log::Level::Debug);
        assert_eq!(debug_message_level(Severity::VERBOSE), log::Level::Trace);
    }
}
