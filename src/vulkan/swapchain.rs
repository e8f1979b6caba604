use ash::vk;

use crate::ref_counted::RefCounted;

use super::{
    context::Context,
    window_settings::{choose_present_mode, PresentMode},
};

/// Swapchain plus the two semaphores that order acquire, render and present.
pub struct SwapchainContainer {
    pub loader: ash::extensions::khr::Swapchain,
    pub inner: vk::SwapchainKHR,

    pub images: Vec<vk::Image>,

    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,

    pub image_available: vk::Semaphore,
    pub render_complete: vk::Semaphore,

    context: RefCounted<Context>,
}

impl SwapchainContainer {
    /// Panics when the context was created without a window.
    pub fn new(
        context: RefCounted<Context>,
        framebuffer_size: vk::Extent2D,
        preferred_present_mode: PresentMode,
    ) -> Self {
        let surface = context
            .surface
            .as_ref()
            .expect("A swapchain needs a context with a surface");

        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(context.physical_device, surface.inner)
        }
        .expect("Could not get surface capabilities from physical device");

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(context.physical_device, surface.inner)
        }
        .expect("Could not get surface formats from physical device");

        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(context.physical_device, surface.inner)
        }
        .expect("Could not get present modes from physical device");

        let surface_format = choose_surface_format(&formats).expect("Could not fetch image format");
        let present_mode = choose_present_mode(preferred_present_mode, &present_modes);
        let extent = choose_extent(&capabilities, framebuffer_size);
        let num_images = image_count(&capabilities);

        let loader = ash::extensions::khr::Swapchain::new(&context.instance, &context.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.inner)
            .min_image_count(num_images)
            .image_color_space(surface_format.color_space)
            .image_format(surface_format.format)
            .image_extent(extent)
            // The ray traced image gets copied in
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1);

        let inner = unsafe { loader.create_swapchain(&create_info, None) }
            .expect("Could not create swapchain");

        let images = unsafe { loader.get_swapchain_images(inner) }
            .expect("Could not get swapchain images");

        let semaphore_create_info = vk::SemaphoreCreateInfo::default();
        let image_available =
            unsafe { context.device.create_semaphore(&semaphore_create_info, None) }
                .expect("Could not create semaphore");
        let render_complete =
            unsafe { context.device.create_semaphore(&semaphore_create_info, None) }
                .expect("Could not create semaphore");

        log::info!(
            "Created swapchain with {} images of {:?}, {:?}",
            images.len(),
            surface_format.format,
            present_mode
        );

        Self {
            loader,
            inner,
            images,
            surface_format,
            extent,
            present_mode,
            image_available,
            render_complete,
            context,
        }
    }

    /// Signals `image_available` once the returned image can be written.
    pub fn acquire_next_image(&self) -> u32 {
        let (image_index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.inner,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            )
        }
        .expect("Could not acquire next swapchain image");

        if suboptimal {
            log::warn!("Acquired a suboptimal swapchain image");
        }
        image_index
    }

    /// Presents after `render_complete` is signaled.
    pub fn present(&self, image_index: u32) {
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(std::slice::from_ref(&self.render_complete))
            .swapchains(std::slice::from_ref(&self.inner))
            .image_indices(std::slice::from_ref(&image_index));

        let suboptimal = unsafe {
            self.loader
                .queue_present(self.context.queue, &present_info)
        }
        .expect("Could not present swapchain image");

        if suboptimal {
            log::warn!("Presented to a suboptimal swapchain");
        }
    }
}

impl Drop for SwapchainContainer {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_semaphore(self.image_available, None);
            self.context
                .device
                .destroy_semaphore(self.render_complete, None);
            self.loader.destroy_swapchain(self.inner, None);
        }
    }
}

/// sRGB formats cannot be storage images, so a linear format is preferred. The ray traced image
/// shares the swapchain format to allow a plain copy.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .min_by_key(|fmt| match fmt.format {
            vk::Format::B8G8R8A8_UNORM => 1,
            vk::Format::R8G8B8A8_UNORM => 2,
            _ => 3,
        })
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: framebuffer_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, within the maximum. A maximum of zero means unbounded.
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_storage_capable_formats() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn image_count_respects_the_maximum() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(image_count(&capabilities), 3);

        capabilities.max_image_count = 2;
        assert_eq!(image_count(&capabilities), 2);
    }

    #[test]
    fn extent_follows_the_surface_when_it_is_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }
}
