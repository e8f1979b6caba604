use std::ffi::CStr;

use ash::vk;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::EventLoop,
    platform::run_return::EventLoopExtRunReturn,
    window::{Window, WindowBuilder},
};

use crate::{camera::CameraInput, error::RendererError};

/// Everything the renderer needs from a window system.
pub trait WindowProvider {
    fn framebuffer_size(&self) -> vk::Extent2D;

    /// Instance extensions needed to create a surface for this window.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>, RendererError>;

    fn raw_display_handle(&self) -> RawDisplayHandle;

    fn raw_window_handle(&self) -> RawWindowHandle;

    /// Pumps pending events. Returns false once the window should close.
    fn process_events(&mut self) -> bool;

    fn camera_input(&self) -> CameraInput;
}

pub struct WinitWindowProvider {
    window: Window,
    event_loop: EventLoop<()>,
    input: CameraInput,
}

impl WinitWindowProvider {
    pub fn new(title: &str, width: u32, height: u32) -> anyhow::Result<Self> {
        let event_loop = EventLoop::new();
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(LogicalSize { width, height })
            .build(&event_loop)?;

        Ok(Self {
            window,
            event_loop,
            input: CameraInput::default(),
        })
    }
}

impl WindowProvider for WinitWindowProvider {
    fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn required_extensions(&self) -> Result<Vec<&'static CStr>, RendererError> {
        let extensions = ash_window::enumerate_required_extensions(self.raw_display_handle())
            .map_err(|err| {
                log::error!("Could not enumerate surface extensions: {}", err);
                RendererError::DriverNotFound
            })?;

        Ok(extensions
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect())
    }

    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.window.raw_display_handle()
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        self.window.raw_window_handle()
    }

    fn process_events(&mut self) -> bool {
        let mut keep_running = true;
        let input = &mut self.input;

        self.event_loop.run_return(|event, _, control_flow| {
            control_flow.set_poll();

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => keep_running = false,
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(key),
                                state,
                                ..
                            },
                        ..
                    } => {
                        let pressed = state == ElementState::Pressed;
                        if key == VirtualKeyCode::Escape && pressed {
                            keep_running = false;
                        }
                        update_camera_input(input, key, pressed);
                    }
                    _ => {}
                },
                Event::MainEventsCleared => control_flow.set_exit(),
                _ => {}
            }
        });

        keep_running
    }

    fn camera_input(&self) -> CameraInput {
        self.input
    }
}

fn update_camera_input(input: &mut CameraInput, key: VirtualKeyCode, pressed: bool) {
    match key {
        VirtualKeyCode::W => input.forward = pressed,
        VirtualKeyCode::S => input.backward = pressed,
        VirtualKeyCode::A => input.left = pressed,
        VirtualKeyCode::D => input.right = pressed,
        VirtualKeyCode::Left => input.turn_left = pressed,
        VirtualKeyCode::Right => input.turn_right = pressed,
        VirtualKeyCode::Up => input.look_up = pressed,
        VirtualKeyCode::Down => input.look_down = pressed,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasd_and_arrows_drive_the_camera() {
        let mut input = CameraInput::default();
        update_camera_input(&mut input, VirtualKeyCode::W, true);
        update_camera_input(&mut input, VirtualKeyCode::Left, true);
        update_camera_input(&mut input, VirtualKeyCode::Q, true);
        assert!(input.forward);
        assert!(input.turn_left);
        assert!(!input.backward);

        update_camera_input(&mut input, VirtualKeyCode::W, false);
        assert!(!input.forward);
    }
}
