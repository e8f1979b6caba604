use std::{ffi::CStr, io::Cursor};

use ash::vk;

use crate::ref_counted::RefCounted;

use super::context::Context;

/// A shader module that lives as long as the pipeline creation needs it.
pub struct ShaderCreateInfo {
    context: RefCounted<Context>,
    stage: vk::ShaderStageFlags,
    shader_module: vk::ShaderModule,
}

const SHADER_ENTRY_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

impl ShaderCreateInfo {
    pub fn new(context: RefCounted<Context>, stage: vk::ShaderStageFlags, bytes: &[u8]) -> Self {
        let mut spv_file = Cursor::new(bytes);

        let shader_code =
            ash::util::read_spv(&mut spv_file).expect("Could not read shader spv file");

        let shader_module = {
            let create_info = vk::ShaderModuleCreateInfo::builder().code(&shader_code);
            unsafe { context.device.create_shader_module(&create_info, None) }
                .expect("Could not create shader module")
        };

        Self {
            context,
            stage,
            shader_module,
        }
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .module(self.shader_module)
            .name(SHADER_ENTRY_NAME)
            .stage(self.stage)
            .build()
    }
}

impl Drop for ShaderCreateInfo {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_shader_module(self.shader_module, None);
        }
    }
}
