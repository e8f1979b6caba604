pub mod shader_binding_table;
pub mod shader_source;

use ash::vk;

use crate::{
    ref_counted::RefCounted,
    vulkan::{
        context::Context, descriptor_set::DescriptorSet, shader_create_info::ShaderCreateInfo,
    },
};

use self::{
    shader_binding_table::ShaderBindingTable,
    shader_source::{load_stages, RayTracingStage, ShaderSource},
};

/// One binding of the pipeline's only descriptor set. The binding index is the position in the
/// declaration list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorDeclaration {
    pub ty: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
    /// Array size, or the capacity of a variable-count array
    pub count: u32,
    pub variable_count: bool,
}

impl DescriptorDeclaration {
    pub fn single(ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            ty,
            stage_flags,
            count: 1,
            variable_count: false,
        }
    }

    /// An unbounded array. Only the last declaration may be variable.
    pub fn variable(
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        capacity: u32,
    ) -> Self {
        Self {
            ty,
            stage_flags,
            count: capacity,
            variable_count: true,
        }
    }
}

pub fn layout_bindings(
    declarations: &[DescriptorDeclaration],
) -> (Vec<vk::DescriptorSetLayoutBinding>, Vec<vk::DescriptorBindingFlags>) {
    declarations
        .iter()
        .enumerate()
        .map(|(binding, declaration)| {
            let layout_binding = vk::DescriptorSetLayoutBinding::builder()
                .binding(binding as u32)
                .descriptor_type(declaration.ty)
                .descriptor_count(declaration.count)
                .stage_flags(declaration.stage_flags)
                .build();
            let flags = if declaration.variable_count {
                vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                    | vk::DescriptorBindingFlags::PARTIALLY_BOUND
            } else {
                vk::DescriptorBindingFlags::empty()
            };
            (layout_binding, flags)
        })
        .unzip()
}

/// Descriptor counts summed per type, in order of first appearance
pub fn pool_sizes(declarations: &[DescriptorDeclaration]) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for declaration in declarations {
        match sizes.iter_mut().find(|size| size.ty == declaration.ty) {
            Some(size) => size.descriptor_count += declaration.count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty: declaration.ty,
                descriptor_count: declaration.count,
            }),
        }
    }
    sizes
}

/// One group per loaded stage, at the stage's position. Hit stages become triangle hit groups.
pub fn shader_groups(stages: &[RayTracingStage]) -> Vec<vk::RayTracingShaderGroupCreateInfoKHR> {
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let index = index as u32;
            let group = vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR);
            match stage {
                RayTracingStage::Hit => group
                    .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                    .closest_hit_shader(index),
                _ => group
                    .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                    .general_shader(index),
            }
            .build()
        })
        .collect()
}

pub struct RayTracingPipeline {
    pub inner: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub declarations: Vec<DescriptorDeclaration>,
    pub stages: Vec<RayTracingStage>,
    pub shader_binding_table: ShaderBindingTable,
    context: RefCounted<Context>,
}

impl RayTracingPipeline {
    /// Panics when a required shader is missing or does not compile into a pipeline.
    pub fn new(
        context: RefCounted<Context>,
        declarations: Vec<DescriptorDeclaration>,
        shader_source: &dyn ShaderSource,
    ) -> Self {
        let device = &context.device;

        let descriptor_set_layout = {
            let (bindings, binding_flags) = layout_bindings(&declarations);
            let mut binding_flags_info =
                vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
                    .binding_flags(&binding_flags);
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
                .bindings(&bindings)
                .push_next(&mut binding_flags_info);

            unsafe { device.create_descriptor_set_layout(&create_info, None) }
                .expect("Could not create ray tracing descriptor set layout")
        };

        let loaded = load_stages(shader_source)
            .unwrap_or_else(|err| panic!("Could not load ray tracing shaders: {:#}", err));
        let stages: Vec<_> = loaded.iter().map(|(stage, _)| *stage).collect();

        // The modules only have to live until the pipeline exists
        let shaders: Vec<_> = loaded
            .iter()
            .map(|(stage, bytes)| {
                ShaderCreateInfo::new(context.add_ref(), stage.shader_stage_flags(), bytes)
            })
            .collect();
        let stage_create_infos: Vec<_> = shaders
            .iter()
            .map(ShaderCreateInfo::stage_create_info)
            .collect();
        let groups = shader_groups(&stages);

        let layout = {
            let create_info = vk::PipelineLayoutCreateInfo::builder()
                .set_layouts(std::slice::from_ref(&descriptor_set_layout));
            unsafe { device.create_pipeline_layout(&create_info, None) }
                .expect("Could not create ray tracing pipeline layout")
        };

        let max_recursion_depth = context
            .context_raytracing
            .physical_device_ray_tracing_pipeline_properties_khr
            .max_ray_recursion_depth;

        let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stage_create_infos)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(layout)
            .build();

        let inner = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
        }
        .expect("Could not create ray tracing pipeline")[0];
        drop(shaders);

        log::info!(
            "Created ray tracing pipeline with stages {:?}, recursion depth {}",
            stages,
            max_recursion_depth
        );

        let shader_binding_table = ShaderBindingTable::new(&context, inner, &stages);

        Self {
            inner,
            layout,
            descriptor_set_layout,
            declarations,
            stages,
            shader_binding_table,
            context,
        }
    }

    /// `variable_count` sizes the variable-count binding, if the layout has one.
    pub fn create_descriptor_set(&self, variable_count: u32) -> DescriptorSet {
        DescriptorSet::new(
            self.context.add_ref(),
            self.descriptor_set_layout,
            &pool_sizes(&self.declarations),
            variable_count,
        )
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer, descriptor_set: &DescriptorSet) {
        let device = &self.context.device;
        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.inner,
            );
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.layout,
                0,
                std::slice::from_ref(&descriptor_set.inner),
                &[],
            );
        }
    }

    pub fn trace_rays(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let table = &self.shader_binding_table;
        unsafe {
            self.context
                .context_raytracing
                .ray_tracing_pipeline
                .cmd_trace_rays(
                    command_buffer,
                    &table.raygen_region,
                    &table.miss_region,
                    &table.hit_region,
                    &table.callable_region,
                    extent.width,
                    extent.height,
                    1,
                )
        };
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_pipeline(self.inner, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declarations() -> Vec<DescriptorDeclaration> {
        let stages = vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR;
        vec![
            DescriptorDeclaration::single(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, stages),
            DescriptorDeclaration::single(vk::DescriptorType::STORAGE_IMAGE, stages),
            DescriptorDeclaration::single(vk::DescriptorType::UNIFORM_BUFFER, stages),
            DescriptorDeclaration::single(vk::DescriptorType::STORAGE_BUFFER, stages),
            DescriptorDeclaration::single(vk::DescriptorType::UNIFORM_BUFFER, stages),
            DescriptorDeclaration::variable(
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                stages,
                1024,
            ),
        ]
    }

    #[test]
    fn bindings_follow_declaration_order() {
        let (bindings, flags) = layout_bindings(&declarations());
        let numbers: Vec<_> = bindings.iter().map(|binding| binding.binding).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[5].descriptor_count, 1024);

        assert!(flags[..5].iter().all(|flags| flags.is_empty()));
        assert!(flags[5].contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT));
        assert!(flags[5].contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
    }

    #[test]
    fn pool_sizes_are_summed_per_type() {
        let sizes: Vec<_> = pool_sizes(&declarations())
            .into_iter()
            .map(|size| (size.ty, size.descriptor_count))
            .collect();
        assert_eq!(
            sizes,
            vec![
                (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, 1),
                (vk::DescriptorType::STORAGE_IMAGE, 1),
                (vk::DescriptorType::UNIFORM_BUFFER, 2),
                (vk::DescriptorType::STORAGE_BUFFER, 1),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1024),
            ]
        );
    }

    #[test]
    fn groups_are_positional() {
        let groups = shader_groups(&[
            RayTracingStage::Generate,
            RayTracingStage::Hit,
            RayTracingStage::Miss,
            RayTracingStage::ShadowMiss,
        ]);
        assert_eq!(groups.len(), 4);

        assert_eq!(groups[0].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[0].general_shader, 0);

        assert_eq!(
            groups[1].ty,
            vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
        );
        assert_eq!(groups[1].closest_hit_shader, 1);
        assert_eq!(groups[1].general_shader, vk::SHADER_UNUSED_KHR);

        assert_eq!(groups[3].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[3].general_shader, 3);
        assert_eq!(groups[3].any_hit_shader, vk::SHADER_UNUSED_KHR);
    }
}
