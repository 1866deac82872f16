//! Compute pipelines built from named SPIR-V shaders.

use crate::error::{GpuError, Result};
use crate::pipeline::{
    create_pipeline_layout, create_shader_module, ConstantValue, Pipeline, PipelineType,
    SpecializationConstants,
};
use crate::scope::RenderScope;
use ash::vk;
use grayforge_shaders::{ShaderLibrary, ShaderStage};

/// Specialization ids carrying the work-group size (`local_size_{x,y,z}_id`).
pub const WORKGROUP_SIZE_IDS: [u32; 3] = [0, 1, 2];

/// Number of work groups needed to cover `extent` with groups of `local_size`.
pub fn group_counts(extent: [u32; 3], local_size: [u32; 3]) -> [u32; 3] {
    let mut counts = [0; 3];
    for axis in 0..3 {
        counts[axis] = extent[axis].div_ceil(local_size[axis].max(1));
    }
    counts
}

/// Everything needed to construct a [`ComputePipeline`].
#[derive(Debug, Clone, Default)]
pub struct ComputePipelineDescriptor {
    shader: String,
    workgroup_size: Option<[u32; 3]>,
    constants: Vec<(u32, ConstantValue)>,
    descriptor_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl ComputePipelineDescriptor {
    /// Describe a pipeline running `<shader>_comp.spv`.
    pub fn new(shader: impl Into<String>) -> Self {
        Self {
            shader: shader.into(),
            ..Default::default()
        }
    }

    /// Set the work-group size through specialization ids 0, 1 and 2.
    pub fn workgroup_size(mut self, size: [u32; 3]) -> Self {
        self.workgroup_size = Some(size);
        self
    }

    /// Set specialization constant `id`.
    pub fn constant(mut self, id: u32, value: impl Into<ConstantValue>) -> Self {
        self.constants.push((id, value.into()));
        self
    }

    pub fn descriptor_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.descriptor_layouts.push(layout);
        self
    }

    pub fn push_constant_range(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    pub fn shader(&self) -> &str {
        &self.shader
    }

    /// Pack the work-group size and user constants, rejecting id collisions.
    pub fn specialization(&self) -> Result<SpecializationConstants> {
        let mut constants = SpecializationConstants::new();
        if let Some(size) = self.workgroup_size {
            for (id, value) in WORKGROUP_SIZE_IDS.into_iter().zip(size) {
                constants.set_u32(id, value)?;
            }
        }
        for &(id, value) in &self.constants {
            value.write(&mut constants, id)?;
        }
        Ok(constants)
    }

    /// Load the shader and build the pipeline.
    pub fn construct(&self, scope: &RenderScope, shaders: &ShaderLibrary) -> Result<ComputePipeline> {
        if self.shader.is_empty() {
            return Err(GpuError::PipelineCreation("No compute shader set".to_string()));
        }
        let device = scope.device()?;
        let constants = self.specialization()?;
        let code = shaders.load(&self.shader, ShaderStage::Compute)?;

        unsafe {
            let module = create_shader_module(device, &code)?;
            let layout = match create_pipeline_layout(
                device,
                &self.descriptor_layouts,
                &self.push_constant_ranges,
            ) {
                Ok(layout) => layout,
                Err(e) => {
                    device.destroy_shader_module(module, None);
                    return Err(e);
                }
            };

            let map_entries = constants.map_entries();
            let specialization = vk::SpecializationInfo::default()
                .map_entries(&map_entries)
                .data(constants.data());

            let stage_info = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(module)
                .name(c"main")
                .specialization_info(&specialization);

            let pipeline_info = vk::ComputePipelineCreateInfo::default()
                .stage(stage_info)
                .layout(layout);

            let result =
                device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);

            // Shader module is no longer needed once the pipeline exists
            device.destroy_shader_module(module, None);

            let pipelines = result.map_err(|(_, e)| {
                device.destroy_pipeline_layout(layout, None);
                GpuError::PipelineCreation(format!("{}: {e}", self.shader))
            })?;

            tracing::debug!("Compute pipeline '{}' created", self.shader);

            Ok(ComputePipeline {
                pipeline: pipelines[0],
                layout,
                local_size: self.workgroup_size.unwrap_or([1, 1, 1]),
            })
        }
    }
}

/// Compute pipeline wrapper.
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    local_size: [u32; 3],
}

impl ComputePipeline {
    /// Work-group size the pipeline was specialized with.
    pub fn local_size(&self) -> [u32; 3] {
        self.local_size
    }

    /// Record a dispatch of `groups` work groups.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording with this
    /// pipeline bound.
    pub unsafe fn dispatch(&self, device: &ash::Device, cmd: vk::CommandBuffer, groups: [u32; 3]) {
        device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]);
    }

    /// Record a dispatch with one invocation per element of `extent`.
    ///
    /// # Safety
    /// Same requirements as [`ComputePipeline::dispatch`].
    pub unsafe fn dispatch_extent(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: [u32; 3]) {
        self.dispatch(device, cmd, group_counts(extent, self.local_size));
    }
}

impl Pipeline for ComputePipeline {
    fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::Compute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_counts_round_up() {
        assert_eq!(group_counts([256, 256, 1], [8, 8, 1]), [32, 32, 1]);
        assert_eq!(group_counts([100, 30, 7], [8, 8, 4]), [13, 4, 2]);
        assert_eq!(group_counts([5, 5, 5], [0, 1, 1]), [5, 5, 5]);
    }

    #[test]
    fn workgroup_size_occupies_first_ids() {
        let desc = ComputePipelineDescriptor::new("noise_perlin")
            .workgroup_size([8, 8, 1])
            .constant(3, 4.0f32)
            .constant(4, 6u32);
        let constants = desc.specialization().unwrap();
        let ids: Vec<u32> = constants.map_entries().iter().map(|e| e.constant_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(desc.shader(), "noise_perlin");
    }

    #[test]
    fn colliding_ids_rejected() {
        let desc = ComputePipelineDescriptor::new("noise_worley")
            .workgroup_size([4, 4, 4])
            .constant(1, 2u32);
        assert!(desc.specialization().is_err());

        let free = ComputePipelineDescriptor::new("noise_worley").constant(1, 2u32);
        assert_eq!(free.specialization().unwrap().len(), 1);
    }
}
