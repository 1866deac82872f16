//! Graphics pipelines for the scope's default render pass.

use crate::error::{GpuError, Result};
use crate::pipeline::{
    create_pipeline_layout, create_shader_module, graphics_stages, stage_flags, Pipeline,
    PipelineType,
};
use crate::scope::RenderScope;
use ash::vk;
use grayforge_shaders::ShaderLibrary;

/// Constant, clamp and slope factors for depth biasing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

impl DepthBias {
    /// Bias is only applied when every factor is non-zero.
    pub fn is_enabled(&self) -> bool {
        self.constant_factor != 0.0 && self.clamp != 0.0 && self.slope_factor != 0.0
    }
}

/// Depth test state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

/// Opaque blend attachment writing all channels.
pub fn opaque_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// Everything needed to construct a [`GraphicsPipeline`].
///
/// Shaders are looked up by name, one file per stage selected with
/// [`GraphicsPipelineDescriptor::shader`].
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    shader: String,
    stages: vk::ShaderStageFlags,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    depth_bias: DepthBias,
    blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    depth: DepthState,
    samples: vk::SampleCountFlags,
    subpass: u32,
    patch_control_points: u32,
    descriptor_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl Default for GraphicsPipelineDescriptor {
    fn default() -> Self {
        Self {
            shader: String::new(),
            stages: vk::ShaderStageFlags::empty(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: DepthBias::default(),
            blend_attachments: vec![opaque_blend_attachment()],
            depth: DepthState::default(),
            samples: vk::SampleCountFlags::TYPE_1,
            subpass: 0,
            patch_control_points: 0,
            descriptor_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }
}

impl GraphicsPipelineDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `<name>_<stage>.spv` for every stage in `stages`.
    pub fn shader(mut self, name: impl Into<String>, stages: vk::ShaderStageFlags) -> Self {
        self.shader = name.into();
        self.stages = stages;
        self
    }

    pub fn vertex_input(
        mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn depth_bias(mut self, bias: DepthBias) -> Self {
        self.depth_bias = bias;
        self
    }

    /// Replace the blend attachments. One entry per color attachment.
    pub fn blend_attachments(mut self, attachments: &[vk::PipelineColorBlendAttachmentState]) -> Self {
        self.blend_attachments = attachments.to_vec();
        self
    }

    pub fn depth(mut self, depth: DepthState) -> Self {
        self.depth = depth;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    /// Control points per patch, used when tessellation stages are present.
    pub fn patch_control_points(mut self, count: u32) -> Self {
        self.patch_control_points = count;
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

    /// Check the shader setup before touching the device.
    pub fn validate(&self) -> Result<()> {
        if self.shader.is_empty() {
            return Err(GpuError::PipelineCreation("No shader set".to_string()));
        }
        if !self.stages.contains(vk::ShaderStageFlags::VERTEX) {
            return Err(GpuError::PipelineCreation(format!(
                "{}: graphics pipelines need a vertex stage",
                self.shader
            )));
        }
        let tess = vk::ShaderStageFlags::TESSELLATION_CONTROL
            | vk::ShaderStageFlags::TESSELLATION_EVALUATION;
        let tess_stages = self.stages & tess;
        if !tess_stages.is_empty() && tess_stages != tess {
            return Err(GpuError::PipelineCreation(format!(
                "{}: tessellation needs both control and evaluation stages",
                self.shader
            )));
        }
        Ok(())
    }

    fn uses_tessellation(&self) -> bool {
        self.stages
            .contains(vk::ShaderStageFlags::TESSELLATION_CONTROL)
    }

    /// Load the shaders and build the pipeline against the scope's render pass.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn construct(&self, scope: &RenderScope, shaders: &ShaderLibrary) -> Result<GraphicsPipeline> {
        self.validate()?;
        let device = scope.device()?;
        let render_pass = scope.render_pass()?;

        let mut sources = Vec::new();
        for stage in graphics_stages(self.stages) {
            sources.push((stage, shaders.load(&self.shader, stage)?));
        }

        unsafe {
            let mut modules = Vec::with_capacity(sources.len());
            for (stage, code) in &sources {
                match create_shader_module(device, code) {
                    Ok(module) => modules.push((*stage, module)),
                    Err(e) => {
                        for (_, module) in modules {
                            device.destroy_shader_module(module, None);
                        }
                        return Err(e);
                    }
                }
            }
            let destroy_modules = |modules: &[(grayforge_shaders::ShaderStage, vk::ShaderModule)]| {
                for &(_, module) in modules {
                    device.destroy_shader_module(module, None);
                }
            };

            let layout = match create_pipeline_layout(
                device,
                &self.descriptor_layouts,
                &self.push_constant_ranges,
            ) {
                Ok(layout) => layout,
                Err(e) => {
                    destroy_modules(&modules);
                    return Err(e);
                }
            };

            let stage_infos: Vec<_> = modules
                .iter()
                .map(|&(stage, module)| {
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(stage_flags(stage))
                        .module(module)
                        .name(c"main")
                })
                .collect();

            let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
                .vertex_binding_descriptions(&self.vertex_bindings)
                .vertex_attribute_descriptions(&self.vertex_attributes);

            let topology = if self.uses_tessellation() {
                vk::PrimitiveTopology::PATCH_LIST
            } else {
                self.topology
            };
            let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(topology)
                .primitive_restart_enable(false);

            let tessellation = vk::PipelineTessellationStateCreateInfo::default()
                .patch_control_points(self.patch_control_points.max(1));

            // Viewport and scissor are set per frame
            let viewport_state = vk::PipelineViewportStateCreateInfo::default()
                .viewport_count(1)
                .scissor_count(1);

            let bias = self.depth_bias;
            let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(self.polygon_mode)
                .cull_mode(self.cull_mode)
                .front_face(self.front_face)
                .depth_bias_enable(bias.is_enabled())
                .depth_bias_constant_factor(bias.constant_factor)
                .depth_bias_clamp(bias.clamp)
                .depth_bias_slope_factor(bias.slope_factor)
                .line_width(1.0);

            let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
                .rasterization_samples(self.samples)
                .sample_shading_enable(false);

            let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(self.depth.test)
                .depth_write_enable(self.depth.write)
                .depth_compare_op(self.depth.compare_op)
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false);

            let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
                .logic_op_enable(false)
                .attachments(&self.blend_attachments);

            let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
            let dynamic_state =
                vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

            let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&stage_infos)
                .vertex_input_state(&vertex_input)
                .input_assembly_state(&input_assembly)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization)
                .multisample_state(&multisampling)
                .depth_stencil_state(&depth_stencil)
                .color_blend_state(&color_blending)
                .dynamic_state(&dynamic_state)
                .layout(layout)
                .render_pass(render_pass)
                .subpass(self.subpass);
            if self.uses_tessellation() {
                pipeline_info = pipeline_info.tessellation_state(&tessellation);
            }

            let result =
                device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);

            // Clean up shader modules
            destroy_modules(&modules);

            let pipelines = result.map_err(|(_, e)| {
                device.destroy_pipeline_layout(layout, None);
                GpuError::PipelineCreation(format!("{}: {e}", self.shader))
            })?;

            tracing::debug!("Graphics pipeline '{}' created", self.shader);

            Ok(GraphicsPipeline {
                pipeline: pipelines[0],
                layout,
            })
        }
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Pipeline for GraphicsPipeline {
    fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::Graphics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let desc = GraphicsPipelineDescriptor::new();
        assert_eq!(desc.blend_attachments.len(), 1);
        assert_eq!(desc.blend_attachments[0].color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(desc.depth.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert!(desc.depth.test && desc.depth.write);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn depth_bias_needs_all_factors() {
        let mut bias = DepthBias {
            constant_factor: 1.25,
            clamp: 0.0,
            slope_factor: 1.75,
        };
        assert!(!bias.is_enabled());
        bias.clamp = 0.1;
        assert!(bias.is_enabled());
    }

    #[test]
    fn validation() {
        let vert_frag = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        assert!(GraphicsPipelineDescriptor::new().validate().is_err());
        assert!(GraphicsPipelineDescriptor::new().shader("mesh", vert_frag).validate().is_ok());
        assert!(GraphicsPipelineDescriptor::new()
            .shader("mesh", vk::ShaderStageFlags::FRAGMENT)
            .validate()
            .is_err());
        assert!(GraphicsPipelineDescriptor::new()
            .shader("terrain", vert_frag | vk::ShaderStageFlags::TESSELLATION_CONTROL)
            .validate()
            .is_err());
        assert!(GraphicsPipelineDescriptor::new()
            .shader(
                "terrain",
                vert_frag
                    | vk::ShaderStageFlags::TESSELLATION_CONTROL
                    | vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            )
            .validate()
            .is_ok());
    }
}
