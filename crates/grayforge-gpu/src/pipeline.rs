//! Shared pipeline plumbing: the [`Pipeline`] trait, shader modules and
//! specialization constants.

use crate::error::{GpuError, Result};
use ash::vk;
use grayforge_shaders::ShaderStage;

/// Kind of work a pipeline performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineType {
    Graphics,
    Compute,
}

impl PipelineType {
    pub const fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            Self::Graphics => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

/// Common behaviour of graphics and compute pipelines.
pub trait Pipeline {
    /// Raw pipeline handle.
    fn handle(&self) -> vk::Pipeline;

    /// Pipeline layout.
    fn layout(&self) -> vk::PipelineLayout;

    fn pipeline_type(&self) -> PipelineType;

    fn bind_point(&self) -> vk::PipelineBindPoint {
        self.pipeline_type().bind_point()
    }

    /// Bind the pipeline.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording.
    unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_pipeline(cmd, self.bind_point(), self.handle());
    }

    /// Upload push constants at offset 0.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording, and the
    /// layout must declare a range covering `data` for `stages`.
    unsafe fn push_constants<T: bytemuck::Pod>(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) where
        Self: Sized,
    {
        device.cmd_push_constants(cmd, self.layout(), stages, 0, bytemuck::bytes_of(data));
    }

    /// Destroy the pipeline and its layout.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.handle(), None);
        device.destroy_pipeline_layout(self.layout(), None);
    }
}

/// Vulkan stage bit for a shader stage.
pub const fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Graphics stages selected by `flags`, in pipeline order.
pub fn graphics_stages(flags: vk::ShaderStageFlags) -> Vec<ShaderStage> {
    ShaderStage::GRAPHICS
        .into_iter()
        .filter(|&stage| flags.contains(stage_flags(stage)))
        .collect()
}

/// Create a shader module from SPIR-V words.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&info, None)
        .map_err(|e| GpuError::PipelineCreation(format!("Shader module: {e}")))
}

/// Create a pipeline layout.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))
}

/// 32-bit specialization constants keyed by constant id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecializationConstants {
    ids: Vec<u32>,
    words: Vec<u32>,
}

impl SpecializationConstants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw 32-bit value of constant `id`. Each id may be set once.
    pub fn set_u32(&mut self, id: u32, value: u32) -> Result<()> {
        if self.ids.contains(&id) {
            return Err(GpuError::PipelineCreation(format!(
                "Specialization constant {id} set twice"
            )));
        }
        self.ids.push(id);
        self.words.push(value);
        Ok(())
    }

    pub fn set_i32(&mut self, id: u32, value: i32) -> Result<()> {
        self.set_u32(id, value as u32)
    }

    pub fn set_f32(&mut self, id: u32, value: f32) -> Result<()> {
        self.set_u32(id, value.to_bits())
    }

    pub fn set_bool(&mut self, id: u32, value: bool) -> Result<()> {
        self.set_u32(id, if value { vk::TRUE } else { vk::FALSE })
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Map entries, one packed 4-byte slot per constant.
    pub fn map_entries(&self) -> Vec<vk::SpecializationMapEntry> {
        self.ids
            .iter()
            .enumerate()
            .map(|(slot, &id)| vk::SpecializationMapEntry {
                constant_id: id,
                offset: (slot * 4) as u32,
                size: 4,
            })
            .collect()
    }

    /// Packed constant data.
    pub fn data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

/// Value of a specialization constant before packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
}

impl ConstantValue {
    pub(crate) fn write(self, constants: &mut SpecializationConstants, id: u32) -> Result<()> {
        match self {
            Self::U32(v) => constants.set_u32(id, v),
            Self::I32(v) => constants.set_i32(id, v),
            Self::F32(v) => constants.set_f32(id, v),
            Self::Bool(v) => constants.set_bool(id, v),
        }
    }
}

impl From<u32> for ConstantValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<i32> for ConstantValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<f32> for ConstantValue {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<bool> for ConstantValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_pack_in_order() {
        let mut constants = SpecializationConstants::new();
        constants.set_u32(3, 7).unwrap();
        constants.set_f32(0, 1.5).unwrap();
        constants.set_bool(1, true).unwrap();

        let entries = constants.map_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!((entries[0].constant_id, entries[0].offset), (3, 0));
        assert_eq!((entries[1].constant_id, entries[1].offset), (0, 4));
        assert_eq!(entries[2].size, 4);

        let data = constants.data();
        assert_eq!(data.len(), 12);
        assert_eq!(&data[0..4], &7u32.to_ne_bytes());
        assert_eq!(&data[4..8], &1.5f32.to_bits().to_ne_bytes());
        assert_eq!(&data[8..12], &1u32.to_ne_bytes());
    }

    #[test]
    fn duplicate_constant_rejected() {
        let mut constants = SpecializationConstants::new();
        constants.set_u32(0, 1).unwrap();
        assert!(constants.set_i32(0, -1).is_err());
        assert_eq!(constants.len(), 1);
    }

    #[test]
    fn stage_selection() {
        let stages = graphics_stages(vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::VERTEX);
        assert_eq!(stages, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
        assert_eq!(stage_flags(ShaderStage::Compute), vk::ShaderStageFlags::COMPUTE);
        assert_eq!(PipelineType::Compute.bind_point(), vk::PipelineBindPoint::COMPUTE);
    }
}
