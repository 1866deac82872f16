//! Descriptor set management.

use crate::error::{GpuError, Result};
use crate::scope::RenderScope;
use ash::vk;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool whose sets can be freed individually.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate descriptor sets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets)
    }

    /// Return sets to the pool.
    ///
    /// # Safety
    /// The device must be valid and the sets must not be in use.
    pub unsafe fn free(&self, device: &ash::Device, sets: &[vk::DescriptorSet]) -> Result<()> {
        device.free_descriptor_sets(self.pool, sets)?;
        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// Resource bound at one binding of a [`DescriptorSetDescriptor`].
#[derive(Debug, Clone, Copy)]
enum BindingResource {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

#[derive(Debug, Clone, Copy)]
struct BindingEntry {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
    resource: BindingResource,
}

/// Description of a single descriptor set and the resources it points at.
///
/// Allocating produces both the layout and a set written with every
/// resource, ready to bind.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetDescriptor {
    entries: Vec<BindingEntry>,
}

impl DescriptorSetDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
        resource: BindingResource,
    ) -> Self {
        self.entries.push(BindingEntry {
            binding,
            descriptor_type,
            stages,
            resource,
        });
        self
    }

    /// Bind a storage image. The image must be in `GENERAL` layout when used.
    pub fn add_storage_image(
        self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        info: vk::DescriptorImageInfo,
    ) -> Self {
        self.push(
            binding,
            vk::DescriptorType::STORAGE_IMAGE,
            stages,
            BindingResource::Image(info),
        )
    }

    /// Bind a combined image sampler.
    pub fn add_image_sampler(
        self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        info: vk::DescriptorImageInfo,
    ) -> Self {
        self.push(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stages,
            BindingResource::Image(info),
        )
    }

    /// Bind a uniform buffer.
    pub fn add_uniform_buffer(
        self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        info: vk::DescriptorBufferInfo,
    ) -> Self {
        self.push(
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            stages,
            BindingResource::Buffer(info),
        )
    }

    /// Bind a storage buffer.
    pub fn add_storage_buffer(
        self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        info: vk::DescriptorBufferInfo,
    ) -> Self {
        self.push(
            binding,
            vk::DescriptorType::STORAGE_BUFFER,
            stages,
            BindingResource::Buffer(info),
        )
    }

    /// Reject binding numbers used twice.
    pub fn validate(&self) -> Result<()> {
        for (i, entry) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|e| e.binding == entry.binding) {
                return Err(GpuError::InvalidState(format!(
                    "Descriptor binding {} declared twice",
                    entry.binding
                )));
            }
        }
        Ok(())
    }

    /// Layout bindings in declaration order.
    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(entry.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(entry.stages)
            })
            .collect()
    }

    /// Pool capacity one set of this shape consumes.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for entry in &self.entries {
            match sizes.iter_mut().find(|s| s.ty == entry.descriptor_type) {
                Some(size) => size.descriptor_count += 1,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: entry.descriptor_type,
                    descriptor_count: 1,
                }),
            }
        }
        sizes
    }

    /// Create the layout, allocate a set from the scope's pool and write it.
    pub fn allocate(&self, scope: &RenderScope) -> Result<DescriptorSet> {
        self.validate()?;
        let device = scope.device()?;
        let pool = scope.descriptor_pool()?;

        let bindings = self.layout_bindings();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };

        let set = match unsafe { pool.allocate(device, &[layout]) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(e);
            }
        };

        let writes: Vec<vk::WriteDescriptorSet> = self
            .entries
            .iter()
            .map(|entry| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(entry.binding)
                    .descriptor_type(entry.descriptor_type);
                match &entry.resource {
                    BindingResource::Image(info) => write.image_info(std::slice::from_ref(info)),
                    BindingResource::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                }
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        Ok(DescriptorSet {
            layout,
            set,
            pool: pool.handle(),
        })
    }
}

/// An allocated and written descriptor set together with its layout.
pub struct DescriptorSet {
    pub layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
    pool: vk::DescriptorPool,
}

impl DescriptorSet {
    /// Bind at `index` for a pipeline using `pipeline_layout`.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording.
    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        index: u32,
    ) {
        device.cmd_bind_descriptor_sets(cmd, bind_point, pipeline_layout, index, &[self.set], &[]);
    }

    /// Free the set and destroy its layout.
    ///
    /// # Safety
    /// The device must be valid and the set must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) -> Result<()> {
        device.free_descriptor_sets(self.pool, &[self.set])?;
        device.destroy_descriptor_set_layout(self.layout, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_image() -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default().image_layout(vk::ImageLayout::GENERAL)
    }

    #[test]
    fn bindings_follow_declaration() {
        let desc = DescriptorSetDescriptor::new()
            .add_storage_image(0, vk::ShaderStageFlags::COMPUTE, storage_image())
            .add_uniform_buffer(
                1,
                vk::ShaderStageFlags::COMPUTE,
                vk::DescriptorBufferInfo::default(),
            );
        let bindings = desc.layout_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::COMPUTE);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn pool_sizes_group_by_type() {
        let stages = vk::ShaderStageFlags::FRAGMENT;
        let desc = DescriptorSetDescriptor::new()
            .add_image_sampler(0, stages, vk::DescriptorImageInfo::default())
            .add_image_sampler(1, stages, vk::DescriptorImageInfo::default())
            .add_storage_buffer(2, stages, vk::DescriptorBufferInfo::default());
        let sizes = desc.pool_sizes();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert_eq!(sizes[1].descriptor_count, 1);
    }

    #[test]
    fn duplicate_binding_rejected() {
        let desc = DescriptorSetDescriptor::new()
            .add_storage_image(3, vk::ShaderStageFlags::COMPUTE, storage_image())
            .add_storage_image(3, vk::ShaderStageFlags::COMPUTE, storage_image());
        assert!(matches!(desc.validate(), Err(GpuError::InvalidState(_))));
    }
}
