//! Device queues with their own command pool and completion fence.

use crate::command::{begin_one_time, end_command_buffer, submit_command_buffers};
use crate::error::Result;
use crate::swapchain::Swapchain;
use crate::sync::{create_fence, reset_fence, wait_for_fence};
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Role a queue is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    /// Every queue kind.
    pub const ALL: [Self; 3] = [Self::Graphics, Self::Compute, Self::Transfer];

    /// Capabilities a family must offer to serve this kind.
    pub const fn flags(self) -> vk::QueueFlags {
        match self {
            Self::Graphics => vk::QueueFlags::GRAPHICS,
            Self::Compute => vk::QueueFlags::COMPUTE,
            Self::Transfer => vk::QueueFlags::TRANSFER,
        }
    }
}

/// Submission lock shared by every kind resolved to the same device queue.
///
/// Only queue 0 of each family is retrieved, so the family index identifies
/// the `vk::Queue`.
pub fn queue_locks(resolved: &[(QueueKind, u32)]) -> BTreeMap<QueueKind, Arc<Mutex<()>>> {
    let mut by_family: HashMap<u32, Arc<Mutex<()>>> = HashMap::new();
    resolved
        .iter()
        .map(|&(kind, family)| (kind, Arc::clone(by_family.entry(family).or_default())))
        .collect()
}

/// A device queue plus the resources needed for blocking submissions.
pub struct Queue {
    kind: QueueKind,
    family_index: u32,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
    // Queue operations need external synchronization; shared per vk::Queue
    submit_lock: Arc<Mutex<()>>,
    // Serializes users of `fence`
    fence_lock: Mutex<()>,
}

impl Queue {
    /// Retrieve queue 0 of `family_index` and create its pool and fence.
    ///
    /// `submit_lock` must be shared with every other [`Queue`] on the same family.
    ///
    /// # Safety
    /// The device must be valid and created with a queue in `family_index`.
    pub unsafe fn new(
        device: &ash::Device,
        kind: QueueKind,
        family_index: u32,
        submit_lock: Arc<Mutex<()>>,
    ) -> Result<Self> {
        let queue = device.get_device_queue(family_index, 0);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = device.create_command_pool(&pool_info, None)?;

        let fence = match create_fence(device, false) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_command_pool(command_pool, None);
                return Err(e);
            }
        };

        Ok(Self {
            kind,
            family_index,
            queue,
            command_pool,
            fence,
            submit_lock,
            fence_lock: Mutex::new(()),
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Get the raw queue handle.
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Allocate primary command buffers from this queue's pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers)
    }

    /// Return command buffers to the pool.
    ///
    /// # Safety
    /// The device must be valid and the buffers must not be pending.
    pub unsafe fn free_command_buffers(&self, device: &ash::Device, buffers: &[vk::CommandBuffer]) {
        device.free_command_buffers(self.command_pool, buffers);
    }

    /// Submit recorded command buffers, signalling this queue's fence.
    ///
    /// # Safety
    /// The device and command buffers must be valid. Any previous submission
    /// must have been waited on with [`Queue::wait`].
    pub unsafe fn submit(&self, device: &ash::Device, buffers: &[vk::CommandBuffer]) -> Result<()> {
        let _guard = self.lock();
        submit_command_buffers(device, self.queue, buffers, &[], &[], &[], self.fence)
    }

    /// Hold while calling any other queue function on [`Queue::handle`].
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.submit_lock.lock()
    }

    /// Submit frame work with explicit semaphores and fence.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn submit_frame(
        &self,
        device: &ash::Device,
        buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<()> {
        let _guard = self.lock();
        submit_command_buffers(
            device,
            self.queue,
            buffers,
            wait_semaphores,
            wait_stages,
            signal_semaphores,
            fence,
        )
    }

    /// Present `image_index` of `swapchain` on this queue.
    ///
    /// Returns `true` when the swapchain should be recreated.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        loader: &ash::khr::swapchain::Device,
        swapchain: &Swapchain,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let _guard = self.lock();
        swapchain.present(loader, self.queue, image_index, wait_semaphores)
    }

    /// Block until the last [`Queue::submit`] has finished, then re-arm the fence.
    ///
    /// # Safety
    /// The device must be valid and a submission must be pending.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_for_fence(device, self.fence, u64::MAX)?;
        reset_fence(device, self.fence)
    }

    /// Record a one-time command buffer, submit it and wait for completion.
    ///
    /// # Safety
    /// The device must be valid and every handle used by `record` must stay
    /// alive until this returns.
    pub unsafe fn submit_and_wait<F>(&self, device: &ash::Device, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let _fence = self.fence_lock.lock();
        let cmd = self.allocate_command_buffers(device, 1)?[0];

        let result = (|| {
            begin_one_time(device, cmd)?;
            record(cmd)?;
            end_command_buffer(device, cmd)?;
            self.submit(device, &[cmd])?;
            wait_for_fence(device, self.fence, u64::MAX)?;
            reset_fence(device, self.fence)
        })();

        self.free_command_buffers(device, &[cmd]);
        result
    }

    /// Destroy the pool and fence.
    ///
    /// # Safety
    /// The device must be valid and the queue must be idle.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.fence, None);
        device.destroy_command_pool(self.command_pool, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_flags() {
        assert_eq!(QueueKind::Graphics.flags(), vk::QueueFlags::GRAPHICS);
        assert_eq!(QueueKind::Compute.flags(), vk::QueueFlags::COMPUTE);
        assert_eq!(QueueKind::Transfer.flags(), vk::QueueFlags::TRANSFER);
    }

    #[test]
    fn kinds_on_one_family_share_a_lock() {
        let locks = queue_locks(&[
            (QueueKind::Graphics, 0),
            (QueueKind::Compute, 0),
            (QueueKind::Transfer, 2),
        ]);
        assert!(Arc::ptr_eq(&locks[&QueueKind::Graphics], &locks[&QueueKind::Compute]));
        assert!(!Arc::ptr_eq(&locks[&QueueKind::Graphics], &locks[&QueueKind::Transfer]));

        let _held = locks[&QueueKind::Graphics].lock();
        assert!(locks[&QueueKind::Compute].try_lock().is_none());
        assert!(locks[&QueueKind::Transfer].try_lock().is_some());
    }
}
