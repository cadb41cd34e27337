// SPDX-License-Identifier: CEPL-1.0
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, MemoryLocation};
use tracing::{debug, error};

/// The shared memory allocator. Owned (as the only strong reference) by
/// `DeviceContext`; buffers only hold an [`AllocatorHandle`].
pub struct MemoryAllocator {
    device: ash::Device,
    inner: Mutex<AllocatorState>,
    non_coherent_atom_size: vk::DeviceSize,
}

struct AllocatorState {
    allocator: Option<Allocator>,
    live: usize,
}

impl MemoryAllocator {
    pub(crate) fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        non_coherent_atom_size: vk::DeviceSize,
    ) -> Result<Arc<Self>, AllocationError> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Arc::new(Self {
            device: device.clone(),
            inner: Mutex::new(AllocatorState {
                allocator: Some(allocator),
                live: 0,
            }),
            non_coherent_atom_size: non_coherent_atom_size.max(1),
        }))
    }

    pub fn handle(self: &Arc<Self>) -> AllocatorHandle {
        AllocatorHandle(Arc::downgrade(self))
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.non_coherent_atom_size
    }

    /// Allocations currently outstanding through this allocator.
    pub fn live_allocations(&self) -> usize {
        self.lock().live
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        // Single host thread: a poisoned lock only means an earlier panic
        // unwound through an allocation, the state itself is still coherent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
    ) -> Result<Allocation, AllocationError> {
        // Host-visible memory may be non-coherent: keep every allocation on
        // atom boundaries so range flushes never spill into a neighbour.
        let requirements = if location == MemoryLocation::GpuOnly {
            requirements
        } else {
            let atom = self.non_coherent_atom_size;
            vk::MemoryRequirements {
                size: requirements.size.div_ceil(atom) * atom,
                alignment: requirements.alignment.max(atom),
                memory_type_bits: requirements.memory_type_bits,
            }
        };

        let mut state = self.lock();
        let allocator = state.allocator.as_mut().ok_or_else(|| {
            AllocationError::Internal("allocator already shut down".to_owned())
        })?;
        let allocation = allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        state.live += 1;
        Ok(allocation)
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        let mut state = self.lock();
        let Some(allocator) = state.allocator.as_mut() else {
            error!("allocation freed after allocator shutdown; memory went with the device");
            return;
        };
        if let Err(e) = allocator.free(allocation) {
            error!("failed to free GPU allocation: {e}");
            return;
        }
        state.live = state.live.saturating_sub(1);
    }

    /// Drops the underlying allocator. Must run before `vkDestroyDevice`.
    pub(crate) fn shutdown(&self) {
        let mut state = self.lock();
        if state.live > 0 {
            error!(
                live = state.live,
                "allocator shut down with live allocations; buffers outlived the device context"
            );
        }
        if state.allocator.take().is_some() {
            debug!("memory allocator destroyed");
        }
    }
}

/// Non-owning back-reference from a buffer to the shared allocator.
///
/// The device context must outlive every buffer created through it. This is
/// a documented precondition, not something enforced by keeping the allocator
/// alive: once the context is gone, `upgrade` returns `None`.
#[derive(Clone, Default)]
pub struct AllocatorHandle(Weak<MemoryAllocator>);

impl AllocatorHandle {
    pub fn upgrade(&self) -> Option<Arc<MemoryAllocator>> {
        self.0.upgrade()
    }

    pub fn is_dangling(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl std::fmt::Debug for AllocatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AllocatorHandle")
            .field(&if self.is_dangling() { "dangling" } else { "live" })
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_handle_is_dangling() {
        let h = AllocatorHandle::default();
        assert!(h.is_dangling());
        assert!(h.upgrade().is_none());
        assert_eq!(format!("{h:?}"), "AllocatorHandle(\"dangling\")");
    }
}
