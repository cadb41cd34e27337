// SPDX-License-Identifier: CEPL-1.0
//! Allocator-backed GPU buffers.
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use tracing::{error, trace, warn};

use crate::allocator::{AllocatorHandle, MemoryAllocator};
use crate::command::CommandTarget;
use crate::error::BufferError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferKind {
    #[default]
    Vertex,
    Index,
    Uniform,
    Storage,
    /// Host-written source for copies into device memory.
    Staging,
}

/// Where a buffer's memory lives and how the host reaches it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryResidency {
    /// Device-local, never host accessible. Filled through copies.
    #[default]
    DeviceOnly,
    /// Host-visible, written by the host every frame. Persistently mapped.
    HostToDevice,
    /// Host-visible and cached, for reading device results back.
    DeviceToHost,
    /// Host-visible scratch memory. Persistently mapped.
    HostOnly,
}

impl MemoryResidency {
    pub fn location(self) -> MemoryLocation {
        match self {
            Self::DeviceOnly => MemoryLocation::GpuOnly,
            Self::HostToDevice => MemoryLocation::CpuToGpu,
            Self::DeviceToHost | Self::HostOnly => MemoryLocation::GpuToCpu,
        }
    }

    /// Mapped once at creation and kept mapped for the buffer's lifetime.
    pub fn persistent_mapping(self) -> bool {
        matches!(self, Self::HostToDevice | Self::HostOnly)
    }

    pub fn host_accessible(self) -> bool {
        self != Self::DeviceOnly
    }
}

impl BufferKind {
    pub fn vk_usage(self, residency: MemoryResidency) -> vk::BufferUsageFlags {
        let base = match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        };
        let transfer = match residency {
            // Filled by copies, and readable back through a copy.
            MemoryResidency::DeviceOnly => {
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC
            }
            MemoryResidency::DeviceToHost => vk::BufferUsageFlags::TRANSFER_DST,
            MemoryResidency::HostToDevice | MemoryResidency::HostOnly => {
                vk::BufferUsageFlags::empty()
            }
        };
        base | transfer
    }
}

/// `offset + len <= size`, without overflowing.
pub(crate) fn check_range(
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
    size: vk::DeviceSize,
) -> Result<(), BufferError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BufferError::OutOfBounds { offset, len, size }),
    }
}

pub(crate) fn check_copy(
    size: vk::DeviceSize,
    src_offset: vk::DeviceSize,
    src_size: vk::DeviceSize,
    dst_offset: vk::DeviceSize,
    dst_size: vk::DeviceSize,
) -> Result<(), BufferError> {
    if check_range(src_offset, size, src_size).is_err()
        || check_range(dst_offset, size, dst_size).is_err()
    {
        return Err(BufferError::CopyOutOfBounds {
            size,
            src_offset,
            src_size,
            dst_offset,
            dst_size,
        });
    }
    Ok(())
}

/// Widens `[offset, offset + len)` inside an allocation to whole
/// `nonCoherentAtomSize` units, clamped to the allocation. Returns the
/// memory-relative offset and size for a `VkMappedMemoryRange`.
pub(crate) fn atom_range(
    alloc_offset: vk::DeviceSize,
    alloc_size: vk::DeviceSize,
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
    atom: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = (alloc_offset + offset) / atom * atom;
    let end = (alloc_offset + offset + len).div_ceil(atom) * atom;
    let end = end.min(alloc_offset + alloc_size);
    (start, end.saturating_sub(start))
}

/// A `VkBuffer` plus its memory.
///
/// `Buffer::default()` is the invalid state. Moving out with
/// [`std::mem::take`] leaves the source invalid and the destination owning
/// the resources. The [`DeviceContext`](crate::DeviceContext) that produced
/// the allocator must outlive every buffer created from it.
#[derive(Default)]
pub struct Buffer {
    allocator: AllocatorHandle,
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    kind: BufferKind,
    residency: MemoryResidency,
    mapped: Option<NonNull<u8>>,
    coherent: bool,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("residency", &self.residency)
            .field("mapped", &self.mapped.is_some())
            .finish()
    }
}

impl Buffer {
    pub fn new(
        allocator: &Arc<MemoryAllocator>,
        size: vk::DeviceSize,
        kind: BufferKind,
        residency: MemoryResidency,
    ) -> Result<Self, BufferError> {
        let mut buffer = Self::default();
        buffer.create(allocator, size, kind, residency)?;
        Ok(buffer)
    }

    /// (Re)creates the buffer. Any previous allocation is released first; on
    /// failure the buffer is left invalid.
    pub fn create(
        &mut self,
        allocator: &Arc<MemoryAllocator>,
        size: vk::DeviceSize,
        kind: BufferKind,
        residency: MemoryResidency,
    ) -> Result<(), BufferError> {
        self.destroy();
        if size == 0 {
            return reject("create", BufferError::ZeroSize);
        }

        let device = allocator.device();
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: kind.vk_usage(residency),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = unsafe { device.create_buffer(&info, None) }
            .map_err(BufferError::CreateBuffer)
            .or_else(|e| reject("create", e))?;
        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };

        let name = format!("{kind:?}/{residency:?} buffer");
        let allocation = match allocator.allocate(&name, requirements, residency.location()) {
            Ok(a) => a,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return reject("create", e.into());
            }
        };

        if let Err(e) =
            unsafe { device.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) }
        {
            allocator.free(allocation);
            unsafe { device.destroy_buffer(handle, None) };
            return reject("create", BufferError::BindMemory(e));
        }

        let mapped = if residency.persistent_mapping() {
            match allocation.mapped_ptr() {
                Some(p) => Some(p.cast::<u8>()),
                None => {
                    allocator.free(allocation);
                    unsafe { device.destroy_buffer(handle, None) };
                    return reject("create", BufferError::NotMapped);
                }
            }
        } else {
            None
        };

        self.coherent = allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        self.allocator = allocator.handle();
        self.handle = handle;
        self.allocation = Some(allocation);
        self.size = size;
        self.kind = kind;
        self.residency = residency;
        self.mapped = mapped;

        trace!(?kind, ?residency, size, "buffer created");
        Ok(())
    }

    /// Writes `data` at byte `offset`. Rejected without touching memory if the
    /// buffer is invalid, device-only, or the range overruns it.
    pub fn upload(&mut self, data: &[u8], offset: vk::DeviceSize) -> Result<(), BufferError> {
        self.host_access("upload")?;
        let len = data.len() as vk::DeviceSize;
        check_range(offset, len, self.size).or_else(|e| reject("upload", e))?;
        if data.is_empty() {
            return Ok(());
        }

        if self.residency.persistent_mapping() {
            let Some(base) = self.mapped else {
                return reject("upload", BufferError::NotMapped);
            };
            // SAFETY: range checked above; the mapping covers `size` bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    base.as_ptr().add(offset as usize),
                    data.len(),
                );
            }
            self.flush(offset, len).or_else(|e| reject("upload", e))
        } else {
            let start = offset as usize;
            self.map()?[start..start + data.len()].copy_from_slice(data);
            self.unmap();
            Ok(())
        }
    }

    pub fn upload_pod<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
        offset: vk::DeviceSize,
    ) -> Result<(), BufferError> {
        self.upload(bytemuck::cast_slice(data), offset)
    }

    /// Records a copy of `size` bytes from `source` into this buffer. Nothing
    /// is recorded if either buffer is invalid or the region overruns either.
    pub fn copy_from(
        &self,
        target: &CommandTarget<'_>,
        source: &Buffer,
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
    ) -> Result<(), BufferError> {
        if !self.is_valid() || !source.is_valid() {
            return reject("copy_from", BufferError::Invalid);
        }
        check_copy(size, src_offset, source.size, dst_offset, self.size)
            .or_else(|e| reject("copy_from", e))?;
        if size == 0 {
            return Ok(());
        }

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            target
                .device()
                .cmd_copy_buffer(target.raw(), source.handle, self.handle, &[region]);
        }
        Ok(())
    }

    /// Host view of the whole buffer. Persistent mappings return the cached
    /// pointer; otherwise the memory is made host-visible (invalidating
    /// non-coherent memory so device writes are seen) until [`unmap`].
    ///
    /// [`unmap`]: Self::unmap
    pub fn map(&mut self) -> Result<&mut [u8], BufferError> {
        self.host_access("map")?;

        let ptr = match self.mapped {
            Some(p) => p,
            None => {
                let Some(p) = self.allocation.as_ref().and_then(Allocation::mapped_ptr) else {
                    return reject("map", BufferError::NotMapped);
                };
                self.invalidate(0, self.size).or_else(|e| reject("map", e))?;
                let p = p.cast::<u8>();
                self.mapped = Some(p);
                p
            }
        };
        // SAFETY: the allocation is at least `size` bytes and stays mapped
        // while `self` is mutably borrowed.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }

    /// Ends a transient mapping, flushing host writes. No-op for persistent
    /// mappings and unmapped buffers.
    pub fn unmap(&mut self) {
        if self.residency.persistent_mapping() || self.mapped.is_none() {
            return;
        }
        if let Err(e) = self.flush(0, self.size) {
            warn!("unmap: {e}");
        }
        self.mapped = None;
    }

    /// Copies `len` bytes starting at `offset` back to the host.
    pub fn read(&mut self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<Vec<u8>, BufferError> {
        self.host_access("read")?;
        check_range(offset, len, self.size).or_else(|e| reject("read", e))?;

        if self.residency.persistent_mapping() {
            self.invalidate(offset, len).or_else(|e| reject("read", e))?;
        }
        let start = offset as usize;
        let out = self.map()?[start..start + len as usize].to_vec();
        self.unmap();
        Ok(out)
    }

    /// Releases the buffer and its memory. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.release(allocation);
        }
        // Field-wise reset: assigning a fresh `Buffer` would run `Drop` on
        // the old value and re-enter here.
        self.allocator = AllocatorHandle::default();
        self.handle = vk::Buffer::null();
        self.size = 0;
        self.kind = BufferKind::default();
        self.residency = MemoryResidency::default();
        self.mapped = None;
        self.coherent = false;
    }

    fn release(&mut self, allocation: Allocation) {
        match self.allocator.upgrade() {
            Some(allocator) => {
                unsafe { allocator.device().destroy_buffer(self.handle, None) };
                allocator.free(allocation);
            }
            None => {
                // Device already gone; the memory went with it.
                error!(
                    size = self.size,
                    kind = ?self.kind,
                    "buffer destroyed after its device context"
                );
                std::mem::forget(allocation);
            }
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn residency(&self) -> MemoryResidency {
        self.residency
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::Buffer::null() && self.allocation.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    fn host_access(&self, op: &'static str) -> Result<(), BufferError> {
        if !self.is_valid() {
            return reject(op, BufferError::Invalid);
        }
        if !self.residency.host_accessible() {
            return reject(op, BufferError::DeviceOnly);
        }
        Ok(())
    }

    fn mapped_range(
        &self,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
    ) -> Result<Option<(Arc<MemoryAllocator>, vk::MappedMemoryRange<'static>)>, BufferError> {
        if self.coherent {
            return Ok(None);
        }
        let allocation = self.allocation.as_ref().ok_or(BufferError::Invalid)?;
        let allocator = self.allocator.upgrade().ok_or(BufferError::AllocatorGone)?;
        let (start, size) = atom_range(
            allocation.offset(),
            allocation.size(),
            offset,
            len,
            allocator.non_coherent_atom_size(),
        );
        let range = vk::MappedMemoryRange {
            s_type: vk::StructureType::MAPPED_MEMORY_RANGE,
            memory: unsafe { allocation.memory() },
            offset: start,
            size,
            ..Default::default()
        };
        Ok(Some((allocator, range)))
    }

    fn flush(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<(), BufferError> {
        if let Some((allocator, range)) = self.mapped_range(offset, len)? {
            unsafe { allocator.device().flush_mapped_memory_ranges(&[range]) }
                .map_err(BufferError::MappedRange)?;
        }
        Ok(())
    }

    fn invalidate(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<(), BufferError> {
        if let Some((allocator, range)) = self.mapped_range(offset, len)? {
            unsafe { allocator.device().invalidate_mapped_memory_ranges(&[range]) }
                .map_err(BufferError::MappedRange)?;
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn reject<T>(op: &'static str, e: BufferError) -> Result<T, BufferError> {
    warn!(op, "buffer: {e}");
    Err(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_only_buffers_can_be_filled_and_read_back_by_copy() {
        let u = BufferKind::Vertex.vk_usage(MemoryResidency::DeviceOnly);
        assert!(u.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(u.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(u.contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn staging_is_a_transfer_source() {
        let u = BufferKind::Staging.vk_usage(MemoryResidency::HostToDevice);
        assert_eq!(u, vk::BufferUsageFlags::TRANSFER_SRC);
    }

    #[test]
    fn readback_residency_is_a_transfer_destination() {
        let u = BufferKind::Storage.vk_usage(MemoryResidency::DeviceToHost);
        assert!(u.contains(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!u.contains(vk::BufferUsageFlags::TRANSFER_SRC));

        let u = BufferKind::Uniform.vk_usage(MemoryResidency::HostToDevice);
        assert_eq!(u, vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn residency_mapping() {
        use MemoryResidency::*;
        assert_eq!(DeviceOnly.location(), MemoryLocation::GpuOnly);
        assert_eq!(HostToDevice.location(), MemoryLocation::CpuToGpu);
        assert_eq!(DeviceToHost.location(), MemoryLocation::GpuToCpu);
        assert!(HostToDevice.persistent_mapping() && HostOnly.persistent_mapping());
        assert!(!DeviceToHost.persistent_mapping() && !DeviceOnly.persistent_mapping());
        assert!(!DeviceOnly.host_accessible());
    }

    #[test]
    fn range_checks() {
        assert!(check_range(0, 64, 64).is_ok());
        assert!(check_range(60, 4, 64).is_ok());
        assert!(check_range(60, 5, 64).is_err());
        assert!(check_range(64, 0, 64).is_ok());
        assert!(check_range(u64::MAX, 2, 64).is_err());
    }

    #[test]
    fn copy_checks_both_sides() {
        assert!(check_copy(256, 0, 256, 0, 256).is_ok());
        assert!(check_copy(128, 128, 256, 0, 128).is_ok());
        assert!(matches!(
            check_copy(256, 1, 256, 0, 256),
            Err(BufferError::CopyOutOfBounds { src_offset: 1, .. })
        ));
        assert!(check_copy(256, 0, 256, 0, 255).is_err());
    }

    #[test]
    fn flush_ranges_cover_whole_atoms() {
        // allocation at 256, 512 bytes, atom 64
        assert_eq!(atom_range(256, 512, 0, 1, 64), (256, 64));
        assert_eq!(atom_range(256, 512, 10, 100, 64), (256, 128));
        assert_eq!(atom_range(256, 512, 70, 10, 64), (320, 64));
        // never past the end of the allocation
        assert_eq!(atom_range(256, 500, 480, 20, 64), (704, 52));
        assert_eq!(atom_range(0, 16, 3, 5, 1), (3, 5));
    }

    #[test]
    fn default_buffer_is_invalid_and_rejects_host_access() {
        let mut b = Buffer::default();
        assert!(!b.is_valid());
        assert!(!b.is_mapped());
        assert!(matches!(b.upload(&[1, 2, 3], 0), Err(BufferError::Invalid)));
        assert!(matches!(b.map(), Err(BufferError::Invalid)));
        b.unmap();
        b.destroy();
        b.destroy();
        assert!(!b.is_valid());
    }

    #[test]
    fn take_leaves_source_invalid() {
        let mut a = Buffer::default();
        let b = std::mem::take(&mut a);
        assert!(!a.is_valid() && !b.is_valid());
        assert_eq!(b.size(), 0);
    }
}
