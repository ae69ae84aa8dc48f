//! Memory for command lists.
//!
//! The ADM fetches command pointer lists and descriptors over the bus, so the
//! memory that holds them must be visible to the controller and have a 32-bit
//! bus address. [`DmaMemory`] provides that memory. [`IdentityMapped`] is the
//! simplest provider: heap memory on a system whose bus addresses equal CPU
//! addresses.

use core::{alloc::Layout, ptr::NonNull};

/// A block of controller-visible memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaBuffer {
    /// Where the CPU sees the block.
    pub ptr: NonNull<u8>,
    /// Where the controller sees the block.
    pub bus_addr: u32,
}

/// Allocates controller-visible memory.
///
/// # Safety
///
/// A [`DmaBuffer`] returned by `allocate` must be valid for reads and writes
/// of `layout.size()` bytes, aligned to `layout.align()` both at `ptr` and at
/// `bus_addr`, and must stay valid until it's passed to `deallocate`. Writes
/// made through `ptr` must be visible to the controller once a
/// [`write_barrier`](crate::ral::write_barrier) is executed.
pub unsafe trait DmaMemory {
    /// Allocate memory for `layout`.
    ///
    /// Returns `None` if there isn't enough memory. The driver treats that
    /// as a recoverable error.
    fn allocate(&self, layout: Layout) -> Option<DmaBuffer>;

    /// Release memory obtained from [`allocate`](DmaMemory::allocate).
    ///
    /// # Safety
    ///
    /// `buffer` must have come from `allocate` on this allocator (or a clone
    /// of it) with the same `layout`, and must not be used again.
    unsafe fn deallocate(&self, buffer: DmaBuffer, layout: Layout);
}

/// Global heap memory, addressed by the controller at its CPU address.
///
/// Allocations the controller couldn't address (above 4 GiB) are returned
/// to the heap and reported as out of memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMapped;

// Safety: the global allocator honors the layout. Bus and CPU addresses are
// the same, so bus alignment follows.
unsafe impl DmaMemory for IdentityMapped {
    fn allocate(&self, layout: Layout) -> Option<DmaBuffer> {
        if layout.size() == 0 {
            return None;
        }
        // Safety: layout has a nonzero size.
        let ptr = NonNull::new(unsafe { alloc::alloc::alloc(layout) })?;
        match u32::try_from(ptr.as_ptr() as usize) {
            Ok(bus_addr) => Some(DmaBuffer { ptr, bus_addr }),
            Err(_) => {
                tracing::warn!(addr = ?ptr, "heap memory is out of the ADM's reach");
                // Safety: allocated above with the same layout.
                unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
                None
            }
        }
    }

    unsafe fn deallocate(&self, buffer: DmaBuffer, layout: Layout) {
        alloc::alloc::dealloc(buffer.ptr.as_ptr(), layout)
    }
}
