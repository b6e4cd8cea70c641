//! Temporary buffer providers for packed operand blocks.
//!
//! The blocked multiply never allocates directly. It asks a
//! [`ScratchProvider`] for buffers and hands them back when a block is
//! done. [`scoped`] wraps the pair in a guard so the buffer goes back to
//! its provider on every exit path, unwinding included.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::Mutex;

use crate::error::{allocation_error, layout_error, Result};

/// Alignment of every scratch buffer, in bytes. Matches one 256-bit vector.
pub const SCRATCH_ALIGNMENT: usize = 32;

/// Owned, aligned, zero-initialised block of `f32`s.
pub struct ScratchBuffer {
    ptr: NonNull<f32>,
    capacity: usize,
    layout: Layout,
    _marker: PhantomData<f32>,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for ScratchBuffer {}
unsafe impl Sync for ScratchBuffer {}

impl ScratchBuffer {
    /// Allocates room for `capacity` floats.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Ok(ScratchBuffer {
                ptr: NonNull::dangling(),
                capacity: 0,
                layout: Layout::new::<f32>(),
                _marker: PhantomData,
            });
        }

        let layout = Layout::array::<f32>(capacity)
            .and_then(|layout| layout.align_to(SCRATCH_ALIGNMENT))
            .map_err(|err| layout_error(capacity, err.to_string()))?;
        let size = layout.size();

        // SAFETY: the layout has a non-zero size.
        let raw_ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw_ptr.cast::<f32>()).ok_or_else(|| {
            allocation_error(size, SCRATCH_ALIGNMENT, "global allocator returned null")
        })?;

        Ok(ScratchBuffer {
            ptr,
            capacity,
            layout,
            _marker: PhantomData,
        })
    }

    /// Number of floats the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: `ptr` is valid for `capacity` initialised floats.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        if self.capacity > 0 {
            // SAFETY: allocated in `new` with exactly this layout.
            unsafe {
                alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), self.layout);
            }
        }
    }
}

impl std::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Source of short-lived scratch memory for one multiplication call.
///
/// A buffer returned by `acquire` stays valid until it is passed back to
/// `release`. Several buffers may be outstanding at once. Buffers may hold
/// stale data from earlier use; callers overwrite what they read.
pub trait ScratchProvider {
    /// Returns a buffer holding at least `len` floats.
    fn acquire(&self, len: usize) -> Result<ScratchBuffer>;

    /// Gives a buffer back to the provider.
    fn release(&self, buffer: ScratchBuffer);
}

impl<P: ScratchProvider + ?Sized> ScratchProvider for &P {
    fn acquire(&self, len: usize) -> Result<ScratchBuffer> {
        (**self).acquire(len)
    }

    fn release(&self, buffer: ScratchBuffer) {
        (**self).release(buffer)
    }
}

/// Scoped acquisition: derefs to exactly `len` floats, releases on drop.
pub struct ScratchGuard<'p, P: ScratchProvider + ?Sized> {
    provider: &'p P,
    buffer: Option<ScratchBuffer>,
    len: usize,
}

/// Acquires `len` floats from `provider` for the lifetime of the guard.
pub fn scoped<P: ScratchProvider + ?Sized>(provider: &P, len: usize) -> Result<ScratchGuard<'_, P>> {
    let buffer = provider.acquire(len)?;
    debug_assert!(buffer.capacity() >= len);
    Ok(ScratchGuard {
        provider,
        buffer: Some(buffer),
        len,
    })
}

impl<P: ScratchProvider + ?Sized> Deref for ScratchGuard<'_, P> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        match &self.buffer {
            Some(buffer) => &buffer.as_slice()[..self.len],
            None => &[],
        }
    }
}

impl<P: ScratchProvider + ?Sized> DerefMut for ScratchGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut [f32] {
        match &mut self.buffer {
            Some(buffer) => &mut buffer.as_mut_slice()[..self.len],
            None => &mut [],
        }
    }
}

impl<P: ScratchProvider + ?Sized> Drop for ScratchGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.provider.release(buffer);
        }
    }
}

/// Allocates on every `acquire` and frees on every `release`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapScratch;

impl ScratchProvider for HeapScratch {
    fn acquire(&self, len: usize) -> Result<ScratchBuffer> {
        ScratchBuffer::new(len)
    }

    fn release(&self, buffer: ScratchBuffer) {
        drop(buffer);
    }
}

/// Picks the smallest pooled buffer that fits `len`.
fn take_best_fit(free: &mut Vec<ScratchBuffer>, len: usize) -> Option<ScratchBuffer> {
    let index = free
        .iter()
        .enumerate()
        .filter(|(_, buffer)| buffer.capacity() >= len)
        .min_by_key(|(_, buffer)| buffer.capacity())
        .map(|(index, _)| index)?;
    Some(free.swap_remove(index))
}

/// Single-threaded free list. Released buffers are kept for reuse.
#[derive(Debug, Default)]
pub struct PooledScratch {
    free: RefCell<Vec<ScratchBuffer>>,
}

impl PooledScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of idle buffers currently held.
    pub fn pooled(&self) -> usize {
        self.free.borrow().len()
    }

    /// Frees every idle buffer.
    pub fn clear(&self) {
        self.free.borrow_mut().clear();
    }
}

impl ScratchProvider for PooledScratch {
    fn acquire(&self, len: usize) -> Result<ScratchBuffer> {
        if let Some(buffer) = take_best_fit(&mut self.free.borrow_mut(), len) {
            log::trace!("reusing pooled scratch of {} floats for {}", buffer.capacity(), len);
            return Ok(buffer);
        }
        log::trace!("allocating scratch of {} floats", len);
        ScratchBuffer::new(len)
    }

    fn release(&self, buffer: ScratchBuffer) {
        self.free.borrow_mut().push(buffer);
    }
}

/// Thread-safe free list, shareable between concurrent calls.
#[derive(Debug, Default)]
pub struct SharedPool {
    free: Mutex<Vec<ScratchBuffer>>,
}

impl SharedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of idle buffers currently held.
    pub fn pooled(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    /// Frees every idle buffer.
    pub fn clear(&self) {
        if let Ok(mut free) = self.free.lock() {
            free.clear();
        }
    }
}

impl ScratchProvider for SharedPool {
    fn acquire(&self, len: usize) -> Result<ScratchBuffer> {
        let reused = match self.free.lock() {
            Ok(mut free) => take_best_fit(&mut free, len),
            Err(_) => None,
        };
        match reused {
            Some(buffer) => {
                log::trace!("reusing shared scratch of {} floats for {}", buffer.capacity(), len);
                Ok(buffer)
            }
            None => {
                log::trace!("allocating shared scratch of {} floats", len);
                ScratchBuffer::new(len)
            }
        }
    }

    fn release(&self, buffer: ScratchBuffer) {
        // A poisoned pool just stops recycling; the buffer is freed.
        if let Ok(mut free) = self.free.lock() {
            free.push(buffer);
        }
    }
}
