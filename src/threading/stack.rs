//! # Stack Allocation
//!
//! Each thread exclusively owns a fixed-capacity stack arena allocated at
//! creation. The arena carries a guard sentinel at its low end - the first
//! thing a downward-growing stack tramples when it overflows - and exposes
//! explicit validation, because the layout is architecture-dependent and
//! cannot be checked by the type system.

use alloc::alloc::{alloc, dealloc, Layout};
use core::ptr::NonNull;

/// Default stack size: 64 KB
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Minimum stack size: 4 KB (one page)
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// Maximum stack size: 1 MB
pub const MAX_STACK_SIZE: usize = 1024 * 1024;

/// The guard sentinel written at the reserved offset.
///
/// It stays this exact constant for the thread's entire non-overflowing
/// lifetime; any other value means the stack grew past its floor.
pub const STACK_CANARY: u32 = 0xDEAD_DEAD;

/// Bytes reserved below the usable stack floor for the guard region.
pub const GUARD_SIZE: usize = 8;

/// A thread's stack arena
pub struct KernelStack {
    bottom: NonNull<u8>,
    size: usize,
}

// Safety: the arena is heap memory exclusively owned by one thread; the
// pointer itself may move between host threads freely.
unsafe impl Send for KernelStack {}
unsafe impl Sync for KernelStack {}

impl KernelStack {
    /// Allocate a stack with the default size
    pub fn new() -> Option<Self> {
        Self::with_size(DEFAULT_STACK_SIZE)
    }

    /// Allocate a stack of `size` bytes (clamped and 16-byte aligned).
    ///
    /// Returns `None` if the allocation fails; thread creation treats that
    /// as fatal.
    pub fn with_size(size: usize) -> Option<Self> {
        let size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        let size = (size + 15) & !15;

        let layout = Layout::from_size_align(size, 16).ok()?;
        let ptr = unsafe { alloc(layout) };
        let bottom = NonNull::new(ptr)?;

        let stack = Self { bottom, size };
        unsafe { core::ptr::write_volatile(stack.canary_ptr(), STACK_CANARY) };
        Some(stack)
    }

    fn canary_ptr(&self) -> *mut u32 {
        self.bottom.as_ptr() as *mut u32
    }

    /// Current value of the guard sentinel.
    pub fn canary(&self) -> u32 {
        unsafe { core::ptr::read_volatile(self.canary_ptr()) }
    }

    /// True while the sentinel is intact. A mismatch means the stack grew
    /// into the guard region and the thread's memory is corrupt.
    pub fn canary_intact(&self) -> bool {
        self.canary() == STACK_CANARY
    }

    /// Low address of the arena (the guard word lives here).
    pub fn bottom(&self) -> u64 {
        self.bottom.as_ptr() as u64
    }

    /// Lowest address the stack may legitimately use.
    pub fn floor(&self) -> u64 {
        self.bottom() + GUARD_SIZE as u64
    }

    /// High address of the arena; the stack grows downward from here.
    pub fn top(&self) -> u64 {
        self.bottom() + self.size as u64
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Is `addr` within the usable stack region?
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.floor() && addr < self.top()
    }

    /// Deliberately trample the guard word, as an overflow would.
    #[cfg(test)]
    pub(crate) fn corrupt_canary_for_test(&self) {
        unsafe { core::ptr::write_volatile(self.canary_ptr(), 0x4141_4141) };
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.size, 16)
            .expect("Invalid layout during stack deallocation");

        unsafe {
            dealloc(self.bottom.as_ptr(), layout);
        }
    }
}
