//! # The Threading Core
//!
//! The schedulable unit of kernel execution and the process-wide services
//! around it: thread-id allocation, the per-core current-thread slot, and
//! the suspension hook the external scheduler installs.
//!
//! ## Philosophy
//! This module owns mechanism, not policy. A [`Thread`] knows how to be
//! suspended, signalled, terminated, and diagnosed; it does not know which
//! thread runs next. The scheduler consults the readiness predicate and
//! performs the switches; we hand it a surface narrow enough that it never
//! has to reach into a thread's internals.

pub mod backtrace;
pub mod mutex;
pub mod stack;
pub mod thread;

pub use thread::{Thread, ThreadId, ThreadKind, ThreadState};

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use spin::Once;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out a process-unique thread id. Ids are never reused.
pub(crate) fn allocate_thread_id() -> ThreadId {
    ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
}

/// The scheduler's suspension hook.
///
/// `wait_for_next_job` and the blocking mutex suspend through this
/// indirection so that the threading core never depends on the scheduler's
/// queue or policy.
static YIELD_HOOK: Once<fn()> = Once::new();

/// Install the scheduler's yield implementation. Later calls are ignored.
pub fn install_yield_hook(hook: fn()) {
    YIELD_HOOK.call_once(|| hook);
}

/// Give up the CPU.
///
/// Before the scheduler is up (and in host tests) there is nobody to switch
/// to; a spin hint keeps the caller's retry loop honest in that window.
pub fn yield_now() {
    match YIELD_HOOK.get() {
        Some(hook) => hook(),
        None => core::hint::spin_loop(),
    }
}

/// Single-writer-per-core current-thread slot.
///
/// Written only by the scheduler at switch boundaries, read by anyone.
static CURRENT_THREAD: AtomicPtr<Thread> = AtomicPtr::new(core::ptr::null_mut());

/// Publish the thread about to run.
///
/// # Safety
/// Only the scheduler may call this, only at a switch boundary, and only
/// with a pointer that stays valid until the next switch boundary.
pub unsafe fn set_current_thread(thread: *mut Thread) {
    CURRENT_THREAD.store(thread, Ordering::Release);
}

/// The thread currently executing on this core, if the scheduler has
/// published one.
pub fn current_thread() -> Option<NonNull<Thread>> {
    NonNull::new(CURRENT_THREAD.load(Ordering::Acquire))
}

/// Id of the current thread, for diagnostics.
pub fn current_thread_id() -> Option<ThreadId> {
    // SAFETY: the slot only ever holds a pointer the scheduler vouched for
    // (see `set_current_thread`), so it is valid while it is published.
    current_thread().map(|thread| unsafe { thread.as_ref().id() })
}
