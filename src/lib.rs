//! # Taproot - Kernel Threading Core
//!
//! The unit of schedulable execution and the interrupt-safe protocols the
//! rest of the kernel builds on: thread lifecycle, worker job signalling,
//! safe termination, and deadlock diagnostics.
//!
//! ## Philosophy
//! A thread owns exactly what it needs to be resumed: its stack and its
//! saved register contexts. Everything else it exposes to the outside world
//! is a narrow, race-free surface - a readiness predicate for the scheduler,
//! a job signal for producers, a kill switch for anyone - so that policy
//! (queues, priorities, switching) can live elsewhere.
//!
//! ## Architecture
//! - `threading`: the `Thread` type, its stack arena, backtraces, and the
//!   blocking mutex that feeds the deadlock diagnostics
//! - `arch`: saved register state behind the `RegisterContext` capability
//! - `loader`: the association between a thread and the user program it runs
//! - `vfs`: the opaque, sharable working-directory context
//! - `klog`: the kernel's log macros

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod klog;
pub mod loader;
pub mod threading;
pub mod vfs;

pub use arch::{Context, RegisterContext};
pub use loader::Loader;
pub use threading::mutex::WaitMutex;
pub use threading::{Thread, ThreadId, ThreadKind, ThreadState};
pub use vfs::{Path, WorkingDir};

/// Panic handler for lib builds
#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}


#[cfg(test)]
#[global_allocator]
static TEST_ALLOCATOR: test_support::CountingAllocator = test_support::CountingAllocator;
