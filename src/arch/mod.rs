//! # Architecture Abstraction
//!
//! Saved CPU state behind a capability interface. The threading core never
//! looks inside a register context; it owns values of the current target's
//! `Context` type and manipulates them only through [`RegisterContext`]:
//! create one for an entry point, read back its stack/instruction/frame
//! pointers, hand it to the switch path.

pub mod x86_64;

pub use self::x86_64::Context;

/// Saved CPU state for one execution mode of one thread.
///
/// One implementation exists per target architecture. A thread owns two
/// instances by exclusive ownership - one for kernel mode, one for user
/// mode - and never shares either.
pub trait RegisterContext: Sized {
    /// A context that resumes in kernel mode at `entry` on `stack_top`.
    fn kernel_entry(entry: u64, stack_top: u64) -> Self;

    /// A context that resumes in user mode at `entry` on `user_stack_top`,
    /// under the address space rooted at `page_table_phys`.
    fn user_entry(entry: u64, user_stack_top: u64, page_table_phys: u64) -> Self;

    /// Where execution resumes.
    fn instruction_pointer(&self) -> u64;

    /// Saved stack pointer.
    fn stack_pointer(&self) -> u64;

    /// Saved frame pointer - the anchor for backtrace walks.
    fn frame_pointer(&self) -> u64;
}

/// Run `f` with preemption suppressed.
///
/// The job-wait path relies on this to make its check-and-sleep sequence
/// indivisible with respect to `signal_job()` arriving from an interrupt
/// handler on the same core.
#[cfg(target_os = "none")]
pub fn with_preemption_disabled<R>(f: impl FnOnce() -> R) -> R {
    ::x86_64::instructions::interrupts::without_interrupts(f)
}

/// Host stand-in: there is no interrupt preemption to suppress. The atomic
/// transition order inside the job-wait path carries the protocol on its
/// own; cross-thread signals on the host exercise exactly that ordering.
#[cfg(not(target_os = "none"))]
pub fn with_preemption_disabled<R>(f: impl FnOnce() -> R) -> R {
    f()
}
