//! # The Kernel Thread
//!
//! A thread is identity, a state machine, an exclusively-owned stack, and
//! two saved register contexts. Everything the outside world does to a
//! thread goes through a deliberately narrow surface:
//!
//! - the scheduler polls [`Thread::is_schedulable`] and moves threads
//!   between Running/Sleeping at switch boundaries
//! - producers call [`Thread::signal_job`] from any context, including
//!   interrupt handlers
//! - anyone may call [`Thread::kill`], also from any context; the victim is
//!   barred from future dispatch and reclaimed later by the scheduler
//! - a mutex records itself in the diagnostic back-reference while the
//!   thread blocks on it
//!
//! The interrupt-safe operations touch only single atomic words and never
//! allocate. Every other field is mutated under the scheduler's own
//! serialization and therefore needs no lock of its own.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, Ordering};

use super::backtrace;
use super::mutex::MutexInfo;
use super::stack::{KernelStack, STACK_CANARY};
use crate::arch::{self, Context, RegisterContext};
use crate::kprintln;
use crate::loader::Loader;
use crate::vfs::WorkingDir;

/// Name reported for threads constructed without one.
pub const UNNAMED_THREAD: &str = "<UNNAMED THREAD>";

/// A process-unique identifier for a thread. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of dispatch drives a thread.
///
/// The kind is fixed at creation and decides which state an external
/// wake-up restores: a plain kernel thread goes back to Running, a pool
/// thread goes back to Worker (dispatchable only while work is pending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Regular,
    Worker,
}

/// The state of a thread in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Actively executing or immediately dispatchable
    Running = 0,

    /// Blocked, excluded from dispatch until an external wake-up
    Sleeping = 1,

    /// Dispatchable only while a job is pending
    Worker = 2,

    /// Terminal: barred from dispatch, awaiting the scheduler's
    /// reclamation pass
    ToBeDestroyed = 3,
}

impl ThreadState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ThreadState::Running,
            1 => ThreadState::Sleeping,
            2 => ThreadState::Worker,
            _ => ThreadState::ToBeDestroyed,
        }
    }

    pub fn printable(self) -> &'static str {
        match self {
            ThreadState::Running => "Running",
            ThreadState::Sleeping => "Sleeping",
            ThreadState::Worker => "Worker",
            ThreadState::ToBeDestroyed => "ToBeDestroyed",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.printable())
    }
}

/// Opaque handle to the terminal a thread reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalId(pub u32);

/// Evidence of a trampled stack guard word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanaryViolation {
    pub thread: ThreadId,
    pub found: u32,
}

/// A schedulable unit of kernel execution
pub struct Thread {
    id: ThreadId,
    name: Option<String>,
    kind: ThreadKind,
    state: AtomicU8,

    /// Exclusively owned stack arena with its guard sentinel
    stack: KernelStack,

    /// Kernel-mode saved state - always valid after construction
    kernel_context: Box<Context>,

    /// User-mode saved state - valid only once a loader populates it
    user_context: Option<Box<Context>>,

    /// Which context the next resume restores
    switch_to_userspace: AtomicBool,

    /// Association with the running user program; `None` for pure kernel
    /// threads
    loader: Option<Loader>,

    // Worker job accounting; monotonic, done never exceeds scheduled
    jobs_scheduled: AtomicU64,
    jobs_done: AtomicU64,

    /// Diagnostic back-reference to the mutex this thread sleeps on.
    /// Written by the mutex on contention, cleared by the mutex on release
    /// (and defensively by `kill`). Never owned, never revalidated here.
    blocked_on: AtomicPtr<MutexInfo>,

    /// Shared filesystem context; replaced wholesale, never edited in place
    working_dir: Arc<WorkingDir>,

    terminal: Option<TerminalId>,

    // Scheduling accounting
    time_slices: AtomicU64,
    yields: AtomicU64,
}

impl Thread {
    /// Create a kernel thread with a default working-directory context.
    pub fn new(name: Option<&str>, entry: fn() -> !) -> Self {
        Self::create(name, ThreadKind::Regular, entry, Arc::new(WorkingDir::default()))
    }

    /// Create a kernel thread with the given working-directory context.
    pub fn with_working_dir(
        name: Option<&str>,
        working_dir: Arc<WorkingDir>,
        entry: fn() -> !,
    ) -> Self {
        Self::create(name, ThreadKind::Regular, entry, working_dir)
    }

    /// Create a worker thread: dispatchable only while a job is pending.
    pub fn new_worker(name: Option<&str>, entry: fn() -> !) -> Self {
        Self::create(name, ThreadKind::Worker, entry, Arc::new(WorkingDir::default()))
    }

    fn create(
        name: Option<&str>,
        kind: ThreadKind,
        entry: fn() -> !,
        working_dir: Arc<WorkingDir>,
    ) -> Self {
        let id = super::allocate_thread_id();

        // Allocation failure at thread creation is an operational fatality:
        // nothing above us is prepared to run a kernel that cannot make
        // threads.
        let Some(stack) = KernelStack::new() else {
            kprintln!("[THREAD] fatal: stack allocation failed for thread {}", id);
            panic!("out of memory creating thread {}", id);
        };

        let kernel_context = Box::new(Context::kernel_entry(entry as u64, stack.top()));

        let initial_state = match kind {
            ThreadKind::Regular => ThreadState::Running,
            ThreadKind::Worker => ThreadState::Worker,
        };

        Self {
            id,
            name: name.map(String::from),
            kind,
            state: AtomicU8::new(initial_state as u8),
            stack,
            kernel_context,
            user_context: None,
            switch_to_userspace: AtomicBool::new(false),
            loader: None,
            jobs_scheduled: AtomicU64::new(0),
            jobs_done: AtomicU64::new(0),
            blocked_on: AtomicPtr::new(core::ptr::null_mut()),
            working_dir,
            terminal: None,
            time_slices: AtomicU64::new(0),
            yields: AtomicU64::new(0),
        }
    }

    // === Identity ===

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The thread's display name, or the fixed placeholder.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNNAMED_THREAD)
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    // === State machine ===

    pub fn state(&self) -> ThreadState {
        ThreadState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// The state an external wake-up restores this thread to.
    fn dispatchable_state(&self) -> ThreadState {
        match self.kind {
            ThreadKind::Regular => ThreadState::Running,
            ThreadKind::Worker => ThreadState::Worker,
        }
    }

    /// Voluntarily leave the dispatch set (contention, empty job queue).
    ///
    /// Returns false if the thread was not in a dispatchable state; in
    /// particular a ToBeDestroyed thread stays ToBeDestroyed.
    pub fn sleep(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                match ThreadState::from_raw(raw) {
                    ThreadState::Running | ThreadState::Worker => {
                        Some(ThreadState::Sleeping as u8)
                    }
                    _ => None,
                }
            })
            .is_ok()
    }

    /// External wake-up (mutex release, job arrival).
    ///
    /// Only a Sleeping thread can be woken; a ToBeDestroyed thread is never
    /// resurrected.
    pub fn wake(&self) -> bool {
        self.state
            .compare_exchange(
                ThreadState::Sleeping as u8,
                self.dispatchable_state() as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Mark the thread for destruction.
    ///
    /// Callable from any context, including interrupt handlers with
    /// interrupts disabled: one atomic state write plus a defensive clear
    /// of the diagnostic back-reference. No allocation, no deallocation, no
    /// blocking lock. Idempotent. Actual reclamation of the stack, the
    /// contexts and the loader happens later, in the scheduler's
    /// reclamation pass, after the thread has left every queue.
    pub fn kill(&self) {
        self.state
            .store(ThreadState::ToBeDestroyed as u8, Ordering::SeqCst);
        self.blocked_on
            .store(core::ptr::null_mut(), Ordering::SeqCst);
    }

    /// The readiness predicate the scheduler polls.
    ///
    /// Pure and interrupt-safe: a handful of sequentially consistent
    /// loads, no side effects.
    pub fn is_schedulable(&self) -> bool {
        match self.state() {
            ThreadState::Running => true,
            ThreadState::Worker => self.has_work(),
            ThreadState::Sleeping | ThreadState::ToBeDestroyed => false,
        }
    }

    /// Only the scheduler acts on this, and only it may then free the
    /// thread.
    pub fn is_reclaimable(&self) -> bool {
        self.state() == ThreadState::ToBeDestroyed
    }

    // === Worker job protocol ===

    /// Queue one unit of work for this thread.
    ///
    /// Allocation-free and callable from any context. The counter increment
    /// is ordered before the wake-up transition, so the wait path can never
    /// observe the dispatchable state without also observing the new count.
    /// The payload itself travels out-of-band; this is only the readiness
    /// signal.
    pub fn signal_job(&self) {
        self.jobs_scheduled.fetch_add(1, Ordering::SeqCst);
        let _ = self.state.compare_exchange(
            ThreadState::Sleeping as u8,
            self.dispatchable_state() as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Record completion of one unit of work.
    pub fn job_done(&self) {
        self.jobs_done.fetch_add(1, Ordering::SeqCst);
    }

    /// Are there open jobs?
    pub fn has_work(&self) -> bool {
        self.jobs_scheduled.load(Ordering::SeqCst) > self.jobs_done.load(Ordering::SeqCst)
    }

    pub fn jobs_scheduled(&self) -> u64 {
        self.jobs_scheduled.load(Ordering::SeqCst)
    }

    pub fn jobs_done(&self) -> u64 {
        self.jobs_done.load(Ordering::SeqCst)
    }

    /// The worker's sole suspension point - call this instead of a bare
    /// yield.
    ///
    /// Returns as soon as work is pending (or the thread has been killed,
    /// so a victim parked here still drains out of the scheduler). If the
    /// queue is empty the thread parks: under suppressed preemption it
    /// publishes Sleeping first and re-checks the counters second. A signal
    /// that lands in between either flips the state straight back via its
    /// own compare-exchange, or its counter increment is seen here and the
    /// transition is undone locally. Either way no wakeup is lost.
    pub fn wait_for_next_job(&self) {
        debug_assert_eq!(self.kind, ThreadKind::Worker);

        loop {
            if self.has_work() || self.state() == ThreadState::ToBeDestroyed {
                return;
            }

            let parked = arch::with_preemption_disabled(|| {
                if self
                    .state
                    .compare_exchange(
                        ThreadState::Worker as u8,
                        ThreadState::Sleeping as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_err()
                {
                    return false;
                }

                if self.has_work() {
                    // a signal raced the transition; undo it
                    let _ = self.state.compare_exchange(
                        ThreadState::Sleeping as u8,
                        ThreadState::Worker as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    return false;
                }

                true
            });

            if parked {
                self.record_yield();
                super::yield_now();
            }
        }
    }

    // === Register contexts ===

    pub fn kernel_context(&self) -> &Context {
        &self.kernel_context
    }

    pub fn kernel_context_mut(&mut self) -> &mut Context {
        &mut self.kernel_context
    }

    pub fn user_context(&self) -> Option<&Context> {
        self.user_context.as_deref()
    }

    pub fn user_context_mut(&mut self) -> Option<&mut Context> {
        self.user_context.as_deref_mut()
    }

    /// Install the user-mode context. From now on the next resume restores
    /// it. Only the loader path calls this.
    pub(crate) fn adopt_user_context(&mut self, context: Context) {
        self.user_context = Some(Box::new(context));
        self.switch_to_userspace.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_loader(&mut self, loader: Loader) {
        self.loader = Some(loader);
    }

    pub fn loader(&self) -> Option<&Loader> {
        self.loader.as_ref()
    }

    /// Does the next resume restore the user-mode context?
    pub fn switches_to_userspace(&self) -> bool {
        self.switch_to_userspace.load(Ordering::SeqCst)
    }

    /// Select which context the next resume restores.
    ///
    /// Selecting userspace without a populated user context is refused.
    pub fn set_switch_to_userspace(&self, to_user: bool) -> bool {
        if to_user && self.user_context.is_none() {
            return false;
        }
        self.switch_to_userspace.store(to_user, Ordering::SeqCst);
        true
    }

    /// The context the switch path must restore next.
    pub fn resume_context_mut(&mut self) -> &mut Context {
        match (
            self.switch_to_userspace.load(Ordering::SeqCst),
            self.user_context.as_deref_mut(),
        ) {
            (true, Some(user_context)) => user_context,
            _ => &mut self.kernel_context,
        }
    }

    // === Stack ===

    pub fn stack(&self) -> &KernelStack {
        &self.stack
    }

    /// The stack's start pointer (its top; the stack grows downward).
    pub fn stack_start_pointer(&self) -> u64 {
        self.stack.top()
    }

    /// Non-fatal probe of the guard sentinel.
    pub fn check_canary(&self) -> Result<(), CanaryViolation> {
        if self.stack.canary_intact() {
            Ok(())
        } else {
            Err(CanaryViolation {
                thread: self.id,
                found: self.stack.canary(),
            })
        }
    }

    /// Validation pass over the guard sentinel. A mismatch means the stack
    /// overflowed: report and halt, never continue on corrupt memory.
    pub fn assert_canary(&self) {
        if let Err(violation) = self.check_canary() {
            kprintln!(
                "[THREAD] stack guard trampled on thread {} ({}): found {:#010x}, expected {:#010x}",
                self.id,
                self.name(),
                violation.found,
                STACK_CANARY
            );
            self.print_backtrace(true);
            panic!("stack overflow detected on thread {}", self.id);
        }
    }

    // === Diagnostics ===

    /// Recorded by a mutex when this thread blocks on it. Diagnostic only.
    pub fn note_blocked_on(&self, mutex: &MutexInfo) {
        self.blocked_on
            .store(mutex as *const MutexInfo as *mut MutexInfo, Ordering::SeqCst);
    }

    /// Cleared by the mutex on release, before the reference could go
    /// stale.
    pub fn clear_blocked_on(&self) {
        self.blocked_on
            .store(core::ptr::null_mut(), Ordering::SeqCst);
    }

    /// Name of the mutex this thread currently sleeps on, for deadlock
    /// reports.
    pub fn blocked_on_name(&self) -> Option<&'static str> {
        let info = self.blocked_on.load(Ordering::SeqCst);
        if info.is_null() {
            None
        } else {
            // SAFETY: the owning mutex clears this field on release and
            // before its own destruction, so a non-null value points at a
            // live MutexInfo.
            Some(unsafe { (*info).name() })
        }
    }

    /// Print the kernel-mode call chain.
    ///
    /// With `use_stored_registers` the walk starts from the saved kernel
    /// context; otherwise from the live frame pointer. Every step is
    /// bounds-checked against this thread's stack, so the walk stays safe
    /// even mid-fault.
    pub fn print_backtrace(&self, use_stored_registers: bool) {
        let (frame_pointer, instruction_pointer) = if use_stored_registers {
            (
                self.kernel_context.frame_pointer(),
                self.kernel_context.instruction_pointer(),
            )
        } else {
            (backtrace::live_frame_pointer(), 0)
        };

        kprintln!(
            "Backtrace of thread {} ({}), state {}:",
            self.id,
            self.name(),
            self.state()
        );
        if instruction_pointer != 0 {
            kprintln!("  at {:#018x}", instruction_pointer);
        }

        let frames = backtrace::walk_frames(
            self.stack.floor(),
            self.stack.top(),
            frame_pointer,
            &mut |frame| {
                kprintln!(
                    "  at {:#018x} (frame {:#018x})",
                    frame.return_address,
                    frame.frame_pointer
                );
            },
        );

        if frames == 0 {
            kprintln!("  <no frames within stack bounds>");
        }
    }

    /// Print the user-mode call chain from the saved user context, bounded
    /// by the loader's record of the user stack.
    pub fn print_user_backtrace(&self) {
        let Some(user_context) = self.user_context.as_deref() else {
            kprintln!("Thread {} ({}) has no user context", self.id, self.name());
            return;
        };

        kprintln!("User backtrace of thread {} ({}):", self.id, self.name());
        kprintln!("  at {:#018x}", user_context.instruction_pointer());

        if let Some(loader) = &self.loader {
            backtrace::walk_frames(
                loader.user_stack_low(),
                loader.user_stack_top(),
                user_context.frame_pointer(),
                &mut |frame| {
                    kprintln!(
                        "  at {:#018x} (frame {:#018x})",
                        frame.return_address,
                        frame.frame_pointer
                    );
                },
            );
        }
    }

    // === Shared context back-references ===

    /// The working-directory context shared with sibling threads.
    pub fn working_dir(&self) -> Arc<WorkingDir> {
        Arc::clone(&self.working_dir)
    }

    /// Replace the working-directory context wholesale. Sibling threads
    /// holding the old `Arc` keep a consistent snapshot; nobody can observe
    /// a half-updated path.
    pub fn set_working_dir(&mut self, working_dir: Arc<WorkingDir>) {
        self.working_dir = working_dir;
    }

    pub fn terminal(&self) -> Option<TerminalId> {
        self.terminal
    }

    pub fn set_terminal(&mut self, terminal: Option<TerminalId>) {
        self.terminal = terminal;
    }

    // === Scheduling accounting ===

    /// Record that this thread used a time slice
    pub fn record_time_slice(&self) {
        self.time_slices.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that this thread yielded
    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn time_slices(&self) -> u64 {
        self.time_slices.load(Ordering::Relaxed)
    }

    pub fn yields(&self) -> u64 {
        self.yields.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("jobs_scheduled", &self.jobs_scheduled())
            .field("jobs_done", &self.jobs_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::Path;
    use std::sync::Arc as StdArc;
    use std::time::{Duration, Instant};
    use std::vec::Vec;

    fn spin_forever() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// Poll `predicate` for up to two seconds.
    fn eventually(predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::yield_now();
        }
        false
    }

    #[test]
    fn unnamed_threads_get_the_placeholder() {
        let thread = Thread::new(None, spin_forever);
        assert_eq!(thread.name(), UNNAMED_THREAD);

        let named = Thread::new(Some("reaper"), spin_forever);
        assert_eq!(named.name(), "reaper");
    }

    #[test]
    fn ids_are_distinct() {
        let a = Thread::new(None, spin_forever);
        let b = Thread::new(None, spin_forever);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn default_working_dir_is_the_root() {
        let thread = Thread::new(None, spin_forever);
        assert_eq!(thread.working_dir().cwd().as_str(), "/");
    }

    #[test]
    fn working_dir_is_replaced_wholesale() {
        let shared = Arc::new(WorkingDir::new(Path::new("/var/log")));
        let mut thread =
            Thread::with_working_dir(Some("logger"), Arc::clone(&shared), spin_forever);
        assert_eq!(thread.working_dir().cwd().as_str(), "/var/log");

        thread.set_working_dir(Arc::new(WorkingDir::new(Path::new("/tmp"))));
        assert_eq!(thread.working_dir().cwd().as_str(), "/tmp");
        // the old context survives for its other holders
        assert_eq!(shared.cwd().as_str(), "/var/log");
    }

    #[test]
    fn terminal_is_plain_set_and_get() {
        let mut thread = Thread::new(None, spin_forever);
        assert_eq!(thread.terminal(), None);
        thread.set_terminal(Some(TerminalId(3)));
        assert_eq!(thread.terminal(), Some(TerminalId(3)));
    }

    #[test]
    fn initial_states_follow_the_kind() {
        let regular = Thread::new(None, spin_forever);
        assert_eq!(regular.state(), ThreadState::Running);

        let worker = Thread::new_worker(None, spin_forever);
        assert_eq!(worker.state(), ThreadState::Worker);
    }

    #[test]
    fn readiness_predicate_truth_table() {
        let regular = Thread::new(None, spin_forever);
        assert!(regular.is_schedulable());
        assert!(regular.sleep());
        assert!(!regular.is_schedulable());
        assert!(regular.wake());
        assert!(regular.is_schedulable());

        let worker = Thread::new_worker(None, spin_forever);
        assert!(!worker.is_schedulable()); // Worker without pending work
        worker.signal_job();
        assert!(worker.is_schedulable());
        worker.job_done();
        assert!(!worker.is_schedulable());

        worker.kill();
        worker.signal_job();
        assert!(!worker.is_schedulable()); // ToBeDestroyed is never dispatched
    }

    #[test]
    fn wake_restores_the_kind_state() {
        let worker = Thread::new_worker(None, spin_forever);
        assert!(worker.sleep());
        assert!(worker.wake());
        assert_eq!(worker.state(), ThreadState::Worker);

        let regular = Thread::new(None, spin_forever);
        assert!(regular.sleep());
        assert!(regular.wake());
        assert_eq!(regular.state(), ThreadState::Running);
    }

    #[test]
    fn counters_match_has_work_at_every_observation() {
        let worker = Thread::new_worker(None, spin_forever);

        for round in 0..100u64 {
            worker.signal_job();
            assert_eq!(
                worker.has_work(),
                worker.jobs_scheduled() > worker.jobs_done()
            );
            if round % 3 != 0 {
                worker.job_done();
            }
            assert_eq!(
                worker.has_work(),
                worker.jobs_scheduled() > worker.jobs_done()
            );
            assert!(worker.jobs_done() <= worker.jobs_scheduled());
        }
    }

    #[test]
    fn counters_never_regress_under_contention() {
        let worker = StdArc::new(Thread::new_worker(None, spin_forever));
        let mut handles = Vec::new();

        for _ in 0..2 {
            let producer = StdArc::clone(&worker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    producer.signal_job();
                }
            }));
        }

        let consumer = StdArc::clone(&worker);
        handles.push(std::thread::spawn(move || {
            let mut drained = 0;
            while drained < 2000 {
                if consumer.has_work() {
                    consumer.job_done();
                    drained += 1;
                }
            }
        }));

        let observer = StdArc::clone(&worker);
        handles.push(std::thread::spawn(move || {
            for _ in 0..10_000 {
                // done is read first: it can only lag the true value, and
                // scheduled only grows, so the relation must hold
                let done = observer.jobs_done();
                let scheduled = observer.jobs_scheduled();
                assert!(done <= scheduled);
            }
        }));

        for handle in handles {
            handle.join().expect("test thread panicked");
        }

        assert_eq!(worker.jobs_scheduled(), 2000);
        assert_eq!(worker.jobs_done(), 2000);
        assert!(!worker.has_work());
    }

    #[test]
    fn kill_is_idempotent() {
        let thread = Thread::new(None, spin_forever);
        thread.kill();
        assert_eq!(thread.state(), ThreadState::ToBeDestroyed);
        thread.kill();
        thread.kill();
        assert_eq!(thread.state(), ThreadState::ToBeDestroyed);
        assert!(thread.is_reclaimable());
    }

    #[test]
    fn concurrent_kills_converge() {
        let thread = StdArc::new(Thread::new(None, spin_forever));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let victim = StdArc::clone(&thread);
            handles.push(std::thread::spawn(move || victim.kill()));
        }
        for handle in handles {
            handle.join().expect("test thread panicked");
        }
        assert_eq!(thread.state(), ThreadState::ToBeDestroyed);
    }

    #[test]
    fn a_killed_thread_is_never_resurrected() {
        let thread = Thread::new(None, spin_forever);
        thread.kill();
        assert!(!thread.wake());
        assert!(!thread.sleep());
        assert_eq!(thread.state(), ThreadState::ToBeDestroyed);
    }

    #[test]
    fn kill_performs_no_allocation() {
        let thread = Thread::new(None, spin_forever);

        // simulated interrupt context: same thread, and we account every
        // heap allocation it performs across the call
        let before = crate::test_support::allocations_on_this_thread();
        thread.kill();
        let after = crate::test_support::allocations_on_this_thread();

        assert_eq!(before, after, "kill() must not allocate");
        assert_eq!(thread.state(), ThreadState::ToBeDestroyed);
    }

    #[test]
    fn kill_clears_the_diagnostic_back_reference() {
        let thread = Thread::new(None, spin_forever);
        let info = MutexInfo::new("victim-lock");
        thread.note_blocked_on(&info);
        assert_eq!(thread.blocked_on_name(), Some("victim-lock"));

        thread.kill();
        assert_eq!(thread.blocked_on_name(), None);
    }

    #[test]
    fn wait_returns_immediately_with_pending_work() {
        let worker = Thread::new_worker(None, spin_forever);
        worker.signal_job();
        worker.wait_for_next_job(); // must not park
        assert_eq!(worker.state(), ThreadState::Worker);
    }

    #[test]
    fn wait_returns_immediately_when_killed() {
        let worker = Thread::new_worker(None, spin_forever);
        worker.kill();
        worker.wait_for_next_job(); // a parked victim must drain out
        assert_eq!(worker.state(), ThreadState::ToBeDestroyed);
    }

    #[test]
    fn worker_sleeps_on_an_empty_queue_and_wakes_on_a_signal() {
        let worker = StdArc::new(Thread::new_worker(Some("pool-0"), spin_forever));

        let consumer = StdArc::clone(&worker);
        let handle = std::thread::spawn(move || {
            consumer.wait_for_next_job();
            consumer.job_done();
        });

        // empty queue: the consumer must park itself
        assert!(
            eventually(|| worker.state() == ThreadState::Sleeping),
            "worker never went to sleep on an empty queue"
        );
        assert!(!worker.is_schedulable());

        // a signal makes it dispatchable again and the job gets drained
        worker.signal_job();
        assert!(
            eventually(|| worker.jobs_done() == 1),
            "worker never completed the signalled job"
        );
        handle.join().expect("consumer panicked");

        assert!(!worker.has_work());
        assert_eq!(worker.state(), ThreadState::Worker);
    }

    #[test]
    fn no_wakeup_is_lost_between_producers_and_one_consumer() {
        const PRODUCERS: usize = 8;

        let worker = StdArc::new(Thread::new_worker(Some("pool-1"), spin_forever));

        let consumer = StdArc::clone(&worker);
        let consumer_handle = std::thread::spawn(move || {
            let mut wakeups = 0;
            for _ in 0..PRODUCERS {
                consumer.wait_for_next_job();
                consumer.job_done();
                wakeups += 1;
            }
            wakeups
        });

        let mut producers = Vec::new();
        for _ in 0..PRODUCERS {
            let producer = StdArc::clone(&worker);
            producers.push(std::thread::spawn(move || producer.signal_job()));
        }
        for producer in producers {
            producer.join().expect("producer panicked");
        }

        let wakeups = consumer_handle.join().expect("consumer panicked");
        assert_eq!(wakeups, PRODUCERS);
        assert_eq!(worker.jobs_scheduled(), PRODUCERS as u64);
        assert_eq!(worker.jobs_done(), PRODUCERS as u64);
        assert!(!worker.has_work());
    }

    #[test]
    fn canary_is_the_fixed_constant_until_corrupted() {
        let thread = Thread::new(None, spin_forever);
        assert_eq!(thread.stack().canary(), STACK_CANARY);
        assert_eq!(thread.check_canary(), Ok(()));

        thread.stack().corrupt_canary_for_test();
        let violation = thread.check_canary().expect_err("corruption went undetected");
        assert_eq!(violation.thread, thread.id());
        assert_ne!(violation.found, STACK_CANARY);
    }

    #[test]
    fn stack_start_pointer_is_the_stack_top() {
        let thread = Thread::new(None, spin_forever);
        assert_eq!(thread.stack_start_pointer(), thread.stack().top());
        assert!(thread.stack().contains(thread.stack_start_pointer() - 8));
    }

    #[test]
    fn resume_context_follows_the_userspace_switch() {
        let mut thread = Thread::new(Some("init"), spin_forever);
        assert!(!thread.switches_to_userspace());

        // without a user context the switch is refused
        assert!(!thread.set_switch_to_userspace(true));

        let kernel_rip = thread.kernel_context().instruction_pointer();
        assert_eq!(thread.resume_context_mut().instruction_pointer(), kernel_rip);

        crate::loader::Loader::new(0x40_0000, 0x7000_0000, 0x7001_0000, 0xABC000)
            .launch(&mut thread);
        assert!(thread.switches_to_userspace());
        assert_eq!(thread.resume_context_mut().instruction_pointer(), 0x40_0000);

        // back to kernel mode for a syscall: the kernel context is intact
        assert!(thread.set_switch_to_userspace(false));
        assert_eq!(thread.resume_context_mut().instruction_pointer(), kernel_rip);
    }

    #[test]
    fn backtrace_printing_survives_garbage_registers() {
        let mut thread = Thread::new(Some("faulty"), spin_forever);
        // mid-fault: saved frame pointer is garbage
        thread.kernel_context_mut().rbp = 0xFFFF_FFFF_DEAD_0000;
        thread.print_backtrace(true);

        let output = crate::klog::captured_output();
        assert!(output.contains("Backtrace of thread"));
        assert!(output.contains("<no frames within stack bounds>"));
    }

    #[test]
    fn user_backtrace_requires_a_user_context() {
        let thread = Thread::new(Some("plain"), spin_forever);
        thread.print_user_backtrace();
        assert!(crate::klog::captured_output().contains("has no user context"));
    }

    #[test]
    fn scheduling_accounting_is_monotonic() {
        let thread = Thread::new(None, spin_forever);
        thread.record_time_slice();
        thread.record_time_slice();
        thread.record_yield();
        assert_eq!(thread.time_slices(), 2);
        assert_eq!(thread.yields(), 1);
    }
}
