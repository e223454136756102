//! # The Blocking Mutex
//!
//! A sleeping lock for contended kernel resources. An uncontended acquire
//! is one atomic swap; a contended acquire records the thread in the wait
//! queue, marks it Sleeping, and yields until the holder releases. While a
//! thread waits, the mutex writes itself into the thread's diagnostic
//! back-reference, so a hung system can report who waits on what.
//!
//! The wait queue orders wake-ups; it does not hand off ownership. A woken
//! thread re-competes for the lock, which keeps the release path to a drain
//! and a store.
//!
//! Waiter pointers are only ever touched under the queue lock. A thread
//! cannot leave `lock` while it is still queued without taking that lock
//! itself (to remove its entry), so the release drain never sees a pointer
//! to a thread that has moved on.

use alloc::collections::VecDeque;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use super::thread::{Thread, ThreadState};
use crate::kprintln;

/// The identity a mutex exposes for diagnostics.
///
/// Waiting threads hold a pointer to this, never to the mutex's data, so
/// the back-reference carries no access rights.
#[derive(Debug)]
pub struct MutexInfo {
    name: &'static str,
}

impl MutexInfo {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A named, blocking mutual-exclusion lock.
pub struct WaitMutex<T> {
    info: MutexInfo,
    locked: AtomicBool,
    waiters: spin::Mutex<VecDeque<NonNull<Thread>>>,
    data: UnsafeCell<T>,
}

// Safety: `data` is handed out only through the guard, which requires
// holding the lock; the waiter pointers are dereferenced only under the
// `waiters` lock, while their threads are still inside `lock` below.
unsafe impl<T: Send> Send for WaitMutex<T> {}
unsafe impl<T: Send> Sync for WaitMutex<T> {}

impl<T> WaitMutex<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            info: MutexInfo::new(name),
            locked: AtomicBool::new(false),
            waiters: spin::Mutex::new(VecDeque::new()),
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.info.name()
    }

    fn try_acquire(&self) -> bool {
        !self.locked.swap(true, Ordering::SeqCst)
    }

    /// Acquire without blocking.
    pub fn try_lock(&self) -> Option<WaitMutexGuard<'_, T>> {
        if self.try_acquire() {
            Some(WaitMutexGuard { mutex: self })
        } else {
            None
        }
    }

    fn enqueue(&self, thread: &Thread) {
        self.waiters.lock().push_back(NonNull::from(thread));
    }

    fn remove_waiter(&self, thread: &Thread) {
        let target = NonNull::from(thread);
        self.waiters.lock().retain(|waiter| *waiter != target);
    }

    /// Acquire the lock on behalf of `current`, sleeping while contended.
    ///
    /// `current` must be the thread executing this call: it is the thread
    /// that gets marked Sleeping and recorded in the wait queue. Every
    /// commit to sleep is bracketed by a fresh acquire attempt, so a
    /// release that races the enqueue or the state transition cannot leave
    /// the waiter parked with the lock free.
    ///
    /// Returns `None` if `current` is marked for destruction: a doomed
    /// thread never acquires, leaves the queue, and lets its caller unwind
    /// toward the reclamation pass.
    pub fn lock<'a>(&'a self, current: &Thread) -> Option<WaitMutexGuard<'a, T>> {
        loop {
            if current.state() == ThreadState::ToBeDestroyed {
                self.remove_waiter(current);
                current.clear_blocked_on();
                return None;
            }

            if self.try_acquire() {
                break;
            }

            current.note_blocked_on(&self.info);
            self.enqueue(current);

            // the holder may have released between the failed acquire and
            // the enqueue
            if self.try_acquire() {
                self.remove_waiter(current);
                break;
            }

            current.sleep();

            // or between the enqueue and the sleep transition
            if self.try_acquire() {
                let _ = current.wake();
                self.remove_waiter(current);
                break;
            }

            super::yield_now();

            self.remove_waiter(current);
            let _ = current.wake();
        }

        current.clear_blocked_on();
        Some(WaitMutexGuard { mutex: self })
    }

    /// Remove `thread` from the wait queue without waking it.
    ///
    /// For the reclamation pass: a thread killed while parked here is never
    /// scheduled again and cannot remove itself, so whoever frees it must
    /// purge it from every lock's queue first.
    pub fn purge_waiter(&self, thread: &Thread) {
        self.remove_waiter(thread);
    }

    fn release(&self) {
        // unlock before waking: a woken waiter re-competes immediately and
        // must be able to win
        self.locked.store(false, Ordering::SeqCst);

        // drain while holding the queue lock: a queued thread can only
        // leave `lock` through its own `remove_waiter`, which blocks on
        // this lock until the drain is done
        let mut waiters = self.waiters.lock();
        while let Some(waiter) = waiters.pop_front() {
            // SAFETY: the thread behind this pointer is still inside
            // `lock` - it cannot return (let alone be freed, or block on
            // some other mutex) before it removes itself under the queue
            // lock held here.
            let thread = unsafe { waiter.as_ref() };
            thread.clear_blocked_on();
            let _ = thread.wake();
        }
    }
}

/// Exclusive access to the protected data; releases the lock on drop.
pub struct WaitMutexGuard<'a, T> {
    mutex: &'a WaitMutex<T>,
}

impl<T> Deref for WaitMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while `locked` is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for WaitMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and the guard is exclusive.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for WaitMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

/// Report which lock each of the given threads is waiting on.
///
/// This is the hung-system diagnostic: run it over the thread table and the
/// wait chains (and any cycle among them) become visible in the log.
pub fn print_wait_chains(threads: &[&Thread]) {
    kprintln!("Lock wait chains:");
    for thread in threads {
        match thread.blocked_on_name() {
            Some(lock_name) => kprintln!(
                "  thread {} ({}) [{}] waits on '{}'",
                thread.id(),
                thread.name(),
                thread.state(),
                lock_name
            ),
            None => kprintln!(
                "  thread {} ({}) [{}] is not blocked",
                thread.id(),
                thread.name(),
                thread.state()
            ),
        }
    }
}
