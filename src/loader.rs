//! # The Program Loader Record
//!
//! What a thread remembers about the user program it runs: the entry
//! point, the user stack's extent, and the physical root of the address
//! space. Loading itself (parsing the image, mapping segments) happens
//! elsewhere; this record is the association the thread keeps so the
//! switch path and the user backtrace walker know where userspace lives.

use crate::arch::{Context, RegisterContext};
use crate::threading::Thread;

/// A thread's association with its user program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loader {
    entry_point: u64,
    user_stack_low: u64,
    user_stack_top: u64,
    page_table_phys: u64,
}

impl Loader {
    pub fn new(
        entry_point: u64,
        user_stack_low: u64,
        user_stack_top: u64,
        page_table_phys: u64,
    ) -> Self {
        Self {
            entry_point,
            user_stack_low,
            user_stack_top,
            page_table_phys,
        }
    }

    pub fn entry_point(&self) -> u64 {
        self.entry_point
    }

    /// Lowest address of the user stack region.
    pub fn user_stack_low(&self) -> u64 {
        self.user_stack_low
    }

    /// One past the highest address of the user stack region; the user
    /// stack grows downward from here.
    pub fn user_stack_top(&self) -> u64 {
        self.user_stack_top
    }

    /// Physical address of the program's page table root.
    pub fn page_table_phys(&self) -> u64 {
        self.page_table_phys
    }

    /// Is `addr` within the user stack region?
    pub fn user_stack_contains(&self, addr: u64) -> bool {
        addr >= self.user_stack_low && addr < self.user_stack_top
    }

    /// Attach this program to `thread`: build its user-mode register
    /// context, install it, and flip the thread to resume in userspace.
    pub fn launch(self, thread: &mut Thread) {
        let context = Context::user_entry(self.entry_point, self.user_stack_top, self.page_table_phys);
        thread.adopt_user_context(context);
        thread.set_loader(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin_forever() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn records_the_program_geometry() {
        let loader = Loader::new(0x40_0000, 0x7000_0000, 0x7001_0000, 0xABC000);
        assert_eq!(loader.entry_point(), 0x40_0000);
        assert_eq!(loader.user_stack_low(), 0x7000_0000);
        assert_eq!(loader.user_stack_top(), 0x7001_0000);
        assert_eq!(loader.page_table_phys(), 0xABC000);
    }

    #[test]
    fn user_stack_bounds_are_half_open() {
        let loader = Loader::new(0, 0x7000_0000, 0x7001_0000, 0);
        assert!(!loader.user_stack_contains(0x7000_0000 - 1));
        assert!(loader.user_stack_contains(0x7000_0000));
        assert!(loader.user_stack_contains(0x7001_0000 - 8));
        assert!(!loader.user_stack_contains(0x7001_0000));
    }

    #[test]
    fn launch_installs_the_user_context() {
        let mut thread = Thread::new(Some("shell"), spin_forever);
        assert!(thread.user_context().is_none());
        assert!(thread.loader().is_none());

        Loader::new(0x40_0000, 0x7000_0000, 0x7001_0000, 0xABC000).launch(&mut thread);

        let user_context = thread.user_context().expect("no user context installed");
        assert_eq!(user_context.instruction_pointer(), 0x40_0000);
        assert_eq!(user_context.stack_pointer(), 0x7001_0000);
        assert_eq!(user_context.cr3, 0xABC000);
        assert!(thread.switches_to_userspace());
        assert_eq!(thread.loader().map(|l| l.entry_point()), Some(0x40_0000));
    }
}
