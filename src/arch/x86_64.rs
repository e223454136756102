//! x86-64 saved register state.
//!
//! The layout matches what the switch and interrupt-return paths expect:
//! callee-saved registers first, then the scratch registers, then the
//! IRETQ-shaped tail (RIP, CS, RFLAGS, RSP, SS) and the address-space root.

use super::RegisterContext;

/// Kernel code segment selector (GDT index 1, ring 0)
const KERNEL_CS: u64 = 0x08;
/// Kernel data segment selector (GDT index 2, ring 0)
const KERNEL_SS: u64 = 0x10;
/// User code segment selector (GDT index 4) | RPL=3
const USER_CS: u64 = 0x20 | 3;
/// User data segment selector (GDT index 3) | RPL=3
const USER_SS: u64 = 0x18 | 3;
/// RFLAGS with the interrupt-enable flag set
const RFLAGS_IF: u64 = 0x202;

/// The complete saved state of one execution mode of one thread.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    // General purpose registers (callee-saved)
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,

    // Additional general purpose registers
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,

    // Special registers
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
    /// Page table base (physical address); 0 means "use the kernel's".
    pub cr3: u64,
}

impl Context {
    /// A context with every register zeroed.
    pub const fn zeroed() -> Self {
        Context {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rax: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
            cr3: 0,
        }
    }
}

impl RegisterContext for Context {
    fn kernel_entry(entry: u64, stack_top: u64) -> Self {
        Context {
            rip: entry,
            cs: KERNEL_CS,
            rflags: RFLAGS_IF,
            // RSP must be misaligned by 8 on entry, as if a call
            // instruction had just pushed a return address
            rsp: stack_top - 8,
            ss: KERNEL_SS,
            cr3: 0,
            ..Context::zeroed()
        }
    }

    fn user_entry(entry: u64, user_stack_top: u64, page_table_phys: u64) -> Self {
        Context {
            rip: entry,
            cs: USER_CS,
            rflags: RFLAGS_IF,
            // IRETQ requires a 16-byte aligned user stack
            rsp: user_stack_top,
            ss: USER_SS,
            cr3: page_table_phys,
            ..Context::zeroed()
        }
    }

    fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    fn stack_pointer(&self) -> u64 {
        self.rsp
    }

    fn frame_pointer(&self) -> u64 {
        self.rbp
    }
}
