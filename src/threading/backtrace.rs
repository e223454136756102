//! # Call-Chain Recovery
//!
//! Walks a frame-pointer chain out of saved or live register state into a
//! human-readable call chain. This is an observability aid that has to work
//! when little else does: a thread may be mid-fault with a half-consistent
//! stack, so every dereference is bounds-checked against the owning stack
//! region first, the chain must move strictly toward the stack top, and the
//! walk is depth-capped.

/// Upper bound on frames visited per walk.
pub const MAX_FRAMES: usize = 64;

/// One recovered stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub frame_pointer: u64,
    pub return_address: u64,
}

/// Walk a frame-pointer chain confined to `[low, high)`.
///
/// Starting from `frame_pointer`, each frame is expected to hold the next
/// frame pointer at offset 0 and the return address at offset 8. The walk
/// stops on a null or misaligned pointer, on anything outside the bounds,
/// on a zero return address, or when the chain fails to move upward.
///
/// Returns the number of frames visited.
pub fn walk_frames(low: u64, high: u64, frame_pointer: u64, visit: &mut dyn FnMut(Frame)) -> usize {
    let mut current = frame_pointer;
    let mut frames = 0;

    while frames < MAX_FRAMES {
        if current == 0 || current & 0x7 != 0 {
            break;
        }
        if current < low || current.saturating_add(16) > high {
            break;
        }

        // SAFETY: `current` is 8-aligned and both words lie inside the
        // caller-supplied stack region.
        let next = unsafe { core::ptr::read_volatile(current as *const u64) };
        let return_address = unsafe { core::ptr::read_volatile((current + 8) as *const u64) };

        if return_address == 0 {
            break;
        }

        visit(Frame {
            frame_pointer: current,
            return_address,
        });
        frames += 1;

        // the chain must move toward the stack top, or it is cyclic garbage
        if next <= current {
            break;
        }
        current = next;
    }

    frames
}

/// Frame pointer of the currently executing code.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn live_frame_pointer() -> u64 {
    let frame_pointer: u64;
    unsafe {
        core::arch::asm!(
            "mov {}, rbp",
            out(reg) frame_pointer,
            options(nomem, nostack, preserves_flags)
        );
    }
    frame_pointer
}

#[cfg(not(target_arch = "x86_64"))]
pub fn live_frame_pointer() -> u64 {
    0
}
