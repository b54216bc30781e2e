// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! AAPCS64 register swap.
//!
//! Suspended frame (160 bytes), lowest address first:
//! `x19..x28, x29 (fp), x30 (lr), d8..d15`.

use std::arch::naked_asm;
use std::ptr::NonNull;

use super::Entry;

const FRAME_WORDS: usize = 20;

/// Build the frame `switch` expects so that restoring it returns into
/// `bootstrap` with `arg` in x19 and `entry` in x20.
pub(super) unsafe fn prepare(top: *mut u8, entry: Entry, arg: *mut ()) -> NonNull<u8> {
    let top = (top as usize & !15) as *mut usize;
    let mut frame = [0usize; FRAME_WORDS];
    frame[0] = arg as usize; // x19
    frame[1] = entry as usize; // x20
    frame[11] = bootstrap as unsafe extern "C" fn() as usize; // x30, x29 stays null
    let sp = top.sub(FRAME_WORDS);
    sp.copy_from_nonoverlapping(frame.as_ptr(), FRAME_WORDS);
    NonNull::new_unchecked(sp.cast())
}

/// First code a fresh stack runs.
#[unsafe(naked)]
unsafe extern "C" fn bootstrap() {
    naked_asm!(
        "mov x0, x19",
        "blr x20",
        // `entry` never returns.
        "brk #0x1",
    )
}

/// Store callee-saved state below sp, save sp into `*save`, load `to`.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch(save: *mut *mut u8, to: *mut u8) {
    naked_asm!(
        "sub sp, sp, #160",
        "stp x19, x20, [sp, #0]",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "stp d8, d9, [sp, #96]",
        "stp d10, d11, [sp, #112]",
        "stp d12, d13, [sp, #128]",
        "stp d14, d15, [sp, #144]",
        "mov x2, sp",
        "str x2, [x0]",
        "mov sp, x1",
        "ldp x19, x20, [sp, #0]",
        "ldp x21, x22, [sp, #16]",
        "ldp x23, x24, [sp, #32]",
        "ldp x25, x26, [sp, #48]",
        "ldp x27, x28, [sp, #64]",
        "ldp x29, x30, [sp, #80]",
        "ldp d8, d9, [sp, #96]",
        "ldp d10, d11, [sp, #112]",
        "ldp d12, d13, [sp, #128]",
        "ldp d14, d15, [sp, #144]",
        "add sp, sp, #160",
        "ret",
    )
}
