// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! System V x86_64 register swap.
//!
//! Suspended frame, lowest address first:
//! `mxcsr|fcw, r15, r14, r13, r12, rbx, rbp, return address`.

use std::arch::naked_asm;
use std::ptr::NonNull;

use super::Entry;

/// MXCSR (all exceptions masked) in the low half, x87 control word above.
const DEFAULT_FPU_CONTROL: usize = 0x1F80 | (0x037F << 32);

/// Build the frame `switch` expects so that restoring it lands in
/// `bootstrap` with `arg` in r12 and `entry` in r13.
pub(super) unsafe fn prepare(top: *mut u8, entry: Entry, arg: *mut ()) -> NonNull<u8> {
    let top = (top as usize & !15) as *mut usize;
    // Two zero words above the return slot: `ret` leaves rsp 16-byte
    // aligned for the call in `bootstrap`, and the null word ends
    // frame-pointer walks.
    let frame: [usize; 10] = [
        DEFAULT_FPU_CONTROL,
        0,                  // r15
        0,                  // r14
        entry as usize,     // r13
        arg as usize,       // r12
        0,                  // rbx
        0,                  // rbp
        bootstrap as unsafe extern "C" fn() as usize,
        0,
        0,
    ];
    let sp = top.sub(frame.len());
    sp.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
    NonNull::new_unchecked(sp.cast())
}

/// First code a fresh stack runs.
#[unsafe(naked)]
unsafe extern "C" fn bootstrap() {
    naked_asm!(
        "mov rdi, r12",
        "call r13",
        // `entry` never returns.
        "ud2",
    )
}

/// Push callee-saved state, store rsp into `*save`, load `to`, pop.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch(save: *mut *mut u8, to: *mut u8) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 4]",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}
