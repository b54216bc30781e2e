// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Signal flags.
//!
//! Handlers only store into atomics. They are installed without
//! `SA_RESTART`, so a signal interrupts `epoll_wait` and the event loop
//! notices the flag on its next turn.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static STOP: AtomicBool = AtomicBool::new(false);
static DUMP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(signo: libc::c_int) {
    match signo {
        libc::SIGINT | libc::SIGTERM => STOP.store(true, Ordering::Release),
        libc::SIGQUIT => DUMP.store(true, Ordering::Release),
        _ => {}
    }
}

/// SIGINT/SIGTERM request shutdown, SIGQUIT requests a diagnostic dump,
/// SIGPIPE is ignored so a vanished client surfaces as EPIPE.
pub fn install() -> io::Result<()> {
    for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT] {
        set_handler(signo, on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t)?;
    }
    set_handler(libc::SIGPIPE, libc::SIG_IGN)
}

fn set_handler(signo: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signo, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn stop_requested() -> bool {
    STOP.load(Ordering::Acquire)
}

/// True once per SIGQUIT received.
pub fn take_dump_request() -> bool {
    DUMP.swap(false, Ordering::AcqRel)
}
