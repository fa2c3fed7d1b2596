//! Unix signal handling (SIGINT).
//!
//! The first ^C only sets a flag: the executor stops dispatching and lets
//! running actions return on their own.  SA_RESETHAND restores the default
//! disposition, so a second ^C kills the process outright.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

#[cfg(unix)]
pub fn install() {
    // Safety: registering a signal handler is libc unsafe code.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_sigint as libc::sighandler_t;
        sa.sa_flags = libc::SA_RESETHAND;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
pub fn install() {}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}
