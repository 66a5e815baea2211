//! Signal handling
//!
//! SIGHUP, SIGINT, SIGUSR1, and SIGTERM are blocked process-wide at startup
//! and only delivered inside the event loop's `epoll_pwait`, which runs with
//! an empty mask, or during the cooldown window. The handlers do nothing but
//! bump atomic counters; the loop consumes them with [`check`]. A second
//! SIGINT or SIGTERM arriving before the first was consumed aborts the
//! process from the handler.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{info, warn};

use eapold_core::{Error, Result};

static SIG_HUP: AtomicU32 = AtomicU32::new(0);
static SIG_INT: AtomicU32 = AtomicU32::new(0);
static SIG_USR1: AtomicU32 = AtomicU32::new(0);
static SIG_TERM: AtomicU32 = AtomicU32::new(0);

const HANDLED: [libc::c_int; 4] = [libc::SIGHUP, libc::SIGINT, libc::SIGUSR1, libc::SIGTERM];

extern "C" fn handler(sig: libc::c_int) {
    match sig {
        libc::SIGHUP => {
            SIG_HUP.fetch_add(1, Ordering::Relaxed);
        }
        libc::SIGINT => {
            if SIG_INT.fetch_add(1, Ordering::Relaxed) >= 1 {
                unsafe { libc::abort() };
            }
        }
        libc::SIGUSR1 => {
            SIG_USR1.fetch_add(1, Ordering::Relaxed);
        }
        libc::SIGTERM => {
            if SIG_TERM.fetch_add(1, Ordering::Relaxed) >= 1 {
                unsafe { libc::abort() };
            }
        }
        _ => {}
    }
}

fn handled_sigset() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in HANDLED {
            libc::sigaddset(&mut set, sig);
        }
        set
    }
}

/// An empty signal mask, for `epoll_pwait`
pub fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        set
    }
}

/// Block the handled signals and install the counting handlers.
/// Must run before any other thread could be spawned.
pub fn install() -> Result<()> {
    unsafe {
        let set = handled_sigset();
        if libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) == -1 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let mut sa: libc::sigaction = std::mem::zeroed();
        let h: extern "C" fn(libc::c_int) = handler;
        sa.sa_sigaction = h as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in HANDLED {
            if libc::sigaction(sig, &sa, std::ptr::null_mut()) == -1 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
        }
    }
    Ok(())
}

/// Unblock the handled signals (cooldown window)
pub fn unblock() {
    let set = handled_sigset();
    unsafe {
        libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
    }
}

/// Re-block the handled signals after the cooldown window
pub fn block() {
    let set = handled_sigset();
    unsafe {
        libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

/// Consume pending signal counters. Returns true when the proxy should shut
/// down (SIGINT or SIGTERM was received).
pub fn check() -> bool {
    let mut shutdown = false;
    if take(&SIG_HUP) {
        info!("received SIGHUP");
    }
    if take(&SIG_INT) {
        warn!("exiting on SIGINT");
        shutdown = true;
    }
    if take(&SIG_USR1) {
        info!("received SIGUSR1");
    }
    if take(&SIG_TERM) {
        warn!("exiting on SIGTERM");
        shutdown = true;
    }
    shutdown
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
        .is_ok()
}
