//! Interrupt handling for long-running drivers
//!
//! Handlers only record the signal number. Drivers poll the flag between
//! test cases and between test programs, never while a tester runs.

use crate::{Error, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

static PENDING: AtomicI32 = AtomicI32::new(0);

const INTERRUPT_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM];

extern "C" fn record_interrupt(signo: c_int) {
    PENDING.store(signo, Ordering::SeqCst);
}

/// Install handlers for SIGHUP, SIGINT and SIGTERM
pub fn install_interrupt_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in INTERRUPT_SIGNALS {
        // SAFETY: the handler only stores into an atomic.
        unsafe { sigaction(signal, &action) }.map_err(|e| Error::Io(e.into()))?;
    }
    debug!("Installed interrupt handlers");
    Ok(())
}

/// Signal received since handlers were installed, if any
pub fn pending_interrupt() -> Option<i32> {
    match PENDING.load(Ordering::SeqCst) {
        0 => None,
        signo => Some(signo),
    }
}

/// Fail with [`Error::Interrupted`] if a signal has arrived
pub fn check_interrupt() -> Result<()> {
    match pending_interrupt() {
        Some(signo) => Err(Error::Interrupted(signo)),
        None => Ok(()),
    }
}

/// Forget any recorded signal
pub fn clear_interrupt() {
    PENDING.store(0, Ordering::SeqCst);
}

#[cfg(test)]
pub(crate) fn simulate_interrupt(signo: i32) {
    PENDING.store(signo, Ordering::SeqCst);
}

/// Serializes unit tests that raise or depend on the interrupt flag
#[cfg(test)]
pub(crate) static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
