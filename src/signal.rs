//! SIGINT/SIGTERM handling. The first signal only flips an atomic; a watcher
//! thread forwards it to the run's [`CancelToken`]. A second signal exits at
//! once with status 130, without saving.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::job_manager::CancelToken;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Marks `flag` and reports whether it was already set.
#[cfg_attr(not(unix), allow(dead_code))]
fn note_interrupt(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn on_signal(_signal: nix::libc::c_int) {
    if note_interrupt(&INTERRUPTED) {
        // `_exit` is async-signal-safe; nothing else runs here.
        unsafe { nix::libc::_exit(130) };
    }
}

#[cfg(unix)]
fn install_handlers() -> Result<(), String> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // The handler touches nothing but an atomic and `_exit`.
    unsafe {
        sigaction(Signal::SIGINT, &action).map_err(|e| format!("SIGINT: {}", e))?;
        sigaction(Signal::SIGTERM, &action).map_err(|e| format!("SIGTERM: {}", e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn install_handlers() -> Result<(), String> {
    Err("signal handling is only supported on unix".to_string())
}

/// Installs the handlers and starts a detached watcher that cancels `token`
/// on the first interrupt. Must run before worker threads are spawned.
pub fn cancel_on_interrupt(token: CancelToken) {
    if let Err(e) = install_handlers() {
        warn!("Interrupts will not checkpoint before exit: {}", e);
        return;
    }
    thread::spawn(move || loop {
        if interrupted() {
            info!("Interrupt received. Finishing in-flight lookups, then saving (interrupt again to quit now)...");
            token.cancel();
            return;
        }
        if token.is_cancelled() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    });
}
