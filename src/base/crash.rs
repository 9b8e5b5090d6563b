//! Process-wide crash reporting
//!
//! Installs a panic hook that prints the failure and a backtrace to stderr,
//! then aborts the process. Intended for binaries embedding the receive path:
//! an invariant violation on the network loop thread must take the whole
//! process down rather than leave the other threads running on corrupt state.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::io::Write as _;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

static INSTALLED: AtomicBool = AtomicBool::new(false);

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// RAII guard for the crash panic hook.
///
/// Only one handler may be active at a time. Dropping it puts back the hook
/// that was active when it was installed.
pub struct CrashHandler {
    previous: Option<PanicHook>,
}

impl CrashHandler {
    /// Install the crash hook. Returns `None` if a handler is already active.
    pub fn install() -> Option<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return None;
        }

        let previous = panic::take_hook();

        panic::set_hook(Box::new(|info| {
            let message = panic_message(info.payload());
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_default();

            let report = format_report(message, &location, &Backtrace::force_capture());

            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(report.as_bytes());
            let _ = stderr.flush();

            std::process::abort();
        }));

        Some(Self {
            previous: Some(previous),
        })
    }

    /// Whether a handler is currently installed.
    pub fn is_installed() -> bool {
        INSTALLED.load(Ordering::SeqCst)
    }
}

impl Drop for CrashHandler {
    fn drop(&mut self) {
        // Hooks can't be swapped while unwinding.
        if !thread::panicking() {
            if let Some(previous) = self.previous.take() {
                panic::set_hook(previous);
            }
        }
        INSTALLED.store(false, Ordering::SeqCst);
    }
}

/// Extract the human-readable part of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn format_report(message: &str, location: &str, backtrace: &Backtrace) -> String {
    let mut report = String::new();
    let _ = write!(report, "\nERROR: {}", message);
    if !location.is_empty() {
        let _ = write!(report, " ({})", location);
    }
    let _ = write!(report, "\n\nBacktrace:\n{}\n", backtrace);
    report
}
