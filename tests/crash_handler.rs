//! Crash handler installation, in its own process: while the handler is
//! active any panic aborts, so nothing else may run next to it.

use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use roc_netio_rx::CrashHandler;

#[test]
fn test_previous_hook_restored() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    panic::set_hook(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let handler = CrashHandler::install().expect("no handler installed yet");
    assert!(CrashHandler::is_installed());
    assert!(CrashHandler::install().is_none());

    drop(handler);
    assert!(!CrashHandler::is_installed());

    let result = panic::catch_unwind(|| panic!("after the crash handler"));
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let _ = panic::take_hook();
}
