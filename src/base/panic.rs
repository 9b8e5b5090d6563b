//! Unrecoverable invariant violations
//!
//! A broken reference count or an OS read larger than the buffer it was
//! given means memory shared with the pools can no longer be trusted. Such
//! conditions are reported through [`fatal!`](crate::fatal) rather than an
//! [`Error`](crate::Error): the message and a backtrace are logged, then the
//! current thread panics. Release builds abort on panic, and an installed
//! [`CrashHandler`](crate::base::CrashHandler) aborts in any build.

use std::backtrace::Backtrace;
use std::fmt;

/// Report an invariant violation and never return.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::base::panic::fatal(::std::format_args!($($arg)+))
    };
}

/// Report an invariant violation if the condition holds.
#[macro_export]
macro_rules! fatal_if {
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            $crate::fatal!($($arg)+);
        }
    };
}

/// Backing function for [`fatal!`](crate::fatal).
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(args: fmt::Arguments<'_>) -> ! {
    let message = fmt::format(args);
    let backtrace = Backtrace::force_capture();

    tracing::error!("{}\n\nBacktrace:\n{}", message, backtrace);

    panic!("{}", message);
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "bad refcount: 3")]
    fn test_fatal_panics_with_message() {
        crate::fatal!("bad refcount: {}", 3);
    }

    #[test]
    fn test_fatal_if_false_is_noop() {
        crate::fatal_if!(1 + 1 == 3, "arithmetic broke");
    }

    #[test]
    #[should_panic(expected = "size 10 > 4")]
    fn test_fatal_if_true_panics() {
        let (got, max) = (10, 4);
        crate::fatal_if!(got > max, "size {} > {}", got, max);
    }
}
