//! Internal invariant reporting.
//!
//! Lifecycle contract violations (registry corruption, escapes into a torn
//! down runtime, and similar programming errors) are not recoverable
//! conditions. They are reported through the macros in this module, which
//! fail fast instead of letting the engine continue with a corrupted heap.

macro_rules! system_panic {
    ($($arg:tt)*) => {{
        panic!(
            "Astrolabe internal error. This is a bug.\n{}",
            format_args!($($arg)*),
        )
    }};
}

macro_rules! debug_unreachable {
    ($($arg:tt)*) => {{
        #[cfg(debug_assertions)]
        {
            panic!(
                "Astrolabe internal error. This is a bug.\n{}",
                format_args!($($arg)*),
            )
        }

        #[cfg(not(debug_assertions))]
        {
            unreachable!()
        }
    }};
}

pub(crate) use {debug_unreachable, system_panic};
