//! Switchable logging for code that runs inside a host worker process.
//!
//! All subsystem messages go through the `pldbg_*` macros below, so a host that
//! embeds the agents can mute them without touching the global logger.

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed)
}

pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __pldbg_log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::$level!(target: $target, $($arg)+)
        }
    };
    ($level:ident, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::$level!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! pldbg_info {
    ($($arg:tt)+) => { $crate::__pldbg_log!(info, $($arg)+) };
}

#[macro_export]
macro_rules! pldbg_warn {
    ($($arg:tt)+) => { $crate::__pldbg_log!(warn, $($arg)+) };
}

#[macro_export]
macro_rules! pldbg_error {
    ($($arg:tt)+) => { $crate::__pldbg_log!(error, $($arg)+) };
}

#[macro_export]
macro_rules! pldbg_debug {
    ($($arg:tt)+) => { $crate::__pldbg_log!(debug, $($arg)+) };
}
