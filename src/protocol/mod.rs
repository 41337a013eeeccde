//! Target-proxy session protocol: commands are short ASCII strings, replies are booleans
//! or colon delimited records (see [`record`]). Sequences of records end with an empty
//! message.

pub mod command;
pub mod record;

pub use command::Command;
pub use record::{BreakpointRecord, StackFrame, StopEvent, VarClass, Variable};

/// Prefix of the notice a listening target sends to its own client.
pub const BREAK_NOTICE_PREFIX: &str = "PLDBGBREAK:";

/// Notice text announcing the port a target listens on.
pub fn break_notice(port: u16) -> String {
    format!("{BREAK_NOTICE_PREFIX}{port}")
}

/// Extract a port from a notice produced by [`break_notice`].
pub fn parse_break_notice(notice: &str) -> Option<u16> {
    notice
        .trim()
        .strip_prefix(BREAK_NOTICE_PREFIX)?
        .parse()
        .ok()
}
