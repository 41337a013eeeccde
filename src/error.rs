use std::str::Utf8Error;
use std::string::FromUtf8Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    FromUtf8(#[from] FromUtf8Error),
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),

    // --------------------------------- shared state errors ---------------------------------------
    #[error("shared region {0} is corrupted: {1}")]
    RegionCorrupted(String, &'static str),

    // --------------------------------- resource exhaustion ---------------------------------------
    #[error("no free debugger connection slot available")]
    NoFreeSlot,
    #[error("global breakpoint table is full ({0} entries)")]
    BreakpointTableFull(usize),
    #[error("no free session handle available")]
    NoFreeSessionHandle,

    // --------------------------------- rendezvous errors -----------------------------------------
    #[error("no target is listening on port {0}")]
    TargetNotListening(u16),
    #[error("peer rejected the handshake")]
    HandshakeRejected,
    #[error("incompatible protocol version: local {local}, peer {peer}")]
    ProtocolVersion { local: String, peer: String },

    // --------------------------------- connection errors -----------------------------------------
    #[error("debugger connection terminated")]
    ConnectionClosed,
    #[error("debugger connection (client side) terminated")]
    ClientGone,
    #[error("supervising server process {0} is gone")]
    SupervisorGone(i32),
    #[error("protocol error: {0}")]
    Protocol(String),

    // --------------------------------- session errors --------------------------------------------
    #[error("invalid session handle")]
    InvalidSession,
    #[error("session {0} is not connected to a target")]
    SessionNotConnected(u32),
    #[error("session {0} is not listening for targets")]
    NotAListener(u32),
    #[error("invalid frame number {0}")]
    InvalidFrame(u32),
    #[error("invalid variable name {0:?}")]
    InvalidVariableName(String),

    // --------------------------------- breakpoint errors -----------------------------------------
    #[error("another debugger is already waiting for that breakpoint")]
    BreakpointConflict,

    // --------------------------------- host errors -----------------------------------------------
    #[error("routine {0} not found")]
    UnknownRoutine(String),
    #[error("routine name {0} is ambiguous")]
    AmbiguousRoutine(String),
    #[error("canceling statement due to user request")]
    Aborted,
    #[error("{0}")]
    Execution(String),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    // --------------------------------- configuration errors --------------------------------------
    #[error("config parsing error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Return a hint to an interface - keep the worker process running after error or stop it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::Utf8(_) => false,
            Error::FromUtf8(_) => false,
            Error::NoFreeSlot => false,
            Error::BreakpointTableFull(_) => false,
            Error::NoFreeSessionHandle => false,
            Error::TargetNotListening(_) => false,
            Error::HandshakeRejected => false,
            Error::ProtocolVersion { .. } => false,
            Error::ConnectionClosed => false,
            Error::ClientGone => false,
            Error::SupervisorGone(_) => false,
            Error::Protocol(_) => false,
            Error::InvalidSession => false,
            Error::SessionNotConnected(_) => false,
            Error::NotAListener(_) => false,
            Error::InvalidFrame(_) => false,
            Error::InvalidVariableName(_) => false,
            Error::BreakpointConflict => false,
            Error::UnknownRoutine(_) => false,
            Error::AmbiguousRoutine(_) => false,
            Error::Aborted => false,
            Error::Execution(_) => false,
            Error::Parse { .. } => false,
            Error::Config(_) => false,

            // shared state can't be trusted anymore
            Error::Syscall(_, _) => true,
            Error::RegionCorrupted(_, _) => true,
        }
    }

    /// Return true if a debugger connection that produced this error must be torn down
    /// (no resynchronization is attempted).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::IO(_)
                | Error::Utf8(_)
                | Error::FromUtf8(_)
                | Error::ConnectionClosed
                | Error::ClientGone
                | Error::SupervisorGone(_)
                | Error::Protocol(_)
                | Error::ProtocolVersion { .. }
        )
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                if $crate::log::is_enabled() {
                    $log_fn!(target: "pldbg", "{:#}", e);
                }
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                if $crate::log::is_enabled() {
                    $log_fn!(target: "pldbg", concat!($msg, " {:#}"), e);
                }
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
