//! Debugger for stored routines running inside worker processes of a database server.
//!
//! A worker executing a routine (the *target*) stops at breakpoints and is remote
//! controlled by another worker (the *proxy*) over a loopback TCP connection. Both sides
//! meet through a connection slot table and a global breakpoint table living in shared
//! memory.

pub mod breakpoint;
pub mod catalog;
pub mod comm;
pub mod config;
pub mod console;
pub mod error;
pub mod log;
pub mod protocol;
pub mod proxy;
pub mod script;
pub mod shmem;
pub mod target;
pub mod version;

pub use error::{Error, Result};
