//! Routine identity and the name resolution boundary.
//!
//! Resolving a human given name into a routine identifier is a job of the host
//! catalog. Agents only use the resulting [`RoutineId`] in breakpoint keys and
//! protocol messages.

use crate::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Catalog identifier of a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub u32);

impl Display for RoutineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoutineId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RoutineId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMode {
    In,
    Out,
    InOut,
}

/// Everything a debugger client needs to know about a routine.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
    pub routine: RoutineId,
    pub schema: u32,
    pub arg_types: Vec<u32>,
    pub arg_modes: Vec<ArgMode>,
    pub arg_names: Vec<String>,
    pub language: u32,
    pub qualified_name: String,
    pub returns_set: bool,
    pub return_type: u32,
}

/// Host catalog lookup.
pub trait RoutineResolver {
    /// Translate a routine name (optionally schema-qualified) or a numeric identifier.
    fn resolve(&self, name_or_id: &str) -> Result<TargetInfo, Error>;
}
