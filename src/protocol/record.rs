//! Colon delimited records sent by a target in response to inspection commands.

use crate::catalog::RoutineId;
use crate::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

fn malformed(kind: &str, raw: &str) -> Error {
    Error::Protocol(format!("malformed {kind} record {raw:?}"))
}

fn flag(value: bool) -> &'static str {
    if value {
        "t"
    } else {
        "f"
    }
}

fn parse_flag(kind: &str, raw: &str, value: &str) -> Result<bool, Error> {
    match value {
        "t" => Ok(true),
        "f" => Ok(false),
        _ => Err(malformed(kind, raw)),
    }
}

fn parse_num<T: FromStr>(kind: &str, raw: &str, value: &str) -> Result<T, Error> {
    value.parse().map_err(|_| malformed(kind, raw))
}

/// Position where a target stopped: `routineId:line:name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub routine: RoutineId,
    pub line: i32,
    pub name: String,
}

impl Display for StopEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.routine, self.line, self.name)
    }
}

impl FromStr for StopEvent {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "stop event";
        let mut parts = raw.splitn(3, ':');
        let (Some(routine), Some(line), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed(KIND, raw));
        };
        Ok(StopEvent {
            routine: parse_num(KIND, raw, routine)?,
            line: parse_num(KIND, raw, line)?,
            name: name.to_string(),
        })
    }
}

/// Breakpoint of the target: `routineId:line:name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRecord {
    pub routine: RoutineId,
    pub line: i32,
    pub name: String,
}

impl Display for BreakpointRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.routine, self.line, self.name)
    }
}

impl FromStr for BreakpointRecord {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let event: StopEvent = raw.parse().map_err(|_| malformed("breakpoint", raw))?;
        Ok(BreakpointRecord {
            routine: event.routine,
            line: event.line,
            name: event.name,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarClass {
    Argument,
    Local,
}

impl VarClass {
    fn code(self) -> &'static str {
        match self {
            VarClass::Argument => "A",
            VarClass::Local => "L",
        }
    }
}

/// Variable of the selected frame:
/// `name:class:line:unique:isConst:notNull:typeId:value`. The value is the rest of the
/// record and may contain colons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub class: VarClass,
    pub line: i32,
    pub unique: bool,
    pub is_const: bool,
    pub not_null: bool,
    pub type_id: u32,
    pub value: String,
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.name,
            self.class.code(),
            self.line,
            flag(self.unique),
            flag(self.is_const),
            flag(self.not_null),
            self.type_id,
            self.value
        )
    }
}

impl FromStr for Variable {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "variable";
        let parts: Vec<&str> = raw.splitn(8, ':').collect();
        let &[name, class, line, unique, is_const, not_null, type_id, value] = parts.as_slice() else {
            return Err(malformed(KIND, raw));
        };
        let class = match class {
            "A" => VarClass::Argument,
            "L" => VarClass::Local,
            _ => return Err(malformed(KIND, raw)),
        };
        Ok(Variable {
            name: name.to_string(),
            class,
            line: parse_num(KIND, raw, line)?,
            unique: parse_flag(KIND, raw, unique)?,
            is_const: parse_flag(KIND, raw, is_const)?,
            not_null: parse_flag(KIND, raw, not_null)?,
            type_id: parse_num(KIND, raw, type_id)?,
            value: value.to_string(),
        })
    }
}

/// Stack frame as sent by a target: `targetName:routineId:line:args`.
/// `level` is not transferred, the receiving side numbers frames in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub level: u32,
    pub target_name: String,
    pub routine: RoutineId,
    pub line: i32,
    pub args: String,
}

impl StackFrame {
    pub fn parse(level: u32, raw: &str) -> Result<Self, Error> {
        const KIND: &str = "stack frame";
        let mut parts = raw.splitn(4, ':');
        let (Some(target_name), Some(routine), Some(line), Some(args)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed(KIND, raw));
        };
        Ok(StackFrame {
            level,
            target_name: target_name.to_string(),
            routine: parse_num(KIND, raw, routine)?,
            line: parse_num(KIND, raw, line)?,
            args: args.to_string(),
        })
    }
}

impl Display for StackFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.target_name, self.routine, self.line, self.args
        )
    }
}
