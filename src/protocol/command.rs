use crate::breakpoint::ANY_LINE;
use crate::catalog::RoutineId;
use crate::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Request sent by a proxy to a stopped target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StepInto,
    StepOver,
    Continue,
    Abort,
    Variables,
    Stack,
    Breakpoints,
    SelectFrame(u32),
    SetBreakpoint(RoutineId, i32),
    ClearBreakpoint(RoutineId, i32),
    Source(RoutineId),
    /// Assign a new value to variable `name` declared at `line` (`ANY_LINE` if any).
    Deposit {
        name: String,
        line: i32,
        value: String,
    },
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::StepInto => f.write_str("s"),
            Command::StepOver => f.write_str("o"),
            Command::Continue => f.write_str("c"),
            Command::Abort => f.write_str("x"),
            Command::Variables => f.write_str("i"),
            Command::Stack => f.write_str("$"),
            Command::Breakpoints => f.write_str("l"),
            Command::SelectFrame(n) => write!(f, "^ {n}"),
            Command::SetBreakpoint(routine, line) => write!(f, "b {routine}:{line}"),
            Command::ClearBreakpoint(routine, line) => write!(f, "f {routine}:{line}"),
            Command::Source(routine) => write!(f, "# {routine}"),
            Command::Deposit { name, line, value } => {
                if *line == ANY_LINE {
                    write!(f, "d {name}.={value}")
                } else {
                    write!(f, "d {name}.{line}={value}")
                }
            }
        }
    }
}

fn malformed(raw: &str) -> Error {
    Error::Protocol(format!("malformed command {raw:?}"))
}

fn parse_position(args: &str, raw: &str) -> Result<(RoutineId, i32), Error> {
    let (routine, line) = args.split_once(':').ok_or_else(|| malformed(raw))?;
    let routine = routine.parse().map_err(|_| malformed(raw))?;
    let line = line.trim().parse().map_err(|_| malformed(raw))?;
    Ok((routine, line))
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (code, args) = match raw.split_once(' ') {
            Some((code, args)) => (code, Some(args)),
            None => (raw, None),
        };

        let cmd = match (code, args) {
            ("s", None) => Command::StepInto,
            ("o", None) => Command::StepOver,
            ("c", None) => Command::Continue,
            ("x", None) => Command::Abort,
            ("i", None) => Command::Variables,
            ("$", None) => Command::Stack,
            ("l", None) => Command::Breakpoints,
            ("^", Some(n)) => Command::SelectFrame(n.trim().parse().map_err(|_| malformed(raw))?),
            ("b", Some(args)) => {
                let (routine, line) = parse_position(args, raw)?;
                Command::SetBreakpoint(routine, line)
            }
            ("f", Some(args)) => {
                let (routine, line) = parse_position(args, raw)?;
                Command::ClearBreakpoint(routine, line)
            }
            ("#", Some(routine)) => Command::Source(routine.parse().map_err(|_| malformed(raw))?),
            ("d", Some(args)) => {
                let (target, value) = args.split_once('=').ok_or_else(|| malformed(raw))?;
                let (name, line) = match target.rsplit_once('.') {
                    Some((name, "")) => (name, ANY_LINE),
                    Some((name, line)) => (name, line.parse().map_err(|_| malformed(raw))?),
                    None => (target, ANY_LINE),
                };
                if name.is_empty() {
                    return Err(malformed(raw));
                }
                Command::Deposit {
                    name: name.to_string(),
                    line,
                    value: value.to_string(),
                }
            }
            _ => return Err(malformed(raw)),
        };
        Ok(cmd)
    }
}
