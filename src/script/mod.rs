//! Reference host for the debugger: a tiny procedural language.
//!
//! A script file is a list of routines:
//!
//! ```text
//! routine public.add(a, b)
//!   let c = a + b
//!   return c
//! end
//! ```
//!
//! Routine identifiers are assigned in file order starting at [`FIRST_ROUTINE_ID`], line
//! numbers count from the first body line.

pub mod interp;
pub mod parser;

use crate::catalog::{ArgMode, RoutineId, RoutineResolver, TargetInfo};
use crate::error::Error;
use itertools::Itertools;
use parser::Stmt;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub use interp::Interpreter;

pub const FIRST_ROUTINE_ID: u32 = 16384;
/// Namespace identifier of the first schema, others follow in order of appearance.
const FIRST_SCHEMA_ID: u32 = 2200;
const LANGUAGE_ID: u32 = 13576;
const DEFAULT_SCHEMA: &str = "public";

pub const INT8_TYPE: u32 = 20;
pub const TEXT_TYPE: u32 = 25;
pub const UNKNOWN_TYPE: u32 = 705;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Text(String),
}

impl Value {
    pub fn type_id(&self) -> u32 {
        match self {
            Value::Null => UNKNOWN_TYPE,
            Value::Int(_) => INT8_TYPE,
            Value::Text(_) => TEXT_TYPE,
        }
    }

    /// Argument given on a command line: integers stay integers.
    pub fn from_arg(arg: &str) -> Self {
        match arg.parse::<i64>() {
            Ok(v) => Value::Int(v),
            Err(_) if arg.eq_ignore_ascii_case("null") => Value::Null,
            Err(_) => Value::Text(arg.to_string()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: i32,
    pub stmt: Stmt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub id: RoutineId,
    pub schema: String,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    pub source: String,
}

impl Routine {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Local declarations in body order: (name, line, is_const).
    pub fn declarations(&self) -> impl Iterator<Item = (&str, i32, bool)> + '_ {
        self.body.iter().filter_map(|s| match s.stmt {
            Stmt::Let {
                ref name, is_const, ..
            } => Some((name.as_str(), s.line, is_const)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    routines: Vec<Routine>,
    schemas: Vec<String>,
    search_path: Vec<String>,
}

fn is_blank(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with("--")
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut catalog = Catalog {
            routines: vec![],
            schemas: vec![DEFAULT_SCHEMA.to_string()],
            search_path: vec![DEFAULT_SCHEMA.to_string()],
        };

        let mut lines = text.lines().enumerate().map(|(idx, l)| (idx + 1, l));
        while let Some((file_line, line)) = lines.next() {
            if is_blank(line) {
                continue;
            }
            let header = parser::parse_header(line, file_line)?;
            let schema = header.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_string());

            let mut source = vec![];
            let mut body = vec![];
            let mut closed = false;
            for (file_line, line) in lines.by_ref() {
                if line.trim() == "end" {
                    closed = true;
                    break;
                }
                source.push(line);
                if !is_blank(line) {
                    body.push(Statement {
                        line: source.len() as i32,
                        stmt: parser::parse_statement(line, file_line)?,
                    });
                }
            }
            if !closed {
                return Err(Error::Parse {
                    line: file_line,
                    message: format!("routine {} has no end", header.name),
                });
            }

            let duplicate = catalog.routines.iter().any(|r| {
                r.schema == schema && r.name == header.name && r.params.len() == header.params.len()
            });
            if duplicate {
                return Err(Error::Parse {
                    line: file_line,
                    message: format!("routine {schema}.{} already exists", header.name),
                });
            }

            if !catalog.schemas.contains(&schema) {
                catalog.schemas.push(schema.clone());
            }
            let id = RoutineId(FIRST_ROUTINE_ID + catalog.routines.len() as u32);
            catalog.routines.push(Routine {
                id,
                schema,
                name: header.name,
                params: header.params,
                body,
                source: source.join("\n"),
            });
        }
        Ok(catalog)
    }

    pub fn with_search_path(mut self, path: Vec<String>) -> Self {
        self.search_path = path;
        self
    }

    pub fn routines(&self) -> &[Routine] {
        &self.routines
    }

    pub fn get(&self, id: RoutineId) -> Option<&Routine> {
        self.routines.iter().find(|r| r.id == id)
    }

    fn schema_id(&self, schema: &str) -> u32 {
        let idx = self.schemas.iter().position(|s| s == schema).unwrap_or(0);
        FIRST_SCHEMA_ID + idx as u32
    }

    /// Routines visible under `name`: `schema.name` looks only in that schema, a bare name
    /// looks in every schema of the search path.
    fn candidates(&self, name: &str) -> Vec<&Routine> {
        let (schema, name) = match name.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, name),
        };
        self.routines
            .iter()
            .filter(|r| {
                r.name == name
                    && match schema {
                        Some(schema) => r.schema == schema,
                        None => self.search_path.contains(&r.schema),
                    }
            })
            .collect()
    }

    /// Find a routine by numeric identifier or by name. A name matching several routines
    /// (overloads, or equal names in different schemas of the search path) is ambiguous.
    pub fn find(&self, name_or_id: &str) -> Result<&Routine, Error> {
        let name_or_id = name_or_id.trim();
        if let Ok(id) = name_or_id.parse::<RoutineId>() {
            return self
                .get(id)
                .ok_or_else(|| Error::UnknownRoutine(name_or_id.to_string()));
        }

        let found = self.candidates(name_or_id);
        match found.as_slice() {
            [] => Err(Error::UnknownRoutine(name_or_id.to_string())),
            [routine] => Ok(*routine),
            _ => Err(Error::AmbiguousRoutine(name_or_id.to_string())),
        }
    }

    /// Routine called as `name(args)` with `argc` arguments.
    pub fn find_call(&self, name: &str, argc: usize) -> Result<Option<&Routine>, Error> {
        let mut found = self.candidates(name);
        found.retain(|r| r.params.len() == argc);
        match found.as_slice() {
            [] => Ok(None),
            [routine] => Ok(Some(*routine)),
            _ => Err(Error::AmbiguousRoutine(name.to_string())),
        }
    }

    pub fn target_info(&self, routine: &Routine) -> TargetInfo {
        TargetInfo {
            routine: routine.id,
            schema: self.schema_id(&routine.schema),
            arg_types: vec![UNKNOWN_TYPE; routine.params.len()],
            arg_modes: vec![ArgMode::In; routine.params.len()],
            arg_names: routine.params.clone(),
            language: LANGUAGE_ID,
            qualified_name: routine.qualified_name(),
            returns_set: false,
            return_type: UNKNOWN_TYPE,
        }
    }

    /// One line description per routine, `id name(params)`.
    pub fn describe(&self) -> Vec<String> {
        self.routines
            .iter()
            .map(|r| format!("{} {}({})", r.id, r.qualified_name(), r.params.iter().join(", ")))
            .collect()
    }
}

impl RoutineResolver for Catalog {
    fn resolve(&self, name_or_id: &str) -> Result<TargetInfo, Error> {
        self.find(name_or_id).map(|r| self.target_info(r))
    }
}
