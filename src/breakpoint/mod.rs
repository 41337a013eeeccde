//! Breakpoint registry.
//!
//! Two tables share one entry shape: the local table is private to a worker process
//! (breakpoints set by an attached proxy), the global table lives in shared memory and
//! is honored by any future invocation of a routine in any process.

pub mod global;

use crate::catalog::RoutineId;
use crate::comm::SharedState;
use crate::error::Error;
use crate::pldbg_debug;
use global::GlobalTable;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Line wildcard, breakpoint matches any line of a routine.
pub const ANY_LINE: i32 = -1;
/// Process wildcard, breakpoint matches any target process.
pub const ANY_PROCESS: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointKey {
    pub database: u32,
    pub routine: RoutineId,
    pub line: i32,
    pub target_pid: i32,
}

impl BreakpointKey {
    pub fn matches_process(&self, pid: i32) -> bool {
        self.target_pid == ANY_PROCESS || self.target_pid == pid
    }
}

impl Display for BreakpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "db {} routine {} ", self.database, self.routine)?;
        match self.line {
            ANY_LINE => f.write_str("any line")?,
            line => write!(f, "line {line}")?,
        }
        match self.target_pid {
            ANY_PROCESS => Ok(()),
            pid => write!(f, " (pid {pid})"),
        }
    }
}

/// Ownership metadata of a breakpoint. `proxy_port == -1` means the breakpoint
/// was not set by a waiting proxy, a target hitting it listens for a proxy instead of
/// connecting to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointData {
    pub temporary: bool,
    pub busy: bool,
    pub proxy_port: i32,
    pub proxy_pid: i32,
}

impl Default for BreakpointData {
    fn default() -> Self {
        Self {
            temporary: false,
            busy: false,
            proxy_port: -1,
            proxy_pid: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub key: BreakpointKey,
    pub data: BreakpointData,
}

impl Breakpoint {
    pub fn is_global_claim(&self) -> bool {
        self.data.proxy_port >= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
}

/// Process private breakpoint table.
#[derive(Default)]
pub struct LocalTable {
    entries: HashMap<BreakpointKey, BreakpointData>,
    per_routine: HashMap<(u32, RoutineId), usize>,
}

impl LocalTable {
    pub fn get(&self, key: &BreakpointKey) -> Option<BreakpointData> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: BreakpointKey, data: BreakpointData) -> bool {
        match self.entries.get(&key) {
            Some(existing) if !existing.busy => false,
            Some(_) => {
                self.entries.insert(key, data);
                true
            }
            None => {
                self.entries.insert(key, data);
                *self.per_routine.entry((key.database, key.routine)).or_default() += 1;
                true
            }
        }
    }

    pub fn insert_or_update(&mut self, key: BreakpointKey, data: BreakpointData) {
        if self.entries.insert(key, data).is_none() {
            *self.per_routine.entry((key.database, key.routine)).or_default() += 1;
        }
    }

    pub fn delete(&mut self, key: &BreakpointKey) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        let idx = (key.database, key.routine);
        if let Some(cnt) = self.per_routine.get_mut(&idx) {
            *cnt -= 1;
            if *cnt == 0 {
                self.per_routine.remove(&idx);
            }
        }
        true
    }

    pub fn has_any_for_routine(&self, database: u32, routine: RoutineId) -> bool {
        self.per_routine.contains_key(&(database, routine))
    }

    /// Remove entries matched by predicate, return count of removed.
    pub fn remove_where(&mut self, pred: impl Fn(&Breakpoint) -> bool) -> usize {
        let doomed: Vec<_> = self
            .entries
            .iter()
            .map(|(key, data)| Breakpoint {
                key: *key,
                data: *data,
            })
            .filter(|bp| pred(bp))
            .map(|bp| bp.key)
            .collect();
        doomed.iter().filter(|key| self.delete(key)).count()
    }

    pub fn list(&self) -> Vec<Breakpoint> {
        self.entries
            .iter()
            .map(|(key, data)| Breakpoint {
                key: *key,
                data: *data,
            })
            .collect()
    }
}

/// Both breakpoint tables as seen from one worker process.
pub struct BreakpointRegistry {
    local: LocalTable,
    shared: Arc<SharedState>,
}

impl BreakpointRegistry {
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self {
            local: LocalTable::default(),
            shared,
        }
    }

    fn global(&self) -> &GlobalTable {
        &self.shared.globals
    }

    /// Exact key lookup.
    pub fn get(&self, scope: Scope, key: &BreakpointKey) -> Result<Option<BreakpointData>, Error> {
        match scope {
            Scope::Local => Ok(self.local.get(key)),
            Scope::Global => self.global().get(key),
        }
    }

    /// Lookup for a concrete position (`key.line` and `key.target_pid` are not wildcards).
    /// Wildcard entries match too; a specific line wins over any line, a specific
    /// process wins over any process.
    pub fn lookup(&self, scope: Scope, key: &BreakpointKey) -> Result<Option<Breakpoint>, Error> {
        for candidate in wildcard_candidates(key) {
            if let Some(data) = self.get(scope, &candidate)? {
                return Ok(Some(Breakpoint {
                    key: candidate,
                    data,
                }));
            }
        }
        Ok(None)
    }

    /// Find a breakpoint that should fire at the given position in process `pid`.
    ///
    /// Lines are searched in precedence order (specific line, then any line). For every
    /// line: global entries for this process, global entries for any process (busy ones
    /// are claimed by another session and skipped), then local entries.
    pub fn find_hit(
        &self,
        database: u32,
        routine: RoutineId,
        line: i32,
        pid: i32,
    ) -> Result<Option<(Scope, Breakpoint)>, Error> {
        let lines = if line == ANY_LINE {
            vec![ANY_LINE]
        } else {
            vec![line, ANY_LINE]
        };

        for line in lines {
            let make_key = |target_pid| BreakpointKey {
                database,
                routine,
                line,
                target_pid,
            };

            for target_pid in [pid, ANY_PROCESS] {
                let key = make_key(target_pid);
                if let Some(data) = self.global().get(&key)? {
                    if !data.busy {
                        return Ok(Some((Scope::Global, Breakpoint { key, data })));
                    }
                }
            }
            for target_pid in [pid, ANY_PROCESS] {
                let key = make_key(target_pid);
                if let Some(data) = self.local.get(&key) {
                    return Ok(Some((Scope::Local, Breakpoint { key, data })));
                }
            }
        }
        Ok(None)
    }

    /// Return false if an unclaimed entry with the same key already exists.
    pub fn insert(
        &mut self,
        scope: Scope,
        key: BreakpointKey,
        data: BreakpointData,
    ) -> Result<bool, Error> {
        match scope {
            Scope::Local => Ok(self.local.insert(key, data)),
            Scope::Global => self.global().insert(key, data),
        }
    }

    pub fn insert_or_update(
        &mut self,
        scope: Scope,
        key: BreakpointKey,
        data: BreakpointData,
    ) -> Result<(), Error> {
        match scope {
            Scope::Local => {
                self.local.insert_or_update(key, data);
                Ok(())
            }
            Scope::Global => self.global().insert_or_update(key, data),
        }
    }

    /// Return false if key not found.
    pub fn delete(&mut self, scope: Scope, key: &BreakpointKey) -> Result<bool, Error> {
        match scope {
            Scope::Local => Ok(self.local.delete(key)),
            Scope::Global => self.global().delete(key),
        }
    }

    pub fn list(&self, scope: Scope) -> Result<Vec<Breakpoint>, Error> {
        match scope {
            Scope::Local => Ok(self.local.list()),
            Scope::Global => self.global().list(),
        }
    }

    /// Claim global breakpoints of proxy `proxy_pid` for the current session of process `pid`:
    /// they are marked busy and copied into the local table, targeted at `pid`.
    pub fn busy_session(&mut self, proxy_pid: i32, pid: i32) -> Result<(), Error> {
        for bp in self.global().set_busy(proxy_pid, true)? {
            let key = BreakpointKey {
                target_pid: pid,
                ..bp.key
            };
            let data = BreakpointData {
                busy: false,
                ..bp.data
            };
            self.local.insert_or_update(key, data);
        }
        pldbg_debug!(target: "breakpoint", "breakpoints of proxy {proxy_pid} claimed by {pid}");
        Ok(())
    }

    /// Release global breakpoints of proxy `proxy_pid` and forget their local copies.
    pub fn free_session(&mut self, proxy_pid: i32) -> Result<(), Error> {
        self.global().set_busy(proxy_pid, false)?;
        self.local.remove_where(|bp| bp.data.proxy_pid == proxy_pid);
        Ok(())
    }

    /// Remove breakpoints owned by a proxy process that is gone.
    pub fn cleanup_process(&mut self, proxy_pid: i32) -> Result<(), Error> {
        self.global().cleanup_process(proxy_pid)?;
        self.local.remove_where(|bp| bp.data.proxy_pid == proxy_pid);
        Ok(())
    }

    /// Cheap check executed at every routine start.
    pub fn has_any_for_routine(
        &self,
        database: u32,
        routine: RoutineId,
        pid: i32,
    ) -> Result<bool, Error> {
        if self.local.has_any_for_routine(database, routine) {
            return Ok(true);
        }
        self.global().has_any_for_routine(database, routine, pid)
    }
}

fn wildcard_candidates(key: &BreakpointKey) -> impl Iterator<Item = BreakpointKey> + '_ {
    [
        (key.line, key.target_pid),
        (key.line, ANY_PROCESS),
        (ANY_LINE, key.target_pid),
        (ANY_LINE, ANY_PROCESS),
    ]
    .into_iter()
    .map(move |(line, target_pid)| BreakpointKey {
        line,
        target_pid,
        ..*key
    })
}
