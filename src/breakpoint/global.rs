//! Server-wide breakpoint table living in a shared region.

use crate::breakpoint::{Breakpoint, BreakpointData, BreakpointKey};
use crate::catalog::RoutineId;
use crate::error::Error;
use crate::pldbg_debug;
use crate::shmem::{RegionLayout, SharedRegion};
use bytes::{Buf, BufMut};
use std::path::Path;

const ENTRY_RECORD_LEN: usize = 32;
const GLOBAL_MAGIC: u32 = 0x504c4447;

const FLAG_TEMPORARY: u32 = 0b01;
const FLAG_BUSY: u32 = 0b10;

fn decode(mut buf: &[u8]) -> Option<Breakpoint> {
    if buf.get_u32() == 0 {
        return None;
    }
    let key = BreakpointKey {
        database: buf.get_u32(),
        routine: RoutineId(buf.get_u32()),
        line: buf.get_i32(),
        target_pid: buf.get_i32(),
    };
    let flags = buf.get_u32();
    let data = BreakpointData {
        temporary: flags & FLAG_TEMPORARY != 0,
        busy: flags & FLAG_BUSY != 0,
        proxy_port: buf.get_i32(),
        proxy_pid: buf.get_i32(),
    };
    Some(Breakpoint { key, data })
}

fn encode(bp: Option<&Breakpoint>, mut buf: &mut [u8]) {
    let Some(bp) = bp else {
        buf.fill(0);
        return;
    };
    let mut flags = 0;
    if bp.data.temporary {
        flags |= FLAG_TEMPORARY;
    }
    if bp.data.busy {
        flags |= FLAG_BUSY;
    }
    buf.put_u32(1);
    buf.put_u32(bp.key.database);
    buf.put_u32(bp.key.routine.0);
    buf.put_i32(bp.key.line);
    buf.put_i32(bp.key.target_pid);
    buf.put_u32(flags);
    buf.put_i32(bp.data.proxy_port);
    buf.put_i32(bp.data.proxy_pid);
}

/// Fixed capacity table of global breakpoints, keyed like a hash table
/// (at most one entry per key).
pub struct GlobalTable {
    region: SharedRegion,
}

impl GlobalTable {
    pub fn open(dir: &Path, capacity: usize, reset: bool) -> Result<Self, Error> {
        let layout = RegionLayout {
            name: "breakpoints",
            magic: GLOBAL_MAGIC,
            capacity,
            record_len: ENTRY_RECORD_LEN,
        };
        Ok(Self {
            region: SharedRegion::open(dir, layout, reset)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Exact key lookup.
    pub fn get(&self, key: &BreakpointKey) -> Result<Option<BreakpointData>, Error> {
        let guard = self.region.lock()?;
        let data = guard
            .records()
            .filter_map(decode)
            .find(|bp| bp.key == *key)
            .map(|bp| bp.data);
        Ok(data)
    }

    /// Insert a new entry. Return false if an unclaimed (not busy) entry with equal key
    /// already exists. A busy entry with equal key is replaced.
    pub fn insert(&self, key: BreakpointKey, data: BreakpointData) -> Result<bool, Error> {
        self.upsert(key, data, false)
    }

    pub fn insert_or_update(&self, key: BreakpointKey, data: BreakpointData) -> Result<(), Error> {
        self.upsert(key, data, true).map(|_| ())
    }

    fn upsert(&self, key: BreakpointKey, data: BreakpointData, update: bool) -> Result<bool, Error> {
        let mut guard = self.region.lock()?;
        let mut free = None;
        let mut existing = None;
        for idx in 0..guard.capacity() {
            match decode(guard.record(idx)) {
                Some(bp) if bp.key == key => {
                    existing = Some((idx, bp));
                    break;
                }
                None if free.is_none() => free = Some(idx),
                _ => {}
            }
        }

        let idx = match existing {
            Some((_, bp)) if !bp.data.busy && !update => return Ok(false),
            Some((idx, _)) => idx,
            None => free.ok_or(Error::BreakpointTableFull(guard.capacity()))?,
        };
        encode(Some(&Breakpoint { key, data }), guard.record_mut(idx));
        pldbg_debug!(target: "breakpoint", "global breakpoint stored: {key}");
        Ok(true)
    }

    /// Return false if the key was not present.
    pub fn delete(&self, key: &BreakpointKey) -> Result<bool, Error> {
        let mut guard = self.region.lock()?;
        for idx in 0..guard.capacity() {
            if decode(guard.record(idx)).is_some_and(|bp| bp.key == *key) {
                encode(None, guard.record_mut(idx));
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Set busy flag on every entry owned by proxy `proxy_pid`,
    /// return the entries that were changed.
    pub fn set_busy(&self, proxy_pid: i32, busy: bool) -> Result<Vec<Breakpoint>, Error> {
        let mut guard = self.region.lock()?;
        let mut changed = vec![];
        for idx in 0..guard.capacity() {
            if let Some(mut bp) = decode(guard.record(idx)) {
                if bp.data.proxy_pid == proxy_pid {
                    bp.data.busy = busy;
                    encode(Some(&bp), guard.record_mut(idx));
                    changed.push(bp);
                }
            }
        }
        Ok(changed)
    }

    /// Remove every entry owned by proxy `proxy_pid`.
    pub fn cleanup_process(&self, proxy_pid: i32) -> Result<usize, Error> {
        let mut guard = self.region.lock()?;
        let mut removed = 0;
        for idx in 0..guard.capacity() {
            if decode(guard.record(idx)).is_some_and(|bp| bp.data.proxy_pid == proxy_pid) {
                encode(None, guard.record_mut(idx));
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// True if a claimable entry exists for a routine, visible to process `pid`.
    pub fn has_any_for_routine(
        &self,
        database: u32,
        routine: RoutineId,
        pid: i32,
    ) -> Result<bool, Error> {
        let guard = self.region.lock()?;
        let found = guard.records().filter_map(decode).any(|bp| {
            bp.key.database == database
                && bp.key.routine == routine
                && !bp.data.busy
                && bp.key.matches_process(pid)
        });
        Ok(found)
    }

    pub fn list(&self) -> Result<Vec<Breakpoint>, Error> {
        let guard = self.region.lock()?;
        let entries = guard.records().filter_map(decode).collect();
        Ok(entries)
    }
}
