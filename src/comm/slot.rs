//! Connection slot table.
//!
//! Each slot advertises one in-progress rendezvous between a target and a proxy.
//! A peer is trusted only if it connects from a port that some backend published
//! here beforehand, so only processes with write access to the table can pass.

use crate::comm::BackendId;
use crate::error::Error;
use crate::shmem::{RegionLayout, SharedRegion};
use crate::{pldbg_debug, pldbg_info};
use bytes::{Buf, BufMut};
use std::path::Path;
use strum_macros::Display;

const SLOT_RECORD_LEN: usize = 16;
const SLOT_MAGIC: u32 = 0x504c4453;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SlotStatus {
    #[strum(serialize = "idle")]
    Idle,
    #[strum(serialize = "listening for proxy")]
    ListeningForProxy,
    #[strum(serialize = "proxy connecting")]
    ProxyConnecting,
    #[strum(serialize = "connecting to proxy")]
    ConnectingToProxy,
}

impl SlotStatus {
    fn code(self) -> u32 {
        match self {
            SlotStatus::Idle => 0,
            SlotStatus::ListeningForProxy => 1,
            SlotStatus::ProxyConnecting => 2,
            SlotStatus::ConnectingToProxy => 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => SlotStatus::Idle,
            1 => SlotStatus::ListeningForProxy,
            2 => SlotStatus::ProxyConnecting,
            3 => SlotStatus::ConnectingToProxy,
            _ => return None,
        })
    }
}

/// Content of one connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub owner: Option<BackendId>,
    pub status: SlotStatus,
    pub pid: i32,
    pub port: u16,
}

impl Slot {
    const FREE: Slot = Slot {
        owner: None,
        status: SlotStatus::Idle,
        pid: 0,
        port: 0,
    };

    fn decode(mut buf: &[u8]) -> Result<Self, Error> {
        let owner = BackendId::from_raw(buf.get_u32());
        let status = SlotStatus::from_code(buf.get_u32())
            .ok_or_else(|| Error::RegionCorrupted("slots".to_string(), "unknown slot status"))?;
        let pid = buf.get_i32();
        let port = buf.get_u32() as u16;
        Ok(Slot {
            owner,
            status,
            pid,
            port,
        })
    }

    fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.owner.map(BackendId::as_raw).unwrap_or(0));
        buf.put_u32(self.status.code());
        buf.put_i32(self.pid);
        buf.put_u32(self.port as u32);
    }
}

/// Shared table of connection slots.
pub struct SlotTable {
    region: SharedRegion,
}

impl SlotTable {
    pub fn open(dir: &Path, capacity: usize, reset: bool) -> Result<Self, Error> {
        let layout = RegionLayout {
            name: "slots",
            magic: SLOT_MAGIC,
            capacity,
            record_len: SLOT_RECORD_LEN,
        };
        Ok(Self {
            region: SharedRegion::open(dir, layout, reset)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Publish a rendezvous attempt of `owner`. An owner never holds more than one slot:
    /// a slot left over by an earlier attempt of the same owner is reused.
    ///
    /// Return index of the acquired slot.
    pub fn acquire(
        &self,
        owner: BackendId,
        status: SlotStatus,
        pid: i32,
        port: u16,
    ) -> Result<usize, Error> {
        let mut guard = self.region.lock()?;

        let mut free = None;
        for idx in 0..guard.capacity() {
            let slot = Slot::decode(guard.record(idx))?;
            if slot.owner == Some(owner) {
                pldbg_info!(target: "comm", "reusing debugger connection slot {idx} of {owner}");
                free = Some(idx);
                break;
            }
            if slot.owner.is_none() && free.is_none() {
                free = Some(idx);
            }
        }

        let idx = free.ok_or(Error::NoFreeSlot)?;
        Slot {
            owner: Some(owner),
            status,
            pid,
            port,
        }
        .encode(guard.record_mut(idx));
        pldbg_debug!(target: "comm", "slot {idx}: {owner} {status} on port {port}");
        Ok(idx)
    }

    /// Find an occupied slot with given status and port. If found, the slot is consumed:
    /// it is freed so the same advertisement can't be used twice.
    pub fn take_matching(&self, status: SlotStatus, port: u16) -> Result<Option<Slot>, Error> {
        let mut guard = self.region.lock()?;
        for idx in 0..guard.capacity() {
            let slot = Slot::decode(guard.record(idx))?;
            if slot.owner.is_some() && slot.status == status && slot.port == port {
                Slot::FREE.encode(guard.record_mut(idx));
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Return occupied slot with given status and port, without consuming it.
    pub fn find(&self, status: SlotStatus, port: u16) -> Result<Option<(usize, Slot)>, Error> {
        let guard = self.region.lock()?;
        for idx in 0..guard.capacity() {
            let slot = Slot::decode(guard.record(idx))?;
            if slot.owner.is_some() && slot.status == status && slot.port == port {
                return Ok(Some((idx, slot)));
            }
        }
        Ok(None)
    }

    /// Return the slot of `owner`, if any.
    pub fn slot_of(&self, owner: BackendId) -> Result<Option<Slot>, Error> {
        let guard = self.region.lock()?;
        for record in guard.records() {
            let slot = Slot::decode(record)?;
            if slot.owner == Some(owner) {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Free the slot of `owner` (if any), returning it to idle.
    pub fn release(&self, owner: BackendId) -> Result<bool, Error> {
        let mut guard = self.region.lock()?;
        for idx in 0..guard.capacity() {
            if Slot::decode(guard.record(idx))?.owner == Some(owner) {
                Slot::FREE.encode(guard.record_mut(idx));
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Free every slot published by process `pid`, used when a worker process is gone.
    pub fn cleanup_process(&self, pid: i32) -> Result<usize, Error> {
        let mut guard = self.region.lock()?;
        let mut count = 0;
        for idx in 0..guard.capacity() {
            let slot = Slot::decode(guard.record(idx))?;
            if slot.owner.is_some() && slot.pid == pid {
                Slot::FREE.encode(guard.record_mut(idx));
                count += 1;
            }
        }
        Ok(count)
    }

    /// Copy of all slots in index order.
    pub fn snapshot(&self) -> Result<Vec<Slot>, Error> {
        let guard = self.region.lock()?;
        guard.records().map(Slot::decode).collect()
    }
}
