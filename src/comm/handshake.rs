//! Peer verification performed right after a connection is matched against a slot.
//!
//! The connecting side sends its pid and a token describing its entry in the OS
//! process table. The accepting side compares both against what it sees itself and
//! answers with a boolean; after a positive answer protocol versions are exchanged,
//! connector first.

use crate::comm::wire::Channel;
use crate::error::Error;
use crate::version::{Version, PROTOCOL_VERSION};
use crate::{muted_error, pldbg_debug};
use sysinfo::System;

/// Source of per-process identity tokens.
pub trait ProcessTable: Send + Sync {
    /// Opaque token identifying the process table entry of `pid`,
    /// `None` if there is no such process.
    fn token(&self, pid: i32) -> Option<Vec<u8>>;
}

/// Process table of the OS. Token is the process start time, so a recycled pid
/// never matches a token taken from its previous owner.
#[derive(Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn token(&self, pid: i32) -> Option<Vec<u8>> {
        let pid = sysinfo::Pid::from_u32(muted_error!(u32::try_from(pid))?);
        let mut system = System::new();
        if !system.refresh_process(pid) {
            return None;
        }
        system
            .process(pid)
            .map(|process| process.start_time().to_be_bytes().to_vec())
    }
}

fn check_peer_version(peer: &str) -> Result<Version, Error> {
    let mismatch = || Error::ProtocolVersion {
        local: PROTOCOL_VERSION.to_string(),
        peer: peer.to_string(),
    };
    let version = Version::parse(peer).ok_or_else(mismatch)?;
    if !PROTOCOL_VERSION.compatible_with(&version) {
        return Err(mismatch());
    }
    Ok(version)
}

/// Connecting side: introduce ourselves and agree on a protocol version.
pub fn introduce(
    chan: &mut Channel,
    pid: i32,
    processes: &dyn ProcessTable,
) -> Result<Version, Error> {
    let token = processes.token(pid).unwrap_or_default();
    chan.send_u32(pid as u32)?;
    chan.send(&token)?;
    if !chan.recv_bool()? {
        return Err(Error::HandshakeRejected);
    }

    chan.send_str(&PROTOCOL_VERSION.to_string())?;
    let peer = chan.recv_string()?;
    check_peer_version(&peer)
}

/// Accepting side: check that the peer is the process `expected_pid` published in the
/// matched slot. Return `Ok(None)` if the peer is rejected.
pub fn verify(
    chan: &mut Channel,
    expected_pid: i32,
    processes: &dyn ProcessTable,
) -> Result<Option<Version>, Error> {
    let pid = chan.recv_u32()? as i32;
    let token = chan.recv()?;

    let trusted = pid == expected_pid && processes.token(pid).is_some_and(|t| t == token);
    chan.send_bool(trusted)?;
    if !trusted {
        pldbg_debug!(target: "comm", "peer claiming pid {pid} rejected (slot pid {expected_pid})");
        return Ok(None);
    }

    let peer = chan.recv_string()?;
    chan.send_str(&PROTOCOL_VERSION.to_string())?;
    check_peer_version(&peer).map(Some)
}
