//! Establishing trusted target-proxy connections.
//!
//! Either side may be the listener. The active side publishes the local port it is
//! about to connect from in a connection slot, the passive side accepts a connection
//! only if its remote port matches such a slot and the peer passes the handshake.
//! Rejected connections are closed silently and the passive side keeps waiting.

use crate::comm::handshake::{self, ProcessTable};
use crate::comm::slot::SlotStatus;
use crate::comm::wire::{Channel, Watch};
use crate::comm::Backend;
use crate::error::Error;
use crate::{muted_error, pldbg_debug, weak_error};
use nix::sys::socket::{
    bind, connect, getsockname, socket, AddressFamily, SockFlag, SockType, SockaddrIn,
};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd};
use std::time::Instant;

/// Bind a loopback listener on an OS chosen port.
pub fn loopback_listener() -> Result<(TcpListener, u16), Error> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Create a socket bound to an OS chosen loopback port, without connecting it yet.
fn bound_socket() -> Result<(std::os::fd::OwnedFd, u16), Error> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| Error::Syscall("socket", e))?;
    bind(fd.as_raw_fd(), &SockaddrIn::new(127, 0, 0, 1, 0)).map_err(|e| Error::Syscall("bind", e))?;
    let local: SockaddrIn =
        getsockname(fd.as_raw_fd()).map_err(|e| Error::Syscall("getsockname", e))?;
    Ok((fd, local.port()))
}

/// Active side of a rendezvous: advertise the local port with given status, connect to
/// `port` and introduce ourselves.
fn connect_with_slot(
    backend: &Backend,
    status: SlotStatus,
    port: u16,
    processes: &dyn ProcessTable,
    watch: &Watch,
) -> Result<Channel, Error> {
    let slots = &backend.shared()?.slots;
    let (fd, local_port) = bound_socket()?;
    slots.acquire(backend.id(), status, backend.pid(), local_port)?;

    let result = (|| -> Result<Channel, Error> {
        connect(fd.as_raw_fd(), &SockaddrIn::new(127, 0, 0, 1, port))
            .map_err(|e| Error::IO(e.into()))?;
        let mut chan = Channel::new(TcpStream::from(fd), watch.clone())?;
        handshake::introduce(&mut chan, backend.pid(), processes)?;
        Ok(chan)
    })();

    // the passive side consumes our slot on success, but not on failure
    muted_error!(slots.release(backend.id()));
    result
}

/// Passive side of a rendezvous: accept connections until one comes from a port published
/// with `expected` status and passes the handshake. Return `None` if the deadline passes.
fn accept_matching(
    backend: &Backend,
    listener: &TcpListener,
    expected: SlotStatus,
    processes: &dyn ProcessTable,
    watch: &Watch,
    deadline: Option<Instant>,
) -> Result<Option<(Channel, i32)>, Error> {
    let slots = &backend.shared()?.slots;
    loop {
        if !watch.wait_readable(listener.as_fd(), deadline)? {
            return Ok(None);
        }
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        let Some(slot) = slots.take_matching(expected, peer.port())? else {
            pldbg_debug!(target: "comm", "unexpected connection from port {} dropped", peer.port());
            continue;
        };

        let mut chan = Channel::new(stream, watch.clone())?;
        match handshake::verify(&mut chan, slot.pid, processes) {
            Ok(Some(_)) => return Ok(Some((chan, slot.pid))),
            Ok(None) => continue,
            Err(e) if e.is_session_fatal() => {
                pldbg_debug!(target: "comm", "handshake with port {} failed: {e}", peer.port());
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Target side, passive mode: listen on a fresh port, announce it and wait for a proxy.
pub fn listen_for_proxy(
    backend: &Backend,
    processes: &dyn ProcessTable,
    watch: &Watch,
    announce: &mut dyn FnMut(u16),
) -> Result<Channel, Error> {
    let slots = &backend.shared()?.slots;
    let (listener, port) = loopback_listener()?;
    slots.acquire(
        backend.id(),
        SlotStatus::ListeningForProxy,
        backend.pid(),
        port,
    )?;
    announce(port);

    let result = accept_matching(
        backend,
        &listener,
        SlotStatus::ProxyConnecting,
        processes,
        watch,
        None,
    );
    weak_error!(slots.release(backend.id()), "release listening slot:");

    match result? {
        Some((chan, _)) => Ok(chan),
        None => Err(Error::ConnectionClosed),
    }
}

/// Proxy side, active mode: connect to a target listening on `port`.
pub fn connect_to_target(
    backend: &Backend,
    port: u16,
    processes: &dyn ProcessTable,
    watch: &Watch,
) -> Result<Channel, Error> {
    let slots = &backend.shared()?.slots;
    if slots.find(SlotStatus::ListeningForProxy, port)?.is_none() {
        return Err(Error::TargetNotListening(port));
    }
    connect_with_slot(backend, SlotStatus::ProxyConnecting, port, processes, watch)
}

/// Target side, active mode: connect to a proxy waiting for global breakpoints on `port`.
pub fn connect_to_proxy(
    backend: &Backend,
    port: u16,
    processes: &dyn ProcessTable,
    watch: &Watch,
) -> Result<Channel, Error> {
    connect_with_slot(backend, SlotStatus::ConnectingToProxy, port, processes, watch)
}

/// Proxy side, passive mode: wait for a target hitting one of our global breakpoints.
/// Return connection and target pid, or `None` after the deadline.
pub fn accept_target(
    backend: &Backend,
    listener: &TcpListener,
    processes: &dyn ProcessTable,
    watch: &Watch,
    deadline: Instant,
) -> Result<Option<(Channel, i32)>, Error> {
    accept_matching(
        backend,
        listener,
        SlotStatus::ConnectingToProxy,
        processes,
        watch,
        Some(deadline),
    )
}
