//! Message framing between a target and a proxy.
//!
//! Every message is a big-endian `u32` length followed by that many raw bytes, no
//! terminator. Booleans travel as the one-letter strings `t` and `f`, an empty message
//! terminates a sequence of records.
//!
//! Reads never block unconditionally: each one is a multiplexed wait on the debugger
//! socket and on the client-facing connection of the worker process, woken up every
//! tick to check that the supervising server process is still alive.

use crate::config::Config;
use crate::error::Error;
use crate::pldbg_debug;
use bytes::{BufMut, BytesMut};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::str::FromStr;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Protects against a peer that lost framing, no legal message comes close to this.
const MAX_MESSAGE_LEN: u32 = 16 * 1024 * 1024;

const TRUE: &[u8] = b"t";
const FALSE: &[u8] = b"f";

/// Things to keep an eye on while blocked in a debugger wait.
#[derive(Clone)]
pub struct Watch {
    client: Option<Arc<dyn AsFd + Send + Sync>>,
    supervisor: Option<Pid>,
    tick: Duration,
}

impl Watch {
    pub fn new(tick: Duration) -> Self {
        Self {
            client: None,
            supervisor: None,
            tick,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let watch = Self::new(config.poll_interval());
        match config.supervisor_pid {
            Some(pid) => watch.with_supervisor(pid),
            None => watch,
        }
    }

    /// Any activity on this descriptor (data or hangup) abandons the wait.
    pub fn with_client(mut self, client: Arc<dyn AsFd + Send + Sync>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_supervisor(mut self, pid: i32) -> Self {
        self.supervisor = Some(Pid::from_raw(pid));
        self
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    fn check_supervisor(&self) -> Result<(), Error> {
        if let Some(pid) = self.supervisor {
            if kill(pid, None) == Err(Errno::ESRCH) {
                return Err(Error::SupervisorGone(pid.as_raw()));
            }
        }
        Ok(())
    }

    /// Block until `fd` is readable (or hung up). Return `false` if the deadline passes first.
    pub fn wait_readable(&self, fd: BorrowedFd, deadline: Option<Instant>) -> Result<bool, Error> {
        loop {
            let mut timeout = self.tick;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                timeout = timeout.min(deadline - now);
            }
            let timeout_ms = timeout.as_millis().clamp(1, i32::MAX as u128) as i32;

            let client = self.client.as_deref().map(|c| c.as_fd());
            let mut fds = vec![PollFd::new(&fd, PollFlags::POLLIN)];
            if let Some(client) = client.as_ref() {
                fds.push(PollFd::new(client, PollFlags::POLLIN));
            }

            match poll(&mut fds, timeout_ms) {
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::Syscall("poll", e)),
                Ok(0) => self.check_supervisor()?,
                Ok(_) => {
                    let ready = |pfd: &PollFd| pfd.revents().is_some_and(|r| !r.is_empty());
                    if fds.len() > 1 && ready(&fds[1]) {
                        return Err(Error::ClientGone);
                    }
                    if ready(&fds[0]) {
                        return Ok(true);
                    }
                }
            }
        }
    }
}

/// One end of a target-proxy connection.
pub struct Channel {
    stream: TcpStream,
    watch: Watch,
    broken: bool,
}

impl Channel {
    pub fn new(stream: TcpStream, watch: Watch) -> Result<Self, Error> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            watch,
            broken: false,
        })
    }

    /// True after a connection-fatal error, the channel must not be used anymore.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn local_port(&self) -> Result<u16, Error> {
        Ok(self.stream.local_addr()?.port())
    }

    fn track<T>(&mut self, res: Result<T, Error>) -> Result<T, Error> {
        if let Err(ref e) = res {
            if e.is_session_fatal() {
                pldbg_debug!(target: "comm", "debugger channel broken: {e}");
                self.broken = true;
            }
        }
        res
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        let res = self.stream.write_all(&buf).map_err(io_error);
        self.track(res)
    }

    pub fn send_str(&mut self, s: &str) -> Result<(), Error> {
        self.send(s.as_bytes())
    }

    pub fn send_bool(&mut self, value: bool) -> Result<(), Error> {
        self.send(if value { TRUE } else { FALSE })
    }

    /// End of a record sequence.
    pub fn send_end(&mut self) -> Result<(), Error> {
        self.send(&[])
    }

    /// Raw `u32` without length prefix (handshake pid).
    pub fn send_u32(&mut self, value: u32) -> Result<(), Error> {
        let res = self.stream.write_all(&value.to_be_bytes()).map_err(io_error);
        self.track(res)
    }

    pub fn recv_u32(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        let res = self.fill(&mut buf, false).map(|_| u32::from_be_bytes(buf));
        self.track(res)
    }

    /// Read one message, `None` if the peer closed the connection cleanly between messages.
    pub fn recv_opt(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let res = self.read_message();
        self.track(res)
    }

    pub fn recv(&mut self) -> Result<Vec<u8>, Error> {
        self.recv_opt()?.ok_or(Error::ConnectionClosed)
    }

    pub fn recv_string(&mut self) -> Result<String, Error> {
        let res = self.recv().and_then(|bytes| Ok(String::from_utf8(bytes)?));
        self.track(res)
    }

    /// Read one message and decode it as a record.
    pub fn recv_parsed<T: FromStr<Err = Error>>(&mut self) -> Result<T, Error> {
        let res = self.recv_string().and_then(|msg| msg.parse());
        self.track(res)
    }

    /// Pass through the outcome of decoding a received message. A message that can't be
    /// decoded breaks the channel like any other protocol error.
    pub fn decoded<T>(&mut self, res: Result<T, Error>) -> Result<T, Error> {
        self.track(res)
    }

    pub fn recv_bool(&mut self) -> Result<bool, Error> {
        let msg = self.recv()?;
        let res = match msg.as_slice() {
            TRUE => Ok(true),
            FALSE => Ok(false),
            other => Err(Error::Protocol(format!(
                "boolean expected, got {:?}",
                String::from_utf8_lossy(other)
            ))),
        };
        self.track(res)
    }

    fn read_message(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut len = [0u8; 4];
        if !self.fill(&mut len, true)? {
            return Ok(None);
        }
        let len = u32::from_be_bytes(len);
        if len > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!("message length {len} is too large")));
        }
        let mut payload = vec![0u8; len as usize];
        self.fill(&mut payload, false)?;
        Ok(Some(payload))
    }

    /// Fill the buffer from the socket. Return false if EOF was met before the first byte
    /// and `allow_eof` is set.
    fn fill(&mut self, buf: &mut [u8], allow_eof: bool) -> Result<bool, Error> {
        let mut read = 0;
        while read < buf.len() {
            self.watch.wait_readable(self.stream.as_fd(), None)?;
            match (&self.stream).read(&mut buf[read..]) {
                Ok(0) if read == 0 && allow_eof => return Ok(false),
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(io_error(e)),
            }
        }
        Ok(true)
    }
}

fn io_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted => {
            Error::ConnectionClosed
        }
        _ => Error::IO(e),
    }
}
