//! Relay side of a session.
//!
//! A proxy holds any number of sessions, each a connection to one target (or a listener
//! waiting for targets that hit this proxy's global breakpoints). Every operation is a
//! synchronous request/response exchange with the target of the session.

pub mod session;
pub mod stream;

use crate::breakpoint::{BreakpointData, BreakpointKey, ANY_LINE, ANY_PROCESS};
use crate::catalog::{RoutineId, RoutineResolver, TargetInfo};
use crate::comm::handshake::{ProcessTable, SysinfoProcessTable};
use crate::comm::rendezvous;
use crate::comm::wire::{Channel, Watch};
use crate::comm::Backend;
use crate::error::Error;
use crate::protocol::{BreakpointRecord, Command, StackFrame, StopEvent, Variable};
use crate::version::{server_version, PROXY_API_VERSION};
use crate::{pldbg_debug, pldbg_info, weak_error};
pub use session::{Session, SessionHandle, SessionTable};
use std::time::Instant;
pub use stream::RecordStream;

/// Result of a resuming command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Target stopped again.
    Stopped(StopEvent),
    /// Target ran to completion and closed the session connection.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInfo {
    pub server_version: String,
    pub proxy_api_version: u32,
    pub server_pid: i32,
}

pub struct ProxyAgent {
    backend: Backend,
    processes: Box<dyn ProcessTable>,
    watch: Watch,
    sessions: SessionTable,
    resolver: Option<Box<dyn RoutineResolver>>,
}

impl ProxyAgent {
    pub fn new(backend: Backend) -> Self {
        let watch = Watch::from_config(backend.config());
        Self {
            backend,
            processes: Box::new(SysinfoProcessTable),
            watch,
            sessions: SessionTable::default(),
            resolver: None,
        }
    }

    pub fn with_watch(mut self, watch: Watch) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_process_table(mut self, processes: impl ProcessTable + 'static) -> Self {
        self.processes = Box::new(processes);
        self
    }

    pub fn with_resolver(mut self, resolver: impl RoutineResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Connect to a target announced on `port` and read its first stop event.
    pub fn attach_to_port(&mut self, port: u16) -> Result<SessionHandle, Error> {
        let mut chan =
            rendezvous::connect_to_target(&self.backend, port, self.processes.as_ref(), &self.watch)?;
        let event: StopEvent = chan.recv_parsed()?;
        pldbg_info!(target: "proxy", "attached to target on port {port}, stopped at {event}");
        self.sessions.add(Session::connected(chan, Some(event)))
    }

    /// Open a listener for targets hitting global breakpoints of this proxy.
    pub fn create_listener(&mut self) -> Result<SessionHandle, Error> {
        let (listener, port) = rendezvous::loopback_listener()?;
        pldbg_debug!(target: "proxy", "waiting for targets on port {port}");
        self.sessions.add(Session::listening(listener, port))
    }

    /// Set a global breakpoint served by the listener session `handle`.
    /// `None` line or pid means any line or any process.
    pub fn set_global_breakpoint(
        &mut self,
        handle: SessionHandle,
        routine: RoutineId,
        line: Option<i32>,
        target_pid: Option<i32>,
    ) -> Result<(), Error> {
        let (resolved, session) = self.sessions.get_mut(handle)?;
        let port = session.listener_port().ok_or(Error::NotAListener(resolved))?;

        let key = BreakpointKey {
            database: self.backend.database(),
            routine,
            line: line.unwrap_or(ANY_LINE),
            target_pid: target_pid.unwrap_or(ANY_PROCESS),
        };
        let data = BreakpointData {
            temporary: false,
            busy: false,
            proxy_port: i32::from(port),
            proxy_pid: self.backend.pid(),
        };
        if !self.backend.shared()?.globals.insert(key, data)? {
            return Err(Error::BreakpointConflict);
        }
        pldbg_debug!(target: "proxy", "global breakpoint {key} set");
        Ok(())
    }

    /// Wait for a target hitting one of our global breakpoints. Return the target pid, or
    /// `None` if nothing arrived within the configured timeout.
    pub fn wait_for_target(&mut self, handle: SessionHandle) -> Result<Option<i32>, Error> {
        let globals = &self.backend.shared()?.globals;
        // a previous session of this proxy is over, its breakpoints are available again
        globals.set_busy(self.backend.pid(), false)?;

        let (resolved, session) = self.sessions.get_mut(handle)?;
        let (listener, _) = session
            .listener
            .as_ref()
            .ok_or(Error::NotAListener(resolved))?;
        let deadline = Instant::now() + self.backend.config().wait_timeout();

        let Some((mut chan, pid)) = rendezvous::accept_target(
            &self.backend,
            listener,
            self.processes.as_ref(),
            &self.watch,
            deadline,
        )?
        else {
            return Ok(None);
        };
        let event: StopEvent = chan.recv_parsed()?;
        pldbg_info!(target: "proxy", "target {pid} stopped at {event}");

        session.chan = Some(chan);
        session.pending = Some(event);
        session.target_pid = Some(pid);
        Ok(Some(pid))
    }

    /// Session of `handle` with a usable connection.
    fn connected(&mut self, handle: SessionHandle) -> Result<&mut Session, Error> {
        let (resolved, session) = self.sessions.get_mut(handle)?;
        match session.chan.as_ref().map(Channel::is_broken) {
            Some(true) => {
                session.chan = None;
                Err(Error::ConnectionClosed)
            }
            Some(false) => Ok(session),
            None => Err(Error::SessionNotConnected(resolved)),
        }
    }

    fn channel(&mut self, handle: SessionHandle) -> Result<&mut Channel, Error> {
        self.connected(handle)?.channel()
    }

    /// Return the stop event read while attaching, or wait for the next one.
    pub fn wait_for_breakpoint(&mut self, handle: SessionHandle) -> Result<StopEvent, Error> {
        let session = self.connected(handle)?;
        if let Some(event) = session.pending.take() {
            return Ok(event);
        }
        session.channel()?.recv_parsed()
    }

    fn resume(&mut self, handle: SessionHandle, cmd: Command) -> Result<StepOutcome, Error> {
        let session = self.connected(handle)?;
        session.pending = None;
        let chan = session.channel()?;
        chan.send_str(&cmd.to_string())?;
        match chan.recv_opt()? {
            Some(msg) => {
                let event = String::from_utf8(msg)
                    .map_err(Error::from)
                    .and_then(|msg| msg.parse());
                Ok(StepOutcome::Stopped(chan.decoded(event)?))
            }
            None => {
                pldbg_debug!(target: "proxy", "target finished");
                session.chan = None;
                Ok(StepOutcome::Finished)
            }
        }
    }

    pub fn step_into(&mut self, handle: SessionHandle) -> Result<StepOutcome, Error> {
        self.resume(handle, Command::StepInto)
    }

    pub fn step_over(&mut self, handle: SessionHandle) -> Result<StepOutcome, Error> {
        self.resume(handle, Command::StepOver)
    }

    pub fn continue_(&mut self, handle: SessionHandle) -> Result<StepOutcome, Error> {
        self.resume(handle, Command::Continue)
    }

    /// Cancel the statement running in the target.
    pub fn abort_target(&mut self, handle: SessionHandle) -> Result<bool, Error> {
        let chan = self.channel(handle)?;
        chan.send_str(&Command::Abort.to_string())?;
        chan.recv_bool()
    }

    /// Make frame `level` current for variable inspection and deposits.
    pub fn select_frame(&mut self, handle: SessionHandle, level: u32) -> Result<StopEvent, Error> {
        let chan = self.channel(handle)?;
        chan.send_str(&Command::SelectFrame(level).to_string())?;
        let reply = chan.recv_string()?;
        if reply.is_empty() {
            return Err(Error::InvalidFrame(level));
        }
        chan.decoded(reply.parse())
    }

    pub fn get_source(&mut self, handle: SessionHandle, routine: RoutineId) -> Result<String, Error> {
        let chan = self.channel(handle)?;
        chan.send_str(&Command::Source(routine).to_string())?;
        chan.recv_string()
    }

    fn records<T>(
        &mut self,
        handle: SessionHandle,
        cmd: Command,
        parse: fn(u32, &str) -> Result<T, Error>,
    ) -> Result<RecordStream<'_, T>, Error> {
        let chan = self.channel(handle)?;
        chan.send_str(&cmd.to_string())?;
        Ok(RecordStream::new(chan, parse))
    }

    pub fn get_breakpoints(
        &mut self,
        handle: SessionHandle,
    ) -> Result<RecordStream<'_, BreakpointRecord>, Error> {
        self.records(handle, Command::Breakpoints, |_, raw| raw.parse())
    }

    pub fn get_variables(
        &mut self,
        handle: SessionHandle,
    ) -> Result<RecordStream<'_, Variable>, Error> {
        self.records(handle, Command::Variables, |_, raw| raw.parse())
    }

    pub fn get_stack(&mut self, handle: SessionHandle) -> Result<RecordStream<'_, StackFrame>, Error> {
        self.records(handle, Command::Stack, StackFrame::parse)
    }

    /// Set a breakpoint local to the target of the session.
    pub fn set_breakpoint(
        &mut self,
        handle: SessionHandle,
        routine: RoutineId,
        line: i32,
    ) -> Result<bool, Error> {
        let chan = self.channel(handle)?;
        chan.send_str(&Command::SetBreakpoint(routine, line).to_string())?;
        chan.recv_bool()
    }

    pub fn drop_breakpoint(
        &mut self,
        handle: SessionHandle,
        routine: RoutineId,
        line: i32,
    ) -> Result<bool, Error> {
        let chan = self.channel(handle)?;
        chan.send_str(&Command::ClearBreakpoint(routine, line).to_string())?;
        chan.recv_bool()
    }

    /// Assign `value` to variable `name` of the selected frame. `None` line means the
    /// variable may be declared at any line.
    pub fn deposit_value(
        &mut self,
        handle: SessionHandle,
        name: &str,
        line: Option<i32>,
        value: &str,
    ) -> Result<bool, Error> {
        if name.is_empty() || name.contains('=') {
            return Err(Error::InvalidVariableName(name.to_string()));
        }
        let cmd = Command::Deposit {
            name: name.to_string(),
            line: line.unwrap_or(ANY_LINE),
            value: value.to_string(),
        };
        let chan = self.channel(handle)?;
        chan.send_str(&cmd.to_string())?;
        chan.recv_bool()
    }

    pub fn get_proxy_info(&self) -> ProxyInfo {
        ProxyInfo {
            server_version: server_version().to_string(),
            proxy_api_version: PROXY_API_VERSION,
            server_pid: self.backend.pid(),
        }
    }

    pub fn get_target_info(&self, name_or_id: &str) -> Result<TargetInfo, Error> {
        match self.resolver {
            Some(ref resolver) => resolver.resolve(name_or_id),
            None => Err(Error::UnknownRoutine(name_or_id.to_string())),
        }
    }

    /// Close a session. A target stopped in it continues without a debugger.
    pub fn close(&mut self, handle: SessionHandle) -> Result<(), Error> {
        let session = self.sessions.remove(handle)?;
        if let Some(port) = session.listener_port() {
            pldbg_debug!(target: "proxy", "listener on port {port} closed");
        }
        Ok(())
    }

    /// Close every session and forget everything this proxy left in the shared registry.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        let closed = self.sessions.drain().count();
        let shared = self.backend.shared()?;
        let removed = shared.globals.cleanup_process(self.backend.pid())?;
        weak_error!(shared.slots.release(self.backend.id()), "release slot:");
        pldbg_debug!(
            target: "proxy",
            "shutdown: {closed} sessions closed, {removed} global breakpoints removed"
        );
        Ok(())
    }
}

impl Drop for ProxyAgent {
    fn drop(&mut self) {
        weak_error!(self.shutdown(), "proxy shutdown:");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::{BackendId, SharedState};
    use crate::config::Config;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::Duration;

    fn proxy(name: &str) -> ProxyAgent {
        let dir = std::env::temp_dir().join(format!("pldbg-proxy-{name}-{}", std::process::id()));
        let config = Arc::new(Config::default().with_runtime_dir(dir));
        let shared = Arc::new(SharedState::create(&config).unwrap());
        let backend = Backend::new(BackendId::from_raw(7).unwrap(), config).with_shared(shared);
        ProxyAgent::new(backend).with_watch(Watch::new(Duration::from_millis(20)))
    }

    /// Session connected to a fake target, the target end is returned.
    fn fake_target(proxy: &mut ProxyAgent) -> (SessionHandle, Channel) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (server, _) = listener.accept().unwrap();
        let watch = Watch::new(Duration::from_millis(20));
        let chan = Channel::new(client, watch.clone()).unwrap();
        let handle = proxy.sessions.add(Session::connected(chan, None)).unwrap();
        (handle, Channel::new(server, watch).unwrap())
    }

    #[test]
    fn test_malformed_stop_event_tears_session_down() {
        let mut proxy = proxy("stop-event");
        let (h, mut target) = fake_target(&mut proxy);
        target.send_str("garbage-no-colons").unwrap();

        assert!(matches!(proxy.step_into(h), Err(Error::Protocol(_))));
        assert_eq!(target.recv_string().unwrap(), "s");
        assert!(matches!(proxy.get_stack(h).err(), Some(Error::ConnectionClosed)));
        assert!(matches!(
            proxy.step_into(h),
            Err(Error::SessionNotConnected(_))
        ));
    }

    #[test]
    fn test_malformed_record_tears_session_down() {
        let mut proxy = proxy("record");
        let (h, mut target) = fake_target(&mut proxy);
        for record in ["bad", "x:l:1:t:f:f:20:5", ""] {
            target.send_str(record).unwrap();
        }

        let oks: Vec<_> = proxy
            .get_variables(h)
            .unwrap()
            .map(|var| var.is_ok())
            .collect();
        assert_eq!(oks, vec![false]);
        assert!(matches!(proxy.continue_(h), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_malformed_frame_reply_tears_session_down() {
        let mut proxy = proxy("frame");
        let (h, mut target) = fake_target(&mut proxy);
        target.send_str("1:x").unwrap();

        assert!(matches!(proxy.select_frame(h, 1), Err(Error::Protocol(_))));
        assert!(matches!(proxy.get_source(h, RoutineId(1)), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_deposit_rejects_bad_variable_name() {
        let mut proxy = proxy("deposit");
        let (h, mut target) = fake_target(&mut proxy);

        for name in ["", "a=b"] {
            assert!(matches!(
                proxy.deposit_value(h, name, None, "1"),
                Err(Error::InvalidVariableName(n)) if n == name
            ));
        }
        // nothing was sent, the session is still usable
        target.send_bool(true).unwrap();
        assert!(proxy.deposit_value(h, "x", Some(2), "1").unwrap());
        assert_eq!(target.recv_string().unwrap(), "d x.2=1");
    }
}
