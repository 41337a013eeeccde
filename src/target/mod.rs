//! Debuggee side of a session.
//!
//! The agent is driven by the interpreter through [`DebugHooks`]. While no proxy is
//! attached and no breakpoint exists for a routine, a statement hook costs one flag check.
//! When a breakpoint fires (or stepping is armed) the agent acquires a proxy, reports the
//! stop position and serves proxy commands until one of them resumes execution.

pub mod frame;
pub mod hooks;

use crate::breakpoint::{Breakpoint, BreakpointData, BreakpointKey, BreakpointRegistry, Scope, ANY_LINE};
use crate::catalog::RoutineId;
use crate::comm::handshake::{ProcessTable, SysinfoProcessTable};
use crate::comm::rendezvous;
use crate::comm::wire::{Channel, Watch};
use crate::comm::Backend;
use crate::error::Error;
use crate::protocol::{self, BreakpointRecord, Command, StopEvent, Variable};
use crate::{pldbg_debug, pldbg_info, pldbg_warn, weak_error};
use frame::{FrameArena, Symbols};
use hooks::{DebugHooks, ExecutionContext, Flow, FrameId};
use itertools::Itertools;

/// Observable state of a target agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No proxy attached.
    NotDebugged,
    /// Proxy attached, running until a breakpoint.
    AttachedRunning,
    /// Proxy attached, stop at the next statement.
    AttachedStepping,
    /// Stopped, serving proxy commands.
    AttachedWaiting,
}

/// Connection to the proxy this target is attached to.
struct Attachment {
    chan: Channel,
    /// Pid of the proxy whose global breakpoints were claimed by this session.
    claimed_from: Option<i32>,
}

/// Outcome of one served command.
enum Served {
    Stay,
    Resume(Flow),
}

pub type NoticeFn = Box<dyn FnMut(&str) + Send>;

pub struct TargetAgent {
    backend: Backend,
    processes: Box<dyn ProcessTable>,
    watch: Watch,
    notice: NoticeFn,
    registry: Option<BreakpointRegistry>,
    frames: FrameArena,
    attachment: Option<Attachment>,
    step_into_next: bool,
    waiting: bool,
}

impl TargetAgent {
    pub fn new(backend: Backend) -> Self {
        let watch = Watch::from_config(backend.config());
        Self {
            backend,
            processes: Box::new(SysinfoProcessTable),
            watch,
            notice: Box::new(|msg| pldbg_info!(target: "target", "{msg}")),
            registry: None,
            frames: FrameArena::default(),
            attachment: None,
            step_into_next: false,
            waiting: false,
        }
    }

    /// Replace the default watch (e.g. to add the client-facing connection of the worker).
    pub fn with_watch(mut self, watch: Watch) -> Self {
        self.watch = watch;
        self
    }

    /// Set receiver of notices addressed to the client of the worker
    /// (the `PLDBGBREAK:<port>` announcement).
    pub fn with_notice(mut self, notice: impl FnMut(&str) + Send + 'static) -> Self {
        self.notice = Box::new(notice);
        self
    }

    pub fn with_process_table(mut self, processes: impl ProcessTable + 'static) -> Self {
        self.processes = Box::new(processes);
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn state(&self) -> AgentState {
        if self.attachment.is_none() {
            AgentState::NotDebugged
        } else if self.waiting {
            AgentState::AttachedWaiting
        } else if self.step_into_next || self.frames.any_stepping() {
            AgentState::AttachedStepping
        } else {
            AgentState::AttachedRunning
        }
    }

    fn registry(&mut self) -> Result<&mut BreakpointRegistry, Error> {
        if self.registry.is_none() {
            let shared = self.backend.shared()?.clone();
            self.registry = Some(BreakpointRegistry::new(shared));
        }
        self.registry
            .as_mut()
            .ok_or_else(|| Error::Protocol("breakpoint registry unavailable".to_string()))
    }

    fn local_key(&self, routine: RoutineId, line: i32) -> BreakpointKey {
        BreakpointKey {
            database: self.backend.database(),
            routine,
            line,
            target_pid: self.backend.pid(),
        }
    }

    /// Stop at the first statement of the next invocation of `routine` in this process
    /// and wait for a proxy there.
    pub fn debug_routine(&mut self, routine: RoutineId) -> Result<(), Error> {
        let key = self.local_key(routine, ANY_LINE);
        self.registry()?
            .insert_or_update(Scope::Local, key, BreakpointData::default())
    }

    fn has_breakpoints(&mut self, routine: RoutineId) -> bool {
        let (database, pid) = (self.backend.database(), self.backend.pid());
        let res = self
            .registry()
            .and_then(|reg| reg.has_any_for_routine(database, routine, pid));
        weak_error!(res, "breakpoint check:").unwrap_or(false)
    }

    fn breakpoint_hit(
        &mut self,
        routine: RoutineId,
        line: i32,
        at_entry: bool,
    ) -> Option<(Scope, Breakpoint)> {
        let (database, pid) = (self.backend.database(), self.backend.pid());
        let res = self
            .registry()
            .and_then(|reg| reg.find_hit(database, routine, line, pid));
        let (scope, bp) = weak_error!(res, "breakpoint lookup:")??;
        // any-line breakpoints fire once per invocation, at entry
        if bp.key.line == ANY_LINE && !at_entry {
            return None;
        }
        Some((scope, bp))
    }

    /// Acquire a proxy: connect to the proxy that owns a global breakpoint, or listen and
    /// wait for one otherwise.
    fn attach(&mut self, hit: Option<&Breakpoint>) -> Result<(), Error> {
        let attachment = match hit {
            Some(bp) if bp.is_global_claim() => {
                let port = u16::try_from(bp.data.proxy_port)
                    .map_err(|_| Error::Protocol(format!("invalid proxy port {}", bp.data.proxy_port)))?;
                let chan = rendezvous::connect_to_proxy(
                    &self.backend,
                    port,
                    self.processes.as_ref(),
                    &self.watch,
                )?;
                let pid = self.backend.pid();
                self.registry()?.busy_session(bp.data.proxy_pid, pid)?;
                Attachment {
                    chan,
                    claimed_from: Some(bp.data.proxy_pid),
                }
            }
            _ => {
                let notice = &mut self.notice;
                let chan = rendezvous::listen_for_proxy(
                    &self.backend,
                    self.processes.as_ref(),
                    &self.watch,
                    &mut |port| notice(&protocol::break_notice(port)),
                )?;
                Attachment {
                    chan,
                    claimed_from: None,
                }
            }
        };
        pldbg_debug!(target: "target", "attached to proxy");
        self.attachment = Some(attachment);
        Ok(())
    }

    /// Close the proxy connection and forget every debugging decision of this invocation.
    fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            if let Some(proxy_pid) = attachment.claimed_from {
                let res = self.registry().and_then(|reg| reg.free_session(proxy_pid));
                weak_error!(res, "release claimed breakpoints:");
            }
            pldbg_debug!(target: "target", "detached from proxy");
        }
        for frame in self.frames.iter_mut() {
            frame.stepping = false;
            frame.debugged = false;
        }
        self.step_into_next = false;
        self.waiting = false;
    }

    fn forget_breakpoint(&mut self, scope: Scope, key: &BreakpointKey) {
        let res = self.registry().and_then(|reg| reg.delete(scope, key));
        weak_error!(res, "delete breakpoint:");
    }

    /// Report the stop position and serve commands until one of them resumes execution.
    fn stop(&mut self, ctx: &mut dyn ExecutionContext, frame_id: FrameId, line: i32) -> Flow {
        self.step_into_next = false;
        if let Some(frame) = self.frames.get_mut(frame_id) {
            frame.stepping = false;
            if frame.symbols.is_none() {
                frame.symbols = Some(Symbols::complete(&ctx.variables(0)));
            }
        }

        let Some(current) = ctx.frame(0) else {
            return Flow::Continue;
        };
        let event = StopEvent {
            routine: current.routine,
            line,
            name: current.name,
        };

        self.waiting = true;
        let result = self.serve(ctx, frame_id, event);
        self.waiting = false;

        match result {
            Ok(flow) => flow,
            Err(e) => {
                pldbg_warn!(target: "target", "debugger session lost: {e}");
                self.detach();
                Flow::Continue
            }
        }
    }

    fn serve(
        &mut self,
        ctx: &mut dyn ExecutionContext,
        frame_id: FrameId,
        event: StopEvent,
    ) -> Result<Flow, Error> {
        let mut selected = 0usize;
        self.chan()?.send_str(&event.to_string())?;

        loop {
            let msg = self.chan()?.recv_string()?;
            // the proxy expects a reply to every command, an unknown one ends the session
            let cmd: Command = self.chan()?.decoded(msg.parse())?;
            if let Served::Resume(flow) = self.serve_command(ctx, frame_id, &mut selected, cmd)? {
                return Ok(flow);
            }
        }
    }

    fn chan(&mut self) -> Result<&mut Channel, Error> {
        self.attachment
            .as_mut()
            .map(|a| &mut a.chan)
            .ok_or(Error::ConnectionClosed)
    }

    fn serve_command(
        &mut self,
        ctx: &mut dyn ExecutionContext,
        frame_id: FrameId,
        selected: &mut usize,
        cmd: Command,
    ) -> Result<Served, Error> {
        match cmd {
            Command::StepInto => {
                self.step_into_next = true;
                if let Some(frame) = self.frames.get_mut(frame_id) {
                    frame.stepping = true;
                }
                return Ok(Served::Resume(Flow::Continue));
            }
            Command::StepOver => {
                let target = self.frames.by_level(*selected).unwrap_or(frame_id);
                if let Some(frame) = self.frames.get_mut(target) {
                    frame.stepping = true;
                }
                return Ok(Served::Resume(Flow::Continue));
            }
            Command::Continue => {
                for frame in self.frames.iter_mut() {
                    frame.stepping = false;
                }
                return Ok(Served::Resume(Flow::Continue));
            }
            Command::Abort => {
                self.chan()?.send_bool(true)?;
                return Ok(Served::Resume(Flow::Abort));
            }
            Command::Variables => self.send_variables(ctx, *selected)?,
            Command::Stack => self.send_stack(ctx)?,
            Command::Breakpoints => self.send_breakpoints(ctx)?,
            Command::SelectFrame(level) => match ctx.frame(level as usize) {
                Some(info) => {
                    *selected = level as usize;
                    let event = StopEvent {
                        routine: info.routine,
                        line: info.line,
                        name: info.name,
                    };
                    self.chan()?.send_str(&event.to_string())?;
                }
                None => self.chan()?.send_end()?,
            },
            Command::SetBreakpoint(routine, line) => {
                let key = self.local_key(routine, line);
                let added = self
                    .registry()?
                    .insert(Scope::Local, key, BreakpointData::default())?;
                self.chan()?.send_bool(added)?;
            }
            Command::ClearBreakpoint(routine, line) => {
                let key = self.local_key(routine, line);
                let found = self.registry()?.delete(Scope::Local, &key)?;
                self.chan()?.send_bool(found)?;
            }
            Command::Source(routine) => {
                let source = ctx.source(routine).unwrap_or_default();
                self.chan()?.send_str(&source)?;
            }
            Command::Deposit { name, line, value } => {
                let ok = self.deposit(ctx, *selected, &name, line, &value);
                self.chan()?.send_bool(ok)?;
            }
        }
        Ok(Served::Stay)
    }

    fn frame_symbols(&mut self, ctx: &dyn ExecutionContext, level: usize) -> Symbols {
        let datums = ctx.variables(level);
        match self
            .frames
            .by_level(level)
            .and_then(|id| self.frames.get_mut(id))
        {
            Some(frame) => frame
                .symbols
                .get_or_insert_with(|| Symbols::complete(&datums))
                .clone(),
            None => Symbols::complete(&datums),
        }
    }

    fn send_variables(&mut self, ctx: &dyn ExecutionContext, level: usize) -> Result<(), Error> {
        let symbols = self.frame_symbols(ctx, level);
        let records: Vec<Variable> = ctx
            .variables(level)
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| symbols.is_visible(*idx))
            .map(|(idx, datum)| Variable {
                name: datum.name,
                class: datum.class,
                line: datum.line,
                unique: symbols.is_unique(idx),
                is_const: datum.is_const,
                not_null: datum.not_null,
                type_id: datum.type_id,
                value: datum.value,
            })
            .collect();

        let chan = self.chan()?;
        for var in records {
            chan.send_str(&var.to_string())?;
        }
        chan.send_end()
    }

    fn send_stack(&mut self, ctx: &dyn ExecutionContext) -> Result<(), Error> {
        let frames: Vec<_> = (0..ctx.depth()).filter_map(|level| ctx.frame(level)).collect();
        let chan = self.chan()?;
        for frame in frames {
            let args = frame
                .args
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .join(", ");
            chan.send_str(&format!(
                "{}:{}:{}:{}",
                frame.name, frame.routine, frame.line, args
            ))?;
        }
        chan.send_end()
    }

    fn send_breakpoints(&mut self, ctx: &dyn ExecutionContext) -> Result<(), Error> {
        let (database, pid) = (self.backend.database(), self.backend.pid());
        let registry = self.registry()?;
        let mut all = registry.list(Scope::Local)?;
        all.extend(registry.list(Scope::Global)?);

        let records: Vec<BreakpointRecord> = all
            .into_iter()
            .filter(|bp| bp.key.database == database && bp.key.matches_process(pid))
            .map(|bp| (bp.key.routine, bp.key.line))
            .sorted()
            .dedup()
            .map(|(routine, line)| BreakpointRecord {
                routine,
                line,
                name: ctx.routine_name(routine).unwrap_or_default(),
            })
            .collect();

        let chan = self.chan()?;
        for record in records {
            chan.send_str(&record.to_string())?;
        }
        chan.send_end()
    }

    /// Assign a value to a visible variable: first as an expression, then as a quoted literal.
    fn deposit(
        &mut self,
        ctx: &mut dyn ExecutionContext,
        level: usize,
        name: &str,
        line: i32,
        value: &str,
    ) -> bool {
        let symbols = self.frame_symbols(ctx, level);
        let Some(datum) = ctx
            .variables(level)
            .iter()
            .enumerate()
            .position(|(idx, d)| {
                symbols.is_visible(idx) && d.name == name && (line == ANY_LINE || d.line == line)
            })
        else {
            return false;
        };

        if let Err(e) = ctx.assign(level, datum, value) {
            pldbg_debug!(target: "target", "deposit {value:?} as expression failed: {e}");
            let literal = format!("'{}'", value.replace('\'', "''"));
            return weak_error!(ctx.assign(level, datum, &literal), "deposit:").is_some();
        }
        true
    }
}

impl DebugHooks for TargetAgent {
    fn on_routine_start(&mut self, _: &dyn ExecutionContext, routine: RoutineId) -> FrameId {
        let stepping = self.step_into_next;
        let debugged = stepping || self.attachment.is_some() || self.has_breakpoints(routine);
        self.frames.push(routine, debugged, stepping)
    }

    fn on_statement(&mut self, ctx: &mut dyn ExecutionContext, frame_id: FrameId, line: i32) -> Flow {
        let Some(frame) = self.frames.get_mut(frame_id) else {
            return Flow::Continue;
        };
        let at_entry = std::mem::replace(&mut frame.at_entry, false);
        if !frame.debugged && self.attachment.is_none() {
            return Flow::Continue;
        }
        let (routine, stepping) = (frame.routine, frame.stepping);

        let hit = if stepping {
            None
        } else {
            match self.breakpoint_hit(routine, line, at_entry) {
                Some(hit) => Some(hit),
                None => return Flow::Continue,
            }
        };

        if self.attachment.is_none() {
            if let Err(e) = self.attach(hit.as_ref().map(|(_, bp)| bp)) {
                pldbg_warn!(target: "target", "unable to attach to a debugger proxy: {e}");
                if let Some((scope, bp)) = hit {
                    self.forget_breakpoint(scope, &bp.key);
                }
                self.detach();
                return Flow::Continue;
            }
        }

        if let Some((scope, bp)) = hit {
            if bp.data.temporary {
                self.forget_breakpoint(scope, &bp.key);
            }
        }

        self.stop(ctx, frame_id, line)
    }

    fn on_routine_end(&mut self, _: &dyn ExecutionContext, frame_id: FrameId) {
        let ended = self.frames.pop(frame_id);
        if self.frames.is_empty() {
            self.detach();
            return;
        }
        // stepping out of a routine stops in its caller
        if ended.is_some_and(|f| f.stepping && self.attachment.is_some()) {
            if let Some(caller) = self.frames.innermost_mut() {
                caller.stepping = true;
            }
        }
    }
}
