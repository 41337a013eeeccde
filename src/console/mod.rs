//! Interactive proxy console.
//!
//! Every console command maps onto one proxy operation against the current session.
use crate::catalog::RoutineId;
use crate::console::command::{ConsoleCommand, RoutineRef};
use crate::console::editor::{create_editor, CommandCompleter, RLHelper};
use crate::console::help::HELP;
use crate::console::print::style::{
    ErrorView, KeywordView, LineView, RoutineView, SessionView, ValueView,
};
use crate::console::print::ExternalPrinter;
use crate::error::Error;
use crate::protocol::{StopEvent, VarClass};
use crate::proxy::{ProxyAgent, SessionHandle, StepOutcome};
use crossterm::style::Stylize;
use rustyline::error::ReadlineError;
use rustyline::history::MemHistory;
use rustyline::Editor;
use std::sync::{Arc, Mutex};

pub mod command;
mod editor;
mod help;
pub mod print;

const WELCOME_TEXT: &str = r#"
pldbg proxy console, type help for list of commands
"#;
const PROMPT: &str = "(pldbg) ";

type PEditor = Editor<RLHelper, MemHistory>;

#[derive(thiserror::Error, Debug)]
pub enum HandlingError {
    #[error("malformed command (try `help`):\n{0}")]
    Parser(anyhow::Error),
    #[error(transparent)]
    Debugger(#[from] Error),
}

enum Control {
    Proceed,
    Quit,
}

pub struct ProxyConsole {
    proxy: ProxyAgent,
    editor: PEditor,
    printer: ExternalPrinter,
    completer: Arc<Mutex<CommandCompleter>>,
    /// Session all commands go to, `0` means the last used one.
    current: SessionHandle,
    last_stop: Option<StopEvent>,
}

impl ProxyConsole {
    pub fn new(proxy: ProxyAgent) -> anyhow::Result<Self> {
        let mut editor = create_editor(PROMPT)?;
        let printer = ExternalPrinter::new(&mut editor)?;
        let completer = editor
            .helper()
            .map(|h| h.completer.clone())
            .ok_or_else(|| anyhow::anyhow!("line editor without helper"))?;

        Ok(Self {
            proxy,
            editor,
            printer,
            completer,
            current: 0,
            last_stop: None,
        })
    }

    /// Routine names offered by completion after `break`, `source` and friends.
    pub fn with_routine_hints(self, routines: impl IntoIterator<Item = String>) -> Self {
        if let Ok(mut completer) = self.completer.lock() {
            completer.replace_routine_hints(routines);
        }
        self
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        self.printer.print(WELCOME_TEXT);
        loop {
            let line = match self.editor.readline(PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
                Err(err) => {
                    self.printer.print(ErrorView::from(format!("error: {err:#}")));
                    break;
                }
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            _ = self.editor.add_history_entry(&line);

            match self.handle_command(&line) {
                Ok(Control::Proceed) => {}
                Ok(Control::Quit) => break,
                Err(HandlingError::Parser(e)) => {
                    self.printer.print(ErrorView::from(format!("{e}")));
                }
                Err(HandlingError::Debugger(ref err)) if err.is_fatal() => {
                    self.printer.print(ErrorView::from("shutdown debugger"));
                    self.printer
                        .print(ErrorView::from(format!("fatal debugger error: {err:#}")));
                    break;
                }
                Err(HandlingError::Debugger(err)) => {
                    self.printer
                        .print(ErrorView::from(format!("debugger error: {err:#}")));
                }
            }
        }

        self.proxy.shutdown()?;
        Ok(())
    }

    fn routine_id(&self, routine: &RoutineRef) -> Result<RoutineId, Error> {
        match routine.0.parse::<RoutineId>() {
            Ok(id) => Ok(id),
            Err(_) => self.proxy.get_target_info(&routine.0).map(|info| info.routine),
        }
    }

    fn update_completer_variables(&mut self) -> Result<(), Error> {
        let mut names = vec![];
        for var in self.proxy.get_variables(self.current)? {
            names.push(var?.name);
        }
        if let Ok(mut completer) = self.completer.lock() {
            completer.replace_var_hints(names);
        }
        Ok(())
    }

    fn print_stop(&mut self, event: StopEvent) {
        self.printer.print(format!(
            "stopped at {} line {} ({})",
            RoutineView::from(&event.name),
            LineView::from(event.line),
            event.routine,
        ));
        self.last_stop = Some(event);
        _ = self.update_completer_variables();
    }

    fn print_outcome(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Stopped(event) => self.print_stop(event),
            StepOutcome::Finished => {
                self.last_stop = None;
                self.printer.print("target finished, session is detached");
            }
        }
    }

    fn yes_no(ok: bool) -> &'static str {
        if ok {
            "done"
        } else {
            "failed"
        }
    }

    fn handle_command(&mut self, line: &str) -> Result<Control, HandlingError> {
        let cmd = ConsoleCommand::parse(line).map_err(HandlingError::Parser)?;
        let h = self.current;

        match cmd {
            ConsoleCommand::Attach(port) => {
                let handle = self.proxy.attach_to_port(port)?;
                self.current = handle;
                self.printer
                    .print(format!("session {} attached", SessionView::from(handle)));
                let event = self.proxy.wait_for_breakpoint(handle)?;
                self.print_stop(event);
            }
            ConsoleCommand::Listen => {
                let handle = self.proxy.create_listener()?;
                self.current = handle;
                self.printer
                    .print(format!("session {} is listening", SessionView::from(handle)));
            }
            ConsoleCommand::GlobalBreak { routine, line, pid } => {
                let id = self.routine_id(&routine)?;
                self.proxy.set_global_breakpoint(h, id, line, pid)?;
                let line = line.map(|l| l.to_string()).unwrap_or_else(|| "any".into());
                let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "any".into());
                self.printer.print(format!(
                    "global breakpoint at {} line {} for process {}",
                    RoutineView::from(id),
                    LineView::from(line),
                    pid
                ));
            }
            ConsoleCommand::Wait => match self.proxy.wait_for_target(h)? {
                Some(pid) => {
                    self.printer.print(format!("target {pid} connected"));
                    let event = self.proxy.wait_for_breakpoint(h)?;
                    self.print_stop(event);
                }
                None => self.printer.print("no target arrived, try again"),
            },
            ConsoleCommand::StepInto => {
                let outcome = self.proxy.step_into(h)?;
                self.print_outcome(outcome);
            }
            ConsoleCommand::StepOver => {
                let outcome = self.proxy.step_over(h)?;
                self.print_outcome(outcome);
            }
            ConsoleCommand::Continue => {
                let outcome = self.proxy.continue_(h)?;
                self.print_outcome(outcome);
            }
            ConsoleCommand::Abort => {
                let canceled = self.proxy.abort_target(h)?;
                self.printer.print(format!("abort: {}", Self::yes_no(canceled)));
            }
            ConsoleCommand::Vars => {
                for var in self.proxy.get_variables(h)? {
                    let var = var?;
                    let class = match var.class {
                        VarClass::Argument => "arg",
                        VarClass::Local => "local",
                    };
                    let mut flags = String::new();
                    if var.is_const {
                        flags.push_str(" const");
                    }
                    if !var.unique {
                        flags.push_str(" shadowed");
                    }
                    self.printer.print(format!(
                        "{} = {} ({class}, line {}{flags})",
                        KeywordView::from(&var.name),
                        ValueView::from(&var.value),
                        var.line,
                    ));
                }
            }
            ConsoleCommand::Stack => {
                for frame in self.proxy.get_stack(h)? {
                    let frame = frame?;
                    self.printer.print(format!(
                        "#{} {} line {} ({}) [{}]",
                        frame.level,
                        RoutineView::from(&frame.target_name),
                        LineView::from(frame.line),
                        frame.routine,
                        frame.args,
                    ));
                }
            }
            ConsoleCommand::Breaks => {
                for bp in self.proxy.get_breakpoints(h)? {
                    let bp = bp?;
                    self.printer.print(format!(
                        "{} line {} ({})",
                        RoutineView::from(&bp.name),
                        LineView::from(bp.line),
                        bp.routine
                    ));
                }
            }
            ConsoleCommand::Frame(level) => {
                let event = self.proxy.select_frame(h, level)?;
                self.printer.print(format!(
                    "switch to #{level}: {} line {}",
                    RoutineView::from(&event.name),
                    LineView::from(event.line)
                ));
                _ = self.update_completer_variables();
            }
            ConsoleCommand::Source(routine) => {
                let id = match routine {
                    Some(ref r) => self.routine_id(r)?,
                    None => match self.last_stop {
                        Some(ref stop) => stop.routine,
                        None => {
                            self.printer.print("no routine given and target is not stopped");
                            return Ok(Control::Proceed);
                        }
                    },
                };
                let source = self.proxy.get_source(h, id)?;
                let current = self
                    .last_stop
                    .as_ref()
                    .filter(|stop| stop.routine == id)
                    .map(|stop| stop.line);
                for (idx, text) in source.lines().enumerate() {
                    let line = idx as i32 + 1;
                    let text = format!("{:>4} {text}", LineView::from(line));
                    if current == Some(line) {
                        self.printer.print(format!("> {}", text.bold()));
                    } else {
                        self.printer.print(format!("  {text}"));
                    }
                }
            }
            ConsoleCommand::Break(routine, line) => {
                let id = self.routine_id(&routine)?;
                let ok = self.proxy.set_breakpoint(h, id, line)?;
                self.printer
                    .print(format!("set breakpoint {id}:{line}: {}", Self::yes_no(ok)));
            }
            ConsoleCommand::Clear(routine, line) => {
                let id = self.routine_id(&routine)?;
                let ok = self.proxy.drop_breakpoint(h, id, line)?;
                self.printer
                    .print(format!("clear breakpoint {id}:{line}: {}", Self::yes_no(ok)));
            }
            ConsoleCommand::Set { name, line, value } => {
                let ok = self.proxy.deposit_value(h, &name, line, &value)?;
                self.printer
                    .print(format!("{} = {value}: {}", KeywordView::from(&name), Self::yes_no(ok)));
            }
            ConsoleCommand::Sessions => {
                let last_used = self.proxy.sessions().last_used();
                for (handle, session) in self.proxy.sessions().iter() {
                    let mark = if Some(handle) == last_used { "*" } else { " " };
                    let state = match (session.chan.is_some(), session.listener_port()) {
                        (true, _) => match session.target_pid {
                            Some(pid) => format!("connected to target {pid}"),
                            None => "connected".to_string(),
                        },
                        (false, Some(port)) => format!("listening on port {port}"),
                        (false, None) => "detached".to_string(),
                    };
                    self.printer
                        .print(format!("{mark}{} {state}", SessionView::from(handle)));
                }
            }
            ConsoleCommand::Use(handle) => {
                if !self.proxy.sessions().contains(handle) {
                    return Err(Error::InvalidSession.into());
                }
                self.current = handle;
                self.last_stop = None;
            }
            ConsoleCommand::Info => {
                let info = self.proxy.get_proxy_info();
                self.printer.print(format!(
                    "server version {}, proxy api version {}, proxy pid {}",
                    info.server_version, info.proxy_api_version, info.server_pid
                ));
            }
            ConsoleCommand::TargetInfo(routine) => {
                let info = self.proxy.get_target_info(&routine.0)?;
                self.printer.print(format!(
                    "{} ({}), schema {}, language {}",
                    RoutineView::from(&info.qualified_name),
                    info.routine,
                    info.schema,
                    info.language
                ));
                for ((name, ty), mode) in info
                    .arg_names
                    .iter()
                    .zip(info.arg_types.iter())
                    .zip(info.arg_modes.iter())
                {
                    self.printer
                        .print(format!("  {} type {ty} {mode:?}", KeywordView::from(name)));
                }
                self.printer.print(format!(
                    "  returns type {}{}",
                    info.return_type,
                    if info.returns_set { " (set)" } else { "" }
                ));
            }
            ConsoleCommand::Close(handle) => {
                let handle = handle.unwrap_or(self.current);
                self.proxy.close(handle)?;
                if handle == self.current || handle == 0 {
                    self.current = 0;
                    self.last_stop = None;
                }
            }
            ConsoleCommand::Help => self.printer.print(HELP),
            ConsoleCommand::Quit => return Ok(Control::Quit),
        }

        Ok(Control::Proceed)
    }
}
