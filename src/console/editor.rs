use crate::console::command::{
    ABORT_COMMAND, ATTACH_COMMAND, BREAKS_COMMAND, BREAK_COMMAND, BREAK_COMMAND_SHORT,
    CLEAR_COMMAND, CLOSE_COMMAND, CONTINUE_COMMAND, CONTINUE_COMMAND_SHORT, FRAME_COMMAND,
    FRAME_COMMAND_SHORT, GLOBAL_BREAK_COMMAND, HELP_COMMAND, HELP_COMMAND_SHORT, INFO_COMMAND,
    LISTEN_COMMAND, QUIT_COMMAND, QUIT_COMMAND_SHORT, SESSIONS_COMMAND, SET_COMMAND,
    SOURCE_COMMAND, STACK_COMMAND, STACK_COMMAND_SHORT, STEP_INTO_COMMAND,
    STEP_INTO_COMMAND_SHORT, STEP_OVER_COMMAND, STEP_OVER_COMMAND_SHORT, TARGET_INFO_COMMAND,
    USE_COMMAND, VARS_COMMAND, WAIT_COMMAND,
};
use chumsky::prelude::{any, choice, just};
use chumsky::text::whitespace;
use chumsky::{extra, Parser};
use crossterm::style::{Color, Stylize};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::HistoryHinter;
use rustyline::history::MemHistory;
use rustyline::line_buffer::LineBuffer;
use rustyline::{Changeset, CompletionType, Config, Context, Editor};
use rustyline_derive::{Helper, Hinter, Validator};
use std::borrow::Cow;
use std::borrow::Cow::{Borrowed, Owned};
use std::sync::{Arc, Mutex};

struct CommandHint {
    short: Option<String>,
    long: String,
}

impl CommandHint {
    fn display_with_short(&self) -> String {
        match self.short {
            Some(ref short) if self.long.starts_with(short.as_str()) => format!(
                "{}{}",
                short.clone().bold().underlined(),
                &self.long[short.len()..]
            ),
            Some(ref short) => format!("{}|{}", &self.long, short.clone().bold().underlined()),
            None => self.long.clone(),
        }
    }
}

impl From<&str> for CommandHint {
    fn from(value: &str) -> Self {
        CommandHint {
            short: None,
            long: value.to_string(),
        }
    }
}

impl From<(&str, &str)> for CommandHint {
    fn from((short, long): (&str, &str)) -> Self {
        CommandHint {
            short: Some(short.to_string()),
            long: long.to_string(),
        }
    }
}

/// Completes command names, routine names after routine taking commands and variable
/// names after `set`.
pub struct CommandCompleter {
    commands: Vec<CommandHint>,
    routines: Vec<String>,
    vars: Vec<String>,
}

impl CommandCompleter {
    fn new(commands: impl IntoIterator<Item = CommandHint>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
            routines: vec![],
            vars: vec![],
        }
    }

    pub fn replace_routine_hints(&mut self, routines: impl IntoIterator<Item = String>) {
        self.routines = routines.into_iter().collect();
        self.routines.sort();
        self.routines.dedup();
    }

    pub fn replace_var_hints(&mut self, vars: impl IntoIterator<Item = String>) {
        self.vars = vars.into_iter().collect();
        self.vars.sort();
        self.vars.dedup();
    }
}

#[derive(Debug, PartialEq)]
enum CompletableCommand<'a> {
    Routine(&'a str),
    Variable(&'a str),
}

impl<'a> CompletableCommand<'a> {
    fn recognize(line: &'a str) -> Option<CompletableCommand<'a>> {
        let op = just::<_, _, extra::Default>;
        let tail = || any().repeated().to_slice();

        let routine = choice((
            op(BREAK_COMMAND),
            op(BREAK_COMMAND_SHORT),
            op(CLEAR_COMMAND),
            op(GLOBAL_BREAK_COMMAND),
            op(SOURCE_COMMAND),
            op(TARGET_INFO_COMMAND),
        ))
        .then(whitespace().at_least(1))
        .ignore_then(tail())
        .map(CompletableCommand::Routine);

        let var = op(SET_COMMAND)
            .then(whitespace().at_least(1))
            .ignore_then(tail())
            .map(CompletableCommand::Variable);

        choice((routine, var)).parse(line).into_result().ok()
    }
}

fn pairs_from_variants<'v>(
    variants: impl Iterator<Item = &'v String>,
    line: &str,
    tpl: &str,
    replacement_suffix: &str,
) -> (usize, Vec<Pair>) {
    let pos = line.len() - tpl.len();
    let pairs = variants
        .filter(|v| v.starts_with(tpl))
        .map(|v| Pair {
            display: v.to_string(),
            replacement: v.to_string() + replacement_suffix,
        });
    (pos, pairs.collect())
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        match CompletableCommand::recognize(line) {
            Some(CompletableCommand::Routine(maybe_routine)) => {
                // nothing to offer once a line number is being typed
                if maybe_routine.contains(':') || maybe_routine.contains(' ') {
                    return Ok((0, vec![]));
                }
                return Ok(pairs_from_variants(
                    self.routines.iter(),
                    line,
                    maybe_routine,
                    "",
                ));
            }
            Some(CompletableCommand::Variable(maybe_var)) => {
                if maybe_var.contains('=') {
                    return Ok((0, vec![]));
                }
                return Ok(pairs_from_variants(self.vars.iter(), line, maybe_var, " = "));
            }
            None => {}
        }

        let pairs = self
            .commands
            .iter()
            .filter(|&cmd| cmd.long.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.display_with_short(),
                replacement: cmd.long.clone(),
            })
            .collect();
        Ok((0, pairs))
    }
}

#[derive(Helper, Hinter, Validator)]
pub struct RLHelper {
    pub completer: Arc<Mutex<CommandCompleter>>,
    #[rustyline(Hinter)]
    hinter: HistoryHinter,
    pub colored_prompt: String,
}

impl Completer for RLHelper {
    type Candidate = <CommandCompleter as Completer>::Candidate;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        match self.completer.lock() {
            Ok(completer) => completer.complete(line, pos, ctx),
            Err(_) => Ok((0, vec![])),
        }
    }

    fn update(&self, line: &mut LineBuffer, start: usize, elected: &str, cl: &mut Changeset) {
        if let Ok(completer) = self.completer.lock() {
            completer.update(line, start, elected, cl)
        }
    }
}

impl Highlighter for RLHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        default: bool,
    ) -> Cow<'b, str> {
        if default {
            Borrowed(&self.colored_prompt)
        } else {
            Borrowed(prompt)
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned(format!("{}", hint.with(Color::Grey)))
    }
}

pub fn create_editor(prompt: &str) -> anyhow::Result<Editor<RLHelper, MemHistory>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .build();

    let commands: [CommandHint; 23] = [
        ATTACH_COMMAND.into(),
        LISTEN_COMMAND.into(),
        WAIT_COMMAND.into(),
        GLOBAL_BREAK_COMMAND.into(),
        (STEP_INTO_COMMAND_SHORT, STEP_INTO_COMMAND).into(),
        (STEP_OVER_COMMAND_SHORT, STEP_OVER_COMMAND).into(),
        (CONTINUE_COMMAND_SHORT, CONTINUE_COMMAND).into(),
        ABORT_COMMAND.into(),
        VARS_COMMAND.into(),
        (STACK_COMMAND_SHORT, STACK_COMMAND).into(),
        BREAKS_COMMAND.into(),
        (FRAME_COMMAND_SHORT, FRAME_COMMAND).into(),
        SOURCE_COMMAND.into(),
        (BREAK_COMMAND_SHORT, BREAK_COMMAND).into(),
        CLEAR_COMMAND.into(),
        SET_COMMAND.into(),
        SESSIONS_COMMAND.into(),
        USE_COMMAND.into(),
        INFO_COMMAND.into(),
        TARGET_INFO_COMMAND.into(),
        CLOSE_COMMAND.into(),
        (HELP_COMMAND_SHORT, HELP_COMMAND).into(),
        (QUIT_COMMAND_SHORT, QUIT_COMMAND).into(),
    ];

    let h = RLHelper {
        completer: Arc::new(Mutex::new(CommandCompleter::new(commands))),
        hinter: HistoryHinter {},
        colored_prompt: format!("{}", prompt.with(Color::DarkGreen)),
    };

    let mut editor = Editor::with_history(config, MemHistory::new())?;
    editor.set_helper(Some(h));
    Ok(editor)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_recognize_completable() {
        assert_eq!(
            CompletableCommand::recognize("b pub"),
            Some(CompletableCommand::Routine("pub"))
        );
        assert_eq!(
            CompletableCommand::recognize("gbreak  add"),
            Some(CompletableCommand::Routine("add"))
        );
        assert_eq!(
            CompletableCommand::recognize("set co"),
            Some(CompletableCommand::Variable("co"))
        );
        assert_eq!(CompletableCommand::recognize("vars"), None);
    }

    #[test]
    fn test_pairs_from_variants() {
        let routines = vec!["public.add".to_string(), "public.main".to_string()];
        let (pos, pairs) = pairs_from_variants(routines.iter(), "b public.a", "public.a", "");
        assert_eq!(pos, 2);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].replacement, "public.add");
    }
}
