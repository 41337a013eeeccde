//! Console command grammar.
use anyhow::anyhow;
use chumsky::error::Rich;
use chumsky::prelude::{any, choice, end, just};
use chumsky::{extra, text, Boxed, Parser};

pub const ATTACH_COMMAND: &str = "attach";
pub const LISTEN_COMMAND: &str = "listen";
pub const WAIT_COMMAND: &str = "wait";
pub const GLOBAL_BREAK_COMMAND: &str = "gbreak";
pub const STEP_INTO_COMMAND: &str = "step";
pub const STEP_INTO_COMMAND_SHORT: &str = "s";
pub const STEP_OVER_COMMAND: &str = "next";
pub const STEP_OVER_COMMAND_SHORT: &str = "n";
pub const CONTINUE_COMMAND: &str = "continue";
pub const CONTINUE_COMMAND_SHORT: &str = "c";
pub const ABORT_COMMAND: &str = "abort";
pub const VARS_COMMAND: &str = "vars";
pub const STACK_COMMAND: &str = "stack";
pub const STACK_COMMAND_SHORT: &str = "bt";
pub const BREAKS_COMMAND: &str = "breaks";
pub const FRAME_COMMAND: &str = "frame";
pub const FRAME_COMMAND_SHORT: &str = "f";
pub const SOURCE_COMMAND: &str = "source";
pub const BREAK_COMMAND: &str = "break";
pub const BREAK_COMMAND_SHORT: &str = "b";
pub const CLEAR_COMMAND: &str = "clear";
pub const SET_COMMAND: &str = "set";
pub const SESSIONS_COMMAND: &str = "sessions";
pub const USE_COMMAND: &str = "use";
pub const INFO_COMMAND: &str = "info";
pub const TARGET_INFO_COMMAND: &str = "target-info";
pub const CLOSE_COMMAND: &str = "close";
pub const HELP_COMMAND: &str = "help";
pub const HELP_COMMAND_SHORT: &str = "h";
pub const QUIT_COMMAND: &str = "quit";
pub const QUIT_COMMAND_SHORT: &str = "q";

/// Routine given by the user: numeric identifier or (qualified) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Attach(u16),
    Listen,
    Wait,
    GlobalBreak {
        routine: RoutineRef,
        line: Option<i32>,
        pid: Option<i32>,
    },
    StepInto,
    StepOver,
    Continue,
    Abort,
    Vars,
    Stack,
    Breaks,
    Frame(u32),
    Source(Option<RoutineRef>),
    Break(RoutineRef, i32),
    Clear(RoutineRef, i32),
    Set {
        name: String,
        line: Option<i32>,
        value: String,
    },
    Sessions,
    Use(u32),
    Info,
    TargetInfo(RoutineRef),
    Close(Option<u32>),
    Help,
    Quit,
}

type Err<'a> = extra::Err<Rich<'a, char>>;

fn routine_ref<'a>() -> impl Parser<'a, &'a str, RoutineRef, Err<'a>> + Clone {
    any()
        .filter(|c: &char| !c.is_whitespace() && *c != ':')
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|s: &str| RoutineRef(s.to_string()))
        .padded()
        .labelled("routine name or id")
}

fn number<'a, T: std::str::FromStr>() -> impl Parser<'a, &'a str, T, Err<'a>> + Clone {
    just('-')
        .or_not()
        .then(text::int(10))
        .to_slice()
        .try_map(|s: &str, span| {
            s.parse::<T>()
                .map_err(|_| Rich::custom(span, format!("invalid number {s}")))
        })
        .padded()
}

fn position<'a>() -> impl Parser<'a, &'a str, (RoutineRef, i32), Err<'a>> + Clone {
    routine_ref().then_ignore(just(':')).then(number())
}

fn command<'a, I>(ctx: &'static str, inner: I) -> Boxed<'a, 'a, &'a str, ConsoleCommand, Err<'a>>
where
    I: Parser<'a, &'a str, ConsoleCommand, Err<'a>> + 'a,
{
    inner.then_ignore(end()).labelled(ctx).boxed()
}

impl ConsoleCommand {
    pub fn parse(input: &str) -> anyhow::Result<ConsoleCommand> {
        Self::parser()
            .parse(input)
            .into_result()
            .map_err(|e| anyhow!("{}", e[0]))
    }

    fn parser<'a>() -> impl Parser<'a, &'a str, ConsoleCommand, Err<'a>> {
        let op = |sym| just(sym).padded();
        let op2 = |full, short| op(full).or(op(short));
        let word = |sym| just(sym).then(text::whitespace().at_least(1));

        let attach = word(ATTACH_COMMAND)
            .ignore_then(number())
            .map(ConsoleCommand::Attach);

        let global_break = word(GLOBAL_BREAK_COMMAND)
            .ignore_then(routine_ref())
            .then(just(':').ignore_then(number()).or_not())
            .then(op("pid").ignore_then(number()).or_not())
            .map(|((routine, line), pid)| ConsoleCommand::GlobalBreak { routine, line, pid });

        let frame = op2(FRAME_COMMAND, FRAME_COMMAND_SHORT)
            .ignore_then(number())
            .map(ConsoleCommand::Frame);

        let source = op(SOURCE_COMMAND)
            .ignore_then(routine_ref().or_not())
            .map(ConsoleCommand::Source);

        let brk = word(BREAK_COMMAND)
            .or(word(BREAK_COMMAND_SHORT))
            .ignore_then(position())
            .map(|(routine, line)| ConsoleCommand::Break(routine, line));
        let clear = word(CLEAR_COMMAND)
            .ignore_then(position())
            .map(|(routine, line)| ConsoleCommand::Clear(routine, line));

        let var_name = text::ascii::ident().map(|s: &str| s.to_string()).padded();
        let set = word(SET_COMMAND)
            .ignore_then(var_name)
            .then(just('.').ignore_then(number()).or_not())
            .then_ignore(op("="))
            .then(any().repeated().to_slice())
            .map(|((name, line), value): ((String, Option<i32>), &str)| ConsoleCommand::Set {
                name,
                line,
                value: value.trim().to_string(),
            });

        let use_session = word(USE_COMMAND)
            .ignore_then(number())
            .map(ConsoleCommand::Use);
        let target_info = word(TARGET_INFO_COMMAND)
            .ignore_then(routine_ref())
            .map(ConsoleCommand::TargetInfo);
        let close = op(CLOSE_COMMAND)
            .ignore_then(number().or_not())
            .map(ConsoleCommand::Close);

        choice((
            command(ATTACH_COMMAND, attach),
            command(LISTEN_COMMAND, op(LISTEN_COMMAND).to(ConsoleCommand::Listen)),
            command(WAIT_COMMAND, op(WAIT_COMMAND).to(ConsoleCommand::Wait)),
            command(GLOBAL_BREAK_COMMAND, global_break),
            command(
                STEP_INTO_COMMAND,
                op2(STEP_INTO_COMMAND, STEP_INTO_COMMAND_SHORT).to(ConsoleCommand::StepInto),
            ),
            command(
                STEP_OVER_COMMAND,
                op2(STEP_OVER_COMMAND, STEP_OVER_COMMAND_SHORT).to(ConsoleCommand::StepOver),
            ),
            command(
                CONTINUE_COMMAND,
                op2(CONTINUE_COMMAND, CONTINUE_COMMAND_SHORT).to(ConsoleCommand::Continue),
            ),
            command(ABORT_COMMAND, op(ABORT_COMMAND).to(ConsoleCommand::Abort)),
            command(VARS_COMMAND, op(VARS_COMMAND).to(ConsoleCommand::Vars)),
            command(
                STACK_COMMAND,
                op2(STACK_COMMAND, STACK_COMMAND_SHORT).to(ConsoleCommand::Stack),
            ),
            command(BREAKS_COMMAND, op(BREAKS_COMMAND).to(ConsoleCommand::Breaks)),
            command(FRAME_COMMAND, frame),
            command(SOURCE_COMMAND, source),
            command(BREAK_COMMAND, brk),
            command(CLEAR_COMMAND, clear),
            command(SET_COMMAND, set),
            command(SESSIONS_COMMAND, op(SESSIONS_COMMAND).to(ConsoleCommand::Sessions)),
            command(USE_COMMAND, use_session),
            command(TARGET_INFO_COMMAND, target_info),
            command(INFO_COMMAND, op(INFO_COMMAND).to(ConsoleCommand::Info)),
            command(CLOSE_COMMAND, close),
            command(
                HELP_COMMAND,
                op2(HELP_COMMAND, HELP_COMMAND_SHORT).to(ConsoleCommand::Help),
            ),
            command(
                QUIT_COMMAND,
                op2(QUIT_COMMAND, QUIT_COMMAND_SHORT).to(ConsoleCommand::Quit),
            ),
        ))
        .map_err(|e: Rich<'a, char>| {
            let span = e.span();
            if span.start == 0 && span.end == 0 {
                Rich::custom(*span, "type help for list of commands")
            } else {
                e
            }
        })
    }
}
