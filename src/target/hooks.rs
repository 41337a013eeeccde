use crate::catalog::RoutineId;
use crate::error::Error;
use crate::protocol::VarClass;

/// Index of a frame in the frame arena of a [`DebugHooks`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub usize);

/// What the interpreter should do after a statement hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Cancel the whole statement (all routine invocations on the stack).
    Abort,
}

/// Position and arguments of an active routine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub routine: RoutineId,
    pub name: String,
    pub line: i32,
    pub args: Vec<(String, String)>,
}

/// Variable (datum) of a frame as exposed by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct Datum {
    pub name: String,
    pub class: VarClass,
    /// Declaration line, 0 for arguments.
    pub line: i32,
    pub is_const: bool,
    pub not_null: bool,
    pub type_id: u32,
    pub value: String,
}

/// Read and write access to a running interpreter, available to hooks while the
/// interpreter is suspended at a statement boundary.
/// Frame levels count from the innermost frame (level 0).
pub trait ExecutionContext {
    /// Number of active routine invocations.
    fn depth(&self) -> usize;

    fn frame(&self, level: usize) -> Option<FrameInfo>;

    /// All datums of a frame, in declaration order. A datum is addressed by its index.
    fn variables(&self, level: usize) -> Vec<Datum>;

    /// Evaluate `expr` and assign the result to a datum inside a sub-transaction:
    /// if evaluation or assignment fails, the frame is left unchanged.
    fn assign(&mut self, level: usize, datum: usize, expr: &str) -> Result<(), Error>;

    fn source(&self, routine: RoutineId) -> Option<String>;

    fn routine_name(&self, routine: RoutineId) -> Option<String>;
}

/// Debugger callbacks injected into the interpreter.
pub trait DebugHooks {
    /// Called when a routine invocation starts, before its first statement.
    fn on_routine_start(&mut self, ctx: &dyn ExecutionContext, routine: RoutineId) -> FrameId;

    /// Called before every statement of an invocation.
    fn on_statement(&mut self, ctx: &mut dyn ExecutionContext, frame: FrameId, line: i32) -> Flow;

    /// Called when an invocation ends, normally or not.
    fn on_routine_end(&mut self, ctx: &dyn ExecutionContext, frame: FrameId);
}

/// Hooks that never stop anything.
#[derive(Default)]
pub struct NopHooks {
    depth: usize,
}

impl DebugHooks for NopHooks {
    fn on_routine_start(&mut self, _: &dyn ExecutionContext, _: RoutineId) -> FrameId {
        self.depth += 1;
        FrameId(self.depth - 1)
    }

    fn on_statement(&mut self, _: &mut dyn ExecutionContext, _: FrameId, _: i32) -> Flow {
        Flow::Continue
    }

    fn on_routine_end(&mut self, _: &dyn ExecutionContext, _: FrameId) {
        self.depth = self.depth.saturating_sub(1);
    }
}
