use super::parser::{self, BinOp, Expr, Stmt};
use super::{Catalog, Routine, Value};
use crate::catalog::RoutineId;
use crate::error::Error;
use crate::protocol::VarClass;
use crate::target::hooks::{Datum, DebugHooks, ExecutionContext, Flow, FrameId, FrameInfo};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone)]
struct Var {
    name: String,
    class: VarClass,
    line: i32,
    is_const: bool,
    value: Value,
}

impl Var {
    fn local(name: &str, line: i32, is_const: bool, value: Value) -> Self {
        Var {
            name: name.to_string(),
            class: VarClass::Local,
            line,
            is_const,
            value,
        }
    }
}

/// Active invocation of a routine.
struct ActiveFrame<'c> {
    routine: &'c Routine,
    vars: Vec<Var>,
    line: i32,
}

impl<'c> ActiveFrame<'c> {
    /// Arguments first, then the implicit status variables, then every local declaration
    /// of the body (unset until its statement runs).
    fn new(routine: &'c Routine, args: Vec<Value>) -> Self {
        let mut vars: Vec<Var> = routine
            .params
            .iter()
            .zip(args)
            .map(|(name, value)| Var {
                name: name.clone(),
                class: VarClass::Argument,
                line: 0,
                is_const: false,
                value,
            })
            .collect();
        vars.push(Var::local("found", 0, false, Value::Text("f".to_string())));
        vars.push(Var::local("rowcount", 0, false, Value::Int(0)));
        vars.extend(
            routine
                .declarations()
                .map(|(name, line, is_const)| Var::local(name, line, is_const, Value::Null)),
        );
        Self {
            routine,
            vars,
            line: 0,
        }
    }

    /// Innermost declaration of `name` visible at the current line.
    fn position(&self, name: &str) -> Option<usize> {
        self.vars
            .iter()
            .rposition(|v| v.name == name && v.line <= self.line)
    }

    fn get(&self, name: &str) -> Result<Value, Error> {
        self.position(name)
            .map(|idx| self.vars[idx].value.clone())
            .ok_or_else(|| Error::Execution(format!("variable \"{name}\" does not exist")))
    }

    fn set(&mut self, idx: usize, value: Value, declaring: bool) -> Result<(), Error> {
        let var = self
            .vars
            .get_mut(idx)
            .ok_or_else(|| Error::Execution(format!("no variable number {idx}")))?;
        if var.is_const && !declaring {
            return Err(Error::Execution(format!(
                "variable \"{}\" is declared CONSTANT",
                var.name
            )));
        }
        var.value = value;
        Ok(())
    }
}

/// Source of variable values and callable functions for expression evaluation.
trait Scope {
    fn variable(&self, name: &str) -> Result<Value, Error>;

    fn function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Error>;
}

fn builtin(name: &str, args: &[Value]) -> Option<Result<Value, Error>> {
    let res = match (name, args) {
        ("upper", [Value::Text(s)]) => Ok(Value::Text(s.to_uppercase())),
        ("lower", [Value::Text(s)]) => Ok(Value::Text(s.to_lowercase())),
        ("length", [Value::Text(s)]) => Ok(Value::Int(s.chars().count() as i64)),
        ("abs", [Value::Int(v)]) => v
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::Execution("integer out of range".to_string())),
        ("upper" | "lower" | "length" | "abs", [Value::Null]) => Ok(Value::Null),
        ("coalesce", [first, rest @ ..]) => Ok(std::iter::once(first)
            .chain(rest)
            .find(|v| **v != Value::Null)
            .cloned()
            .unwrap_or_default()),
        ("upper" | "lower" | "length" | "abs", _) => Err(Error::Execution(format!(
            "function {name} does not accept given arguments"
        ))),
        _ => return None,
    };
    Some(res)
}

fn int_op(op: BinOp, l: i64, r: i64) -> Result<Value, Error> {
    let res = match op {
        BinOp::Add => l.checked_add(r),
        BinOp::Sub => l.checked_sub(r),
        BinOp::Mul => l.checked_mul(r),
        BinOp::Div if r == 0 => return Err(Error::Execution("division by zero".to_string())),
        BinOp::Div => l.checked_div(r),
    };
    res.map(Value::Int)
        .ok_or_else(|| Error::Execution("integer out of range".to_string()))
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, Error> {
    match (op, lhs, rhs) {
        (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),
        (op, Value::Int(l), Value::Int(r)) => int_op(op, l, r),
        (BinOp::Add, l, r) => Ok(Value::Text(format!("{l}{r}"))),
        (op, l, r) => Err(Error::Execution(format!(
            "operator {op:?} is not defined for {l:?} and {r:?}"
        ))),
    }
}

fn evaluate(scope: &mut dyn Scope, expr: &Expr) -> Result<Value, Error> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),
        Expr::Var(name) => scope.variable(name),
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(scope, arg))
                .collect::<Result<Vec<_>, _>>()?;
            scope.function(name, args)
        }
        Expr::Neg(inner) => match evaluate(scope, inner)? {
            Value::Int(v) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Error::Execution("integer out of range".to_string())),
            Value::Null => Ok(Value::Null),
            Value::Text(_) => Err(Error::Execution("cannot negate text".to_string())),
        },
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(scope, lhs)?;
            let rhs = evaluate(scope, rhs)?;
            binary(*op, lhs, rhs)
        }
    }
}

/// Evaluation inside a suspended frame: builtins only, no routine calls.
struct FrameScope<'a, 'c>(&'a ActiveFrame<'c>);

impl Scope for FrameScope<'_, '_> {
    fn variable(&self, name: &str) -> Result<Value, Error> {
        self.0.get(name)
    }

    fn function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        builtin(name, &args).unwrap_or_else(|| {
            Err(Error::Execution(format!(
                "routine {name} cannot be called here"
            )))
        })
    }
}

/// Interpreter state visible to debug hooks.
pub struct ExecState<'c> {
    catalog: &'c Catalog,
    frames: Vec<ActiveFrame<'c>>,
}

impl<'c> ExecState<'c> {
    fn at_level(&self, level: usize) -> Option<&ActiveFrame<'c>> {
        self.frames
            .len()
            .checked_sub(level + 1)
            .and_then(|idx| self.frames.get(idx))
    }

    fn current(&self) -> Result<&ActiveFrame<'c>, Error> {
        self.frames
            .last()
            .ok_or_else(|| Error::Execution("no active routine".to_string()))
    }

    fn current_mut(&mut self) -> Result<&mut ActiveFrame<'c>, Error> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::Execution("no active routine".to_string()))
    }
}

impl ExecutionContext for ExecState<'_> {
    fn depth(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self, level: usize) -> Option<FrameInfo> {
        let frame = self.at_level(level)?;
        Some(FrameInfo {
            routine: frame.routine.id,
            name: frame.routine.qualified_name(),
            line: frame.line,
            args: frame
                .vars
                .iter()
                .filter(|v| v.class == VarClass::Argument)
                .map(|v| (v.name.clone(), v.value.to_string()))
                .collect(),
        })
    }

    fn variables(&self, level: usize) -> Vec<Datum> {
        let Some(frame) = self.at_level(level) else {
            return vec![];
        };
        frame
            .vars
            .iter()
            .map(|v| Datum {
                name: v.name.clone(),
                class: v.class,
                line: v.line,
                is_const: v.is_const,
                not_null: false,
                type_id: v.value.type_id(),
                value: v.value.to_string(),
            })
            .collect()
    }

    fn assign(&mut self, level: usize, datum: usize, expr: &str) -> Result<(), Error> {
        let idx = self
            .frames
            .len()
            .checked_sub(level + 1)
            .ok_or_else(|| Error::Execution(format!("no frame at level {level}")))?;
        let expr = parser::parse_expression(expr)?;
        // evaluate first, the frame is changed only if everything succeeds
        let value = evaluate(&mut FrameScope(&self.frames[idx]), &expr)?;
        self.frames[idx].set(datum, value, false)
    }

    fn source(&self, routine: RoutineId) -> Option<String> {
        self.catalog.get(routine).map(|r| r.source.clone())
    }

    fn routine_name(&self, routine: RoutineId) -> Option<String> {
        self.catalog.get(routine).map(Routine::qualified_name)
    }
}

/// Executes routines of a catalog, reporting progress to injected debug hooks.
pub struct Interpreter<'c, H: DebugHooks> {
    state: ExecState<'c>,
    hooks: H,
}

impl<'c, H: DebugHooks> Interpreter<'c, H> {
    pub fn new(catalog: &'c Catalog, hooks: H) -> Self {
        Self {
            state: ExecState {
                catalog,
                frames: vec![],
            },
            hooks,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn into_hooks(self) -> H {
        self.hooks
    }

    /// Run routine `name_or_id` with given arguments until it returns.
    pub fn call(&mut self, name_or_id: &str, args: Vec<Value>) -> Result<Value, Error> {
        let routine = self.state.catalog.find(name_or_id)?;
        self.invoke(routine, args)
    }

    fn invoke(&mut self, routine: &'c Routine, args: Vec<Value>) -> Result<Value, Error> {
        if args.len() != routine.params.len() {
            return Err(Error::Execution(format!(
                "{} expects {} arguments, {} given",
                routine.qualified_name(),
                routine.params.len(),
                args.len()
            )));
        }
        if self.state.frames.len() >= MAX_DEPTH {
            return Err(Error::Execution("stack depth limit exceeded".to_string()));
        }

        self.state.frames.push(ActiveFrame::new(routine, args));
        let frame_id = self.hooks.on_routine_start(&self.state, routine.id);
        let result = self.run(routine, frame_id);
        self.hooks.on_routine_end(&self.state, frame_id);
        self.state.frames.pop();
        result
    }

    fn run(&mut self, routine: &'c Routine, frame_id: FrameId) -> Result<Value, Error> {
        for statement in &routine.body {
            self.state.current_mut()?.line = statement.line;
            if self.hooks.on_statement(&mut self.state, frame_id, statement.line) == Flow::Abort {
                return Err(Error::Aborted);
            }

            match statement.stmt {
                Stmt::Let {
                    ref name,
                    ref value,
                    ..
                } => {
                    let value = match value {
                        Some(expr) => evaluate(self, expr)?,
                        None => Value::Null,
                    };
                    let frame = self.state.current_mut()?;
                    let idx = frame.position(name).ok_or_else(|| {
                        Error::Execution(format!("variable \"{name}\" does not exist"))
                    })?;
                    frame.set(idx, value, true)?;
                }
                Stmt::Assign {
                    ref name,
                    ref value,
                } => {
                    let value = evaluate(self, value)?;
                    let frame = self.state.current_mut()?;
                    let idx = frame.position(name).ok_or_else(|| {
                        Error::Execution(format!("variable \"{name}\" does not exist"))
                    })?;
                    frame.set(idx, value, false)?;
                }
                Stmt::Return(ref value) => {
                    return match value {
                        Some(expr) => evaluate(self, expr),
                        None => Ok(Value::Null),
                    };
                }
                Stmt::Eval(ref expr) => {
                    let value = evaluate(self, expr)?;
                    let frame = self.state.current_mut()?;
                    let found = value != Value::Null;
                    for (name, status) in [
                        ("found", Value::Text(if found { "t" } else { "f" }.to_string())),
                        ("rowcount", Value::Int(i64::from(found))),
                    ] {
                        if let Some(idx) = frame.position(name) {
                            frame.set(idx, status, false)?;
                        }
                    }
                }
            }
        }
        Ok(Value::Null)
    }
}

impl<H: DebugHooks> Scope for Interpreter<'_, H> {
    fn variable(&self, name: &str) -> Result<Value, Error> {
        self.state.current()?.get(name)
    }

    fn function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let catalog = self.state.catalog;
        if let Some(routine) = catalog.find_call(name, args.len())? {
            return self.invoke(routine, args);
        }
        builtin(name, &args).unwrap_or_else(|| Err(Error::UnknownRoutine(name.to_string())))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::target::hooks::NopHooks;

    const SCRIPT: &str = "
routine public.add(a, b)
  let c = a + b
  return c
end

routine public.greet(who)
  let greeting = 'hello, ' + who
  const limit = 3
  return upper(greeting)
end

routine public.main()
  let x = 1
  x = add(x, 41)
  return x
end

routine public.fail()
  let x = 1 / 0
end
";

    fn catalog() -> Catalog {
        Catalog::parse(SCRIPT).unwrap()
    }

    #[test]
    fn test_run_routines() {
        let catalog = catalog();
        let mut interp = Interpreter::new(&catalog, NopHooks::default());
        assert_eq!(
            interp.call("add", vec![Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(5)
        );
        assert_eq!(interp.call("main", vec![]).unwrap(), Value::Int(42));
        assert_eq!(
            interp.call("greet", vec![Value::Text("bob".to_string())]).unwrap(),
            Value::Text("HELLO, BOB".to_string())
        );
        assert_eq!(
            interp.call("add", vec![Value::Null, Value::Int(3)]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_runtime_errors() {
        let catalog = catalog();
        let mut interp = Interpreter::new(&catalog, NopHooks::default());
        assert!(matches!(interp.call("fail", vec![]), Err(Error::Execution(_))));
        assert!(matches!(interp.call("add", vec![]), Err(Error::Execution(_))));
        assert!(matches!(interp.call("nope", vec![]), Err(Error::UnknownRoutine(_))));
    }

    /// Records hook calls, aborts or deposits at a chosen position.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        depth: usize,
        abort_at: Option<(RoutineId, i32)>,
        deposit_at: Option<(i32, &'static str, &'static str)>,
        deposit_results: Vec<Result<(), String>>,
        snapshot: Vec<Datum>,
    }

    impl DebugHooks for Recorder {
        fn on_routine_start(&mut self, ctx: &dyn ExecutionContext, routine: RoutineId) -> FrameId {
            self.events.push(format!("start {routine} depth {}", ctx.depth()));
            self.depth += 1;
            FrameId(self.depth - 1)
        }

        fn on_statement(&mut self, ctx: &mut dyn ExecutionContext, _: FrameId, line: i32) -> Flow {
            let info = ctx.frame(0).unwrap();
            self.events.push(format!("{}:{line}", info.name));
            if self.abort_at == Some((info.routine, line)) {
                return Flow::Abort;
            }
            if let Some((at, name, expr)) = self.deposit_at {
                let target = ctx.variables(0).iter().position(|d| d.name == name);
                if let (true, Some(idx)) = (at == line, target) {
                    self.deposit_results
                        .push(ctx.assign(0, idx, expr).map_err(|e| e.to_string()));
                    self.snapshot = ctx.variables(0);
                }
            }
            Flow::Continue
        }

        fn on_routine_end(&mut self, _: &dyn ExecutionContext, frame: FrameId) {
            self.events.push(format!("end {}", frame.0));
            self.depth -= 1;
        }
    }

    #[test]
    fn test_hooks_order() {
        let catalog = catalog();
        let mut interp = Interpreter::new(&catalog, Recorder::default());
        interp.call("main", vec![]).unwrap();
        assert_eq!(
            interp.hooks().events,
            vec![
                "start 16386 depth 1",
                "public.main:1",
                "public.main:2",
                "start 16384 depth 2",
                "public.add:1",
                "public.add:2",
                "end 1",
                "public.main:3",
                "end 0",
            ]
        );
    }

    #[test]
    fn test_abort_unwinds_every_frame() {
        let catalog = catalog();
        let hooks = Recorder {
            abort_at: Some((RoutineId(16384), 2)),
            ..Default::default()
        };
        let mut interp = Interpreter::new(&catalog, hooks);
        assert!(matches!(interp.call("main", vec![]), Err(Error::Aborted)));
        let events = &interp.hooks().events;
        assert_eq!(&events[events.len() - 2..], ["end 1", "end 0"]);
        assert_eq!(interp.hooks().depth, 0);
    }

    #[test]
    fn test_assign_expression() {
        let catalog = catalog();
        let hooks = Recorder {
            deposit_at: Some((2, "x", "5+5")),
            ..Default::default()
        };
        let mut interp = Interpreter::new(&catalog, hooks);
        // x = 10 is deposited before `x = add(x, 41)` runs
        assert_eq!(interp.call("main", vec![]).unwrap(), Value::Int(51));
        let hooks = interp.hooks();
        assert_eq!(hooks.deposit_results, vec![Ok(())]);
        let x = hooks.snapshot.iter().find(|d| d.name == "x").unwrap();
        assert_eq!(x.value, "10");
        assert_eq!(x.type_id, crate::script::INT8_TYPE);
    }

    #[test]
    fn test_assign_failures_keep_value() {
        let catalog = catalog();
        for (name, expr) in [("x", "not valid sql"), ("x", "1/0"), ("x", "add(1, 2)")] {
            let hooks = Recorder {
                deposit_at: Some((2, name, expr)),
                ..Default::default()
            };
            let mut interp = Interpreter::new(&catalog, hooks);
            assert_eq!(interp.call("main", vec![]).unwrap(), Value::Int(42));
            let hooks = interp.hooks();
            assert!(hooks.deposit_results[0].is_err(), "{expr} must fail");
            let x = hooks.snapshot.iter().find(|d| d.name == "x").unwrap();
            assert_eq!(x.value, "1");
        }
    }

    #[test]
    fn test_assign_constant() {
        let catalog = catalog();
        let hooks = Recorder {
            deposit_at: Some((3, "limit", "4")),
            ..Default::default()
        };
        let mut interp = Interpreter::new(&catalog, hooks);
        interp.call("greet", vec![Value::Text("x".to_string())]).unwrap();
        let err = interp.hooks().deposit_results[0].clone().unwrap_err();
        assert!(err.contains("CONSTANT"));
    }
}
