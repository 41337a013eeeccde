use crate::common::{debug_main, TestEnv, ADD_ID, MAIN_ID};
use pldbg::catalog::RoutineId;
use pldbg::error::Error;
use pldbg::protocol::StopEvent;
use pldbg::proxy::StepOutcome;
use pldbg::script::Value;
use serial_test::serial;

fn stop_at(routine: u32, line: i32) -> StepOutcome {
    let name = if routine == ADD_ID {
        "public.add"
    } else {
        "public.main"
    };
    StepOutcome::Stopped(StopEvent {
        routine: RoutineId(routine),
        line,
        name: name.to_string(),
    })
}

#[test]
#[serial]
fn test_step_over() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    assert_eq!(proxy.step_over(h).unwrap(), stop_at(MAIN_ID, 2));
    // call of add is stepped over
    assert_eq!(proxy.step_over(h).unwrap(), stop_at(MAIN_ID, 3));
    assert_eq!(proxy.step_over(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_step_into_and_out() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    assert_eq!(proxy.step_into(h).unwrap(), stop_at(MAIN_ID, 2));
    assert_eq!(proxy.step_into(h).unwrap(), stop_at(ADD_ID, 1));

    let stack: Vec<_> = proxy
        .get_stack(h)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].level, 0);
    assert_eq!(stack[0].routine, RoutineId(ADD_ID));
    assert_eq!(stack[0].line, 1);
    assert_eq!(stack[0].args, "a=10, b=1");
    assert_eq!(stack[1].level, 1);
    assert_eq!(stack[1].target_name, "public.main");
    assert_eq!(stack[1].line, 2);
    assert_eq!(stack[1].args, "x=5");

    assert_eq!(proxy.step_over(h).unwrap(), stop_at(ADD_ID, 2));
    // stepping over the last statement stops in the caller
    assert_eq!(proxy.step_over(h).unwrap(), stop_at(MAIN_ID, 3));
    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_continue_to_breakpoint() {
    let env = TestEnv::new();
    let run = debug_main(&env, 1);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    assert!(proxy.set_breakpoint(h, RoutineId(ADD_ID), 2).unwrap());
    assert_eq!(proxy.continue_(h).unwrap(), stop_at(ADD_ID, 2));
    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(3));
}

#[test]
#[serial]
fn test_select_frame() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();
    proxy.step_into(h).unwrap();
    proxy.step_into(h).unwrap();

    let event = proxy.select_frame(h, 1).unwrap();
    assert_eq!(event.routine, RoutineId(MAIN_ID));
    assert_eq!(event.line, 2);
    assert!(matches!(
        proxy.select_frame(h, 5),
        Err(Error::InvalidFrame(5))
    ));

    // variables of the selected frame
    let names: Vec<_> = proxy
        .get_variables(h)
        .unwrap()
        .map(|v| v.unwrap().name)
        .collect();
    assert_eq!(names, vec!["x", "y", "z"]);

    // `next` in the caller frame finishes the call of add
    assert_eq!(proxy.step_over(h).unwrap(), stop_at(MAIN_ID, 3));
    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_abort() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    assert!(proxy.abort_target(h).unwrap());
    assert!(matches!(run.join(), Err(Error::Aborted)));
}

#[test]
#[serial]
fn test_close_session_lets_target_run() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    proxy.attach_to_port(run.announced_port()).unwrap();

    // handle 0 addresses the last used session
    let event = proxy.wait_for_breakpoint(0).unwrap();
    assert_eq!(event.line, 1);
    proxy.close(0).unwrap();
    assert!(proxy.sessions().is_empty());
    assert!(matches!(proxy.step_into(0), Err(Error::InvalidSession)));

    assert_eq!(run.join().unwrap(), Value::Int(11));
}
