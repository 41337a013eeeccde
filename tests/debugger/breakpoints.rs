use crate::common::{debug_main, TestEnv, ADD_ID, MAIN_ID};
use pldbg::catalog::RoutineId;
use pldbg::error::Error;
use pldbg::protocol::BreakpointRecord;
use pldbg::proxy::StepOutcome;
use pldbg::script::Value;
use serial_test::serial;

fn record(routine: u32, line: i32, name: &str) -> BreakpointRecord {
    BreakpointRecord {
        routine: RoutineId(routine),
        line,
        name: name.to_string(),
    }
}

#[test]
#[serial]
fn test_set_list_clear_breakpoints() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    assert!(proxy.set_breakpoint(h, RoutineId(ADD_ID), 2).unwrap());
    assert!(proxy.set_breakpoint(h, RoutineId(MAIN_ID), 3).unwrap());
    // already there
    assert!(!proxy.set_breakpoint(h, RoutineId(ADD_ID), 2).unwrap());

    let breakpoints: Vec<_> = proxy
        .get_breakpoints(h)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        breakpoints,
        vec![
            record(ADD_ID, 2, "public.add"),
            record(MAIN_ID, -1, "public.main"),
            record(MAIN_ID, 3, "public.main"),
        ]
    );

    assert!(proxy.drop_breakpoint(h, RoutineId(ADD_ID), 2).unwrap());
    assert!(!proxy.drop_breakpoint(h, RoutineId(ADD_ID), 2).unwrap());

    // add is not stopped in anymore
    assert_eq!(
        proxy.continue_(h).unwrap(),
        StepOutcome::Stopped(pldbg::protocol::StopEvent {
            routine: RoutineId(MAIN_ID),
            line: 3,
            name: "public.main".to_string(),
        })
    );
    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_partially_read_stream_keeps_session_in_sync() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();
    proxy.set_breakpoint(h, RoutineId(ADD_ID), 1).unwrap();
    proxy.set_breakpoint(h, RoutineId(ADD_ID), 2).unwrap();

    {
        let mut stream = proxy.get_breakpoints(h).unwrap();
        assert!(stream.next().is_some());
        // the rest is drained on drop
    }

    let source = proxy.get_source(h, RoutineId(ADD_ID)).unwrap();
    assert_eq!(source, "  let c = a + b\n  return c");

    assert!(matches!(
        proxy.continue_(h).unwrap(),
        StepOutcome::Stopped(event) if event.routine == RoutineId(ADD_ID) && event.line == 1
    ));
    assert!(matches!(
        proxy.continue_(h).unwrap(),
        StepOutcome::Stopped(event) if event.line == 2
    ));
    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_session_errors() {
    let env = TestEnv::new();
    let mut proxy = env.proxy();
    assert!(matches!(proxy.step_into(0), Err(Error::InvalidSession)));
    assert!(matches!(proxy.get_stack(7).err(), Some(Error::InvalidSession)));

    let listener = proxy.create_listener().unwrap();
    assert!(matches!(
        proxy.step_over(listener),
        Err(Error::SessionNotConnected(h)) if h == listener
    ));

    let run = debug_main(&env, 5);
    let connected = proxy.attach_to_port(run.announced_port()).unwrap();
    assert!(matches!(
        proxy.set_global_breakpoint(connected, RoutineId(ADD_ID), None, None),
        Err(Error::NotAListener(h)) if h == connected
    ));
    assert!(matches!(
        proxy.wait_for_target(connected),
        Err(Error::NotAListener(_))
    ));

    assert_eq!(proxy.continue_(connected).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}
