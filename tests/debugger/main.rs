mod common;

mod breakpoints;
mod rendezvous;
mod steps;
mod variables;

use crate::common::{debug_main, TestEnv, MAIN_ID};
use pldbg::catalog::RoutineId;
use pldbg::protocol::StopEvent;
use pldbg::script::Value;
use serial_test::serial;

#[test]
#[serial]
fn test_run_without_debugger() {
    let env = TestEnv::new();
    let run = common::spawn_target(&env, "main", vec![Value::Int(5)], |agent| agent);
    assert_eq!(run.join().unwrap(), Value::Int(11));
    assert_eq!(env.occupied_slots(), 0);
}

#[test]
#[serial]
fn test_attach_and_finish() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let port = run.announced_port();

    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(port).unwrap();
    let event = proxy.wait_for_breakpoint(h).unwrap();
    assert_eq!(
        event,
        StopEvent {
            routine: RoutineId(MAIN_ID),
            line: 1,
            name: "public.main".to_string(),
        }
    );

    let outcome = proxy.continue_(h).unwrap();
    assert_eq!(outcome, pldbg::proxy::StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));

    // session stays registered but is no longer connected
    assert!(matches!(
        proxy.step_into(h),
        Err(pldbg::Error::SessionNotConnected(_))
    ));
    assert_eq!(env.occupied_slots(), 0);
}

#[test]
#[serial]
fn test_proxy_info() {
    let env = TestEnv::new();
    let proxy = env.proxy();
    let info = proxy.get_proxy_info();
    assert_eq!(info.proxy_api_version, 3);
    assert_eq!(info.server_pid, std::process::id() as i32);
    assert!(!info.server_version.is_empty());

    let target = proxy.get_target_info("public.add").unwrap();
    assert_eq!(target.routine, RoutineId(common::ADD_ID));
    assert_eq!(target.arg_names, vec!["a".to_string(), "b".to_string()]);
    assert!(matches!(
        proxy.get_target_info("nope"),
        Err(pldbg::Error::UnknownRoutine(_))
    ));
}
