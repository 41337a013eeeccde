use crate::common::{debug_main, spawn_target, TestEnv, ADD_ID, MAIN_ID, PROXY_BACKEND};
use pldbg::breakpoint::{BreakpointData, BreakpointKey, ANY_LINE, ANY_PROCESS};
use pldbg::catalog::RoutineId;
use pldbg::comm::handshake::SysinfoProcessTable;
use pldbg::comm::rendezvous;
use pldbg::comm::wire::Watch;
use pldbg::error::Error;
use pldbg::protocol::StopEvent;
use pldbg::proxy::StepOutcome;
use pldbg::script::Value;
use serial_test::serial;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
#[serial]
fn test_rogue_connection_is_ignored() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let port = run.announced_port();

    // nobody advertised this connection in a slot, target drops it and keeps waiting
    let mut rogue = TcpStream::connect(("127.0.0.1", port)).unwrap();
    _ = rogue.write_all(&[0, 0, 0, 1, b'c']);

    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(port).unwrap();
    let event = proxy.wait_for_breakpoint(h).unwrap();
    assert_eq!(event.routine, RoutineId(MAIN_ID));
    assert_eq!(event.line, 1);

    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_attach_to_unknown_port() {
    let env = TestEnv::new();
    let mut proxy = env.proxy();
    assert!(matches!(
        proxy.attach_to_port(1),
        Err(Error::TargetNotListening(1))
    ));
    assert!(proxy.sessions().is_empty());
}

#[test]
#[serial]
fn test_global_breakpoint_through_listener() {
    let env = TestEnv::new();
    let mut proxy = env.proxy();
    let h = proxy.create_listener().unwrap();
    proxy
        .set_global_breakpoint(h, RoutineId(ADD_ID), None, None)
        .unwrap();

    let run = spawn_target(&env, "main", vec![Value::Int(2)], |agent| agent);

    let pid = proxy.wait_for_target(h).unwrap();
    assert_eq!(pid, Some(std::process::id() as i32));
    let event = proxy.wait_for_breakpoint(h).unwrap();
    assert_eq!(event.routine, RoutineId(ADD_ID));
    assert_eq!(event.line, 1);
    assert_eq!(event.name, "public.add");

    // claimed by this session while the target is attached
    let globals = env.shared.globals.list().unwrap();
    assert_eq!(globals.len(), 1);
    assert!(globals[0].data.busy);

    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(5));

    let globals = env.shared.globals.list().unwrap();
    assert_eq!(globals.len(), 1);
    assert!(!globals[0].data.busy);

    // proxy shutdown forgets its global breakpoints
    drop(proxy);
    assert!(env.shared.globals.list().unwrap().is_empty());
    assert_eq!(env.occupied_slots(), 0);
}

#[test]
#[serial]
fn test_global_breakpoint_conflict() {
    let env = TestEnv::new();
    let mut proxy = env.proxy();
    let h = proxy.create_listener().unwrap();
    proxy
        .set_global_breakpoint(h, RoutineId(ADD_ID), Some(2), None)
        .unwrap();
    assert!(matches!(
        proxy.set_global_breakpoint(h, RoutineId(ADD_ID), Some(2), None),
        Err(Error::BreakpointConflict)
    ));
    // same routine and line for a specific process is another breakpoint
    proxy
        .set_global_breakpoint(h, RoutineId(ADD_ID), Some(2), Some(42))
        .unwrap();
    assert_eq!(env.shared.globals.list().unwrap().len(), 2);
}

#[test]
#[serial]
fn test_wait_for_target_timeout() {
    let env = TestEnv::new();
    let mut proxy = env.proxy();
    let h = proxy.create_listener().unwrap();
    proxy
        .set_global_breakpoint(h, RoutineId(ADD_ID), None, None)
        .unwrap();
    assert_eq!(proxy.wait_for_target(h).unwrap(), None);
}

#[test]
#[serial]
fn test_client_gone_while_waiting_for_proxy() {
    let env = TestEnv::new();
    let (client, peer) = UnixStream::pair().unwrap();
    let watch = Watch::new(Duration::from_millis(20)).with_client(Arc::new(client));

    let run = spawn_target(&env, "main", vec![Value::Int(5)], move |mut agent| {
        agent
            .debug_routine(RoutineId(MAIN_ID))
            .unwrap();
        agent.with_watch(watch)
    });
    run.announced_port();

    // client of the worker disconnects, the target stops waiting and runs to the end
    drop(peer);
    assert_eq!(run.join().unwrap(), Value::Int(11));
    assert_eq!(env.occupied_slots(), 0);
}

#[test]
#[serial]
fn test_stale_global_breakpoint() {
    let env = TestEnv::new();
    let dead_port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    };
    let key = BreakpointKey {
        database: env.config.database_id,
        routine: RoutineId(ADD_ID),
        line: ANY_LINE,
        target_pid: ANY_PROCESS,
    };
    let data = BreakpointData {
        temporary: false,
        busy: false,
        proxy_port: i32::from(dead_port),
        proxy_pid: 424242,
    };
    assert!(env.shared.globals.insert(key, data).unwrap());

    // owner of the breakpoint is gone, the target forgets it and runs unattached
    let run = spawn_target(&env, "main", vec![Value::Int(5)], |agent| agent);
    assert_eq!(run.join().unwrap(), Value::Int(11));
    assert!(env.shared.globals.list().unwrap().is_empty());
    assert_eq!(env.occupied_slots(), 0);
}

/// Target stopped in `public.main`, watching the client connection `client`.
fn debug_main_watched(env: &TestEnv, client: UnixStream) -> crate::common::TargetRun {
    let watch = Watch::new(Duration::from_millis(20)).with_client(Arc::new(client));
    spawn_target(env, "main", vec![Value::Int(5)], move |mut agent| {
        agent.debug_routine(RoutineId(MAIN_ID)).unwrap();
        agent.with_watch(watch)
    })
}

#[test]
#[serial]
fn test_target_gone_mid_session() {
    let env = TestEnv::new();
    let (client, peer) = UnixStream::pair().unwrap();
    let run = debug_main_watched(&env, client);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    // target loses its client while stopped and drops the debugger
    drop(peer);
    assert_eq!(run.join().unwrap(), Value::Int(11));

    assert!(matches!(
        proxy.get_source(h, RoutineId(ADD_ID)),
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        proxy.step_into(h),
        Err(Error::ConnectionClosed) | Err(Error::SessionNotConnected(_))
    ));
}

#[test]
#[serial]
fn test_client_gone_while_stopped() {
    let env = TestEnv::new();
    let mut proxy = env.proxy();
    let h = proxy.create_listener().unwrap();
    proxy
        .set_global_breakpoint(h, RoutineId(ADD_ID), None, None)
        .unwrap();

    let (client, peer) = UnixStream::pair().unwrap();
    let watch = Watch::new(Duration::from_millis(20)).with_client(Arc::new(client));
    let run = spawn_target(&env, "main", vec![Value::Int(2)], move |agent| {
        agent.with_watch(watch)
    });
    assert!(proxy.wait_for_target(h).unwrap().is_some());
    assert_eq!(proxy.wait_for_breakpoint(h).unwrap().routine, RoutineId(ADD_ID));
    assert!(env.shared.globals.list().unwrap()[0].data.busy);

    let start = Instant::now();
    drop(peer);
    assert_eq!(run.join().unwrap(), Value::Int(5));
    assert!(start.elapsed() < Duration::from_secs(5));

    assert!(env
        .shared
        .globals
        .list()
        .unwrap()
        .iter()
        .all(|bp| !bp.data.busy));
    assert_eq!(env.occupied_slots(), 0);
}

#[test]
#[serial]
fn test_unknown_command_ends_session() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let backend = env.backend(PROXY_BACKEND);
    let watch = Watch::new(Duration::from_millis(20));
    let mut chan =
        rendezvous::connect_to_target(&backend, run.announced_port(), &SysinfoProcessTable, &watch)
            .unwrap();
    let event: StopEvent = chan.recv_parsed().unwrap();
    assert_eq!(event.routine, RoutineId(MAIN_ID));

    // no reply is possible, the target hangs up and runs on
    chan.send_str("d .=1").unwrap();
    assert!(chan.recv_opt().unwrap().is_none());
    assert_eq!(run.join().unwrap(), Value::Int(11));
    assert_eq!(env.occupied_slots(), 0);
}
