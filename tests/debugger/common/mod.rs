use pldbg::comm::{Backend, BackendId, SharedState};
use pldbg::config::Config;
use pldbg::error::Error;
use pldbg::protocol::parse_break_notice;
use pldbg::proxy::ProxyAgent;
use pldbg::script::{Catalog, Interpreter, Value};
use pldbg::target::TargetAgent;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const SCRIPT: &str = "
routine public.add(a, b)
  let c = a + b
  return c
end

routine public.main(x)
  let y = x * 2
  let z = add(y, 1)
  return z
end
";

pub const ADD_ID: u32 = 16384;
pub const MAIN_ID: u32 = 16385;

pub const TARGET_BACKEND: u32 = 11;
pub const PROXY_BACKEND: u32 = 12;

const NOTICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared tables in a fresh runtime directory, removed on drop.
pub struct TestEnv {
    pub config: Arc<Config>,
    pub shared: Arc<SharedState>,
    dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("pldbg-test-{}", uuid::Uuid::new_v4()));
        let config = Config {
            poll_interval_ms: 20,
            wait_timeout_secs: 1,
            ..Config::default()
        }
        .with_runtime_dir(&dir);
        let shared = SharedState::create(&config).unwrap();
        Self {
            config: Arc::new(config),
            shared: Arc::new(shared),
            dir,
        }
    }

    pub fn backend(&self, id: u32) -> Backend {
        Backend::new(BackendId::from_raw(id).unwrap(), self.config.clone())
            .with_shared(self.shared.clone())
    }

    pub fn proxy(&self) -> ProxyAgent {
        let catalog = Catalog::parse(SCRIPT).unwrap();
        ProxyAgent::new(self.backend(PROXY_BACKEND)).with_resolver(catalog)
    }

    pub fn occupied_slots(&self) -> usize {
        self.shared
            .slots
            .snapshot()
            .unwrap()
            .iter()
            .filter(|slot| slot.owner.is_some())
            .count()
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Routine running in a separate thread on top of a target agent.
pub struct TargetRun {
    ports: Receiver<u16>,
    handle: JoinHandle<Result<Value, Error>>,
}

impl TargetRun {
    /// Port announced by the target when it starts waiting for a proxy.
    pub fn announced_port(&self) -> u16 {
        self.ports.recv_timeout(NOTICE_TIMEOUT).unwrap()
    }

    pub fn join(self) -> Result<Value, Error> {
        self.handle.join().unwrap()
    }
}

/// Run `call(args)` of [`SCRIPT`] as a target. `setup` gets the agent before the run.
pub fn spawn_target(
    env: &TestEnv,
    call: &'static str,
    args: Vec<Value>,
    setup: impl FnOnce(TargetAgent) -> TargetAgent + Send + 'static,
) -> TargetRun {
    let backend = env.backend(TARGET_BACKEND);
    let (tx, ports) = channel();

    let handle = thread::spawn(move || {
        let catalog = Catalog::parse(SCRIPT).unwrap();
        let agent = TargetAgent::new(backend).with_notice(move |notice| {
            if let Some(port) = parse_break_notice(notice) {
                _ = tx.send(port);
            }
        });
        let mut interp = Interpreter::new(&catalog, setup(agent));
        interp.call(call, args)
    });

    TargetRun { ports, handle }
}

/// Target stopping at the first statement of `public.main`.
pub fn debug_main(env: &TestEnv, x: i64) -> TargetRun {
    spawn_target(env, "main", vec![Value::Int(x)], |mut agent| {
        agent
            .debug_routine(pldbg::catalog::RoutineId(MAIN_ID))
            .unwrap();
        agent
    })
}
