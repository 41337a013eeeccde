use anyhow::Context;
use clap::{Parser, Subcommand};
use pldbg::comm::{Backend, SharedState};
use pldbg::config::Config;
use pldbg::console::ProxyConsole;
use pldbg::proxy::ProxyAgent;
use pldbg::script::{Catalog, Interpreter, Value};
use pldbg::target::TargetAgent;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/pldbg/config.toml)
    #[arg(long, env = "PLDBG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create (or reset) the shared slot and breakpoint tables
    Init,
    /// Show occupied connection slots
    Slots,
    /// Show global breakpoints
    Breakpoints,
    /// Forget slots and global breakpoints left behind by a dead process
    Cleanup {
        #[arg(long)]
        pid: i32,
    },
    /// Run a routine of a script as a debuggable target
    Target {
        #[arg(long)]
        script: PathBuf,
        /// Routine to call, by name or identifier
        #[arg(long)]
        call: String,
        /// Stop at the first statement of the called routine and wait for a proxy
        #[arg(long)]
        debug: bool,
        /// Routine arguments, integers are passed as integers
        args: Vec<String>,
    },
    /// Interactive debugger console
    Proxy {
        /// Script used to resolve routine names
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

fn load_catalog(path: &PathBuf) -> anyhow::Result<Catalog> {
    Catalog::load(path).with_context(|| format!("load script {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Arc::new(Config::load(args.config.as_deref()));

    match args.command {
        Cmd::Init => {
            let shared = SharedState::create(&config)?;
            println!(
                "shared tables created in {}: {} slots, {} global breakpoints",
                config.runtime_dir.display(),
                shared.slots.capacity(),
                shared.globals.capacity()
            );
        }
        Cmd::Slots => {
            let shared = SharedState::open(&config)?;
            for (idx, slot) in shared.slots.snapshot()?.into_iter().enumerate() {
                let Some(owner) = slot.owner else {
                    continue;
                };
                println!(
                    "#{idx} backend {owner} pid {} port {} {}",
                    slot.pid, slot.port, slot.status
                );
            }
        }
        Cmd::Breakpoints => {
            let shared = SharedState::open(&config)?;
            for bp in shared.globals.list()? {
                let state = if bp.data.busy { "busy" } else { "free" };
                println!(
                    "{} proxy pid {} port {} {state}",
                    bp.key, bp.data.proxy_pid, bp.data.proxy_port
                );
            }
        }
        Cmd::Cleanup { pid } => {
            let shared = SharedState::open(&config)?;
            let slots = shared.slots.cleanup_process(pid)?;
            let breakpoints = shared.globals.cleanup_process(pid)?;
            println!("pid {pid}: {slots} slots freed, {breakpoints} global breakpoints removed");
        }
        Cmd::Target {
            script,
            call,
            debug,
            args,
        } => {
            let catalog = load_catalog(&script)?;
            let mut agent = TargetAgent::new(Backend::current(config))
                .with_notice(|msg| eprintln!("NOTICE: {msg}"));
            if debug {
                let routine = catalog.find(&call)?;
                agent.debug_routine(routine.id)?;
            }

            let mut interp = Interpreter::new(&catalog, agent);
            let args = args.iter().map(|a| Value::from_arg(a)).collect();
            let result = interp.call(&call, args)?;
            println!("{result}");
        }
        Cmd::Proxy { script } => {
            let mut proxy = ProxyAgent::new(Backend::current(config));
            let mut routines = vec![];
            if let Some(ref script) = script {
                let catalog = load_catalog(script)?;
                routines = catalog
                    .routines()
                    .iter()
                    .map(|r| r.qualified_name())
                    .collect();
                proxy = proxy.with_resolver(catalog);
            }

            ProxyConsole::new(proxy)?
                .with_routine_hints(routines)
                .run()?;
        }
    }

    Ok(())
}
