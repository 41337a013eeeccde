pub mod handshake;
pub mod rendezvous;
pub mod slot;
pub mod wire;

use crate::breakpoint::global::GlobalTable;
use crate::config::Config;
use crate::error::Error;
use once_cell::unsync::OnceCell;
use slot::SlotTable;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Opaque identity of a worker process inside the server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(NonZeroU32);

impl BackendId {
    /// Create identity from raw value, zero means "no backend".
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(BackendId)
    }

    pub fn as_raw(self) -> u32 {
        self.0.get()
    }
}

impl Display for BackendId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend#{}", self.0)
    }
}

/// Cross-process mutable state of one server instance: connection slots and global
/// breakpoints. Each table has its own lock.
pub struct SharedState {
    pub slots: SlotTable,
    pub globals: GlobalTable,
}

impl SharedState {
    /// Server cold start, every table is zeroed.
    pub fn create(config: &Config) -> Result<Self, Error> {
        Self::open_with(config, true)
    }

    /// Attach to the tables of a running instance, initializing them if nobody did it yet.
    pub fn open(config: &Config) -> Result<Self, Error> {
        Self::open_with(config, false)
    }

    fn open_with(config: &Config, reset: bool) -> Result<Self, Error> {
        Ok(Self {
            slots: SlotTable::open(&config.runtime_dir, config.max_slots, reset)?,
            globals: GlobalTable::open(&config.runtime_dir, config.global_breakpoints, reset)?,
        })
    }
}

/// Worker process context: who am I and how to reach the shared state.
/// Shared state is attached lazily on first use.
pub struct Backend {
    id: BackendId,
    pid: i32,
    config: Arc<Config>,
    shared: OnceCell<Arc<SharedState>>,
}

impl Backend {
    pub fn new(id: BackendId, config: Arc<Config>) -> Self {
        Self {
            id,
            pid: std::process::id() as i32,
            config,
            shared: OnceCell::new(),
        }
    }

    /// Backend of the current OS process, identified by its pid.
    pub fn current(config: Arc<Config>) -> Self {
        let pid = std::process::id();
        let id = BackendId::from_raw(pid).unwrap_or(BackendId(NonZeroU32::MIN));
        Self::new(id, config)
    }

    /// Use already attached shared state (e.g. shared by several backends in one process).
    pub fn with_shared(self, shared: Arc<SharedState>) -> Self {
        let _ = self.shared.set(shared);
        self
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn database(&self) -> u32 {
        self.config.database_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shared(&self) -> Result<&Arc<SharedState>, Error> {
        self.shared
            .get_or_try_init(|| SharedState::open(&self.config).map(Arc::new))
    }
}
