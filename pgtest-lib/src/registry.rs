//! The server registry: one [`Process`] per distinct [`Config`], shared
//! across every test in the run. Grounded on the lazily-initialized
//! singleton shape `pgdo_lib` uses for its process-wide state, generalized
//! to a map keyed by [`Config`] rather than a single slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::collaborators::{Pinger, Spawner, SystemPinger, SystemSpawner};
use crate::config::Config;
use crate::server::{Process, ServerError};

/// Maps a [`Config`] to the single [`Process`] serving it. Never evicts an
/// entry during a run: the supervisor behind each entry lives until the
/// process exits.
#[derive(Default)]
pub struct Registry {
    processes: Mutex<HashMap<Config, Arc<Process>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the running [`Process`] for `config`, starting one under the
    /// registry's lock if this is the first request for it. The lock is
    /// held for the whole of a cold start, so a second `Config` requested
    /// while the first is still starting up waits its turn; this trades
    /// start-up throughput for the simplicity of never starting two
    /// servers concurrently, mirroring how `pgdo_lib::coordinate` serializes
    /// its own cluster start/stop calls.
    pub fn start(&self, config: &Config) -> Result<Arc<Process>, ServerError> {
        self.start_with(config, &SystemSpawner, Box::new(SystemPinger))
    }

    /// As [`Self::start`], but with the collaborators a cold start would
    /// use made explicit, so tests can exercise the dedup behaviour above
    /// without a real `postgres` binary.
    pub fn start_with(
        &self,
        config: &Config,
        spawner: &dyn Spawner,
        pinger: Box<dyn Pinger>,
    ) -> Result<Arc<Process>, ServerError> {
        let mut processes = self.processes.lock().unwrap();
        if let Some(process) = processes.get(config) {
            return Ok(process.clone());
        }
        let process = Process::start_with_collaborators(config, spawner, pinger)?;
        processes.insert(config.clone(), process.clone());
        Ok(process)
    }

    /// Shut down and drain every `Process` this registry has started,
    /// called from the process-exit hook in [`crate::harness`] since this
    /// registry's own `lazy_static` lifetime outlives the process and is
    /// never dropped by the runtime.
    pub fn shutdown_all(&self) {
        let processes: Vec<Arc<Process>> = self.processes.lock().unwrap().drain().map(|(_, process)| process).collect();
        for process in processes {
            process.shutdown();
        }
    }
}
