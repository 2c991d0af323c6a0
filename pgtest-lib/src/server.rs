//! The server supervisor: owns exactly one running PostgreSQL process for
//! a given [`Config`], listening on a leased "port" (used only to
//! namespace its Unix-socket directory — TCP listening is disabled,
//! following `examples/original_source/postgres.go` exactly), and torn
//! down once every outstanding per-test [`Instance`] has been released.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

use crate::collaborators::{Pinger, Spawner, Supervised, SystemPinger, SystemSpawner};
use crate::config::Config;
use crate::lock::UnlockedFile;
use crate::port::{lease_port, PortError, PortLease};
use crate::retry::{wait_until_ready, CancelToken, RetryError};

/// Data directories older than this, left behind by a crashed previous
/// run, are garbage-collected the next time a server starts under the
/// same [`Config`].
const STALE_DATA_DIR_AGE: Duration = Duration::from_secs(10 * 60);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("could not clone snapshot {snapshot} into {data_dir}")]
    CloneSnapshot { snapshot: PathBuf, data_dir: PathBuf, #[source] source: std::io::Error },
    #[error("could not acquire snapshots lock at {path}")]
    SnapshotLock { path: PathBuf, #[source] source: std::io::Error },
    #[error(transparent)]
    PortLease(#[from] PortError),
    #[error("could not spawn postgres at {binary}")]
    Spawn { binary: PathBuf, #[source] source: std::io::Error },
    #[error(transparent)]
    Readiness(#[from] RetryError),
    #[error("could not create database {name}")]
    CreateDatabase { name: String, #[source] source: postgres::Error },
    #[error("could not open maintenance connection")]
    MaintenanceConnect(#[source] postgres::Error),
    #[error("could not open the user-facing connection")]
    UserConnectFailed(#[source] RetryError),
}

/// One outstanding per-test logical database. Dropping it releases the
/// rendezvous count and best-effort drops the database.
pub struct Instance {
    dsn: String,
    name: String,
    process: Arc<Process>,
}

impl Instance {
    /// The connection string for this instance's logical database.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// The logical database's name, e.g. for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.process.release(&self.name);
    }
}

/// The single long-lived PostgreSQL process backing a [`Config`].
pub struct Process {
    data_dir: PathBuf,
    socket_dir: PathBuf,
    port: u16,
    _port_lease: PortLease,
    child: Mutex<Box<dyn Supervised>>,
    pinger: Box<dyn Pinger>,
    next_db_id: AtomicU64,
    rendezvous: AtomicU64,
    idle: Condvar,
    idle_lock: Mutex<()>,
}

impl Process {
    /// Clone the snapshot, lease a port, spawn `postgres`, and block until
    /// it accepts connections.
    pub fn start(config: &Config) -> Result<Arc<Self>, ServerError> {
        Self::start_with_collaborators(config, &SystemSpawner, Box::new(SystemPinger))
    }

    pub fn start_with_collaborators(
        config: &Config,
        spawner: &dyn Spawner,
        pinger: Box<dyn Pinger>,
    ) -> Result<Arc<Self>, ServerError> {
        let data_dir = clone_snapshot_into_new_data_dir(config)?;
        let port_lease = lease_port()?;
        let port = port_lease.port();
        let socket_dir = data_dir.clone();

        let binary = config.binary_path.join("postgres");
        let args = vec![
            "-F".into(),
            "-D".into(),
            data_dir.clone().into_os_string(),
            "-p".into(),
            port.to_string().into(),
            "-c".into(),
            "listen_addresses=".into(),
            "-c".into(),
            "autovacuum=off".into(),
            "-c".into(),
            format!("unix_socket_directories={}", socket_dir.display()).into(),
        ];
        let child = spawner
            .spawn(&binary, &args, &[], &data_dir, std::process::Stdio::piped())
            .map_err(|source| ServerError::Spawn { binary: binary.clone(), source })?;

        let process = Arc::new(Self {
            data_dir,
            socket_dir,
            port,
            _port_lease: port_lease,
            child: Mutex::new(child),
            pinger,
            next_db_id: AtomicU64::new(0),
            rendezvous: AtomicU64::new(0),
            idle: Condvar::new(),
            idle_lock: Mutex::new(()),
        });

        let maintenance_dsn = process.dsn_for("postgres");
        let cancel = CancelToken::new();
        wait_until_ready(process.pinger.as_ref(), &maintenance_dsn, &cancel)?;

        Ok(process)
    }

    fn dsn_for(&self, dbname: &str) -> String {
        format!("host={} port={} user=postgres dbname={}", self.socket_dir.display(), self.port, dbname)
    }

    /// Allocate a fresh logical database and return a handle to it.
    pub fn acquire_instance(self: &Arc<Self>) -> Result<Instance, ServerError> {
        let id = self.next_db_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("pgtest_{id}");

        let maintenance_dsn = self.dsn_for("postgres");
        let mut maintenance = postgres::Client::connect(&maintenance_dsn, postgres::NoTls)
            .map_err(ServerError::MaintenanceConnect)?;
        maintenance
            .batch_execute(&format!("CREATE DATABASE \"{name}\""))
            .map_err(|source| ServerError::CreateDatabase { name: name.clone(), source })?;

        self.rendezvous.fetch_add(1, Ordering::SeqCst);
        Ok(Instance { dsn: self.dsn_for(&name), name, process: self.clone() })
    }

    fn release(&self, name: &str) {
        let maintenance_dsn = self.dsn_for("postgres");
        match postgres::Client::connect(&maintenance_dsn, postgres::NoTls) {
            Ok(mut maintenance) => {
                if let Err(err) = maintenance.batch_execute(&format!("DROP DATABASE IF EXISTS \"{name}\"")) {
                    log::warn!("dropping database {name} failed (best-effort): {err}");
                }
            }
            Err(err) => log::warn!("could not open maintenance connection to drop {name}: {err}"),
        }

        let remaining = self.rendezvous.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let _guard = self.idle_lock.lock().unwrap();
            self.idle.notify_all();
        }
    }

    /// Block until every issued [`Instance`] has been released, then kill
    /// the process group, remove the cloned data directory, and release
    /// the port lease. Every step is best-effort: failures are logged and
    /// collected, never propagated, since teardown runs on every exit path
    /// including error paths that already have a primary cause to report.
    pub fn shutdown(&self) {
        {
            let guard = self.idle_lock.lock().unwrap();
            let _guard = self
                .idle
                .wait_while(guard, |()| self.rendezvous.load(Ordering::SeqCst) > 0)
                .unwrap();
        }

        if let Err(err) = self.child.lock().unwrap().kill_process_group() {
            log::warn!("killing postgres process group failed (best-effort): {err}");
        }
        if let Err(err) = self.child.lock().unwrap().wait() {
            log::warn!("waiting for postgres to exit failed (best-effort): {err}");
        }
        if let Err(err) = std::fs::remove_dir_all(&self.data_dir) {
            log::warn!("removing data directory {} failed (best-effort): {err}", self.data_dir.display());
        }
    }
}

impl Drop for Process {
    /// A backstop for the common case, where the process-exit hook in
    /// [`crate::harness`] drains the registry and calls [`Process::shutdown`]
    /// directly: this only fires if a `Process` is ever dropped without
    /// going through the registry at all, e.g. in a test that constructs one
    /// directly.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clone the snapshot into a fresh, sequentially-numbered data directory
/// (`pgtest-<N>`) under an exclusive lock on `snapshots.lock`, so that two
/// processes racing to start under the same [`Config`] never pick the same
/// index. Stale data directories are garbage-collected while the lock is
/// held, before the next index is computed.
fn clone_snapshot_into_new_data_dir(config: &Config) -> Result<PathBuf, ServerError> {
    std::fs::create_dir_all(&config.workdir_path).ok();
    let lock_path = config.workdir_path.join("snapshots.lock");
    let unlocked = UnlockedFile::try_from(&lock_path)
        .map_err(|source| ServerError::SnapshotLock { path: lock_path.clone(), source })?;
    let _locked = unlocked
        .lock_exclusive()
        .map_err(|errno| ServerError::SnapshotLock { path: lock_path.clone(), source: errno.into() })?;

    collect_stale_data_dirs(&config.workdir_path);
    let next_index = max_existing_index(&config.workdir_path) + 1;
    let data_dir = config.workdir_path.join(format!("pgtest-{next_index}"));

    copy_dir_recursively(&config.snapshot_path, &data_dir).map_err(|source| ServerError::CloneSnapshot {
        snapshot: config.snapshot_path.clone(),
        data_dir: data_dir.clone(),
        source,
    })?;

    Ok(data_dir)
}

/// The largest `N` among existing `pgtest-<N>` entries directly under
/// `workdir`, or 0 if none exist yet.
fn max_existing_index(workdir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(workdir) else { return 0 };
    entries
        .flatten()
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("pgtest-"))
                .and_then(|suffix| suffix.parse::<u64>().ok())
        })
        .max()
        .unwrap_or(0)
}

fn collect_stale_data_dirs(workdir: &Path) {
    let Ok(entries) = std::fs::read_dir(workdir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = SystemTime::now().duration_since(modified) else { continue };
        if age > STALE_DATA_DIR_AGE {
            log::info!("removing stale data directory {}", path.display());
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

fn copy_dir_recursively(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursively(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakePinger, FakeSpawner};
    use serial_test::serial;

    fn make_config(root: &Path) -> Config {
        let snapshot = root.join("snapshot");
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(snapshot.join("PG_VERSION"), "16\n").unwrap();
        Config::new(root.join("bin"), snapshot, root.join("work"))
    }

    #[test]
    #[serial(pgtest_port_range_env)]
    fn start_clones_the_snapshot_into_a_fresh_data_directory() -> Result<(), Box<dyn std::error::Error>> {
        std::env::set_var("PGTEST_PORT_RANGE", "31000-31010");
        let dir = tempfile::tempdir()?;
        let config = make_config(dir.path());

        let spawner = FakeSpawner::default();
        let pinger: Box<dyn Pinger> = Box::new(FakePinger::failing_first(0));
        let process = Process::start_with_collaborators(&config, &spawner, pinger)?;

        assert!(process.data_dir.join("PG_VERSION").is_file());
        assert_eq!(spawner.spawn_count.load(Ordering::SeqCst), 1);

        assert_eq!(process.data_dir.file_name().unwrap(), "pgtest-1");

        process.shutdown();
        assert!(!process.data_dir.exists());
        std::env::remove_var("PGTEST_PORT_RANGE");
        Ok(())
    }

    #[test]
    fn clone_snapshot_into_new_data_dir_picks_the_next_sequential_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = make_config(dir.path());

        let first = clone_snapshot_into_new_data_dir(&config)?;
        let second = clone_snapshot_into_new_data_dir(&config)?;

        assert_eq!(first.file_name().unwrap(), "pgtest-1");
        assert_eq!(second.file_name().unwrap(), "pgtest-2");
        Ok(())
    }

    #[test]
    fn clone_snapshot_into_new_data_dir_continues_past_an_existing_high_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = make_config(dir.path());
        std::fs::create_dir_all(config.workdir_path.join("pgtest-5"))?;

        let next = clone_snapshot_into_new_data_dir(&config)?;

        assert_eq!(next.file_name().unwrap(), "pgtest-6");
        Ok(())
    }
}
