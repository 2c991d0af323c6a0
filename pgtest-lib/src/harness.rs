//! The harness entry point, ported from
//! `examples/original_source/pgtest.go`'s `WithDatabase`: install once,
//! obtain the shared server, allocate a fresh logical database, run the
//! caller's setup and test closures against it, and release everything in
//! reverse order on every exit path — including panics, via `Instance`'s
//! and `Conn`'s `Drop` impls.

use std::ops::{Deref, DerefMut};
use std::sync::Once;

use crate::current_test;
use crate::error::PgTestError;
use crate::install::Installer;
use crate::registry::Registry;
use crate::retry::{retry_with_backoff, CancelToken};
use crate::server::{Instance, ServerError};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REGISTER_EXIT_HOOK: Once = Once::new();

/// Stop every server this process started. Registered via `libc::atexit`,
/// the same way `examples/leynos-wildside/backend/tests/support/atexit_cleanup.rs`
/// bridges a leaked process-wide singleton to process-exit cleanup: `REGISTRY`
/// is a `lazy_static` and is never dropped at normal process exit, so nothing
/// would otherwise kill the server or reclaim its data directory and port
/// lease.
extern "C" fn shutdown_all_servers_on_exit() {
    REGISTRY.shutdown_all();
}

fn ensure_exit_hook_registered() {
    REGISTER_EXIT_HOOK.call_once(|| {
        // SAFETY: `shutdown_all_servers_on_exit` is a valid `extern "C"` fn
        // with no preconditions; `REGISTRY` only needs to exist by the time
        // it runs, which `lazy_static` guarantees once first accessed above.
        let rc = unsafe { libc::atexit(shutdown_all_servers_on_exit) };
        if rc != 0 {
            log::warn!("failed to register process-exit shutdown hook (rc={rc}); servers may outlive this process");
        }
    });
}

/// A connection to one test's private logical database. Derefs to
/// `postgres::Client` so callers can issue queries directly.
pub struct Conn {
    client: postgres::Client,
    _instance: Instance,
}

impl Deref for Conn {
    type Target = postgres::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl DerefMut for Conn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

/// A setup closure that does nothing, for callers with no fixture data to
/// load before the test body runs.
pub fn no_setup(_conn: &mut Conn) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

/// Run `test` against a fresh, empty database named `name` (for log
/// attribution only; the actual logical database name is chosen
/// internally), first running `setup` to populate any fixtures.
///
/// On the first call in a process, this installs PostgreSQL (downloading
/// and initializing a snapshot cluster if the cache is empty) and starts
/// the single shared server; every subsequent call in the same process
/// reuses both, only ever allocating a new logical database.
pub fn with_database<S, T, R>(name: &str, setup: S, test: T) -> Result<R, PgTestError>
where
    S: FnOnce(&mut Conn) -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
    T: FnOnce(&mut Conn) -> R,
{
    current_test::with_current(name, || with_database_inner(setup, test))
}

fn with_database_inner<S, T, R>(setup: S, test: T) -> Result<R, PgTestError>
where
    S: FnOnce(&mut Conn) -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
    T: FnOnce(&mut Conn) -> R,
{
    ensure_exit_hook_registered();

    let installer = Installer::new(crate::install::default_root());
    let config = installer.install(None)?;

    let process = REGISTRY.start(&config)?;
    let instance = process.acquire_instance()?;

    let cancel = CancelToken::new();
    let client = retry_with_backoff(|| postgres::Client::connect(instance.dsn(), postgres::NoTls), &cancel)
        .map_err(|source| PgTestError::ServerSpawnFailure(ServerError::UserConnectFailed(source)))?;
    let mut conn = Conn { client, _instance: instance };

    setup(&mut conn).map_err(PgTestError::SetupFailure)?;
    Ok(test(&mut conn))
    // `conn` drops here: the maintenance connection closes, then
    // `_instance` drops, releasing the rendezvous count and best-effort
    // dropping the logical database.
}
