//! Collaborator interfaces the core consumes: downloading, spawning, and
//! pinging, each behind a trait.
//!
//! These traits exist so that properties like reuse counts, port
//! exhaustion, readiness retry, and cancellation can be observed with
//! fakes, without a network connection or a real PostgreSQL binary.
//! Production code always uses the `System*` implementations; the
//! `Fake*` ones live here and are re-used from `pgtest-lib/tests/`.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::Path;
use std::process::ExitStatus;

/// Fetches a URL over HTTP, returning a readable stream of the body.
pub trait Downloader: std::fmt::Debug + Send + Sync {
    fn get(&self, url: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// The production [`Downloader`], backed by a blocking HTTP client.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDownloader;

impl Downloader for SystemDownloader {
    fn get(&self, url: &str) -> io::Result<Box<dyn Read + Send>> {
        let response = ureq::get(url)
            .call()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        Ok(Box::new(response.into_reader()))
    }
}

/// A running (or exited) child process, as returned by a [`Spawner`].
pub trait Supervised: Send {
    /// The process id of the direct child.
    fn pid(&self) -> u32;
    /// Non-blocking poll for exit.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
    /// Block until the child exits.
    fn wait(&mut self) -> io::Result<ExitStatus>;
    /// Send `SIGKILL` to the whole process group the child was placed in.
    fn kill_process_group(&mut self) -> io::Result<()>;
}

/// Spawns a subprocess with a working directory, environment, and
/// platform-specific process-group / parent-death attributes.
pub trait Spawner: std::fmt::Debug + Send + Sync {
    #[allow(clippy::needless_pass_by_value)]
    fn spawn(
        &self,
        program: &Path,
        args: &[OsString],
        envs: &[(OsString, OsString)],
        current_dir: &Path,
        stderr_sink: std::process::Stdio,
    ) -> io::Result<Box<dyn Supervised>>;
}

/// The production [`Spawner`], backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(
        &self,
        program: &Path,
        args: &[OsString],
        envs: &[(OsString, OsString)],
        current_dir: &Path,
        stderr_sink: std::process::Stdio,
    ) -> io::Result<Box<dyn Supervised>> {
        use std::os::unix::process::CommandExt;
        use std::process::Command;

        let mut command = Command::new(program);
        command.args(args).current_dir(current_dir).stderr(stderr_sink);
        for (key, value) in envs {
            command.env(key, value);
        }
        // Put the child in its own process group on every platform, so a
        // group-wide SIGKILL at teardown reaches PostgreSQL's own
        // postmaster-owned children too.
        command.process_group(0);
        // On Linux, additionally ask the kernel to deliver SIGTERM to the
        // child if this process dies first, as defence in depth alongside
        // the process-group kill.
        #[cfg(target_os = "linux")]
        unsafe {
            command.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let child = command.spawn()?;
        Ok(Box::new(SystemProcess { child }))
    }
}

struct SystemProcess {
    child: std::process::Child,
}

impl Supervised for SystemProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    fn kill_process_group(&mut self) -> io::Result<()> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let pid = Pid::from_raw(
            i32::try_from(self.child.id()).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?,
        );
        match killpg(pid, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from(err)),
        }
    }
}

/// Opens a connection to a DSN and pings it, the sole client-side
/// handshake used by the readiness/connect retry loop.
pub trait Pinger: std::fmt::Debug + Send + Sync {
    fn ping(&self, dsn: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// The production [`Pinger`], backed by the `postgres` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPinger;

impl Pinger for SystemPinger {
    fn ping(&self, dsn: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut client = postgres::Client::connect(dsn, postgres::NoTls)?;
        client.simple_query("SELECT 1")?;
        Ok(())
    }
}

/// Test doubles for [`Spawner`] and [`Pinger`], used by this crate's own
/// unit tests and re-exported for integration tests under `tests/` to
/// exercise the registry and harness without a real `postgres` binary.
pub mod fakes {
    use super::{Pinger, Spawner, Supervised};
    use std::ffi::OsString;
    use std::io;
    use std::path::Path;
    use std::process::{ExitStatus, Stdio};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records how many times it was asked to spawn, and hands back a
    /// [`FakeProcess`] that never actually exits until told to.
    #[derive(Debug, Clone, Default)]
    pub struct FakeSpawner {
        pub spawn_count: Arc<AtomicUsize>,
    }

    impl Spawner for FakeSpawner {
        fn spawn(
            &self,
            _program: &Path,
            _args: &[OsString],
            _envs: &[(OsString, OsString)],
            _current_dir: &Path,
            _stderr_sink: Stdio,
        ) -> io::Result<Box<dyn Supervised>> {
            self.spawn_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeProcess { exited: Arc::new(Mutex::new(false)) }))
        }
    }

    struct FakeProcess {
        exited: Arc<Mutex<bool>>,
    }

    impl Supervised for FakeProcess {
        fn pid(&self) -> u32 {
            0
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
            Ok(None)
        }

        fn wait(&mut self) -> io::Result<ExitStatus> {
            // A fake server process "waits" immediately once killed.
            loop {
                if *self.exited.lock().unwrap() {
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        return Ok(ExitStatus::from_raw(0));
                    }
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }

        fn kill_process_group(&mut self) -> io::Result<()> {
            *self.exited.lock().unwrap() = true;
            Ok(())
        }
    }

    /// Fails the first `fail_count` pings, then always succeeds.
    #[derive(Debug, Clone)]
    pub struct FakePinger {
        fail_count: usize,
        attempts: Arc<AtomicUsize>,
    }

    impl FakePinger {
        pub fn failing_first(fail_count: usize) -> Self {
            Self { fail_count, attempts: Arc::new(AtomicUsize::new(0)) }
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Pinger for FakePinger {
        fn ping(&self, _dsn: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_count {
                return Err("not ready yet".into());
            }
            Ok(())
        }
    }
}
