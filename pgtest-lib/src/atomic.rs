//! The atomic filesystem operation: produce a target directory exactly
//! once across all cooperating processes on the host.
//!
//! Protocol:
//!
//! 1. Acquire an exclusive, blocking file lock on `target.lock`.
//! 2. If `target` already exists, release the lock and return; the body
//!    does not run.
//! 3. Otherwise create a scratch directory named
//!    `target.<monotonic-nanoseconds>`.
//! 4. Invoke the body with the scratch path. On failure, delete the
//!    scratch tree and propagate the error.
//! 5. On success, rename the scratch directory onto `target`.
//! 6. The lock is released on every exit path by virtue of being dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use std::{fs, io};

use crate::lock::UnlockedFile;

lazy_static! {
    static ref PROCESS_START: Instant = Instant::now();
}
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(thiserror::Error, Debug)]
pub enum AtomicError {
    #[error("could not acquire lock for {target}")]
    Lock { target: PathBuf, #[source] source: io::Error },
    #[error("could not create scratch directory {scratch}")]
    CreateScratch { scratch: PathBuf, #[source] source: io::Error },
    #[error("could not rename {scratch} to {target}")]
    Rename { scratch: PathBuf, target: PathBuf, #[source] source: io::Error },
    #[error("step failed: {step}: {source}")]
    Step { step: &'static str, #[source] source: Box<dyn std::error::Error + Send + Sync> },
}

/// A name suffix that is unique within this process and monotonically
/// increasing, used to name scratch directories. Combining the elapsed
/// time since process start with a sequence counter keeps it monotonic
/// even if two calls land in the same nanosecond.
fn monotonic_nanoseconds() -> u128 {
    let elapsed = PROCESS_START.elapsed().as_nanos();
    let sequence = u128::from(SEQUENCE.fetch_add(1, Ordering::Relaxed));
    elapsed + sequence
}

/// Produce `target` exactly once, running `op(scratch)` to build it if it
/// does not already exist. Returns `true` if this call actually built
/// `target`, `false` if it already existed (the body did not run).
pub fn atomic_operation<F, T>(target: &Path, op: F) -> Result<(bool, Option<T>), AtomicError>
where
    F: FnOnce(&Path) -> Result<T, Box<dyn std::error::Error + Send + Sync>>,
{
    let lock_path = {
        let mut s = target.as_os_str().to_owned();
        s.push(".lock");
        PathBuf::from(s)
    };
    let lock = UnlockedFile::try_from(&lock_path)
        .map_err(|source| AtomicError::Lock { target: target.to_owned(), source })?;
    let _lock = lock
        .lock_exclusive()
        .map_err(|source| AtomicError::Lock { target: target.to_owned(), source: source.into() })?;

    if target.exists() {
        return Ok((false, None));
    }

    let scratch = {
        let mut s = target.as_os_str().to_owned();
        s.push(".");
        s.push(monotonic_nanoseconds().to_string());
        PathBuf::from(s)
    };
    fs::create_dir_all(&scratch)
        .map_err(|source| AtomicError::CreateScratch { scratch: scratch.clone(), source })?;

    match op(&scratch) {
        Ok(value) => {
            fs::rename(&scratch, target).map_err(|source| {
                let _ = fs::remove_dir_all(&scratch);
                AtomicError::Rename { scratch: scratch.clone(), target: target.to_owned(), source }
            })?;
            Ok((true, Some(value)))
        }
        Err(source) => {
            let _ = fs::remove_dir_all(&scratch);
            Err(AtomicError::Step { step: "body", source })
        }
    }
    // `_lock` is dropped here, releasing the flock on every exit path above.
}
