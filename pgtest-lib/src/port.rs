//! The port leaser: hand out an exclusively-leased TCP port from a fixed
//! range, grounded directly on [`crate::lock`] the same way
//! `pgdo_lib::coordinate::startup` uses a non-blocking exclusive flock to
//! avoid racing another process for the cluster lock.
//!
//! The lease is a host-wide claim, not scoped to any one installation: it
//! locks a file named deterministically from the port number alone, under
//! the system temporary directory, via [`crate::lock::UnlockedFile`]'s
//! UUID constructor. Two `Process`es started from different `Config`s (or
//! different `workdir_path`s entirely) therefore still contend on the same
//! lockfile for a given port number, so they can never both claim it.

use std::env;

use either::{Left, Right};
use uuid::Uuid;

use crate::lock::{LockedFileExclusive, UnlockedFile};

#[derive(thiserror::Error, Debug)]
pub enum PortError {
    #[error("no free port available in {start}..{end}")]
    Exhausted { start: u16, end: u16 },
    #[error("could not open lock file for port {port}")]
    Lock { port: u16, #[source] source: std::io::Error },
}

/// Namespace UUID used to derive a deterministic, host-wide lock file name
/// per candidate port. Arbitrary but fixed: every process leasing port `N`
/// must land on the same lock file regardless of its own installation
/// root, or the exclusivity this module exists to provide would not hold.
const PORT_LOCK_NAMESPACE: Uuid =
    Uuid::from_bytes([0x6f, 0x1d, 0x3b, 0x2a, 0x5e, 0x77, 0x4b, 0x9d, 0x8a, 0x10, 0x2c, 0x44, 0x7a, 0x91, 0xe3, 0x5c]);

fn lock_uuid_for_port(port: u16) -> Uuid {
    Uuid::new_v5(&PORT_LOCK_NAMESPACE, &port.to_be_bytes())
}

/// The `[start, end)` range of candidate ports, from `PGTEST_PORT_RANGE`
/// (`"<start>-<end>"`) or `[20000, 21000)` by default.
pub(crate) fn port_range() -> (u16, u16) {
    if let Ok(raw) = env::var("PGTEST_PORT_RANGE") {
        if let Some((start, end)) = raw.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse(), end.trim().parse()) {
                return (start, end);
            }
        }
        log::warn!("ignoring malformed PGTEST_PORT_RANGE={raw:?}, using default");
    }
    (20000, 21000)
}

/// A leased port, held exclusively for as long as this value lives. The
/// lease is released when this is dropped.
pub struct PortLease {
    port: u16,
    _lock: LockedFileExclusive,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Scan the candidate port range and return the first port this process
/// can take an exclusive, non-blocking, host-wide lock on.
pub fn lease_port() -> Result<PortLease, PortError> {
    let (start, end) = port_range();
    for port in start..end {
        let uuid = lock_uuid_for_port(port);
        let unlocked = match UnlockedFile::try_from(&uuid) {
            Ok(unlocked) => unlocked,
            Err(source) => return Err(PortError::Lock { port, source }),
        };
        match unlocked.try_lock_exclusive() {
            Ok(Right(locked)) => return Ok(PortLease { port, _lock: locked }),
            Ok(Left(_unlocked_again)) => continue,
            Err(errno) => return Err(PortError::Lock { port, source: errno.into() }),
        }
    }
    Err(PortError::Exhausted { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(pgtest_port_range_env)]
    fn leases_are_mutually_exclusive_within_a_small_range() -> Result<(), Box<dyn std::error::Error>> {
        std::env::set_var("PGTEST_PORT_RANGE", "30000-30002");

        let first = lease_port()?;
        let second = lease_port()?;
        assert_ne!(first.port(), second.port());

        // The range only has two ports; a third lease must fail.
        let result = lease_port();
        assert!(result.is_err());

        std::env::remove_var("PGTEST_PORT_RANGE");
        Ok(())
    }

    #[test]
    #[serial(pgtest_port_range_env)]
    fn releasing_a_lease_frees_its_port_for_reuse() -> Result<(), Box<dyn std::error::Error>> {
        std::env::set_var("PGTEST_PORT_RANGE", "30100-30101");

        let first = lease_port()?;
        let port = first.port();
        drop(first);

        let second = lease_port()?;
        assert_eq!(second.port(), port);

        std::env::remove_var("PGTEST_PORT_RANGE");
        Ok(())
    }

    #[test]
    #[serial(pgtest_port_range_env)]
    fn lease_is_host_wide_regardless_of_caller_supplied_directory() -> Result<(), Box<dyn std::error::Error>> {
        // Leasing never takes a directory argument any more: two leases
        // for the same range must still contend on the same lock file even
        // though nothing here points them at a shared directory.
        std::env::set_var("PGTEST_PORT_RANGE", "30200-30201");

        let first = lease_port()?;
        assert!(lease_port().is_err(), "the single port in range must already be held");
        drop(first);
        assert!(lease_port().is_ok(), "the port must be free again once released");

        std::env::remove_var("PGTEST_PORT_RANGE");
        Ok(())
    }
}
