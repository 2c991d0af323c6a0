//! Environment-derived configuration for callers that drive the library
//! directly rather than through `pgtest-prepare`'s `clap`-parsed CLI args.

use std::path::PathBuf;

use crate::install::default_root;
use crate::platform::{self, DEFAULT_VERSION};
use crate::port::port_range;

/// The same environment variables `with_database`/`Installer`/`lease_port`
/// already read independently, gathered into one value for callers who want
/// to inspect or override them up front instead of relying on ambient
/// `std::env` lookups scattered across the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub version: String,
    pub root: PathBuf,
    pub port_range: (u16, u16),
    pub force_maven: bool,
}

impl Settings {
    /// Read `PGTEST_VERSION`, `PGTEST_ROOT`, `PGTEST_PORT_RANGE`, and
    /// `PGTEST_FORCE_MAVEN`, falling back to the same defaults each
    /// individual module uses when a variable is unset.
    pub fn from_env() -> Self {
        Self {
            version: platform::resolve_version(None),
            root: default_root(),
            port_range: port_range(),
            force_maven: std::env::var("PGTEST_FORCE_MAVEN").map(|v| v == "1").unwrap_or(false),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_owned(),
            root: default_root(),
            port_range: (20000, 21000),
            force_maven: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(pgtest_settings_env)]
    fn from_env_reads_every_variable() {
        std::env::set_var("PGTEST_VERSION", "15.2.0");
        std::env::set_var("PGTEST_ROOT", "/tmp/settings-test-root");
        std::env::set_var("PGTEST_PORT_RANGE", "40000-40010");
        std::env::set_var("PGTEST_FORCE_MAVEN", "1");

        let settings = Settings::from_env();
        assert_eq!(settings.version, "15.2.0");
        assert_eq!(settings.root, PathBuf::from("/tmp/settings-test-root"));
        assert_eq!(settings.port_range, (40000, 40010));
        assert!(settings.force_maven);

        std::env::remove_var("PGTEST_VERSION");
        std::env::remove_var("PGTEST_ROOT");
        std::env::remove_var("PGTEST_PORT_RANGE");
        std::env::remove_var("PGTEST_FORCE_MAVEN");
    }

    #[test]
    #[serial(pgtest_settings_env)]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("PGTEST_VERSION");
        std::env::remove_var("PGTEST_ROOT");
        std::env::remove_var("PGTEST_PORT_RANGE");
        std::env::remove_var("PGTEST_FORCE_MAVEN");

        let settings = Settings::from_env();
        assert_eq!(settings.version, DEFAULT_VERSION);
        assert_eq!(settings.port_range, (20000, 21000));
        assert!(!settings.force_maven);
    }
}
