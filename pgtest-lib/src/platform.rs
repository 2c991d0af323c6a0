//! Host platform and version detection for the [installer][`crate::install`].

use std::env;

/// Default PostgreSQL version used when neither an explicit argument nor
/// `PGTEST_VERSION` is given.
pub const DEFAULT_VERSION: &str = "16.4.0";

#[derive(thiserror::Error, Debug)]
#[error("platform not supported: {os}/{arch}")]
pub struct UnsupportedPlatform {
    pub os: String,
    pub arch: String,
}

/// One of the recognized `(os, arch)` pairs, with `arch` already rewritten
/// to the Maven artifact's naming convention (`arm64` -> `arm64v8`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    /// Derive the host's platform, failing for anything outside
    /// `(linux|darwin) x (amd64|arm64)`.
    pub fn host() -> Result<Self, UnsupportedPlatform> {
        let os = match env::consts::OS {
            "linux" => "linux",
            "macos" => "darwin",
            other => {
                return Err(UnsupportedPlatform { os: other.to_owned(), arch: env::consts::ARCH.to_owned() })
            }
        };
        let arch = match env::consts::ARCH {
            "x86_64" => "amd64",
            // The Maven `embedded-postgres-binaries` artifacts name their
            // arm64 builds `arm64v8`, not plain `arm64`.
            "aarch64" => "arm64v8",
            other => return Err(UnsupportedPlatform { os: os.to_owned(), arch: other.to_owned() }),
        };
        Ok(Self { os, arch })
    }
}

/// Determine the PostgreSQL version to install.
///
/// Precedence: `explicit` argument, then the `PGTEST_VERSION` environment
/// variable, then [`DEFAULT_VERSION`].
pub fn resolve_version(explicit: Option<&str>) -> String {
    if let Some(version) = explicit {
        return version.to_owned();
    }
    if let Ok(version) = env::var("PGTEST_VERSION") {
        if !version.trim().is_empty() {
            return version;
        }
    }
    DEFAULT_VERSION.to_owned()
}

/// The major version component, e.g. `"16"` from `"16.4.0"`, used to build
/// the Nix expression `postgresql_<major>`.
pub fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn resolve_version_prefers_explicit_argument() {
        assert_eq!(resolve_version(Some("15.2.0")), "15.2.0");
    }

    #[test]
    #[serial(pgtest_version_env)]
    fn resolve_version_falls_back_to_default() {
        std::env::remove_var("PGTEST_VERSION");
        assert_eq!(resolve_version(None), DEFAULT_VERSION);
    }

    #[test]
    fn major_version_splits_on_first_dot() {
        assert_eq!(major_version("16.4.0"), "16");
        assert_eq!(major_version("16"), "16");
    }
}
