//! Log-level resolution shared by the test-time logger in [`crate::lib`] and
//! `pgtest-prepare`'s CLI logger: `PGTEST_LOG` overrides the level
//! independently of `RUST_LOG`, which `simple_logger`'s own `.env()` reads.

/// The level `PGTEST_LOG` names, or `None` if it is unset or unparseable
/// (a malformed value is logged and ignored, falling back to whatever
/// `RUST_LOG`/the caller's default would otherwise select).
pub fn pgtest_log_level() -> Option<log::LevelFilter> {
    let raw = std::env::var("PGTEST_LOG").ok()?;
    match raw.parse() {
        Ok(level) => Some(level),
        Err(_) => {
            log::warn!("ignoring malformed PGTEST_LOG={raw:?}");
            None
        }
    }
}
