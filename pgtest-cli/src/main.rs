#![doc = include_str!("../README.md")]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

/// Acquire a PostgreSQL installation and initialize its cluster snapshot,
/// without starting a server. Ported from
/// `examples/original_source/cmd/prepare/main.go`: a single-purpose
/// command meant to run once, ahead of a test suite, so the one-time
/// download/initdb cost lands in CI cache warming rather than test time.
#[derive(Parser, Debug)]
#[command(name = "pgtest-prepare", version, about)]
struct Cli {
    /// PostgreSQL version to install, e.g. "16.4.0". Defaults to
    /// `PGTEST_VERSION`, then the crate's built-in default.
    #[arg(long, env = "PGTEST_VERSION")]
    version: Option<String>,

    /// Installation cache root. Defaults to `PGTEST_ROOT`, then
    /// `$HOME/.cache/pgtest`.
    #[arg(long, env = "PGTEST_ROOT")]
    root: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let mut logger = simple_logger::SimpleLogger::new().with_level(log::LevelFilter::Info);
    logger = match pgtest::logging::pgtest_log_level() {
        Some(level) => logger.with_level(level),
        None => logger.env(),
    };
    logger.init().expect("could not initialize logger");

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(pgtest::install::default_root);
    let installer = pgtest::install::Installer::new(root);

    match installer.install(cli.version.as_deref()) {
        Ok(config) => {
            log::info!("installation ready: {}", config.binary_path.display());
            log::info!("snapshot ready: {}", config.snapshot_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            log::error!("preparing PostgreSQL installation failed: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
