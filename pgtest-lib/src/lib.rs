#![doc = include_str!("../README.md")]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
extern crate lazy_static;

pub mod atomic;
pub mod collaborators;
pub mod config;
pub mod current_test;
pub mod error;
pub mod harness;
pub mod install;
pub mod lock;
pub mod logging;
pub mod platform;
pub mod port;
pub mod registry;
pub mod retry;
pub mod server;
pub mod settings;

pub use config::Config;
pub use error::PgTestError;
pub use harness::{no_setup, with_database, Conn};
pub use registry::Registry;
pub use server::{Instance, Process};
pub use settings::Settings;

#[cfg(test)]
mod test_logging {
    #[ctor::ctor]
    unsafe fn init_logger() {
        use std::io::{stdout, IsTerminal};
        let mut logger = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Warn)
            .with_colors(stdout().is_terminal());
        logger = match crate::logging::pgtest_log_level() {
            Some(level) => logger.with_level(level),
            None => logger.env(),
        };
        logger.init().expect("could not initialize logger");
    }
}
