//! The top-level error type returned by [`crate::with_database`].
//!
//! Each module below this one (`atomic`, `install`, `port`, `server`,
//! `retry`) defines its own narrower `thiserror::Error` enum carrying the
//! detail for that step; lower-level errors fold into their caller's enum
//! (port and readiness errors into [`crate::server::ServerError`],
//! filesystem errors into [`crate::install::InstallError`]) the way
//! `pgdo::cluster::ClusterError` aggregates `runtime::RuntimeError` and
//! `version::VersionError`. This type aggregates only the errors that
//! actually cross the harness boundary: installation, server startup (which
//! already carries port leasing and readiness failures), and the caller's
//! own setup closure.
use crate::{install::InstallError, server::ServerError};

#[derive(thiserror::Error, miette::Diagnostic, Debug)]
pub enum PgTestError {
    #[error("installing PostgreSQL failed")]
    InstallFailure(#[from] InstallError),

    #[error("starting the PostgreSQL server failed")]
    ServerSpawnFailure(#[from] ServerError),

    #[error("test setup failed")]
    SetupFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
}
