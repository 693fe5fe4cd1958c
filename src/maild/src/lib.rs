//! maild SMTP receiving daemon

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]

/**
 * maild SMTP receiving daemon
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
**/

/// targets for the tracing macros
pub mod log_channels {
    /// lifecycle and reload coordination
    pub const DAEMON: &str = "daemon";
}

mod args;
mod daemon;
mod logs;
mod pid;

pub use args::Args;
pub use daemon::Daemon;
pub use logs::Logs;

use maild_backend::BackendError;
use maild_config::ConfigError;
use maild_server::{ServerError, TlsError};

/// Errors of the daemon lifecycle
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    ///
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// the certificate of an enabled listener cannot be used
    #[error("cannot use TLS config for [{server}]: {source}")]
    Tls {
        /// listen address
        server: String,
        ///
        source: TlsError,
    },
    ///
    #[error("{0}")]
    Backend(#[from] BackendError),
    ///
    #[error("{0}")]
    Server(#[from] ServerError),
    /// the log file cannot be opened
    #[error("cannot open log file '{path}': {source}")]
    LogFile {
        ///
        path: std::path::PathBuf,
        ///
        source: std::io::Error,
    },
    /// the global subscriber is already set
    #[error("cannot install the log subscriber: {0}")]
    Logs(String),
    ///
    #[error("cannot write pid file '{path}': {source}")]
    PidFile {
        ///
        path: std::path::PathBuf,
        ///
        source: std::io::Error,
    },
    /// processors must be registered before the daemon starts
    #[error("the daemon is already started")]
    AlreadyStarted,
    ///
    #[error("the daemon is not started")]
    NotStarted,
    /// `reload` needs the configuration to come from a file
    #[error("the configuration was not loaded from a file")]
    NoSource,
    ///
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Process exit status for this error
    ///
    /// * 2 the configuration is invalid
    /// * 3 a certificate cannot be used
    /// * 4 the processing pipeline cannot be built
    /// * 1 anything else
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Tls { .. } | Self::Server(ServerError::Tls { .. }) => 3,
            Self::Backend(_) => 4,
            _ => 1,
        }
    }
}
