//! maild listeners and SMTP sessions

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

#[cfg(test)]
mod tests;

/// targets for the tracing macros
pub mod log_channels {
    /// SMTP sessions
    pub const RECEIVER: &str = "receiver";
    /// listeners and their reaction to reloads
    pub const SERVER: &str = "server";
    /// certificates
    pub const TLS: &str = "tls";
}

mod manager;
mod server;
mod tls;

/// SMTP sessions
pub mod receiver;

pub use manager::ServerManager;
pub use server::Listener;
pub use tls::{TlsError, TlsManager};

/// Errors of the listeners
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// the listen address cannot be bound
    #[error("cannot bind [{addr}]: {source}")]
    Bind {
        /// listen address
        addr: String,
        ///
        source: std::io::Error,
    },
    /// the certificate of a listener cannot be used
    #[error("cannot use TLS config for [{addr}]: {source}")]
    Tls {
        /// listen address
        addr: String,
        ///
        source: TlsError,
    },
    /// no listener is registered under this address
    #[error("unknown server [{0}]")]
    UnknownServer(String),
}

/// re-exported crates used by the public api
pub mod re {
    pub use rustls;
    pub use tokio_rustls;
}
