//! maild configuration

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
pub mod log_channel {
    /// configuration loading and diffing
    pub const CONFIG: &str = "config";
}

mod config;
mod default;
mod diff;
mod event;
mod parser;

pub use config::{AllowedHosts, AppConfig, BackendConfig, ConfigError, ServerConfig, TlsConfig};
pub use diff::diff;
pub use event::{Event, EventKind};
