//! maild processing pipeline

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
pub mod log_channels {
    /// chains and workers
    pub const BACKEND: &str = "backend";
    /// built-in processors
    pub const PROCESSOR: &str = "processor";
}

mod chain;
mod gateway;
mod processor;
mod registry;

/// Processors available without registration
pub mod processors;

pub use chain::Chain;
pub use gateway::{Backend, BackendError, GatewayConfig, ValidateAt};
pub use processor::{Flow, Processor, ProcessorFactory, StageError, Task};
pub use registry::ProcessorRegistry;
