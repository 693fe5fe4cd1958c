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
use crate::BackendError;
use maild_common::envelope::{Disposition, Envelope};
use maild_config::BackendConfig;

/// Point of the conversation a chain is run for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Task {
    /// a recipient was just accepted, the reply to RCPT TO is pending
    ValidateRcpt,
    /// the message is received, the reply to DATA is pending
    ValidateData,
    /// the message must be stored
    SaveMail,
}

/// What the chain does after a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// run the next stage
    Continue,
    /// skip the remaining stages, the envelope ends with this disposition
    Stop(Disposition),
}

/// Failure reported by a stage, the remaining stages are skipped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// the client may retry later (4yz)
    #[error("temporary failure: {0}")]
    Temporary(String),
    /// the message is refused (5yz)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// A named processing stage
///
/// A stage is shared by every worker and must not keep per-envelope state.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    /// Process `envelope` for `task`
    ///
    /// # Errors
    ///
    /// * see [`StageError`]
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError>;
}

/// Builds a processor from the backend configuration, called once per chain build
pub type ProcessorFactory = std::sync::Arc<
    dyn Fn(&BackendConfig) -> Result<std::sync::Arc<dyn Processor>, BackendError> + Send + Sync,
>;
