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
use crate::{log_channels, Flow, Processor, ProcessorRegistry, StageError, Task};
use maild_common::{
    code::Reply,
    envelope::{Disposition, Envelope},
};
use maild_config::BackendConfig;

/// Ordered stages resolved from a `|` separated list of names
///
/// A chain is never modified, a new configuration builds a new chain.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<(String, std::sync::Arc<dyn Processor>)>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Chain {
    /// Resolve the `|` separated names of `process`, empty names are skipped
    ///
    /// # Errors
    ///
    /// * a name is not registered
    /// * a factory failed
    pub fn parse(
        process: &str,
        registry: &ProcessorRegistry,
        config: &BackendConfig,
    ) -> Result<Self, crate::BackendError> {
        process
            .split('|')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| Ok((name.to_string(), registry.build(name, config)?)))
            .collect::<Result<Vec<_>, crate::BackendError>>()
            .map(|stages| Self { stages })
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// names of the stages, in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    /// Run the stages in order.
    ///
    /// A [`Flow::Stop`] ends the chain with its disposition, an error ends it
    /// with a failure of the same class. When every stage continues the
    /// envelope is accepted, under its `hash` if a stage computed one.
    pub async fn run(&self, task: Task, envelope: &mut Envelope) -> Disposition {
        for (name, stage) in &self.stages {
            match stage.process(task, envelope).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(disposition)) => {
                    tracing::debug!(
                        target: log_channels::BACKEND,
                        "[{}] {:?} stopped by '{}': {:?}",
                        envelope.queued_id,
                        task,
                        name,
                        disposition
                    );
                    return disposition;
                }
                Err(error) => {
                    tracing::warn!(
                        target: log_channels::BACKEND,
                        "[{}] {:?} failed in '{}': {}",
                        envelope.queued_id,
                        task,
                        name,
                        error
                    );
                    return match error {
                        StageError::Temporary(reason) => {
                            Disposition::TemporaryFailure(Reply::temporary_failure(&reason))
                        }
                        StageError::Permanent(reason) => {
                            Disposition::Rejected(Reply::permanent_failure(&reason))
                        }
                    };
                }
            }
        }

        Disposition::Accepted {
            queued_as: envelope
                .scratch
                .get("hash")
                .cloned()
                .unwrap_or_else(|| envelope.queued_id.clone()),
        }
    }
}
