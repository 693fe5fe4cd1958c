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
use crate::{log_channels, Flow, Processor, StageError, Task};
use maild_common::envelope::Envelope;
use maild_config::BackendConfig;

/// Log every envelope going through the chain
#[derive(Debug, Default, Clone, Copy)]
pub struct Debugger {
    log_received_mails: bool,
}

impl Debugger {
    /// `log_received_mails = true` logs the message content too
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            log_received_mails: config.get_bool("log_received_mails").unwrap_or(false),
        }
    }
}

#[async_trait::async_trait]
impl Processor for Debugger {
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        tracing::info!(
            target: log_channels::PROCESSOR,
            "[{}] {:?} from={} rcpt={:?} helo={} remote={} tls={} size={}",
            envelope.queued_id,
            task,
            envelope.reverse_path(),
            envelope.rcpt.iter().map(ToString::to_string).collect::<Vec<_>>(),
            envelope.helo,
            envelope.remote_addr,
            envelope.is_tls,
            envelope.data.len()
        );
        if self.log_received_mails && task == Task::SaveMail {
            tracing::info!(
                target: log_channels::PROCESSOR,
                "[{}] message:\n{}",
                envelope.queued_id,
                String::from_utf8_lossy(&envelope.data)
            );
        }
        Ok(Flow::Continue)
    }
}
