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
use crate::{Flow, Processor, StageError, Task};
use maild_common::envelope::Envelope;
use maild_config::BackendConfig;

/// Build the trace header to prepend to the stored message
///
/// `primary_mail_host` names the receiving host, the listener's host name is
/// used when the key is missing.
#[derive(Debug, Default, Clone)]
pub struct Header {
    primary_mail_host: Option<String>,
}

impl Header {
    ///
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            primary_mail_host: config.get_str("primary_mail_host").map(str::to_string),
        }
    }

    fn received(&self, envelope: &Envelope) -> Result<String, StageError> {
        let host = self
            .primary_mail_host
            .as_deref()
            .unwrap_or(&envelope.server_name);
        let date = time::OffsetDateTime::from(envelope.received_at)
            .format(&time::format_description::well_known::Rfc2822)
            .map_err(|e| StageError::Temporary(format!("cannot format the date: {e}")))?;
        let id = envelope
            .scratch
            .get("hash")
            .unwrap_or(&envelope.queued_id);

        let mut header = String::new();
        if let Some(rcpt) = envelope.rcpt.first() {
            header.push_str(&format!("Delivered-To: {rcpt}\r\n"));
        }
        header.push_str(&format!(
            "Received: from {} ({})\r\n\tby {} with {} id {}@{};\r\n\t{}\r\n",
            envelope.helo,
            envelope.remote_addr.ip(),
            host,
            if envelope.is_tls { "ESMTPS" } else { "ESMTP" },
            id,
            host,
            date
        ));
        Ok(header)
    }
}

#[async_trait::async_trait]
impl Processor for Header {
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        if task == Task::SaveMail {
            envelope.delivery_header = self.received(envelope)?;
        }
        Ok(Flow::Continue)
    }
}
