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

/// Store a SHA-256 of the envelope under the `hash` scratch key
///
/// The hash covers the sender, the recipients, the subject and the queued id,
/// it is then used as the identifier given back to the client.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hasher;

/// hex encoded digest of the envelope
#[must_use]
pub fn envelope_hash(envelope: &Envelope) -> String {
    use sha2::Digest;

    let mut hasher = sha2::Sha256::new();
    hasher.update(envelope.reverse_path().as_bytes());
    for rcpt in &envelope.rcpt {
        hasher.update(rcpt.full().as_bytes());
    }
    hasher.update(envelope.subject.as_deref().unwrap_or_default().as_bytes());
    hasher.update(envelope.queued_id.as_bytes());

    format!("{:x}", hasher.finalize())
}

#[async_trait::async_trait]
impl Processor for Hasher {
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        if task == Task::SaveMail {
            let hash = envelope_hash(envelope);
            envelope.scratch.insert("hash".to_string(), hash);
        }
        Ok(Flow::Continue)
    }
}
