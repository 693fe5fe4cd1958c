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

/// Parse the header section of the message into [`Envelope::headers`]
///
/// Folded lines are unfolded, the `Subject` field is copied to
/// [`Envelope::subject`]. Only runs for the tasks which have the data.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadersParser;

/// Header fields of a raw message, stops at the first empty line
#[must_use]
pub fn parse_headers(data: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(data);
    let mut headers: Vec<(String, String)> = vec![];

    for line in text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)) {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) if !name.is_empty() && !name.contains(' ') => {
                headers.push((name.to_string(), value.trim().to_string()));
            }
            // the body starts without a blank line
            _ => break,
        }
    }
    headers
}

#[async_trait::async_trait]
impl Processor for HeadersParser {
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        if task == Task::ValidateRcpt {
            return Ok(Flow::Continue);
        }
        envelope.headers = parse_headers(&envelope.data);
        envelope.subject = envelope.header("Subject").map(str::to_string);
        Ok(Flow::Continue)
    }
}
