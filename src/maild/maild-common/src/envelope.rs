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
use crate::{code::Reply, Address};

/// Outcome of validating or saving an envelope
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Disposition {
    /// the message is accepted
    Accepted {
        /// identifier given back to the client
        queued_as: String,
    },
    /// permanent failure, the client must not retry
    Rejected(Reply),
    /// temporary failure, the client may retry later
    TemporaryFailure(Reply),
}

impl Disposition {
    /// reply sent to the client at the end of the transaction
    #[must_use]
    pub fn reply(&self) -> Reply {
        match self {
            Self::Accepted { queued_as } => Reply::queued(queued_as),
            Self::Rejected(reply) | Self::TemporaryFailure(reply) => reply.clone(),
        }
    }

    ///
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// One message transaction, created at MAIL FROM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// identifier generated at creation
    pub queued_id: String,
    /// reverse path, `None` for the null sender `<>`
    pub mail_from: Option<Address>,
    /// forward paths in the order they were accepted
    pub rcpt: Vec<Address>,
    /// raw header and body, dot-stuffing removed
    pub data: Vec<u8>,
    /// name claimed by the client in HELO/EHLO
    pub helo: String,
    /// host name advertised by the listener which received the message
    pub server_name: String,
    /// peer socket address
    pub remote_addr: std::net::SocketAddr,
    /// was the transaction made under TLS
    pub is_tls: bool,
    /// creation time
    pub received_at: std::time::SystemTime,
    /// header fields, filled by the header parsing stage
    pub headers: Vec<(String, String)>,
    /// value of the `Subject` header, filled by the header parsing stage
    pub subject: Option<String>,
    /// trace header to prepend to the message on storage
    pub delivery_header: String,
    /// data attached by processing stages
    pub scratch: std::collections::BTreeMap<String, String>,
    /// terminal outcome, set once the save chain is done
    pub disposition: Option<Disposition>,
}

impl Envelope {
    /// Create an empty transaction
    #[must_use]
    pub fn new(
        remote_addr: std::net::SocketAddr,
        helo: String,
        server_name: String,
        is_tls: bool,
        mail_from: Option<Address>,
    ) -> Self {
        Self {
            queued_id: new_queued_id(),
            mail_from,
            rcpt: vec![],
            data: vec![],
            helo,
            server_name,
            remote_addr,
            is_tls,
            received_at: std::time::SystemTime::now(),
            headers: vec![],
            subject: None,
            delivery_header: String::new(),
            scratch: std::collections::BTreeMap::new(),
            disposition: None,
        }
    }

    /// First value of a header field, compared case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `<>` for the null sender
    #[must_use]
    pub fn reverse_path(&self) -> String {
        self.mail_from
            .as_ref()
            .map_or_else(|| "<>".to_string(), |addr| format!("<{addr}>"))
    }
}

fn new_queued_id() -> String {
    format!(
        "{:x}{:016x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        fastrand::u64(..)
    )
}
