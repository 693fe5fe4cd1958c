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

/// Maximum number of recipients accepted in one transaction
pub const MAX_RECIPIENTS: usize = 100;

/// A reply as written on the wire.
///
/// A single line is formatted as `<code> <enhanced> <text>\r\n`, a multi-line
/// reply uses `<code>-` on every line but the last.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reply {
    code: u16,
    enhanced: Option<String>,
    lines: Vec<String>,
}

impl Reply {
    /// Create a single line reply
    #[must_use]
    pub fn new(code: u16, enhanced: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: enhanced.map(str::to_string),
            lines: vec![text.into()],
        }
    }

    /// Create a multi-line reply, an empty `lines` produces a single empty line
    #[must_use]
    pub fn multiline(code: u16, enhanced: Option<&str>, lines: Vec<String>) -> Self {
        Self {
            code,
            enhanced: enhanced.map(str::to_string),
            lines: if lines.is_empty() {
                vec![String::new()]
            } else {
                lines
            },
        }
    }

    /// The three digit code
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// The enhanced status code (RFC 3463), if any
    #[must_use]
    pub fn enhanced(&self) -> Option<&str> {
        self.enhanced.as_deref()
    }

    /// Text of the reply, lines joined with a space
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// 4yz and 5yz replies
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// 4yz replies
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5yz replies
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code >= 500
    }

    /// Opening banner of a connection
    #[must_use]
    pub fn greetings(host_name: &str) -> Self {
        Self::multiline(
            220,
            None,
            vec![
                format!("{host_name} ESMTP maild"),
                format!("{host_name} Service ready"),
            ],
        )
    }

    /// Reply to HELO, echoing the listener's own host name
    #[must_use]
    pub fn helo(host_name: &str) -> Self {
        Self::new(250, None, format!("{host_name} Hello"))
    }

    /// Reply to EHLO, followed by the advertised extensions
    #[must_use]
    pub fn ehlo(host_name: &str, extensions: &[String]) -> Self {
        Self::multiline(
            250,
            None,
            std::iter::once(format!("{host_name} Hello"))
                .chain(extensions.iter().cloned())
                .collect(),
        )
    }

    /// Recipient domain is not in the allowed hosts
    #[must_use]
    pub fn relay_denied(domain: &str) -> Self {
        Self::new(
            454,
            Some("4.1.1"),
            format!("Error: Relay access denied: {domain}"),
        )
    }

    /// The client stayed silent for longer than the listener's timeout
    #[must_use]
    pub fn timeout(host_name: &str) -> Self {
        Self::new(
            421,
            Some("4.4.2"),
            format!("{host_name} Error: timeout exceeded"),
        )
    }

    /// Message handed over to the save chain
    #[must_use]
    pub fn queued(queued_as: &str) -> Self {
        Self::new(250, Some("2.0.0"), format!("OK: queued as {queued_as}"))
    }

    /// Temporary failure reported by a processing stage
    #[must_use]
    pub fn temporary_failure(text: &str) -> Self {
        Self::new(451, Some("4.3.0"), format!("Error: {}", single_line(text)))
    }

    /// Permanent failure reported by a processing stage
    #[must_use]
    pub fn permanent_failure(text: &str) -> Self {
        Self::new(554, Some("5.3.0"), format!("Error: {}", single_line(text)))
    }
}

/// `text` on one line, control characters removed
fn single_line(text: &str) -> String {
    text.split(char::is_control)
        .filter(|part| !part.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            match &self.enhanced {
                Some(enhanced) => write!(f, "{}{separator}{enhanced} {line}\r\n", self.code)?,
                None => write!(f, "{}{separator}{line}\r\n", self.code)?,
            }
        }
        Ok(())
    }
}

/// Replies whose text does not depend on the session
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SMTPReplyCode {
    /// MAIL FROM accepted
    MailOk,
    /// RCPT TO accepted
    RcptOk,
    /// DATA accepted, waiting for the message
    DataStart,
    /// NOOP
    Noop,
    /// RSET
    Reset,
    /// VRFY
    Vrfy,
    /// HELP
    Help,
    /// QUIT
    Quit,
    /// STARTTLS accepted, the handshake follows
    StartTls,
    /// STARTTLS not offered by the listener
    TlsNotAvailable,
    /// command out of its required state
    BadSequence,
    /// unknown verb
    Unrecognized,
    /// known verb, ill-formed arguments
    SyntaxError,
    /// ill-formed mailbox
    InvalidAddress,
    /// more than [`MAX_RECIPIENTS`] recipients
    TooManyRecipients,
    /// message over the listener's size limit
    MessageTooLarge,
    /// command line over the length limit
    LineTooLong,
    /// the client keeps sending unknown commands, the connection is closed
    TooManyUnrecognized,
    /// the listener is at its client limit
    TooBusy,
    /// the save queue is saturated
    QueueFull,
    /// the listener is going away
    ShuttingDown,
}

impl SMTPReplyCode {
    /// Build the reply
    #[must_use]
    pub fn reply(self) -> Reply {
        let (code, enhanced, text) = match self {
            Self::MailOk => (250, Some("2.1.0"), "OK"),
            Self::RcptOk => (250, Some("2.1.5"), "OK"),
            Self::DataStart => (354, None, "Enter message, ending with '.' on a line by itself"),
            Self::Noop => (250, Some("2.0.0"), "OK"),
            Self::Reset => (250, Some("2.1.0"), "OK"),
            Self::Vrfy => (
                252,
                Some("2.1.5"),
                "Cannot VRFY user, but will accept message",
            ),
            Self::Help => (
                214,
                Some("2.0.0"),
                "Commands: HELO EHLO MAIL RCPT DATA RSET NOOP QUIT STARTTLS VRFY HELP",
            ),
            Self::Quit => (221, Some("2.0.0"), "Bye"),
            Self::StartTls => (220, Some("2.0.0"), "Ready to start TLS"),
            Self::TlsNotAvailable => (454, Some("4.7.0"), "TLS not available"),
            Self::BadSequence => (503, Some("5.5.1"), "Error: bad sequence of commands"),
            Self::Unrecognized => (500, Some("5.5.1"), "Unrecognized command"),
            Self::SyntaxError => (
                501,
                Some("5.5.4"),
                "Syntax error in parameters or arguments",
            ),
            Self::InvalidAddress => (501, Some("5.1.3"), "Error: invalid address"),
            Self::TooManyRecipients => (452, Some("4.5.3"), "Error: too many recipients"),
            Self::MessageTooLarge => (552, Some("5.3.4"), "Error: maximum DATA size exceeded"),
            Self::LineTooLong => (500, Some("5.5.2"), "Error: line too long"),
            Self::TooManyUnrecognized => (554, Some("5.5.1"), "Too many unrecognized commands"),
            Self::TooBusy => (421, Some("4.3.2"), "Too busy. Try again later."),
            Self::QueueFull => (451, Some("4.3.0"), "Error: backend busy, try again later"),
            Self::ShuttingDown => (421, Some("4.3.0"), "Server is shutting down"),
        };
        Reply::new(code, enhanced, text)
    }
}

impl From<SMTPReplyCode> for Reply {
    fn from(code: SMTPReplyCode) -> Self {
        code.reply()
    }
}
