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
use maild_common::{code::SMTPReplyCode, Address};

/// A command line sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO <domain>
    Helo(String),
    /// EHLO <domain>
    Ehlo(String),
    /// MAIL FROM:<reverse-path> [SIZE=<n>]
    MailFrom {
        /// `None` for the null sender `<>`
        reverse_path: Option<Address>,
        /// size declared by the client
        size: Option<usize>,
    },
    /// RCPT TO:<forward-path>
    RcptTo(Address),
    /// DATA
    Data,
    /// RSET
    Rset,
    /// NOOP [<string>]
    Noop,
    /// VRFY <string>
    Vrfy,
    /// HELP [<string>]
    Help,
    /// QUIT
    Quit,
    /// STARTTLS
    StartTls,
}

impl Command {
    /// Parse a command line, terminator removed.
    ///
    /// Verbs are case-insensitive. The angle brackets around a path are
    /// optional and a source route is ignored.
    ///
    /// # Errors
    ///
    /// * [`SMTPReplyCode::Unrecognized`] for an unknown verb
    /// * [`SMTPReplyCode::SyntaxError`] for ill-formed arguments
    /// * [`SMTPReplyCode::InvalidAddress`] for an ill-formed mailbox
    pub fn parse(line: &str) -> Result<Self, SMTPReplyCode> {
        let line = line.trim();
        let (verb, args) = line
            .split_once(' ')
            .map_or((line, ""), |(verb, args)| (verb, args.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => domain(args).map(Self::Helo),
            "EHLO" => domain(args).map(Self::Ehlo),
            "MAIL" => mail_from(args),
            "RCPT" => rcpt_to(args),
            "DATA" => no_args(args, Self::Data),
            "RSET" => no_args(args, Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "VRFY" if args.is_empty() => Err(SMTPReplyCode::SyntaxError),
            "VRFY" => Ok(Self::Vrfy),
            "HELP" => Ok(Self::Help),
            "QUIT" => no_args(args, Self::Quit),
            "STARTTLS" => no_args(args, Self::StartTls),
            _ => Err(SMTPReplyCode::Unrecognized),
        }
    }
}

fn no_args(args: &str, command: Command) -> Result<Command, SMTPReplyCode> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(SMTPReplyCode::SyntaxError)
    }
}

fn domain(args: &str) -> Result<String, SMTPReplyCode> {
    if args.is_empty() || args.contains(char::is_whitespace) {
        Err(SMTPReplyCode::SyntaxError)
    } else {
        Ok(args.to_string())
    }
}

/// Remove the case-insensitive `prefix` (`FROM:` or `TO:`) and the optional
/// space following it
fn strip_keyword<'a>(args: &'a str, prefix: &str) -> Result<&'a str, SMTPReplyCode> {
    match args.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Ok(args[prefix.len()..].trim_start()),
        _ => Err(SMTPReplyCode::SyntaxError),
    }
}

/// Split `<path> params`, the path is returned without brackets nor source route
fn split_path(args: &str) -> Result<(&str, &str), SMTPReplyCode> {
    let (path, params) = if let Some(bracketed) = args.strip_prefix('<') {
        let end = bracketed.find('>').ok_or(SMTPReplyCode::SyntaxError)?;
        (&bracketed[..end], &bracketed[end + 1..])
    } else {
        let end = args.find(char::is_whitespace).unwrap_or(args.len());
        if end == 0 {
            return Err(SMTPReplyCode::SyntaxError);
        }
        (&args[..end], &args[end..])
    };

    let path = match path.rfind(':') {
        Some(i) if path.starts_with('@') => &path[i + 1..],
        _ => path,
    };
    Ok((path, params.trim()))
}

fn mail_from(args: &str) -> Result<Command, SMTPReplyCode> {
    let (path, params) = split_path(strip_keyword(args, "FROM:")?)?;

    let reverse_path = if path.is_empty() {
        None
    } else {
        Some(Address::new(path).map_err(|_| SMTPReplyCode::InvalidAddress)?)
    };

    let mut size = None;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        // BODY, SMTPUTF8 and unknown parameters are accepted and ignored
        if key.eq_ignore_ascii_case("SIZE") {
            size = Some(value.parse().map_err(|_| SMTPReplyCode::SyntaxError)?);
        }
    }

    Ok(Command::MailFrom { reverse_path, size })
}

fn rcpt_to(args: &str) -> Result<Command, SMTPReplyCode> {
    let (path, _) = split_path(strip_keyword(args, "TO:")?)?;

    Address::new(path)
        .map(Command::RcptTo)
        .map_err(|_| SMTPReplyCode::InvalidAddress)
}
