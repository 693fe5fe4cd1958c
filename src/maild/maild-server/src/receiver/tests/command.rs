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
use crate::receiver::Command;
use maild_common::{code::SMTPReplyCode, Address};

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

#[test]
fn verbs_are_case_insensitive() {
    assert_eq!(
        Command::parse("helo foobar"),
        Ok(Command::Helo("foobar".to_string()))
    );
    assert_eq!(
        Command::parse("EhLo  client.example.com  "),
        Ok(Command::Ehlo("client.example.com".to_string()))
    );
    assert_eq!(Command::parse("data"), Ok(Command::Data));
    assert_eq!(Command::parse("StartTLS"), Ok(Command::StartTls));
    assert_eq!(Command::parse("NOOP anything"), Ok(Command::Noop));
    assert_eq!(Command::parse("help mail"), Ok(Command::Help));
}

#[test]
fn unknown_or_ill_formed() {
    assert_eq!(Command::parse(""), Err(SMTPReplyCode::Unrecognized));
    assert_eq!(Command::parse("FOO bar"), Err(SMTPReplyCode::Unrecognized));
    assert_eq!(Command::parse("HELO"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("HELO a b"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("DATA now"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("QUIT please"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("VRFY"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("MAIL TO:<a@b.c>"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("MAIL FROM:<a@b.c"), Err(SMTPReplyCode::SyntaxError));
    assert_eq!(Command::parse("RCPT FROM:<a@b.c>"), Err(SMTPReplyCode::SyntaxError));
}

#[test]
fn mail_from() {
    assert_eq!(
        Command::parse("MAIL FROM:<john@doe.com>"),
        Ok(Command::MailFrom {
            reverse_path: Some(addr("john@doe.com")),
            size: None
        })
    );
    assert_eq!(
        Command::parse("mail from: john@doe.com"),
        Ok(Command::MailFrom {
            reverse_path: Some(addr("john@doe.com")),
            size: None
        })
    );
    assert_eq!(
        Command::parse("MAIL FROM:<>"),
        Ok(Command::MailFrom {
            reverse_path: None,
            size: None
        })
    );
    assert_eq!(
        Command::parse("MAIL FROM:<@relay.com,@other.com:john@doe.com>"),
        Ok(Command::MailFrom {
            reverse_path: Some(addr("john@doe.com")),
            size: None
        })
    );
}

#[test]
fn mail_from_parameters() {
    assert_eq!(
        Command::parse("MAIL FROM:<john@doe.com> SIZE=1000 BODY=8BITMIME SMTPUTF8"),
        Ok(Command::MailFrom {
            reverse_path: Some(addr("john@doe.com")),
            size: Some(1000)
        })
    );
    assert_eq!(
        Command::parse("MAIL FROM:<john@doe.com> size=abc"),
        Err(SMTPReplyCode::SyntaxError)
    );
    assert_eq!(
        Command::parse("MAIL FROM:<john doe>"),
        Err(SMTPReplyCode::InvalidAddress)
    );
    assert_eq!(
        Command::parse("MAIL FROM:<johndoe>"),
        Err(SMTPReplyCode::InvalidAddress)
    );
}

#[test]
fn rcpt_to() {
    assert_eq!(
        Command::parse("RCPT TO:<jane@testserver.com>"),
        Ok(Command::RcptTo(addr("jane@testserver.com")))
    );
    assert_eq!(
        Command::parse("rcpt to: <jane@testserver.com> NOTIFY=NEVER"),
        Ok(Command::RcptTo(addr("jane@testserver.com")))
    );
    assert_eq!(
        Command::parse("RCPT TO:<>"),
        Err(SMTPReplyCode::InvalidAddress)
    );
    assert_eq!(
        Command::parse("RCPT TO:"),
        Err(SMTPReplyCode::SyntaxError)
    );
}
