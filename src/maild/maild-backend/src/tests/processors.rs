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
use super::envelope;
use crate::{
    processors::{self, Debugger, Hasher, Header, HeadersParser},
    Processor, Task,
};
use maild_common::re::serde_json;
use maild_config::BackendConfig;

#[test]
fn parse_headers() {
    pretty_assertions::assert_eq!(
        processors::parse_headers(
            b"From: a@b.com\r\nSubject: a long\r\n  folded subject\r\nX-Empty:\r\n\r\nBody: not a header\r\n"
        ),
        vec![
            ("From".to_string(), "a@b.com".to_string()),
            ("Subject".to_string(), "a long folded subject".to_string()),
            ("X-Empty".to_string(), String::new()),
        ]
    );
    assert!(processors::parse_headers(b"no header here\r\n").is_empty());
    assert!(processors::parse_headers(b"").is_empty());
}

#[tokio::test]
async fn headers_parser_skips_rcpt() {
    let mut envelope = envelope();
    HeadersParser
        .process(Task::ValidateRcpt, &mut envelope)
        .await
        .unwrap();
    assert!(envelope.headers.is_empty());

    HeadersParser
        .process(Task::ValidateData, &mut envelope)
        .await
        .unwrap();
    assert_eq!(envelope.subject.as_deref(), Some("hello"));
    assert_eq!(envelope.header("from"), Some("john@doe.com"));
}

#[tokio::test]
async fn hasher() {
    let mut envelope = envelope();
    envelope.subject = Some("hello".to_string());

    Hasher.process(Task::ValidateData, &mut envelope).await.unwrap();
    assert!(envelope.scratch.get("hash").is_none());

    Hasher.process(Task::SaveMail, &mut envelope).await.unwrap();
    let hash = envelope.scratch.get("hash").unwrap().clone();
    assert_eq!(hash, processors::envelope_hash(&envelope));

    envelope.subject = Some("other".to_string());
    assert_ne!(hash, processors::envelope_hash(&envelope));
}

#[tokio::test]
async fn header() {
    let mut envelope = envelope();
    envelope.received_at = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);

    Header::new(&BackendConfig::default())
        .process(Task::SaveMail, &mut envelope)
        .await
        .unwrap();
    pretty_assertions::assert_eq!(
        envelope.delivery_header,
        format!(
            "Delivered-To: jane@testserver.com\r\nReceived: from client.example.com (192.168.1.2)\r\n\tby mx.testserver.com with ESMTP id {id}@mx.testserver.com;\r\n\tSun, 09 Sep 2001 01:46:40 +0000\r\n",
            id = envelope.queued_id
        )
    );

    let primary = BackendConfig::new([("primary_mail_host", serde_json::json!("mail.example.org"))]);
    envelope.is_tls = true;
    envelope.scratch.insert("hash".to_string(), "abcd".to_string());
    Header::new(&primary)
        .process(Task::SaveMail, &mut envelope)
        .await
        .unwrap();
    assert!(envelope
        .delivery_header
        .contains("by mail.example.org with ESMTPS id abcd@mail.example.org;"));
}

#[tokio::test]
async fn debugger_does_not_touch_the_envelope() {
    let mut envelope = envelope();
    let before = envelope.clone();
    let debugger = Debugger::new(&BackendConfig::new([(
        "log_received_mails",
        serde_json::json!(true),
    )]));

    debugger.process(Task::SaveMail, &mut envelope).await.unwrap();
    pretty_assertions::assert_eq!(envelope, before);
}
