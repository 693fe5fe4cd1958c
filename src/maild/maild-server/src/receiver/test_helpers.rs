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
use super::{handle_connection, Connection, Context};
use crate::TlsManager;
use maild_backend::{Backend, Flow, Processor, ProcessorRegistry, StageError, Task};
use maild_common::{
    code::Reply,
    envelope::{Disposition, Envelope},
    re::serde_json,
};
use maild_config::{AllowedHosts, BackendConfig, ServerConfig};

pub const CLIENT_ADDR: &str = "192.168.1.2:45678";
pub const SERVER_ID: &str = "127.0.0.1:0";

pub type Journal = std::sync::Arc<std::sync::Mutex<Vec<Envelope>>>;

/// Accepts every message under `fixed-id`
struct Fixed;

#[async_trait::async_trait]
impl Processor for Fixed {
    async fn process(&self, task: Task, _: &mut Envelope) -> Result<Flow, StageError> {
        Ok(match task {
            Task::SaveMail => Flow::Stop(Disposition::Accepted {
                queued_as: "fixed-id".to_string(),
            }),
            Task::ValidateRcpt | Task::ValidateData => Flow::Continue,
        })
    }
}

/// Keeps a copy of every envelope saved
struct Recorder(Journal);

#[async_trait::async_trait]
impl Processor for Recorder {
    async fn process(&self, _: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        self.0.lock().unwrap().push(envelope.clone());
        Ok(Flow::Continue)
    }
}

/// Refuses the recipient `blocked@...` and any message containing `spam`
struct Gatekeeper;

#[async_trait::async_trait]
impl Processor for Gatekeeper {
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        match task {
            Task::ValidateRcpt
                if envelope
                    .rcpt
                    .last()
                    .map_or(false, |rcpt| rcpt.local_part() == "blocked") =>
            {
                Ok(Flow::Stop(Disposition::Rejected(Reply::new(
                    550,
                    Some("5.1.1"),
                    "mailbox unavailable",
                ))))
            }
            Task::ValidateData if envelope.data.windows(4).any(|w| w == b"spam") => {
                Err(StageError::Permanent("content refused".to_string()))
            }
            _ => Ok(Flow::Continue),
        }
    }
}

/// Save chain `recorder|fixed`, validate chain `validate_process`
pub fn backend_config(validate_process: &str, validate_at: &str) -> BackendConfig {
    BackendConfig::new([
        ("save_process", serde_json::json!("recorder|fixed")),
        ("validate_process", serde_json::json!(validate_process)),
        ("validate_at", serde_json::json!(validate_at)),
    ])
}

/// A context for [`SERVER_ID`] accepting mail for `testserver.com`, and the
/// journal of the envelopes it saved
pub fn context(config: &BackendConfig) -> (Context, Journal) {
    let journal = Journal::default();
    let mut registry = ProcessorRegistry::with_builtins();
    registry.register_instance("fixed", std::sync::Arc::new(Fixed));
    registry.register_instance("recorder", std::sync::Arc::new(Recorder(journal.clone())));
    registry.register_instance("gatekeeper", std::sync::Arc::new(Gatekeeper));

    let ctx = Context {
        server_id: SERVER_ID.to_string(),
        allowed_hosts: std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(AllowedHosts::new([
            "testserver.com",
        ]))),
        backend: std::sync::Arc::new(
            Backend::new(std::sync::Arc::new(registry), config).expect("valid backend config"),
        ),
        tls: std::sync::Arc::new(TlsManager::new()),
    };
    (ctx, journal)
}

/// A session on `config` over an in-memory stream, the client side is returned
pub fn spawn_session(
    ctx: Context,
    config: ServerConfig,
) -> (
    tokio::io::DuplexStream,
    tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    let (client, server) = tokio::io::duplex(1024 * 1024);
    let conn = Connection::new(
        CLIENT_ADDR.parse().unwrap(),
        std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(config)),
        Box::new(server),
    );
    let session = tokio::spawn(async move { handle_connection(conn, &ctx).await });
    (client, session)
}

/// Send `input` at once and compare everything the server wrote with `expected`
pub async fn test_receiver_inner(ctx: Context, config: ServerConfig, input: &[u8], expected: &str) {
    let (client, session) = spawn_session(ctx, config);
    let (mut read, mut write) = tokio::io::split(client);

    let input = input.to_vec();
    let writer = async move {
        // the server may close before reading everything
        let _ = tokio::io::AsyncWriteExt::write_all(&mut write, &input).await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut write).await;
    };
    let reader = async move {
        let mut output = vec![];
        tokio::io::AsyncReadExt::read_to_end(&mut read, &mut output)
            .await
            .unwrap();
        output
    };
    let ((), output) = tokio::join!(writer, reader);

    session.await.unwrap().unwrap();
    pretty_assertions::assert_eq!(expected, std::str::from_utf8(&output).unwrap());
}

/// Run a scripted session and compare the whole transcript
macro_rules! test_receiver {
    ($input:expr, $output:expr) => {
        test_receiver! {
            with_config => maild_test::config::local_server($crate::receiver::test_helpers::SERVER_ID),
            $input,
            $output
        }
    };
    (with_config => $config:expr, $input:expr, $output:expr) => {
        test_receiver! {
            with_context => $crate::receiver::test_helpers::context(
                &$crate::receiver::test_helpers::backend_config("", "rcpt")
            ).0,
            with_config => $config,
            $input,
            $output
        }
    };
    (with_context => $ctx:expr, $input:expr, $output:expr) => {
        test_receiver! {
            with_context => $ctx,
            with_config => maild_test::config::local_server($crate::receiver::test_helpers::SERVER_ID),
            $input,
            $output
        }
    };
    (with_context => $ctx:expr, with_config => $config:expr, $input:expr, $output:expr) => {
        $crate::receiver::test_helpers::test_receiver_inner(
            $ctx,
            $config,
            $input.as_bytes(),
            &$output,
        )
        .await
    };
}

pub(crate) use test_receiver;

/// Opening banner of `testserver.com`
pub const GREETINGS: &str = "220-testserver.com ESMTP maild\r\n220 testserver.com Service ready\r\n";
