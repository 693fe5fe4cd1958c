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
use super::common::{daemon, greeted, recording, GRACE};
use maild::{Daemon, DaemonError};
use maild_common::re::serde_json;
use maild_config::{AppConfig, TlsConfig};
use maild_test::{certs, client, config};

#[tokio::test]
async fn accepts_and_saves_a_message() {
    let config = recording(config::local_test());
    let id = config.servers[0].listen_interface.clone();
    let (mut daemon, journal) = daemon(config);
    daemon.start().unwrap();
    assert_eq!(daemon.running_servers(), vec![id.clone()]);

    let mut client = greeted(&id, "testserver.com").await;
    assert_eq!(
        client.command("HELO client.com").await.unwrap(),
        "250 testserver.com Hello\r\n"
    );
    assert_eq!(
        client.command("MAIL FROM:<john@doe.com>").await.unwrap(),
        "250 2.1.0 OK\r\n"
    );
    assert_eq!(
        client.command("RCPT TO:<aa@testserver.com>").await.unwrap(),
        "250 2.1.5 OK\r\n"
    );
    assert!(client
        .command("DATA")
        .await
        .unwrap()
        .starts_with("354 "));
    for line in ["Subject: hello", "", "..leading dot", "body"] {
        client.send(line).await.unwrap();
    }
    let queued = client.command(".").await.unwrap();
    assert!(
        queued.starts_with("250 2.0.0 OK: queued as "),
        "unexpected reply {queued:?}"
    );
    assert_eq!(
        client.command("QUIT").await.unwrap(),
        "221 2.0.0 Bye\r\n"
    );

    {
        let journal = journal.lock().unwrap();
        assert_eq!(journal.len(), 1);
        let envelope = &journal[0];
        assert_eq!(envelope.helo, "client.com");
        assert_eq!(envelope.server_name, "testserver.com");
        assert_eq!(envelope.reverse_path(), "<john@doe.com>");
        assert_eq!(
            envelope
                .rcpt
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["aa@testserver.com"]
        );
        assert_eq!(envelope.subject.as_deref(), Some("hello"));
        assert_eq!(envelope.data, b"Subject: hello\r\n\r\n.leading dot\r\nbody\r\n");
        assert!(queued.contains(&envelope.queued_id));
    }

    daemon.shutdown(GRACE).await;
    assert!(daemon.running_servers().is_empty());
    assert!(client::connect(&id).await.is_err());
}

#[tokio::test]
async fn relay_denied_keeps_the_conversation() {
    let config = config::local_test();
    let id = config.servers[0].listen_interface.clone();
    let (mut daemon, _) = daemon(config);
    daemon.start().unwrap();

    let mut client = greeted(&id, "testserver.com").await;
    client.command("HELO client.com").await.unwrap();
    client.command("MAIL FROM:<john@doe.com>").await.unwrap();
    assert_eq!(
        client.command("RCPT TO:<aa@other.com>").await.unwrap(),
        "454 4.1.1 Error: Relay access denied: other.com\r\n"
    );
    assert_eq!(
        client.command("RCPT TO:<aa@testserver.com>").await.unwrap(),
        "250 2.1.5 OK\r\n"
    );
    assert_eq!(client.command("NOOP").await.unwrap(), "250 2.0.0 OK\r\n");

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn unknown_processor() {
    let mut config = config::local_test();
    config.backend_config.insert(
        "save_process",
        serde_json::Value::String("HeadersParser|Nope".to_string()),
    );
    let id = config.servers[0].listen_interface.clone();

    let mut daemon = Daemon::new(config);
    let error = daemon.start().unwrap_err();
    assert!(matches!(error, DaemonError::Backend(_)), "{error}");
    assert_eq!(error.exit_code(), 4);
    assert!(client::connect(&id).await.is_err());
}

#[tokio::test]
async fn mismatching_certificate() {
    let mut server = config::with_start_tls(config::local_server(&maild_test::free_addr()));
    server.tls.private_key_file = certs::other_private_key();
    let id = server.listen_interface.clone();

    let error = Daemon::new(config::local_test_with(vec![server]))
        .start()
        .unwrap_err();
    assert!(matches!(error, DaemonError::Tls { ref server, .. } if *server == id), "{error}");
    assert_eq!(error.exit_code(), 3);
    assert!(client::connect(&id).await.is_err());
}

#[tokio::test]
async fn certificate_of_a_disabled_server_is_not_loaded() {
    let mut disabled = config::local_server(&maild_test::free_addr());
    disabled.is_enabled = false;
    disabled.tls = TlsConfig {
        private_key_file: "missing.key".into(),
        public_key_file: "missing.crt".into(),
        start_tls_on: true,
        ..TlsConfig::default()
    };
    let enabled = config::local_server(&maild_test::free_addr());
    let id = enabled.listen_interface.clone();

    let mut daemon = Daemon::new(config::local_test_with(vec![enabled, disabled]));
    daemon.start().unwrap();
    assert_eq!(daemon.running_servers(), vec![id]);
    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn bind_failure() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let free = config::local_server(&maild_test::free_addr());
    let busy = config::local_server(&taken.local_addr().unwrap().to_string());
    let free_id = free.listen_interface.clone();

    let error = Daemon::new(config::local_test_with(vec![free, busy]))
        .start()
        .unwrap_err();
    assert!(matches!(error, DaemonError::Server(_)), "{error}");
    assert_eq!(error.exit_code(), 1);

    // the listener started before the failure is stopped again
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(client::connect(&free_id).await.is_err());
}

#[test]
fn bad_configuration_file() {
    let dir = maild_test::scratch_dir("bad-config");
    let path = dir.join("maild.toml");
    std::fs::write(&path, "log_level = \"loud\"\n").unwrap();

    let error = Daemon::from_path(&path).unwrap_err();
    assert_eq!(error.exit_code(), 2);

    let error = Daemon::from_path(dir.join("missing.toml")).unwrap_err();
    assert!(matches!(error, DaemonError::Config(_)));
    assert_eq!(error.exit_code(), 2);
}

#[tokio::test]
async fn lifecycle_misuse() {
    let (mut daemon, _) = daemon(config::local_test());

    assert!(matches!(
        daemon.reload_with(config::local_test()).await,
        Err(DaemonError::NotStarted)
    ));
    daemon.check().unwrap();
    daemon.start().unwrap();

    assert!(matches!(daemon.start(), Err(DaemonError::AlreadyStarted)));
    assert!(matches!(
        daemon.register_processor("late", |_| Err(maild_backend::BackendError::Closed)),
        Err(DaemonError::AlreadyStarted)
    ));
    assert!(matches!(daemon.reload().await, Err(DaemonError::NoSource)));

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn pid_file() {
    let dir = maild_test::scratch_dir("pid-file");
    let config = AppConfig {
        pid_file: dir.join("maild.pid"),
        ..config::local_test()
    };
    let mut daemon = Daemon::new(config.clone());
    daemon.start().unwrap();
    assert_eq!(
        std::fs::read_to_string(&config.pid_file).unwrap(),
        format!("{}\n", std::process::id())
    );

    daemon.shutdown(GRACE).await;
    assert!(!config.pid_file.exists());
}
