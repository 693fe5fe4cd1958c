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
use maild_config::{AllowedHosts, AppConfig, EventKind};
use maild_test::{client, config};

fn write_config(path: &std::path::Path, config: &AppConfig) {
    std::fs::write(path, serde_json::to_string_pretty(config).unwrap()).unwrap();
}

#[tokio::test]
async fn reload_from_file_adds_a_server() {
    let dir = maild_test::scratch_dir("reload-file");
    let path = dir.join("maild.json");

    let mut config = config::local_test();
    write_config(&path, &config);

    let mut daemon = Daemon::from_path(&path).unwrap();
    daemon.start().unwrap();
    let first = config.servers[0].listen_interface.clone();
    greeted(&first, "testserver.com").await;

    let mut second = config::local_server(&maild_test::free_addr());
    second.host_name = "second.testserver.com".to_string();
    config.servers.push(second.clone());
    write_config(&path, &config);

    assert_eq!(
        daemon.reload().await.unwrap(),
        vec![EventKind::ServerAdded, EventKind::ServerStarted]
    );
    greeted(&second.listen_interface, "second.testserver.com").await;
    greeted(&first, "testserver.com").await;

    // an unreadable file is rejected, the daemon keeps running as before
    std::fs::write(&path, "{ \"servers\": ").unwrap();
    let error = daemon.reload().await.unwrap_err();
    assert!(matches!(error, DaemonError::Config(_)), "{error}");
    assert_eq!(daemon.config().servers.len(), 2);
    assert_eq!(daemon.running_servers().len(), 2);

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn enable_and_disable() {
    let first = config::local_server(&maild_test::free_addr());
    let mut second = config::local_server(&maild_test::free_addr());
    second.host_name = "second.testserver.com".to_string();
    second.is_enabled = false;
    let (first_id, second_id) = (first.listen_interface.clone(), second.listen_interface.clone());

    let config = config::local_test_with(vec![first, second]);
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();
    assert_eq!(daemon.running_servers(), vec![first_id.clone()]);
    assert!(client::connect(&second_id).await.is_err());

    let mut enabled = config;
    enabled.servers[1].is_enabled = true;
    assert_eq!(
        daemon.reload_with(enabled.clone()).await.unwrap(),
        vec![EventKind::ServerStarted]
    );
    greeted(&second_id, "second.testserver.com").await;

    let mut disabled = enabled;
    disabled.servers[0].is_enabled = false;
    assert_eq!(
        daemon.reload_with(disabled).await.unwrap(),
        vec![EventKind::ServerStopped]
    );
    assert!(client::connect(&first_id).await.is_err());
    assert_eq!(daemon.running_servers(), vec![second_id]);

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn removed_server_is_closed() {
    let first = config::local_server(&maild_test::free_addr());
    let second = config::local_server(&maild_test::free_addr());
    let second_id = second.listen_interface.clone();

    let config = config::local_test_with(vec![first.clone(), second]);
    let (mut daemon, _) = daemon(config);
    daemon.start().unwrap();
    let mut open = greeted(&second_id, "testserver.com").await;

    assert_eq!(
        daemon
            .reload_with(config::local_test_with(vec![first]))
            .await
            .unwrap(),
        vec![EventKind::ServerRemoved]
    );
    assert!(client::connect(&second_id).await.is_err());
    assert_eq!(daemon.local_addr(&second_id), None);

    // the session accepted before the removal runs to completion
    assert_eq!(open.command("NOOP").await.unwrap(), "250 2.0.0 OK\r\n");

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn allowed_hosts_apply_to_open_connections() {
    let config = config::local_test();
    let id = config.servers[0].listen_interface.clone();
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();

    let mut client = greeted(&id, "testserver.com").await;
    client.command("HELO client.com").await.unwrap();
    client.command("MAIL FROM:<john@doe.com>").await.unwrap();
    assert_eq!(
        client.command("RCPT TO:<aa@other.com>").await.unwrap(),
        "454 4.1.1 Error: Relay access denied: other.com\r\n"
    );

    let widened = AppConfig {
        allowed_hosts: AllowedHosts::new(["testserver.com", "Other.com"]),
        ..config
    };
    assert_eq!(
        daemon.reload_with(widened).await.unwrap(),
        vec![EventKind::AllowedHostsChanged]
    );
    assert_eq!(
        client.command("RCPT TO:<aa@other.com>").await.unwrap(),
        "250 2.1.5 OK\r\n"
    );

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn timeout_reaches_idle_connections() {
    let config = config::local_test();
    let id = config.servers[0].listen_interface.clone();
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();

    let mut client = greeted(&id, "testserver.com").await;
    client.command("HELO client.com").await.unwrap();

    let mut shorter = config;
    shorter.servers[0].timeout = std::time::Duration::from_millis(200);
    assert_eq!(
        daemon.reload_with(shorter).await.unwrap(),
        vec![EventKind::ServerTimeoutChanged]
    );

    // the new value is read before the next wait
    assert_eq!(client.command("NOOP").await.unwrap(), "250 2.0.0 OK\r\n");
    assert_eq!(
        client.reply().await.unwrap(),
        "421 4.4.2 testserver.com Error: timeout exceeded\r\n"
    );
    assert!(client.is_closed_within(std::time::Duration::from_secs(2)).await);

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn new_backend_serves_the_next_messages() {
    let config = config::local_test();
    let id = config.servers[0].listen_interface.clone();
    let (mut daemon, journal) = daemon(config.clone());
    daemon.start().unwrap();

    assert_eq!(
        daemon.reload_with(recording(config)).await.unwrap(),
        vec![EventKind::BackendConfigChanged]
    );

    let mut client = greeted(&id, "testserver.com").await;
    for command in [
        "HELO client.com",
        "MAIL FROM:<>",
        "RCPT TO:<aa@testserver.com>",
        "DATA",
    ] {
        client.command(command).await.unwrap();
    }
    for line in ["Subject: after reload", "", "body"] {
        client.send(line).await.unwrap();
    }
    assert!(client
        .command(".")
        .await
        .unwrap()
        .starts_with("250 2.0.0 OK: queued as "));

    assert_eq!(
        journal.lock().unwrap()[0].subject.as_deref(),
        Some("after reload")
    );

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn unknown_processor_rejects_the_reload() {
    let config = config::local_test();
    let id = config.servers[0].listen_interface.clone();
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();

    let mut broken = config.clone();
    broken.backend_config.insert(
        "save_process",
        serde_json::Value::String("Recorder|Nope".to_string()),
    );
    broken.allowed_hosts = AllowedHosts::new(["other.com"]);

    let error = daemon.reload_with(broken).await.unwrap_err();
    assert_eq!(error.exit_code(), 4);
    pretty_assertions::assert_eq!(*daemon.config(), config);

    let mut client = greeted(&id, "testserver.com").await;
    client.command("HELO client.com").await.unwrap();
    client.command("MAIL FROM:<john@doe.com>").await.unwrap();
    assert_eq!(
        client.command("RCPT TO:<aa@testserver.com>").await.unwrap(),
        "250 2.1.5 OK\r\n"
    );

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn reloads_are_serialized() {
    let config = config::local_test();
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();

    let first = AppConfig {
        allowed_hosts: AllowedHosts::new(["first.com"]),
        ..config.clone()
    };
    let second = AppConfig {
        allowed_hosts: AllowedHosts::new(["second.com"]),
        ..config
    };
    let (a, b) = tokio::join!(daemon.reload_with(first), daemon.reload_with(second));
    assert_eq!(a.unwrap(), vec![EventKind::AllowedHostsChanged]);
    assert_eq!(b.unwrap(), vec![EventKind::AllowedHostsChanged]);
    assert_eq!(
        daemon.config().allowed_hosts,
        AllowedHosts::new(["second.com"])
    );

    daemon.shutdown(GRACE).await;
}
