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
use super::common::{daemon, greeted, GRACE};
use maild::DaemonError;
use maild_config::EventKind;
use maild_test::{certs, config, tls};

/// Certificate presented after STARTTLS on `addr`
async fn start_tls_certificate(addr: &str) -> Vec<u8> {
    let mut client = greeted(addr, "testserver.com").await;
    assert!(client
        .command("EHLO client.com")
        .await
        .unwrap()
        .contains("250-STARTTLS\r\n"));
    assert_eq!(
        client.command("STARTTLS").await.unwrap(),
        "220 2.0.0 Ready to start TLS\r\n"
    );
    let secured = tls::connector()
        .connect(tls::server_name(), client.into_inner())
        .await
        .unwrap();
    tls::peer_certificate(&secured).unwrap()
}

#[tokio::test]
async fn regenerated_pair_is_picked_up() {
    let dir = maild_test::scratch_dir("tls-regenerated");
    let (certificate, private_key) =
        certs::copy_pair(&dir, &certs::certificate(), &certs::private_key());

    let mut server = config::with_start_tls(config::local_server(&maild_test::free_addr()));
    server.tls.public_key_file = certificate;
    server.tls.private_key_file = private_key;
    let id = server.listen_interface.clone();

    let config = config::local_test_with(vec![server]);
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();
    assert_eq!(
        start_tls_certificate(&id).await,
        tls::certificate_der(&certs::certificate())
    );

    // same paths, new content
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    certs::copy_pair(&dir, &certs::other_certificate(), &certs::other_private_key());
    let reloaded = config.finalize().unwrap();

    assert_eq!(
        daemon.reload_with(reloaded).await.unwrap(),
        vec![EventKind::ServerTlsChanged]
    );
    assert_eq!(
        start_tls_certificate(&id).await,
        tls::certificate_der(&certs::other_certificate())
    );

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn invalid_pair_rejects_the_reload() {
    let dir = maild_test::scratch_dir("tls-invalid");
    let (certificate, private_key) =
        certs::copy_pair(&dir, &certs::certificate(), &certs::private_key());

    let mut server = config::with_start_tls(config::local_server(&maild_test::free_addr()));
    server.tls.public_key_file = certificate;
    server.tls.private_key_file = private_key.clone();
    let id = server.listen_interface.clone();

    let config = config::local_test_with(vec![server]);
    let (mut daemon, _) = daemon(config.clone());
    daemon.start().unwrap();

    // the key no longer matches the certificate
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    std::fs::copy(certs::other_private_key(), &private_key).unwrap();
    let reloaded = config.clone().finalize().unwrap();

    let error = daemon.reload_with(reloaded).await.unwrap_err();
    assert!(matches!(error, DaemonError::Tls { .. }), "{error}");
    assert_eq!(error.exit_code(), 3);
    pretty_assertions::assert_eq!(*daemon.config(), config);

    assert_eq!(
        start_tls_certificate(&id).await,
        tls::certificate_der(&certs::certificate())
    );

    daemon.shutdown(GRACE).await;
}

#[tokio::test]
async fn start_tls_offered_after_reload() {
    let plain = config::local_server(&maild_test::free_addr());
    let id = plain.listen_interface.clone();
    let config = config::local_test_with(vec![plain.clone()]);

    let (mut daemon, _) = daemon(config);
    daemon.start().unwrap();

    let mut client = greeted(&id, "testserver.com").await;
    assert!(!client
        .command("EHLO client.com")
        .await
        .unwrap()
        .contains("STARTTLS"));
    assert_eq!(
        client.command("STARTTLS").await.unwrap(),
        "454 4.7.0 TLS not available\r\n"
    );

    let secured = config::local_test_with(vec![config::with_start_tls(plain)]);
    assert_eq!(
        daemon.reload_with(secured).await.unwrap(),
        vec![EventKind::ServerTlsChanged]
    );
    assert_eq!(
        start_tls_certificate(&id).await,
        tls::certificate_der(&certs::certificate())
    );

    daemon.shutdown(GRACE).await;
}
