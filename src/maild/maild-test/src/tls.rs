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

struct AcceptAnyCertificate;

impl rustls::client::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _: &rustls::Certificate,
        _: &[rustls::Certificate],
        _: &rustls::ServerName,
        _: &mut dyn Iterator<Item = &[u8]>,
        _: &[u8],
        _: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// Client configuration trusting any certificate, signatures are still checked
#[must_use]
pub fn client_config() -> std::sync::Arc<rustls::ClientConfig> {
    std::sync::Arc::new(
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAnyCertificate))
            .with_no_client_auth(),
    )
}

/// ready to upgrade a stream after `220 2.0.0 Ready to start TLS`
#[must_use]
pub fn connector() -> tokio_rustls::TlsConnector {
    tokio_rustls::TlsConnector::from(client_config())
}

/// name sent in the client hello
#[must_use]
pub fn server_name() -> rustls::ServerName {
    rustls::ServerName::try_from("testserver.com").expect("valid dns name")
}

/// Certificate presented by the server of an established session
#[must_use]
pub fn peer_certificate<S>(stream: &tokio_rustls::client::TlsStream<S>) -> Option<Vec<u8>> {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(<[rustls::Certificate]>::first)
        .map(|cert| cert.0.clone())
}

/// DER of the first certificate of a PEM file
#[must_use]
pub fn certificate_der(path: &std::path::Path) -> Vec<u8> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(path).expect("the certificate file exists"),
    );
    rustls_pemfile::certs(&mut reader)
        .expect("the certificate file is PEM")
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no certificate in {}", path.display()))
}
