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
use crate::log_channels;
use maild_config::TlsConfig;

/// Reasons a certificate/key pair is refused
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// a file cannot be read
    #[error("cannot read '{path}': {source}")]
    Io {
        ///
        path: std::path::PathBuf,
        ///
        source: std::io::Error,
    },
    /// the certificate file holds no PEM certificate
    #[error("no certificate found in '{0}'")]
    NoCertificate(std::path::PathBuf),
    /// the key file holds no PEM private key
    #[error("no private key found in '{0}'")]
    NoPrivateKey(std::path::PathBuf),
    /// the key is of a type rustls cannot sign with
    #[error("unsupported private key in '{0}'")]
    UnsupportedKey(std::path::PathBuf),
    /// a handshake with the pair failed
    #[error("'{certificate}' and '{private_key}' do not make a usable pair: {reason}")]
    KeyMismatch {
        ///
        certificate: std::path::PathBuf,
        ///
        private_key: std::path::PathBuf,
        /// error reported by the handshake
        reason: String,
    },
    /// the server configuration cannot be built
    #[error("cannot initialize the tls config: {0}")]
    Rustls(String),
}

fn open(path: &std::path::Path) -> Result<std::io::BufReader<std::fs::File>, TlsError> {
    std::fs::File::open(path)
        .map(std::io::BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn get_cert_from_file(path: &std::path::Path) -> Result<Vec<rustls::Certificate>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

fn get_signing_key_from_file(
    path: &std::path::Path,
) -> Result<std::sync::Arc<dyn rustls::sign::SigningKey>, TlsError> {
    let mut reader = open(path)?;
    loop {
        let item = rustls_pemfile::read_one(&mut reader).map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match item {
            Some(
                rustls_pemfile::Item::PKCS8Key(der)
                | rustls_pemfile::Item::RSAKey(der)
                | rustls_pemfile::Item::ECKey(der),
            ) => {
                return rustls::sign::any_supported_type(&rustls::PrivateKey(der))
                    .map_err(|_| TlsError::UnsupportedKey(path.to_path_buf()));
            }
            // certificates bundled with the key are skipped
            Some(_) => continue,
            None => return Err(TlsError::NoPrivateKey(path.to_path_buf())),
        }
    }
}

/// Resolver handing out the pair currently in force for a listener
struct CertResolver(arc_swap::ArcSwap<rustls::sign::CertifiedKey>);

impl rustls::server::ResolvesServerCert for CertResolver {
    fn resolve(
        &self,
        _: rustls::server::ClientHello<'_>,
    ) -> Option<std::sync::Arc<rustls::sign::CertifiedKey>> {
        Some(self.0.load_full())
    }
}

fn get_rustls_config(
    resolver: std::sync::Arc<CertResolver>,
) -> Result<rustls::ServerConfig, TlsError> {
    Ok(rustls::ServerConfig::builder()
        .with_cipher_suites(rustls::ALL_CIPHER_SUITES)
        .with_kx_groups(&rustls::ALL_KX_GROUPS)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|e| TlsError::Rustls(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(resolver))
}

/// Accepts the certificate as is, the handshake signature is still verified
/// against it
struct TrustPresented;

impl rustls::client::ServerCertVerifier for TrustPresented {
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

fn flight(from: &mut rustls::Connection, to: &mut rustls::Connection) -> Result<(), String> {
    let mut buffer = vec![];
    while from.wants_write() {
        from.write_tls(&mut buffer).map_err(|e| e.to_string())?;
    }
    let mut pending = buffer.as_slice();
    while !pending.is_empty() {
        if to.read_tls(&mut pending).map_err(|e| e.to_string())? == 0 {
            break;
        }
        to.process_new_packets().map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Run a handshake in memory against a server presenting `key`
fn handshake(key: std::sync::Arc<rustls::sign::CertifiedKey>) -> Result<(), String> {
    let server_config = get_rustls_config(std::sync::Arc::new(CertResolver(
        arc_swap::ArcSwap::new(key),
    )))
    .map_err(|e| e.to_string())?;
    let client_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(std::sync::Arc::new(TrustPresented))
        .with_no_client_auth();

    let server_name = rustls::ServerName::try_from("localhost").map_err(|e| e.to_string())?;
    let mut client: rustls::Connection =
        rustls::ClientConnection::new(std::sync::Arc::new(client_config), server_name)
            .map_err(|e| e.to_string())?
            .into();
    let mut server: rustls::Connection =
        rustls::ServerConnection::new(std::sync::Arc::new(server_config))
            .map_err(|e| e.to_string())?
            .into();

    for _ in 0..8 {
        if !client.is_handshaking() && !server.is_handshaking() {
            return Ok(());
        }
        flight(&mut client, &mut server)?;
        flight(&mut server, &mut client)?;
    }
    Err("the handshake did not complete".to_string())
}

struct Entry {
    resolver: std::sync::Arc<CertResolver>,
    acceptor: tokio_rustls::TlsAcceptor,
}

/// Certificates of the listeners.
///
/// Each listener gets its own `rustls::ServerConfig` on first activation.
/// Later activations only swap the pair behind its resolver, handshakes in
/// progress keep the pair they started with.
#[derive(Default)]
pub struct TlsManager {
    listeners: std::sync::Mutex<std::collections::HashMap<String, Entry>>,
}

impl std::fmt::Debug for TlsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.lock().keys()).finish()
    }
}

impl TlsManager {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, std::collections::HashMap<String, Entry>> {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Load the pair of `config` and prove the key matches the certificate
    ///
    /// # Errors
    ///
    /// * a file cannot be read or holds no PEM item of the expected kind
    /// * the key is not supported
    /// * a handshake with the pair fails
    pub fn validate(
        config: &TlsConfig,
    ) -> Result<std::sync::Arc<rustls::sign::CertifiedKey>, TlsError> {
        let key = std::sync::Arc::new(rustls::sign::CertifiedKey::new(
            get_cert_from_file(&config.public_key_file)?,
            get_signing_key_from_file(&config.private_key_file)?,
        ));

        handshake(key.clone()).map_err(|reason| TlsError::KeyMismatch {
            certificate: config.public_key_file.clone(),
            private_key: config.private_key_file.clone(),
            reason,
        })?;
        Ok(key)
    }

    /// Put the pair of `config` in force for `server_id`, the previous pair
    /// stays in force on error
    ///
    /// # Errors
    ///
    /// * see [`TlsManager::validate`]
    pub fn activate(&self, server_id: &str, config: &TlsConfig) -> Result<(), TlsError> {
        let key = Self::validate(config)?;

        let mut listeners = self.lock();
        if let Some(entry) = listeners.get(server_id) {
            entry.resolver.0.store(key);
        } else {
            let resolver = std::sync::Arc::new(CertResolver(arc_swap::ArcSwap::new(key)));
            let rustls_config = get_rustls_config(resolver.clone())?;
            listeners.insert(
                server_id.to_string(),
                Entry {
                    resolver,
                    acceptor: tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(rustls_config)),
                },
            );
        }

        tracing::debug!(
            target: log_channels::TLS,
            "[{server_id}] certificate '{}' in force",
            config.public_key_file.display()
        );
        Ok(())
    }

    /// Acceptor of `server_id`, `None` if no pair was ever activated
    #[must_use]
    pub fn acceptor(&self, server_id: &str) -> Option<tokio_rustls::TlsAcceptor> {
        self.lock().get(server_id).map(|entry| entry.acceptor.clone())
    }

    /// DER of the leaf certificate in force for `server_id`
    #[must_use]
    pub fn certificate(&self, server_id: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(server_id)
            .and_then(|entry| entry.resolver.0.load().cert.first().map(|c| c.0.clone()))
    }

    /// Forget `server_id`
    pub fn remove(&self, server_id: &str) -> bool {
        self.lock().remove(server_id).is_some()
    }
}
