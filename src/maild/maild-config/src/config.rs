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
use crate::{default, log_channel};

/// Errors produced while loading a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// the source cannot be read
    #[error("cannot read '{path}': {source}")]
    Io {
        /// path of the source
        path: std::path::PathBuf,
        /// underlying error
        source: std::io::Error,
    },
    /// ill-formed toml document
    #[error("ill-formed toml configuration: {0}")]
    Toml(#[from] toml::de::Error),
    /// ill-formed json document
    #[error("ill-formed json configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// well-formed but semantically wrong
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Recipient domains accepted by the daemon, stored lower-cased.
///
/// The entry `.` accepts any domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AllowedHosts(std::collections::BTreeSet<String>);

impl AllowedHosts {
    /// Build the set, lower-casing every entry
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        )
    }

    /// Is mail for `domain` accepted
    #[must_use]
    pub fn allows(&self, domain: &str) -> bool {
        self.0.contains(".")
            || self
                .0
                .contains(domain.trim_end_matches('.').to_ascii_lowercase().as_str())
    }

    /// entries in lexicographic order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Opaque key/value mapping interpreted by the processing pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BackendConfig(std::collections::BTreeMap<String, serde_json::Value>);

impl BackendConfig {
    /// Build from key/value pairs
    pub fn new<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// raw value of `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// value of `key` if it is a string
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    /// value of `key` if it is a boolean
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Set `key`, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Interpret the mapping as `T`, keys unknown to `T` are ignored
    ///
    /// # Errors
    ///
    /// * a key known to `T` has a value of the wrong type
    pub fn to_typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ))
    }
}

/// Certificate and private key of a listener
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM private key
    #[serde(default)]
    pub private_key_file: std::path::PathBuf,
    /// PEM certificate chain
    #[serde(default)]
    pub public_key_file: std::path::PathBuf,
    /// offer STARTTLS on a plain connection
    #[serde(default)]
    pub start_tls_on: bool,
    /// handshake as soon as the connection is accepted
    #[serde(default)]
    pub tls_always_on: bool,
    /// modification time of `private_key_file` when the configuration was loaded
    #[serde(skip)]
    pub private_key_modified: Option<std::time::SystemTime>,
    /// modification time of `public_key_file` when the configuration was loaded
    #[serde(skip)]
    pub public_key_modified: Option<std::time::SystemTime>,
}

impl TlsConfig {
    /// Is a certificate needed by this listener
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.start_tls_on || self.tls_always_on
    }

    /// Record the current modification time of the key and certificate files
    pub fn stamp(&mut self) {
        let modified = |path: &std::path::Path| {
            std::fs::metadata(path)
                .and_then(|metadata| metadata.modified())
                .ok()
        };
        self.private_key_modified = modified(&self.private_key_file);
        self.public_key_modified = modified(&self.public_key_file);
    }
}

/// One listener
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// a disabled listener is kept in the configuration but not started
    #[serde(default = "default::is_enabled")]
    pub is_enabled: bool,
    /// name advertised in the banner and in HELO/EHLO replies
    #[serde(default = "default::host_name")]
    pub host_name: String,
    /// maximum size of a message in bytes
    #[serde(default = "default::max_size")]
    pub max_size: usize,
    /// connections above this count are turned away
    #[serde(default = "default::max_clients")]
    pub max_clients: usize,
    /// idle timeout of a connection
    #[serde(default = "default::timeout", with = "crate::parser::timeout")]
    pub timeout: std::time::Duration,
    /// `host:port`, identity of the listener
    #[serde(default = "default::listen_interface")]
    pub listen_interface: String,
    /// accepted but not used, sessions log through the daemon log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    ///
    #[serde(default)]
    pub tls: TlsConfig,
}

/// Root of the configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// listeners, in declaration order
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// recipient domains accepted
    #[serde(default)]
    pub allowed_hosts: AllowedHosts,
    /// interpreted by the processing pipeline
    #[serde(default)]
    pub backend_config: BackendConfig,
    ///
    #[serde(
        default = "default::log_level",
        serialize_with = "crate::parser::log_level::serialize",
        deserialize_with = "crate::parser::log_level::deserialize"
    )]
    pub log_level: tracing::level_filters::LevelFilter,
    /// `stderr`, `stdout`, `off` or a file path
    #[serde(default = "default::log_file")]
    pub log_file: String,
    ///
    #[serde(default = "default::pid_file")]
    pub pid_file: std::path::PathBuf,
}

impl AppConfig {
    /// Parse a toml document
    ///
    /// # Errors
    ///
    /// * the document is ill-formed
    /// * see [`AppConfig::validate`]
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        toml::from_str::<Self>(input)?.finalize()
    }

    /// Parse a json document
    ///
    /// # Errors
    ///
    /// * the document is ill-formed
    /// * see [`AppConfig::validate`]
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<Self>(input)?.finalize()
    }

    /// Read and parse a file, `.json` files are parsed as json, anything else as toml
    ///
    /// # Errors
    ///
    /// * the file cannot be read
    /// * see [`AppConfig::from_toml`] and [`AppConfig::from_json`]
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(target: log_channel::CONFIG, "loading configuration from {}", path.display());

        if path.extension().map_or(false, |ext| ext == "json") {
            Self::from_json(&input)
        } else {
            Self::from_toml(&input)
        }
    }

    /// Defaults which depend on other fields, and validation
    ///
    /// # Errors
    ///
    /// * see [`AppConfig::validate`]
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        if self.servers.is_empty() {
            self.servers.push(ServerConfig::default());
        }
        self.allowed_hosts = AllowedHosts::new(self.allowed_hosts.iter().collect::<Vec<_>>());
        for server in &mut self.servers {
            server.tls.stamp();
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the semantic of the configuration
    ///
    /// # Errors
    ///
    /// * two servers share a listen address
    /// * a server has an empty listen address or host name
    /// * a server has a null `max_size`, `max_clients` or `timeout`
    /// * a server needs TLS but misses the key or certificate path
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();

        for server in &self.servers {
            let addr = &server.listen_interface;
            if addr.trim().is_empty() {
                return Err(ConfigError::Invalid("a server has an empty listen_interface".into()));
            }
            if !seen.insert(addr.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "listen_interface [{addr}] is declared more than once"
                )));
            }
            if server.host_name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("server [{addr}] has an empty host_name")));
            }
            if server.max_size == 0 {
                return Err(ConfigError::Invalid(format!("server [{addr}] has a null max_size")));
            }
            if server.max_clients == 0 {
                return Err(ConfigError::Invalid(format!("server [{addr}] has a null max_clients")));
            }
            if server.timeout.is_zero() {
                return Err(ConfigError::Invalid(format!("server [{addr}] has a null timeout")));
            }
            if server.tls.is_enabled()
                && (server.tls.private_key_file.as_os_str().is_empty()
                    || server.tls.public_key_file.as_os_str().is_empty())
            {
                return Err(ConfigError::Invalid(format!(
                    "server [{addr}] uses TLS but private_key_file or public_key_file is missing"
                )));
            }
        }
        Ok(())
    }

    /// Server listening on `listen_interface`
    #[must_use]
    pub fn server(&self, listen_interface: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.listen_interface == listen_interface)
    }

    /// Servers to start, in declaration order
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.is_enabled)
    }
}
