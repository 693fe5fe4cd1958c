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
use crate::config::{AppConfig, BackendConfig, ServerConfig, TlsConfig};

pub fn log_level() -> tracing::level_filters::LevelFilter {
    tracing::level_filters::LevelFilter::INFO
}

pub fn log_file() -> String {
    "stderr".to_string()
}

pub fn pid_file() -> std::path::PathBuf {
    "/var/run/maild.pid".into()
}

pub const fn is_enabled() -> bool {
    true
}

pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

pub const fn max_size() -> usize {
    10 * 1024 * 1024
}

pub const fn max_clients() -> usize {
    100
}

pub const fn timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

pub fn listen_interface() -> String {
    "127.0.0.1:2525".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            is_enabled: is_enabled(),
            host_name: host_name(),
            max_size: max_size(),
            max_clients: max_clients(),
            timeout: timeout(),
            listen_interface: listen_interface(),
            tls: TlsConfig::default(),
            log_file: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerConfig::default()],
            allowed_hosts: crate::AllowedHosts::default(),
            backend_config: BackendConfig::default(),
            log_level: log_level(),
            log_file: log_file(),
            pid_file: pid_file(),
        }
    }
}
