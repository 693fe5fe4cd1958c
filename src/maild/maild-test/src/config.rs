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
use maild_config::{AllowedHosts, AppConfig, ServerConfig, TlsConfig};

/// A plain listener on `listen_interface` named `testserver.com`
#[must_use]
pub fn local_server(listen_interface: &str) -> ServerConfig {
    ServerConfig {
        host_name: "testserver.com".to_string(),
        listen_interface: listen_interface.to_string(),
        timeout: std::time::Duration::from_secs(5),
        ..ServerConfig::default()
    }
}

/// `server` offering STARTTLS with the shipped certificate
#[must_use]
pub fn with_start_tls(server: ServerConfig) -> ServerConfig {
    ServerConfig {
        tls: TlsConfig {
            private_key_file: crate::certs::private_key(),
            public_key_file: crate::certs::certificate(),
            start_tls_on: true,
            ..TlsConfig::default()
        },
        ..server
    }
}

/// One plain listener accepting mail for `testserver.com`, logs to stderr
/// and no pid file
#[must_use]
pub fn local_test() -> AppConfig {
    local_test_with(vec![local_server(&crate::free_addr())])
}

/// [`local_test`] with the given listeners, the config is finalized
#[must_use]
pub fn local_test_with(servers: Vec<ServerConfig>) -> AppConfig {
    AppConfig {
        servers,
        allowed_hosts: AllowedHosts::new(["testserver.com"]),
        pid_file: std::path::PathBuf::new(),
        ..AppConfig::default()
    }
    .finalize()
    .expect("the test configuration is valid")
}
