//! Fixtures shared by the tests of the maild workspace

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//
#![allow(clippy::missing_panics_doc)]

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

/// Paths of the certificates shipped with this crate
pub mod certs;
/// Configurations ready to be started on the loopback
pub mod config;
/// A TLS client accepting any certificate, for the STARTTLS tests
pub mod tls;
/// A line based SMTP client over any stream
pub mod client;

/// A loopback address with a port free at the time of the call
#[must_use]
pub fn free_addr() -> String {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("cannot reserve a port on the loopback")
        .to_string()
}

/// An empty directory under the system temporary directory
#[must_use]
pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "maild-{name}-{}-{:x}",
        std::process::id(),
        fastrand::u64(..)
    ));
    std::fs::create_dir_all(&dir).expect("cannot create the scratch directory");
    dir
}
