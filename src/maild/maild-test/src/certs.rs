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

fn path(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("src/template/certs")
        .join(name)
}

/// certificate for `testserver.com` and `localhost`
#[must_use]
pub fn certificate() -> std::path::PathBuf {
    path("certificate.crt")
}

/// key of [`certificate`]
#[must_use]
pub fn private_key() -> std::path::PathBuf {
    path("private_key.key")
}

/// another certificate, for `other.testserver.com`
#[must_use]
pub fn other_certificate() -> std::path::PathBuf {
    path("other_certificate.crt")
}

/// key of [`other_certificate`]
#[must_use]
pub fn other_private_key() -> std::path::PathBuf {
    path("other_private_key.key")
}

/// Copy a certificate/key pair into `dir`, returns the new paths
#[must_use]
pub fn copy_pair(
    dir: &std::path::Path,
    certificate: &std::path::Path,
    private_key: &std::path::Path,
) -> (std::path::PathBuf, std::path::PathBuf) {
    let (cert_to, key_to) = (dir.join("server.crt"), dir.join("server.key"));
    std::fs::copy(certificate, &cert_to).expect("cannot copy the certificate");
    std::fs::copy(private_key, &key_to).expect("cannot copy the private key");
    (cert_to, key_to)
}
