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
use crate::{AppConfig, ServerConfig};

/// What changed between two configurations
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// the backend mapping differs
    BackendConfigChanged,
    /// the set of allowed hosts differs
    AllowedHostsChanged,
    ///
    LogLevelChanged,
    ///
    LogFileChanged,
    ///
    PidFileChanged,
    /// a listen address appeared
    ServerAdded,
    /// a listen address disappeared
    ServerRemoved,
    /// a listener must accept connections
    ServerStarted,
    /// a listener must stop accepting connections
    ServerStopped,
    /// the certificate, key or TLS flags of a listener differ
    ServerTlsChanged,
    /// the idle timeout of a listener differs
    ServerTimeoutChanged,
}

/// Notification published on the bus after a reload
#[derive(Debug, Clone)]
pub struct Event {
    ///
    pub kind: EventKind,
    /// configuration active before the reload
    pub old: std::sync::Arc<AppConfig>,
    /// configuration active after the reload
    pub new: std::sync::Arc<AppConfig>,
    /// server concerned by a `Server*` kind, from `old` for
    /// [`EventKind::ServerRemoved`] and from `new` otherwise
    pub server: Option<ServerConfig>,
}

impl Event {
    /// listen address of the server concerned, if any
    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        self.server.as_ref().map(|s| s.listen_interface.as_str())
    }
}

impl maild_common::bus::BusEvent for Event {
    type Kind = EventKind;

    fn kind(&self) -> Self::Kind {
        self.kind
    }
}
