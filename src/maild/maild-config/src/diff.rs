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
use crate::{AppConfig, Event, EventKind, ServerConfig};

/// Compare two configurations and produce the events turning `old` into `new`.
///
/// Events are ordered: backend, allowed hosts, log level, log file, pid file,
/// then servers. Servers are matched by listen address; removals come first
/// (in `old` order), then additions and in place changes (in `new` order).
#[must_use]
pub fn diff(old: &std::sync::Arc<AppConfig>, new: &std::sync::Arc<AppConfig>) -> Vec<Event> {
    let event = |kind: EventKind, server: Option<&ServerConfig>| Event {
        kind,
        old: old.clone(),
        new: new.clone(),
        server: server.cloned(),
    };
    let mut events = vec![];

    if old.backend_config != new.backend_config {
        events.push(event(EventKind::BackendConfigChanged, None));
    }
    if old.allowed_hosts != new.allowed_hosts {
        events.push(event(EventKind::AllowedHostsChanged, None));
    }
    if old.log_level != new.log_level {
        events.push(event(EventKind::LogLevelChanged, None));
    }
    if old.log_file != new.log_file {
        events.push(event(EventKind::LogFileChanged, None));
    }
    if old.pid_file != new.pid_file {
        events.push(event(EventKind::PidFileChanged, None));
    }

    for removed in old
        .servers
        .iter()
        .filter(|s| new.server(&s.listen_interface).is_none())
    {
        events.push(event(EventKind::ServerRemoved, Some(removed)));
    }

    for server in &new.servers {
        match old.server(&server.listen_interface) {
            None if server.is_enabled => {
                events.push(event(EventKind::ServerAdded, Some(server)));
                events.push(event(EventKind::ServerStarted, Some(server)));
            }
            None => {}
            Some(previous) => match (previous.is_enabled, server.is_enabled) {
                (false, true) => events.push(event(EventKind::ServerStarted, Some(server))),
                (true, false) => events.push(event(EventKind::ServerStopped, Some(server))),
                (true, true) => {
                    if previous.tls != server.tls {
                        events.push(event(EventKind::ServerTlsChanged, Some(server)));
                    }
                    if previous.timeout != server.timeout {
                        events.push(event(EventKind::ServerTimeoutChanged, Some(server)));
                    }
                }
                (false, false) => {}
            },
        }
    }

    events
}
