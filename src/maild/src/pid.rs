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
use crate::{log_channels, DaemonError};
use maild_common::bus::EventBus;
use maild_config::{Event, EventKind};

/// Write the id of the process to `path`, an empty path means no pid file
pub fn write(path: &std::path::Path) -> Result<(), DaemonError> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::write(path, format!("{}\n", std::process::id())).map_err(|source| {
        DaemonError::PidFile {
            path: path.to_path_buf(),
            source,
        }
    })?;
    tracing::debug!(target: log_channels::DAEMON, "pid written to '{}'", path.display());
    Ok(())
}

pub fn remove(path: &std::path::Path) {
    if path.as_os_str().is_empty() {
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            target: log_channels::DAEMON,
            "cannot remove pid file '{}': {e}",
            path.display()
        );
    }
}

/// The new pid file is written before the previous one is removed
pub fn subscribe(bus: &EventBus<Event>) {
    bus.subscribe(EventKind::PidFileChanged, |event| {
        match write(&event.new.pid_file) {
            Ok(()) => remove(&event.old.pid_file),
            Err(e) => tracing::error!(target: log_channels::DAEMON, "{e}"),
        }
    });
}
