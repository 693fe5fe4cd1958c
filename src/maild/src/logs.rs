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
use maild_config::{AppConfig, Event, EventKind};
use tracing_subscriber::{layer::SubscriberExt, reload, Registry};

enum Sink {
    Stderr,
    Stdout,
    Off,
    File(tracing_appender::rolling::RollingFileAppender),
}

impl Sink {
    fn open(log_file: &str) -> Result<Self, DaemonError> {
        Ok(match log_file {
            "stderr" => Self::Stderr,
            "stdout" => Self::Stdout,
            "off" => Self::Off,
            path => {
                let path = std::path::Path::new(path);
                let error = |source| DaemonError::LogFile {
                    path: path.to_path_buf(),
                    source,
                };
                // the appender panics on a file it cannot create
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(error)?;

                let file_name = path.file_name().ok_or_else(|| {
                    error(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "not a file name",
                    ))
                })?;
                let directory = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));

                Self::File(tracing_appender::rolling::never(directory, file_name))
            }
        })
    }
}

/// Writer of the fmt layer, its destination can be switched at runtime
#[derive(Clone)]
struct LogWriter(std::sync::Arc<std::sync::Mutex<Sink>>);

impl LogWriter {
    fn lock(&self) -> std::sync::MutexGuard<'_, Sink> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut *self.lock() {
            Sink::Stderr => std::io::stderr().write(buf),
            Sink::Stdout => std::io::stdout().write(buf),
            Sink::Off => Ok(buf.len()),
            Sink::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut *self.lock() {
            Sink::Stderr => std::io::stderr().flush(),
            Sink::Stdout => std::io::stdout().flush(),
            Sink::Off => Ok(()),
            Sink::File(file) => file.flush(),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Handles on the log subscriber, used to follow the `log_level` and
/// `log_file` fields across reloads
pub struct Logs {
    level: reload::Handle<tracing::level_filters::LevelFilter, Registry>,
    writer: LogWriter,
}

impl std::fmt::Debug for Logs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logs").finish_non_exhaustive()
    }
}

impl Logs {
    /// Build a subscriber following `config`, without installing it
    ///
    /// # Errors
    ///
    /// * the log file cannot be opened
    pub fn new(
        config: &AppConfig,
    ) -> Result<(Self, impl tracing::Subscriber + Send + Sync + 'static), DaemonError> {
        let writer = LogWriter(std::sync::Arc::new(std::sync::Mutex::new(Sink::open(
            &config.log_file,
        )?)));
        let (filter, level) = reload::Layer::new(config.log_level);

        // RUST_LOG can only narrow the configured level
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::EnvFilter::try_from_default_env().ok())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer.clone()),
            );

        Ok((Self { level, writer }, subscriber))
    }

    /// Build the subscriber and install it for the whole process
    ///
    /// # Errors
    ///
    /// * see [`Logs::new`]
    /// * a global subscriber is already installed
    pub fn init(config: &AppConfig) -> Result<Self, DaemonError> {
        let (logs, subscriber) = Self::new(config)?;
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| DaemonError::Logs(e.to_string()))?;
        Ok(logs)
    }

    /// Filter out the events above `level`
    ///
    /// # Errors
    ///
    /// * the subscriber was dropped
    pub fn set_level(&self, level: tracing::level_filters::LevelFilter) -> Result<(), DaemonError> {
        self.level
            .reload(level)
            .map_err(|e| DaemonError::Logs(e.to_string()))
    }

    /// Write the next events to `log_file`
    ///
    /// # Errors
    ///
    /// * the log file cannot be opened, the previous destination is kept
    pub fn set_file(&self, log_file: &str) -> Result<(), DaemonError> {
        let sink = Sink::open(log_file)?;
        *self.writer.lock() = sink;
        Ok(())
    }

    pub(crate) fn subscribe(self: &std::sync::Arc<Self>, bus: &EventBus<Event>) {
        let logs = self.clone();
        bus.subscribe(EventKind::LogLevelChanged, move |event| {
            match logs.set_level(event.new.log_level) {
                Ok(()) => tracing::info!(
                    target: log_channels::DAEMON,
                    "log level set to {}",
                    event.new.log_level
                ),
                Err(e) => tracing::error!(target: log_channels::DAEMON, "{e}"),
            }
        });

        let logs = self.clone();
        bus.subscribe(EventKind::LogFileChanged, move |event| {
            match logs.set_file(&event.new.log_file) {
                Ok(()) => tracing::info!(
                    target: log_channels::DAEMON,
                    "logs are written to '{}'",
                    event.new.log_file
                ),
                Err(e) => tracing::error!(target: log_channels::DAEMON, "{e}"),
            }
        });
    }
}
