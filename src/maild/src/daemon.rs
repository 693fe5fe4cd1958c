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
use crate::{log_channels, logs::Logs, pid, DaemonError};
use maild_backend::{Backend, BackendError, ProcessorRegistry};
use maild_common::bus::EventBus;
use maild_config::{AppConfig, Event, EventKind};
use maild_server::{ServerManager, TlsManager};

struct Running {
    registry: std::sync::Arc<ProcessorRegistry>,
    bus: std::sync::Arc<EventBus<Event>>,
    backend: std::sync::Arc<Backend>,
    servers: std::sync::Arc<ServerManager>,
}

/// Lifecycle of the daemon: start, reload and shutdown.
///
/// A reload is all or nothing. The new configuration is checked (processor
/// names, certificates) before it replaces the active one, then the
/// differences are published on the bus and applied in place by the server
/// manager, the backend and the logs.
pub struct Daemon {
    source: Option<std::path::PathBuf>,
    active: arc_swap::ArcSwap<AppConfig>,
    registry: ProcessorRegistry,
    logs: Option<std::sync::Arc<Logs>>,
    running: Option<Running>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("source", &self.source)
            .field("registry", &self.registry)
            .field("started", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// A daemon running `config`, with the built-in processors
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            source: None,
            active: arc_swap::ArcSwap::from_pointee(config),
            registry: ProcessorRegistry::with_builtins(),
            logs: None,
            running: None,
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A daemon running the configuration stored at `path`, [`Daemon::reload`]
    /// reads it again
    ///
    /// # Errors
    ///
    /// * see [`AppConfig::from_path`]
    pub fn from_path(path: impl Into<std::path::PathBuf>) -> Result<Self, DaemonError> {
        let path = path.into();
        let config = AppConfig::from_path(&path)?;
        Ok(Self {
            source: Some(path),
            ..Self::new(config)
        })
    }

    /// Follow the log fields of the configuration with `logs`
    #[must_use]
    pub fn with_logs(mut self, logs: Logs) -> Self {
        self.logs = Some(std::sync::Arc::new(logs));
        self
    }

    /// Make a processor available to the chains of `backend_config`
    ///
    /// # Errors
    ///
    /// * [`DaemonError::AlreadyStarted`]
    pub fn register_processor<F>(&mut self, name: &str, factory: F) -> Result<(), DaemonError>
    where
        F: Fn(
                &maild_config::BackendConfig,
            ) -> Result<std::sync::Arc<dyn maild_backend::Processor>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        if self.running.is_some() {
            return Err(DaemonError::AlreadyStarted);
        }
        self.registry.register(name, factory);
        Ok(())
    }

    fn admit(registry: &ProcessorRegistry, config: &AppConfig) -> Result<(), DaemonError> {
        config.validate()?;
        Backend::check(registry, &config.backend_config)?;
        for server in config.enabled_servers().filter(|s| s.tls.is_enabled()) {
            TlsManager::validate(&server.tls).map_err(|source| DaemonError::Tls {
                server: server.listen_interface.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Check the active configuration as [`Daemon::start`] would, without
    /// starting anything
    ///
    /// # Errors
    ///
    /// * the configuration is invalid
    /// * a chain names an unknown processor
    /// * the certificate of an enabled listener cannot be used
    pub fn check(&self) -> Result<(), DaemonError> {
        Self::admit(&self.registry, &self.active.load())
    }

    /// Start the backend and every enabled listener, must be called within
    /// a tokio runtime. The processors registered so far are the only ones
    /// available for the lifetime of the daemon.
    ///
    /// # Errors
    ///
    /// * see [`Daemon::check`]
    /// * the pid file cannot be written
    /// * a listener cannot be bound
    pub fn start(&mut self) -> Result<(), DaemonError> {
        if self.running.is_some() {
            return Err(DaemonError::AlreadyStarted);
        }
        let config = self.active.load_full();
        Self::admit(&self.registry, &config)?;

        let registry = std::sync::Arc::new(self.registry.clone());
        let backend = std::sync::Arc::new(Backend::new(
            registry.clone(),
            &config.backend_config,
        )?);
        let servers = std::sync::Arc::new(ServerManager::new(
            backend.clone(),
            std::sync::Arc::new(TlsManager::new()),
            config.allowed_hosts.clone(),
        ));

        let bus = std::sync::Arc::new(EventBus::<Event>::new());
        {
            let backend = backend.clone();
            bus.subscribe(EventKind::BackendConfigChanged, move |event| {
                match backend.reconfigure(&event.new.backend_config) {
                    Ok(()) => tracing::info!(target: log_channels::DAEMON, "new backend started"),
                    Err(e) => tracing::error!(target: log_channels::DAEMON, "{e}"),
                }
            });
        }
        servers.subscribe(&bus);
        if let Some(logs) = &self.logs {
            logs.subscribe(&bus);
        }
        pid::subscribe(&bus);

        pid::write(&config.pid_file)?;

        if let Err(e) = servers.start_all(&config) {
            for id in servers.running_servers() {
                servers.stop(&id);
            }
            return Err(e.into());
        }

        tracing::info!(
            target: log_channels::DAEMON,
            "maild started, {} listener(s) running",
            servers.running_servers().len()
        );
        self.running = Some(Running {
            registry,
            bus,
            backend,
            servers,
        });
        Ok(())
    }

    /// Read the configuration file again and apply it
    ///
    /// # Errors
    ///
    /// * [`DaemonError::NoSource`]
    /// * see [`AppConfig::from_path`] and [`Daemon::reload_with`]
    pub async fn reload(&self) -> Result<Vec<EventKind>, DaemonError> {
        let path = self.source.as_ref().ok_or(DaemonError::NoSource)?;
        match AppConfig::from_path(path) {
            Ok(config) => self.reload_with(config).await,
            Err(e) => {
                tracing::error!(
                    target: log_channels::DAEMON,
                    "reload rejected, the active configuration is kept: {e}"
                );
                Err(e.into())
            }
        }
    }

    /// Replace the active configuration with `config` and apply the
    /// differences, returns the kinds of the events published.
    ///
    /// Reloads are serialized. On error nothing changes.
    ///
    /// # Errors
    ///
    /// * [`DaemonError::NotStarted`]
    /// * see [`Daemon::check`]
    pub async fn reload_with(&self, config: AppConfig) -> Result<Vec<EventKind>, DaemonError> {
        let _coordinator = self.reload_lock.lock().await;
        let running = self.running.as_ref().ok_or(DaemonError::NotStarted)?;

        if let Err(e) = Self::admit(&running.registry, &config) {
            tracing::error!(
                target: log_channels::DAEMON,
                "reload rejected, the active configuration is kept: {e}"
            );
            return Err(e);
        }

        let new = std::sync::Arc::new(config);
        let old = self.active.swap(new.clone());
        let events = maild_config::diff(&old, &new);
        for event in &events {
            running.bus.publish(event);
        }
        running.servers.settle().await;

        tracing::info!(
            target: log_channels::DAEMON,
            "configuration reloaded, {} change(s) applied",
            events.len()
        );
        Ok(events.iter().map(|event| event.kind).collect())
    }

    /// Stop every listener, then give the queued envelopes `grace` to be saved
    pub async fn shutdown(&self, grace: std::time::Duration) {
        let _coordinator = self.reload_lock.lock().await;
        if let Some(running) = &self.running {
            running.servers.shutdown().await;
            running.backend.shutdown(grace).await;
            pid::remove(&self.active.load().pid_file);
            tracing::info!(target: log_channels::DAEMON, "maild stopped");
        }
    }

    /// The configuration in force
    #[must_use]
    pub fn config(&self) -> std::sync::Arc<AppConfig> {
        self.active.load_full()
    }

    /// Address the listener `id` is bound to, if it runs
    #[must_use]
    pub fn local_addr(&self, id: &str) -> Option<std::net::SocketAddr> {
        self.running
            .as_ref()
            .and_then(|running| running.servers.local_addr(id))
    }

    /// listen addresses of the running listeners
    #[must_use]
    pub fn running_servers(&self) -> Vec<String> {
        self.running
            .as_ref()
            .map(|running| running.servers.running_servers())
            .unwrap_or_default()
    }
}
