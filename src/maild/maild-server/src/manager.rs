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
use crate::{log_channels, receiver::Context, Listener, ServerError, TlsManager};
use maild_backend::Backend;
use maild_common::bus::EventBus;
use maild_config::{AllowedHosts, AppConfig, Event, EventKind, ServerConfig};

struct Running {
    local_addr: std::net::SocketAddr,
    shutdown: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

struct Entry {
    config: std::sync::Arc<arc_swap::ArcSwap<ServerConfig>>,
    clients: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    running: Option<Running>,
}

impl Entry {
    fn new(config: &ServerConfig) -> Self {
        Self {
            config: std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(config.clone())),
            clients: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            running: None,
        }
    }
}

/// The listeners of the daemon, keyed by listen address, and their reaction
/// to configuration events.
///
/// The live configuration of a listener is shared with its sessions, a
/// reload swaps the fields in place. Stopping a listener closes its socket,
/// the sessions it accepted run to completion.
pub struct ServerManager {
    backend: std::sync::Arc<Backend>,
    tls: std::sync::Arc<TlsManager>,
    allowed_hosts: std::sync::Arc<arc_swap::ArcSwap<AllowedHosts>>,
    listeners: std::sync::Mutex<std::collections::BTreeMap<String, Entry>>,
    stopping: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("running", &self.running_servers())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ServerManager {
    ///
    #[must_use]
    pub fn new(
        backend: std::sync::Arc<Backend>,
        tls: std::sync::Arc<TlsManager>,
        allowed_hosts: AllowedHosts,
    ) -> Self {
        Self {
            backend,
            tls,
            allowed_hosts: std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(allowed_hosts)),
            listeners: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            stopping: std::sync::Mutex::new(vec![]),
        }
    }

    /// Register a listener without starting it
    pub fn add(&self, config: &ServerConfig) {
        let id = &config.listen_interface;
        let mut listeners = lock(&self.listeners);
        match listeners.get(id) {
            Some(entry) => entry.config.store(std::sync::Arc::new(config.clone())),
            None => {
                listeners.insert(id.clone(), Entry::new(config));
                tracing::info!(target: log_channels::SERVER, "New server added [{id}]");
            }
        }
    }

    /// Put `config` in force for its listener and accept connections,
    /// registering the listener if needed. Does nothing but return the bound
    /// address if the listener is already running.
    ///
    /// # Errors
    ///
    /// * the certificate cannot be used
    /// * the address cannot be bound
    pub fn start(&self, config: &ServerConfig) -> Result<std::net::SocketAddr, ServerError> {
        let id = config.listen_interface.clone();
        let mut listeners = lock(&self.listeners);
        let entry = listeners
            .entry(id.clone())
            .or_insert_with(|| Entry::new(config));

        if let Some(running) = &entry.running {
            return Ok(running.local_addr);
        }
        entry.config.store(std::sync::Arc::new(config.clone()));

        if config.tls.is_enabled() {
            self.tls
                .activate(&id, &config.tls)
                .map_err(|source| ServerError::Tls {
                    addr: id.clone(),
                    source,
                })?;
        }

        let listener = Listener::bind(
            entry.config.clone(),
            entry.clients.clone(),
            Context {
                server_id: id.clone(),
                allowed_hosts: self.allowed_hosts.clone(),
                backend: self.backend.clone(),
                tls: self.tls.clone(),
            },
        )?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: id.clone(),
            source,
        })?;

        let (shutdown, receiver) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(listener.serve(receiver));
        entry.running = Some(Running {
            local_addr,
            shutdown,
            task,
        });

        tracing::info!(target: log_channels::SERVER, "Starting server [{id}] on {local_addr}");
        Ok(local_addr)
    }

    /// Stop accepting connections on `id`, returns false if it was not running
    pub fn stop(&self, id: &str) -> bool {
        let running = lock(&self.listeners)
            .get_mut(id)
            .and_then(|entry| entry.running.take());

        match running {
            Some(running) => {
                // a closed receiver means the loop already returned
                let _ = running.shutdown.send(true);
                lock(&self.stopping).push(running.task);
                tracing::info!(target: log_channels::SERVER, "Server [{id}] stopped");
                true
            }
            None => false,
        }
    }

    /// Stop and forget `id`, returns false if it was unknown
    pub fn remove(&self, id: &str) -> bool {
        self.stop(id);
        let removed = lock(&self.listeners).remove(id).is_some();
        self.tls.remove(id);
        if removed {
            tracing::info!(target: log_channels::SERVER, "Server [{id}] removed");
        }
        removed
    }

    /// Put the TLS fields of `config` in force for its listener. On error
    /// the listener keeps its previous certificate and flags.
    ///
    /// # Errors
    ///
    /// * the listener is unknown
    /// * the certificate cannot be used
    pub fn set_tls(&self, config: &ServerConfig) -> Result<(), ServerError> {
        let id = &config.listen_interface;
        let live = self.live(id)?;

        if config.tls.is_enabled() {
            self.tls
                .activate(id, &config.tls)
                .map_err(|source| ServerError::Tls {
                    addr: id.clone(),
                    source,
                })?;
        } else {
            self.tls.remove(id);
        }

        live.rcu(|current| ServerConfig {
            tls: config.tls.clone(),
            ..(**current).clone()
        });
        tracing::info!(target: log_channels::SERVER, "Server [{id}] new TLS configuration loaded");
        Ok(())
    }

    /// Put the timeout of `config` in force for its listener and every
    /// session it accepted
    ///
    /// # Errors
    ///
    /// * the listener is unknown
    pub fn set_timeout(&self, config: &ServerConfig) -> Result<(), ServerError> {
        let id = &config.listen_interface;
        self.live(id)?.rcu(|current| ServerConfig {
            timeout: config.timeout,
            ..(**current).clone()
        });
        tracing::info!(
            target: log_channels::SERVER,
            "Server [{id}] timeout set to {:?}",
            config.timeout
        );
        Ok(())
    }

    /// Replace the recipient domains accepted by every session
    pub fn set_allowed_hosts(&self, allowed_hosts: &AllowedHosts) {
        self.allowed_hosts
            .store(std::sync::Arc::new(allowed_hosts.clone()));
        tracing::info!(
            target: log_channels::SERVER,
            "allowed_hosts config changed, a new list was set"
        );
    }

    /// Start every enabled server of `config`, in declaration order
    ///
    /// # Errors
    ///
    /// * see [`ServerManager::start`]
    pub fn start_all(&self, config: &AppConfig) -> Result<(), ServerError> {
        self.set_allowed_hosts(&config.allowed_hosts);
        for server in &config.servers {
            self.add(server);
        }
        for server in config.enabled_servers() {
            self.start(server)?;
        }
        Ok(())
    }

    /// React to the server and allowed hosts events of `bus`.
    ///
    /// Errors are logged, a failing listener never fails the reload.
    pub fn subscribe(self: &std::sync::Arc<Self>, bus: &EventBus<Event>) {
        let on = |kind: EventKind, reaction: fn(&Self, &Event)| {
            let manager = self.clone();
            bus.subscribe(kind, move |event| reaction(&manager, event));
        };

        on(EventKind::ServerAdded, |manager, event| {
            if let Some(server) = &event.server {
                manager.add(server);
            }
        });
        on(EventKind::ServerStarted, |manager, event| {
            if let Some(server) = &event.server {
                if let Err(e) = manager.start(server) {
                    tracing::error!(target: log_channels::SERVER, "{e}");
                }
            }
        });
        on(EventKind::ServerStopped, |manager, event| {
            if let Some(id) = event.server_id() {
                manager.stop(id);
            }
        });
        on(EventKind::ServerRemoved, |manager, event| {
            if let Some(id) = event.server_id() {
                manager.remove(id);
            }
        });
        on(EventKind::ServerTlsChanged, |manager, event| {
            if let Some(server) = &event.server {
                if let Err(e) = manager.set_tls(server) {
                    tracing::error!(target: log_channels::SERVER, "{e}");
                }
            }
        });
        on(EventKind::ServerTimeoutChanged, |manager, event| {
            if let Some(server) = &event.server {
                if let Err(e) = manager.set_timeout(server) {
                    tracing::error!(target: log_channels::SERVER, "{e}");
                }
            }
        });
        on(EventKind::AllowedHostsChanged, |manager, event| {
            manager.set_allowed_hosts(&event.new.allowed_hosts);
        });
    }

    fn live(
        &self,
        id: &str,
    ) -> Result<std::sync::Arc<arc_swap::ArcSwap<ServerConfig>>, ServerError> {
        lock(&self.listeners)
            .get(id)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| ServerError::UnknownServer(id.to_string()))
    }

    /// Address a running listener is bound to
    #[must_use]
    pub fn local_addr(&self, id: &str) -> Option<std::net::SocketAddr> {
        lock(&self.listeners)
            .get(id)
            .and_then(|entry| entry.running.as_ref().map(|running| running.local_addr))
    }

    /// listen addresses of the running listeners
    #[must_use]
    pub fn running_servers(&self) -> Vec<String> {
        lock(&self.listeners)
            .iter()
            .filter(|(_, entry)| entry.running.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Configuration a listener currently runs with
    #[must_use]
    pub fn live_config(&self, id: &str) -> Option<std::sync::Arc<ServerConfig>> {
        self.live(id).ok().map(|live| live.load_full())
    }

    /// number of sessions open on `id`
    #[must_use]
    pub fn client_count(&self, id: &str) -> Option<usize> {
        lock(&self.listeners)
            .get(id)
            .map(|entry| entry.clients.load(std::sync::atomic::Ordering::SeqCst))
    }

    /// recipient domains accepted now
    #[must_use]
    pub fn allowed_hosts(&self) -> std::sync::Arc<AllowedHosts> {
        self.allowed_hosts.load_full()
    }

    /// Wait for the accept loops asked to stop, their sockets are closed on return
    pub async fn settle(&self) {
        let stopping = std::mem::take(&mut *lock(&self.stopping));
        for task in stopping {
            if let Err(e) = task.await {
                tracing::error!(target: log_channels::SERVER, "an accept loop failed: {e}");
            }
        }
    }

    /// Stop every listener and wait for their accept loops
    pub async fn shutdown(&self) {
        let ids = self.running_servers();
        for id in &ids {
            self.stop(id);
        }
        self.settle().await;
        tracing::info!(target: log_channels::SERVER, "every listener is stopped");
    }
}
