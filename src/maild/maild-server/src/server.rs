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
use crate::{
    log_channels,
    receiver::{handle_connection, Connection, Context},
    ServerError,
};
use maild_common::code::SMTPReplyCode;
use maild_config::ServerConfig;

/// Decrements the client count of a listener when the session ends
struct ClientGuard(std::sync::Arc<std::sync::atomic::AtomicUsize>);

impl ClientGuard {
    fn new(counter: std::sync::Arc<std::sync::atomic::AtomicUsize>) -> Self {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// TCP/IP listener of one `listen_interface`
pub struct Listener {
    listener: tokio::net::TcpListener,
    config: std::sync::Arc<arc_swap::ArcSwap<ServerConfig>>,
    clients: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    context: Context,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("server_id", &self.context.server_id)
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Bind the `listen_interface` of the live `config`, must be called
    /// within a tokio runtime
    ///
    /// # Errors
    ///
    /// * the address cannot be bound
    pub fn bind(
        config: std::sync::Arc<arc_swap::ArcSwap<ServerConfig>>,
        clients: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        context: Context,
    ) -> Result<Self, ServerError> {
        let addr = config.load().listen_interface.clone();
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let socket = std::net::TcpListener::bind(&addr).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;

        Ok(Self {
            listener: tokio::net::TcpListener::from_std(socket).map_err(bind_error)?,
            config,
            clients,
            context,
        })
    }

    /// Address the socket is bound to
    ///
    /// # Errors
    ///
    /// * the socket is in an invalid state
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` changes or its sender is dropped,
    /// the socket is closed on return. Sessions already accepted are not
    /// affected.
    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let server_id = self.context.server_id.clone();

        loop {
            let (stream, client_addr) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(target: log_channels::SERVER, "[{server_id}] accept failed: {e}");
                        continue;
                    }
                },
            };

            let max_clients = self.config.load().max_clients;
            if self.clients.load(std::sync::atomic::Ordering::SeqCst) >= max_clients {
                tracing::warn!(
                    target: log_channels::SERVER,
                    "[{server_id}] connection from {client_addr} refused, {max_clients} clients already connected"
                );
                tokio::spawn(turn_away(stream));
                continue;
            }

            tracing::info!(target: log_channels::SERVER, "[{server_id}] connection from {client_addr}");

            let guard = ClientGuard::new(self.clients.clone());
            let conn = Connection::new(client_addr, self.config.clone(), Box::new(stream));
            let context = self.context.clone();

            tokio::spawn(async move {
                let _guard = guard;
                let begin = std::time::Instant::now();

                match handle_connection(conn, &context).await {
                    Ok(()) => tracing::info!(
                        target: log_channels::SERVER,
                        "{{ elapsed: {:?} }} Connection {} closed cleanly",
                        begin.elapsed(),
                        client_addr
                    ),
                    Err(e) => tracing::warn!(
                        target: log_channels::SERVER,
                        "{{ elapsed: {:?} }} Connection {} closed with an error: {:#}",
                        begin.elapsed(),
                        client_addr,
                        e
                    ),
                }
            });
        }
    }
}

async fn turn_away(mut stream: tokio::net::TcpStream) {
    let reply = SMTPReplyCode::TooBusy.reply().to_string();

    if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut stream, reply.as_bytes()).await {
        tracing::warn!(target: log_channels::SERVER, "{}", e);
    }
    if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
        tracing::warn!(target: log_channels::SERVER, "{}", e);
    }
}
