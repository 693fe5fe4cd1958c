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
use crate::log_channels;
use maild_common::code::{Reply, SMTPReplyCode};
use maild_config::ServerConfig;

/// Any stream a session can run over
pub trait Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> Io for T {}

/// A line read from the client, terminator removed
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    ///
    Complete(Vec<u8>),
    /// the line was over the limit, it has been consumed up to its terminator
    TooLong,
}

/// Why no line could be read
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// the client stayed silent for longer than the listener's timeout
    #[error("i/o timeout")]
    Timeout,
    /// the client closed the connection
    #[error("connection closed by the client")]
    Eof,
    ///
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Client side of a session
pub struct Connection {
    /// peer address
    pub client_addr: std::net::SocketAddr,
    /// accept time
    pub timestamp: std::time::SystemTime,
    /// is the stream under TLS
    pub is_secured: bool,
    /// configuration of the listener, swapped in place on reload
    pub config: std::sync::Arc<arc_swap::ArcSwap<ServerConfig>>,
    io: tokio::io::BufReader<Box<dyn Io>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_addr", &self.client_addr)
            .field("timestamp", &self.timestamp)
            .field("is_secured", &self.is_secured)
            .finish_non_exhaustive()
    }
}

impl Connection {
    ///
    #[must_use]
    pub fn new(
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<arc_swap::ArcSwap<ServerConfig>>,
        io: Box<dyn Io>,
    ) -> Self {
        Self {
            client_addr,
            timestamp: std::time::SystemTime::now(),
            is_secured: false,
            config,
            io: tokio::io::BufReader::new(io),
        }
    }

    /// Write a reply and flush it
    ///
    /// # Errors
    ///
    /// * the stream is broken
    pub async fn send(&mut self, reply: &Reply) -> std::io::Result<()> {
        let reply = reply.to_string();
        tracing::trace!(target: log_channels::RECEIVER, "[{}] >> {:?}", self.client_addr, reply);

        let stream = self.io.get_mut();
        tokio::io::AsyncWriteExt::write_all(stream, reply.as_bytes()).await?;
        tokio::io::AsyncWriteExt::flush(stream).await
    }

    /// [`Connection::send`] a reply without parameter
    ///
    /// # Errors
    ///
    /// * the stream is broken
    pub async fn send_code(&mut self, code: SMTPReplyCode) -> std::io::Result<()> {
        self.send(&code.reply()).await
    }

    /// Read the next line, the whole read is bounded by the timeout of the
    /// listener as configured now.
    ///
    /// A line whose content is longer than `limit` bytes is consumed and
    /// reported as [`Line::TooLong`].
    ///
    /// # Errors
    ///
    /// * see [`ReadError`]
    pub async fn read_line(&mut self, limit: usize) -> Result<Line, ReadError> {
        let timeout = self.config.load().timeout;
        let line = tokio::time::timeout(timeout, next_line(&mut self.io, limit))
            .await
            .map_err(|_| ReadError::Timeout)??;

        if let Line::Complete(line) = &line {
            tracing::trace!(
                target: log_channels::RECEIVER,
                "[{}] << {:?}",
                self.client_addr,
                String::from_utf8_lossy(line)
            );
        }
        Ok(line)
    }

    /// Run the TLS handshake over the stream, bounded by the timeout of the
    /// listener. Bytes already buffered are dropped.
    ///
    /// # Errors
    ///
    /// * the handshake failed or timed out
    pub async fn upgrade(self, acceptor: &tokio_rustls::TlsAcceptor) -> Result<Self, ReadError> {
        let timeout = self.config.load().timeout;
        let Self {
            client_addr,
            timestamp,
            config,
            io,
            ..
        } = self;

        let stream = tokio::time::timeout(timeout, acceptor.accept(io.into_inner()))
            .await
            .map_err(|_| ReadError::Timeout)??;

        Ok(Self {
            client_addr,
            timestamp,
            is_secured: true,
            config,
            io: tokio::io::BufReader::new(Box::new(stream) as Box<dyn Io>),
        })
    }

    /// Close the write side of the stream
    ///
    /// # Errors
    ///
    /// * the stream is broken
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self.io.get_mut()).await
    }
}

async fn next_line(
    io: &mut tokio::io::BufReader<Box<dyn Io>>,
    limit: usize,
) -> Result<Line, ReadError> {
    use tokio::io::AsyncBufReadExt;

    let mut line = Vec::new();
    let mut overflow = false;

    loop {
        let (done, used) = {
            let available = io.fill_buf().await?;
            if available.is_empty() {
                return Err(ReadError::Eof);
            }
            let (done, end) = available
                .iter()
                .position(|b| *b == b'\n')
                .map_or((false, available.len()), |i| (true, i + 1));

            if !overflow {
                line.extend_from_slice(&available[..end]);
                // terminator included
                if line.len() > limit + 2 {
                    overflow = true;
                    line.clear();
                }
            }
            (done, end)
        };
        io.consume(used);
        if done {
            break;
        }
    }

    if overflow {
        return Ok(Line::TooLong);
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(if line.len() > limit {
        Line::TooLong
    } else {
        Line::Complete(line)
    })
}
