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
use super::{
    command::Command,
    connection::{Connection, Line, ReadError},
};
use crate::{log_channels, TlsManager};
use anyhow::Context as _;
use maild_backend::{Backend, BackendError, Task};
use maild_common::{
    code::{Reply, SMTPReplyCode, MAX_RECIPIENTS},
    envelope::{Disposition, Envelope},
    Address,
};
use maild_config::AllowedHosts;

/// longest command line accepted, terminator excluded
pub const COMMAND_LINE_LIMIT: usize = 1024;

/// unrecognized commands tolerated before the connection is closed
pub const MAX_UNRECOGNIZED: usize = 5;

/// Shared state a session needs besides its connection
#[derive(Clone)]
pub struct Context {
    /// listen address of the listener which accepted the connection
    pub server_id: String,
    /// recipient domains accepted, swapped in place on reload
    pub allowed_hosts: std::sync::Arc<arc_swap::ArcSwap<AllowedHosts>>,
    ///
    pub backend: std::sync::Arc<Backend>,
    ///
    pub tls: std::sync::Arc<TlsManager>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

/// Steps of a session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// the banner is not sent yet
    Greeting,
    /// no transaction in progress
    Ready,
    /// MAIL FROM accepted
    MailFrom,
    /// at least one recipient accepted
    RcptTo,
    /// receiving the message
    Data,
    /// STARTTLS accepted, handshake in progress
    TlsNegotiating,
    ///
    Closed,
}

enum Message {
    Received(Vec<u8>),
    TooLarge,
}

enum Action {
    Continue,
    Close,
    StartTls(tokio_rustls::TlsAcceptor),
}

struct Session<'a> {
    ctx: &'a Context,
    state: State,
    helo: Option<String>,
    envelope: Option<Envelope>,
    unrecognized: usize,
}

/// Next line, `None` once the session is over
async fn next_line(conn: &mut Connection, limit: usize) -> anyhow::Result<Option<Line>> {
    match conn.read_line(limit).await {
        Ok(line) => Ok(Some(line)),
        Err(ReadError::Timeout) => {
            tracing::warn!(target: log_channels::RECEIVER, "[{}] i/o timeout", conn.client_addr);
            let host_name = conn.config.load().host_name.clone();
            conn.send(&Reply::timeout(&host_name)).await?;
            Ok(None)
        }
        Err(ReadError::Eof) => {
            tracing::debug!(
                target: log_channels::RECEIVER,
                "[{}] connection closed by the client",
                conn.client_addr
            );
            Ok(None)
        }
        Err(ReadError::Io(e)) => Err(e.into()),
    }
}

impl<'a> Session<'a> {
    const fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            state: State::Greeting,
            helo: None,
            envelope: None,
            unrecognized: 0,
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            tracing::trace!(
                target: log_channels::RECEIVER,
                "[{}] {:?} => {:?}",
                self.ctx.server_id,
                self.state,
                state
            );
            self.state = state;
        }
    }

    /// Drop the transaction in progress
    fn reset(&mut self) {
        self.envelope = None;
        self.set_state(State::Ready);
    }

    fn offers_start_tls(&self, conn: &Connection) -> bool {
        conn.config.load().tls.start_tls_on
            && !conn.is_secured
            && self.ctx.tls.acceptor(&self.ctx.server_id).is_some()
    }

    fn extensions(&self, conn: &Connection) -> Vec<String> {
        let mut extensions = vec![
            format!("SIZE {}", conn.config.load().max_size),
            "PIPELINING".to_string(),
        ];
        if self.offers_start_tls(conn) {
            extensions.push("STARTTLS".to_string());
        }
        extensions.extend(
            ["ENHANCEDSTATUSCODES", "8BITMIME", "HELP"]
                .into_iter()
                .map(str::to_string),
        );
        extensions
    }

    async fn on_line(&mut self, conn: &mut Connection, line: &[u8]) -> anyhow::Result<Action> {
        let command = match Command::parse(&String::from_utf8_lossy(line)) {
            Ok(command) => command,
            Err(SMTPReplyCode::Unrecognized) => {
                self.unrecognized += 1;
                if self.unrecognized >= MAX_UNRECOGNIZED {
                    tracing::warn!(
                        target: log_channels::RECEIVER,
                        "[{}] too many unrecognized commands",
                        conn.client_addr
                    );
                    conn.send_code(SMTPReplyCode::TooManyUnrecognized).await?;
                    return Ok(Action::Close);
                }
                conn.send_code(SMTPReplyCode::Unrecognized).await?;
                return Ok(Action::Continue);
            }
            Err(code) => {
                conn.send_code(code).await?;
                return Ok(Action::Continue);
            }
        };

        match command {
            Command::Helo(name) => {
                self.reset();
                self.helo = Some(name);
                let host_name = conn.config.load().host_name.clone();
                conn.send(&Reply::helo(&host_name)).await?;
            }
            Command::Ehlo(name) => {
                self.reset();
                self.helo = Some(name);
                let host_name = conn.config.load().host_name.clone();
                conn.send(&Reply::ehlo(&host_name, &self.extensions(conn)))
                    .await?;
            }
            Command::MailFrom { reverse_path, size } => {
                self.on_mail_from(conn, reverse_path, size).await?;
            }
            Command::RcptTo(forward_path) => self.on_rcpt_to(conn, forward_path).await?,
            Command::Data => return self.on_data(conn).await,
            Command::StartTls => return self.on_start_tls(conn).await,
            Command::Rset => {
                self.reset();
                conn.send_code(SMTPReplyCode::Reset).await?;
            }
            Command::Noop => conn.send_code(SMTPReplyCode::Noop).await?,
            Command::Vrfy => conn.send_code(SMTPReplyCode::Vrfy).await?,
            Command::Help => conn.send_code(SMTPReplyCode::Help).await?,
            Command::Quit if self.state != State::Ready => {
                conn.send_code(SMTPReplyCode::BadSequence).await?;
            }
            Command::Quit => {
                conn.send_code(SMTPReplyCode::Quit).await?;
                return Ok(Action::Close);
            }
        }
        Ok(Action::Continue)
    }

    async fn on_mail_from(
        &mut self,
        conn: &mut Connection,
        reverse_path: Option<Address>,
        size: Option<usize>,
    ) -> anyhow::Result<()> {
        let helo = match (&self.state, &self.helo) {
            (State::Ready, Some(helo)) => helo.clone(),
            _ => return Ok(conn.send_code(SMTPReplyCode::BadSequence).await?),
        };

        let config = conn.config.load_full();
        if size.map_or(false, |size| size > config.max_size) {
            return Ok(conn.send_code(SMTPReplyCode::MessageTooLarge).await?);
        }

        let envelope = Envelope::new(
            conn.client_addr,
            helo,
            config.host_name.clone(),
            conn.is_secured,
            reverse_path,
        );
        tracing::debug!(
            target: log_channels::RECEIVER,
            "[{}] transaction {} from {}",
            conn.client_addr,
            envelope.queued_id,
            envelope.reverse_path()
        );
        self.envelope = Some(envelope);
        self.set_state(State::MailFrom);
        Ok(conn.send_code(SMTPReplyCode::MailOk).await?)
    }

    async fn on_rcpt_to(&mut self, conn: &mut Connection, forward_path: Address) -> anyhow::Result<()> {
        let envelope = match (&self.state, self.envelope.as_mut()) {
            (State::MailFrom | State::RcptTo, Some(envelope)) => envelope,
            _ => return Ok(conn.send_code(SMTPReplyCode::BadSequence).await?),
        };

        if envelope.rcpt.len() >= MAX_RECIPIENTS {
            return Ok(conn.send_code(SMTPReplyCode::TooManyRecipients).await?);
        }

        if !self.ctx.allowed_hosts.load().allows(forward_path.domain()) {
            tracing::info!(
                target: log_channels::RECEIVER,
                "[{}] relay access denied for {}",
                conn.client_addr,
                forward_path
            );
            return Ok(conn.send(&Reply::relay_denied(forward_path.domain())).await?);
        }

        envelope.rcpt.push(forward_path);
        if self
            .ctx
            .backend
            .validate_at()
            .map_or(false, maild_backend::ValidateAt::at_rcpt)
        {
            let disposition = self
                .ctx
                .backend
                .run_validate(Task::ValidateRcpt, envelope)
                .await;
            if !disposition.is_accepted() {
                envelope.rcpt.pop();
                return Ok(conn.send(&disposition.reply()).await?);
            }
        }

        self.set_state(State::RcptTo);
        Ok(conn.send_code(SMTPReplyCode::RcptOk).await?)
    }

    /// Read the message up to the lone dot, `None` if the session is over.
    /// Past `max_size` the lines are read but no longer kept.
    async fn read_message(conn: &mut Connection) -> anyhow::Result<Option<Message>> {
        let mut data = Vec::new();
        let mut too_large = false;

        loop {
            let max_size = conn.config.load().max_size;
            let line = match next_line(conn, max_size).await? {
                None => return Ok(None),
                Some(Line::TooLong) => {
                    too_large = true;
                    continue;
                }
                Some(Line::Complete(line)) => line,
            };

            if line == b"." {
                break;
            }
            if too_large {
                continue;
            }
            let line = line.strip_prefix(b".").unwrap_or(&line);
            if data.len() + line.len() + 2 > max_size {
                too_large = true;
                data = Vec::new();
                continue;
            }
            data.extend_from_slice(line);
            data.extend_from_slice(b"\r\n");
        }

        Ok(Some(if too_large {
            Message::TooLarge
        } else {
            Message::Received(data)
        }))
    }

    async fn on_data(&mut self, conn: &mut Connection) -> anyhow::Result<Action> {
        if self.state != State::RcptTo || self.envelope.is_none() {
            conn.send_code(SMTPReplyCode::BadSequence).await?;
            return Ok(Action::Continue);
        }

        conn.send_code(SMTPReplyCode::DataStart).await?;
        self.set_state(State::Data);

        let message = Self::read_message(conn).await?;
        let mut envelope = match (message, self.envelope.take()) {
            (None, _) | (_, None) => return Ok(Action::Close),
            (Some(Message::TooLarge), Some(envelope)) => {
                tracing::info!(
                    target: log_channels::RECEIVER,
                    "[{}] message {} over the size limit",
                    conn.client_addr,
                    envelope.queued_id
                );
                self.reset();
                conn.send_code(SMTPReplyCode::MessageTooLarge).await?;
                return Ok(Action::Continue);
            }
            (Some(Message::Received(data)), Some(mut envelope)) => {
                envelope.data = data;
                envelope
            }
        };
        self.reset();

        if self
            .ctx
            .backend
            .validate_at()
            .map_or(false, maild_backend::ValidateAt::at_data)
        {
            let disposition = self
                .ctx
                .backend
                .run_validate(Task::ValidateData, &mut envelope)
                .await;
            if !disposition.is_accepted() {
                conn.send(&disposition.reply()).await?;
                return Ok(Action::Continue);
            }
        }

        let queued_id = envelope.queued_id.clone();
        match self.ctx.backend.submit(envelope).await {
            Ok(disposition) => {
                log_disposition(conn, &queued_id, &disposition);
                conn.send(&disposition.reply()).await?;
                Ok(Action::Continue)
            }
            Err(BackendError::QueueFull) => {
                tracing::warn!(
                    target: log_channels::RECEIVER,
                    "[{}] message {} refused, the save queue is full",
                    conn.client_addr,
                    queued_id
                );
                conn.send_code(SMTPReplyCode::QueueFull).await?;
                Ok(Action::Continue)
            }
            Err(BackendError::Closed) => {
                conn.send_code(SMTPReplyCode::ShuttingDown).await?;
                Ok(Action::Close)
            }
            Err(e) => {
                tracing::error!(target: log_channels::RECEIVER, "[{}] {}", conn.client_addr, e);
                conn.send(&Reply::temporary_failure(&e.to_string())).await?;
                Ok(Action::Continue)
            }
        }
    }

    async fn on_start_tls(&mut self, conn: &mut Connection) -> anyhow::Result<Action> {
        if self.state != State::Ready || conn.is_secured {
            conn.send_code(SMTPReplyCode::BadSequence).await?;
            return Ok(Action::Continue);
        }

        let acceptor = if conn.config.load().tls.start_tls_on {
            self.ctx.tls.acceptor(&self.ctx.server_id)
        } else {
            None
        };
        match acceptor {
            Some(acceptor) => {
                conn.send_code(SMTPReplyCode::StartTls).await?;
                self.set_state(State::TlsNegotiating);
                Ok(Action::StartTls(acceptor))
            }
            None => {
                conn.send_code(SMTPReplyCode::TlsNotAvailable).await?;
                Ok(Action::Continue)
            }
        }
    }

    /// The stream is now under TLS, the client must introduce itself again
    fn on_secured(&mut self) {
        self.helo = None;
        self.reset();
    }
}

fn log_disposition(conn: &Connection, queued_id: &str, disposition: &Disposition) {
    match disposition {
        Disposition::Accepted { queued_as } => tracing::info!(
            target: log_channels::RECEIVER,
            "[{}] message {} queued as {}",
            conn.client_addr,
            queued_id,
            queued_as
        ),
        Disposition::Rejected(reply) | Disposition::TemporaryFailure(reply) => tracing::info!(
            target: log_channels::RECEIVER,
            "[{}] message {} refused: {}",
            conn.client_addr,
            queued_id,
            reply.text()
        ),
    }
}

/// Run a session until the client quits, the connection breaks or times out.
///
/// With `tls_always_on` the handshake runs before the banner.
///
/// # Errors
///
/// * the stream is broken
/// * the TLS handshake failed
pub async fn handle_connection(mut conn: Connection, ctx: &Context) -> anyhow::Result<()> {
    let mut session = Session::new(ctx);

    if conn.config.load().tls.tls_always_on {
        let acceptor = ctx.tls.acceptor(&ctx.server_id).ok_or_else(|| {
            anyhow::anyhow!("no certificate in force for [{}]", ctx.server_id)
        })?;
        session.set_state(State::TlsNegotiating);
        conn = conn.upgrade(&acceptor).await.context("tls handshake failed")?;
    }

    let host_name = conn.config.load().host_name.clone();
    conn.send(&Reply::greetings(&host_name)).await?;
    session.set_state(State::Ready);

    loop {
        let line = match next_line(&mut conn, COMMAND_LINE_LIMIT).await? {
            None => break,
            Some(Line::TooLong) => {
                conn.send_code(SMTPReplyCode::LineTooLong).await?;
                continue;
            }
            Some(Line::Complete(line)) => line,
        };

        match session.on_line(&mut conn, &line).await? {
            Action::Continue => {}
            Action::Close => break,
            Action::StartTls(acceptor) => {
                conn = conn
                    .upgrade(&acceptor)
                    .await
                    .context("tls handshake failed after STARTTLS")?;
                session.on_secured();
            }
        }
    }

    session.set_state(State::Closed);
    // the peer may already be gone
    let _ = conn.shutdown().await;
    Ok(())
}
