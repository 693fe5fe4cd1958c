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

/// Client side of a conversation, replies are read whole (every line of a
/// multi-line reply, CRLF kept)
pub struct Client<S> {
    stream: tokio::io::BufReader<S>,
}

/// Open a plain connection to `addr`
///
/// # Errors
///
/// * the connection is refused
pub async fn connect(addr: &str) -> std::io::Result<Client<tokio::net::TcpStream>> {
    tokio::net::TcpStream::connect(addr).await.map(Client::new)
}

impl<S> Client<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    ///
    pub fn new(stream: S) -> Self {
        Self {
            stream: tokio::io::BufReader::new(stream),
        }
    }

    /// Read the next reply
    ///
    /// # Errors
    ///
    /// * the server closed the connection before the last line
    pub async fn reply(&mut self) -> std::io::Result<String> {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            if tokio::io::AsyncBufReadExt::read_line(&mut self.stream, &mut line).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {reply:?}"),
                ));
            }
            let last = line.as_bytes().get(3) != Some(&b'-');
            reply.push_str(&line);
            if last {
                return Ok(reply);
            }
        }
    }

    /// Write `line` followed by CRLF
    ///
    /// # Errors
    ///
    /// * the connection is broken
    pub async fn send(&mut self, line: &str) -> std::io::Result<()> {
        let stream = self.stream.get_mut();
        tokio::io::AsyncWriteExt::write_all(stream, format!("{line}\r\n").as_bytes()).await?;
        tokio::io::AsyncWriteExt::flush(stream).await
    }

    /// [`Client::send`] then [`Client::reply`]
    ///
    /// # Errors
    ///
    /// * see both
    pub async fn command(&mut self, line: &str) -> std::io::Result<String> {
        self.send(line).await?;
        self.reply().await
    }

    /// Wait at most `timeout` for the server to close the connection
    pub async fn is_closed_within(&mut self, timeout: std::time::Duration) -> bool {
        let mut rest = vec![];
        matches!(
            tokio::time::timeout(
                timeout,
                tokio::io::AsyncReadExt::read_to_end(&mut self.stream, &mut rest)
            )
            .await,
            Ok(Ok(_) | Err(_))
        )
    }

    /// The stream, anything buffered is lost
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}
