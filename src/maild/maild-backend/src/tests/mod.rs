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
mod processors;

use crate::{Flow, Processor, StageError, Task};
use maild_common::{envelope::Envelope, Address};

pub fn envelope() -> Envelope {
    let mut envelope = Envelope::new(
        "192.168.1.2:45678".parse().unwrap(),
        "client.example.com".to_string(),
        "mx.testserver.com".to_string(),
        false,
        Some(Address::new("john@doe.com").unwrap()),
    );
    envelope.rcpt.push(Address::new("jane@testserver.com").unwrap());
    envelope.data = b"Subject: hello\r\nFrom: john@doe.com\r\n\r\nbody\r\n".to_vec();
    envelope
}

/// stage recording the tasks it is called for, in a shared journal
pub struct Recorder {
    pub name: &'static str,
    pub journal: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Processor for Recorder {
    async fn process(&self, task: Task, _: &mut Envelope) -> Result<Flow, StageError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{:?}", self.name, task));
        Ok(Flow::Continue)
    }
}

/// stage always failing with the given error
pub struct Failing(pub StageError);

#[async_trait::async_trait]
impl Processor for Failing {
    async fn process(&self, _: Task, _: &mut Envelope) -> Result<Flow, StageError> {
        Err(self.0.clone())
    }
}

/// stage waiting on `release` before continuing
pub struct Blocking {
    pub entered: std::sync::Arc<tokio::sync::Notify>,
    pub release: std::sync::Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl Processor for Blocking {
    async fn process(&self, _: Task, _: &mut Envelope) -> Result<Flow, StageError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Flow::Continue)
    }
}

/// stage sleeping before continuing
pub struct Sleeping(pub std::time::Duration);

#[async_trait::async_trait]
impl Processor for Sleeping {
    async fn process(&self, _: Task, _: &mut Envelope) -> Result<Flow, StageError> {
        tokio::time::sleep(self.0).await;
        Ok(Flow::Continue)
    }
}
