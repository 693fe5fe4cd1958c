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
use maild::Daemon;
use maild_backend::{Flow, Processor, StageError, Task};
use maild_common::{envelope::Envelope, re::serde_json};
use maild_config::AppConfig;
use maild_test::client::{self, Client};

pub type Journal = std::sync::Arc<std::sync::Mutex<Vec<Envelope>>>;

/// Keeps a copy of every envelope reaching the save chain
pub struct Recorder(Journal);

#[async_trait::async_trait]
impl Processor for Recorder {
    async fn process(&self, task: Task, envelope: &mut Envelope) -> Result<Flow, StageError> {
        if task == Task::SaveMail {
            self.0.lock().unwrap().push(envelope.clone());
        }
        Ok(Flow::Continue)
    }
}

pub const GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// `config` saving through `HeadersParser|Recorder`
pub fn recording(mut config: AppConfig) -> AppConfig {
    config.backend_config.insert(
        "save_process",
        serde_json::Value::String("HeadersParser|Recorder".to_string()),
    );
    config
}

/// A daemon knowing the `Recorder` processor, not started
pub fn daemon(config: AppConfig) -> (Daemon, Journal) {
    let journal = Journal::default();
    let mut daemon = Daemon::new(config);

    let shared = journal.clone();
    daemon
        .register_processor("Recorder", move |_| {
            Ok(std::sync::Arc::new(Recorder(shared.clone())) as std::sync::Arc<dyn Processor>)
        })
        .unwrap();
    (daemon, journal)
}

/// Connect and read the banner, which must name `host_name`
pub async fn greeted(addr: &str, host_name: &str) -> Client<tokio::net::TcpStream> {
    let mut client = client::connect(addr).await.unwrap();
    let banner = client.reply().await.unwrap();
    assert!(
        banner.starts_with(&format!("220-{host_name} ")),
        "unexpected banner {banner:?}"
    );
    client
}
