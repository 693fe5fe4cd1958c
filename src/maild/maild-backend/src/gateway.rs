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
use crate::{log_channels, Chain, ProcessorRegistry, Task};
use maild_common::{
    code::{Reply, SMTPReplyCode},
    envelope::{Disposition, Envelope},
};
use maild_config::BackendConfig;

/// Errors of the processing pipeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// a chain names a processor missing from the registry
    #[error("unknown processor '{0}'")]
    UnknownProcessor(String),
    /// a factory refused the configuration
    #[error("processor '{name}' cannot be initialized: {reason}")]
    Initialization {
        /// processor name
        name: String,
        ///
        reason: String,
    },
    /// the backend mapping has a value of the wrong type, or a null size
    #[error("ill-formed backend_config: {0}")]
    Config(String),
    /// every worker is busy and the queue is full
    #[error("the save queue is full")]
    QueueFull,
    /// the backend was shut down
    #[error("the backend is shut down")]
    Closed,
}

/// Where the validate chain runs in the conversation
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidateAt {
    /// after each accepted RCPT TO
    Rcpt,
    /// after the end of DATA
    Data,
    /// both
    Both,
}

impl Default for ValidateAt {
    fn default() -> Self {
        Self::Rcpt
    }
}

impl ValidateAt {
    ///
    #[must_use]
    pub const fn at_rcpt(self) -> bool {
        matches!(self, Self::Rcpt | Self::Both)
    }

    ///
    #[must_use]
    pub const fn at_data(self) -> bool {
        matches!(self, Self::Data | Self::Both)
    }
}

fn default_save_process() -> String {
    "HeadersParser|Debugger".to_string()
}

const fn default_save_workers_size() -> usize {
    1
}

const fn default_save_queue_size() -> usize {
    64
}

const fn default_save_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

const fn default_validate_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}

/// Keys of the backend mapping read by the pipeline, other keys are left to the processors
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct GatewayConfig {
    /// `|` separated names of the save chain
    #[serde(default = "default_save_process")]
    pub save_process: String,
    /// `|` separated names of the validate chain
    #[serde(default)]
    pub validate_process: String,
    /// number of workers running the save chain
    #[serde(default = "default_save_workers_size")]
    pub save_workers_size: usize,
    /// envelopes waiting for a worker before submissions are refused
    #[serde(default = "default_save_queue_size")]
    pub save_queue_size: usize,
    /// how long a session waits for the save chain
    #[serde(
        rename = "gw_save_timeout",
        default = "default_save_timeout",
        with = "humantime_serde"
    )]
    pub save_timeout: std::time::Duration,
    /// how long a session waits for the validate chain
    #[serde(
        rename = "gw_val_rcpt_timeout",
        default = "default_validate_timeout",
        with = "humantime_serde"
    )]
    pub validate_timeout: std::time::Duration,
    ///
    #[serde(default)]
    pub validate_at: ValidateAt,
}

impl GatewayConfig {
    /// Read the pipeline keys of `config`
    ///
    /// # Errors
    ///
    /// * a key has a value of the wrong type
    /// * `save_workers_size` or `save_queue_size` is null
    pub fn from_backend_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let gateway = config
            .to_typed::<Self>()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        if gateway.save_workers_size == 0 {
            return Err(BackendError::Config("save_workers_size must be positive".into()));
        }
        if gateway.save_queue_size == 0 {
            return Err(BackendError::Config("save_queue_size must be positive".into()));
        }
        Ok(gateway)
    }
}

struct Job {
    envelope: Envelope,
    chain: std::sync::Arc<Chain>,
    result: tokio::sync::oneshot::Sender<Disposition>,
}

/// Chains and workers of one backend configuration
struct Pipeline {
    config: GatewayConfig,
    validate: std::sync::Arc<Chain>,
    save: std::sync::Arc<Chain>,
    queue: tokio::sync::mpsc::Sender<Job>,
    workers: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Pipeline {
    fn resolve(
        registry: &ProcessorRegistry,
        config: &BackendConfig,
    ) -> Result<(GatewayConfig, Chain, Chain), BackendError> {
        let gateway = GatewayConfig::from_backend_config(config)?;
        let validate = Chain::parse(&gateway.validate_process, registry, config)?;
        let save = Chain::parse(&gateway.save_process, registry, config)?;
        Ok((gateway, validate, save))
    }

    fn start(registry: &ProcessorRegistry, config: &BackendConfig) -> Result<Self, BackendError> {
        let (gateway, validate, save) = Self::resolve(registry, config)?;

        let (queue, receiver) = tokio::sync::mpsc::channel(gateway.save_queue_size);
        let receiver = std::sync::Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..gateway.save_workers_size)
            .map(|id| tokio::spawn(work(id, receiver.clone())))
            .collect::<Vec<_>>();

        tracing::info!(
            target: log_channels::BACKEND,
            "new backend started: validate={:?} save={:?} workers={}",
            validate,
            save,
            gateway.save_workers_size
        );

        Ok(Self {
            config: gateway,
            validate: std::sync::Arc::new(validate),
            save: std::sync::Arc::new(save),
            queue,
            workers: std::sync::Mutex::new(workers),
        })
    }
}

async fn work(
    id: usize,
    receiver: std::sync::Arc<tokio::sync::Mutex<tokio::sync::mpsc::Receiver<Job>>>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Job {
            mut envelope,
            chain,
            result,
        } = match job {
            Some(job) => job,
            None => break,
        };

        if result.is_closed() {
            tracing::warn!(
                target: log_channels::BACKEND,
                "worker {id}: [{}] dropped, the session stopped waiting for it",
                envelope.queued_id
            );
            continue;
        }

        let disposition = chain.run(Task::SaveMail, &mut envelope).await;
        envelope.disposition = Some(disposition.clone());

        tracing::debug!(
            target: log_channels::BACKEND,
            "worker {id}: [{}] {:?}",
            envelope.queued_id,
            disposition
        );
        if result.send(disposition).is_err() {
            tracing::warn!(
                target: log_channels::BACKEND,
                "worker {id}: [{}] session gone before the end of the save chain",
                envelope.queued_id
            );
        }
    }
    tracing::debug!(target: log_channels::BACKEND, "worker {id} stopped");
}

/// The processing pipeline: a validate chain run inline by the sessions and a
/// save chain run by a bounded pool of workers.
///
/// A new backend configuration replaces the whole pipeline at once. Envelopes
/// already queued are saved by the chain they were queued with.
pub struct Backend {
    registry: std::sync::Arc<ProcessorRegistry>,
    pipeline: arc_swap::ArcSwapOption<Pipeline>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pipeline = self.pipeline.load();
        f.debug_struct("Backend")
            .field("registry", &self.registry)
            .field("config", &pipeline.as_ref().map(|p| &p.config))
            .finish()
    }
}

impl Backend {
    /// Build the chains and start the workers, must be called within a tokio runtime
    ///
    /// # Errors
    ///
    /// * see [`Backend::check`]
    pub fn new(
        registry: std::sync::Arc<ProcessorRegistry>,
        config: &BackendConfig,
    ) -> Result<Self, BackendError> {
        let pipeline = Pipeline::start(&registry, config)?;
        Ok(Self {
            registry,
            pipeline: arc_swap::ArcSwapOption::from_pointee(pipeline),
        })
    }

    /// Resolve every name of both chains without starting anything
    ///
    /// # Errors
    ///
    /// * the pipeline keys are ill-formed
    /// * a processor is unknown or refuses the configuration
    pub fn check(registry: &ProcessorRegistry, config: &BackendConfig) -> Result<(), BackendError> {
        Pipeline::resolve(registry, config).map(|_| ())
    }

    /// Replace the pipeline with one built from `config`, on error the current one is kept
    ///
    /// # Errors
    ///
    /// * see [`Backend::check`]
    pub fn reconfigure(&self, config: &BackendConfig) -> Result<(), BackendError> {
        let pipeline = Pipeline::start(&self.registry, config)?;
        // the previous queue closes with its last reference, its workers
        // finish what is queued and stop
        self.pipeline.store(Some(std::sync::Arc::new(pipeline)));
        Ok(())
    }

    /// Pipeline keys currently in use, `None` once shut down
    #[must_use]
    pub fn config(&self) -> Option<GatewayConfig> {
        self.pipeline.load().as_ref().map(|p| p.config.clone())
    }

    /// Where the validate chain runs, `None` when there is no validate chain
    #[must_use]
    pub fn validate_at(&self) -> Option<ValidateAt> {
        self.pipeline
            .load()
            .as_ref()
            .filter(|p| !p.validate.is_empty())
            .map(|p| p.config.validate_at)
    }

    /// names of the validate and save chains currently in use
    #[must_use]
    pub fn chain_names(&self) -> Option<(Vec<String>, Vec<String>)> {
        self.pipeline.load().as_ref().map(|p| {
            (
                p.validate.names().map(str::to_string).collect(),
                p.save.names().map(str::to_string).collect(),
            )
        })
    }

    /// Run the validate chain on the session's task.
    ///
    /// An empty chain accepts, a chain running over `gw_val_rcpt_timeout` is a
    /// temporary failure.
    pub async fn run_validate(&self, task: Task, envelope: &mut Envelope) -> Disposition {
        let pipeline = match self.pipeline.load_full() {
            Some(pipeline) => pipeline,
            None => return Disposition::TemporaryFailure(SMTPReplyCode::ShuttingDown.reply()),
        };
        if pipeline.validate.is_empty() {
            return Disposition::Accepted {
                queued_as: envelope.queued_id.clone(),
            };
        }

        let chain = pipeline.validate.clone();
        let timeout = pipeline.config.validate_timeout;
        drop(pipeline);

        tokio::time::timeout(timeout, chain.run(task, envelope))
            .await
            .unwrap_or_else(|_| {
                Disposition::TemporaryFailure(Reply::temporary_failure("validation timeout"))
            })
    }

    /// Queue `envelope` for the save chain and wait for its disposition.
    ///
    /// # Errors
    ///
    /// * [`BackendError::QueueFull`] when no slot is left in the queue
    /// * [`BackendError::Closed`] after [`Backend::shutdown`]
    pub async fn submit(&self, envelope: Envelope) -> Result<Disposition, BackendError> {
        let pipeline = self.pipeline.load_full().ok_or(BackendError::Closed)?;
        let (sender, receiver) = tokio::sync::oneshot::channel();

        pipeline
            .queue
            .try_send(Job {
                envelope,
                chain: pipeline.save.clone(),
                result: sender,
            })
            .map_err(|e| match e {
                tokio::sync::mpsc::error::TrySendError::Full(_) => BackendError::QueueFull,
                tokio::sync::mpsc::error::TrySendError::Closed(_) => BackendError::Closed,
            })?;

        // a job still queued when the timeout expires is dropped by its worker,
        // one already in the save chain runs to its end
        let timeout = pipeline.config.save_timeout;
        drop(pipeline);

        Ok(match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(disposition)) => disposition,
            Ok(Err(_)) => {
                Disposition::TemporaryFailure(Reply::temporary_failure("transaction failed"))
            }
            Err(_) => {
                Disposition::TemporaryFailure(Reply::temporary_failure("transaction timeout"))
            }
        })
    }

    /// Stop accepting envelopes and wait at most `grace` for the queued ones
    pub async fn shutdown(&self, grace: std::time::Duration) {
        let pipeline = match self.pipeline.swap(None) {
            Some(pipeline) => pipeline,
            None => return,
        };
        let workers = std::mem::take(
            &mut *pipeline
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        drop(pipeline);

        let deadline = tokio::time::Instant::now() + grace;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                tracing::warn!(
                    target: log_channels::BACKEND,
                    "a worker did not stop within {:?}, aborting it",
                    grace
                );
                worker.abort();
            }
        }
        tracing::info!(target: log_channels::BACKEND, "backend stopped");
    }
}
