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
use crate::{processors, BackendError, Processor, ProcessorFactory};
use maild_config::BackendConfig;

/// Mapping from a stage name to the factory of its processor.
///
/// Names are case-insensitive. The registry is filled before the daemon
/// starts and shared read-only afterward.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: std::collections::BTreeMap<String, ProcessorFactory>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl ProcessorRegistry {
    /// A registry without any processor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `headersparser`, `debugger`, `hasher` and `header`
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("HeadersParser", |_| {
            Ok(std::sync::Arc::new(processors::HeadersParser))
        });
        registry.register("Debugger", |config: &BackendConfig| {
            Ok(std::sync::Arc::new(processors::Debugger::new(config)))
        });
        registry.register("Hasher", |_| Ok(std::sync::Arc::new(processors::Hasher)));
        registry.register("Header", |config: &BackendConfig| {
            Ok(std::sync::Arc::new(processors::Header::new(config)))
        });
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendConfig) -> Result<std::sync::Arc<dyn Processor>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        let key = name.trim().to_ascii_lowercase();
        if self
            .factories
            .insert(key, std::sync::Arc::new(factory))
            .is_some()
        {
            tracing::debug!(target: crate::log_channels::BACKEND, "processor '{name}' replaced");
        }
    }

    /// Register a processor which does not depend on the configuration
    pub fn register_instance(&mut self, name: &str, processor: std::sync::Arc<dyn Processor>) {
        self.register(name, move |_| Ok(processor.clone()));
    }

    /// Build the processor registered under `name`
    ///
    /// # Errors
    ///
    /// * [`BackendError::UnknownProcessor`]
    /// * the error of the factory
    pub fn build(
        &self,
        name: &str,
        config: &BackendConfig,
    ) -> Result<std::sync::Arc<dyn Processor>, BackendError> {
        let factory = self
            .factories
            .get(&name.trim().to_ascii_lowercase())
            .ok_or_else(|| BackendError::UnknownProcessor(name.to_string()))?;
        factory(config)
    }

    ///
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .contains_key(&name.trim().to_ascii_lowercase())
    }

    /// registered names, lower-cased
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
