//! Name → factory maps for connectors, gatherers and extensions.

use crate::config::{AwpConfig, ConfigError, GathererConfig};
use crate::connectors::memory::MemoryConnector;
use crate::connectors::sqlite::SqliteConnector;
use crate::connectors::{Connector, EnvVars};
use crate::extensions::budgets::{self, BudgetsExtension};
use crate::extensions::Extension;
use crate::gatherers::psi::{self, PsiGatherer};
use crate::gatherers::webpagetest::{self, WebPageTestGatherer};
use crate::gatherers::Gatherer;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ConnectorFactory =
    Arc<dyn Fn(&AwpConfig) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync>;
pub type GathererFactory =
    Arc<dyn Fn(&GathererConfig, &EnvVars) -> Result<Arc<dyn Gatherer>, ConfigError> + Send + Sync>;
pub type ExtensionFactory = Arc<dyn Fn() -> Arc<dyn Extension> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    connectors: BTreeMap<String, ConnectorFactory>,
    gatherers: BTreeMap<String, GathererFactory>,
    extensions: BTreeMap<String, ExtensionFactory>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every plug-in shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_connector("memory", |config: &AwpConfig| {
            Ok(Arc::new(MemoryConnector::new(
                Vec::new(),
                config.connector.env_vars.clone(),
            )) as Arc<dyn Connector>)
        });
        registry.register_connector("sqlite", |config: &AwpConfig| {
            let connector = SqliteConnector::open(&config.connector.path)?;
            connector.seed_env_vars(&config.connector.env_vars)?;
            Ok(Arc::new(connector) as Arc<dyn Connector>)
        });
        registry.register_gatherer(psi::NAME, |config: &GathererConfig, env: &EnvVars| {
            Ok(Arc::new(PsiGatherer::new(config, env)?) as Arc<dyn Gatherer>)
        });
        registry.register_gatherer(webpagetest::NAME, |config: &GathererConfig, env: &EnvVars| {
            Ok(Arc::new(WebPageTestGatherer::new(config, env)?) as Arc<dyn Gatherer>)
        });
        registry.register_extension(budgets::NAME, || {
            Arc::new(BudgetsExtension::new()) as Arc<dyn Extension>
        });
        registry
    }

    pub fn register_connector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&AwpConfig) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        self.connectors.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_gatherer<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&GathererConfig, &EnvVars) -> Result<Arc<dyn Gatherer>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.gatherers.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_extension<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Extension> + Send + Sync + 'static,
    {
        self.extensions.insert(name.to_string(), Arc::new(factory));
    }

    /// Fail fast on any name the config refers to that is not registered.
    pub fn check(&self, config: &AwpConfig) -> Result<(), ConfigError> {
        if !self.connectors.contains_key(&config.engine.connector) {
            return Err(ConfigError::UnknownConnector(config.engine.connector.clone()));
        }
        if let Some(ds) = config
            .engine
            .data_sources
            .iter()
            .find(|ds| !self.gatherers.contains_key(*ds))
        {
            return Err(ConfigError::UnknownGatherer(ds.clone()));
        }
        if let Some(ext) = config
            .engine
            .extensions
            .iter()
            .find(|ext| !self.extensions.contains_key(*ext))
        {
            return Err(ConfigError::UnknownExtension(ext.clone()));
        }
        Ok(())
    }

    pub fn connector(&self, config: &AwpConfig) -> anyhow::Result<Arc<dyn Connector>> {
        let name = &config.engine.connector;
        let factory = self
            .connectors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownConnector(name.clone()))?;
        factory(config)
    }

    pub fn gatherer(
        &self,
        name: &str,
        config: &GathererConfig,
        env: &EnvVars,
    ) -> Result<Arc<dyn Gatherer>, ConfigError> {
        let factory = self
            .gatherers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownGatherer(name.to_string()))?;
        factory(config, env)
    }

    pub fn extension(&self, name: &str) -> Result<Arc<dyn Extension>, ConfigError> {
        let factory = self
            .extensions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownExtension(name.to_string()))?;
        Ok(factory())
    }
}
