//! The explicit state every action executes against.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::{ConfigError, EngineConfig, ModuleContext};
use crate::driver::{Driver, DriverError};
use crate::journal::Journal;
use crate::queue::QueuedDriver;
use crate::run_state::RunControl;
use crate::tree::{ElementTree, TreeOptions};
use crate::variables::VariableStore;

/// Tree, driver, variables, config and run control for one run.
///
/// The context starts with an empty generation-0 tree; the first refresh
/// produces generation 1. Every refresh replaces the tree wholesale.
pub struct ExecutionContext {
    tree: Arc<ElementTree>,
    driver: QueuedDriver,
    pub variables: VariableStore,
    config: EngineConfig,
    tree_options: TreeOptions,
    run: Arc<RunControl>,
    journal: Option<Journal>,
}

impl ExecutionContext {
    /// Wraps `driver` in a fresh command queue. Must be called inside a tokio runtime.
    pub fn new(
        driver: Arc<dyn Driver>,
        config: EngineConfig,
        run: Arc<RunControl>,
    ) -> Result<Self, ConfigError> {
        Self::with_queued_driver(QueuedDriver::new(driver), config, run)
    }

    /// Uses an existing queued driver, so several contexts can share one device queue.
    pub fn with_queued_driver(
        driver: QueuedDriver,
        config: EngineConfig,
        run: Arc<RunControl>,
    ) -> Result<Self, ConfigError> {
        let tree_options = TreeOptions::from_config(&config)?;
        Ok(Self {
            tree: Arc::new(ElementTree::empty(0)),
            driver,
            variables: VariableStore::new(),
            config,
            tree_options,
            run,
            journal: None,
        })
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// The live tree.
    pub fn tree(&self) -> &Arc<ElementTree> {
        &self.tree
    }

    /// Fetches a new snapshot and replaces the live tree with the next generation.
    pub async fn refresh_tree(&mut self) -> Result<Arc<ElementTree>, DriverError> {
        let snapshot = self.driver.source_tree().await?;
        let generation = self.tree.generation() + 1;
        let tree = Arc::new(ElementTree::build(&snapshot, &self.tree_options, generation));
        debug!(generation, elements = tree.len(), "tree refreshed");
        self.tree = tree.clone();
        Ok(tree)
    }

    pub fn driver(&self) -> &QueuedDriver {
        &self.driver
    }

    pub fn run_control(&self) -> &Arc<RunControl> {
        &self.run
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sets a config key. Sanitization and screen-height changes apply from the next refresh.
    pub fn set_config(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        config.set(key, value)?;
        self.tree_options = TreeOptions::from_config(&config)?;
        self.config = config;
        Ok(())
    }

    pub fn module_context(&self) -> &ModuleContext {
        self.config.module_context()
    }

    pub(crate) fn set_module_context(&mut self, context: ModuleContext) {
        self.config.set_module_context(context);
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("generation", &self.tree.generation())
            .field("driver", &self.driver)
            .field("variables", &self.variables.len())
            .field("run_state", &self.run.state())
            .finish()
    }
}
