//! Connector manager facade
//!
//! [`ConnectorManager`] wires the instance store, connector types, task
//! executor, load managers, pusher, coordinator registry and change detector
//! together, and drives the two background tickers:
//!
//! - the traversal ticker, which offers every coordinator a chance to start
//!   a batch
//! - the change ticker, which diffs the store inventory and routes the
//!   differences into coordinators
//!
//! Admin commands use a manager without calling [`ConnectorManager::start`];
//! their mutations reach a running process through its change ticker.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::change::{ChangeDetector, ChangeHandler};
use crate::config::{Config, StoreBackend};
use crate::connector::plugin::Properties;
use crate::connector::{ConnectorError, LoggingPusher, Pusher, TypeRegistry};
use crate::coordinator::{
    ConfigureResponse, ConnectorCoordinator, ConnectorStatus, CoordinatorContext,
    CoordinatorRegistry, RegistryStats,
};
use crate::error::{Error, Result};
use crate::executor::TaskExecutor;
use crate::metrics;
use crate::scheduler::{HostLoadManagerFactory, Schedule};
use crate::storage::{MemoryStore, SharedStore, SqliteStore};
use crate::utils::{SharedClock, SystemClock};

/// Locale passed to connector validation when the caller has none
pub const DEFAULT_LOCALE: &str = "en";

/// Outcome of [`ConnectorManager::initialize`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializeReport {
    /// Instances brought up from the store
    pub loaded: usize,

    /// Instances whose configuration could not be instantiated
    pub failed: Vec<String>,
}

/// Process-wide connector manager
pub struct ConnectorManager {
    config: Config,
    context: Arc<CoordinatorContext>,
    registry: Arc<CoordinatorRegistry>,
    detector: Arc<ChangeDetector>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectorManager {
    /// Build a manager from configuration.
    ///
    /// Opens the configured store, enables the connector types named by the
    /// plugin manifest and uses the logging pusher and the system clock.
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let store: SharedStore = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&config.store.sqlite_path).map_err(|e| {
                    Error::Other {
                        context: format!(
                            "Failed to open store at {}",
                            config.store.sqlite_path.display()
                        ),
                        source: Some(e.into()),
                    }
                })?;
                Arc::new(store)
            }
        };

        let types = TypeRegistry::from_manifest(&config.plugins, TypeRegistry::builtin_catalog())?;

        Self::from_parts(
            config,
            store,
            types,
            Arc::new(LoggingPusher::new()),
            Arc::new(SystemClock),
        )
    }

    /// Build a manager from explicit collaborators
    pub fn from_parts(
        config: Config,
        store: SharedStore,
        types: TypeRegistry,
        pusher: Arc<dyn Pusher>,
        clock: SharedClock,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(format!("{e:#}")))?;

        let executor = Arc::new(TaskExecutor::new(
            config.executor.max_workers,
            config.task_timeout(),
        ));
        let load_managers = Arc::new(HostLoadManagerFactory::new(
            clock.clone(),
            config.load_period(),
            config.load.batch_hint,
        ));

        let context = Arc::new(CoordinatorContext {
            types: Arc::new(types),
            store: store.clone(),
            executor,
            load_managers,
            pusher,
            clock,
            error_backoff: config.error_backoff(),
            changes: Arc::default(),
        });

        let registry = Arc::new(CoordinatorRegistry::new(context.clone()));
        let handler = Arc::new(ChangeHandler::new(registry.clone()));
        let detector = Arc::new(ChangeDetector::new(store, handler));
        let (shutdown, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            context,
            registry,
            detector,
            shutdown,
            shutdown_rx,
            tickers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.context
    }

    pub fn registry(&self) -> &Arc<CoordinatorRegistry> {
        &self.registry
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Bring up every instance persisted in the store.
    ///
    /// An instance that fails to load is logged and skipped; the others
    /// still come up. Afterwards the change detector adopts the current
    /// inventory so the loaded state is not reported again as changes.
    pub async fn initialize(&self) -> Result<InitializeReport> {
        let inventory = self.context.store.inventory()?;
        let mut report = InitializeReport::default();

        for name in inventory.keys() {
            let coordinator = self.registry.get_or_add(name).await;
            match coordinator.load_from_store().await {
                Ok(true) => report.loaded += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(connector = %name, error = %e, "Failed to load connector");
                    report.failed.push(name.clone());
                }
            }
        }

        self.detector.prime()?;
        self.refresh_gauge().await;

        tracing::info!(
            loaded = report.loaded,
            failed = report.failed.len(),
            "Connector manager initialized"
        );
        Ok(report)
    }

    /// Spawn the traversal and change tickers.
    ///
    /// Calling `start` on a manager that is already ticking does nothing.
    pub fn start(&self) {
        let mut tickers = self.tickers.lock().unwrap_or_else(|e| e.into_inner());
        if !tickers.is_empty() {
            tracing::warn!("Connector manager already started");
            return;
        }

        tickers.push(self.spawn_traversal_ticker());
        tickers.push(self.spawn_change_ticker());

        tracing::info!(
            traversal_interval = ?self.config.traversal_interval(),
            change_detect_interval = ?self.config.change_detect_interval(),
            "Connector manager started"
        );
    }

    /// Stop the tickers, shut every coordinator down and drain the executor.
    ///
    /// Returns whether every running batch ended within
    /// `shutdown_wait_secs`.
    pub async fn shutdown(&self) -> bool {
        tracing::info!("Shutting down connector manager");
        let _ = self.shutdown.send(true);

        let tickers: Vec<JoinHandle<()>> = {
            let mut tickers = self.tickers.lock().unwrap_or_else(|e| e.into_inner());
            tickers.drain(..).collect()
        };
        for ticker in tickers {
            if let Err(e) = ticker.await {
                tracing::warn!(error = %e, "Ticker task ended abnormally");
            }
        }

        self.registry.shutdown_all().await;
        let drained = self
            .context
            .executor
            .shutdown(true, self.config.shutdown_wait())
            .await;

        if !drained {
            tracing::warn!("Batches still running after shutdown wait");
        }
        drained
    }

    // ------------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------------

    /// Create (`update=false`) or replace (`update=true`) an instance's
    /// configuration.
    ///
    /// `type_name` may be omitted on update to keep the instance's current
    /// type.
    pub async fn set_connector_config(
        &self,
        name: &str,
        type_name: Option<&str>,
        properties: Properties,
        locale: &str,
        update: bool,
    ) -> Result<ConfigureResponse> {
        validate_name(name)?;
        let coordinator = self.registry.get_or_add(name).await;

        let type_name = match type_name {
            Some(type_name) => type_name.to_string(),
            None if update => coordinator
                .type_name()
                .await
                .ok_or_else(|| ConnectorError::not_found(name))?,
            None => return Err(Error::config("A connector type is required")),
        };

        let response = coordinator
            .set_connector_config(&type_name, properties, locale, update)
            .await?;

        self.refresh_gauge().await;
        Ok(response)
    }

    pub async fn remove_connector(&self, name: &str) -> Result<()> {
        self.existing(name).await?.remove_connector().await?;
        self.refresh_gauge().await;
        Ok(())
    }

    pub async fn set_schedule(&self, name: &str, schedule: Schedule) -> Result<()> {
        self.existing(name).await?.set_schedule(schedule).await?;
        Ok(())
    }

    pub async fn restart_connector_traversal(&self, name: &str) -> Result<()> {
        self.existing(name)
            .await?
            .restart_connector_traversal()
            .await?;
        Ok(())
    }

    pub async fn connector_status(&self, name: &str) -> Result<ConnectorStatus> {
        let status = match self.registry.get(name).await {
            Some(coordinator) => coordinator.status().await,
            None => None,
        };
        status.ok_or_else(|| ConnectorError::not_found(name).into())
    }

    /// Status of every configured instance, sorted by name
    pub async fn connector_statuses(&self) -> Vec<ConnectorStatus> {
        let mut statuses = Vec::new();
        for coordinator in self.registry.all().await {
            if let Some(status) = coordinator.status().await {
                statuses.push(status);
            }
        }
        statuses
    }

    pub async fn connector_names(&self) -> Vec<String> {
        self.registry.connector_names().await
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Offer every coordinator one `start_batch`; returns how many started
    pub async fn traverse_once(&self) -> usize {
        start_batches(&self.registry).await
    }

    /// Run one change detection pass; returns the number of events delivered
    pub async fn detect_changes(&self) -> Result<usize> {
        let delivered = self.detector.detect().await?;
        if delivered > 0 {
            self.refresh_gauge().await;
        }
        Ok(delivered)
    }

    async fn existing(&self, name: &str) -> Result<Arc<ConnectorCoordinator>> {
        match self.registry.get(name).await {
            Some(coordinator) if coordinator.exists().await => Ok(coordinator),
            _ => Err(ConnectorError::not_found(name).into()),
        }
    }

    async fn refresh_gauge(&self) {
        metrics::set_configured_connectors(self.registry.connector_names().await.len());
    }

    // ------------------------------------------------------------------------
    // Tickers
    // ------------------------------------------------------------------------

    fn spawn_traversal_ticker(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let period = self.config.traversal_interval();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let started = start_batches(&registry).await;
                        if started > 0 {
                            tracing::debug!(started, "Traversal tick");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Traversal ticker shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_change_ticker(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let detector = self.detector.clone();
        let changes = self.context.changes.clone();
        let period = self.config.change_detect_interval();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = changes.notified() => {}
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Change ticker shutting down");
                        break;
                    }
                }

                match detector.detect().await {
                    Ok(0) => {}
                    Ok(delivered) => {
                        tracing::debug!(delivered, "Change detection pass");
                        metrics::set_configured_connectors(
                            registry.connector_names().await.len(),
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "Change detection failed"),
                }
            }
        })
    }
}

async fn start_batches(registry: &CoordinatorRegistry) -> usize {
    let mut started = 0;
    for coordinator in registry.all().await {
        if coordinator.start_batch().await {
            started += 1;
        }
    }
    started
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::config("Connector name must not be empty"));
    }
    if name.contains(':') || name.starts_with('#') {
        return Err(Error::config(format!(
            "Connector name '{name}' may not contain ':' or start with '#'"
        )));
    }
    Ok(())
}
