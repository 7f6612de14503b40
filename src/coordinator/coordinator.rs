//! Per-instance coordinator
//!
//! A [`ConnectorCoordinator`] owns everything about one named connector
//! instance: its backing connector, cached schedule and checkpoint, delay
//! state, load manager, and the batch currently running. Every mutation and
//! every batch decision for the instance goes through its mutex. The mutex
//! is never held while a batch executes and is always released before the
//! change notification goes out.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use super::status::{ConnectorState, ConnectorStatus};
use super::traversal::{BatchReport, TraversalTask};
use crate::connector::plugin::{Properties, TrialFactory};
use crate::connector::{
    Connector, ConnectorError, ConnectorResult, Pusher, TypeRegistry, ValidationOutcome,
};
use crate::executor::{TaskExecutor, TaskHandle};
use crate::metrics;
use crate::scheduler::{
    BatchResult, DelayPolicy, LoadManager, LoadManagerFactory, Schedule, ScheduleError,
};
use crate::storage::{SharedStore, StoredConfiguration};
use crate::utils::SharedClock;

// ============================================================================
// Shared Context
// ============================================================================

/// Collaborators shared by every coordinator of a process
pub struct CoordinatorContext {
    pub types: Arc<TypeRegistry>,
    pub store: SharedStore,
    pub executor: Arc<TaskExecutor>,
    pub load_managers: Arc<dyn LoadManagerFactory>,
    pub pusher: Arc<dyn Pusher>,
    pub clock: SharedClock,

    /// Delay applied after a batch ends with the `Error` policy
    pub error_backoff: Duration,

    /// Signalled after every local mutation of persisted state
    pub changes: Arc<Notify>,
}

/// Answer to a configuration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureResponse {
    /// Configuration validated and installed
    Applied,

    /// Configuration refused by the connector type; nothing changed
    Rejected {
        message: String,
        suggested: Option<Properties>,
    },
}

impl ConfigureResponse {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Applied => None,
            Self::Rejected { message, .. } => Some(message),
        }
    }
}

// ============================================================================
// Coordinator State
// ============================================================================

struct Instance {
    config: StoredConfiguration,
    connector: Arc<dyn Connector>,
}

struct RunningBatch {
    batch_id: u64,
    handle: TaskHandle,
}

struct CoordinatorState {
    instance: Option<Instance>,
    schedule: Option<Schedule>,
    checkpoint: Option<String>,
    delay_until: Option<DateTime<Utc>>,
    load_manager: Box<dyn LoadManager>,
    running: Option<RunningBatch>,
    next_batch_id: u64,
    terminated: bool,
}

impl CoordinatorState {
    fn batch_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.handle.is_done())
    }

    fn cancel_batch(&mut self, name: &str) {
        if let Some(running) = self.running.take() {
            if !running.handle.is_done() {
                tracing::debug!(
                    connector = %name,
                    batch = running.batch_id,
                    "Canceling running batch"
                );
            }
            running.handle.cancel();
        }
    }

    fn install_schedule(&mut self, schedule: Schedule) {
        self.load_manager.set_load(schedule.load());
        self.schedule = Some(schedule);
    }

    fn clear(&mut self) {
        self.instance = None;
        self.schedule = None;
        self.checkpoint = None;
        self.delay_until = None;
    }
}

// ============================================================================
// Connector Coordinator
// ============================================================================

/// Synchronization point for one connector instance
pub struct ConnectorCoordinator {
    name: String,
    context: Arc<CoordinatorContext>,
    this: Weak<ConnectorCoordinator>,
    state: Mutex<CoordinatorState>,
}

impl ConnectorCoordinator {
    /// Create an unconfigured coordinator
    pub fn new(name: impl Into<String>, context: Arc<CoordinatorContext>) -> Arc<Self> {
        let name = name.into();
        let load_manager = context.load_managers.create(&name);

        Arc::new_cyclic(|this| Self {
            name,
            context,
            this: this.clone(),
            state: Mutex::new(CoordinatorState {
                instance: None,
                schedule: None,
                checkpoint: None,
                delay_until: None,
                load_manager,
                running: None,
                next_batch_id: 1,
                terminated: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the instance is configured
    pub async fn exists(&self) -> bool {
        self.state.lock().await.instance.is_some()
    }

    pub async fn type_name(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.instance.as_ref().map(|i| i.config.type_name.clone())
    }

    pub async fn configuration(&self) -> Option<StoredConfiguration> {
        let state = self.state.lock().await;
        state.instance.as_ref().map(|i| i.config.clone())
    }

    pub async fn schedule(&self) -> Option<Schedule> {
        self.state.lock().await.schedule.clone()
    }

    pub async fn checkpoint(&self) -> Option<String> {
        self.state.lock().await.checkpoint.clone()
    }

    pub async fn is_batch_running(&self) -> bool {
        self.state.lock().await.batch_running()
    }

    /// Status snapshot, or `None` when unconfigured
    pub async fn status(&self) -> Option<ConnectorStatus> {
        let state = self.state.lock().await;
        let instance = state.instance.as_ref()?;
        let now = self.context.clock.now();

        let delay_until = state.delay_until.filter(|until| now < *until);
        let connector_state = if state.batch_running() {
            ConnectorState::Running
        } else if state.schedule.as_ref().map_or(true, Schedule::is_disabled) {
            ConnectorState::Disabled
        } else if delay_until.is_some() {
            ConnectorState::Delayed
        } else {
            ConnectorState::Idle
        };

        Some(ConnectorStatus {
            name: self.name.clone(),
            type_name: instance.config.type_name.clone(),
            state: connector_state,
            schedule: state.schedule.as_ref().map(Schedule::to_string),
            has_checkpoint: state.checkpoint.is_some(),
            delay_until,
        })
    }

    // ------------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------------

    /// Validate and install a configuration.
    ///
    /// `update=false` creates and fails with `AlreadyExists` if configured;
    /// `update=true` replaces and fails with `NotFound` if not. A rejection
    /// by the connector type is returned as [`ConfigureResponse::Rejected`]
    /// and leaves the coordinator untouched.
    pub async fn set_connector_config(
        &self,
        type_name: &str,
        properties: Properties,
        locale: &str,
        update: bool,
    ) -> ConnectorResult<ConfigureResponse> {
        {
            let mut state = self.state.lock().await;

            match (update, state.instance.as_ref()) {
                (false, Some(_)) => return Err(ConnectorError::already_exists(&self.name)),
                (true, None) => return Err(ConnectorError::not_found(&self.name)),
                _ => {}
            }

            let connector_type = self.context.types.require(type_name)?;
            let factory = TrialFactory::new(connector_type.as_ref(), &self.name);

            let properties =
                match connector_type.validate_config(&properties, locale, &factory)? {
                    ValidationOutcome::Accepted(properties) => properties,
                    ValidationOutcome::Rejected { message, suggested } => {
                        tracing::info!(connector = %self.name, %message, "Configuration rejected");
                        return Ok(ConfigureResponse::Rejected { message, suggested });
                    }
                };

            let instance_xml = state
                .instance
                .as_ref()
                .and_then(|i| i.config.instance_xml.clone());
            let config = StoredConfiguration {
                type_name: type_name.to_string(),
                properties,
                instance_xml,
            };
            let connector = connector_type.instantiate(&self.name, &config)?;

            let (schedule, persist_schedule) = match (&state.schedule, update) {
                (Some(schedule), true) => (schedule.clone(), false),
                _ => match self.context.store.get_schedule(&self.name)? {
                    Some(schedule) => (schedule, false),
                    None => (Schedule::default_for(&self.name), true),
                },
            };
            let checkpoint = if update {
                state.checkpoint.clone()
            } else {
                self.context.store.get_checkpoint(&self.name)?
            };

            // The schedule goes first: without a configuration it is not
            // part of the inventory.
            if persist_schedule {
                self.context.store.set_schedule(&self.name, &schedule)?;
            }
            if let Err(e) = self.context.store.set_configuration(&self.name, &config) {
                if persist_schedule {
                    if let Err(undo) = self.context.store.remove_schedule(&self.name) {
                        tracing::warn!(
                            connector = %self.name,
                            error = %undo,
                            "Failed to remove default schedule"
                        );
                    }
                }
                return Err(e.into());
            }

            state.cancel_batch(&self.name);
            if let Some(old) = state.instance.take() {
                self.release(old, false).await;
            }
            state.checkpoint = checkpoint;
            state.instance = Some(Instance { config, connector });
            state.install_schedule(schedule);
            state.delay_until = None;
            state.terminated = false;

            tracing::info!(connector = %self.name, type_name, update, "Connector configured");
        }

        self.notify_changed();
        Ok(ConfigureResponse::Applied)
    }

    /// Replace the schedule
    pub async fn set_schedule(&self, schedule: Schedule) -> ConnectorResult<()> {
        if schedule.connector_name() != self.name {
            return Err(ScheduleError::NameMismatch {
                expected: self.name.clone(),
                found: schedule.connector_name().to_string(),
            }
            .into());
        }

        {
            let mut state = self.state.lock().await;
            if state.instance.is_none() {
                return Err(ConnectorError::not_found(&self.name));
            }

            self.context.store.set_schedule(&self.name, &schedule)?;
            tracing::info!(connector = %self.name, schedule = %schedule, "Schedule updated");
            state.install_schedule(schedule);
            state.delay_until = None;
        }

        self.notify_changed();
        Ok(())
    }

    /// Start a batch if the instance is eligible right now.
    ///
    /// Returns whether a batch was submitted.
    pub async fn start_batch(&self) -> bool {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let Some(instance) = state.instance.as_ref() else {
            return false;
        };
        if state.batch_running() {
            return false;
        }

        let now = self.context.clock.now();
        if state.delay_until.is_some_and(|until| now < until) {
            return false;
        }

        let Some(schedule) = state.schedule.as_ref() else {
            return false;
        };
        if schedule.is_disabled() {
            return false;
        }
        if state.load_manager.should_delay() {
            return false;
        }
        if !schedule.should_run(self.context.clock.hour_of_day()) {
            return false;
        }

        let batch_size = state.load_manager.determine_batch_size();
        if !batch_size.allows_traversal() {
            return false;
        }

        let batch_id = state.next_batch_id;
        let task = TraversalTask::new(
            batch_id,
            &self.name,
            self.this.clone(),
            instance.connector.clone(),
            self.context.pusher.clone(),
            self.context.clock.clone(),
            state.checkpoint.clone(),
            batch_size,
        );

        let Some(handle) = self.context.executor.submit(Arc::new(task)) else {
            tracing::debug!(connector = %self.name, "Executor is shut down; batch not started");
            return false;
        };

        state.next_batch_id += 1;
        state.delay_until = None;
        state.running = Some(RunningBatch { batch_id, handle });
        metrics::record_batch_started(&self.name);

        true
    }

    /// Apply a batch outcome to the load manager and the delay state
    pub async fn record_result(&self, result: &BatchResult) {
        let persisted = {
            let mut state = self.state.lock().await;
            self.apply_result(&mut state, result)
        };

        if persisted {
            self.notify_changed();
        }
    }

    /// Cancel any batch, forget the checkpoint, and re-enable a paused
    /// run-once schedule
    pub async fn restart_connector_traversal(&self) -> ConnectorResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.instance.is_none() {
                return Err(ConnectorError::not_found(&self.name));
            }

            state.cancel_batch(&self.name);
            self.context.store.remove_checkpoint(&self.name)?;
            state.checkpoint = None;
            state.delay_until = None;

            if let Some(schedule) = state.schedule.clone() {
                if schedule.is_paused_run_once() {
                    let enabled = schedule.with_disabled(false);
                    self.context.store.set_schedule(&self.name, &enabled)?;
                    state.install_schedule(enabled);
                    tracing::info!(connector = %self.name, "Re-enabled run-once schedule");
                }
            }

            tracing::info!(connector = %self.name, "Traversal restarted");
        }

        self.notify_changed();
        Ok(())
    }

    /// Delete the instance and all persisted state
    pub async fn remove_connector(&self) -> ConnectorResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.instance.is_none() {
                return Err(ConnectorError::not_found(&self.name));
            }

            state.cancel_batch(&self.name);
            self.context.store.remove_instance(&self.name)?;

            if let Some(instance) = state.instance.take() {
                self.release(instance, true).await;
            }
            state.clear();

            tracing::info!(connector = %self.name, "Connector removed");
        }

        self.notify_changed();
        Ok(())
    }

    /// Stop the instance for process shutdown; persisted state is kept
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.terminated = true;
        state.cancel_batch(&self.name);

        if let Some(instance) = state.instance.take() {
            self.release(instance, false).await;
            tracing::debug!(connector = %self.name, "Connector shut down");
        }
        state.clear();
    }

    // ------------------------------------------------------------------------
    // Change entry points
    // ------------------------------------------------------------------------

    /// Bring the instance up from the store.
    ///
    /// Returns `Ok(false)` when nothing is persisted under this name.
    pub async fn load_from_store(&self) -> ConnectorResult<bool> {
        match self.context.store.get_configuration(&self.name)? {
            Some(config) => {
                self.connector_added(config).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// An instance appeared in the store
    pub async fn connector_added(&self, config: StoredConfiguration) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        if state.terminated {
            return Ok(());
        }
        if state.instance.as_ref().is_some_and(|i| i.config == config) {
            return Ok(());
        }

        let connector = self.instantiate(&config)?;
        let schedule = self
            .context
            .store
            .get_schedule(&self.name)?
            .unwrap_or_else(|| Schedule::default_for(&self.name));
        let checkpoint = self.context.store.get_checkpoint(&self.name)?;

        state.cancel_batch(&self.name);
        if let Some(old) = state.instance.take() {
            self.release(old, false).await;
        }
        state.instance = Some(Instance { config, connector });
        state.install_schedule(schedule);
        state.checkpoint = checkpoint;
        state.delay_until = None;

        tracing::info!(connector = %self.name, "Connector loaded from store");
        Ok(())
    }

    /// The instance disappeared from the store
    pub async fn connector_removed(&self) {
        let mut state = self.state.lock().await;
        let Some(instance) = state.instance.take() else {
            return;
        };

        state.cancel_batch(&self.name);
        self.release(instance, false).await;
        state.clear();

        tracing::info!(connector = %self.name, "Connector removed externally");
    }

    /// The persisted checkpoint changed.
    ///
    /// The event payload may be older than the store by the time it is
    /// delivered, so the store is consulted again under the lock.
    pub async fn checkpoint_changed(&self, observed: Option<String>) {
        let mut state = self.state.lock().await;
        if state.instance.is_none() {
            return;
        }

        let checkpoint = match self.context.store.get_checkpoint(&self.name) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(connector = %self.name, error = %e, "Failed to re-read checkpoint");
                return;
            }
        };
        if state.checkpoint == checkpoint {
            if checkpoint != observed {
                tracing::debug!(connector = %self.name, "Ignoring stale checkpoint event");
            }
            return;
        }

        // The running batch started from the old position
        state.cancel_batch(&self.name);
        state.checkpoint = checkpoint;
        state.delay_until = None;

        tracing::info!(connector = %self.name, "Checkpoint changed externally");
    }

    /// The persisted configuration changed
    pub async fn configuration_changed(&self, config: StoredConfiguration) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        if state.instance.is_none() {
            drop(state);
            return self.connector_added(config).await;
        }
        if state.instance.as_ref().is_some_and(|i| i.config == config) {
            return Ok(());
        }

        let connector = self.instantiate(&config)?;

        state.cancel_batch(&self.name);
        if let Some(old) = state.instance.take() {
            self.release(old, false).await;
        }
        state.instance = Some(Instance { config, connector });
        state.delay_until = None;

        tracing::info!(connector = %self.name, "Configuration changed externally");
        Ok(())
    }

    /// The persisted schedule changed; `None` falls back to the default
    pub async fn schedule_changed(&self, schedule: Option<Schedule>) {
        let mut state = self.state.lock().await;
        if state.instance.is_none() {
            return;
        }

        let schedule = schedule.unwrap_or_else(|| Schedule::default_for(&self.name));
        if state.schedule.as_ref() == Some(&schedule) {
            return;
        }

        tracing::info!(connector = %self.name, schedule = %schedule, "Schedule changed externally");
        state.install_schedule(schedule);
        state.delay_until = None;
    }

    // ------------------------------------------------------------------------
    // Batch callbacks
    // ------------------------------------------------------------------------

    pub(crate) async fn finish_batch(&self, batch_id: u64, report: BatchReport) {
        let persisted = {
            let mut state = self.state.lock().await;

            match state.running.as_ref() {
                Some(running) if running.batch_id == batch_id && !running.handle.is_canceled() => {}
                _ => {
                    tracing::debug!(
                        connector = %self.name,
                        batch = batch_id,
                        "Ignoring stale batch result"
                    );
                    return;
                }
            }
            state.running = None;

            let mut result = report.result;
            let mut persisted = false;

            if let Some(checkpoint) = report.checkpoint {
                match self.context.store.set_checkpoint(&self.name, &checkpoint) {
                    Ok(()) => {
                        state.checkpoint = Some(checkpoint);
                        persisted = true;
                    }
                    Err(e) => {
                        tracing::error!(
                            connector = %self.name,
                            error = %e,
                            "Failed to persist checkpoint"
                        );
                        result.policy = DelayPolicy::Error;
                    }
                }
            }

            tracing::debug!(
                connector = %self.name,
                batch = batch_id,
                documents = result.documents,
                policy = %result.policy,
                "Batch completed"
            );

            self.apply_result(&mut state, &result) || persisted
        };

        if persisted {
            self.notify_changed();
        }
    }

    pub(crate) async fn batch_timed_out(&self, batch_id: u64) {
        let persisted = {
            let mut state = self.state.lock().await;
            match state.running.take() {
                Some(running) if running.batch_id == batch_id => {
                    running.handle.cancel();
                }
                other => {
                    state.running = other;
                    return;
                }
            }

            tracing::warn!(connector = %self.name, batch = batch_id, "Batch timed out");
            let result = BatchResult::empty(DelayPolicy::Error, self.context.clock.now());
            self.apply_result(&mut state, &result)
        };

        if persisted {
            self.notify_changed();
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Returns whether persisted state changed
    fn apply_result(&self, state: &mut CoordinatorState, result: &BatchResult) -> bool {
        state.load_manager.record_result(result);
        metrics::record_batch_completed(&self.name, result.policy);

        let now = self.context.clock.now();
        match result.policy {
            DelayPolicy::Immediate => {
                state.delay_until = None;
                false
            }
            DelayPolicy::Poll => {
                let Some(schedule) = state.schedule.clone() else {
                    return false;
                };

                if schedule.is_polling_disabled() {
                    if schedule.is_disabled() {
                        return false;
                    }
                    let paused = schedule.with_disabled(true);
                    if let Err(e) = self.context.store.set_schedule(&self.name, &paused) {
                        tracing::error!(
                            connector = %self.name,
                            error = %e,
                            "Failed to persist paused schedule"
                        );
                    }
                    state.install_schedule(paused);
                    tracing::info!(connector = %self.name, "Traversal complete; schedule paused");
                    true
                } else {
                    if let Some(delay) = schedule.retry_delay() {
                        state.delay_until = Some(now + to_chrono(delay));
                        tracing::debug!(
                            connector = %self.name,
                            retry_ms = schedule.retry_delay_millis(),
                            "Repository drained; polling later"
                        );
                    }
                    false
                }
            }
            DelayPolicy::Error => {
                state.delay_until = Some(now + to_chrono(self.context.error_backoff));
                tracing::info!(
                    connector = %self.name,
                    backoff_secs = self.context.error_backoff.as_secs(),
                    "Batch failed; backing off"
                );
                false
            }
        }
    }

    fn instantiate(&self, config: &StoredConfiguration) -> ConnectorResult<Arc<dyn Connector>> {
        let connector_type = self
            .context
            .types
            .get(&config.type_name)
            .ok_or_else(|| {
                ConnectorError::misconfigured(
                    &self.name,
                    format!("unknown connector type '{}'", config.type_name),
                )
            })?;

        connector_type
            .instantiate(&self.name, config)
            .map_err(|e| ConnectorError::misconfigured(&self.name, e.to_string()))
    }

    async fn release(&self, instance: Instance, delete: bool) {
        let Some(lifecycle) = instance.connector.lifecycle() else {
            return;
        };

        let result = if delete {
            lifecycle.delete().await
        } else {
            lifecycle.shutdown().await
        };

        if let Err(e) = result {
            tracing::warn!(
                connector = %self.name,
                error = %e,
                "Connector failed to release resources"
            );
        }
    }

    fn notify_changed(&self) {
        self.context.changes.notify_one();
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
