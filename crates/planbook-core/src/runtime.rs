use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::CoreConfig;
use crate::constants::tables;
use crate::error::CoreError;
use crate::events::{CoreEvent, EnvSignal};
use crate::remote::{ChannelFilter, PostgrestStore, RemoteStore};
use crate::stats::SharedEventStats;
use crate::store::{
    PlanUpdater, PlanView, PriorityAssigner, SharedRegistry, TableHandle, TableRegistry,
};
use crate::sync::{SubscriptionManager, SyncCommand};

#[derive(Clone)]
pub struct CoreHandle {
    command_tx: UnboundedSender<SyncCommand>,
}

impl CoreHandle {
    pub fn send(&self, command: SyncCommand) -> Result<(), mpsc::error::SendError<SyncCommand>> {
        self.command_tx.send(command)
    }

    pub fn subscribe(&self) -> Result<(), mpsc::error::SendError<SyncCommand>> {
        self.send(SyncCommand::Subscribe)
    }

    pub fn environment(&self, signal: EnvSignal) -> Result<(), mpsc::error::SendError<SyncCommand>> {
        self.send(SyncCommand::Environment(signal))
    }
}

/// Owns the table registry, the remote store and the subscription task.
///
/// Everything runs on the current thread: [`CoreRuntime::start`] and the plan
/// updater spawn local tasks, so they must be called inside a
/// [`tokio::task::LocalSet`].
pub struct CoreRuntime {
    config: CoreConfig,
    store: Rc<dyn RemoteStore>,
    registry: SharedRegistry,
    handle: CoreHandle,
    command_rx: Option<UnboundedReceiver<SyncCommand>>,
    event_tx: UnboundedSender<CoreEvent>,
    event_rx: Option<UnboundedReceiver<CoreEvent>>,
    event_stats: SharedEventStats,
    worker: Option<JoinHandle<()>>,
}

impl CoreRuntime {
    pub fn new(config: CoreConfig, store: Rc<dyn RemoteStore>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            registry: TableRegistry::shared(),
            handle: CoreHandle { command_tx },
            command_rx: Some(command_rx),
            event_tx,
            event_rx: Some(event_rx),
            event_stats: SharedEventStats::new(),
            worker: None,
        }
    }

    /// Runtime against the hosted store described by `config`.
    pub fn connect(config: CoreConfig) -> Result<Self, CoreError> {
        config.validate_remote()?;
        let store = PostgrestStore::new(&config).map_err(|e| CoreError::Config {
            message: format!("failed to build HTTP client: {}", e),
        })?;
        Ok(Self::new(config, Rc::new(store)))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn store(&self) -> Rc<dyn RemoteStore> {
        self.store.clone()
    }

    pub fn event_stats(&self) -> SharedEventStats {
        self.event_stats.clone()
    }

    pub fn take_event_rx(&mut self) -> Option<UnboundedReceiver<CoreEvent>> {
        self.event_rx.take()
    }

    pub fn table(&self, name: &str) -> TableHandle {
        TableHandle::new(self.store.clone(), self.registry.clone(), name)
    }

    pub fn plans(&self) -> TableHandle {
        self.table(tables::PLANS)
    }

    pub fn plan_dependencies(&self) -> TableHandle {
        self.table(tables::PLAN_DEPENDENCIES)
    }

    /// Fetch both plan tables unless they have been fetched already.
    pub async fn ensure_plans_fetched(&self) -> Result<(), CoreError> {
        self.plans().ensure_fetched().await?;
        self.plan_dependencies().ensure_fetched().await?;
        Ok(())
    }

    /// Snapshot of the current plan cache.
    pub fn plan_view(&self) -> PlanView {
        PlanView::from_registry(&self.registry.borrow())
    }

    pub fn priority_assigner(&self) -> PriorityAssigner {
        PriorityAssigner::new(&self.plan_view())
    }

    pub fn plan_updater(&self) -> PlanUpdater {
        PlanUpdater::new(
            self.plans(),
            self.event_tx.clone(),
            Duration::from_millis(self.config.debounce_ms),
        )
    }

    /// Spawn the subscription task and ask it to open the change channel.
    /// Calling this twice has no effect.
    pub fn start(&mut self) {
        let Some(command_rx) = self.command_rx.take() else {
            return;
        };
        let manager = SubscriptionManager::new(
            self.store.clone(),
            self.registry.clone(),
            ChannelFilter::wildcard(self.config.realtime.channel.clone()),
            self.config.reconnect,
        )
        .with_events(self.event_tx.clone())
        .with_stats(self.event_stats.clone())
        .verbose(self.config.verbose);

        self.worker = Some(tokio::task::spawn_local(manager.run(command_rx)));
        let _ = self.handle.subscribe();
    }

    pub async fn shutdown(&mut self) {
        let _ = self.handle.send(SyncCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Subscription task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
