// SPDX-License-Identifier: AGPL-3.0
// DataSync Service - Service state

use datasync_core::{
    AppError, Dispatcher, EngineSelector, IpcEndpoint, JobId, JobLocks, Scheduler, SettingsSlot,
    SettingsStore, TransferExecutor, TransferJob, TransferLogStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the service owns, wired together once at startup
pub struct ServiceState {
    pub settings: SettingsStore,
    pub slot: SettingsSlot,
    pub log_store: TransferLogStore,
    pub executor: Arc<TransferExecutor>,
    pub scheduler: Scheduler,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: CancellationToken,
}

impl ServiceState {
    /// Create service state with all stores initialized
    pub fn new(config_dir: PathBuf) -> Result<Self, AppError> {
        let settings = SettingsStore::open(config_dir)?;
        let service = settings.get();

        let log_store = TransferLogStore::open(settings.logs_dir(), service.default_max_results)?;
        let executor = Arc::new(TransferExecutor::new(
            EngineSelector::new(service.retry_policy()),
            log_store.clone(),
        ));
        let slot = SettingsSlot::load(settings.config_dir());
        let scheduler = Scheduler::new(JobLocks::default());
        let shutdown = CancellationToken::new();

        let dispatcher = Arc::new(Dispatcher::new(
            slot.clone(),
            executor.clone(),
            scheduler.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            settings,
            slot,
            log_store,
            executor,
            scheduler,
            dispatcher,
            shutdown,
        })
    }

    /// Register the transfer job with the configured trigger. An invalid
    /// schedule leaves the job manual-only.
    pub fn start_schedule(&self) {
        let job = Arc::new(TransferJob::new(self.slot.clone(), self.executor.clone()));
        let trigger = match self.settings.get().schedule.to_trigger() {
            Ok(trigger) => trigger,
            Err(e) => {
                tracing::error!("Ignoring schedule: {}", e);
                None
            }
        };
        self.scheduler.register(JobId::transfer(), trigger, job);
    }

    pub fn endpoint(&self) -> IpcEndpoint {
        let service = self.settings.get();
        IpcEndpoint::new(&service.pipe_name, service.socket_dir.as_deref())
    }
}
