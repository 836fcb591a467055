//! One client's view of the job runner.
//!
//! [`SyncSession`] wires the pieces together: the connection manager
//! feeds the dispatcher, the shared store is a permanent subscriber,
//! submissions and cancellations go through the HTTP API and update the
//! store on success, and every reconnect re-seeds the store from the
//! backend's active-job listing.

use std::sync::Arc;

use mediadeck_core::workflow::{
    build_tool_payload, build_workflow_payload, InputSelection, InputType, WorkflowOptions,
    WorkflowStep,
};
use mediadeck_core::Job;
use mediadeck_events::Dispatcher;
use mediadeck_store::{JobStore, SharedJobStore};

use crate::api::{ApiError, JobsApi};
use crate::client::{Connector, WsConnector};
use crate::config::StreamConfig;
use crate::manager::{ConnectionManager, ManagerOptions, ReconnectHook};

/// Errors from submitting work through a session.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The submission was rejected before any request was made.
    #[error(transparent)]
    Invalid(#[from] mediadeck_core::CoreError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct SyncSession {
    connection: ConnectionManager,
    store: SharedJobStore,
    api: JobsApi,
    resync_hook: Option<ReconnectHook>,
}

impl SyncSession {
    /// Session over a real WebSocket connection.
    pub fn new(config: &StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(config: &StreamConfig, connector: Arc<dyn Connector>) -> Self {
        let dispatcher = Dispatcher::new();
        let store = SharedJobStore::new(JobStore::with_history_cap(config.history_cap));
        store.attach(&dispatcher);

        let connection = ConnectionManager::with_connector(
            connector,
            config.ws_url.clone(),
            dispatcher,
            ManagerOptions {
                reconnect: config.reconnect,
                liveness: config.liveness,
            },
        );
        let api = JobsApi::new(config.api_url.clone());

        let resync_hook = {
            let store = store.clone();
            let api = api.clone();
            connection.on_reconnect(move || {
                let store = store.clone();
                let api = api.clone();
                tokio::spawn(async move { resync(&api, &store).await });
            })
        };

        Self {
            connection,
            store,
            api,
            resync_hook: Some(resync_hook),
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn store(&self) -> &SharedJobStore {
        &self.store
    }

    pub fn api(&self) -> &JobsApi {
        &self.api
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Disconnect and stop resyncing on reconnect.
    pub fn shutdown(&mut self) {
        if let Some(hook) = self.resync_hook.take() {
            hook.remove();
        }
        self.connection.disconnect();
    }

    /// Submit a workflow over the selected inputs. On success the job
    /// enters the store as active; on failure the store is untouched.
    pub async fn submit_workflow(
        &self,
        selection: &InputSelection,
        input_type: InputType,
        steps: &[WorkflowStep],
        options: WorkflowOptions,
    ) -> Result<Job, SubmitError> {
        let payload = build_workflow_payload(selection, input_type, steps, options)?;
        let job = self.api.submit_workflow(&payload).await?;
        self.track(job.clone(), payload.input_files);
        Ok(job)
    }

    /// Submit one tool operation over the selected inputs.
    pub async fn submit_tool(
        &self,
        selection: &InputSelection,
        input_type: InputType,
        step: &WorkflowStep,
    ) -> Result<Job, SubmitError> {
        let payload = build_tool_payload(selection, input_type, step)?;
        let job = self.api.submit_tool(step.operation, &payload).await?;
        self.track(job.clone(), payload.input_files);
        Ok(job)
    }

    /// Cancel a job on the backend, then move it to history.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), ApiError> {
        self.api.cancel_job(job_id).await?;
        self.store.remove_active_job(job_id);
        tracing::info!(job_id, "Job cancelled");
        Ok(())
    }

    /// Re-seed the store from the backend's active-job listing.
    pub async fn resync(&self) -> Result<(), ApiError> {
        try_resync(&self.api, &self.store).await
    }

    fn track(&self, mut job: Job, input_files: Vec<String>) {
        if job.input_files.is_empty() {
            job.input_files = input_files;
        }
        self.store.add_active_job(job);
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("connection", &self.connection)
            .field("store", &self.store)
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

async fn resync(api: &JobsApi, store: &SharedJobStore) {
    if let Err(e) = try_resync(api, store).await {
        tracing::warn!(error = %e, "Failed to resync active jobs after reconnect");
    }
}

async fn try_resync(api: &JobsApi, store: &SharedJobStore) -> Result<(), ApiError> {
    let jobs = api.active_jobs().await?;
    let listed = jobs.len();
    let unlisted = store.resync(jobs);
    tracing::info!(listed, unlisted = unlisted.len(), "Resynced active jobs");
    for job_id in unlisted {
        tracing::warn!(%job_id, "Active job missing from backend listing");
    }
    Ok(())
}
