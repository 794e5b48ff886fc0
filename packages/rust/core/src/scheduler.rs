//! Scheduler: periodic scan of the project queue, dispatching the next
//! stage's worker for every batch still claimable.
//!
//! The scheduler holds no state of its own — each tick re-reads the queue
//! and the per-project documents, so concurrent ticks and worker crashes
//! converge on the same decisions. Batch claims happen inside the workers,
//! so double dispatch is tolerated (the losing invocation is a no-op).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use graybox_executor::{AdminApi, ObjectStore, PollPolicy, RetryPolicy};
use graybox_shared::{
    BatchStatus, ProjectDocument, ProjectStatus, PromoteParams, Result,
};
use graybox_store::{FileStore, layout, records};
use graybox_transform::{DocumentRenderer, MarkdownParser, SpreadsheetCodec};

use crate::context::WorkerContext;
use crate::workers;

// ---------------------------------------------------------------------------
// Stages & invoker
// ---------------------------------------------------------------------------

/// The dispatchable pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discover,
    CopyNonProcessing,
    Process,
    Promote,
    CopyClassified,
    PromotedPreview,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discover => "discover",
            Self::CopyNonProcessing => "copy_non_processing",
            Self::Process => "process",
            Self::Promote => "promote",
            Self::CopyClassified => "copy_classified",
            Self::PromotedPreview => "promoted_preview",
        };
        write!(f, "{s}")
    }
}

/// Dispatches a worker invocation. The in-process implementation runs the
/// worker inline; serverless platforms substitute their own trigger.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(
        &self,
        stage: Stage,
        project: &str,
        batch_name: Option<&str>,
        params: &PromoteParams,
    ) -> Result<()>;
}

/// Shared service handles from which per-invocation worker contexts are
/// assembled with the replayed parameter bag.
#[derive(Clone)]
pub struct WorkerServices {
    pub state: FileStore,
    pub objects: Arc<dyn ObjectStore>,
    pub admin: Arc<dyn AdminApi>,
    pub parser: Arc<dyn MarkdownParser>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub codec: Arc<dyn SpreadsheetCodec>,
    pub http: reqwest::Client,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
}

impl WorkerServices {
    /// Build a worker context with the replayed parameter bag.
    pub fn context(&self, params: PromoteParams) -> WorkerContext {
        WorkerContext {
            state: self.state.clone(),
            objects: self.objects.clone(),
            admin: self.admin.clone(),
            parser: self.parser.clone(),
            renderer: self.renderer.clone(),
            codec: self.codec.clone(),
            http: self.http.clone(),
            params,
            batch_size: self.batch_size,
            retry: self.retry,
            poll: self.poll,
        }
    }
}

/// Runs workers inline within the scheduler process.
pub struct InProcessInvoker {
    pub services: WorkerServices,
}

#[async_trait]
impl WorkerInvoker for InProcessInvoker {
    async fn invoke(
        &self,
        stage: Stage,
        project: &str,
        batch_name: Option<&str>,
        params: &PromoteParams,
    ) -> Result<()> {
        let ctx = self.services.context(params.clone());
        let batch = batch_name.unwrap_or_default();
        let response = match stage {
            Stage::Discover => workers::discover::run(&ctx, batch).await,
            Stage::CopyNonProcessing => workers::copy::run_non_processing(&ctx, batch).await,
            Stage::Process => workers::process::run(&ctx, batch).await,
            Stage::Promote => workers::promote::run(&ctx, batch).await,
            Stage::CopyClassified => workers::copy::run_classified(&ctx, batch).await,
            Stage::PromotedPreview => workers::promoted_preview::run(&ctx).await,
        };
        info!(%stage, project, batch, status = response.status_code, body = %response.body, "worker finished");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// One dispatched invocation, for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub stage: Stage,
    pub project: String,
    pub batch_name: Option<String>,
}

/// Queue scanner and stage dispatcher.
pub struct Scheduler {
    state: FileStore,
    invoker: Arc<dyn WorkerInvoker>,
}

impl Scheduler {
    pub fn new(state: FileStore, invoker: Arc<dyn WorkerInvoker>) -> Self {
        Self { state, invoker }
    }

    /// Scan the queue once, advancing vacuously-complete stages and
    /// dispatching workers for every claimable batch.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<Vec<Dispatch>> {
        let queue = records::read_queue(&self.state).await;
        let mut dispatched = Vec::new();

        for entry in queue {
            let project = entry.project_path.clone();
            // The per-project document is authoritative; the queue may lag.
            let doc: ProjectDocument =
                match self.state.read(&layout::project_status(&project)).await {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(project, error = %e, "unreadable project, skipping");
                        continue;
                    }
                };
            if let Err(e) = self.advance_one(&project, &doc, &mut dispatched).await {
                warn!(project, error = %e, "project scheduling failed, continuing");
            }
        }

        info!(dispatched = dispatched.len(), "tick complete");
        Ok(dispatched)
    }

    async fn advance_one(
        &self,
        project: &str,
        doc: &ProjectDocument,
        dispatched: &mut Vec<Dispatch>,
    ) -> Result<()> {
        let batch_status = records::read_batch_status(&self.state, project).await?.value;

        match doc.status {
            ProjectStatus::Initiated => {
                if !records::prefix_exists(&batch_status, "batch_") {
                    records::advance_project(
                        &self.state,
                        project,
                        ProjectStatus::FragmentDiscoveryCompleted,
                    )
                    .await?;
                    return Ok(());
                }
                self.dispatch_initiated(
                    Stage::Discover,
                    "batch_",
                    project,
                    doc,
                    &batch_status,
                    dispatched,
                )
                .await;
            }
            ProjectStatus::FragmentDiscoveryCompleted => {
                if !records::prefix_exists(&batch_status, "non_processing_batch_") {
                    records::advance_project(
                        &self.state,
                        project,
                        ProjectStatus::NonProcessingBatchesCopied,
                    )
                    .await?;
                    return Ok(());
                }
                self.dispatch_initiated(
                    Stage::CopyNonProcessing,
                    "non_processing_batch_",
                    project,
                    doc,
                    &batch_status,
                    dispatched,
                )
                .await;
            }
            ProjectStatus::NonProcessingBatchesCopied => {
                if !records::prefix_exists(&batch_status, "processing_batch_") {
                    records::advance_project(&self.state, project, ProjectStatus::Processed)
                        .await?;
                    return Ok(());
                }
                self.dispatch_initiated(
                    Stage::Process,
                    "processing_batch_",
                    project,
                    doc,
                    &batch_status,
                    dispatched,
                )
                .await;
            }
            ProjectStatus::Processed => {
                if !records::prefix_exists(&batch_status, "promote_batch_")
                    && !records::prefix_exists(&batch_status, "copy_batch_")
                {
                    // Nothing classified (e.g. every preview failed):
                    // finalize straight from the records.
                    records::advance_project(
                        &self.state,
                        project,
                        ProjectStatus::ProcessContentInProgress,
                    )
                    .await?;
                    let ctx_status = if self
                        .state
                        .read_array_or_default::<graybox_shared::FailureRecord>(
                            &layout::promote_errors(project),
                        )
                        .await
                        .is_empty()
                    {
                        ProjectStatus::Promoted
                    } else {
                        ProjectStatus::PromoteFailed
                    };
                    records::advance_project(&self.state, project, ctx_status).await?;
                    return Ok(());
                }
                records::advance_project(
                    &self.state,
                    project,
                    ProjectStatus::ProcessContentInProgress,
                )
                .await?;
                self.dispatch_promote_stage(project, doc, &batch_status, dispatched)
                    .await;
            }
            ProjectStatus::ProcessContentInProgress | ProjectStatus::PromoteInProgress => {
                self.dispatch_promote_stage(project, doc, &batch_status, dispatched)
                    .await;
            }
            ProjectStatus::Promoted | ProjectStatus::PartiallyPromoted => {
                self.dispatch(Stage::PromotedPreview, project, None, doc, dispatched)
                    .await;
            }
            ProjectStatus::PromoteFailed
            | ProjectStatus::PromotedPreviewInProgress
            | ProjectStatus::PromotedPreviewCompleted => {}
        }
        Ok(())
    }

    /// Dispatch both halves of the promote stage: artifact uploads and
    /// classified copies.
    async fn dispatch_promote_stage(
        &self,
        project: &str,
        doc: &ProjectDocument,
        batch_status: &records::BatchStatusMap,
        dispatched: &mut Vec<Dispatch>,
    ) {
        self.dispatch_initiated(
            Stage::Promote,
            "promote_batch_",
            project,
            doc,
            batch_status,
            dispatched,
        )
        .await;
        self.dispatch_initiated(
            Stage::CopyClassified,
            "copy_batch_",
            project,
            doc,
            batch_status,
            dispatched,
        )
        .await;
    }

    /// Dispatch `stage` for every batch under `prefix` still `initiated`.
    /// A batch is only ever picked up in that status — never re-picked once
    /// a worker advanced it.
    async fn dispatch_initiated(
        &self,
        stage: Stage,
        prefix: &str,
        project: &str,
        doc: &ProjectDocument,
        batch_status: &records::BatchStatusMap,
        dispatched: &mut Vec<Dispatch>,
    ) {
        for (batch_name, status) in batch_status {
            if !batch_name.starts_with(prefix) || *status != BatchStatus::Initiated {
                continue;
            }
            self.dispatch(stage, project, Some(batch_name.as_str()), doc, dispatched)
                .await;
        }
    }

    async fn dispatch(
        &self,
        stage: Stage,
        project: &str,
        batch_name: Option<&str>,
        doc: &ProjectDocument,
        dispatched: &mut Vec<Dispatch>,
    ) {
        info!(%stage, project, batch = batch_name.unwrap_or("-"), "dispatching worker");
        match self
            .invoker
            .invoke(stage, project, batch_name, &doc.params)
            .await
        {
            Ok(()) => dispatched.push(Dispatch {
                stage,
                project: project.to_string(),
                batch_name: batch_name.map(str::to_string),
            }),
            Err(e) => {
                warn!(%stage, project, error = %e, "worker invocation failed");
            }
        }
    }
}
