//! End-to-end pipeline tests over the in-memory object store, a scripted
//! admin API, and a mock authoring origin.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use graybox_executor::{
    AdminApi, BulkOperation, JobHandle, JobReport, JobState, MemoryStore, PathJobStatus,
    PollPolicy, RetryPolicy,
};
use graybox_shared::{
    BatchStatus, FailureRecord, ProjectDocument, ProjectQueueEntry, ProjectStatus,
    PromoteParams, WorkItem,
};
use graybox_store::{FileStore, layout, records};
use graybox_transform::{
    Document, DocumentRenderer, JsonTable, MarkdownParser, Node, RenderOptions,
    SpreadsheetCodec,
};

use crate::context::{WorkerContext, WorkerResponse};
use crate::scheduler::{InProcessInvoker, Scheduler, Stage, WorkerInvoker, WorkerServices};
use crate::workers;

const EXP: &str = "summer-launch";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct StubParser;

impl MarkdownParser for StubParser {
    fn parse(&self, text: &str) -> graybox_shared::Result<Document> {
        Ok(Document {
            children: vec![Node::Text { value: text.into() }],
        })
    }
}

#[derive(Default)]
struct CountingRenderer {
    calls: AtomicUsize,
}

#[async_trait]
impl DocumentRenderer for CountingRenderer {
    async fn render(
        &self,
        document: &Document,
        _options: &RenderOptions,
    ) -> graybox_shared::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text: String = document
            .children
            .iter()
            .map(Node::text_content)
            .collect();
        Ok(format!("DOCX:{text}").into_bytes())
    }
}

struct StubCodec;

impl SpreadsheetCodec for StubCodec {
    fn to_sheet(&self, table: &JsonTable) -> graybox_shared::Result<Vec<u8>> {
        serde_json::to_vec(table)
            .map_err(|e| graybox_shared::GrayboxError::Transform(e.to_string()))
    }
}

/// Admin API double: every job stops immediately; paths listed in
/// `fail_paths` report failure, everything else succeeds with a `.md`
/// resource path.
#[derive(Default)]
struct ScriptedAdmin {
    jobs: Mutex<Vec<Vec<String>>>,
    fail_paths: Mutex<Vec<String>>,
}

#[async_trait]
impl AdminApi for ScriptedAdmin {
    async fn start_bulk_job(
        &self,
        paths: &[String],
        _operation: BulkOperation,
        _experience_scope: Option<&str>,
    ) -> graybox_shared::Result<JobHandle> {
        let mut jobs = self.jobs.lock().expect("lock");
        jobs.push(paths.to_vec());
        Ok(JobHandle(format!("job-{}", jobs.len())))
    }

    async fn job_status(&self, handle: &JobHandle) -> graybox_shared::Result<JobReport> {
        let index: usize = handle.0.trim_start_matches("job-").parse().expect("job id");
        let paths = self.jobs.lock().expect("lock")[index - 1].clone();
        let fail_paths = self.fail_paths.lock().expect("lock");
        let resources = paths
            .iter()
            .map(|p| {
                let success = !fail_paths.contains(p);
                PathJobStatus {
                    path: p.clone(),
                    success,
                    file_name: p.rsplit('/').next().unwrap_or_default().to_string(),
                    resource_path: format!("{p}.md"),
                    response_code: if success { 200 } else { 500 },
                }
            })
            .collect();
        Ok(JobReport {
            state: JobState::Stopped,
            resources,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    services: WorkerServices,
    objects: Arc<MemoryStore>,
    renderer: Arc<CountingRenderer>,
    params: PromoteParams,
}

fn test_state() -> FileStore {
    let root = std::env::temp_dir().join(format!("gb_pipeline_{}", uuid::Uuid::now_v7()));
    FileStore::new(root)
}

fn harness(server: &MockServer, files: &[(&str, &[u8])], locked: &[&str]) -> Harness {
    let mut objects = MemoryStore::default();
    for (file_path, bytes) in files {
        objects = objects.with_file(file_path, bytes);
    }
    for locked_path in locked {
        objects = objects.lock_path(locked_path);
    }
    let objects = Arc::new(objects);
    let renderer = Arc::new(CountingRenderer::default());

    let params = PromoteParams {
        root_folder: "/".into(),
        gb_root_folder: "/gb".into(),
        experience_name: EXP.into(),
        project_excel_path: format!("/gb/{EXP}/promote.xlsx"),
        staging_origin: server.uri(),
        admin_api_key: None,
        drafts_only: false,
        promote_ignore_paths: vec![],
    };

    let services = WorkerServices {
        state: test_state(),
        objects: objects.clone(),
        admin: Arc::new(ScriptedAdmin::default()),
        parser: Arc::new(StubParser),
        renderer: renderer.clone(),
        codec: Arc::new(StubCodec),
        http: WorkerContext::http_client().expect("http client"),
        batch_size: 200,
        retry: RetryPolicy {
            max_attempts: 2,
            retry_delay: std::time::Duration::from_millis(1),
        },
        poll: PollPolicy {
            max_checks: 3,
            check_interval: std::time::Duration::from_millis(1),
        },
    };

    Harness {
        services,
        objects,
        renderer,
        params,
    }
}

async fn mount_md(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn project_status(harness: &Harness) -> ProjectStatus {
    let doc: ProjectDocument = harness
        .services
        .state
        .read(&layout::project_status(&harness.params.project_path()))
        .await
        .expect("project doc");
    doc.status
}

/// Drive the scheduler until the project reaches a terminal status.
async fn run_to_completion(harness: &Harness) -> ProjectStatus {
    let scheduler = Scheduler::new(
        harness.services.state.clone(),
        Arc::new(InProcessInvoker {
            services: harness.services.clone(),
        }),
    );
    for _ in 0..12 {
        scheduler.tick().await.expect("tick");
        let status = project_status(harness).await;
        if status.is_terminal() {
            return status;
        }
    }
    project_status(harness).await
}

/// Seed a project document, queue entry, and batch statuses directly, for
/// worker-level tests that skip initiation.
async fn seed_project(harness: &Harness, batches: &[(&str, BatchStatus)]) {
    let project = harness.params.project_path();
    let doc = ProjectDocument {
        status: ProjectStatus::Initiated,
        params: harness.params.clone(),
        created_time: Utc::now(),
        statuses: vec![],
    };
    harness
        .services
        .state
        .write(&layout::project_status(&project), &doc)
        .await
        .expect("seed project");
    records::upsert_queue_entry(
        &harness.services.state,
        ProjectQueueEntry {
            project_path: project.clone(),
            status: ProjectStatus::Initiated,
            created_time: doc.created_time,
        },
    )
    .await
    .expect("seed queue");
    for (name, status) in batches {
        records::seed_batch_statuses(&harness.services.state, &project, &[name.to_string()])
            .await
            .expect("seed batch");
        if *status != BatchStatus::Initiated {
            records::set_batch_status(&harness.services.state, &project, name, *status)
                .await
                .expect("set batch");
        }
    }
}

// ---------------------------------------------------------------------------
// Entry validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initiate_rejects_missing_params_before_state_mutation() {
    let server = MockServer::start().await;
    let mut harness = harness(&server, &[], &[]);
    harness.params.experience_name = String::new();

    let ctx = harness.services.context(harness.params.clone());
    let response = workers::initiate::run(&ctx).await;

    assert_eq!(response.status_code, 400);
    assert!(response.body.contains("experienceName"));
    // Nothing was written.
    assert!(records::read_queue(&harness.services.state).await.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: staged fragment page → transform route
// ---------------------------------------------------------------------------

#[tokio::test]
async fn staged_page_is_transformed_and_promoted() {
    let server = MockServer::start().await;
    let fragment_url = format!("{}/{EXP}/fragments/f1", server.uri());
    mount_md(
        &server,
        &format!("/{EXP}/a/fragments/p1.md"),
        &format!("Page body with staged link <{fragment_url}>"),
    )
    .await;
    mount_md(&server, &format!("/{EXP}/fragments/f1.md"), "leaf fragment body").await;

    let harness = harness(
        &server,
        &[
            (&format!("/{EXP}/a/fragments/p1.docx"), b"staged p1"),
            (&format!("/{EXP}/fragments/f1.docx"), b"staged f1"),
        ],
        &[],
    );

    let ctx = harness.services.context(harness.params.clone());
    let response = workers::initiate::run(&ctx).await;
    assert_eq!(response.status_code, 200);

    let status = run_to_completion(&harness).await;
    assert_eq!(status, ProjectStatus::PromotedPreviewCompleted);

    let project = harness.params.project_path();

    // The page carried staging markers: transform route, artifact staged
    // under its stripped destination, renderer invoked exactly once.
    let artifact = harness
        .services
        .state
        .read_buffer(&layout::artifact(&project, "/a/fragments/p1.docx"))
        .await
        .expect("artifact");
    assert!(artifact.starts_with(b"DOCX:"));
    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 1);

    // Success recorded under the promote batch.
    let promoted = harness
        .services
        .state
        .read_map_or_default::<Vec<String>>(&layout::promoted_paths(&project))
        .await;
    assert_eq!(
        promoted.get("promote_batch_1"),
        Some(&vec!["/a/fragments/p1.docx".to_string()])
    );

    // The rendered artifact landed at the production destination.
    let files = harness.objects.files.lock().expect("lock");
    assert!(files["/a/fragments/p1.docx"].starts_with(b"DOCX:"));
    // The leaf fragment was byte-copied by the non-processing stage.
    assert_eq!(files["/fragments/f1.docx"], b"staged f1");
    drop(files);

    let errors: Vec<FailureRecord> = harness
        .services
        .state
        .read_array_or_default(&layout::promote_errors(&project))
        .await;
    assert!(errors.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: plain page → copy route, byte-identical
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plain_page_is_copied_byte_identical() {
    let server = MockServer::start().await;
    mount_md(&server, &format!("/{EXP}/plain.md"), "plain production copy").await;

    let payload = b"\x50\x4b\x03\x04 original docx bytes";
    let harness = harness(&server, &[(&format!("/{EXP}/plain.docx"), payload)], &[]);

    let ctx = harness.services.context(harness.params.clone());
    assert_eq!(workers::initiate::run(&ctx).await.status_code, 200);

    let status = run_to_completion(&harness).await;
    assert_eq!(status, ProjectStatus::PromotedPreviewCompleted);

    // No fragments, no markers: never rendered, destination byte-identical.
    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 0);
    let files = harness.objects.files.lock().expect("lock");
    assert_eq!(files["/plain.docx"], payload);
}

// ---------------------------------------------------------------------------
// Classification exclusivity at the worker level
// ---------------------------------------------------------------------------

#[tokio::test]
async fn marker_free_processing_item_routes_to_classified_copy() {
    let server = MockServer::start().await;
    mount_md(&server, &format!("/{EXP}/combo.md"), "no markers here at all").await;

    let payload = b"combo payload";
    let harness = harness(&server, &[(&format!("/{EXP}/combo.docx"), payload)], &[]);
    let project = harness.params.project_path();

    seed_project(&harness, &[("processing_batch_1", BatchStatus::Initiated)]).await;
    let item = WorkItem::from_source(&format!("/{EXP}/combo.docx"), EXP);
    harness
        .services
        .state
        .write(&layout::batch_file(&project, "processing_batch_1"), &vec![item])
        .await
        .expect("batch file");

    let ctx = harness.services.context(harness.params.clone());
    let response = workers::process::run(&ctx, "processing_batch_1").await;
    assert_eq!(response.status_code, 200);

    // Routed to exactly one of the two batch sets: the copy side.
    let copy_batches = harness
        .services
        .state
        .read_map_or_default::<Vec<WorkItem>>(&layout::copy_batches(&project))
        .await;
    assert_eq!(copy_batches["copy_batch_1"].len(), 1);
    let promote_batches = harness
        .services
        .state
        .read_map_or_default::<Vec<String>>(&layout::promote_batches(&project))
        .await;
    assert!(promote_batches.is_empty());

    let response = workers::copy::run_classified(&ctx, "copy_batch_1").await;
    assert_eq!(response.status_code, 200);

    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 0);
    let files = harness.objects.files.lock().expect("lock");
    assert_eq!(files["/combo.docx"], payload);
    drop(files);

    assert_eq!(project_status(&harness).await, ProjectStatus::Promoted);
}

// ---------------------------------------------------------------------------
// Locked destination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn locked_destination_is_recorded_distinctly() {
    let server = MockServer::start().await;
    let harness = harness(&server, &[], &["/held.docx"]);
    let project = harness.params.project_path();

    seed_project(&harness, &[("promote_batch_1", BatchStatus::Initiated)]).await;
    records::append_batch_paths(
        &harness.services.state,
        &layout::promote_batches(&project),
        "promote_batch_1",
        vec!["/held.docx".into()],
    )
    .await
    .expect("promote batch");
    harness
        .services
        .state
        .write_buffer(&layout::artifact(&project, "/held.docx"), b"DOCX:held")
        .await
        .expect("artifact");

    let ctx = harness.services.context(harness.params.clone());
    let response = workers::promote::run(&ctx, "promote_batch_1").await;
    assert_eq!(response.status_code, 200);

    let errors: Vec<FailureRecord> = harness
        .services
        .state
        .read_array_or_default(&layout::promote_errors(&project))
        .await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.to_lowercase().contains("locked"));

    // Zero successes with failures: promote_failed.
    assert_eq!(project_status(&harness).await, ProjectStatus::PromoteFailed);
}

// ---------------------------------------------------------------------------
// Idempotent batch replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_replay_does_not_duplicate_records() {
    let server = MockServer::start().await;
    let harness = harness(&server, &[], &[]);
    let project = harness.params.project_path();

    seed_project(&harness, &[("promote_batch_1", BatchStatus::Initiated)]).await;
    records::append_batch_paths(
        &harness.services.state,
        &layout::promote_batches(&project),
        "promote_batch_1",
        vec!["/a.docx".into()],
    )
    .await
    .expect("promote batch");
    harness
        .services
        .state
        .write_buffer(&layout::artifact(&project, "/a.docx"), b"DOCX:a")
        .await
        .expect("artifact");

    let ctx = harness.services.context(harness.params.clone());
    assert_eq!(
        workers::promote::run(&ctx, "promote_batch_1").await,
        WorkerResponse::ok("promoted 1 files for batch promote_batch_1")
    );

    let promoted_before = harness
        .services
        .state
        .read_map_or_default::<Vec<String>>(&layout::promoted_paths(&project))
        .await;
    assert_eq!(promoted_before["promote_batch_1"].len(), 1);

    // Replay on the already-terminal batch: claim fails, records unchanged.
    let replay = workers::promote::run(&ctx, "promote_batch_1").await;
    assert_eq!(replay.status_code, 200);
    assert!(replay.body.contains("not claimable"));

    let promoted_after = harness
        .services
        .state
        .read_map_or_default::<Vec<String>>(&layout::promoted_paths(&project))
        .await;
    assert_eq!(promoted_before, promoted_after);
}

// ---------------------------------------------------------------------------
// Scheduler dispatch rules
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingInvoker {
    invocations: Mutex<Vec<(Stage, String, Option<String>)>>,
}

#[async_trait]
impl WorkerInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        stage: Stage,
        project: &str,
        batch_name: Option<&str>,
        _params: &PromoteParams,
    ) -> graybox_shared::Result<()> {
        self.invocations.lock().expect("lock").push((
            stage,
            project.to_string(),
            batch_name.map(str::to_string),
        ));
        Ok(())
    }
}

#[tokio::test]
async fn scheduler_dispatches_only_initiated_batches() {
    let server = MockServer::start().await;
    let harness = harness(&server, &[], &[]);

    seed_project(
        &harness,
        &[
            ("batch_1", BatchStatus::Initiated),
            ("batch_2", BatchStatus::Processed),
        ],
    )
    .await;

    let invoker = Arc::new(RecordingInvoker::default());
    let scheduler = Scheduler::new(harness.services.state.clone(), invoker.clone());
    let dispatched = scheduler.tick().await.expect("tick");

    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].stage, Stage::Discover);
    assert_eq!(dispatched[0].batch_name.as_deref(), Some("batch_1"));

    let invocations = invoker.invocations.lock().expect("lock");
    assert_eq!(invocations.len(), 1);
}

#[tokio::test]
async fn scheduler_advances_vacuous_stages() {
    let server = MockServer::start().await;
    let harness = harness(&server, &[], &[]);

    // A project whose discovery produced no batches at all.
    seed_project(&harness, &[]).await;

    let invoker = Arc::new(RecordingInvoker::default());
    let scheduler = Scheduler::new(harness.services.state.clone(), invoker.clone());

    scheduler.tick().await.expect("tick 1");
    assert_eq!(
        project_status(&harness).await,
        ProjectStatus::FragmentDiscoveryCompleted
    );
    scheduler.tick().await.expect("tick 2");
    assert_eq!(
        project_status(&harness).await,
        ProjectStatus::NonProcessingBatchesCopied
    );
    scheduler.tick().await.expect("tick 3");
    assert_eq!(project_status(&harness).await, ProjectStatus::Processed);
    scheduler.tick().await.expect("tick 4");
    assert_eq!(project_status(&harness).await, ProjectStatus::Promoted);

    // Nothing was ever dispatched; the queue mirrors the final state.
    assert!(invoker.invocations.lock().expect("lock").is_empty());
    let queue = records::read_queue(&harness.services.state).await;
    assert_eq!(queue[0].status, ProjectStatus::Promoted);
}

#[tokio::test]
async fn terminal_projects_are_left_alone() {
    let server = MockServer::start().await;
    let harness = harness(&server, &[], &[]);
    seed_project(&harness, &[]).await;
    let project = harness.params.project_path();

    records::advance_project(
        &harness.services.state,
        &project,
        ProjectStatus::PromoteFailed,
    )
    .await
    .expect("advance");

    let invoker = Arc::new(RecordingInvoker::default());
    let scheduler = Scheduler::new(harness.services.state.clone(), invoker.clone());
    let dispatched = scheduler.tick().await.expect("tick");

    assert!(dispatched.is_empty());
    assert_eq!(project_status(&harness).await, ProjectStatus::PromoteFailed);
}
