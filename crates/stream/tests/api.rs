use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mediadeck_core::workflow::{
    build_tool_payload, build_workflow_payload, InputSelection, InputType, Operation, Preset,
    WorkflowOptions, WorkflowStep,
};
use mediadeck_core::JobStatus;
use mediadeck_stream::{ApiError, JobsApi, StreamConfig, SubmitError, SyncSession};

fn selection() -> InputSelection {
    ["v1", "v2"].into_iter().collect()
}

fn session_for(server: &MockServer) -> SyncSession {
    let config = StreamConfig {
        api_url: server.uri(),
        ..StreamConfig::default()
    };
    SyncSession::new(&config)
}

// ---------------------------------------------------------------------------
// JobsApi
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_workflow_posts_payload_and_returns_descriptor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tools/workflow"))
        .and(body_partial_json(json!({
            "input_files": ["v1", "v2"],
            "input_type": "video",
            "parameters": { "keep_intermediate_files": false, "stop_on_error": true },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "wf-1",
            "operation_type": "workflow",
            "status": "pending",
            "progress": 0,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = build_workflow_payload(
        &selection(),
        InputType::Video,
        &Preset::WebOptimized.steps(),
        WorkflowOptions::default(),
    )
    .unwrap();

    let job = JobsApi::new(server.uri())
        .submit_workflow(&payload)
        .await
        .expect("submit ok");

    assert_eq!(job.id, "wf-1");
    assert_eq!(job.operation_type, "workflow");
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn submit_tool_targets_operation_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tools/rotate"))
        .and(body_partial_json(json!({ "parameters": { "angle": 180 } })))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "job_id": "r-9", "operation_type": "rotate" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let step = WorkflowStep::new(Operation::Rotate).with_parameter("angle", json!(180));
    let payload = build_tool_payload(&selection(), InputType::Video, &step).unwrap();

    let job = JobsApi::new(format!("{}/", server.uri()))
        .submit_tool(Operation::Rotate, &payload)
        .await
        .expect("submit ok");

    assert_eq!(job.id, "r-9");
}

#[tokio::test]
async fn rejection_surfaces_server_error_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tools/convert"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "Unsupported codec: vp7" })),
        )
        .mount(&server)
        .await;

    let step = WorkflowStep::new(Operation::Convert);
    let payload = build_tool_payload(&selection(), InputType::Video, &step).unwrap();

    let err = JobsApi::new(server.uri())
        .submit_tool(Operation::Convert, &payload)
        .await
        .unwrap_err();

    assert_matches!(&err, ApiError::Rejected { status: 400, .. });
    assert_eq!(err.to_string(), "Unsupported codec: vp7");
}

#[tokio::test]
async fn rejection_without_error_field_uses_body_text() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/tools/jobs/j1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend restarting"))
        .mount(&server)
        .await;

    let err = JobsApi::new(server.uri()).cancel_job("j1").await.unwrap_err();

    assert_matches!(&err, ApiError::Rejected { status: 503, .. });
    assert_eq!(err.to_string(), "backend restarting");
}

#[tokio::test]
async fn active_jobs_accepts_bare_and_wrapped_listings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tools/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [
                { "id": "a", "operation_type": "trim", "status": "processing", "progress": 30 },
                { "id": "b", "status": "pending" },
            ],
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tools/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "c", "status": "processing", "progress": 5 },
        ])))
        .mount(&server)
        .await;

    let api = JobsApi::new(server.uri());

    let wrapped = api.active_jobs().await.unwrap();
    let ids: Vec<_> = wrapped.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(wrapped[0].progress, 30.0);

    let bare = api.active_jobs().await.unwrap();
    assert_eq!(bare.len(), 1);
    assert_eq!(bare[0].id, "c");
}

// ---------------------------------------------------------------------------
// SyncSession
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_submission_enters_store_as_active() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tools/workflow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "wf-2", "operation_type": "workflow" })),
        )
        .mount(&server)
        .await;

    let session = session_for(&server);
    let job = session
        .submit_workflow(
            &selection(),
            InputType::Audio,
            &Preset::AudioPodcast.steps(),
            WorkflowOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(job.id, "wf-2");
    session.store().read(|s| {
        let active = s.active_job("wf-2").unwrap();
        assert_eq!(active.input_files, vec!["v1", "v2"]);
        assert!(s.is_processing());
    });
}

#[tokio::test]
async fn failed_submission_leaves_store_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tools/workflow"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "disk full" })))
        .mount(&server)
        .await;

    let session = session_for(&server);
    let before = session.store().revision();

    let err = session
        .submit_workflow(
            &selection(),
            InputType::Video,
            &Preset::WebOptimized.steps(),
            WorkflowOptions::default(),
        )
        .await
        .unwrap_err();

    assert_matches!(err, SubmitError::Api(ApiError::Rejected { status: 500, .. }));
    assert_eq!(session.store().revision(), before);
    assert!(!session.store().is_processing());
}

#[tokio::test]
async fn empty_selection_is_rejected_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_for(&server);
    let err = session
        .submit_tool(
            &InputSelection::new(),
            InputType::Video,
            &WorkflowStep::new(Operation::Trim),
        )
        .await
        .unwrap_err();

    assert_matches!(err, SubmitError::Invalid(_));
}

#[tokio::test]
async fn cancel_moves_job_to_history_only_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/tools/jobs/ok"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/tools/jobs/stuck"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "error": "already finishing" })))
        .mount(&server)
        .await;

    let session = session_for(&server);
    session
        .store()
        .add_active_job(mediadeck_core::Job::new("ok", "trim"));
    session
        .store()
        .add_active_job(mediadeck_core::Job::new("stuck", "convert"));

    session.cancel_job("ok").await.unwrap();
    let err = session.cancel_job("stuck").await.unwrap_err();
    assert_eq!(err.to_string(), "already finishing");

    session.store().read(|s| {
        assert!(s.active_job("ok").is_none());
        assert!(s.active_job("stuck").is_some());
        assert_eq!(s.history().next().unwrap().id, "ok");
    });
}

#[tokio::test]
async fn resync_upserts_listed_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tools/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "running", "status": "processing", "progress": 70 },
        ])))
        .mount(&server)
        .await;

    let session = session_for(&server);
    session
        .store()
        .add_active_job(mediadeck_core::Job::new("running", "trim"));
    session
        .store()
        .add_active_job(mediadeck_core::Job::new("lost", "rotate"));

    session.resync().await.unwrap();

    session.store().read(|s| {
        let running = s.active_job("running").unwrap();
        assert_eq!(running.status, JobStatus::Processing);
        assert_eq!(running.progress, 70.0);
        assert!(s.active_job("lost").is_some());
    });
}
