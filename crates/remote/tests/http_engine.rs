use std::sync::Arc;

use assert_matches::assert_matches;
use httptest::{matchers::*, responders::*, Expectation, Server};
use taskline_core::codec::JobCodec;
use taskline_core::job::Job;
use taskline_core::job_kind::GenericSpec;
use taskline_core::task_id::TaskId;
use taskline_remote::path_mapper::PathMapping;
use taskline_remote::{HttpEngine, PrefixPathMapper, RemoteEngine, RemoteError, RemoteStatus};

fn engine(server: &Server) -> HttpEngine {
    let mapper = PrefixPathMapper::new(vec![PathMapping::new("/data", "/remote")]).unwrap();
    HttpEngine::new(
        "cluster",
        server.url("/").to_string(),
        Arc::new(mapper),
        JobCodec::default(),
    )
}

fn job() -> Job {
    Job::new(
        Box::new(GenericSpec::default()),
        Some(TaskId::pipeline("m", "p")),
        "/data/analysis",
    )
    .with_inputs(["/data/in.raw"])
}

#[tokio::test]
async fn submit_posts_translated_job() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/jobs"),
            request::body(json_decoded(|v: &serde_json::Value| {
                v["job"]["root"] == "/remote/analysis" && v["job"]["inputs"][0] == "/remote/in.raw"
            })),
        ])
        .respond_with(json_encoded(serde_json::json!({ "remote_id": "r-17" }))),
    );

    let remote_id = engine(&server).submit(&job()).await.unwrap();
    assert_eq!(remote_id, "r-17");
}

#[tokio::test]
async fn submit_failure_carries_status_and_body() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/jobs"))
            .respond_with(status_code(503).body("overloaded")),
    );

    let err = engine(&server).submit(&job()).await.unwrap_err();
    assert_matches!(err, RemoteError::Api { status: 503, ref body } if body == "overloaded");
}

#[tokio::test]
async fn untranslatable_job_is_never_sent() {
    let server = Server::run();
    let job = job().with_inputs(["/elsewhere/in.raw"]);

    let err = engine(&server).submit(&job).await.unwrap_err();
    assert_matches!(err, RemoteError::PathMapping { .. });
}

#[tokio::test]
async fn poll_maps_statuses() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/jobs/a"))
            .respond_with(json_encoded(serde_json::json!({ "status": "running" }))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/jobs/b"))
            .respond_with(json_encoded(
                serde_json::json!({ "status": "error", "message": "segfault" }),
            )),
    );

    let engine = engine(&server);
    assert_matches!(engine.poll("a").await.unwrap(), RemoteStatus::Running);
    assert_matches!(
        engine.poll("b").await.unwrap(),
        RemoteStatus::Error { message } if message == "segfault"
    );
}

#[tokio::test]
async fn completed_job_is_translated_back() {
    let server = Server::run();
    let original = job();
    let mut remote = original.clone();
    remote.root = "/remote/analysis".into();
    remote.inputs = vec!["/remote/in.raw".into()];
    remote.log_path = "/remote/analysis/job.log".into();
    let payload = JobCodec::default().encode(&remote).unwrap();

    server.expect(
        Expectation::matching(request::method_path("GET", "/jobs/done"))
            .respond_with(json_encoded(serde_json::json!({ "status": "complete", "job": payload }))),
    );

    let status = engine(&server).poll("done").await.unwrap();
    let returned = match status {
        RemoteStatus::Complete { job: Some(job) } => job,
        other => panic!("unexpected status {other:?}"),
    };
    assert_eq!(returned.guid, original.guid);
    assert_eq!(returned.root, original.root);
    assert_eq!(returned.inputs, original.inputs);
}

#[tokio::test]
async fn unknown_status_is_protocol_error() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/jobs/x"))
            .respond_with(json_encoded(serde_json::json!({ "status": "exploded" }))),
    );

    assert_matches!(
        engine(&server).poll("x").await,
        Err(RemoteError::Protocol(_))
    );
}

#[tokio::test]
async fn cancel_sends_delete() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("DELETE", "/jobs/r-1")).respond_with(status_code(204)),
    );

    engine(&server).cancel("r-1").await.unwrap();
}
