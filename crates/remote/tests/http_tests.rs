use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use icebox_remote::backends::http::HttpBackend;
use icebox_remote::{JobKind, JobStatus, RemoteError, VaultStore, read_to_end};

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(&server.base_url(), Some("secret-token"), None).unwrap()
}

#[tokio::test]
async fn list_vaults_decodes_and_authenticates() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/vaults")
            .header("authorization", "Bearer secret-token");
        then.status(200)
            .json_body(serde_json::json!({ "vaults": ["docs", "photos"] }));
    });

    let vaults = backend(&server).list_vaults().await.unwrap();
    assert_eq!(vaults, vec!["docs", "photos"]);
    mock.assert();
}

#[tokio::test]
async fn submit_retrieval_job_round_trips() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/vaults/v/jobs")
            .json_body(serde_json::json!({
                "action": "retrieval",
                "archive_id": "A1"
            }));
        then.status(200).json_body(serde_json::json!({
            "job_id": "J1",
            "action": "retrieval",
            "archive_id": "A1",
            "status_code": "InProgress",
            "creation_date": "2023-11-14T22:13:20Z"
        }));
    });

    let job = backend(&server).submit_retrieval_job("v", "A1").await.unwrap();
    assert_eq!(job.id, "J1");
    assert_eq!(
        job.kind,
        JobKind::Retrieval {
            archive_id: "A1".to_string()
        }
    );
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.creation_date, 1_700_000_000);
    assert_eq!(job.completion_date, None);
}

#[tokio::test]
async fn missing_job_maps_to_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/vaults/v/jobs/ghost");
        then.status(404).body("job 'ghost' not found");
    });

    let err = backend(&server).get_job("v", "ghost").await.unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
}

#[tokio::test]
async fn server_errors_are_transient_upstream_failures() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/vaults/v/jobs");
        then.status(503).body("maintenance");
    });

    let err = backend(&server).list_jobs("v").await.unwrap_err();
    assert!(matches!(err, RemoteError::Upstream(_)));
}

#[tokio::test]
async fn malformed_job_payloads_are_protocol_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/vaults/v/jobs/J1");
        then.status(200).json_body(serde_json::json!({
            "job_id": "J1",
            "action": "inventory",
            "status_code": "Mystery",
            "creation_date": "2023-11-14T22:13:20Z"
        }));
    });

    let err = backend(&server).get_job("v", "J1").await.unwrap_err();
    assert!(matches!(err, RemoteError::Protocol(_)));
}

#[tokio::test]
async fn job_output_passes_range_header_through() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/vaults/v/jobs/J1/output")
            .header("range", "bytes=2-5");
        then.status(206).body("2345");
    });

    let stream = backend(&server)
        .fetch_job_output("v", "J1", Some((2, 5)))
        .await
        .unwrap();
    assert_eq!(read_to_end(stream).await.unwrap(), b"2345");
    mock.assert();
}
