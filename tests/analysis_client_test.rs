//! Analysis client against a local mock service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use errtriage::llm::{LlmClient, LlmConfig, LlmError, LlmProvider, LogAnalyzer};
use errtriage::models::{ErrorLog, IncomingLog, Priority, Severity};
use errtriage::pipeline::{
    AnalysisOrchestrator, FailureLedger, RetryCoordinator, RetryStatus, RunKind,
};
use errtriage::services::LogCollector;
use errtriage::storage::{DailyStore, RunLogStore};

#[derive(Clone, Copy)]
enum Behavior {
    /// Fail with 500 for the first N hits, then answer.
    FailFirst(usize),
    Garbage,
    Hang,
}

#[derive(Clone)]
struct Mock {
    behavior: Behavior,
    hits: Arc<AtomicUsize>,
}

const CLASSIFICATION: &str = r#"{"severity":"Critical","priority":"High","aiReasoning":"checkout is down","potentialFix":"restart the payment worker"}"#;

async fn generate(State(mock): State<Mock>, Json(body): Json<Value>) -> Response {
    let hit = mock.hits.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["format"], "json");
    assert_eq!(body["stream"], false);

    match mock.behavior {
        Behavior::FailFirst(n) if hit < n => {
            (StatusCode::INTERNAL_SERVER_ERROR, "overloaded").into_response()
        }
        Behavior::FailFirst(_) => Json(json!({ "response": CLASSIFICATION })).into_response(),
        Behavior::Garbage => Json(json!({ "response": "I think it is bad" })).into_response(),
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({ "response": CLASSIFICATION })).into_response()
        }
    }
}

async fn chat(State(mock): State<Mock>, headers: HeaderMap) -> Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": CLASSIFICATION } }]
    }))
    .into_response()
}

/// Serve the mock on an ephemeral port; returns its base URL and hit counter.
async fn spawn_mock(behavior: Behavior) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = Mock {
        behavior,
        hits: hits.clone(),
    };
    let app = Router::new()
        .route("/api/generate", post(generate))
        .route("/v1/chat/completions", post(chat))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn config(endpoint: &str) -> LlmConfig {
    LlmConfig {
        endpoint: endpoint.to_string(),
        timeout_seconds: 1,
        max_attempts: 3,
        retry_delay_seconds: 0,
        ..LlmConfig::default()
    }
}

fn sample_log() -> ErrorLog {
    ErrorLog::new(
        "log-1",
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        "checkout",
        "NullReferenceException in PaymentService",
        "at PaymentService.Charge()",
    )
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let (endpoint, hits) = spawn_mock(Behavior::FailFirst(2)).await;
    let client = LlmClient::new(config(&endpoint)).unwrap();

    let result = client.analyze(&sample_log()).await.unwrap();
    assert_eq!(result.severity, Severity::Critical);
    assert_eq!(result.priority, Priority::High);
    assert_eq!(result.potential_fix, "restart the payment worker");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_server_errors_consume_all_attempts() {
    let (endpoint, hits) = spawn_mock(Behavior::FailFirst(usize::MAX)).await;
    let client = LlmClient::new(config(&endpoint)).unwrap();

    let failure = client.analyze(&sample_log()).await.unwrap_err();
    assert_eq!(failure.attempts, 3);
    assert!(matches!(failure.error, LlmError::Api { status: 500, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unusable_reply_is_not_retried() {
    let (endpoint, hits) = spawn_mock(Behavior::Garbage).await;
    let client = LlmClient::new(config(&endpoint)).unwrap();

    let failure = client.analyze(&sample_log()).await.unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.error, LlmError::InvalidResponse(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_client_makes_no_requests() {
    let (endpoint, hits) = spawn_mock(Behavior::FailFirst(0)).await;
    let client = LlmClient::new(LlmConfig {
        enabled: false,
        ..config(&endpoint)
    })
    .unwrap();

    let failure = client.analyze(&sample_log()).await.unwrap_err();
    assert_eq!(failure.attempts, 0);
    assert!(matches!(failure.error, LlmError::Disabled));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn openai_provider_sends_bearer_token() {
    let (endpoint, hits) = spawn_mock(Behavior::FailFirst(0)).await;
    let client = LlmClient::new(LlmConfig {
        provider: LlmProvider::OpenAI,
        api_key: Some("test-key".to_string()),
        ..config(&endpoint)
    })
    .unwrap();

    let result = client.analyze(&sample_log()).await.unwrap();
    assert_eq!(result.ai_reasoning, "checkout is down");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_timeouts_leave_record_unanalyzed_and_stop_retrying() {
    let (endpoint, hits) = spawn_mock(Behavior::Hang).await;
    let dir = TempDir::new().unwrap();
    let store = DailyStore::new(dir.path());
    let ledger = FailureLedger::open(dir.path(), 3).await.unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

    let collector = LogCollector::new(store.clone(), 1000);
    assert!(
        collector
            .collect(vec![IncomingLog {
                id: Some("slow".to_string()),
                timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
                source: "checkout".to_string(),
                message: "gateway timeout".to_string(),
                stack_trace: String::new(),
            }])
            .await
    );

    let client = LlmClient::new(config(&endpoint)).unwrap();
    let orchestrator = AnalysisOrchestrator::new(
        store.clone(),
        Arc::new(client),
        ledger.clone(),
        RunLogStore::new(dir.path()),
        5,
    );

    let summary = orchestrator.run_for_day(day, RunKind::Scheduled).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.abandoned, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let stored = store.load(day).await.unwrap();
    assert!(!stored[0].is_analyzed);
    assert!(stored[0].severity.is_none());

    let entry = ledger.get(day, "slow").await.unwrap();
    assert_eq!(entry.status, RetryStatus::Abandoned);
    assert_eq!(entry.attempts, 3);

    let pass = RetryCoordinator::new(orchestrator, 3)
        .run_pass(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap())
        .await;
    assert!(pass.runs.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
