use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use cxr_flow::{
    FlowError, InMemoryReportStore, InMemorySessionStorage, RecordSource, ReportGenerator,
    ReportSection, WorkflowDriver,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    agents::{AnchorAgent, OpenRouterReader},
    config::Config,
    export::{ExportError, ExportSource, MarkdownExporter},
    records::ManifestRecordSource,
};

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn flow_error(e: FlowError) -> ApiError {
    match &e {
        FlowError::InvalidInput(message) => bad_request_error(message),
        FlowError::SessionNotFound(id) => not_found_error("Session not found", id),
        FlowError::InvalidState(message) => {
            (StatusCode::CONFLICT, Json(json!({ "error": message })))
        }
        FlowError::ReportUnavailable { .. }
        | FlowError::Finalization(_)
        | FlowError::RecordSource(_)
        | FlowError::StorageError(_) => {
            error!(error = %e, "Workflow request failed");
            internal_error("Workflow request failed", &e.to_string())
        }
    }
}

fn export_error(e: ExportError) -> ApiError {
    error!(error = %e, "Export failed");
    internal_error("Failed to export report", &e.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<Mutex<WorkflowDriver>>,
    pub records: Arc<dyn RecordSource>,
    pub exporter: Arc<MarkdownExporter>,
}

impl AppState {
    pub fn new(
        driver: WorkflowDriver,
        records: Arc<dyn RecordSource>,
        exporter: MarkdownExporter,
    ) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            records,
            exporter: Arc::new(exporter),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SectionEditRequest {
    pub section: String,
    pub content: String,
}

/// Wires the OpenRouter agents, in-memory stores and manifest source into a router.
pub fn create_app(config: &Config) -> anyhow::Result<Router> {
    let app_state = create_app_state(config)?;
    Ok(build_router(app_state))
}

pub fn create_app_state(config: &Config) -> anyhow::Result<AppState> {
    let records = Arc::new(ManifestRecordSource::new(
        &config.records_path,
        config.patient_filter,
    ));
    Ok(AppState::new(
        build_driver(config),
        records,
        MarkdownExporter::new()?,
    ))
}

/// Driver with the OpenRouter reader and anchor and fresh in-memory stores.
pub fn build_driver(config: &Config) -> WorkflowDriver {
    let reader = Arc::new(OpenRouterReader::new(&config.api_key, &config.reader_model));
    let anchor = Arc::new(AnchorAgent::new(&config.api_key, &config.anchor_model));
    let generator = ReportGenerator::with_gate(
        reader,
        anchor.clone(),
        config.max_attempts,
        config.quality_gate(),
    );

    WorkflowDriver::new(
        generator,
        anchor,
        Arc::new(InMemorySessionStorage::new()),
        Arc::new(InMemoryReportStore::new()),
    )
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/workflow", get(get_workflow))
        .route("/workflow/start", post(start_workflow))
        .route("/workflow/chat", post(chat))
        .route("/workflow/sections", put(edit_section))
        .route("/workflow/save", post(save_report))
        .route("/workflow/next", post(confirm_next))
        .route("/workflow/reset", post(reset_workflow))
        .route("/workflow/export", get(export_draft))
        .route("/reports", get(list_reports))
        .route("/reports/{id}/export", get(export_report))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "CXR Report Service",
        "version": "0.1.0",
        "description": "Chest X-ray report drafting with a vision reader and a Q&A anchor",
        "endpoints": {
            "GET /workflow": "Current image, session and workflow status",
            "POST /workflow/start": "Start generating reports",
            "POST /workflow/chat": "Ask a question, or send stop/quit/exit/finish/end to finalize",
            "PUT /workflow/sections": "Edit a section of the finalized report",
            "POST /workflow/save": "Save the current report",
            "POST /workflow/next": "Save the current report and move to the next image",
            "POST /workflow/reset": "Clear all sessions and reports",
            "GET /workflow/export": "Export the current review draft as Markdown",
            "GET /reports": "List saved reports",
            "GET /reports/{id}/export": "Export a saved report as Markdown",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Locks the driver and re-syncs its records, as every pass does.
async fn synced_driver(
    state: &AppState,
) -> Result<tokio::sync::MutexGuard<'_, WorkflowDriver>, ApiError> {
    let mut driver = state.driver.lock().await;
    driver
        .refresh(state.records.as_ref())
        .await
        .map_err(flow_error)?;
    Ok(driver)
}

async fn workflow_snapshot(driver: &mut WorkflowDriver) -> Result<Value, ApiError> {
    let view = driver.step().await.map_err(flow_error)?;
    let status = driver.status().await.map_err(flow_error)?;
    Ok(json!({
        "status": status,
        "view": view
    }))
}

async fn get_workflow(State(state): State<AppState>) -> ApiResult<Value> {
    let mut driver = synced_driver(&state).await?;
    Ok(Json(workflow_snapshot(&mut driver).await?))
}

async fn start_workflow(State(state): State<AppState>) -> ApiResult<Value> {
    let mut driver = synced_driver(&state).await?;
    driver.start();
    info!("Report generation started");
    Ok(Json(workflow_snapshot(&mut driver).await?))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Value> {
    if request.message.trim().is_empty() {
        return Err(bad_request_error("Message cannot be empty"));
    }

    let mut driver = synced_driver(&state).await?;
    let outcome = driver.submit(&request.message).await.map_err(flow_error)?;
    let mut response = workflow_snapshot(&mut driver).await?;
    response["outcome"] = json!(outcome);
    Ok(Json(response))
}

async fn edit_section(
    State(state): State<AppState>,
    Json(request): Json<SectionEditRequest>,
) -> ApiResult<Value> {
    let section: ReportSection = request.section.parse().map_err(flow_error)?;

    let mut driver = synced_driver(&state).await?;
    let sections = driver
        .edit_section(section, &request.content)
        .await
        .map_err(flow_error)?;
    Ok(Json(json!({ "sections": sections })))
}

async fn save_report(State(state): State<AppState>) -> ApiResult<Value> {
    let mut driver = synced_driver(&state).await?;
    let saved = driver.save_current().await.map_err(flow_error)?;
    Ok(Json(json!({ "report": saved })))
}

async fn confirm_next(State(state): State<AppState>) -> ApiResult<Value> {
    let mut driver = synced_driver(&state).await?;
    let progress = driver.confirm_next().await.map_err(flow_error)?;
    let mut response = workflow_snapshot(&mut driver).await?;
    response["progress"] = json!(progress);
    Ok(Json(response))
}

async fn reset_workflow(State(state): State<AppState>) -> ApiResult<Value> {
    let mut driver = state.driver.lock().await;
    driver.reset().await.map_err(flow_error)?;
    let status = driver.status().await.map_err(flow_error)?;
    Ok(Json(json!({ "status": status })))
}

async fn list_reports(State(state): State<AppState>) -> ApiResult<Value> {
    let driver = state.driver.lock().await;
    let reports = driver.stored_reports().await.map_err(flow_error)?;
    Ok(Json(json!({ "reports": reports })))
}

fn markdown(document: String) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        document,
    )
}

async fn export_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report_id =
        Uuid::parse_str(&id).map_err(|_| bad_request_error("Invalid report id"))?;

    let driver = state.driver.lock().await;
    let report = driver
        .stored_report(report_id)
        .await
        .map_err(flow_error)?
        .ok_or_else(|| not_found_error("Report not found", &id))?;

    let record = driver.record_for(report.patient_id, report.follow_up);
    let document = state
        .exporter
        .render(ExportSource::Stored(&report), record)
        .map_err(export_error)?;
    Ok(markdown(document))
}

async fn export_draft(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let driver = synced_driver(&state).await?;
    let (sections, record) = driver.review_draft().await.map_err(flow_error)?;

    let document = state
        .exporter
        .render(
            ExportSource::Draft {
                sections: &sections,
                patient_id: record.patient(),
                follow_up: record.follow_up,
            },
            Some(&record),
        )
        .map_err(export_error)?;
    Ok(markdown(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use cxr_flow::{AgentReply, ChatMessage, ImageAnalyzer, ImageRecord, ReportFormatter};
    use std::path::PathBuf;
    use tower::ServiceExt;

    struct StubReader;

    #[async_trait]
    impl ImageAnalyzer for StubReader {
        async fn analyze(&self, _record: &ImageRecord) -> anyhow::Result<AgentReply> {
            Ok(AgentReply::new("Clear lungs. ".repeat(50)))
        }
    }

    struct StubAnchor;

    #[async_trait]
    impl ReportFormatter for StubAnchor {
        async fn respond(
            &self,
            prompt: &str,
            _history: &[ChatMessage],
        ) -> anyhow::Result<AgentReply> {
            if prompt.contains("User Question:") {
                return Ok(AgentReply::new("No effusion is seen."));
            }
            Ok(AgentReply::new(
                "**Patient Information:** ID 5\n**Findings:** Clear.\n**Impression:** Normal.\n**Plan:** None.",
            ))
        }
    }

    fn record(patient_id: i64) -> ImageRecord {
        ImageRecord {
            image_path: PathBuf::from("images/x.png"),
            finding_labels: vec!["No Finding".to_string()],
            follow_up: 0,
            patient_id,
            patient_age: 30,
            patient_gender: "F".to_string(),
            view_position: "PA".to_string(),
        }
    }

    fn app(records: Vec<ImageRecord>) -> Router {
        let anchor = Arc::new(StubAnchor);
        let generator = ReportGenerator::new(Arc::new(StubReader), anchor.clone());
        let driver = WorkflowDriver::new(
            generator,
            anchor,
            Arc::new(InMemorySessionStorage::new()),
            Arc::new(InMemoryReportStore::new()),
        );
        build_router(AppState::new(
            driver,
            Arc::new(records),
            MarkdownExporter::new().unwrap(),
        ))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(vec![]);
        let (status, body) = send_json(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_idle_then_start() {
        let app = app(vec![record(5)]);
        let (_, body) = send_json(&app, "GET", "/workflow", None).await;
        assert_eq!(body["view"]["view"], "idle");

        let (status, body) = send_json(&app, "POST", "/workflow/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"]["view"], "interacting");
        assert_eq!(body["view"]["image_id"], "img_0_5");
        assert_eq!(body["status"]["reports_generated"], true);
    }

    #[tokio::test]
    async fn test_chat_answers_question() {
        let app = app(vec![record(5)]);
        send_json(&app, "POST", "/workflow/start", None).await;

        let (status, body) = send_json(
            &app,
            "POST",
            "/workflow/chat",
            Some(json!({ "message": "Any effusion?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], "answered");
        assert_eq!(body["outcome"]["reply"], "No effusion is seen.");
        assert_eq!(body["view"]["session"]["pending_reply"], "No effusion is seen.");
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let app = app(vec![record(5)]);
        send_json(&app, "POST", "/workflow/start", None).await;
        let (status, _) = send_json(
            &app,
            "POST",
            "/workflow/chat",
            Some(json!({ "message": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_before_start_conflicts() {
        let app = app(vec![record(5)]);
        let (status, _) = send_json(
            &app,
            "POST",
            "/workflow/chat",
            Some(json!({ "message": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_section_rejected() {
        let app = app(vec![record(5)]);
        send_json(&app, "POST", "/workflow/start", None).await;
        let (status, _) = send_json(
            &app,
            "PUT",
            "/workflow/sections",
            Some(json!({ "section": "History", "content": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_full_flow_and_export() {
        let app = app(vec![record(5)]);
        send_json(&app, "POST", "/workflow/start", None).await;

        let (_, body) = send_json(
            &app,
            "POST",
            "/workflow/chat",
            Some(json!({ "message": "STOP" })),
        )
        .await;
        assert_eq!(body["outcome"]["status"], "completed");
        assert_eq!(body["view"]["view"], "review");
        assert_eq!(body["view"]["sections"]["Findings"], "Clear.");

        let (status, body) = send_json(
            &app,
            "PUT",
            "/workflow/sections",
            Some(json!({ "section": "plan", "content": "Repeat in 1 year." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sections"]["Plan"], "Repeat in 1 year.");

        let (status, draft) = send(&app, "GET", "/workflow/export", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(draft).unwrap().contains("**Plan:**\nRepeat in 1 year."));

        let (_, body) = send_json(&app, "POST", "/workflow/next", None).await;
        assert_eq!(body["progress"]["all_reports_complete"], true);
        assert_eq!(body["view"]["view"], "all_complete");

        let (_, body) = send_json(&app, "GET", "/reports", None).await;
        let reports = body["reports"].as_array().unwrap();
        assert_eq!(reports.len(), 1);
        let id = reports[0]["id"].as_str().unwrap().to_string();

        let (status, doc) = send(&app, "GET", &format!("/reports/{id}/export"), None).await;
        assert_eq!(status, StatusCode::OK);
        let doc = String::from_utf8(doc).unwrap();
        assert!(doc.contains("Patient ID: 5, Follow-up: 0"));
        assert!(doc.contains("| Finding Labels | No Finding |"));
        assert!(doc.contains("Plan\nRepeat in 1 year."));
    }

    #[tokio::test]
    async fn test_export_unknown_report() {
        let app = app(vec![record(5)]);
        let (status, _) = send_json(
            &app,
            "GET",
            &format!("/reports/{}/export", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&app, "GET", "/reports/not-a-uuid/export", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset() {
        let app = app(vec![record(5)]);
        send_json(&app, "POST", "/workflow/start", None).await;
        let (status, body) = send_json(&app, "POST", "/workflow/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["reports_generated"], false);
        assert_eq!(body["status"]["cursor"], 0);
    }
}
