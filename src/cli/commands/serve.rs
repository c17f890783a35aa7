//! HTTP API server for the examination and consultation agents.
//!
//! Sessions live in memory. Each is locked on its own, so two requests for the
//! same session are handled one after the other while different sessions
//! proceed in parallel.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::consultation::{parse_image_payload, ConsultationAgent, WELCOME_MESSAGE};
use crate::error::ParleyError;
use crate::orchestrator::Orchestrator;
use crate::session::{InMemorySessionStore, SessionHandle, SessionStore, Transcript};
use crate::viva::{ExamConfig, ExamStatus, ExaminationAgent};
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// How often idle sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state.
pub struct AppState {
    orchestrator: Orchestrator,
    exams: InMemorySessionStore<ExaminationAgent>,
    consultations: InMemorySessionStore<ConsultationAgent>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            exams: InMemorySessionStore::new(),
            consultations: InMemorySessionStore::new(),
        }
    }
}

/// Run the HTTP API server.
pub async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    settings: Settings,
) -> anyhow::Result<()> {
    match preflight::check(Operation::Serve, &settings) {
        Ok(count) => Output::info(&format!("{} credential(s) available", count)),
        Err(ParleyError::NoCredentials(var)) => Output::warning(&format!(
            "{} is not set; sessions will fail until it is.",
            var
        )),
        Err(e) => return Err(e.into()),
    }

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let idle_timeout = settings.server.session_idle_timeout();
    let cors_origin = settings.server.effective_cors_origin();

    let state = Arc::new(AppState::new(Orchestrator::new(settings)?));
    let app = router(state.clone())?;

    if let Some(max_idle) = idle_timeout {
        spawn_sweeper(state, max_idle);
    }

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Parley API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    Output::kv("CORS origin", &cors_origin);
    if let Some(max_idle) = idle_timeout {
        Output::kv("Idle sessions evicted after", &format!("{}s", max_idle.as_secs()));
    }
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Start viva", "POST /api/viva/start");
    Output::kv("Viva message", "POST /api/viva/message");
    Output::kv("Viva status", "GET  /api/viva/status?session_id=");
    Output::kv("Viva history", "GET  /api/viva/history?session_id=");
    Output::kv("End viva", "POST /api/viva/end");
    Output::kv("Start consultation", "POST /api/doctor/start");
    Output::kv("Patient message", "POST /analyze-patient");
    Output::kv("Medical image", "POST /analyze-medical-image");
    Output::kv("Consultation history", "GET  /api/doctor/history?userId=");
    Output::kv("End consultation", "POST /api/doctor/end");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router over `state`.
pub fn router(state: Arc<AppState>) -> crate::Result<Router> {
    let origin = state.orchestrator.settings().server.effective_cors_origin();
    let origin = origin.parse::<HeaderValue>().map_err(|e| {
        ParleyError::Config(format!("invalid CORS origin '{}': {}", origin, e))
    })?;

    // Credentialed CORS rules out wildcards, so everything is listed.
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/api/viva/start", post(viva_start))
        .route("/api/viva/message", post(viva_message))
        .route("/api/viva/status", get(viva_status))
        .route("/api/viva/history", get(viva_history))
        .route("/api/viva/end", post(viva_end))
        .route("/api/doctor/start", post(doctor_start))
        .route("/api/doctor/history", get(doctor_history))
        .route("/api/doctor/end", post(doctor_end))
        .route("/analyze-patient", post(analyze_patient))
        .route("/analyze-medical-image", post(analyze_medical_image))
        .layer(cors)
        .with_state(state))
}

/// Evict idle sessions in the background.
fn spawn_sweeper(state: Arc<AppState>, max_idle: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let exams = state.exams.evict_idle(max_idle).await;
            let consultations = state.consultations.evict_idle(max_idle).await;
            if exams + consultations > 0 {
                info!(exams, consultations, "Evicted idle sessions");
            }
        }
    });
}

// === Errors ===

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// Handler error, rendered as `{success: false, error}`.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        match e {
            ParleyError::InvalidInput(msg) => ApiError::BadRequest(msg),
            missing @ ParleyError::SessionNotFound(_) => ApiError::NotFound(missing.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                warn!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (
            status,
            Json(ErrorResponse {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Trimmed, non-empty text from an optional field.
fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// === Examination ===

#[derive(Deserialize)]
struct VivaStartRequest {
    #[serde(default)]
    student_name: String,
    #[serde(default)]
    subject: String,
    student_info: Option<String>,
    syllabus: Option<String>,
    teacher_notes: Option<String>,
    difficulty: Option<i64>,
    tasks: Option<u32>,
    max_questions: Option<usize>,
}

#[derive(Serialize)]
struct VivaStartResponse {
    session_id: String,
    message: String,
}

#[derive(Deserialize)]
struct VivaMessageRequest {
    session_id: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct VivaMessageResponse {
    session_id: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<String>,
    finished: bool,
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

#[derive(Serialize)]
struct VivaStatusResponse {
    session_id: String,
    #[serde(flatten)]
    status: ExamStatus,
}

#[derive(Serialize)]
struct VivaHistoryResponse {
    session_id: String,
    history: Transcript,
}

#[derive(Serialize)]
struct EndResponse {
    success: bool,
}

async fn exam_session(
    state: &AppState,
    session_id: &str,
) -> Result<SessionHandle<ExaminationAgent>, ApiError> {
    state
        .exams
        .get(session_id)
        .await
        .ok_or_else(|| ParleyError::SessionNotFound(session_id.to_string()).into())
}

async fn viva_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VivaStartRequest>,
) -> ApiResult<VivaStartResponse> {
    let (Some(student_name), Some(subject)) = (
        non_empty(Some(req.student_name.as_str())),
        non_empty(Some(req.subject.as_str())),
    ) else {
        return Err(ApiError::BadRequest(
            "student_name and subject are required".to_string(),
        ));
    };

    let defaults = &state.orchestrator.settings().exam;
    let mut config = ExamConfig::new(&student_name, &subject, defaults);
    if let Some(difficulty) = req.difficulty {
        config.difficulty = u8::try_from(difficulty)
            .ok()
            .filter(|d| (1..=100).contains(d))
            .ok_or_else(|| {
                ApiError::BadRequest("difficulty must be between 1 and 100".to_string())
            })?;
    }
    config.student_info = req.student_info.unwrap_or_default();
    config.syllabus = req.syllabus.unwrap_or_default();
    config.teacher_notes = req.teacher_notes.unwrap_or_default();
    config.total_tasks = req.tasks.unwrap_or(config.total_tasks);
    config.max_questions = req.max_questions.unwrap_or(config.max_questions);

    let mut agent = state.orchestrator.examination(config)?;
    let intro = agent.start().await;

    let session_id = Uuid::new_v4().to_string();
    state.exams.insert(&session_id, agent).await;
    info!(session = %session_id, subject = %subject, "Started viva");

    Ok(Json(VivaStartResponse {
        session_id,
        message: intro.message,
    }))
}

async fn viva_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VivaMessageRequest>,
) -> ApiResult<VivaMessageResponse> {
    let message = non_empty(Some(req.message.as_str()))
        .ok_or_else(|| ApiError::BadRequest("message is required".to_string()))?;

    let handle = exam_session(&state, &req.session_id).await?;
    let reply = handle.lock().await.process_message(&message).await;

    Ok(Json(VivaMessageResponse {
        session_id: req.session_id,
        task: reply.is_task.then(|| reply.message.clone()),
        message: reply.message,
        finished: reply.finished,
    }))
}

async fn viva_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<VivaStatusResponse> {
    let handle = exam_session(&state, &query.session_id).await?;
    let status = handle.lock().await.status();

    Ok(Json(VivaStatusResponse {
        session_id: query.session_id,
        status,
    }))
}

async fn viva_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<VivaHistoryResponse> {
    let handle = exam_session(&state, &query.session_id).await?;
    let history = handle.lock().await.history().clone();

    Ok(Json(VivaHistoryResponse {
        session_id: query.session_id,
        history,
    }))
}

async fn viva_end(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionQuery>,
) -> ApiResult<EndResponse> {
    if !state.exams.evict(&req.session_id).await {
        return Err(ParleyError::SessionNotFound(req.session_id).into());
    }
    info!(session = %req.session_id, "Ended viva");
    Ok(Json(EndResponse { success: true }))
}

// === Consultation ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoctorStartRequest {
    user_id: Option<String>,
    patient_info: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorStartResponse {
    success: bool,
    user_id: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatientRequest {
    user_id: Option<String>,
    #[serde(default)]
    text: String,
    image_analysis: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest {
    user_id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    image: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorReplyResponse {
    success: bool,
    text: String,
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorHistoryResponse {
    success: bool,
    user_id: String,
    history: Transcript,
}

/// The consultation for `user_id`, created on first use. A missing id gets a fresh one.
async fn consultation_session(
    state: &AppState,
    user_id: Option<&str>,
    patient_info: Option<String>,
) -> Result<(String, SessionHandle<ConsultationAgent>), ApiError> {
    let user_id = non_empty(user_id).unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(handle) = state.consultations.get(&user_id).await {
        if let Some(info) = patient_info {
            handle.lock().await.set_patient_info(&info);
        }
        return Ok((user_id, handle));
    }

    let agent = state.orchestrator.consultation(&user_id, patient_info)?;
    let handle = state.consultations.get_or_insert(&user_id, agent).await;
    info!(user = %user_id, "Started consultation");
    Ok((user_id, handle))
}

async fn doctor_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DoctorStartRequest>,
) -> ApiResult<DoctorStartResponse> {
    let patient_info = non_empty(req.patient_info.as_deref());
    let (user_id, _) = consultation_session(&state, req.user_id.as_deref(), patient_info).await?;

    Ok(Json(DoctorStartResponse {
        success: true,
        user_id,
        message: WELCOME_MESSAGE.to_string(),
    }))
}

async fn analyze_patient(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PatientRequest>,
) -> ApiResult<DoctorReplyResponse> {
    let text = non_empty(Some(req.text.as_str()))
        .ok_or_else(|| ApiError::BadRequest("text is required".to_string()))?;

    let (user_id, handle) = consultation_session(&state, req.user_id.as_deref(), None).await?;
    let reply = handle
        .lock()
        .await
        .process_patient_message(&text, req.image_analysis.as_deref())
        .await;

    Ok(Json(DoctorReplyResponse {
        success: true,
        text: reply,
        user_id,
    }))
}

async fn analyze_medical_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageRequest>,
) -> ApiResult<DoctorReplyResponse> {
    let image_url = parse_image_payload(&req.image)?;

    let (user_id, handle) = consultation_session(&state, req.user_id.as_deref(), None).await?;
    let reply = handle
        .lock()
        .await
        .process_uploaded_image(req.text.trim(), &image_url)
        .await;

    Ok(Json(DoctorReplyResponse {
        success: true,
        text: reply,
        user_id,
    }))
}

async fn doctor_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResult<DoctorHistoryResponse> {
    let handle = state
        .consultations
        .get(&query.user_id)
        .await
        .ok_or_else(|| ApiError::from(ParleyError::SessionNotFound(query.user_id.clone())))?;
    let history = handle.lock().await.history().clone();

    Ok(Json(DoctorHistoryResponse {
        success: true,
        user_id: query.user_id,
        history,
    }))
}

async fn doctor_end(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserQuery>,
) -> ApiResult<EndResponse> {
    if !state.consultations.evict(&req.user_id).await {
        return Err(ParleyError::SessionNotFound(req.user_id).into());
    }
    info!(user = %req.user_id, "Ended consultation");
    Ok(Json(EndResponse { success: true }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "exams": state.exams.len().await,
        "consultations": state.consultations.len().await,
    }))
}
