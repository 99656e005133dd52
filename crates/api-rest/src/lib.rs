//! # API REST
//!
//! REST API implementation for the clinic.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - Admin gating of every route except health and booking
//!
//! Uses `api-shared` for session resolution and shared response types.

#![warn(rust_2018_idioms)]

use api_shared::{HealthRes, HealthService, SessionResolver, SESSION_HEADER};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use clinic_core::{
    allowed_transitions, AccessGate, Appointment, AppointmentDraft, AppointmentId, AppointmentStatus, ClinicError,
    LifecycleManager, RowStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST API handlers.
pub struct AppState<S, R> {
    lifecycle: Arc<LifecycleManager<S>>,
    gate: Arc<AccessGate>,
    sessions: Arc<R>,
}

impl<S, R> AppState<S, R> {
    pub fn new(lifecycle: LifecycleManager<S>, gate: AccessGate, sessions: R) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
            gate: Arc::new(gate),
            sessions: Arc::new(sessions),
        }
    }
}

impl<S, R> Clone for AppState<S, R> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: Arc::clone(&self.lifecycle),
            gate: Arc::clone(&self.gate),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AppointmentRes {
    pub id: String,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub treatment: String,
    /// One of `pending`, `confirmed`, `completed`, `cancelled`.
    pub status: String,
    /// Statuses this appointment may move to next; empty once terminal.
    pub next_statuses: Vec<String>,
    pub notes: Option<String>,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

impl From<Appointment> for AppointmentRes {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id.to_string(),
            patient_name: a.patient_name.into_inner(),
            patient_email: a.patient_email.as_str().to_owned(),
            patient_phone: a.patient_phone.into_inner(),
            date: a.date.to_string(),
            time: a.time,
            treatment: a.treatment.into_inner(),
            status: a.status.to_string(),
            next_statuses: allowed_transitions(a.status)
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
            notes: a.notes,
            created_at: a.created_at.to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BookAppointmentReq {
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
    pub date: String,
    pub time: String,
    pub treatment: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<BookAppointmentReq> for AppointmentDraft {
    fn from(req: BookAppointmentReq) -> Self {
        AppointmentDraft {
            patient_name: req.patient_name,
            patient_email: req.patient_email,
            patient_phone: req.patient_phone,
            date: req.date,
            time: req.time,
            treatment: req.treatment,
            notes: req.notes,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateStatusReq {
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateNotesReq {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    MissingSession,
    Clinic(ClinicError),
}

impl From<ClinicError> for ApiError {
    fn from(e: ClinicError) -> Self {
        ApiError::Clinic(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingSession => (
                StatusCode::UNAUTHORIZED,
                format!("missing {SESSION_HEADER} header"),
            ),
            ApiError::Clinic(e) => {
                let status = match &e {
                    ClinicError::Validation(_) => StatusCode::BAD_REQUEST,
                    ClinicError::NotFound(_) => StatusCode::NOT_FOUND,
                    ClinicError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    ClinicError::Unauthorized => StatusCode::FORBIDDEN,
                    ClinicError::IdentityPending | ClinicError::StoreUnavailable(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    ClinicError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!("request failed: {:?}", e);
                }
                (status, e.to_string())
            }
        };
        (status, Json(ErrorRes { error: message })).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        book_appointment,
        list_appointments,
        get_appointment,
        update_status,
        update_notes,
    ),
    components(schemas(
        HealthRes,
        AppointmentRes,
        BookAppointmentReq,
        UpdateStatusReq,
        UpdateNotesReq,
        ErrorRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router, including Swagger UI at `/swagger-ui`.
pub fn router<S, R>(state: AppState<S, R>) -> Router
where
    S: RowStore + 'static,
    R: SessionResolver,
{
    Router::new()
        .route("/health", get(health))
        .route(
            "/appointments",
            get(list_appointments::<S, R>).post(book_appointment::<S, R>),
        )
        .route("/appointments/:id", get(get_appointment::<S, R>))
        .route("/appointments/:id/status", post(update_status::<S, R>))
        .route("/appointments/:id/notes", put(update_notes::<S, R>))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the access gate against the session named in the request headers.
async fn require_admin<S, R: SessionResolver>(
    state: &AppState<S, R>,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingSession)?;
    let provider = state.sessions.resolve(session_id);
    state.gate.require_admin(&provider).await?;
    Ok(())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/appointments",
    request_body = BookAppointmentReq,
    responses(
        (status = 201, description = "Appointment booked", body = AppointmentRes),
        (status = 400, description = "Missing or malformed field", body = ErrorRes),
        (status = 503, description = "Store unavailable", body = ErrorRes)
    )
)]
/// Book an appointment from the public booking form.
///
/// No session is required. The appointment always starts `pending`.
async fn book_appointment<S: RowStore + 'static, R: SessionResolver>(
    State(state): State<AppState<S, R>>,
    Json(req): Json<BookAppointmentReq>,
) -> Result<(StatusCode, Json<AppointmentRes>), ApiError> {
    let created = state.lifecycle.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    get,
    path = "/appointments",
    params(
        ("x-session-id" = String, Header, description = "Identity provider session id")
    ),
    responses(
        (status = 200, description = "Appointments ordered by date", body = [AppointmentRes]),
        (status = 401, description = "No session", body = ErrorRes),
        (status = 403, description = "Not the clinic admin; the session was signed out", body = ErrorRes),
        (status = 503, description = "Identity still loading or store unavailable", body = ErrorRes)
    )
)]
/// List every appointment, ordered by date.
async fn list_appointments<S: RowStore + 'static, R: SessionResolver>(
    State(state): State<AppState<S, R>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppointmentRes>>, ApiError> {
    require_admin(&state, &headers).await?;
    let appointments = state.lifecycle.list().await?;
    Ok(Json(appointments.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}",
    params(
        ("id" = String, Path, description = "Appointment id"),
        ("x-session-id" = String, Header, description = "Identity provider session id")
    ),
    responses(
        (status = 200, description = "The appointment", body = AppointmentRes),
        (status = 404, description = "No such appointment", body = ErrorRes)
    )
)]
async fn get_appointment<S: RowStore + 'static, R: SessionResolver>(
    State(state): State<AppState<S, R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AppointmentRes>, ApiError> {
    require_admin(&state, &headers).await?;
    let appointment = state.lifecycle.get(&AppointmentId::new(id)).await?;
    Ok(Json(appointment.into()))
}

#[utoipa::path(
    post,
    path = "/appointments/{id}/status",
    request_body = UpdateStatusReq,
    params(
        ("id" = String, Path, description = "Appointment id"),
        ("x-session-id" = String, Header, description = "Identity provider session id")
    ),
    responses(
        (status = 200, description = "Status changed", body = AppointmentRes),
        (status = 400, description = "Unknown status", body = ErrorRes),
        (status = 404, description = "No such appointment", body = ErrorRes),
        (status = 409, description = "Transition not allowed from the current status", body = ErrorRes)
    )
)]
/// Move an appointment to a new status.
async fn update_status<S: RowStore + 'static, R: SessionResolver>(
    State(state): State<AppState<S, R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateStatusReq>,
) -> Result<Json<AppointmentRes>, ApiError> {
    require_admin(&state, &headers).await?;
    let next: AppointmentStatus = req.status.parse()?;
    let updated = state
        .lifecycle
        .transition(&AppointmentId::new(id), next)
        .await?;
    Ok(Json(updated.into()))
}

#[utoipa::path(
    put,
    path = "/appointments/{id}/notes",
    request_body = UpdateNotesReq,
    params(
        ("id" = String, Path, description = "Appointment id"),
        ("x-session-id" = String, Header, description = "Identity provider session id")
    ),
    responses(
        (status = 200, description = "Notes replaced", body = AppointmentRes),
        (status = 404, description = "No such appointment", body = ErrorRes)
    )
)]
/// Replace the notes on an appointment. Blank or missing notes clear them.
async fn update_notes<S: RowStore + 'static, R: SessionResolver>(
    State(state): State<AppState<S, R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateNotesReq>,
) -> Result<Json<AppointmentRes>, ApiError> {
    require_admin(&state, &headers).await?;
    let updated = state
        .lifecycle
        .update_notes(&AppointmentId::new(id), req.notes)
        .await?;
    Ok(Json(updated.into()))
}
