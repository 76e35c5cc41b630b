//! Axum REST API — handlers, the admin guard middleware, and the router.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::SessionStore;
use crate::config::Config;
use crate::db::Store;
use crate::errors::{ApiError, Result};
use crate::models::{format_timestamp, Member, ProofMethod, Submission};
use crate::notify::Notifier;
use crate::pdf;
use crate::workflow::{self, Capacity, NewSubmission, PlacesAction, ProofSubmission};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state, built once at startup and injected into every
/// handler.
pub struct AppState {
    pub store: Store,
    pub sessions: SessionStore,
    pub notifier: Arc<dyn Notifier>,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    let admin = Router::new()
        .route("/admin/logout", post(logout))
        .route("/admin/pending-payments", get(pending_payments))
        .route("/admin/inscriptions", get(inscriptions))
        .route("/admin/approve-project/:id", post(approve_project))
        .route("/admin/reject-project/:id", post(reject_project))
        .route("/admin/approve-payment/:id", post(approve_payment))
        .route("/admin/reject-payment/:id", post(reject_payment))
        .route("/admin/toggle-session", post(toggle_session))
        .route("/admin/update-places", post(update_places))
        .route("/admin/reset-all", post(reset_all))
        .route("/admin/export-csv", get(export_csv))
        .route("/admin/export-pdf", get(export_pdf))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/api/inscriptions-count", get(inscriptions_count))
        .route("/api/submit", post(submit))
        .route("/api/confirm-payment", post(confirm_payment))
        .route("/api/download-acceptance-pdf", post(download_acceptance_pdf))
        .route("/admin/login", post(login))
        .merge(admin)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Gate every admin route behind a valid `x-admin-token` header; fails closed
/// with 401 on any non-ok validation.
async fn require_admin(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let token = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Auth("not authenticated, please log in".to_string()))?;
    state.sessions.validate(token)?;
    Ok(next.run(request).await)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct SimpleResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    success: bool,
    message: String,
    id: String,
}

#[derive(Serialize)]
struct LoginResponse {
    success: bool,
    token: String,
    message: String,
}

#[derive(Serialize)]
struct InscriptionsResponse {
    total: i64,
    max: i64,
    available: bool,
    #[serde(rename = "sessionOpen")]
    session_open: bool,
    inscriptions: Vec<Member>,
}

#[derive(Serialize)]
struct ToggleSessionResponse {
    success: bool,
    #[serde(rename = "sessionOpen")]
    session_open: bool,
    message: String,
}

#[derive(Serialize)]
struct UpdatePlacesResponse {
    success: bool,
    message: String,
    #[serde(rename = "newMax")]
    new_max: i64,
    #[serde(rename = "totalCount")]
    total_count: i64,
}

#[derive(Serialize)]
struct ApprovePaymentResponse {
    success: bool,
    message: String,
    count: i64,
    max: i64,
}

fn ok(message: &str) -> Json<SimpleResponse> {
    Json(SimpleResponse {
        success: true,
        message: message.to_string(),
    })
}

// ─────────────────────────────────────────────────────────
// Public handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/inscriptions-count`
async fn inscriptions_count(State(state): State<SharedState>) -> Result<Json<Capacity>> {
    let capacity = workflow::check_capacity(&state.store).await?;
    info!(
        "inscriptions: {}/{}, session open: {}",
        capacity.count, capacity.max, capacity.session_open
    );
    Ok(Json(capacity))
}

/// `POST /api/submit`
async fn submit(
    State(state): State<SharedState>,
    Json(input): Json<NewSubmission>,
) -> Result<Json<SubmitResponse>> {
    let submission = workflow::submit(&state.store, &state.notifier, input).await?;
    Ok(Json(SubmitResponse {
        success: true,
        message: "submission received; the project is now under review".to_string(),
        id: submission.id,
    }))
}

/// `POST /api/confirm-payment`
///
/// Multipart form: `id`, `method` (`screenshot` | `transaction-id`), then
/// either a `proof` file or a `transactionId` field.
async fn confirm_payment(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>> {
    let mut id = None;
    let mut method = None;
    let mut transaction_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed upload: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("id") => id = Some(field_text(field).await?),
            Some("method") => method = Some(field_text(field).await?),
            Some("transactionId") => transaction_id = Some(field_text(field).await?),
            Some("proof") => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("could not read proof file: {e}")))?;
                file = Some((bytes.to_vec(), mime));
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| ApiError::Validation("id is required".to_string()))?;
    let method = match method.as_deref() {
        Some("screenshot") => ProofMethod::Screenshot,
        Some("transaction-id") => ProofMethod::TransactionId,
        _ => return Err(ApiError::Validation("invalid proof method".to_string())),
    };

    let submission = workflow::submit_payment_proof(
        &state.store,
        &state.notifier,
        &id,
        ProofSubmission {
            method,
            file,
            transaction_id,
        },
    )
    .await?;

    Ok(Json(SubmitResponse {
        success: true,
        message: "payment received and awaiting verification".to_string(),
        id: submission.id,
    }))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed field: {e}")))
}

#[derive(Deserialize)]
struct AcceptanceRequest {
    nom: String,
    email: String,
    whatsapp: String,
}

/// `POST /api/download-acceptance-pdf`
///
/// Returns the generated document and archives a copy.
async fn download_acceptance_pdf(
    State(state): State<SharedState>,
    Json(input): Json<AcceptanceRequest>,
) -> Result<Response> {
    let name = input.nom.trim();
    let email = input.email.trim();
    let whatsapp = input.whatsapp.trim();
    if name.is_empty() || email.is_empty() || whatsapp.is_empty() {
        return Err(ApiError::Validation(
            "nom, email and whatsapp are required".to_string(),
        ));
    }

    let now = Utc::now();
    let bytes = pdf::acceptance_document(&state.config.program_name, name, email, whatsapp, now)?;
    pdf::archive_copy(&state.config.archive_dir, name, &bytes).await;

    let filename = format!(
        "acceptance-{}-{}.pdf",
        name.replace(' ', "_"),
        now.format("%Y%m%d%H%M%S"),
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ─────────────────────────────────────────────────────────
// Admin session
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    password: String,
}

/// `POST /admin/login`
async fn login(
    State(state): State<SharedState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    if input.password.is_empty() {
        return Err(ApiError::Validation("password is required".to_string()));
    }
    let hash = state.store.admin_password_hash().await?;
    let token = state.sessions.issue(&hash, &input.password)?;
    info!("admin session issued: {}…", &token[..8]);
    Ok(Json(LoginResponse {
        success: true,
        token,
        message: "logged in".to_string(),
    }))
}

/// `POST /admin/logout` — idempotent.
async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Json<SimpleResponse> {
    if let Some(token) = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        state.sessions.revoke(token);
    }
    ok("logged out")
}

// ─────────────────────────────────────────────────────────
// Admin list views
// ─────────────────────────────────────────────────────────

/// `GET /admin/pending-payments` — the full submission registry, newest
/// first; both funnel stages are worked from this view.
async fn pending_payments(State(state): State<SharedState>) -> Result<Json<Vec<Submission>>> {
    Ok(Json(state.store.list_submissions().await?))
}

/// `GET /admin/inscriptions` — the confirmed-member registry.
async fn inscriptions(State(state): State<SharedState>) -> Result<Json<InscriptionsResponse>> {
    let members = state.store.list_members().await?;
    let config = state.store.config().await?;
    let total = members.len() as i64;
    Ok(Json(InscriptionsResponse {
        total,
        max: config.max_places,
        available: total < config.max_places,
        session_open: config.session_open,
        inscriptions: members,
    }))
}

// ─────────────────────────────────────────────────────────
// Admin workflow actions
// ─────────────────────────────────────────────────────────

/// `POST /admin/approve-project/:id`
async fn approve_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SimpleResponse>> {
    workflow::approve_project(&state.store, &state.notifier, &id).await?;
    Ok(ok("project approved; payment instructions sent"))
}

#[derive(Deserialize)]
struct RejectProjectRequest {
    reason: Option<String>,
}

/// `POST /admin/reject-project/:id`
async fn reject_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<RejectProjectRequest>>,
) -> Result<Json<SimpleResponse>> {
    let reason = body.and_then(|Json(input)| input.reason);
    workflow::reject_project(&state.store, &state.notifier, &id, reason).await?;
    Ok(ok("project rejected and applicant notified"))
}

#[derive(Deserialize)]
struct ApprovePaymentRequest {
    #[serde(rename = "groupLink")]
    group_link: Option<String>,
}

/// `POST /admin/approve-payment/:id`
async fn approve_payment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<ApprovePaymentRequest>>,
) -> Result<Json<ApprovePaymentResponse>> {
    let group_link = body.and_then(|Json(input)| input.group_link);
    let (_, count) = workflow::approve_payment(
        &state.store,
        &state.notifier,
        &state.config,
        &id,
        group_link,
    )
    .await?;
    let config = state.store.config().await?;
    Ok(Json(ApprovePaymentResponse {
        success: true,
        message: "payment approved and applicant notified".to_string(),
        count,
        max: config.max_places,
    }))
}

/// `POST /admin/reject-payment/:id`
async fn reject_payment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SimpleResponse>> {
    workflow::reject_payment(&state.store, &state.notifier, &id).await?;
    Ok(ok("payment rejected and applicant notified"))
}

// ─────────────────────────────────────────────────────────
// Admin configuration actions
// ─────────────────────────────────────────────────────────

/// `POST /admin/toggle-session`
async fn toggle_session(
    State(state): State<SharedState>,
) -> Result<Json<ToggleSessionResponse>> {
    let session_open = workflow::toggle_session(&state.store).await?;
    Ok(Json(ToggleSessionResponse {
        success: true,
        session_open,
        message: if session_open {
            "session opened".to_string()
        } else {
            "session closed".to_string()
        },
    }))
}

#[derive(Deserialize)]
struct UpdatePlacesRequest {
    action: PlacesAction,
    #[serde(rename = "maxPlaces")]
    max_places: Option<i64>,
}

/// `POST /admin/update-places`
async fn update_places(
    State(state): State<SharedState>,
    Json(input): Json<UpdatePlacesRequest>,
) -> Result<Json<UpdatePlacesResponse>> {
    let new_max = workflow::update_places(
        &state.store,
        state.config.default_max_places,
        input.action,
        input.max_places,
    )
    .await?;
    let total_count = state.store.member_count().await?;
    Ok(Json(UpdatePlacesResponse {
        success: true,
        message: format!("maximum places set to {new_max}"),
        new_max,
        total_count,
    }))
}

/// `POST /admin/reset-all`
async fn reset_all(State(state): State<SharedState>) -> Result<Json<SimpleResponse>> {
    state
        .store
        .reset_all(state.config.default_max_places)
        .await?;
    Ok(ok("all data has been reset"))
}

// ─────────────────────────────────────────────────────────
// Admin exports
// ─────────────────────────────────────────────────────────

/// `GET /admin/export-csv`
async fn export_csv(State(state): State<SharedState>) -> Result<Response> {
    let members = state.store.list_members().await?;
    if members.is_empty() {
        return Err(ApiError::Validation(
            "no confirmed members to export".to_string(),
        ));
    }

    let mut csv = String::from("ID,Name,Email,WhatsApp,Project,Date\n");
    for member in &members {
        let project = member.project.replace('"', "\"\"");
        csv.push_str(&format!(
            "{},\"{}\",\"{}\",\"{}\",\"{}\",\"{}\"\n",
            member.id,
            member.name,
            member.email,
            member.whatsapp,
            project,
            format_timestamp(member.confirmed_at),
        ));
    }

    let filename = format!("inscriptions_{}.csv", Utc::now().format("%Y-%m-%d"));
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "text/csv; charset=utf-8".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        // BOM so spreadsheet tools detect UTF-8.
        format!("\u{feff}{csv}"),
    )
        .into_response())
}

/// `GET /admin/export-pdf`
async fn export_pdf(State(state): State<SharedState>) -> Result<Response> {
    let members = state.store.list_members().await?;
    let config = state.store.config().await?;
    let bytes = pdf::member_registry(
        &state.config.program_name,
        &members,
        config.max_places,
        Utc::now(),
    )?;

    let filename = format!("inscriptions_{}.pdf", Utc::now().format("%Y-%m-%d"));
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
