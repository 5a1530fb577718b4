use crate::db::{self, Paging};
use crate::domain::forms::{parse_reorder_batch, FieldDraft, FieldPatch, FormFieldConfig};
use crate::domain::lifecycle::{self, check_satisfaction};
use crate::domain::models::{
    FeedbackAttachment, FeedbackFilter, FeedbackRecord, FeedbackStats, FeedbackStatus, FormType,
    Urgency,
};
use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::client_key;
use crate::services::{attachments, export};
use crate::state::SharedState;
use crate::web::feedback::clean_tags;
use crate::web::forms::parse_form_type;
use crate::web::session::{self, AdminSession};
use argon2::{password_hash::PasswordHash, Argon2, PasswordVerifier};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/feedbacks", get(list_feedbacks))
        .route("/feedbacks/unassigned", get(list_unassigned))
        .route(
            "/feedbacks/:id",
            get(get_feedback).delete(delete_feedback).patch(update_metadata),
        )
        .route("/feedbacks/:id/assign", post(assign_feedback))
        .route("/feedbacks/:id/resolve", post(resolve_feedback))
        .route("/feedbacks/:id/reject", post(reject_feedback))
        .route("/feedbacks/:id/status", put(override_status))
        .route("/forms/:form_type/fields", get(list_fields))
        .route("/forms/fields", post(create_field))
        .route("/forms/fields/:id", put(update_field).delete(delete_field))
        .route("/forms/fields/:id/toggle", post(toggle_field))
        .route("/forms/reorder", post(reorder_fields))
        .route("/export/feedbacks.csv", get(export_csv))
        .route("/export/feedbacks.xlsx", get(export_xlsx))
        .route("/export/feedbacks.json", get(export_json))
        .route("/notifications/test", get(test_notifications))
        .with_state(state)
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackRecord>,
}

fn done(message: String, feedback: FeedbackRecord) -> Json<ActionResponse> {
    Json(ActionResponse {
        success: true,
        message,
        feedback: Some(feedback),
    })
}

// ============================================
// Session
// ============================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_in: i64,
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::error!("ADMIN_PASSWORD_HASH is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

async fn login(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let key = client_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    if !state.login_limiter.check(&key).await {
        tracing::warn!("Login rate limit exceeded for {}", key);
        return Err(AppError::RateLimited);
    }

    let admin = &state.config.admin;
    if payload.username.trim() != admin.username || !verify_password(&payload.password, &admin.password_hash) {
        tracing::warn!("Failed admin login for '{}' from {}", payload.username, key);
        return Err(AppError::Unauthorized);
    }

    let token = session::sign_session(&admin.username, admin.session_ttl_hours, &admin.session_key, Utc::now())
        .map_err(|e| AppError::Internal(format!("failed to sign session: {}", e)))?;
    let max_age = admin.session_ttl_hours * 3600;
    tracing::info!("Admin '{}' logged in", admin.username);

    Ok((
        [(header::SET_COOKIE, session::session_cookie(&token, max_age, admin.secure_cookies))],
        Json(LoginResponse {
            success: true,
            token,
            expires_in: max_age,
        }),
    ))
}

async fn logout(State(state): State<SharedState>) -> impl IntoResponse {
    (
        [(
            header::SET_COOKIE,
            session::session_cookie("", 0, state.config.admin.secure_cookies),
        )],
        Json(json!({ "success": true, "message": "logged out" })),
    )
}

// ============================================
// Triage
// ============================================

#[derive(Serialize)]
pub struct DashboardResponse {
    pub stats: FeedbackStats,
    pub recent: Vec<FeedbackRecord>,
}

const DASHBOARD_RECENT: i64 = 10;

async fn dashboard(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
) -> AppResult<Json<DashboardResponse>> {
    let stats = db::feedback_stats(&state.pool, Utc::now()).await?;
    let recent = db::list_feedbacks(
        &state.pool,
        &FeedbackFilter::default(),
        Paging {
            skip: 0,
            limit: DASHBOARD_RECENT,
        },
    )
    .await?;
    Ok(Json(DashboardResponse {
        stats,
        recent: recent.items,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub form_type: Option<FormType>,
    pub status: Option<FeedbackStatus>,
    pub urgency: Option<Urgency>,
    pub client_email: Option<String>,
    pub unassigned_only: bool,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl ListQuery {
    fn filter(&self) -> FeedbackFilter {
        FeedbackFilter {
            form_type: self.form_type,
            status: self.status,
            urgency: self.urgency,
            client_email: self
                .client_email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            unassigned_only: self.unassigned_only,
        }
    }

    fn paging(&self) -> Paging {
        let defaults = Paging::default();
        Paging {
            skip: self.skip.unwrap_or(defaults.skip),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

async fn list_feedbacks(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<db::FeedbackPage>> {
    Ok(Json(db::list_feedbacks(&state.pool, &query.filter(), query.paging()).await?))
}

async fn list_unassigned(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<db::FeedbackPage>> {
    let mut filter = query.filter();
    filter.unassigned_only = true;
    Ok(Json(db::list_feedbacks(&state.pool, &filter, query.paging()).await?))
}

#[derive(Serialize)]
pub struct FeedbackDetail {
    pub feedback: FeedbackRecord,
    pub attachments: Vec<FeedbackAttachment>,
}

async fn get_feedback(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<FeedbackDetail>> {
    let feedback = db::get_feedback(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("feedback {} not found", id)))?;
    let attachments = db::list_attachments(&state.pool, id).await?;
    Ok(Json(FeedbackDetail { feedback, attachments }))
}

async fn delete_feedback(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let paths = db::delete_feedback(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("feedback {} not found", id)))?;
    attachments::remove_files(&paths).await;
    tracing::info!("Feedback {} deleted by {} ({} attachment(s))", id, admin, paths.len());
    Ok(Json(json!({
        "success": true,
        "message": format!("Feedback {} deleted", id),
    })))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub assigned_to: String,
}

async fn assign_feedback(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<AssignRequest>,
) -> AppResult<Json<ActionResponse>> {
    let now = Utc::now();
    let record = db::update_feedback(&state.pool, id, |r| lifecycle::assign(r, &payload.assigned_to, now)).await?;
    let assignee = record.assigned_to.clone().unwrap_or_default();
    tracing::info!("Feedback {} assigned to {} by {}", id, assignee, admin);
    Ok(done(format!("Feedback {} assigned to {}", id, assignee), record))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ResolveRequest {
    pub satisfaction_score: Option<i16>,
}

async fn resolve_feedback(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    payload: Option<Json<ResolveRequest>>,
) -> AppResult<Json<ActionResponse>> {
    let score = payload.and_then(|Json(p)| p.satisfaction_score);
    // Fail fast on a bad score before taking the row lock.
    if let Some(score) = score {
        check_satisfaction(score)?;
    }

    let now = Utc::now();
    let record = db::update_feedback(&state.pool, id, |r| lifecycle::resolve(r, score, now)).await?;
    tracing::info!(
        "Feedback {} resolved by {} (response time {:?}s)",
        id,
        admin,
        record.response_time_seconds
    );
    Ok(done(format!("Feedback {} resolved", id), record))
}

async fn reject_feedback(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ActionResponse>> {
    let now = Utc::now();
    let record = db::update_feedback(&state.pool, id, |r| lifecycle::reject(r, now)).await?;
    tracing::info!("Feedback {} rejected by {}", id, admin);
    Ok(done(format!("Feedback {} rejected", id), record))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

async fn override_status(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<ActionResponse>> {
    let status = FeedbackStatus::try_from(payload.status.as_str())
        .map_err(|_| AppError::Validation(format!("unknown status '{}'", payload.status)))?;

    let now = Utc::now();
    let record = db::update_feedback(&state.pool, id, |r| {
        lifecycle::override_status(r, status, now);
        Ok(())
    })
    .await?;
    tracing::info!("Feedback {} status set to {} by {}", id, status.as_str(), admin);
    Ok(done(format!("Feedback {} status set to {}", id, status.as_str()), record))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct MetadataRequest {
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority_score: Option<i32>,
}

fn apply_metadata(record: &mut FeedbackRecord, payload: MetadataRequest, now: DateTime<Utc>) {
    if let Some(category) = payload.category {
        let category = category.trim().to_string();
        record.category = (!category.is_empty()).then_some(category);
    }
    if let Some(tags) = payload.tags {
        record.tags = clean_tags(tags);
    }
    if let Some(priority) = payload.priority_score {
        record.priority_score = priority;
    }
    record.updated_at = now;
}

async fn update_metadata(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<MetadataRequest>,
) -> AppResult<Json<ActionResponse>> {
    if matches!(payload.priority_score, Some(p) if p < 0) {
        return Err(AppError::Validation("priority_score must be non-negative".to_string()));
    }

    let now = Utc::now();
    let record = db::update_feedback(&state.pool, id, |r| {
        apply_metadata(r, payload, now);
        Ok(())
    })
    .await?;
    tracing::info!("Feedback {} metadata updated by {}", id, admin);
    Ok(done(format!("Feedback {} updated", id), record))
}

// ============================================
// Form editor
// ============================================

async fn list_fields(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Path(form_type): Path<String>,
) -> AppResult<Json<Vec<FormFieldConfig>>> {
    let form_type = parse_form_type(&form_type)?;
    Ok(Json(db::list_form_fields(&state.pool, form_type, true).await?))
}

async fn create_field(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Json(draft): Json<FieldDraft>,
) -> AppResult<Json<FormFieldConfig>> {
    let draft = draft.normalized()?;
    let field = db::create_form_field(&state.pool, &draft).await?;
    tracing::info!(
        "Form field {} '{}' added to {} by {}",
        field.id,
        field.field_name,
        field.form_type.as_str(),
        admin
    );
    Ok(Json(field))
}

async fn update_field(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<FieldPatch>,
) -> AppResult<Json<FormFieldConfig>> {
    let existing = db::get_form_field(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("form field {} not found", id)))?;
    let draft = FieldDraft::from_existing(&existing).apply(patch).normalized()?;
    let field = db::update_form_field(&state.pool, id, &draft).await?;
    tracing::info!("Form field {} updated by {}", id, admin);
    Ok(Json(field))
}

#[derive(Deserialize)]
pub struct ToggleRequest {
    pub is_active: bool,
}

async fn toggle_field(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<ToggleRequest>,
) -> AppResult<Json<Value>> {
    if !db::set_form_field_active(&state.pool, id, payload.is_active).await? {
        return Err(AppError::NotFound(format!("form field {} not found", id)));
    }
    let state_word = if payload.is_active { "activated" } else { "deactivated" };
    tracing::info!("Form field {} {} by {}", id, state_word, admin);
    Ok(Json(json!({
        "success": true,
        "message": format!("Field {} {}", id, state_word),
    })))
}

async fn delete_field(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    if !db::delete_form_field(&state.pool, id).await? {
        return Err(AppError::NotFound(format!("form field {} not found", id)));
    }
    tracing::info!("Form field {} deleted by {}", id, admin);
    Ok(Json(json!({
        "success": true,
        "message": format!("Field {} deleted", id),
    })))
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub field_orders: String,
}

#[derive(Serialize)]
pub struct ReorderResponse {
    pub success: bool,
    pub updated: usize,
    pub skipped: usize,
}

async fn reorder_fields(
    AdminSession(admin): AdminSession,
    State(state): State<SharedState>,
    Json(payload): Json<ReorderRequest>,
) -> AppResult<Json<ReorderResponse>> {
    let batch = parse_reorder_batch(&payload.field_orders);
    if !batch.skipped.is_empty() {
        tracing::warn!("Reorder entries skipped: {:?}", batch.skipped);
    }

    let (updated, skipped) = if batch.pairs.is_empty() {
        (0, batch.skipped.len())
    } else {
        db::reorder_form_fields(&state.pool, &batch).await?
    };
    tracing::info!("Form fields reordered by {}: {} updated, {} skipped", admin, updated, skipped);
    Ok(Json(ReorderResponse {
        success: true,
        updated,
        skipped,
    }))
}

// ============================================
// Export
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportQuery {
    pub form_type: Option<FormType>,
    pub status: Option<FeedbackStatus>,
    pub urgency: Option<Urgency>,
}

async fn export_rows(state: &SharedState, query: &ExportQuery) -> AppResult<Vec<FeedbackRecord>> {
    let filter = FeedbackFilter {
        form_type: query.form_type,
        status: query.status,
        urgency: query.urgency,
        ..FeedbackFilter::default()
    };
    let rows = db::export_feedbacks(&state.pool, &filter, export::EXPORT_LIMIT).await?;
    tracing::info!("Exporting {} feedback row(s)", rows.len());
    Ok(rows)
}

fn download(content_type: &'static str, ext: &str, body: Vec<u8>) -> impl IntoResponse {
    let filename = format!("feedbacks_{}.{}", Utc::now().format("%Y%m%d_%H%M"), ext);
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
}

async fn export_csv(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<impl IntoResponse> {
    let rows = export_rows(&state, &query).await?;
    Ok(download("text/csv; charset=utf-8", "csv", export::to_csv(&rows)?))
}

async fn export_xlsx(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<impl IntoResponse> {
    let rows = export_rows(&state, &query).await?;
    Ok(download(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
        export::to_xlsx(&rows)?,
    ))
}

async fn export_json(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Json<Value>> {
    let rows = export_rows(&state, &query).await?;
    Ok(Json(export::to_json(&rows)))
}

// ============================================
// Notification channels
// ============================================

#[derive(Serialize)]
pub struct ChannelCheck {
    pub configured: bool,
    pub ok: bool,
    pub detail: String,
}

impl ChannelCheck {
    fn disabled() -> Self {
        ChannelCheck {
            configured: false,
            ok: false,
            detail: "not configured".to_string(),
        }
    }
}

async fn test_notifications(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
) -> Json<Value> {
    let telegram = match &state.channels.telegram {
        None => ChannelCheck::disabled(),
        Some(bot) => match bot.test_connection().await {
            Ok(username) => ChannelCheck {
                configured: true,
                ok: true,
                detail: format!("connected as @{}", username),
            },
            Err(e) => {
                tracing::error!("Telegram connectivity check failed: {:#}", e);
                ChannelCheck {
                    configured: true,
                    ok: false,
                    detail: e.to_string(),
                }
            }
        },
    };

    let email = match &state.channels.email {
        None => ChannelCheck::disabled(),
        Some(mailer) => match mailer.test_connection().await {
            Ok(true) => ChannelCheck {
                configured: true,
                ok: true,
                detail: "SMTP server reachable".to_string(),
            },
            Ok(false) => ChannelCheck {
                configured: true,
                ok: false,
                detail: "SMTP server did not accept the connection".to_string(),
            },
            Err(e) => {
                tracing::error!("SMTP connectivity check failed: {:#}", e);
                ChannelCheck {
                    configured: true,
                    ok: false,
                    detail: e.to_string(),
                }
            }
        },
    };

    Json(json!({ "telegram": telegram, "email": email }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn state_with_password(password: &str) -> SharedState {
        let (state, _rx) = test_state();
        let salt = SaltString::from_b64("YWJjZGVmZ2hpamtsbW5vcA").unwrap();
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string();
        let mut inner = (*state).clone();
        let mut config = (*inner.config).clone();
        config.admin.password_hash = hash;
        inner.config = std::sync::Arc::new(config);
        std::sync::Arc::new(inner)
    }

    fn admin_token(state: &SharedState) -> String {
        let admin = &state.config.admin;
        session::sign_session(&admin.username, 1, &admin.session_key, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn admin_routes_require_a_session() {
        let (state, _rx) = test_state();
        let app = router(state);
        for (method, uri) in [
            ("GET", "/dashboard"),
            ("GET", "/feedbacks"),
            ("POST", "/feedbacks/1/reject"),
            ("DELETE", "/forms/fields/3"),
            ("GET", "/export/feedbacks.csv"),
        ] {
            let resp = app
                .clone()
                .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn token_signed_with_another_key_is_refused() {
        let (state, _rx) = test_state();
        let forged = session::sign_session("admin", 1, &[9u8; 32], Utc::now()).unwrap();
        let resp = router(state)
            .oneshot(json_request("GET", "/dashboard", Some(&forged), Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_sets_session_cookie() {
        let state = state_with_password("s3cret");
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/login",
                None,
                json!({"username": "admin", "password": "wrong"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(json_request(
                "POST",
                "/login",
                None,
                json!({"username": "admin", "password": "s3cret"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("session="));
        assert!(cookie.contains("HttpOnly"));
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["expires_in"], 12 * 3600);
    }

    #[tokio::test]
    async fn login_attempts_are_rate_limited() {
        let (state, _rx) = test_state();
        let app = router(state);
        for _ in 0..crate::middleware::rate_limit::LOGIN_MAX_ATTEMPTS {
            let resp = app
                .clone()
                .oneshot(json_request("POST", "/login", None, json!({"username": "x", "password": "y"})))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        let resp = app
            .oneshot(json_request("POST", "/login", None, json!({"username": "x", "password": "y"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn out_of_range_satisfaction_is_a_bad_request() {
        let (state, _rx) = test_state();
        let token = admin_token(&state);
        let resp = router(state)
            .oneshot(json_request(
                "POST",
                "/feedbacks/1/resolve",
                Some(&token),
                json!({"satisfaction_score": 9}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["message"].as_str().unwrap().contains("between 1 and 5"));
    }

    #[tokio::test]
    async fn negative_priority_and_unknown_status_are_rejected() {
        let (state, _rx) = test_state();
        let token = admin_token(&state);
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(json_request("PATCH", "/feedbacks/1", Some(&token), json!({"priority_score": -1})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(json_request("PUT", "/feedbacks/1/status", Some(&token), json!({"status": "archived"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reorder_with_only_malformed_entries_skips_everything() {
        let (state, _rx) = test_state();
        let token = admin_token(&state);
        let resp = router(state)
            .oneshot(json_request(
                "POST",
                "/forms/reorder",
                Some(&token),
                json!({"field_orders": "bad,x:1,2:y"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body, json!({"success": true, "updated": 0, "skipped": 3}));
    }

    #[tokio::test]
    async fn invalid_field_draft_is_rejected_before_storage() {
        let (state, _rx) = test_state();
        let token = admin_token(&state);
        let resp = router(state)
            .oneshot(json_request(
                "POST",
                "/forms/fields",
                Some(&token),
                json!({
                    "form_type": "technical",
                    "field_type": "radio",
                    "field_label": "Environment",
                    "field_name": "env"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn channel_check_reports_unconfigured_channels() {
        let (state, _rx) = test_state();
        let token = admin_token(&state);
        let resp = router(state)
            .oneshot(json_request("GET", "/notifications/test", Some(&token), Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["telegram"]["configured"], false);
        assert_eq!(body["email"]["detail"], "not configured");
    }

    #[test]
    fn metadata_patch_dedups_tags_and_keeps_unset_fields() {
        let created = Utc::now();
        let mut record = crate::domain::lifecycle::sample_record(created);
        record.category = Some("billing".to_string());

        let payload: MetadataRequest =
            serde_json::from_value(json!({"tags": ["a", " B ", "a", "b", ""]})).unwrap();
        apply_metadata(&mut record, payload, created);
        assert_eq!(record.tags, vec!["a", "b"]);
        assert_eq!(record.category.as_deref(), Some("billing"));
        assert_eq!(record.priority_score, 100);

        let payload: MetadataRequest =
            serde_json::from_value(json!({"category": "  ", "priority_score": 7})).unwrap();
        apply_metadata(&mut record, payload, created);
        assert!(record.category.is_none());
        assert_eq!(record.priority_score, 7);
    }

    #[test]
    fn list_query_builds_filter_and_paging() {
        let query = ListQuery {
            form_type: Some(FormType::Business),
            client_email: Some("  ".to_string()),
            limit: Some(5000),
            ..ListQuery::default()
        };
        let filter = query.filter();
        assert_eq!(filter.form_type, Some(FormType::Business));
        assert!(filter.client_email.is_none());
        assert_eq!(query.paging().clamped().limit, db::MAX_PAGE_SIZE);
        assert_eq!(query.paging().skip, 0);
    }
}
