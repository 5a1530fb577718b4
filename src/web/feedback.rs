use crate::db;
use crate::domain::forms::{is_valid_email, validate_submission};
use crate::domain::models::{priority_score, FeedbackAttachment, FeedbackStatus, FormType, NewFeedback, Urgency};
use crate::domain::urgency::classify;
use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::limit_submissions;
use crate::services::{attachments, notifications};
use crate::state::SharedState;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    middleware,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

pub const MAX_MESSAGE_CHARS: usize = 10_000;
const MAX_FILES_PER_REQUEST: usize = 5;

#[derive(Deserialize)]
pub struct SubmitPayload {
    pub form_type: String,
    pub message: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub client_role: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub form_data: Option<Value>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub id: i64,
    pub uuid: Uuid,
    pub urgency: Urgency,
    pub confidence: f64,
    pub reason: String,
    pub status: FeedbackStatus,
}

#[derive(Serialize)]
struct RejectedFile {
    filename: String,
    error: String,
}

pub fn router(state: SharedState) -> Router {
    // Each part may be up to the file limit; leave room for multipart framing.
    let upload_limit = state.config.uploads.max_file_size * MAX_FILES_PER_REQUEST + 64 * 1024;

    Router::new()
        .route("/", post(submit))
        .route(
            "/:id/attachments",
            post(upload_attachments)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(upload_limit))
                .get(list_attachments),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_submissions))
        .with_state(state)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trimmed, lowercased, de-duplicated tags in first-seen order.
pub(crate) fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Checks that need no database: form type, message bounds, email shape, payload shape.
fn check_payload(payload: &SubmitPayload) -> AppResult<(FormType, String)> {
    let form_type = FormType::try_from(payload.form_type.as_str()).map_err(|_| {
        AppError::Validation(format!(
            "unknown form_type '{}', expected technical, business or executive",
            payload.form_type
        ))
    })?;

    let message = payload.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::PayloadTooLarge(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    if let Some(email) = payload.client_email.as_deref().map(str::trim) {
        if !email.is_empty() && !is_valid_email(email) {
            return Err(AppError::Validation("client_email is not a valid email address".to_string()));
        }
    }
    match &payload.form_data {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => return Err(AppError::Validation("form_data must be an object".to_string())),
    }

    Ok((form_type, message.to_string()))
}

async fn submit(
    State(state): State<SharedState>,
    Json(payload): Json<SubmitPayload>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let (form_type, message) = check_payload(&payload)?;

    let form_data = match payload.form_data {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let fields = db::list_form_fields(&state.pool, form_type, false).await?;
    if !fields.is_empty() {
        let report = validate_submission(&fields, &form_data);
        if !report.valid {
            return Err(AppError::InvalidSubmission(report.errors));
        }
    }

    let assessment = classify(&message);
    let new = NewFeedback {
        form_type,
        client_id: clean(payload.client_id),
        client_name: clean(payload.client_name),
        client_email: clean(payload.client_email),
        client_role: clean(payload.client_role),
        problem_text: message,
        urgency: assessment.urgency,
        urgency_confidence: assessment.confidence,
        urgency_reason: assessment.reason,
        category: clean(payload.category),
        tags: clean_tags(payload.tags),
        priority_score: priority_score(assessment.urgency, assessment.confidence),
        form_data: Value::Object(form_data),
    };

    let record = db::insert_feedback(&state.pool, &new).await?;
    tracing::info!(
        "Feedback {} received ({}, urgency {} at {:.2})",
        record.id,
        record.form_type.as_str(),
        record.urgency.as_str(),
        record.urgency_confidence
    );

    let response = SubmitResponse {
        id: record.id,
        uuid: record.uuid,
        urgency: record.urgency,
        confidence: record.urgency_confidence,
        reason: record.urgency_reason.clone(),
        status: record.status,
    };
    // The row is committed at this point; delivery happens in the background.
    notifications::enqueue(&state.notifications, record);

    Ok((StatusCode::CREATED, Json(response)))
}

async fn upload_attachments(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    if !db::feedback_exists(&state.pool, id).await? {
        return Err(AppError::NotFound(format!("feedback {} not found", id)));
    }

    let root = std::path::Path::new(&state.config.uploads.dir);
    let mut uploaded: Vec<FeedbackAttachment> = Vec::new();
    let mut rejected: Vec<RejectedFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {}", e)))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if uploaded.len() + rejected.len() >= MAX_FILES_PER_REQUEST {
            rejected.push(RejectedFile {
                filename: raw_name,
                error: format!("at most {} files per request", MAX_FILES_PER_REQUEST),
            });
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("failed to read upload: {}", e)))?;

        let stored = match attachments::store(
            root,
            &raw_name,
            &content_type,
            &bytes,
            state.config.uploads.max_file_size,
            Utc::now(),
        )
        .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Attachment '{}' for feedback {} rejected: {}", raw_name, id, e);
                rejected.push(RejectedFile {
                    filename: raw_name,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let row = db::NewAttachment {
            feedback_id: id,
            filename: &stored.filename,
            original_filename: &stored.original_filename,
            file_path: &stored.file_path,
            file_size: stored.file_size as i64,
            content_type: &stored.content_type,
        };
        match db::insert_attachment(&state.pool, &row).await {
            Ok(attachment) => uploaded.push(attachment),
            Err(e) => {
                attachments::remove_files(&[stored.file_path.clone()]).await;
                return Err(e.into());
            }
        }
    }

    if uploaded.is_empty() && rejected.is_empty() {
        return Err(AppError::Validation("no files in request".to_string()));
    }
    tracing::info!(
        "Feedback {}: {} attachment(s) stored, {} rejected",
        id,
        uploaded.len(),
        rejected.len()
    );

    let status = if uploaded.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(json!({
            "success": !uploaded.is_empty(),
            "uploaded": uploaded,
            "rejected": rejected,
        })),
    ))
}

async fn list_attachments(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<FeedbackAttachment>>> {
    if !db::feedback_exists(&state.pool, id).await? {
        return Err(AppError::NotFound(format!("feedback {} not found", id)));
    }
    Ok(Json(db::list_attachments(&state.pool, id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn submit_request(body: Value, client: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .header("x-forwarded-for", client)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_form_type_is_rejected() {
        let (state, _rx) = test_state();
        let resp = router(state)
            .oneshot(submit_request(json!({"form_type": "marketing", "message": "hi"}), "1.1.1.1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("marketing"));
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let (state, _rx) = test_state();
        let resp = router(state)
            .oneshot(submit_request(json!({"form_type": "tech", "message": "   "}), "1.1.1.1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_message_is_413() {
        let (state, _rx) = test_state();
        let message = "я".repeat(MAX_MESSAGE_CHARS + 1);
        let resp = router(state)
            .oneshot(submit_request(json!({"form_type": "business", "message": message}), "1.1.1.1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn bad_client_email_is_rejected_before_storage() {
        let (state, _rx) = test_state();
        let resp = router(state)
            .oneshot(submit_request(
                json!({"form_type": "exec", "message": "report", "client_email": "nope"}),
                "1.1.1.1",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submissions_are_rate_limited_per_client() {
        let (state, _rx) = test_state();
        let app = router(state);
        let bad = json!({"form_type": "unknown", "message": "x"});

        for _ in 0..crate::middleware::rate_limit::SUBMIT_MAX_REQUESTS {
            let resp = app.clone().oneshot(submit_request(bad.clone(), "9.9.9.9")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        let resp = app.clone().oneshot(submit_request(bad.clone(), "9.9.9.9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let resp = app.oneshot(submit_request(bad, "8.8.8.8")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn tags_are_trimmed_lowercased_and_deduplicated() {
        let tags = clean_tags(vec![" UI ".into(), "ui".into(), "".into(), "Billing".into()]);
        assert_eq!(tags, vec!["ui", "billing"]);
    }

    #[test]
    fn form_data_must_be_an_object() {
        let payload: SubmitPayload = serde_json::from_value(json!({
            "form_type": "technical",
            "message": "ok",
            "form_data": [1, 2]
        }))
        .unwrap();
        assert!(matches!(check_payload(&payload), Err(AppError::Validation(_))));

        let payload: SubmitPayload = serde_json::from_value(json!({
            "form_type": "technical",
            "message": "  ok  ",
            "form_data": {"env": "prod"}
        }))
        .unwrap();
        let (form_type, message) = check_payload(&payload).unwrap();
        assert_eq!(form_type, FormType::Technical);
        assert_eq!(message, "ok");
    }
}
