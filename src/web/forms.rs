use crate::db;
use crate::domain::forms::{render_sections, validate_submission, FormFieldConfig, FormSection, ValidationReport};
use crate::domain::models::FormType;
use crate::error::{AppError, AppResult};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};

pub const SUBMIT_URL: &str = "/api/feedback";

#[derive(Serialize)]
pub struct FormSummary {
    pub form_type: FormType,
    pub title: &'static str,
    pub fields_count: i64,
    pub has_config: bool,
}

#[derive(Serialize)]
pub struct RenderedForm {
    pub form_type: FormType,
    pub title: &'static str,
    pub sections: Vec<FormSection>,
    pub submit_url: &'static str,
    pub method: &'static str,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_forms))
        .route("/:form_type", get(get_form))
        .route("/:form_type/validate", post(validate_form))
        .with_state(state)
}

pub fn parse_form_type(raw: &str) -> AppResult<FormType> {
    FormType::try_from(raw).map_err(|_| AppError::Validation(format!("unknown form type '{}'", raw)))
}

/// Active fields of a form; a form without any is treated as missing.
async fn active_schema(state: &SharedState, form_type: FormType) -> AppResult<Vec<FormFieldConfig>> {
    let fields = db::list_form_fields(&state.pool, form_type, false).await?;
    if fields.is_empty() {
        return Err(AppError::NotFound(format!(
            "form '{}' has no configured fields",
            form_type.as_str()
        )));
    }
    Ok(fields)
}

async fn list_forms(State(state): State<SharedState>) -> AppResult<Json<Vec<FormSummary>>> {
    let counts = db::active_field_counts(&state.pool).await?;
    let forms = FormType::ALL
        .iter()
        .map(|form_type| {
            let fields_count = counts
                .iter()
                .find(|(ft, _)| ft == form_type)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            FormSummary {
                form_type: *form_type,
                title: form_type.title(),
                fields_count,
                has_config: fields_count > 0,
            }
        })
        .collect();
    Ok(Json(forms))
}

async fn get_form(
    State(state): State<SharedState>,
    Path(form_type): Path<String>,
) -> AppResult<Json<RenderedForm>> {
    let form_type = parse_form_type(&form_type)?;
    let fields = active_schema(&state, form_type).await?;

    Ok(Json(RenderedForm {
        form_type,
        title: form_type.title(),
        sections: render_sections(&fields),
        submit_url: SUBMIT_URL,
        method: "POST",
    }))
}

async fn validate_form(
    State(state): State<SharedState>,
    Path(form_type): Path<String>,
    Json(payload): Json<Map<String, Value>>,
) -> AppResult<Json<ValidationReport>> {
    let form_type = parse_form_type(&form_type)?;
    let fields = active_schema(&state, form_type).await?;
    Ok(Json(validate_submission(&fields, &payload)))
}
