use crate::domain::forms::{FieldDraft, FormError, FormFieldConfig, ReorderBatch, MAX_FIELD_ORDER};
use crate::domain::lifecycle::LifecycleError;
use crate::domain::models::{
    FeedbackAttachment, FeedbackFilter, FeedbackRecord, FeedbackStats, FeedbackStatus, FormType,
    NewFeedback, Urgency,
};
use crate::error::{is_unique_violation, AppError, AppResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MAX_PAGE_SIZE: i64 = 1000;
pub const HISTOGRAM_DAYS: i64 = 7;

const FEEDBACK_COLUMNS: &str = r#"
    id, uuid, form_type, client_id, client_name, client_email, client_role,
    problem_text, urgency, urgency_confidence, urgency_reason, category, tags,
    status, assigned_to, priority_score, form_data, created_at, updated_at,
    resolved_at, response_time_seconds, satisfaction_score
"#;

const FIELD_COLUMNS: &str = r#"
    id, form_type, section_name, field_order, field_type, field_label, field_name,
    options, required, validation_rules, placeholder, help_text, is_active,
    created_at, updated_at
"#;

// Shared WHERE clause; parameters $1..$5 follow FeedbackFilter field order.
const FILTER_CLAUSE: &str = r#"
    WHERE ($1::form_type IS NULL OR form_type = $1)
      AND ($2::feedback_status IS NULL OR status = $2)
      AND ($3::urgency_level IS NULL OR urgency = $3)
      AND ($4::text IS NULL OR lower(client_email) = lower($4))
      AND ($5 = FALSE OR assigned_to IS NULL)
"#;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

impl Default for Paging {
    fn default() -> Self {
        Paging {
            skip: 0,
            limit: default_limit(),
        }
    }
}

impl Paging {
    pub fn clamped(self) -> Self {
        Paging {
            skip: self.skip.max(0),
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> i64 {
        self.skip / self.limit + 1
    }

    pub fn pages(&self, total: i64) -> i64 {
        (total + self.limit - 1) / self.limit
    }
}

#[derive(Debug, Serialize)]
pub struct FeedbackPage {
    pub items: Vec<FeedbackRecord>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
    pub limit: i64,
}

// ============================================
// Feedback records
// ============================================

pub async fn insert_feedback(pool: &PgPool, new: &NewFeedback) -> sqlx::Result<FeedbackRecord> {
    let sql = format!(
        r#"
        INSERT INTO feedbacks (
            uuid, form_type, client_id, client_name, client_email, client_role,
            problem_text, urgency, urgency_confidence, urgency_reason, category,
            tags, priority_score, form_data
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {FEEDBACK_COLUMNS}
        "#
    );
    sqlx::query_as::<_, FeedbackRecord>(&sql)
        .bind(Uuid::new_v4())
        .bind(new.form_type)
        .bind(&new.client_id)
        .bind(&new.client_name)
        .bind(&new.client_email)
        .bind(&new.client_role)
        .bind(&new.problem_text)
        .bind(new.urgency)
        .bind(new.urgency_confidence)
        .bind(&new.urgency_reason)
        .bind(&new.category)
        .bind(&new.tags)
        .bind(new.priority_score)
        .bind(&new.form_data)
        .fetch_one(pool)
        .await
}

pub async fn get_feedback(pool: &PgPool, id: i64) -> sqlx::Result<Option<FeedbackRecord>> {
    let sql = format!("SELECT {FEEDBACK_COLUMNS} FROM feedbacks WHERE id = $1");
    sqlx::query_as::<_, FeedbackRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_feedbacks(
    pool: &PgPool,
    filter: &FeedbackFilter,
    paging: Paging,
) -> sqlx::Result<FeedbackPage> {
    let paging = paging.clamped();
    let sql = format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedbacks {FILTER_CLAUSE} \
         ORDER BY created_at DESC, id DESC OFFSET $6 LIMIT $7"
    );
    let items = sqlx::query_as::<_, FeedbackRecord>(&sql)
        .bind(filter.form_type)
        .bind(filter.status)
        .bind(filter.urgency)
        .bind(&filter.client_email)
        .bind(filter.unassigned_only)
        .bind(paging.skip)
        .bind(paging.limit)
        .fetch_all(pool)
        .await?;

    let total = count_feedbacks(pool, filter).await?;
    Ok(FeedbackPage {
        items,
        total,
        page: paging.page(),
        pages: paging.pages(total),
        limit: paging.limit,
    })
}

pub async fn count_feedbacks(pool: &PgPool, filter: &FeedbackFilter) -> sqlx::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM feedbacks {FILTER_CLAUSE}");
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(filter.form_type)
        .bind(filter.status)
        .bind(filter.urgency)
        .bind(&filter.client_email)
        .bind(filter.unassigned_only)
        .fetch_one(pool)
        .await
}

/// Rows for export, newest first, capped at `limit`.
pub async fn export_feedbacks(
    pool: &PgPool,
    filter: &FeedbackFilter,
    limit: i64,
) -> sqlx::Result<Vec<FeedbackRecord>> {
    let sql = format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedbacks {FILTER_CLAUSE} \
         ORDER BY created_at DESC, id DESC LIMIT $6"
    );
    sqlx::query_as::<_, FeedbackRecord>(&sql)
        .bind(filter.form_type)
        .bind(filter.status)
        .bind(filter.urgency)
        .bind(&filter.client_email)
        .bind(filter.unassigned_only)
        .bind(limit)
        .fetch_all(pool)
        .await
}

async fn lock_feedback(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> sqlx::Result<Option<FeedbackRecord>> {
    let sql = format!("SELECT {FEEDBACK_COLUMNS} FROM feedbacks WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, FeedbackRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

async fn write_feedback(
    tx: &mut Transaction<'_, Postgres>,
    record: &FeedbackRecord,
) -> sqlx::Result<FeedbackRecord> {
    let sql = format!(
        r#"
        UPDATE feedbacks
        SET status = $2,
            assigned_to = $3,
            resolved_at = $4,
            response_time_seconds = $5,
            satisfaction_score = $6,
            category = $7,
            tags = $8,
            priority_score = $9,
            updated_at = $10
        WHERE id = $1
        RETURNING {FEEDBACK_COLUMNS}
        "#
    );
    sqlx::query_as::<_, FeedbackRecord>(&sql)
        .bind(record.id)
        .bind(record.status)
        .bind(&record.assigned_to)
        .bind(record.resolved_at)
        .bind(record.response_time_seconds)
        .bind(record.satisfaction_score)
        .bind(&record.category)
        .bind(&record.tags)
        .bind(record.priority_score)
        .bind(record.updated_at)
        .fetch_one(&mut **tx)
        .await
}

/// Lock the row, apply `change` to it and persist the result in one transaction.
pub async fn update_feedback<F>(pool: &PgPool, id: i64, change: F) -> AppResult<FeedbackRecord>
where
    F: FnOnce(&mut FeedbackRecord) -> Result<(), LifecycleError>,
{
    let mut tx = pool.begin().await?;
    let mut record = lock_feedback(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("feedback {} not found", id)))?;

    // Dropping the transaction on error rolls it back.
    change(&mut record)?;
    let saved = write_feedback(&mut tx, &record).await?;
    tx.commit().await?;
    Ok(saved)
}

/// Hard delete. Returns the stored file paths of the cascaded attachments.
pub async fn delete_feedback(pool: &PgPool, id: i64) -> sqlx::Result<Option<Vec<String>>> {
    let mut tx = pool.begin().await?;
    let paths: Vec<String> =
        sqlx::query_scalar("SELECT file_path FROM feedback_attachments WHERE feedback_id = $1")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
    let result = sqlx::query("DELETE FROM feedbacks WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok((result.rows_affected() > 0).then_some(paths))
}

// ============================================
// Statistics
// ============================================

#[derive(Debug, FromRow)]
struct Totals {
    total: i64,
    high: i64,
    new: i64,
    resolved: i64,
    avg_response_seconds: Option<f64>,
    satisfaction_avg: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn count_map<K: Copy + PartialEq>(
    all: &[K],
    name: fn(&K) -> &'static str,
    rows: &[(K, i64)],
) -> BTreeMap<&'static str, i64> {
    all.iter()
        .map(|key| {
            let count = rows
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            (name(key), count)
        })
        .collect()
}

/// Per-day counts for the `HISTOGRAM_DAYS` days ending at `today`, oldest first.
pub fn daily_histogram(today: NaiveDate, rows: &[(NaiveDate, i64)]) -> Vec<i64> {
    (0..HISTOGRAM_DAYS)
        .rev()
        .map(|back| {
            let day = today - Duration::days(back);
            rows.iter()
                .filter(|(d, _)| *d == day)
                .map(|(_, c)| *c)
                .sum()
        })
        .collect()
}

pub async fn feedback_stats(pool: &PgPool, now: DateTime<Utc>) -> sqlx::Result<FeedbackStats> {
    let totals = sqlx::query_as::<_, Totals>(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE urgency = 'high') AS high,
            COUNT(*) FILTER (WHERE status = 'new') AS new,
            COUNT(*) FILTER (WHERE status = 'resolved') AS resolved,
            (AVG(response_time_seconds) FILTER (
                WHERE status = 'resolved' AND response_time_seconds IS NOT NULL
            ))::FLOAT8 AS avg_response_seconds,
            (AVG(satisfaction_score) FILTER (WHERE satisfaction_score > 0))::FLOAT8 AS satisfaction_avg
        FROM feedbacks
        "#,
    )
    .fetch_one(pool)
    .await?;

    let by_type: Vec<(FormType, i64)> =
        sqlx::query_as("SELECT form_type, COUNT(*) FROM feedbacks GROUP BY form_type")
            .fetch_all(pool)
            .await?;
    let by_status: Vec<(FeedbackStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM feedbacks GROUP BY status")
            .fetch_all(pool)
            .await?;
    let by_urgency: Vec<(Urgency, i64)> =
        sqlx::query_as("SELECT urgency, COUNT(*) FROM feedbacks GROUP BY urgency")
            .fetch_all(pool)
            .await?;

    let today = now.date_naive();
    let since = (today - Duration::days(HISTOGRAM_DAYS - 1))
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);
    let per_day: Vec<(NaiveDate, i64)> = sqlx::query_as(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day, COUNT(*)
        FROM feedbacks
        WHERE created_at >= $1
        GROUP BY day
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(FeedbackStats {
        total_feedbacks: totals.total,
        high_feedbacks: totals.high,
        new_feedbacks: totals.new,
        resolved_feedbacks: totals.resolved,
        avg_response_time_minutes: round2(totals.avg_response_seconds.unwrap_or(0.0) / 60.0),
        satisfaction_avg: round2(totals.satisfaction_avg.unwrap_or(0.0)),
        feedbacks_by_type: count_map(&FormType::ALL, FormType::as_str, &by_type),
        feedbacks_by_status: count_map(&FeedbackStatus::ALL, FeedbackStatus::as_str, &by_status),
        feedbacks_by_urgency: count_map(&Urgency::ALL, Urgency::as_str, &by_urgency),
        recent_feedbacks_by_day: daily_histogram(today, &per_day),
    })
}

// ============================================
// Form schema
// ============================================

pub async fn list_form_fields(
    pool: &PgPool,
    form_type: FormType,
    include_inactive: bool,
) -> sqlx::Result<Vec<FormFieldConfig>> {
    let sql = format!(
        "SELECT {FIELD_COLUMNS} FROM form_field_configs \
         WHERE form_type = $1 AND ($2 OR is_active) \
         ORDER BY field_order, id"
    );
    sqlx::query_as::<_, FormFieldConfig>(&sql)
        .bind(form_type)
        .bind(include_inactive)
        .fetch_all(pool)
        .await
}

/// Number of active fields per form type.
pub async fn active_field_counts(pool: &PgPool) -> sqlx::Result<Vec<(FormType, i64)>> {
    sqlx::query_as(
        "SELECT form_type, COUNT(*) FROM form_field_configs WHERE is_active GROUP BY form_type",
    )
    .fetch_all(pool)
    .await
}

pub async fn get_form_field(pool: &PgPool, id: i64) -> sqlx::Result<Option<FormFieldConfig>> {
    let sql = format!("SELECT {FIELD_COLUMNS} FROM form_field_configs WHERE id = $1");
    sqlx::query_as::<_, FormFieldConfig>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

fn collision(err: sqlx::Error, name: &str) -> AppError {
    if is_unique_violation(&err) {
        FormError::NameCollision(name.to_string()).into()
    } else {
        AppError::Database(err)
    }
}

/// Insert a normalized draft. A missing order goes after the current last
/// field, capped at `MAX_FIELD_ORDER`.
pub async fn create_form_field(pool: &PgPool, draft: &FieldDraft) -> AppResult<FormFieldConfig> {
    let mut tx = pool.begin().await?;

    let order = match draft.field_order {
        Some(order) => order,
        None => {
            sqlx::query_scalar::<_, i32>(
                "SELECT LEAST(COALESCE(MAX(field_order), -1), $2 - 1) + 1 \
                 FROM form_field_configs WHERE form_type = $1",
            )
            .bind(draft.form_type)
            .bind(MAX_FIELD_ORDER)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let sql = format!(
        r#"
        INSERT INTO form_field_configs (
            form_type, section_name, field_order, field_type, field_label, field_name,
            options, required, validation_rules, placeholder, help_text, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {FIELD_COLUMNS}
        "#
    );
    let field = sqlx::query_as::<_, FormFieldConfig>(&sql)
        .bind(draft.form_type)
        .bind(&draft.section_name)
        .bind(order)
        .bind(draft.field_type)
        .bind(&draft.field_label)
        .bind(&draft.field_name)
        .bind(&draft.options)
        .bind(draft.required)
        .bind(&draft.validation_rules)
        .bind(&draft.placeholder)
        .bind(&draft.help_text)
        .bind(draft.is_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| collision(e, &draft.field_name))?;

    tx.commit().await?;
    Ok(field)
}

pub async fn update_form_field(pool: &PgPool, id: i64, draft: &FieldDraft) -> AppResult<FormFieldConfig> {
    let sql = format!(
        r#"
        UPDATE form_field_configs
        SET section_name = $2,
            field_order = COALESCE($3, field_order),
            field_type = $4,
            field_label = $5,
            field_name = $6,
            options = $7,
            required = $8,
            validation_rules = $9,
            placeholder = $10,
            help_text = $11,
            is_active = $12,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {FIELD_COLUMNS}
        "#
    );
    sqlx::query_as::<_, FormFieldConfig>(&sql)
        .bind(id)
        .bind(&draft.section_name)
        .bind(draft.field_order)
        .bind(draft.field_type)
        .bind(&draft.field_label)
        .bind(&draft.field_name)
        .bind(&draft.options)
        .bind(draft.required)
        .bind(&draft.validation_rules)
        .bind(&draft.placeholder)
        .bind(&draft.help_text)
        .bind(draft.is_active)
        .fetch_optional(pool)
        .await
        .map_err(|e| collision(e, &draft.field_name))?
        .ok_or_else(|| AppError::NotFound(format!("form field {} not found", id)))
}

pub async fn set_form_field_active(pool: &PgPool, id: i64, active: bool) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE form_field_configs SET is_active = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(active)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_form_field(pool: &PgPool, id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM form_field_configs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Apply a parsed reorder batch atomically. Returns (updated, skipped); ids
/// that don't exist count as skipped alongside the unparseable entries.
pub async fn reorder_form_fields(pool: &PgPool, batch: &ReorderBatch) -> sqlx::Result<(usize, usize)> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    let mut missing = 0;

    for (id, order) in &batch.pairs {
        let result = sqlx::query(
            "UPDATE form_field_configs SET field_order = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(order)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() > 0 {
            updated += 1;
        } else {
            missing += 1;
        }
    }

    tx.commit().await?;
    Ok((updated, batch.skipped.len() + missing))
}

// ============================================
// Attachments
// ============================================

pub struct NewAttachment<'a> {
    pub feedback_id: i64,
    pub filename: &'a str,
    pub original_filename: &'a str,
    pub file_path: &'a str,
    pub file_size: i64,
    pub content_type: &'a str,
}

pub async fn insert_attachment(pool: &PgPool, new: &NewAttachment<'_>) -> sqlx::Result<FeedbackAttachment> {
    sqlx::query_as::<_, FeedbackAttachment>(
        r#"
        INSERT INTO feedback_attachments
            (feedback_id, filename, original_filename, file_path, file_size, content_type)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, feedback_id, filename, original_filename, file_path, file_size,
                  content_type, uploaded_at
        "#,
    )
    .bind(new.feedback_id)
    .bind(new.filename)
    .bind(new.original_filename)
    .bind(new.file_path)
    .bind(new.file_size)
    .bind(new.content_type)
    .fetch_one(pool)
    .await
}

pub async fn list_attachments(pool: &PgPool, feedback_id: i64) -> sqlx::Result<Vec<FeedbackAttachment>> {
    sqlx::query_as::<_, FeedbackAttachment>(
        r#"
        SELECT id, feedback_id, filename, original_filename, file_path, file_size,
               content_type, uploaded_at
        FROM feedback_attachments
        WHERE feedback_id = $1
        ORDER BY uploaded_at, id
        "#,
    )
    .bind(feedback_id)
    .fetch_all(pool)
    .await
}

pub async fn feedback_exists(pool: &PgPool, id: i64) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM feedbacks WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn ping(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped_and_paged() {
        let paging = Paging { skip: -5, limit: 5000 }.clamped();
        assert_eq!(paging.skip, 0);
        assert_eq!(paging.limit, MAX_PAGE_SIZE);

        let paging = Paging { skip: 40, limit: 20 }.clamped();
        assert_eq!(paging.page(), 3);
        assert_eq!(paging.pages(41), 3);
        assert_eq!(paging.pages(40), 2);
        assert_eq!(paging.pages(0), 0);

        assert_eq!(Paging { skip: 0, limit: 0 }.clamped().limit, 1);
    }

    #[test]
    fn histogram_is_oldest_first_with_gaps() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let rows = vec![
            (today, 4),
            (NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), 2),
            (NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(), 1),
            // outside the window
            (NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 9),
        ];
        assert_eq!(daily_histogram(today, &rows), vec![2, 0, 0, 0, 1, 0, 4]);
    }

    #[test]
    fn count_maps_include_zero_buckets() {
        let map = count_map(
            &FeedbackStatus::ALL,
            FeedbackStatus::as_str,
            &[(FeedbackStatus::New, 3), (FeedbackStatus::Resolved, 1)],
        );
        assert_eq!(map["new"], 3);
        assert_eq!(map["in_progress"], 0);
        assert_eq!(map["resolved"], 1);
        assert_eq!(map["rejected"], 0);
    }

    #[test]
    fn stats_round_to_two_decimals() {
        assert_eq!(round2(125.0 / 60.0), 2.08);
        assert_eq!(round2(4.333333), 4.33);
    }
}
