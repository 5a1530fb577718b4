use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "form_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FormType {
    #[serde(alias = "tech")]
    Technical,
    Business,
    #[serde(alias = "exec")]
    Executive,
}

impl FormType {
    pub const ALL: [FormType; 3] = [FormType::Technical, FormType::Business, FormType::Executive];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Technical => "technical",
            FormType::Business => "business",
            FormType::Executive => "executive",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            FormType::Technical => "Technical specialist feedback",
            FormType::Business => "Business user feedback",
            FormType::Executive => "Executive feedback",
        }
    }

    /// Who filled in the form, as used in alert subjects.
    pub fn role_name(&self) -> &'static str {
        match self {
            FormType::Technical => "technical specialist",
            FormType::Business => "business user",
            FormType::Executive => "executive",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            FormType::Technical => "👨‍💻",
            FormType::Business => "💼",
            FormType::Executive => "👔",
        }
    }
}

impl TryFrom<&str> for FormType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "technical" | "tech" => Ok(FormType::Technical),
            "business" => Ok(FormType::Business),
            "executive" | "exec" => Ok(FormType::Executive),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "urgency_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
    Normal,
}

impl Urgency {
    pub const ALL: [Urgency; 4] = [Urgency::High, Urgency::Medium, Urgency::Low, Urgency::Normal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Urgency::High => "⚠️",
            Urgency::Medium => "📋",
            Urgency::Low => "ℹ️",
            Urgency::Normal => "📝",
        }
    }

    /// Base triage weight, scaled by classifier confidence to get the priority score.
    pub fn weight(&self) -> f64 {
        match self {
            Urgency::High => 100.0,
            Urgency::Medium => 50.0,
            Urgency::Low => 10.0,
            Urgency::Normal => 0.0,
        }
    }
}

impl TryFrom<&str> for Urgency {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "high" => Ok(Urgency::High),
            "medium" => Ok(Urgency::Medium),
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "feedback_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    New,
    InProgress,
    Resolved,
    Rejected,
}

impl FeedbackStatus {
    pub const ALL: [FeedbackStatus; 4] = [
        FeedbackStatus::New,
        FeedbackStatus::InProgress,
        FeedbackStatus::Resolved,
        FeedbackStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::New => "new",
            FeedbackStatus::InProgress => "in_progress",
            FeedbackStatus::Resolved => "resolved",
            FeedbackStatus::Rejected => "rejected",
        }
    }
}

impl TryFrom<&str> for FeedbackStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "new" => Ok(FeedbackStatus::New),
            "in_progress" | "in-progress" => Ok(FeedbackStatus::InProgress),
            "resolved" => Ok(FeedbackStatus::Resolved),
            "rejected" => Ok(FeedbackStatus::Rejected),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub form_type: FormType,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_role: Option<String>,
    pub problem_text: String,
    pub urgency: Urgency,
    pub urgency_confidence: f64,
    pub urgency_reason: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub status: FeedbackStatus,
    pub assigned_to: Option<String>,
    pub priority_score: i32,
    pub form_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub response_time_seconds: Option<i64>,
    pub satisfaction_score: Option<i16>,
}

/// Everything a new record needs before the store assigns id, uuid and timestamps.
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub form_type: FormType,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_role: Option<String>,
    pub problem_text: String,
    pub urgency: Urgency,
    pub urgency_confidence: f64,
    pub urgency_reason: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub priority_score: i32,
    pub form_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackAttachment {
    pub id: i64,
    pub feedback_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedbackFilter {
    pub form_type: Option<FormType>,
    pub status: Option<FeedbackStatus>,
    pub urgency: Option<Urgency>,
    pub client_email: Option<String>,
    pub unassigned_only: bool,
}

#[derive(Debug, Serialize)]
pub struct FeedbackStats {
    pub total_feedbacks: i64,
    pub high_feedbacks: i64,
    pub new_feedbacks: i64,
    pub resolved_feedbacks: i64,
    pub avg_response_time_minutes: f64,
    pub satisfaction_avg: f64,
    pub feedbacks_by_type: BTreeMap<&'static str, i64>,
    pub feedbacks_by_status: BTreeMap<&'static str, i64>,
    pub feedbacks_by_urgency: BTreeMap<&'static str, i64>,
    /// Records created per day over the last 7 days, oldest first.
    pub recent_feedbacks_by_day: Vec<i64>,
}

/// Priority score derived from the classifier output.
pub fn priority_score(urgency: Urgency, confidence: f64) -> i32 {
    (urgency.weight() * confidence.clamp(0.0, 1.0)).round() as i32
}
