//! Triage state machine for feedback records.
//!
//! ```text
//! new ──assign──▶ in_progress ──resolve──▶ resolved
//!  │                                          ▲
//!  ├───────────────resolve────────────────────┘
//!  └──reject──▶ rejected
//! ```
//!
//! Transitions are pure: they take the current record and `now` and mutate
//! the record in place. Persistence wraps them in a row lock.

use crate::domain::models::{FeedbackRecord, FeedbackStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("cannot {action} feedback in status {}", .from.as_str())]
    InvalidTransition {
        action: &'static str,
        from: FeedbackStatus,
    },
    #[error("satisfaction score must be between 1 and 5, got {0}")]
    InvalidSatisfaction(i16),
    #[error("assignee must not be empty")]
    EmptyAssignee,
}

pub fn check_satisfaction(score: i16) -> Result<i16, LifecycleError> {
    if (1..=5).contains(&score) {
        Ok(score)
    } else {
        Err(LifecycleError::InvalidSatisfaction(score))
    }
}

/// Set the assignee and move `new` to `in_progress`.
pub fn assign(record: &mut FeedbackRecord, assignee: &str, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    let assignee = assignee.trim();
    if assignee.is_empty() {
        return Err(LifecycleError::EmptyAssignee);
    }
    match record.status {
        FeedbackStatus::New | FeedbackStatus::InProgress => {
            record.assigned_to = Some(assignee.to_string());
            record.status = FeedbackStatus::InProgress;
            record.updated_at = now;
            Ok(())
        }
        from => Err(LifecycleError::InvalidTransition {
            action: "assign",
            from,
        }),
    }
}

/// Resolve the record. Timing fields are written on the first resolution only.
pub fn resolve(
    record: &mut FeedbackRecord,
    satisfaction: Option<i16>,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let satisfaction = satisfaction.map(check_satisfaction).transpose()?;

    match record.status {
        FeedbackStatus::Rejected => {
            return Err(LifecycleError::InvalidTransition {
                action: "resolve",
                from: FeedbackStatus::Rejected,
            })
        }
        FeedbackStatus::Resolved => {}
        FeedbackStatus::New | FeedbackStatus::InProgress => {
            record.status = FeedbackStatus::Resolved;
            // A record reopened by override keeps its first resolution.
            if record.resolved_at.is_none() {
                record.resolved_at = Some(now);
                record.response_time_seconds = Some((now - record.created_at).num_seconds().max(0));
            }
        }
    }

    if satisfaction.is_some() {
        record.satisfaction_score = satisfaction;
    }
    record.updated_at = now;
    Ok(())
}

/// Reject a record that has not been picked up yet.
pub fn reject(record: &mut FeedbackRecord, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    match record.status {
        FeedbackStatus::New => {
            record.status = FeedbackStatus::Rejected;
            record.updated_at = now;
            Ok(())
        }
        from => Err(LifecycleError::InvalidTransition {
            action: "reject",
            from,
        }),
    }
}

/// Raw status set. Never touches `resolved_at` or `response_time_seconds`.
pub fn override_status(record: &mut FeedbackRecord, status: FeedbackStatus, now: DateTime<Utc>) {
    record.status = status;
    record.updated_at = now;
}

#[cfg(test)]
pub(crate) fn sample_record(created_at: DateTime<Utc>) -> FeedbackRecord {
    use crate::domain::models::{FormType, Urgency};

    FeedbackRecord {
        id: 1,
        uuid: uuid::Uuid::new_v4(),
        form_type: FormType::Technical,
        client_id: None,
        client_name: Some("Anna".to_string()),
        client_email: Some("anna@example.com".to_string()),
        client_role: None,
        problem_text: "Checkout is down".to_string(),
        urgency: Urgency::High,
        urgency_confidence: 1.0,
        urgency_reason: "2 high-urgency indicator(s) found".to_string(),
        category: None,
        tags: Vec::new(),
        status: FeedbackStatus::New,
        assigned_to: None,
        priority_score: 100,
        form_data: serde_json::json!({}),
        created_at,
        updated_at: created_at,
        resolved_at: None,
        response_time_seconds: None,
        satisfaction_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn resolve_records_response_time() {
        let mut record = sample_record(t0());
        resolve(&mut record, None, t0() + Duration::seconds(125)).unwrap();
        assert_eq!(record.status, FeedbackStatus::Resolved);
        assert_eq!(record.response_time_seconds, Some(125));
        assert_eq!(record.resolved_at, Some(t0() + Duration::seconds(125)));
    }

    #[test]
    fn second_resolve_keeps_first_timing() {
        let mut record = sample_record(t0());
        resolve(&mut record, None, t0() + Duration::seconds(125)).unwrap();
        resolve(&mut record, Some(4), t0() + Duration::hours(5)).unwrap();
        assert_eq!(record.response_time_seconds, Some(125));
        assert_eq!(record.resolved_at, Some(t0() + Duration::seconds(125)));
        assert_eq!(record.satisfaction_score, Some(4));
    }

    #[test]
    fn reopened_record_keeps_first_resolution() {
        let mut record = sample_record(t0());
        resolve(&mut record, None, t0() + Duration::seconds(125)).unwrap();
        override_status(&mut record, FeedbackStatus::InProgress, t0() + Duration::hours(1));
        resolve(&mut record, None, t0() + Duration::hours(2)).unwrap();

        assert_eq!(record.status, FeedbackStatus::Resolved);
        assert_eq!(record.resolved_at, Some(t0() + Duration::seconds(125)));
        assert_eq!(record.response_time_seconds, Some(125));
    }

    #[test]
    fn resolve_clamps_clock_skew_to_zero() {
        let mut record = sample_record(t0());
        resolve(&mut record, None, t0() - Duration::seconds(3)).unwrap();
        assert_eq!(record.response_time_seconds, Some(0));
    }

    #[test]
    fn satisfaction_outside_range_is_rejected_without_changes() {
        let mut record = sample_record(t0());
        for bad in [0, 6, -1] {
            assert_eq!(
                resolve(&mut record, Some(bad), t0()),
                Err(LifecycleError::InvalidSatisfaction(bad))
            );
        }
        assert_eq!(record.status, FeedbackStatus::New);
        assert!(record.resolved_at.is_none());
    }

    #[test]
    fn new_can_be_resolved_directly() {
        let mut record = sample_record(t0());
        resolve(&mut record, Some(5), t0() + Duration::seconds(60)).unwrap();
        assert_eq!(record.status, FeedbackStatus::Resolved);
        assert!(record.assigned_to.is_none());
    }

    #[test]
    fn assign_moves_to_in_progress_and_is_idempotent() {
        let mut record = sample_record(t0());
        assign(&mut record, " ivan ", t0()).unwrap();
        assert_eq!(record.status, FeedbackStatus::InProgress);
        assert_eq!(record.assigned_to.as_deref(), Some("ivan"));

        assign(&mut record, "maria", t0()).unwrap();
        assert_eq!(record.status, FeedbackStatus::InProgress);
        assert_eq!(record.assigned_to.as_deref(), Some("maria"));

        assert_eq!(assign(&mut record, "  ", t0()), Err(LifecycleError::EmptyAssignee));
    }

    #[test]
    fn terminal_states_refuse_transitions() {
        let mut record = sample_record(t0());
        reject(&mut record, t0()).unwrap();
        assert_eq!(record.status, FeedbackStatus::Rejected);

        let err = resolve(&mut record, None, t0()).unwrap_err();
        assert_eq!(err.to_string(), "cannot resolve feedback in status rejected");
        assert!(assign(&mut record, "ivan", t0()).is_err());
        assert!(record.response_time_seconds.is_none());
    }

    #[test]
    fn reject_only_from_new() {
        let mut record = sample_record(t0());
        assign(&mut record, "ivan", t0()).unwrap();
        assert_eq!(
            reject(&mut record, t0()),
            Err(LifecycleError::InvalidTransition {
                action: "reject",
                from: FeedbackStatus::InProgress,
            })
        );
    }

    #[test]
    fn override_bypasses_timing_fields() {
        let mut record = sample_record(t0());
        override_status(&mut record, FeedbackStatus::Resolved, t0() + Duration::seconds(30));
        assert_eq!(record.status, FeedbackStatus::Resolved);
        assert!(record.resolved_at.is_none());
        assert!(record.response_time_seconds.is_none());

        // A later named resolve on an overridden record keeps timing untouched too.
        resolve(&mut record, None, t0() + Duration::seconds(90)).unwrap();
        assert!(record.response_time_seconds.is_none());
    }
}
