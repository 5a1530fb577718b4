//! Keyword-frequency urgency scoring for free-text problem reports.
//!
//! Every vocabulary entry is a concept with one or more spellings. A concept
//! counts once for its level no matter how many of its spellings occur, so
//! near-synonyms ("критично", "критическая") never double count. Independent
//! concepts each contribute one count, even when their spellings overlap.

use crate::domain::models::Urgency;
use serde::Serialize;

const LONG_MESSAGE_CHARS: usize = 200;
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.4;
const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    High,
    Medium,
    Low,
}

impl Level {
    // Tie-break order: earlier wins.
    const ORDER: [Level; 3] = [Level::High, Level::Medium, Level::Low];

    fn index(self) -> usize {
        match self {
            Level::High => 0,
            Level::Medium => 1,
            Level::Low => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Level::High => "high",
            Level::Medium => "medium",
            Level::Low => "low",
        }
    }
}

struct Concept {
    level: Level,
    spellings: &'static [&'static str],
}

const fn concept(level: Level, spellings: &'static [&'static str]) -> Concept {
    Concept { level, spellings }
}

static VOCABULARY: &[Concept] = &[
    // high
    concept(Level::High, &["упал", "падает", "crash", " is down", "went down"]),
    concept(Level::High, &["критич", "critical"]),
    concept(Level::High, &["не работает", "не работают", "not working", "doesn't work", "does not work"]),
    concept(Level::High, &["срочн", "urgent", "asap"]),
    concept(Level::High, &["авари", "outage"]),
    concept(Level::High, &["500", "502", "503", "504", "internal server error"]),
    concept(Level::High, &["потеря данных", "потеряли данные", "data loss", "lost data"]),
    concept(Level::High, &["на проде", "в проде", "продакшен", "продакшн", "in production"]),
    concept(Level::High, &["сломал", "broken"]),
    concept(Level::High, &["утечк", "взлом", "breach"]),
    concept(Level::High, &["блокир", "blocker"]),
    concept(Level::High, &["не могу войти", "can't log in", "cannot log in"]),
    // medium
    concept(Level::Medium, &["ошибк", "error"]),
    concept(Level::Medium, &["медлен", "тормоз", "slow", "lag"]),
    concept(Level::Medium, &["проблем", "problem", "issue"]),
    concept(Level::Medium, &["баг", "глюк", "bug", "glitch"]),
    concept(Level::Medium, &["некорректн", "неправильн", "incorrect", "wrong"]),
    concept(Level::Medium, &["иногда", "периодически", "intermittent", "sometimes"]),
    concept(Level::Medium, &["таймаут", "timeout", "timed out"]),
    concept(Level::Medium, &["не загружается", "не грузится", "не открывается", "won't load", "not loading"]),
    concept(Level::Medium, &["нужно исправить", "надо исправить", "please fix", "needs fixing"]),
    concept(Level::Medium, &["предупреждени", "warning"]),
    // low
    concept(Level::Low, &["хотелось бы", "было бы хорошо", "было бы здорово", "would be nice", "wish"]),
    concept(Level::Low, &["добав", "please add", "could you add", "add support"]),
    concept(Level::Low, &["предлаг", "предложени", "suggest", "proposal"]),
    concept(Level::Low, &["улучш", "improve", "enhancement"]),
    concept(Level::Low, &["вопрос", "подскажите", "question", "how do i"]),
    concept(Level::Low, &["идея", "idea"]),
    concept(Level::Low, &["фич", "feature"]),
    concept(Level::Low, &["опечатк", "typo", "шрифт", "font", "cosmetic"]),
    concept(Level::Low, &["удобн", "convenient", "usability"]),
    concept(Level::Low, &["спасибо", "благодар", "thanks", "thank you"]),
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UrgencyAssessment {
    pub urgency: Urgency,
    pub confidence: f64,
    pub reason: String,
}

/// Number of distinct concepts matched per level, in `Level::ORDER`.
fn level_counts(normalized: &str) -> [usize; 3] {
    let mut counts = [0usize; 3];
    for entry in VOCABULARY {
        if entry.spellings.iter().any(|s| normalized.contains(s)) {
            counts[entry.level.index()] += 1;
        }
    }
    counts
}

/// Classify free text into an urgency label with a confidence and a reason.
///
/// Pure and deterministic; never fails.
pub fn classify(text: &str) -> UrgencyAssessment {
    let normalized = text.to_lowercase();
    let counts = level_counts(&normalized);
    let total: usize = counts.iter().sum();

    if total == 0 {
        return if text.chars().count() > LONG_MESSAGE_CHARS {
            UrgencyAssessment {
                urgency: Urgency::Medium,
                confidence: 0.3,
                reason: "long message, no explicit signal".to_string(),
            }
        } else {
            UrgencyAssessment {
                urgency: Urgency::Low,
                confidence: 0.2,
                reason: "no urgency signal detected".to_string(),
            }
        };
    }

    let mut max_level = Level::High;
    for level in Level::ORDER {
        if counts[level.index()] > counts[max_level.index()] {
            max_level = level;
        }
    }
    let max_count = counts[max_level.index()];
    let confidence = max_count as f64 / total as f64;

    // Anything that misses its threshold falls straight to low, never to medium.
    let (urgency, reason) = match max_level {
        Level::High if confidence > HIGH_CONFIDENCE_THRESHOLD => (
            Urgency::High,
            format!("{} high-urgency indicator(s) found", max_count),
        ),
        Level::Medium if confidence > MEDIUM_CONFIDENCE_THRESHOLD => (
            Urgency::Medium,
            format!("{} medium-urgency indicator(s) found", max_count),
        ),
        Level::Low => (
            Urgency::Low,
            format!("{} low-urgency indicator(s) found", max_count),
        ),
        level => (
            Urgency::Low,
            format!(
                "mixed signals: {} {}-urgency indicator(s) below confidence threshold",
                max_count,
                level.as_str()
            ),
        ),
    };

    UrgencyAssessment {
        urgency,
        confidence,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_uses_short_fallback() {
        let result = classify("");
        assert_eq!(result.urgency, Urgency::Low);
        assert_eq!(result.confidence, 0.2);
        assert_eq!(result.reason, "no urgency signal detected");
    }

    #[test]
    fn long_text_without_signal_is_medium() {
        let text = "абв ".repeat(60);
        assert!(text.chars().count() > 200);
        let result = classify(&text);
        assert_eq!(result.urgency, Urgency::Medium);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.reason, "long message, no explicit signal");
    }

    #[test]
    fn length_is_measured_in_characters() {
        // 150 Cyrillic chars are 300 bytes but still a short message.
        let text = "ж".repeat(150);
        assert_eq!(classify(&text).urgency, Urgency::Low);
    }

    #[test]
    fn production_outage_is_high() {
        let result = classify("Система упала, критическая ошибка, 500 на проде");
        assert_eq!(result.urgency, Urgency::High);
        assert!(result.confidence > 0.4);
        assert_eq!(result.reason, "4 high-urgency indicator(s) found");
    }

    #[test]
    fn feature_wish_is_low() {
        let result = classify("Хотелось бы добавить фильтр в отчет");
        assert_eq!(result.urgency, Urgency::Low);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.reason, "2 low-urgency indicator(s) found");
    }

    #[test]
    fn only_high_keywords_give_full_confidence() {
        let result = classify("URGENT: checkout is not working");
        assert_eq!(result.urgency, Urgency::High);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn synonyms_of_one_concept_count_once() {
        // "критично" and "критическая" are the same concept.
        let result = classify("критично, критическая ситуация");
        assert_eq!(result.urgency, Urgency::High);
        assert_eq!(result.reason, "1 high-urgency indicator(s) found");
    }

    #[test]
    fn weak_high_signal_downgrades_to_low_not_medium() {
        // high 2, medium 2, low 1: high wins the tie at exactly 0.4.
        let result = classify("critical crash, error and a bug, just an idea");
        assert_eq!(result.confidence, 0.4);
        assert_eq!(result.urgency, Urgency::Low);
        assert!(result.reason.starts_with("mixed signals: 2 high"));
    }

    #[test]
    fn three_way_tie_resolves_to_high_then_downgrades() {
        let result = classify("срочно, баг, идея");
        assert!((result.confidence - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(result.urgency, Urgency::Low);
        assert!(result.reason.contains("high-urgency"));
    }

    #[test]
    fn medium_signals_stay_medium() {
        let result = classify("Отчёт медленно работает, иногда таймаут");
        assert_eq!(result.urgency, Urgency::Medium);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.reason, "3 medium-urgency indicator(s) found");
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("CRITICAL OUTAGE"), classify("critical outage"));
    }
}
