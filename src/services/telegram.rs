use crate::config::TelegramConfig;
use crate::domain::models::{FeedbackRecord, FeedbackStats};
use crate::services::export::format_msk;
use crate::services::notifications::{needs_team_alert, Notifier};
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

const PREVIEW_CHARS: usize = 300;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// First `max` characters, with an ellipsis when something was cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub fn format_alert(record: &FeedbackRecord, admin_base_url: &str) -> String {
    let mut msg = format!(
        "{} <b>High priority feedback</b> {}\n\n",
        record.urgency.emoji(),
        record.form_type.emoji()
    );
    if let Some(name) = &record.client_name {
        msg.push_str(&format!("<b>Client:</b> {}\n", escape_html(name)));
    }
    if let Some(email) = &record.client_email {
        msg.push_str(&format!("<b>Email:</b> {}\n", escape_html(email)));
    }
    msg.push_str(&format!("<b>Form:</b> {}\n", record.form_type.as_str()));
    msg.push_str(&format!(
        "<b>Urgency:</b> {} ({:.0}%)\n",
        record.urgency.as_str(),
        record.urgency_confidence * 100.0
    ));
    if let Some(category) = &record.category {
        msg.push_str(&format!("<b>Category:</b> {}\n", escape_html(category)));
    }

    let preview = truncate_chars(&record.problem_text, PREVIEW_CHARS);
    msg.push_str(&format!("\n<b>Problem:</b>\n{}\n\n", escape_html(&preview)));
    msg.push_str(&format!("<b>ID:</b> {}\n", record.id));
    msg.push_str(&format!("<b>UUID:</b> {}\n", record.uuid));
    msg.push_str(&format!("<b>Time:</b> {} MSK\n\n", format_msk(record.created_at)));
    msg.push_str(&format!(
        "🔗 <a href=\"{}/api/admin/feedbacks/{}\">Open in admin</a>",
        admin_base_url.trim_end_matches('/'),
        record.id
    ));
    msg
}

pub fn format_daily_summary(stats: &FeedbackStats) -> String {
    let mut msg = String::from("📊 <b>Daily feedback summary</b>\n\n");
    msg.push_str(&format!("📝 Total: {}\n", stats.total_feedbacks));
    msg.push_str(&format!("⚠️ High urgency: {}\n", stats.high_feedbacks));
    msg.push_str(&format!("🆕 New: {}\n", stats.new_feedbacks));
    msg.push_str(&format!("✅ Resolved: {}\n", stats.resolved_feedbacks));
    if stats.avg_response_time_minutes > 0.0 {
        msg.push_str(&format!(
            "⏱️ Avg response: {} min\n",
            stats.avg_response_time_minutes
        ));
    }
    if stats.satisfaction_avg > 0.0 {
        msg.push_str(&format!("😊 Satisfaction: {}/5\n", stats.satisfaction_avg));
    }
    if let Some(today) = stats.recent_feedbacks_by_day.last() {
        msg.push_str(&format!("📅 Today: {}\n", today));
    }
    msg
}

pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
    admin_base_url: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, admin_base_url: &str) -> Self {
        Self {
            bot: Bot::new(&config.bot_token),
            chat_id: ChatId(config.chat_id),
            admin_base_url: admin_base_url.to_string(),
        }
    }

    async fn send_html(&self, text: String) -> Result<()> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await?;
        Ok(())
    }

    pub async fn send_daily_summary(&self, stats: &FeedbackStats) -> Result<()> {
        self.send_html(format_daily_summary(stats)).await
    }

    /// Calls `getMe`; returns the bot username.
    pub async fn test_connection(&self) -> Result<String> {
        let me = self.bot.get_me().await?;
        Ok(me.user.username.clone().unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn notify(&self, record: &FeedbackRecord) -> Result<()> {
        if !needs_team_alert(record) {
            return Ok(());
        }
        self.send_html(format_alert(record, &self.admin_base_url)).await?;
        tracing::info!("Telegram alert sent for feedback {}", record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lifecycle::sample_record;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn long_problem_text_is_cut_at_300_chars() {
        let mut record = sample_record(Utc::now());
        record.problem_text = "ы".repeat(350);
        let msg = format_alert(&record, "http://admin.local/");
        assert!(msg.contains(&format!("{}...", "ы".repeat(300))));
        assert!(!msg.contains(&"ы".repeat(301)));
        assert!(msg.contains("http://admin.local/api/admin/feedbacks/1"));
    }

    #[test]
    fn short_text_has_no_ellipsis() {
        assert_eq!(truncate_chars("short", 300), "short");
        assert_eq!(truncate_chars(&"a".repeat(300), 300), "a".repeat(300));
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
    }

    #[test]
    fn client_input_is_escaped() {
        let mut record = sample_record(Utc::now());
        record.client_name = Some("<script>".to_string());
        record.problem_text = "a & b < c".to_string();
        let msg = format_alert(&record, "http://admin.local");
        assert!(msg.contains("&lt;script&gt;"));
        assert!(msg.contains("a &amp; b &lt; c"));
        assert!(msg.starts_with("⚠️ <b>High priority feedback</b> 👨‍💻"));
    }

    #[test]
    fn summary_skips_empty_averages() {
        let stats = FeedbackStats {
            total_feedbacks: 12,
            high_feedbacks: 3,
            new_feedbacks: 5,
            resolved_feedbacks: 4,
            avg_response_time_minutes: 0.0,
            satisfaction_avg: 4.5,
            feedbacks_by_type: BTreeMap::new(),
            feedbacks_by_status: BTreeMap::new(),
            feedbacks_by_urgency: BTreeMap::new(),
            recent_feedbacks_by_day: vec![0, 1, 0, 2, 0, 4, 5],
        };
        let msg = format_daily_summary(&stats);
        assert!(msg.contains("Total: 12"));
        assert!(!msg.contains("Avg response"));
        assert!(msg.contains("Satisfaction: 4.5/5"));
        assert!(msg.contains("Today: 5"));
    }
}
