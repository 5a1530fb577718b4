use crate::domain::models::FeedbackRecord;
use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Europe::Moscow;
use rust_xlsxwriter::{Format, Workbook};
use serde_json::json;

/// Hard cap on rows in a single export.
pub const EXPORT_LIMIT: i64 = 10_000;

pub const COLUMNS: [&str; 11] = [
    "ID",
    "UUID",
    "Form Type",
    "Client",
    "Email",
    "Problem",
    "Urgency",
    "Category",
    "Status",
    "Priority",
    "Created",
];

/// Render a timestamp in Moscow time as `dd.mm.YYYY HH:MM`.
pub fn format_msk(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Moscow).format("%d.%m.%Y %H:%M").to_string()
}

fn row(record: &FeedbackRecord) -> [String; 11] {
    [
        record.id.to_string(),
        record.uuid.to_string(),
        record.form_type.as_str().to_string(),
        record.client_name.clone().unwrap_or_default(),
        record.client_email.clone().unwrap_or_default(),
        record.problem_text.clone(),
        record.urgency.as_str().to_string(),
        record.category.clone().unwrap_or_default(),
        record.status.as_str().to_string(),
        record.priority_score.to_string(),
        format_msk(record.created_at),
    ]
}

pub fn to_csv(records: &[FeedbackRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.write_record(row(record))?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

pub fn to_xlsx(records: &[FeedbackRecord]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Feedbacks")?;

    for (col, title) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    for (i, record) in records.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, value) in row(record).iter().enumerate() {
            match col {
                // id and priority stay numeric so spreadsheets can sort them
                0 => sheet.write_number(r, 0, record.id as f64)?,
                9 => sheet.write_number(r, 9, record.priority_score as f64)?,
                _ => sheet.write_string(r, col as u16, value.as_str())?,
            };
        }
    }
    sheet.autofit();

    Ok(workbook.save_to_buffer()?)
}

pub fn to_json(records: &[FeedbackRecord]) -> serde_json::Value {
    json!({
        "count": records.len(),
        "feedbacks": records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lifecycle::sample_record;
    use chrono::TimeZone;

    #[test]
    fn timestamps_render_in_moscow_time() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 31, 22, 5, 0).unwrap();
        assert_eq!(format_msk(ts), "01.02.2024 01:05");
    }

    #[test]
    fn csv_has_header_and_quotes_free_text() {
        let mut record = sample_record(Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap());
        record.problem_text = "Broken, again\n\"really\"".to_string();
        record.category = Some("billing".to_string());

        let out = String::from_utf8(to_csv(&[record.clone()]).unwrap()).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ID,UUID,Form Type,Client,Email,Problem,Urgency,Category,Status,Priority,Created"
        );
        assert!(out.contains("\"Broken, again\n\"\"really\"\"\""));
        assert!(out.contains(&record.uuid.to_string()));
        assert!(out.contains(",high,billing,new,100,01.03.2024 10:00"));
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&[sample_record(Utc::now())]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn json_export_carries_count() {
        let value = to_json(&[sample_record(Utc::now()), sample_record(Utc::now())]);
        assert_eq!(value["count"], 2);
        assert_eq!(value["feedbacks"][0]["status"], "new");
    }
}
