//! Dataset Serialization
//!
//! Renders a collected dataset as a JSON document or a flattened CSV.
//! Both renderings are deterministic for a given dataset and stay valid for
//! every combination of present/absent domains, including empty lists.

use anyhow::{Context, Result};
use serde_json::Value;

use super::types::{ExportDataset, ExportFormat};

/// Present domains in render order, each as a JSON value.
pub(crate) fn present_sections(dataset: &ExportDataset) -> Vec<(&'static str, Value)> {
    let mut sections = Vec::new();

    if let Some(profile) = &dataset.profile {
        sections.push(("profile", profile.clone()));
    }
    if let Some(activity) = &dataset.activity_sessions {
        sections.push(("activity_sessions", Value::Array(activity.clone())));
    }
    if let Some(consents) = &dataset.consents {
        sections.push(("consents", Value::Array(consents.clone())));
    }
    if let Some(settings) = &dataset.settings {
        sections.push(("settings", settings.clone()));
    }
    if let Some(billing) = &dataset.billing {
        if let Ok(value) = serde_json::to_value(billing) {
            sections.push(("billing", value));
        }
    }
    if let Some(files) = &dataset.storage_files {
        if let Ok(value) = serde_json::to_value(files) {
            sections.push(("storage_files", value));
        }
    }
    if let Some(analytics) = &dataset.analytics {
        if let Ok(value) = serde_json::to_value(analytics) {
            sections.push(("analytics", value));
        }
    }

    sections
}

/// Render the whole dataset as a single string in the requested format.
pub fn transform(dataset: &ExportDataset, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(dataset).context("serializing dataset to JSON")
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer
                .write_record(["section", "record", "field", "value"])
                .context("writing CSV header")?;

            for (section, value) in present_sections(dataset) {
                write_section(&mut writer, section, &value)?;
            }

            let bytes = writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("flushing CSV: {}", e.error()))?;
            String::from_utf8(bytes).context("CSV is not UTF-8")
        }
    }
}

/// Render one domain on its own, for per-domain archive files.
pub fn transform_section(section: &str, value: &Value, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(value).context("serializing section to JSON")
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer
                .write_record(["section", "record", "field", "value"])
                .context("writing CSV header")?;
            write_section(&mut writer, section, value)?;
            let bytes = writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("flushing CSV: {}", e.error()))?;
            String::from_utf8(bytes).context("CSV is not UTF-8")
        }
    }
}

fn write_section(writer: &mut csv::Writer<Vec<u8>>, section: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(records) => {
            for (index, record) in records.iter().enumerate() {
                write_record(writer, section, index, record)?;
            }
        }
        other => write_record(writer, section, 0, other)?,
    }
    Ok(())
}

fn write_record(
    writer: &mut csv::Writer<Vec<u8>>,
    section: &str,
    index: usize,
    record: &Value,
) -> Result<()> {
    let row = |writer: &mut csv::Writer<Vec<u8>>, field: &str, value: &Value| {
        writer
            .write_record([section, &index.to_string(), field, &scalar_text(value)])
            .context("writing CSV row")
    };

    match record {
        Value::Object(fields) => {
            for (field, value) in fields {
                row(writer, field, value)?;
            }
        }
        other => row(writer, "value", other)?,
    }
    Ok(())
}

/// Flatten a value to one CSV cell: strings stay bare, everything else is
/// compact JSON.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::types::BillingSummary;
    use serde_json::json;

    fn dataset_with(
        profile: Option<Value>,
        activity: Option<Vec<Value>>,
        consents: Option<Vec<Value>>,
    ) -> ExportDataset {
        ExportDataset {
            user_id: "user-1".into(),
            generated_at: "2026-08-04T00:00:00Z".parse().unwrap(),
            profile,
            activity_sessions: activity,
            consents,
            settings: None,
            billing: None,
            storage_files: None,
            analytics: None,
        }
    }

    #[test]
    fn empty_lists_still_produce_parseable_json_and_csv() {
        let dataset = dataset_with(None, Some(vec![]), Some(vec![]));

        let j = transform(&dataset, ExportFormat::Json).unwrap();
        let parsed: Value = serde_json::from_str(&j).unwrap();
        assert_eq!(parsed["activity_sessions"], json!([]));
        assert!(parsed.get("profile").is_none());

        let c = transform(&dataset, ExportFormat::Csv).unwrap();
        let mut reader = csv::Reader::from_reader(c.as_bytes());
        assert_eq!(
            reader.headers().unwrap(),
            &csv::StringRecord::from(vec!["section", "record", "field", "value"])
        );
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn transform_is_deterministic() {
        let make = || {
            dataset_with(
                Some(json!({"display_name": "Ada", "email": "ada@example.com"})),
                Some(vec![json!({"sport": "run", "distance_km": 5.2})]),
                None,
            )
        };
        for format in [ExportFormat::Json, ExportFormat::Csv] {
            assert_eq!(
                transform(&make(), format).unwrap(),
                transform(&make(), format).unwrap()
            );
        }
    }

    #[test]
    fn csv_flattens_every_present_domain() {
        let mut dataset = dataset_with(
            Some(json!({"display_name": "Ada"})),
            Some(vec![
                json!({"sport": "run"}),
                json!({"sport": "ride", "splits": [1, 2]}),
            ]),
            Some(vec![]),
        );
        dataset.billing = Some(BillingSummary {
            customer_id: "cus_9".into(),
        });

        let c = transform(&dataset, ExportFormat::Csv).unwrap();
        let mut reader = csv::Reader::from_reader(c.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();

        // profile row + 3 activity rows + billing row
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[0][0], "profile");
        assert_eq!(&rows[2][1], "1", "second activity record index");
        assert_eq!(&rows[3][3], "[1,2]", "nested values flatten to JSON");
        assert_eq!(&rows[4][0], "billing");
    }

    #[test]
    fn fully_absent_dataset_is_valid() {
        let dataset = dataset_with(None, None, None);
        let j = transform(&dataset, ExportFormat::Json).unwrap();
        let parsed: Value = serde_json::from_str(&j).unwrap();
        assert_eq!(parsed["user_id"], "user-1");

        let c = transform(&dataset, ExportFormat::Csv).unwrap();
        assert!(c.starts_with("section,record,field,value"));
    }
}
