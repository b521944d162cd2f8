//! Markdown export of stored reports and review drafts.

use chrono::{DateTime, Utc};
use cxr_flow::{ImageRecord, ParsedReport, PatientId, StoredReport};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

const TEMPLATE_NAME: &str = "report.md";

const REPORT_TEMPLATE: &str = r#"# CXR Report - Patient ID: {{ patient_id }}, Follow-up: {{ follow_up }}

Created: {{ created_at }}
{% if record %}
## Patient Record

| Field | Value |
| --- | --- |
{% for row in record %}| {{ row.label }} | {{ row.value }} |
{% endfor %}{% endif %}
## Report

{{ body }}
"#;

const MAX_VALUE_CHARS: usize = 60;
const TRUNCATED_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("template parse error: {0}")]
    TemplateParse(String),

    #[error("template rendering failed: {0}")]
    TemplateRender(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tera::Error> for ExportError {
    fn from(e: tera::Error) -> Self {
        ExportError::TemplateRender(e.to_string())
    }
}

/// What to export.
pub enum ExportSource<'a> {
    Stored(&'a StoredReport),
    Draft {
        sections: &'a ParsedReport,
        patient_id: PatientId,
        follow_up: u32,
    },
}

#[derive(Serialize)]
struct RecordRow {
    label: &'static str,
    value: String,
}

#[derive(Serialize)]
struct ExportDocument {
    patient_id: String,
    follow_up: u32,
    created_at: String,
    record: Option<Vec<RecordRow>>,
    body: String,
}

pub struct MarkdownExporter {
    tera: Tera,
}

impl MarkdownExporter {
    pub fn new() -> Result<Self, ExportError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(TEMPLATE_NAME, REPORT_TEMPLATE)
            .map_err(|e| ExportError::TemplateParse(e.to_string()))?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        source: ExportSource<'_>,
        record: Option<&ImageRecord>,
    ) -> Result<String, ExportError> {
        self.render_at(source, record, Utc::now())
    }

    fn render_at(
        &self,
        source: ExportSource<'_>,
        record: Option<&ImageRecord>,
        now: DateTime<Utc>,
    ) -> Result<String, ExportError> {
        let (patient_id, follow_up, created_at, body) = match source {
            ExportSource::Stored(report) => (
                report.patient_id,
                report.follow_up,
                report.created_at,
                report.content.clone(),
            ),
            ExportSource::Draft {
                sections,
                patient_id,
                follow_up,
            } => (patient_id, follow_up, now, sections.to_markdown()),
        };

        let document = ExportDocument {
            patient_id: patient_id.to_string(),
            follow_up,
            created_at: created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            record: record.map(record_rows),
            body,
        };

        let context = Context::from_value(serde_json::to_value(&document)?)
            .map_err(|e| ExportError::TemplateRender(e.to_string()))?;
        Ok(self.tera.render(TEMPLATE_NAME, &context)?)
    }
}

fn record_rows(record: &ImageRecord) -> Vec<RecordRow> {
    [
        ("Finding Labels", record.finding_labels.join(", ")),
        ("Follow-up", record.follow_up.to_string()),
        ("Patient ID", record.patient_id.to_string()),
        ("Age", record.patient_age.to_string()),
        ("Gender", record.patient_gender.clone()),
        ("View Position", record.view_position.clone()),
    ]
    .into_iter()
    .map(|(label, value)| RecordRow {
        label,
        value: truncate_value(&value),
    })
    .collect()
}

/// Values longer than 60 chars are cut to 50 plus `...`.
fn truncate_value(value: &str) -> String {
    if value.chars().count() > MAX_VALUE_CHARS {
        let mut cut: String = value.chars().take(TRUNCATED_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cxr_flow::ReportSection;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn record() -> ImageRecord {
        ImageRecord {
            image_path: PathBuf::from("images/00000001_001.png"),
            finding_labels: vec!["Pneumonia".to_string(), "Effusion".to_string()],
            follow_up: 1,
            patient_id: 1,
            patient_age: 45,
            patient_gender: "M".to_string(),
            view_position: "PA".to_string(),
        }
    }

    fn stored() -> StoredReport {
        StoredReport {
            id: Uuid::new_v4(),
            content: "Findings\nClear lungs & normal heart.".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
            patient_id: PatientId::Known(1),
            follow_up: 1,
        }
    }

    #[test]
    fn test_stored_report_with_record() {
        let exporter = MarkdownExporter::new().unwrap();
        let report = stored();
        let doc = exporter
            .render(ExportSource::Stored(&report), Some(&record()))
            .unwrap();

        assert!(doc.starts_with("# CXR Report - Patient ID: 1, Follow-up: 1"));
        assert!(doc.contains("Created: 2025-03-01 09:30:00 UTC"));
        assert!(doc.contains("| Finding Labels | Pneumonia, Effusion |"));
        assert!(doc.contains("| View Position | PA |"));
        // No HTML escaping in Markdown output.
        assert!(doc.contains("Clear lungs & normal heart."));
    }

    #[test]
    fn test_without_record_has_no_table() {
        let exporter = MarkdownExporter::new().unwrap();
        let report = stored();
        let doc = exporter.render(ExportSource::Stored(&report), None).unwrap();
        assert!(!doc.contains("Patient Record"));
        assert!(doc.contains("## Report"));
    }

    #[test]
    fn test_draft_restores_markers() {
        let exporter = MarkdownExporter::new().unwrap();
        let mut sections = ParsedReport::default();
        sections.set(ReportSection::Impression, "Normal chest.");
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let doc = exporter
            .render_at(
                ExportSource::Draft {
                    sections: &sections,
                    patient_id: PatientId::Unknown,
                    follow_up: 0,
                },
                None,
                now,
            )
            .unwrap();

        assert!(doc.starts_with("# CXR Report - Patient ID: Unknown, Follow-up: 0"));
        assert!(doc.contains("Created: 2025-01-02 03:04:05 UTC"));
        assert!(doc.contains("**Impression:**\nNormal chest."));
    }

    #[test]
    fn test_long_values_truncated() {
        let long = "x".repeat(61);
        assert_eq!(truncate_value(&long), format!("{}...", "x".repeat(50)));
        let limit = "y".repeat(60);
        assert_eq!(truncate_value(&limit), limit);
    }
}
