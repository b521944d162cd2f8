//! Workflow driver: walks the record list one image at a time.
//!
//! Each pass seeds the current image's session if needed, exposes it for Q&A
//! and, once complete, for section review. The cursor only moves on an
//! explicit [`confirm_next`](WorkflowDriver::confirm_next).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    capability::{RecordSource, ReportFormatter},
    error::{FlowError, Result},
    generator::ReportGenerator,
    model::{ImageRecord, PatientId, StoredReport, image_id},
    parser::{ParsedReport, ReportSection, parse},
    qa::{QaEngine, SessionView, TurnOutcome},
    session::QaState,
    storage::{ReportStorage, SessionStorage},
};

/// What the current pass has to show.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DriverView {
    /// Reports have not been requested yet.
    Idle,
    /// The record source is empty.
    NoRecords,
    /// Every image has been confirmed.
    AllComplete { reports: Vec<StoredReport> },
    /// Q&A in progress for the current image. `position` is 1-based.
    Interacting {
        position: usize,
        total: usize,
        image_id: String,
        record: ImageRecord,
        session: SessionView,
    },
    /// Q&A finished; the sections can be edited, saved and confirmed.
    Review {
        position: usize,
        total: usize,
        image_id: String,
        record: ImageRecord,
        session: SessionView,
        sections: ParsedReport,
    },
}

/// Cursor and flags, for debugging and status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub cursor: usize,
    pub total: usize,
    pub reports_generated: bool,
    pub all_reports_complete: bool,
    /// Whether the session at the cursor is complete.
    pub processing_complete: bool,
    pub stored_reports: usize,
}

/// Result of confirming the current image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub saved: StoredReport,
    pub cursor: usize,
    pub total: usize,
    pub all_reports_complete: bool,
}

/// Edited sections for one image.
#[derive(Debug, Clone)]
struct Draft {
    image_id: String,
    sections: ParsedReport,
}

pub struct WorkflowDriver {
    records: Option<Vec<ImageRecord>>,
    cursor: usize,
    reports_generated: bool,
    all_reports_complete: bool,
    draft: Option<Draft>,
    sessions: Arc<dyn SessionStorage>,
    reports: Arc<dyn ReportStorage>,
    generator: ReportGenerator,
    engine: QaEngine,
}

impl WorkflowDriver {
    pub fn new(
        generator: ReportGenerator,
        formatter: Arc<dyn ReportFormatter>,
        sessions: Arc<dyn SessionStorage>,
        reports: Arc<dyn ReportStorage>,
    ) -> Self {
        Self {
            records: None,
            cursor: 0,
            reports_generated: false,
            all_reports_complete: false,
            draft: None,
            engine: QaEngine::new(formatter, sessions.clone()),
            sessions,
            reports,
            generator,
        }
    }

    /// Loads the records from `source` and syncs them.
    pub async fn refresh(&mut self, source: &dyn RecordSource) -> Result<()> {
        let records = source
            .load()
            .await
            .map_err(|e| FlowError::RecordSource(e.to_string()))?;
        self.sync_records(records);
        Ok(())
    }

    /// Replaces the record list. A change in length restarts processing.
    pub fn sync_records(&mut self, records: Vec<ImageRecord>) {
        if let Some(previous) = &self.records {
            if previous.len() != records.len() {
                info!(
                    previous = previous.len(),
                    current = records.len(),
                    "Record count changed, restarting processing"
                );
                self.cursor = 0;
                self.reports_generated = false;
                self.all_reports_complete = false;
                self.draft = None;
            }
        }
        self.records = Some(records);
    }

    pub fn records(&self) -> &[ImageRecord] {
        self.records.as_deref().unwrap_or_default()
    }

    /// "Generate reports". Only the first call resets the cursor.
    pub fn start(&mut self) {
        if !self.reports_generated {
            info!(total = self.records().len(), "Starting report generation");
            self.cursor = 0;
            self.all_reports_complete = false;
            self.draft = None;
        }
        self.reports_generated = true;
    }

    /// One pass: seeds the current session if absent and reports what to show.
    pub async fn step(&mut self) -> Result<DriverView> {
        let total = self.records().len();
        if total == 0 {
            return Ok(DriverView::NoRecords);
        }
        if !self.reports_generated {
            return Ok(DriverView::Idle);
        }
        if self.cursor >= total {
            self.all_reports_complete = true;
            return Ok(DriverView::AllComplete {
                reports: self.reports.list().await?,
            });
        }

        let (image_id, record) = self.current()?;
        if self.sessions.get(&image_id).await?.is_none() {
            info!(image_id = %image_id, position = self.cursor + 1, total, "Generating initial report");
            let session = self.generator.seed(&image_id, &record).await?;
            self.sessions.save(session).await?;
        }

        let session = self.engine.view(&image_id).await?;
        let position = self.cursor + 1;

        if session.final_report.is_some() && session.state == QaState::Complete {
            let sections = self.review_sections(&image_id, &session);
            return Ok(DriverView::Review {
                position,
                total,
                image_id,
                record,
                session,
                sections,
            });
        }

        Ok(DriverView::Interacting {
            position,
            total,
            image_id,
            record,
            session,
        })
    }

    /// Submits a chat message for the current image.
    pub async fn submit(&mut self, input: &str) -> Result<TurnOutcome> {
        let (image_id, _) = self.current()?;
        self.engine.submit(&image_id, input).await
    }

    /// Replaces one section of the review draft.
    pub async fn edit_section(&mut self, section: ReportSection, content: &str) -> Result<ParsedReport> {
        let (image_id, _) = self.current()?;
        let mut sections = self.draft_sections(&image_id).await?;
        sections.set(section, content);
        debug!(image_id = %image_id, section = %section, "Section edited");

        self.draft = Some(Draft {
            image_id,
            sections: sections.clone(),
        });
        Ok(sections)
    }

    /// Review draft of the current image with its record.
    pub async fn review_draft(&self) -> Result<(ParsedReport, ImageRecord)> {
        let (image_id, record) = self.current()?;
        let sections = self.draft_sections(&image_id).await?;
        Ok((sections, record))
    }

    /// Assembles the draft and saves it to the report store.
    pub async fn save_current(&mut self) -> Result<StoredReport> {
        let (image_id, record) = self.current()?;
        let sections = self.draft_sections(&image_id).await?;

        let saved = self
            .reports
            .save(sections.assemble(), record.patient(), record.follow_up)
            .await?;
        info!(
            image_id = %image_id,
            report_id = %saved.id,
            patient_id = record.patient_id,
            follow_up = record.follow_up,
            "Report saved"
        );
        Ok(saved)
    }

    /// Saves the current report and moves to the next image.
    pub async fn confirm_next(&mut self) -> Result<Progress> {
        let saved = self.save_current().await?;
        let total = self.records().len();

        self.cursor += 1;
        self.draft = None;

        if self.cursor < total {
            let (next_id, _) = self.current()?;
            if self.sessions.get(&next_id).await?.is_some() {
                warn!(image_id = %next_id, "Clearing stale session");
                self.sessions.delete(&next_id).await?;
            }
            info!(position = self.cursor + 1, total, "Moving to next image");
        } else {
            self.all_reports_complete = true;
            info!(total, "All images have been processed");
        }

        Ok(Progress {
            saved,
            cursor: self.cursor,
            total,
            all_reports_complete: self.all_reports_complete,
        })
    }

    /// Clears every session, the report store and the draft.
    pub async fn reset(&mut self) -> Result<()> {
        self.sessions.clear().await?;
        self.reports.clear().await?;
        self.draft = None;
        self.cursor = 0;
        self.reports_generated = false;
        self.all_reports_complete = false;
        info!("Workflow reset");
        Ok(())
    }

    pub async fn status(&self) -> Result<DriverStatus> {
        let processing_complete = match self.current() {
            Ok((image_id, _)) => self
                .sessions
                .get(&image_id)
                .await?
                .is_some_and(|s| s.qa_complete()),
            Err(_) => false,
        };

        Ok(DriverStatus {
            cursor: self.cursor,
            total: self.records().len(),
            reports_generated: self.reports_generated,
            all_reports_complete: self.all_reports_complete,
            processing_complete,
            stored_reports: self.reports.list().await?.len(),
        })
    }

    pub async fn stored_reports(&self) -> Result<Vec<StoredReport>> {
        self.reports.list().await
    }

    pub async fn stored_report(&self, id: Uuid) -> Result<Option<StoredReport>> {
        self.reports.get(id).await
    }

    /// Record a stored report was written for, if still loaded.
    pub fn record_for(&self, patient_id: PatientId, follow_up: u32) -> Option<&ImageRecord> {
        self.records()
            .iter()
            .find(|r| r.patient() == patient_id && r.follow_up == follow_up)
    }

    fn current(&self) -> Result<(String, ImageRecord)> {
        if !self.reports_generated {
            return Err(FlowError::InvalidState(
                "report generation has not been started".to_string(),
            ));
        }
        let record = self.records().get(self.cursor).ok_or_else(|| {
            FlowError::InvalidState("all images have been processed".to_string())
        })?;
        Ok((image_id(self.cursor, record.patient_id), record.clone()))
    }

    /// Draft for `image_id`, or the parsed final report. Requires a complete session.
    async fn draft_sections(&self, image_id: &str) -> Result<ParsedReport> {
        let session = self
            .sessions
            .get(image_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(image_id.to_string()))?;

        let final_report = match (&session.final_report, session.qa_complete()) {
            (Some(report), true) => report,
            _ => {
                return Err(FlowError::InvalidState(format!(
                    "Q&A for {} is not complete",
                    image_id
                )));
            }
        };

        Ok(match &self.draft {
            Some(draft) if draft.image_id == image_id => draft.sections.clone(),
            _ => parse(final_report),
        })
    }

    fn review_sections(&self, image_id: &str, session: &SessionView) -> ParsedReport {
        match &self.draft {
            Some(draft) if draft.image_id == image_id => draft.sections.clone(),
            _ => session.final_report.as_deref().map(parse).unwrap_or_default(),
        }
    }
}
