//! Interactive terminal mode over the same workflow driver.
//!
//! During Q&A every line is sent to the anchor. In review, lines starting
//! with `:` are commands:
//!
//! - `:edit <section> <text>` replaces a section
//! - `:show` prints the draft
//! - `:export` prints the draft as Markdown
//! - `:next` saves the report and moves on
//! - `:reset` clears everything and starts over
//! - `:quit` leaves

use anyhow::Context as _;
use cxr_flow::{
    DriverView, FlowError, RecordSource, ReportSection, SessionView, TurnOutcome,
    WorkflowDriver, qa::FINAL_REPORT_NOTICE,
};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::export::{ExportSource, MarkdownExporter};

pub struct Terminal<'a, R, W> {
    driver: WorkflowDriver,
    records: &'a dyn RecordSource,
    exporter: MarkdownExporter,
    input: tokio::io::Lines<R>,
    output: W,
}

impl<'a, R, W> Terminal<'a, R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        driver: WorkflowDriver,
        records: &'a dyn RecordSource,
        exporter: MarkdownExporter,
        input: R,
        output: W,
    ) -> Self {
        Self {
            driver,
            records,
            exporter,
            input: input.lines(),
            output,
        }
    }

    /// Runs until every image is confirmed, the user quits or input ends.
    pub async fn run(mut self) -> anyhow::Result<WorkflowDriver> {
        let mut shown_report = None::<String>;

        loop {
            let view = match self.advance().await {
                Ok(view) => view,
                Err(e) if e.is_retryable() => {
                    if !self.offer_retry(&e).await? {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match view {
                DriverView::Idle => self.driver.start(),
                DriverView::NoRecords => {
                    writeln!(self.output, "No records found.")?;
                    break;
                }
                DriverView::AllComplete { reports } => {
                    writeln!(
                        self.output,
                        "All {} image(s) processed, {} report(s) saved.",
                        self.driver.records().len(),
                        reports.len()
                    )?;
                    break;
                }
                DriverView::Interacting {
                    position,
                    total,
                    image_id,
                    session,
                    ..
                } => {
                    if shown_report.as_deref() != Some(image_id.as_str()) {
                        self.print_report(position, total, &session)?;
                        shown_report = Some(image_id);
                    }
                    if !self.chat_turn().await? {
                        break;
                    }
                }
                DriverView::Review {
                    position,
                    total,
                    sections,
                    ..
                } => {
                    writeln!(self.output, "\nFinal report for image {}/{}:", position, total)?;
                    writeln!(self.output, "{}", sections.assemble())?;
                    if !self.review().await? {
                        break;
                    }
                    shown_report = None;
                }
            }
        }

        Ok(self.driver)
    }

    async fn advance(&mut self) -> cxr_flow::Result<DriverView> {
        self.driver.refresh(self.records).await?;
        self.driver.step().await
    }

    /// `false` when the user quits or input ends.
    async fn offer_retry(&mut self, error: &FlowError) -> anyhow::Result<bool> {
        warn!(error = %error, "Workflow step failed");
        writeln!(self.output, "⚠️ {}", error)?;
        writeln!(self.output, "Press enter to retry, or type :quit to leave.")?;
        Ok(match self.next_line().await? {
            Some(line) => line.trim() != ":quit",
            None => false,
        })
    }

    fn print_report(&mut self, position: usize, total: usize, session: &SessionView) -> anyhow::Result<()> {
        writeln!(self.output, "\n=== Image {}/{} ===", position, total)?;
        if let Some(report) = &session.report {
            writeln!(self.output, "{}", report)?;
        }
        writeln!(
            self.output,
            "\nAsk a question about the report, or type stop to finalize."
        )?;
        Ok(())
    }

    async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        write!(self.output, "> ")?;
        self.output.flush()?;
        self.input.next_line().await.context("Failed to read input")
    }

    /// One Q&A turn. `false` when input has ended.
    async fn chat_turn(&mut self) -> anyhow::Result<bool> {
        let Some(line) = self.next_line().await? else {
            return Ok(false);
        };
        if line.trim().is_empty() {
            return Ok(true);
        }

        match self.driver.submit(&line).await {
            Ok(TurnOutcome::Answered { reply }) => writeln!(self.output, "{}", reply)?,
            Ok(TurnOutcome::Failed { message }) => writeln!(self.output, "{}", message)?,
            Ok(TurnOutcome::Completed { .. }) => writeln!(self.output, "{}", FINAL_REPORT_NOTICE)?,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Chat turn failed");
                writeln!(self.output, "⚠️ {} Please try again.", e)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Review commands until `:next`. `false` when the user quits.
    async fn review(&mut self) -> anyhow::Result<bool> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(false);
            };
            let line = line.trim();
            let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

            match command {
                ":next" => {
                    let progress = self.driver.confirm_next().await?;
                    info!(cursor = progress.cursor, total = progress.total, "Report confirmed");
                    writeln!(self.output, "Report saved ({}/{}).", progress.cursor, progress.total)?;
                    return Ok(true);
                }
                ":edit" => match parse_edit(rest) {
                    Ok((section, text)) => {
                        self.driver.edit_section(section, text).await?;
                        writeln!(self.output, "{} updated.", section)?;
                    }
                    Err(message) => writeln!(self.output, "{}", message)?,
                },
                ":show" => {
                    let (sections, _) = self.driver.review_draft().await?;
                    writeln!(self.output, "{}", sections.assemble())?;
                }
                ":export" => {
                    let (sections, record) = self.driver.review_draft().await?;
                    let document = self.exporter.render(
                        ExportSource::Draft {
                            sections: &sections,
                            patient_id: record.patient(),
                            follow_up: record.follow_up,
                        },
                        Some(&record),
                    )?;
                    writeln!(self.output, "{}", document)?;
                }
                ":reset" => {
                    self.driver.reset().await?;
                    self.driver.start();
                    writeln!(self.output, "Workflow reset.")?;
                    return Ok(true);
                }
                ":quit" => return Ok(false),
                "" => {}
                _ => writeln!(
                    self.output,
                    "Commands: :edit <section> <text>, :show, :export, :next, :reset, :quit"
                )?,
            }
        }
    }
}

/// `<section> <text>`, where the section is one word (`patient_information`, `findings`, ...).
fn parse_edit(args: &str) -> Result<(ReportSection, &str), String> {
    let (name, text) = args
        .trim()
        .split_once(' ')
        .ok_or_else(|| "Usage: :edit <section> <text>".to_string())?;
    let section = name.parse::<ReportSection>().map_err(|e| e.to_string())?;
    Ok((section, text.trim()))
}
