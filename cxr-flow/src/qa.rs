//! Q&A engine – drives one session turn at a time.
//!
//! Every call follows the same _load → execute one turn → save_ pattern: the
//! session is read from [`SessionStorage`], mutated, and written back before
//! the call returns, so the next request starts where this one left off.
//! Transient states (`ProcessingAnswer`, `Finalizing`) are saved before the
//! anchor is called.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    capability::ReportFormatter,
    error::{FlowError, Result},
    quality::{classify_answer, is_stop_word},
    session::{ChatMessage, ChatRole, QaState, Session},
    storage::SessionStorage,
};

pub const FINAL_REPORT_NOTICE: &str = "Q&A session complete. Final report generated.";

/// Result of submitting one user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// A question was answered and the report updated.
    Answered { reply: String },
    /// The session is complete.
    Completed { final_report: String },
    /// The turn failed; `message` was recorded in the transcript.
    Failed { message: String },
}

/// Read-only snapshot of a session for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub image_id: String,
    pub state: QaState,
    pub report: Option<String>,
    pub final_report: Option<String>,
    /// Transcript without the opening assistant entry, which repeats the report.
    pub transcript: Vec<ChatMessage>,
    pub pending_reply: Option<String>,
}

impl SessionView {
    fn new(session: &Session, pending_reply: Option<String>) -> Self {
        let skip = match session.chat_history.first() {
            Some(first) if first.role == ChatRole::Assistant => 1,
            _ => 0,
        };
        Self {
            image_id: session.image_id.clone(),
            state: session.state,
            report: session.current_report.clone(),
            final_report: session.final_report.clone(),
            transcript: session.chat_history[skip..].to_vec(),
            pending_reply,
        }
    }
}

pub struct QaEngine {
    formatter: Arc<dyn ReportFormatter>,
    sessions: Arc<dyn SessionStorage>,
}

impl QaEngine {
    pub fn new(formatter: Arc<dyn ReportFormatter>, sessions: Arc<dyn SessionStorage>) -> Self {
        Self {
            formatter,
            sessions,
        }
    }

    /// Handles one user message for `image_id`.
    ///
    /// Stop words finalize the session; anything else is a question. A
    /// complete session returns its final report without calling the anchor.
    pub async fn submit(&self, image_id: &str, input: &str) -> Result<TurnOutcome> {
        let mut session = self.load(image_id).await?;

        if session.qa_complete() {
            let final_report = session.final_report.clone().ok_or_else(|| {
                FlowError::InvalidState(format!("session {} is complete without a final report", image_id))
            })?;
            return Ok(TurnOutcome::Completed { final_report });
        }

        if input.trim().is_empty() {
            return Err(FlowError::InvalidInput("message cannot be empty".to_string()));
        }

        let history = session.chat_history.clone();
        session.push(ChatMessage::user(input));

        if is_stop_word(input) {
            self.finalize(session, &history).await
        } else {
            self.answer(session, &history, input).await
        }
    }

    /// Current session state; the pending reply is handed out once.
    pub async fn view(&self, image_id: &str) -> Result<SessionView> {
        let mut session = self.load(image_id).await?;
        let pending = session.pending_reply.take();
        if pending.is_some() {
            self.sessions.save(session.clone()).await?;
        }
        Ok(SessionView::new(&session, pending))
    }

    async fn load(&self, image_id: &str) -> Result<Session> {
        self.sessions
            .get(image_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(image_id.to_string()))
    }

    async fn finalize(&self, mut session: Session, history: &[ChatMessage]) -> Result<TurnOutcome> {
        info!(image_id = %session.image_id, "Finalizing report");
        session.transition(QaState::Finalizing);
        self.sessions.save(session.clone()).await?;

        let latest_report = session.current_report.clone().unwrap_or_default();
        let prompt = final_report_prompt(&latest_report, &session.transcript());

        let result = self
            .formatter
            .respond(&prompt, history)
            .await
            .and_then(|reply| {
                if reply.content.trim().is_empty() {
                    anyhow::bail!("anchor returned an empty report");
                }
                Ok(reply.content)
            });

        match result {
            Ok(final_report) => {
                session.complete_with(final_report.clone());
                session.push(ChatMessage::assistant(FINAL_REPORT_NOTICE));
                self.sessions.save(session).await?;
                Ok(TurnOutcome::Completed { final_report })
            }
            Err(e) => {
                error!(image_id = %session.image_id, error = %e, "Final report generation failed");
                session.push(ChatMessage::assistant(format!(
                    "⚠️ Error generating final report: {} Please try again or contact support.",
                    e
                )));

                match session.current_report.clone() {
                    Some(report) => {
                        warn!(image_id = %session.image_id, "Using the latest report as the final report");
                        session.complete_with(report.clone());
                        self.sessions.save(session).await?;
                        Ok(TurnOutcome::Completed {
                            final_report: report,
                        })
                    }
                    None => {
                        session.transition(QaState::AwaitingInput);
                        self.sessions.save(session).await?;
                        Err(FlowError::Finalization(e.to_string()))
                    }
                }
            }
        }
    }

    async fn answer(
        &self,
        mut session: Session,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<TurnOutcome> {
        info!(image_id = %session.image_id, "Answering question");
        session.transition(QaState::ProcessingAnswer);
        self.sessions.save(session.clone()).await?;

        let outcome = match self.answer_turn(&mut session, history, question).await {
            Ok(reply) => TurnOutcome::Answered { reply },
            Err(e) => {
                error!(image_id = %session.image_id, error = %e, "Q&A turn failed");
                let message = format!(
                    "⚠️ I encountered an error while processing your question: {}. Please try again or rephrase your question.",
                    e
                );
                session.push(ChatMessage::assistant(message.clone()));
                session.pending_reply = None;
                TurnOutcome::Failed { message }
            }
        };

        session.transition(QaState::AwaitingInput);
        self.sessions.save(session).await?;
        Ok(outcome)
    }

    /// Direct answer, then report update. The report is only replaced once
    /// both calls succeed. If only the update fails, the reply stays in the
    /// transcript and the error entry follows it.
    async fn answer_turn(
        &self,
        session: &mut Session,
        history: &[ChatMessage],
        question: &str,
    ) -> anyhow::Result<String> {
        let latest_report = session.current_report.clone().unwrap_or_default();

        let response = self
            .formatter
            .respond(&question_prompt(&latest_report, question), history)
            .await?;
        let reply = classify_answer(&response.content).into_reply();

        session.push(ChatMessage::assistant(reply.clone()));
        session.pending_reply = Some(reply.clone());

        let updated = self
            .formatter
            .respond(&update_prompt(&latest_report, &session.transcript()), history)
            .await?;
        session.current_report = Some(updated.content);

        Ok(reply)
    }
}

fn question_prompt(report: &str, question: &str) -> String {
    format!(
        "Current Report:
{report}

User Question: {question}

Please answer the user's question directly based on the report above."
    )
}

fn update_prompt(report: &str, transcript: &str) -> String {
    format!(
        "Current Report:
{report}

Recent Q&A Session:
{transcript}

Please update the report based on the information from the Q&A session above.
IF NOTHING SPECIAL TO UPDATE, JUST PRINT THE INPUT REPORT.
Incorporate any relevant new information while maintaining the report structure."
    )
}

fn final_report_prompt(report: &str, transcript: &str) -> String {
    format!(
        "Current Report:
{report}

Complete Q&A Session:
{transcript}

User has requested to finalize the report. Please provide the final comprehensive CXR report
that incorporates all the information from our Q&A session. Maintain the existing report structure
and ensure all relevant details are included."
    )
}
