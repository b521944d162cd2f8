use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    capability::{ImageAnalyzer, ReportFormatter},
    error::{FlowError, Result},
    model::{AgentReply, ImageRecord},
    quality::{MAX_ANALYSIS_ATTEMPTS, QualityGate},
    retry::{RetryOutcome, RetryPolicy},
    session::Session,
};

/// How the reader analysis was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Passed the quality gate on attempt `attempts`.
    Accepted { attempts: u32 },
    /// No attempt passed; the last one is used as-is.
    Exhausted { attempts: u32 },
    /// The reader failed; the content describes the error.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResult {
    pub content: String,
    pub outcome: AnalysisOutcome,
}

/// Runs the reader until its output passes the quality gate, then has the
/// anchor turn the analysis into the initial four-section report.
pub struct ReportGenerator {
    analyzer: Arc<dyn ImageAnalyzer>,
    formatter: Arc<dyn ReportFormatter>,
    policy: RetryPolicy<AgentReply>,
}

impl ReportGenerator {
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>, formatter: Arc<dyn ReportFormatter>) -> Self {
        Self::with_gate(
            analyzer,
            formatter,
            MAX_ANALYSIS_ATTEMPTS,
            QualityGate::default(),
        )
    }

    pub fn with_gate(
        analyzer: Arc<dyn ImageAnalyzer>,
        formatter: Arc<dyn ReportFormatter>,
        max_attempts: u32,
        gate: QualityGate,
    ) -> Self {
        let policy = RetryPolicy::new(max_attempts, move |reply: &AgentReply| {
            gate.accepts(&reply.content)
        });
        Self {
            analyzer,
            formatter,
            policy,
        }
    }

    /// Best-effort analysis. Never fails: reader errors become error content.
    pub async fn analyze(&self, record: &ImageRecord) -> ReportResult {
        let max_attempts = self.policy.max_attempts();
        let outcome = self
            .policy
            .run(|attempt| {
                info!(
                    patient_id = record.patient_id,
                    attempt,
                    max_attempts,
                    "Running image analysis"
                );
                self.analyzer.analyze(record)
            })
            .await;

        match outcome {
            Ok(RetryOutcome::Accepted { value, attempts }) => ReportResult {
                content: value.content,
                outcome: AnalysisOutcome::Accepted { attempts },
            },
            Ok(RetryOutcome::Exhausted { last, attempts }) => {
                warn!(
                    patient_id = record.patient_id,
                    attempts, "No analysis passed the quality gate, using the last attempt"
                );
                ReportResult {
                    content: last.content,
                    outcome: AnalysisOutcome::Exhausted { attempts },
                }
            }
            Err(e) => {
                error!(patient_id = record.patient_id, error = %e, "Image analysis failed");
                ReportResult {
                    content: format!("Error generating report: {}", e),
                    outcome: AnalysisOutcome::Failed,
                }
            }
        }
    }

    /// Analyzes `record` and builds the session's initial report.
    pub async fn seed(&self, image_id: &str, record: &ImageRecord) -> Result<Session> {
        let analysis = self.analyze(record).await;
        info!(
            image_id = %image_id,
            outcome = ?analysis.outcome,
            analysis_chars = analysis.content.len(),
            "Analysis ready, formatting initial report"
        );

        let prompt = initial_report_prompt(&record.query(), &analysis.content);
        let reply = self.formatter.respond(&prompt, &[]).await.map_err(|e| {
            error!(image_id = %image_id, error = %e, "Initial report formatting failed");
            FlowError::ReportUnavailable {
                image_id: image_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        if reply.content.trim().is_empty() {
            return Err(FlowError::ReportUnavailable {
                image_id: image_id.to_string(),
                reason: "formatter returned an empty report".to_string(),
            });
        }

        Ok(Session::seeded(image_id, reply.content))
    }
}

fn initial_report_prompt(query: &str, analysis: &str) -> String {
    format!(
        "Please generate a properly formatted CXR report based on the following information:

Patient Information:
{query}

CXR Analysis:
{analysis}

Format the report with clear sections in this exact order:
1. Patient Information (including ID, follow-up, age, gender, view position, and possible diseases)
2. Findings (including airways, bones and soft tissues, cardiac silhouette and mediastinum, diaphragm and pleural spaces, and lungs)
3. Impression (key findings and clinical implications)
4. Plan (recommended next steps)"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatMessage, ChatRole, QaState};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns `short` for the first `short_calls` calls, then `long`.
    struct ScriptedReader {
        calls: AtomicU32,
        short_calls: u32,
    }

    impl ScriptedReader {
        fn new(short_calls: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                short_calls,
            }
        }
    }

    #[async_trait]
    impl ImageAnalyzer for ScriptedReader {
        async fn analyze(&self, _record: &ImageRecord) -> anyhow::Result<AgentReply> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let len = if call <= self.short_calls { 100 } else { 600 };
            let mut content = call.to_string();
            content.push_str(&"x".repeat(len - content.len()));
            Ok(AgentReply::new(content))
        }
    }

    struct FailingReader;

    #[async_trait]
    impl ImageAnalyzer for FailingReader {
        async fn analyze(&self, _record: &ImageRecord) -> anyhow::Result<AgentReply> {
            anyhow::bail!("vision endpoint unreachable")
        }
    }

    struct EchoFormatter {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    impl EchoFormatter {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ReportFormatter for EchoFormatter {
        async fn respond(
            &self,
            prompt: &str,
            _history: &[ChatMessage],
        ) -> anyhow::Result<AgentReply> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                anyhow::bail!("anchor offline");
            }
            Ok(AgentReply::new(
                "**Patient Information:** P\n**Findings:** F\n**Impression:** I\n**Plan:** L",
            ))
        }
    }

    fn record() -> ImageRecord {
        ImageRecord {
            image_path: PathBuf::from("images/00000001_000.png"),
            finding_labels: vec!["No Finding".to_string()],
            follow_up: 0,
            patient_id: 1,
            patient_age: 45,
            patient_gender: "M".to_string(),
            view_position: "PA".to_string(),
        }
    }

    #[tokio::test]
    async fn test_accepts_fifteenth_attempt() {
        let reader = Arc::new(ScriptedReader::new(14));
        let generator = ReportGenerator::new(reader.clone(), Arc::new(EchoFormatter::new()));

        let result = generator.analyze(&record()).await;

        assert_eq!(result.outcome, AnalysisOutcome::Accepted { attempts: 15 });
        assert_eq!(result.content.chars().count(), 600);
        assert!(result.content.starts_with("15"));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_attempt() {
        let reader = Arc::new(ScriptedReader::new(u32::MAX));
        let generator = ReportGenerator::new(reader.clone(), Arc::new(EchoFormatter::new()));

        let result = generator.analyze(&record()).await;

        assert_eq!(result.outcome, AnalysisOutcome::Exhausted { attempts: 15 });
        assert!(result.content.starts_with("15"));
        assert_eq!(result.content.chars().count(), 100);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn test_reader_error_becomes_content() {
        let generator =
            ReportGenerator::new(Arc::new(FailingReader), Arc::new(EchoFormatter::new()));

        let result = generator.analyze(&record()).await;

        assert_eq!(result.outcome, AnalysisOutcome::Failed);
        assert_eq!(
            result.content,
            "Error generating report: vision endpoint unreachable"
        );
    }

    #[tokio::test]
    async fn test_seed_builds_awaiting_session() {
        let formatter = Arc::new(EchoFormatter::new());
        let generator = ReportGenerator::new(Arc::new(ScriptedReader::new(0)), formatter.clone());

        let session = generator.seed("img_0_1", &record()).await.unwrap();

        assert_eq!(session.image_id, "img_0_1");
        assert_eq!(session.state, QaState::AwaitingInput);
        assert_eq!(session.chat_history.len(), 1);
        assert_eq!(session.chat_history[0].role, ChatRole::Assistant);
        assert_eq!(
            session.current_report.as_deref(),
            Some(session.chat_history[0].content.as_str())
        );

        let prompts = formatter.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("patient id: 1"));
        assert!(prompts[0].contains("CXR Analysis:\n1xxx"));
    }

    #[tokio::test]
    async fn test_seed_formatter_failure_is_unavailable() {
        let generator = ReportGenerator::new(
            Arc::new(ScriptedReader::new(0)),
            Arc::new(EchoFormatter::failing()),
        );

        let err = generator.seed("img_0_1", &record()).await.unwrap_err();
        assert!(matches!(err, FlowError::ReportUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_custom_gate() {
        let reader = Arc::new(ScriptedReader::new(u32::MAX));
        let generator = ReportGenerator::with_gate(
            reader,
            Arc::new(EchoFormatter::new()),
            3,
            QualityGate::default().with_min_chars(50),
        );

        let result = generator.analyze(&record()).await;
        assert_eq!(result.outcome, AnalysisOutcome::Accepted { attempts: 1 });
    }
}
