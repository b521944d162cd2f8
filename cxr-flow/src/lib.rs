//! # cxr-flow
//!
//! Session workflow for drafting chest X-ray reports with two agents: a
//! vision *reader* that analyzes the image and a chat *anchor* that formats
//! the report, answers questions about it and finalizes it.
//!
//! The pieces compose bottom-up:
//!
//! - [`ReportGenerator`] retries the reader until its output passes a
//!   [`QualityGate`], then has the anchor produce the initial report.
//! - [`QaEngine`] runs one question/answer turn per call against a
//!   [`Session`] kept in a [`SessionStorage`].
//! - [`WorkflowDriver`] walks the records, seeds sessions, handles section
//!   edits and saves finished reports to a [`ReportStorage`].
//!
//! Agents plug in through the [`ImageAnalyzer`] and [`ReportFormatter`]
//! traits; records through [`RecordSource`].

pub mod capability;
pub mod driver;
pub mod error;
pub mod generator;
pub mod model;
pub mod parser;
pub mod qa;
pub mod quality;
pub mod retry;
pub mod session;
pub mod storage;

#[cfg(feature = "rig")]
pub mod rig_bridge;

// Re-export commonly used types
pub use capability::{ImageAnalyzer, RecordSource, ReportFormatter};
pub use driver::{DriverStatus, DriverView, Progress, WorkflowDriver};
pub use error::{FlowError, Result};
pub use generator::{AnalysisOutcome, ReportGenerator, ReportResult};
pub use model::{AgentReply, ImageRecord, PatientId, StoredReport, image_id};
pub use parser::{ParsedReport, ReportSection, parse};
pub use qa::{QaEngine, SessionView, TurnOutcome};
pub use quality::{AnswerKind, PhraseMatch, QualityGate, classify_answer, is_stop_word};
pub use retry::{RetryOutcome, RetryPolicy};
pub use session::{ChatMessage, ChatRole, QaState, Session};
pub use storage::{InMemoryReportStore, InMemorySessionStorage, ReportStorage, SessionStorage};
