use async_trait::async_trait;

use crate::{
    model::{AgentReply, ImageRecord},
    session::ChatMessage,
};

/// Image-reading agent: turns a chest X-ray into free-text analysis.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, record: &ImageRecord) -> anyhow::Result<AgentReply>;
}

/// Report anchor: a chat-style agent that formats, answers questions about,
/// updates and finalizes reports. `history` is the session transcript so far.
#[async_trait]
pub trait ReportFormatter: Send + Sync {
    async fn respond(&self, prompt: &str, history: &[ChatMessage]) -> anyhow::Result<AgentReply>;
}

/// Supplies the ordered image records. Called again on every driver pass.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<ImageRecord>>;
}

/// Fixed record list, for tests and embedding.
#[async_trait]
impl RecordSource for Vec<ImageRecord> {
    async fn load(&self) -> anyhow::Result<Vec<ImageRecord>> {
        Ok(self.clone())
    }
}
