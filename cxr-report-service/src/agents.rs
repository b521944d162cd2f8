//! OpenRouter-backed agents: the vision reader and the report anchor.

use anyhow::anyhow;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use cxr_flow::{
    AgentReply, ChatMessage, ImageAnalyzer, ImageRecord, ReportFormatter,
    rig_bridge::to_rig_messages,
};
use image::ImageFormat;
use reqwest::Client;
use rig::{
    agent::Agent,
    client::CompletionClient,
    completion::Chat,
    providers::openrouter,
};
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, info};

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const READER_TEMPERATURE: f64 = 0.4;
const ANCHOR_TEMPERATURE: f64 = 0.7;
const READER_MAX_TOKENS: u32 = 2000;

const READER_PREAMBLE: &str = r#"You are a CXR reader specialized in analyzing chest X-ray images.

Only analyze the image you are given. Do not generate samples and do not open with phrases like "I have analyzed the provided image". Just report.

Evaluate the image for abnormalities, including pneumonia, tuberculosis, pleural effusion, lung nodules, fractures and other lung conditions. If the image appears normal, clearly state that no significant findings were detected.

Organize the report into these sections:
- **Findings:** abnormalities detected, structured into Airways, Bones and Soft Tissues, Cardiac Silhouette and Mediastinum, Diaphragm and Pleural Spaces, and Lungs.
- **Impression:** the key findings and their possible clinical implications, with an overall assessment of the case.
- **Plan:** further diagnostic steps, follow-up recommendations or treatment considerations."#;

const ANCHOR_PREAMBLE: &str = r#"You are the anchor of the human-in-the-loop Q&A session for a CXR report.

The report must include a detailed analysis of the airways, bones and soft tissues, cardiac silhouette and mediastinum, diaphragm and pleural spaces, lungs, and any detailed abnormalities. Reorganize the Impression and Plan as bullet points.

Start the report with a header in this format:

**Patient Information:**
- Patient ID: 3
- Follow-up: 0
- Age: 81
- Gender: F
- View Position: PA
- Possible Diseases: Hernia

**Findings:**
...

**Impression:**
...

**Plan:**
...

When asked a question, answer it clearly and concisely based on the latest report and the conversation so far. After each answer, ask "Do you have further questions?".
When asked for a report, return ONLY the report, without any additional words.
When the user finishes the session, return the updated report that incorporates every insight and modification discussed during the Q&A."#;

/// Vision reader calling the OpenRouter chat completions API with an inline image.
pub struct OpenRouterReader {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenRouterReader {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ImageAnalyzer for OpenRouterReader {
    async fn analyze(&self, record: &ImageRecord) -> anyhow::Result<AgentReply> {
        let image_url = image_data_url(&record.image_path).await?;
        debug!(
            image = %record.image_path.display(),
            model = %self.model,
            "Sending image to reader"
        );

        let payload = json!({
            "model": self.model,
            "temperature": READER_TEMPERATURE,
            "max_tokens": READER_MAX_TOKENS,
            "messages": [
                { "role": "system", "content": READER_PREAMBLE },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "Analyze this chest X-ray." },
                        { "type": "image_url", "image_url": { "url": image_url } }
                    ]
                }
            ]
        });

        let response = self
            .client
            .post(OPENROUTER_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Reader request failed: {}", response.status()));
        }

        let response_json: Value = response.json().await?;
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Invalid response format from reader"))?;

        info!(
            patient_id = record.patient_id,
            chars = content.len(),
            "Reader analysis received"
        );
        Ok(AgentReply::new(content))
    }
}

/// Reads the image and encodes it as a `data:` URL.
async fn image_data_url(path: &Path) -> anyhow::Result<String> {
    let mime = image_mime_type(path)?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("Failed to read image {}: {}", path.display(), e))?;
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)))
}

fn image_mime_type(path: &Path) -> anyhow::Result<&'static str> {
    let format = ImageFormat::from_path(path)
        .map_err(|e| anyhow!("Unsupported image {}: {}", path.display(), e))?;
    Ok(format.to_mime_type())
}

/// Report anchor backed by a rig OpenRouter agent.
pub struct AnchorAgent {
    agent: Agent<openrouter::CompletionModel>,
}

impl AnchorAgent {
    pub fn new(api_key: &str, model: &str) -> Self {
        let client = openrouter::Client::new(api_key);
        let agent = client
            .agent(model)
            .preamble(ANCHOR_PREAMBLE)
            .temperature(ANCHOR_TEMPERATURE)
            .build();
        Self { agent }
    }
}

#[async_trait]
impl ReportFormatter for AnchorAgent {
    async fn respond(&self, prompt: &str, history: &[ChatMessage]) -> anyhow::Result<AgentReply> {
        let response = self
            .agent
            .chat(prompt.to_string(), to_rig_messages(history))
            .await
            .map_err(|e| anyhow!("Anchor request failed: {}", e))?;
        Ok(AgentReply::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mime_type_from_extension() {
        assert_eq!(
            image_mime_type(Path::new("images/00000001_000.png")).unwrap(),
            "image/png"
        );
        assert_eq!(image_mime_type(Path::new("scan.JPG")).unwrap(), "image/jpeg");
        assert!(image_mime_type(Path::new("notes.txt")).is_err());
    }

    #[tokio::test]
    async fn test_data_url_encodes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        std::fs::write(&path, b"abc").unwrap();

        let url = image_data_url(&path).await.unwrap();
        assert_eq!(url, "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_missing_image_is_error() {
        let err = image_data_url(&PathBuf::from("does/not/exist.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read image"));
    }
}
