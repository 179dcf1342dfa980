//! OpenAI-compatible script and speech clients

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use postflow_core::models::Script;
use postflow_core::PipelineConfig;
use postflow_media::MediaProbe;

use crate::services::{ScriptGenerator, ScriptRequest, Speech, SpeechSynthesizer};

const DEFAULT_PROMPT: &str = "Write a narration script for a short social media video about {topic}. \
Use a {tone} tone. Return exactly {lines} short sentences, one per line, \
with no numbering, headings or commentary.";

const SPEECH_FORMAT: &str = "mp3";

/// Connection settings shared by both clients.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Debug for OpenAiConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client for OpenAI")
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(anyhow::anyhow!("{} request failed: {} - {}", what, status, error_text))
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Substitute `{topic}`, `{tone}` and `{lines}` into a prompt template.
pub fn render_prompt(template: &str, request: &ScriptRequest) -> String {
    template
        .replace("{topic}", &request.topic)
        .replace("{tone}", &request.tone)
        .replace("{lines}", &request.lines.to_string())
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    line
}

/// Turn a completion into narration lines, at most `limit` of them.
pub fn parse_script_lines(text: &str, limit: usize) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with("```"))
        .map(strip_list_marker)
        .map(|l| l.trim_matches(|c: char| c == '"' || c == '“' || c == '”').trim())
        .filter(|l| !l.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}

pub struct OpenAiScriptGenerator {
    http_client: reqwest::Client,
    config: OpenAiConfig,
    prompt_template: String,
}

impl Debug for OpenAiScriptGenerator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("OpenAiScriptGenerator")
            .field("config", &self.config)
            .finish()
    }
}

impl OpenAiScriptGenerator {
    pub fn new(config: OpenAiConfig, prompt_template: Option<String>) -> Result<Self> {
        Ok(Self {
            http_client: http_client(Duration::from_secs(120))?,
            config,
            prompt_template: prompt_template.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required for script generation")?;
        Self::new(
            OpenAiConfig {
                api_key,
                base_url: config.openai_base_url.clone(),
                model: config.script_model.clone(),
            },
            config.script_prompt_template.clone(),
        )
    }
}

#[async_trait]
impl ScriptGenerator for OpenAiScriptGenerator {
    #[tracing::instrument(skip(self), fields(model = %self.config.model))]
    async fn generate(&self, request: &ScriptRequest) -> Result<Script> {
        let prompt = render_prompt(&self.prompt_template, request);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You write voice-over scripts for short marketing videos.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.7,
        };

        let response = self
            .http_client
            .post(self.config.url("/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to the script generation service")?;
        let parsed: ChatResponse = ensure_success(response, "Script generation")
            .await?
            .json()
            .await
            .context("Failed to parse script generation response")?;

        let text = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .unwrap_or_default();
        let lines = parse_script_lines(&text, request.lines.max(1));
        if lines.is_empty() {
            anyhow::bail!("Script generation returned no usable lines");
        }

        tracing::debug!(line_count = lines.len(), "Script generated");
        Ok(Script { lines })
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

pub struct OpenAiSpeechSynthesizer {
    http_client: reqwest::Client,
    config: OpenAiConfig,
    probe: MediaProbe,
}

impl Debug for OpenAiSpeechSynthesizer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("OpenAiSpeechSynthesizer")
            .field("config", &self.config)
            .finish()
    }
}

impl OpenAiSpeechSynthesizer {
    pub fn new(config: OpenAiConfig, probe: MediaProbe) -> Result<Self> {
        Ok(Self {
            http_client: http_client(Duration::from_secs(300))?,
            config,
            probe,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required for speech synthesis")?;
        Self::new(
            OpenAiConfig {
                api_key,
                base_url: config.openai_base_url.clone(),
                model: config.speech_model.clone(),
            },
            MediaProbe::new(config.ffprobe_path.clone()),
        )
    }

    async fn request_audio(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let body = SpeechRequest {
            model: &self.config.model,
            voice,
            input: text,
            response_format: SPEECH_FORMAT,
        };
        let response = self
            .http_client
            .post(self.config.url("/audio/speech"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to the speech synthesis service")?;
        let bytes = ensure_success(response, "Speech synthesis")
            .await?
            .bytes()
            .await
            .context("Failed to read synthesized audio")?;
        if bytes.is_empty() {
            anyhow::bail!("Speech synthesis returned no audio");
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechSynthesizer {
    #[tracing::instrument(skip(self, text), fields(model = %self.config.model, chars = text.len()))]
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Speech> {
        let data = self.request_audio(text, voice).await?;

        let probed = self
            .probe
            .probe_bytes(&data, SPEECH_FORMAT)
            .await
            .context("Failed to measure synthesized audio")?;
        let duration_ms = probed
            .duration_ms
            .filter(|ms| *ms > 0)
            .context("Synthesized audio has no measurable duration")?;

        Ok(Speech {
            data,
            extension: SPEECH_FORMAT.to_string(),
            duration_ms,
        })
    }
}
