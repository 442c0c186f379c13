//! OpenAI-compatible chat-completions provider (blocking HTTP).
//!
//! Works against any endpoint speaking the `/v1/chat/completions` shape.
//! Analysis responses are parsed line-wise (`key: value`) — the model is
//! instructed to answer in that layout, and unparseable lines are skipped.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::llm::{PromptAnalysis, ProviderError};

const EXPAND_SYSTEM_PROMPT: &str = "You are a creative assistant that expands user prompts into \
detailed, vivid descriptions for image generation. Add specific details about lighting, colors, \
mood, style, and composition. Make the description detailed but coherent. Reply with the expanded \
prompt only.";

const ANALYZE_SYSTEM_PROMPT: &str = "You are an AI that analyzes image prompts. Extract the \
following elements from the prompt: subject, style, mood, colors, and setting. Answer with one \
`key: value` line per element, colors as a comma-separated list.";

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("build http client: {e}")))?;
        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    pub fn expand_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        let text = self.complete(EXPAND_SYSTEM_PROMPT, prompt)?;
        Ok(text.trim().to_string())
    }

    pub fn analyze_prompt(&self, prompt: &str) -> Result<PromptAnalysis, ProviderError> {
        let text = self.complete(ANALYZE_SYSTEM_PROMPT, prompt)?;
        Ok(parse_analysis(&text))
    }

    fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };

        let mut req = self.client.post(&self.api_base_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .map_err(|e| ProviderError::Request(format!("chat request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ProviderError::Request(format!("chat request: HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| ProviderError::Request(format!("malformed chat response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Request("chat response has no choices".into()))
    }
}

/// Parse a line-oriented `key: value` analysis into [`PromptAnalysis`].
/// Missing keys keep their sentinel defaults.
fn parse_analysis(text: &str) -> PromptAnalysis {
    let mut analysis = PromptAnalysis::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim().to_lowercase().as_str() {
            "subject" => analysis.subject = value.to_string(),
            "style" => analysis.style = value.to_string(),
            "mood" => analysis.mood = value.to_string(),
            "setting" => analysis.setting = value.to_string(),
            "colors" => {
                analysis.colors = value
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
            }
            _ => {}
        }
    }
    analysis
}
