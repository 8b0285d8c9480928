//! Natural-language explanation of recognised signs

use crate::config::ExplainerConfig;
use crate::error::{PipelineError, Result};
use serde::Deserialize;

/// Given a label and its confidence, return advisory text for the driver
pub trait Explainer: Send {
    fn explain(&mut self, label: &str, confidence: f32) -> Result<String>;

    fn name(&self) -> &str;
}

/// Deterministic advisory text, no external calls
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateExplainer;

impl Explainer for TemplateExplainer {
    fn explain(&mut self, label: &str, _confidence: f32) -> Result<String> {
        Ok(format!(
            "Detected sign '{}'. Drive cautiously and obey posted rules.",
            label
        ))
    }

    fn name(&self) -> &str {
        "template"
    }
}

/// Text returned when a remote explanation cannot be produced
pub fn generic_advisory(label: &str) -> String {
    format!("Detected sign '{}'. Drive cautiously.", label)
}

fn prompt(label: &str, confidence: f32) -> String {
    format!(
        "You are a concise driving safety assistant for Indian roads. \
         Explain the sign '{}' with confidence {:.2}, \
         then provide a short instruction for a cautious human driver.",
        label, confidence
    )
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// OpenAI-compatible chat completion client
pub struct HttpExplainer {
    agent: ureq::Agent,
    config: ExplainerConfig,
    api_key: String,
}

impl HttpExplainer {
    pub fn new(config: ExplainerConfig, api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .build();
        Self {
            agent,
            config,
            api_key,
        }
    }

    fn request(&self, label: &str, confidence: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt(label, confidence) }],
        });

        let response: ChatResponse = self
            .agent
            .post(&self.config.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .map_err(|e| PipelineError::http(e.to_string()))?
            .into_json()?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| tail_chars(c.message.content.trim(), self.config.max_tokens))
            .ok_or_else(|| PipelineError::explanation("empty completion"))
    }
}

impl Explainer for HttpExplainer {
    /// Never fails: transport or decoding problems fall back to generic text
    fn explain(&mut self, label: &str, confidence: f32) -> Result<String> {
        match self.request(label, confidence) {
            Ok(text) => Ok(text),
            Err(e) => {
                log::warn!("Explanation request for '{}' failed: {}", label, e);
                Ok(generic_advisory(label))
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Last `max` characters of `text`
fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max)).collect()
}

/// Select the explainer named by `config.provider`. Remote providers fall back
/// to the template when the API key variable is unset.
pub fn build_explainer(config: &ExplainerConfig) -> Box<dyn Explainer> {
    match config.provider.to_ascii_lowercase().as_str() {
        "openai" | "http" => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => {
                log::info!("Explainer: {} via {}", config.model, config.endpoint);
                Box::new(HttpExplainer::new(config.clone(), key))
            }
            _ => {
                log::warn!(
                    "{} not set, using template explanations",
                    config.api_key_env
                );
                Box::new(TemplateExplainer)
            }
        },
        "template" => Box::new(TemplateExplainer),
        other => {
            log::warn!("Unknown explainer provider '{}', using template", other);
            Box::new(TemplateExplainer)
        }
    }
}
