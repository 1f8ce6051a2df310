//! OpenAI-compatible chat client used by the optional enhancer.
//!
//! Every operation is a blocking request/response with a timeout; callers
//! treat any error as "proceed without enhancement". JSON payloads may
//! arrive wrapped in markdown fences and are extracted tolerantly.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Connection settings for the enhancer.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
}

/// A chat message in the OpenAI wire format.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// A dependency proposed by the model; validated before use.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposedDependency {
    pub source: String,
    pub target: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub reason: String,
}

fn default_strength() -> f64 {
    0.8
}

/// A semantic group proposed by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposedGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub change_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_cohesion")]
    pub cohesion_score: f64,
}

fn default_cohesion() -> f64 {
    0.7
}

/// Model verdict on a finished split.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchReview {
    #[serde(default = "default_true")]
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Blocking client for an OpenAI-compatible chat completion endpoint.
pub struct LlmClient {
    http: reqwest::blocking::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("build HTTP client")?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One chat completion round-trip; returns the raw assistant text.
    pub fn chat_completion(
        &self,
        messages: &[Message],
        temperature: f64,
        json_mode: bool,
    ) -> Result<String> {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        let url = format!("{base}/chat/completions");

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": temperature,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .context("LLM request failed")?
            .error_for_status()
            .context("LLM returned an error status")?;

        let payload: Value = response.json().context("decode LLM response")?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("LLM response missing content"))?;
        Ok(content.to_string())
    }

    /// Ask with JSON mode, retrying once without it for models that reject
    /// the response_format parameter.
    fn chat_json(&self, messages: &[Message]) -> Result<Value> {
        let text = match self.chat_completion(messages, 0.3, true) {
            Ok(text) => text,
            Err(err) => {
                debug!(%err, "json mode rejected, retrying without response_format");
                self.chat_completion(messages, 0.3, false)?
            }
        };
        extract_json(&text)
    }

    /// Propose dependencies the static analysis may have missed.
    pub fn analyze_dependencies(
        &self,
        changes_summary: &str,
        dependency_summary: &str,
    ) -> Result<Vec<ProposedDependency>> {
        let prompt = format!(
            "Analyze the following code changes and their dependencies. \
             Do not treat a hunk as depending on itself.\n\n\
             # Change summaries:\n{changes_summary}\n\n\
             # Detected dependencies:\n{dependency_summary}\n\n\
             Identify missing dependencies that should be added. Respond in JSON:\n\
             {{\"missing_dependencies\": [{{\"source\": \"change_id\", \"target\": \"change_id\", \
             \"strength\": 1.0, \"reason\": \"...\"}}]}}"
        );
        let messages = [
            Message::system(
                "You are a code analysis expert specializing in dependency analysis.",
            ),
            Message::user(prompt),
        ];
        let value = self.chat_json(&messages)?;
        let deps = value
            .get("missing_dependencies")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(deps).context("decode missing_dependencies")
    }

    /// Propose additional semantic groups.
    pub fn identify_semantic_groups(
        &self,
        changes_summary: &str,
        dependency_summary: &str,
    ) -> Result<Vec<ProposedGroup>> {
        let prompt = format!(
            "Given these code changes and dependencies, identify semantic groups \
             that represent coherent units of work. Consider feature cohesion, \
             refactoring patterns, API changes with their usages, and tests tied \
             to implementations.\n\n\
             # Changes:\n{changes_summary}\n\n\
             # Dependencies:\n{dependency_summary}\n\n\
             Respond in JSON:\n\
             {{\"groups\": [{{\"name\": \"...\", \"change_ids\": [\"...\"], \
             \"description\": \"...\", \"cohesion_score\": 0.9}}]}}"
        );
        let messages = [
            Message::system(
                "You are a code analysis expert specializing in semantic code understanding.",
            ),
            Message::user(prompt),
        ];
        let value = self.chat_json(&messages)?;
        let groups = value.get("groups").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(groups).context("decode groups")
    }

    /// Review a finished split for ordering or balance problems.
    pub fn validate_patches(
        &self,
        patches_summary: &str,
        dependency_summary: &str,
    ) -> Result<PatchReview> {
        let prompt = format!(
            "Validate the following patch split for correctness.\n\n\
             # Proposed patches:\n{patches_summary}\n\n\
             # Dependencies:\n{dependency_summary}\n\n\
             Check dependency satisfaction, ordering, and reviewability. Respond in JSON:\n\
             {{\"is_valid\": true, \"issues\": [], \"suggestions\": []}}"
        );
        let messages = [
            Message::system("You are a code review expert validating patch splits."),
            Message::user(prompt),
        ];
        let value = self.chat_json(&messages)?;
        serde_json::from_value(value).context("decode patch review")
    }

    /// Free-form JSON completion used for naming, annotations, goal
    /// summaries, and the mental model.
    pub fn complete_json(&self, system: &str, prompt: &str) -> Result<Value> {
        let messages = [Message::system(system.to_string()), Message::user(prompt.to_string())];
        self.chat_json(&messages)
    }
}

/// Extract a JSON object from an LLM response: as-is, from a fenced
/// markdown block, or from the widest `{...}` span.
pub fn extract_json(response: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(response) {
        return Ok(value);
    }

    let fence = Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").expect("static fence pattern");
    if let Some(cap) = fence.captures(response)
        && let Ok(value) = serde_json::from_str::<Value>(&cap[1])
    {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str::<Value>(&response[start..=end])
    {
        return Ok(value);
    }

    Err(anyhow!("no valid JSON found in LLM response"))
}
