//! Decision client: one screenshot plus context in, one action out.

use crate::config::OpenAiConfig;
use crate::error::DecisionError;
use crate::state::{Role, Turn};
use crate::types::AgentAction;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

pub const SYSTEM_PROMPT: &str = r##"You are a job application agent. You control a real Chrome browser and complete online job application forms on behalf of an applicant, issuing ONE action at a time as JSON.

Each turn you receive a screenshot of the current page and a short status line. Reply with exactly one JSON object:
- {"action":"click","selector":"button[type=submit]","reason":"..."}
- {"action":"fill","selector":"#email","value":"...","reason":"..."}
- {"action":"select","selector":"select[name=country]","value":"United States","reason":"..."}
- {"action":"check","selector":"#terms","checked":true,"reason":"..."}
- {"action":"upload","selector":"input[type=file]","fileType":"resume","reason":"..."}   (fileType: "resume" or "cover_letter")
- {"action":"scroll","direction":"down","amount":600,"reason":"..."}
- {"action":"wait","durationMs":2000,"reason":"..."}
- {"action":"navigate","url":"https://...","reason":"..."}
- {"action":"checkpoint","checkpointType":"review","message":"...","questions":["..."],"reason":"..."}
- {"action":"done","success":true,"message":"...","confirmationId":"...","reason":"..."}

checkpointType is one of: login, captcha, questions, review, error, upload, custom.

Rules:
1. Return ONLY a single JSON object. No markdown, no explanation.
2. Use precise CSS selectors for elements you can see (ids, names, labels, types).
3. Fill fields from the applicant profile. Never invent facts about the applicant.
4. Request a "login" checkpoint when an account sign-in is required. When credentials are provided, fill them with the literal placeholders {{credentials.username}} and {{credentials.password}}.
5. Request a "captcha" checkpoint for any CAPTCHA or bot check.
6. Request a "questions" checkpoint, listing the questions, when a required answer is not in the profile.
7. ALWAYS request a "review" checkpoint before clicking the final submit button. Only submit after the review is approved.
8. Use "done" only after the application has been submitted and confirmed, or with success=false if it cannot be completed.
9. If an action fails, try a different selector or approach instead of repeating it."##;

/// Inputs for one decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    /// Task description and applicant data. Pinned ahead of the history.
    pub brief: &'a str,
    /// Base64 PNG of the current page.
    pub screenshot: &'a str,
    /// Step number, URL and title.
    pub context: &'a str,
    /// Bounded slice of prior turns, oldest first.
    pub history: &'a [Turn],
}

#[async_trait]
pub trait DecisionModel: Send + Sync {
    /// Malformed output comes back as `DecisionError::Decode`, never a panic.
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<AgentAction, DecisionError>;
}

/// Vision model behind an OpenAI-compatible chat completions endpoint.
pub struct OpenAiVision {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiVision {
    pub fn new(config: OpenAiConfig) -> Result<Self, DecisionError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    fn messages(request: &DecisionRequest<'_>) -> Vec<Value> {
        let mut messages = Vec::with_capacity(request.history.len() + 3);
        messages.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
        messages.push(json!({"role": "user", "content": request.brief}));
        for turn in request.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": turn.content}));
        }
        messages.push(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": request.context},
                {
                    "type": "image_url",
                    "image_url": {"url": format!("data:image/png;base64,{}", request.screenshot)}
                }
            ]
        }));
        messages
    }
}

#[async_trait]
impl DecisionModel for OpenAiVision {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<AgentAction, DecisionError> {
        let body = json!({
            "model": self.config.model,
            "messages": Self::messages(&request),
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let message = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            warn!(status = status.as_u16(), "Decision API error: {}", message);
            return Err(DecisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let Some(content) = json_resp["choices"][0]["message"]["content"].as_str() else {
            return Err(DecisionError::Decode {
                reason: "response has no message content".into(),
                raw: json_resp.to_string(),
            });
        };
        debug!("Model says: {}", content);
        parse_action(content)
    }
}

/// Decode one action from raw model text, tolerating markdown fences and
/// prose around a single JSON object.
pub fn parse_action(raw: &str) -> Result<AgentAction, DecisionError> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let decode_err = |reason: String| DecisionError::Decode {
        reason,
        raw: raw.to_string(),
    };

    if cleaned.starts_with('[') {
        return Err(decode_err("expected exactly one action object, got an array".into()));
    }

    let object = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => return Err(decode_err("no JSON object found".into())),
    };

    serde_json::from_str(object).map_err(|e| decode_err(e.to_string()))
}
