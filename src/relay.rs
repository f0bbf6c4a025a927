use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::error::{GeminiRelayError, GenerationErrorKind};
use crate::history::Message;
use crate::Result;

/// Fixed reply used when the API answers successfully but with empty or
/// whitespace-only text. Forwarded as a normal reply, not an error.
pub const EMPTY_REPLY_MESSAGE: &str =
    "I could not generate a response. Please try rephrasing your question.";

struct ClassifyRule {
    kind: GenerationErrorKind,
    needles: &'static [&'static str],
}

/// Ordered failure-classification rules, evaluated top to bottom against the
/// lowercased failure description. First match wins; no match means Unknown.
const CLASSIFY_RULES: &[ClassifyRule] = &[
    ClassifyRule {
        kind: GenerationErrorKind::InvalidCredentials,
        needles: &[
            "api key",
            "api_key_invalid",
            "permission_denied",
            "unauthenticated",
            "invalid credential",
            "401",
            "403",
        ],
    },
    ClassifyRule {
        kind: GenerationErrorKind::QuotaExceeded,
        needles: &["quota", "resource_exhausted", "rate limit", "429"],
    },
    ClassifyRule {
        kind: GenerationErrorKind::Overloaded,
        needles: &["overloaded", "unavailable", "502", "503"],
    },
    ClassifyRule {
        kind: GenerationErrorKind::ContentBlocked,
        needles: &["safety", "blocked", "recitation", "prohibited_content", "spii"],
    },
    ClassifyRule {
        kind: GenerationErrorKind::Timeout,
        needles: &["timed out", "timeout", "deadline"],
    },
];

pub fn classify_failure(description: &str) -> GenerationErrorKind {
    let haystack = description.to_ascii_lowercase();
    CLASSIFY_RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| haystack.contains(needle)))
        .map(|rule| rule.kind)
        .unwrap_or(GenerationErrorKind::Unknown)
}

/// Talks to the Gemini `generateContent` endpoint: one outbound call per chat
/// turn, raced against a hard timeout. Persists nothing itself.
pub struct GeminiRelay {
    client: Client,
    config: RelayConfig,
}

impl GeminiRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        )
    }

    /// Submit `prompt` with `history` as leading context and await one reply.
    /// The caller is expected to have bounded `history` already.
    pub async fn generate(&self, prompt: &str, history: &[Message]) -> Result<String> {
        let mut contents: Vec<Value> = history
            .iter()
            .map(|message| serde_json::to_value(message).unwrap_or_default())
            .collect();
        contents.push(json!({"role": "user", "parts": [{"text": prompt}]}));
        let body = json!({"contents": contents});

        info!(
            model = %self.config.model,
            history_len = history.len(),
            "Gemini request"
        );

        let url = self.endpoint();
        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    let detail = format!("HTTP request failed: {e}");
                    error!("Gemini transport error: {detail}");
                    GeminiRelayError::Generation {
                        kind: classify_failure(&detail),
                        detail,
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let excerpt: String = text.chars().take(200).collect();
                let detail = format!("API error {status}: {excerpt}");
                error!("Gemini error: {detail}");
                return Err(GeminiRelayError::Generation {
                    kind: classify_failure(&detail),
                    detail,
                });
            }

            let value: Value = response.json().await.map_err(|e| {
                let detail = format!("invalid response body: {e}");
                error!("Gemini parse error: {detail}");
                GeminiRelayError::Generation {
                    kind: GenerationErrorKind::Unknown,
                    detail,
                }
            })?;
            parse_reply(&value)
        };

        match tokio::time::timeout(self.config.request_timeout(), call).await {
            Ok(result) => result,
            Err(_) => {
                let detail = format!(
                    "no reply within {}s, request abandoned",
                    self.config.request_timeout_secs
                );
                warn!("Gemini timeout: {detail}");
                Err(GeminiRelayError::Generation {
                    kind: GenerationErrorKind::Timeout,
                    detail,
                })
            }
        }
    }
}

/// Extract the reply text from a successful `generateContent` response.
/// Blocked responses become ContentBlocked; empty text becomes the fixed
/// soft-failure sentence rather than an error.
fn parse_reply(value: &Value) -> Result<String> {
    if let Some(reason) = value
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
    {
        return Err(GeminiRelayError::Generation {
            kind: GenerationErrorKind::ContentBlocked,
            detail: format!("prompt blocked: {reason}"),
        });
    }

    let candidate = value.pointer("/candidates/0").unwrap_or(&Value::Null);
    let parts = candidate.pointer("/content/parts").and_then(|v| v.as_array());

    if parts.is_none() {
        let finish_reason = candidate
            .get("finishReason")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if !finish_reason.is_empty() && finish_reason != "STOP" {
            let detail = format!("empty candidate, finishReason={finish_reason}");
            return Err(GeminiRelayError::Generation {
                kind: classify_failure(&detail),
                detail,
            });
        }
    }

    let text: String = parts
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        warn!("Gemini returned empty text, substituting fixed reply");
        return Ok(EMPTY_REPLY_MESSAGE.to_string());
    }
    Ok(text)
}
