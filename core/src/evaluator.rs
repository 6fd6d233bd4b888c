use std::time::Duration;

use classdeck_protocol::Summary;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::config::EvaluatorConfig;
use crate::util::jitter;

/// Back-off before the single retry after a rate-limited call.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

const EVAL_INSTRUCTIONS: &str = "You assess a student's in-progress answer to a classroom coding \
prompt. Choose the progress label that best matches the draft and write 20-30 words of concrete, \
encouraging feedback about what to do next. Judge the draft as-is; do not assume unseen code.";

/// Thin wrapper around the external language model.
///
/// `evaluate` never fails: missing credentials, transport errors, exhausted
/// retries, and schema mismatches all collapse to the default summary.
pub struct EvaluatorClient {
    client: reqwest::Client,
    config: EvaluatorConfig,
}

enum CallError {
    RateLimited,
    Failed(String),
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl EvaluatorClient {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Classify `code` against the slide `prompt`.
    pub async fn evaluate(&self, prompt: &str, code: &str) -> Summary {
        let mut retried = false;
        loop {
            match self.call(prompt, code).await {
                Ok(summary) => return summary,
                Err(CallError::RateLimited) if !retried => {
                    retried = true;
                    let delay = jitter(RATE_LIMIT_BACKOFF);
                    debug!("evaluator rate-limited, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(CallError::RateLimited) => {
                    warn!("evaluator rate-limited after retry, using default summary");
                    return Summary::default();
                }
                Err(CallError::Failed(reason)) => {
                    warn!("evaluator unavailable ({reason}), using default summary");
                    return Summary::default();
                }
            }
        }
    }

    async fn call(&self, prompt: &str, code: &str) -> Result<Summary, CallError> {
        let Some(api_key) = &self.config.api_key else {
            return Err(CallError::Failed("LM_API_KEY is not set".to_string()));
        };

        // The schema forces one of the five labels; anything else fails
        // parsing below and falls back to the default.
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": EVAL_INSTRUCTIONS},
                {"role": "user", "content": format!("Task:\n{prompt}\n\nStudent code:\n{code}")},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "progress_summary",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "progress": {
                                "type": "string",
                                "enum": [
                                    "notStarted",
                                    "justStarted",
                                    "halfwayDone",
                                    "almostDone",
                                    "allDone"
                                ]
                            },
                            "feedback": {"type": "string"}
                        },
                        "required": ["progress", "feedback"],
                        "additionalProperties": false
                    }
                }
            }
        });

        let url = format!("{}/chat/completions", self.config.api_base);
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CallError::Failed(e.to_string()))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::RateLimited);
        }
        if !status.is_success() {
            return Err(CallError::Failed(format!("unexpected status {status}")));
        }

        let body: ChatResponse = res
            .json()
            .await
            .map_err(|e| CallError::Failed(e.to_string()))?;
        let Some(content) = body.choices.first().map(|c| c.message.content.as_str()) else {
            return Err(CallError::Failed("response carried no choices".to_string()));
        };

        match serde_json::from_str::<Summary>(content) {
            Ok(summary) if !summary.feedback.is_empty() => Ok(summary),
            Ok(_) => {
                debug!("evaluator returned empty feedback, using default");
                Ok(Summary::default())
            }
            Err(e) => {
                debug!("evaluator response failed the schema ({e}), using default");
                Ok(Summary::default())
            }
        }
    }
}
