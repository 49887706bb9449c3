//! Free text to `Intent`, one language model call per turn.

use crate::code_generator::pseudocode;
use crate::config_store::{ConfigChange, ConfigStore};
use crate::error::ChatError;
use crate::llm_client::{Credentials, LanguageModel, Prompt};
use crate::models::{Configuration, Intent, StrategyKind, StrategyParameters};
use crate::param_utils::{format_parameters, normalize_parameter_map, parameter_specs};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;

const RESPONSE_SHAPES: &str = r#"Respond with exactly one JSON object in one of these shapes:
{"intent": "CONFIGURE", "strategy": "<STRATEGY>", "params": {"<name>": <number>}, "explanation": "<why this setup fits the request>"}
{"intent": "EXPLAIN", "topic": "<short topic>", "content": "<explanation>"}
{"intent": "ACKNOWLEDGE", "message": "<short reply>"}
{"intent": "ERROR", "message": "<what was unclear>"}
Use CONFIGURE only when the user asks to set up or change a strategy. Omit parameters you do not want to change from their defaults."#;

pub struct ChatIntentRouter {
    model: Arc<dyn LanguageModel>,
}

impl ChatIntentRouter {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Classify `text` against the store's current configuration. A CONFIGURE intent has
    /// already been applied to `store` when this returns; every failure comes back as an
    /// ERROR intent and leaves the store untouched.
    pub async fn route(
        &self,
        text: &str,
        store: &ConfigStore,
        credentials: Option<&Credentials>,
    ) -> Intent {
        match self.try_route(text, store, credentials).await {
            Ok(intent) => intent,
            Err(err) => {
                warn!("Chat turn failed: {}", err);
                Intent::error(err.to_string())
            }
        }
    }

    async fn try_route(
        &self,
        text: &str,
        store: &ConfigStore,
        credentials: Option<&Credentials>,
    ) -> Result<Intent, ChatError> {
        let credentials = credentials.ok_or(ChatError::MissingCredentials)?;
        let current = store.get();
        let prompt = build_prompt(text, &current);

        let reply = self.model.complete(credentials, &prompt).await?;
        debug!("Model reply: {}", reply);

        match parse_reply(&reply)? {
            ParsedReply::Configure {
                strategy,
                params,
                explanation,
            } => {
                let applied = store.set(ConfigChange::replace_strategy(strategy, params).clearing_result())?;
                info!(
                    "Chat configured {} ({})",
                    applied.strategy,
                    format_parameters(&applied.params)
                );
                let explanation =
                    explanation.unwrap_or_else(|| pseudocode(applied.strategy, &applied.params));
                Ok(Intent::Configure {
                    strategy: applied.strategy,
                    params: applied.params.clone(),
                    explanation,
                })
            }
            ParsedReply::Other(intent) => Ok(intent),
        }
    }
}

enum ParsedReply {
    Configure {
        strategy: StrategyKind,
        params: StrategyParameters,
        explanation: Option<String>,
    },
    Other(Intent),
}

pub fn build_prompt(text: &str, current: &Configuration) -> Prompt {
    let mut catalogue = String::new();
    for kind in StrategyKind::ALL {
        let params = parameter_specs(kind)
            .iter()
            .map(|spec| format!("{} (default {}, {}..{})", spec.name, spec.default, spec.min, spec.max))
            .collect::<Vec<_>>()
            .join("; ");
        catalogue.push_str(&format!("- {}: {}. Parameters: {}\n", kind.as_str(), kind.label(), params));
    }

    let system = format!(
        "You are a trading strategy assistant for a backtesting tool.\n\
         Supported strategies (use the exact names):\n{}\n{}",
        catalogue, RESPONSE_SHAPES
    );
    let user = format!(
        "Current setup: {} from {} to {}, strategy {} with {}.\n\nUser request: {}",
        current.symbol,
        current.start_date,
        current.end_date,
        current.strategy,
        format_parameters(&current.params),
        text.trim()
    );

    Prompt { system, user }
}

/// Models sometimes wrap JSON in a markdown fence despite being asked not to.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_reply(reply: &str) -> Result<ParsedReply, ChatError> {
    let value: Value = serde_json::from_str(strip_code_fence(reply))
        .map_err(|err| ChatError::Parse(format!("reply is not JSON: {}", err)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ChatError::Parse("reply is not a JSON object".to_string()))?;
    let tag = object
        .get("intent")
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::Parse("reply has no intent".to_string()))?;

    match tag.trim().to_ascii_uppercase().as_str() {
        "CONFIGURE" => {
            let raw_strategy = string_field(object, "strategy").unwrap_or_default();
            let strategy = raw_strategy
                .parse::<StrategyKind>()
                .map_err(|_| ChatError::UnknownStrategy(raw_strategy.clone(), StrategyKind::catalogue()))?;
            let params = match object.get("params") {
                Some(Value::Object(raw)) => normalize_parameter_map(raw),
                Some(Value::Null) | None => StrategyParameters::new(),
                Some(other) => {
                    return Err(ChatError::Parse(format!("params must be an object, got {}", other)))
                }
            };
            Ok(ParsedReply::Configure {
                strategy,
                params,
                explanation: string_field(object, "explanation"),
            })
        }
        "EXPLAIN" => Ok(ParsedReply::Other(Intent::Explain {
            topic: string_field(object, "topic").unwrap_or_default(),
            content: string_field(object, "content")
                .ok_or_else(|| ChatError::Parse("EXPLAIN reply has no content".to_string()))?,
        })),
        "ACKNOWLEDGE" => Ok(ParsedReply::Other(Intent::Acknowledge {
            message: string_field(object, "message").unwrap_or_default(),
        })),
        "ERROR" => Ok(ParsedReply::Other(Intent::error(
            string_field(object, "message")
                .unwrap_or_else(|| "The assistant could not handle that request.".to_string()),
        ))),
        other => Err(ChatError::Parse(format!("unrecognised intent '{}'", other))),
    }
}
