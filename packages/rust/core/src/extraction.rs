//! Structured-extraction boundary: free text in, schema-shaped JSON out.
//!
//! [`StructuredExtractor`] is the seam. [`ChatCompletionsExtractor`] talks to
//! an OpenAI-compatible `/chat/completions` endpoint with a strict
//! `json_schema` response format. [`extract_as`] derives the schema from a
//! Rust type and reports replies that do not fit it as `ExtractionMalformed`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use factfinder_fetch::Backoff;
use factfinder_shared::{AppConfig, ExtractionConfig, FactFinderError, Result, extraction_api_key};

/// One extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Short identifier, also used as the schema name (`[A-Za-z0-9_-]`).
    pub task: String,
    /// What to extract and how.
    pub instructions: String,
    /// The text to extract from.
    pub context: String,
    /// JSON schema the reply must satisfy.
    pub schema: Value,
}

#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, request: ExtractionRequest) -> Result<Value>;
}

/// Run an extraction whose reply is deserialized into `T`.
pub async fn extract_as<T>(
    extractor: &dyn StructuredExtractor,
    task: &str,
    instructions: &str,
    context: &str,
) -> Result<T>
where
    T: JsonSchema + DeserializeOwned,
{
    let request = ExtractionRequest {
        task: task.to_string(),
        instructions: instructions.to_string(),
        context: context.to_string(),
        schema: strict_schema::<T>(),
    };
    let reply = extractor.extract(request).await?;
    serde_json::from_value(reply).map_err(|e| FactFinderError::ExtractionMalformed(format!("{task}: {e}")))
}

// ---------------------------------------------------------------------------
// Schema generation
// ---------------------------------------------------------------------------

/// JSON schema for `T` in the strict form structured-output endpoints accept:
/// every object closed and fully required, no `$ref`s.
pub fn strict_schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_default();
    let definitions = value.get("definitions").cloned();

    if let Some(defs) = &definitions {
        inline_refs(&mut value, defs);
    }
    close_objects(&mut value);

    if let Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
        map.remove("title");
    }
    value
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".into(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let keys = props.keys().cloned().map(Value::String).collect();
                    map.insert("required".into(), Value::Array(keys));
                }
            }
            map.values_mut().for_each(close_objects);
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(mut def) = target {
                inline_refs(&mut def, definitions);
                *value = def;
                return;
            }

            let single = match map.get("allOf") {
                Some(Value::Array(all_of)) if all_of.len() == 1 => Some(all_of[0].clone()),
                _ => None,
            };
            if let Some(mut only) = single {
                inline_refs(&mut only, definitions);
                *value = only;
                return;
            }

            map.values_mut().for_each(|v| inline_refs(v, definitions));
        }
        Value::Array(items) => items.iter_mut().for_each(|v| inline_refs(v, definitions)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// ChatCompletionsExtractor
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'a str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
    refusal: Option<String>,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions client. Transport failures and replies
/// that are not JSON are retried under the configured backoff.
pub struct ChatCompletionsExtractor {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    backoff: Backoff,
}

impl ChatCompletionsExtractor {
    pub fn new(config: &ExtractionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FactFinderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            backoff: Backoff::from_config(config),
        })
    }

    /// Build from the app config, reading the API key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let key = extraction_api_key(config)?;
        Self::new(&config.extraction, key)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn complete_once(&self, request: &ExtractionRequest) -> Result<Value> {
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.1,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: &request.context,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &request.task,
                    strict: true,
                    schema: &request.schema,
                },
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FactFinderError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FactFinderError::Network(format!("{url}: HTTP {status}: {detail}")));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| FactFinderError::parse(format!("invalid completion body: {e}")))?;

        let message = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| FactFinderError::ExtractionMalformed("no choices in completion".into()))?;

        if let Some(refusal) = message.refusal {
            return Err(FactFinderError::ExtractionMalformed(format!("model refused: {refusal}")));
        }

        let content = message
            .content
            .ok_or_else(|| FactFinderError::ExtractionMalformed("empty completion".into()))?;
        serde_json::from_str(&content)
            .map_err(|e| FactFinderError::ExtractionMalformed(format!("reply is not JSON: {e}")))
    }
}

#[async_trait]
impl StructuredExtractor for ChatCompletionsExtractor {
    #[instrument(skip_all, fields(task = %request.task, model = %self.model))]
    async fn extract(&self, request: ExtractionRequest) -> Result<Value> {
        debug!(context_chars = request.context.len(), "structured extraction");
        self.backoff
            .retry(&request.task, |_| self.complete_once(&request))
            .await
    }
}
