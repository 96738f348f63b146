//! Client for the remote AI completion service.
//!
//! The wire contract is small: POST `{messages, response_format?,
//! temperature}`, receive `{content, usage:{prompt_tokens,
//! completion_tokens}}`. When a response schema is supplied the service
//! guarantees `content` is JSON conforming to it; a malformed body still
//! surfaces as a `Protocol` error and is not retried here.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error};

use curator_model::SceneData;

use crate::ai::cost::{CostTable, Usage};
use crate::ai::prompts;
use crate::config::AiSettings;
use crate::error::{CuratorError, Result};

/// Rough token estimate used only when the transport does not report
/// exact counts.
pub const AVG_CHARS_PER_TOKEN: usize = 4;

#[derive(Clone, Debug)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    cost_table: CostTable,
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AiClient {
    pub fn new(settings: &AiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CuratorError::Config(format!("failed to build AI HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            cost_table: CostTable::with_overrides(&settings.model_costs),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn cost_for(&self, usage: &Usage) -> f64 {
        self.cost_table.cost_for(&self.model, usage)
    }

    pub fn estimate_tokens(text: &str) -> u64 {
        (text.len() / AVG_CHARS_PER_TOKEN) as u64
    }

    async fn create_completion(
        &self,
        prompt: &str,
        response_schema: Option<&Value>,
    ) -> Result<Completion> {
        let mut payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        if let Some(schema) = response_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": schema,
            });
        }

        let mut request = self.http.post(&self.base_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(CuratorError::Authentication(
                "AI service rejected the API key".into(),
            ));
        }
        if status.as_u16() == 429 {
            return Err(CuratorError::RateLimited("AI service rate limit".into()));
        }
        if !status.is_success() {
            return Err(CuratorError::Connection(format!(
                "AI service returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        let content = body
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| CuratorError::Protocol("AI response missing content".into()))?
            .to_string();

        let usage = match body.get("usage") {
            Some(usage) => Usage {
                prompt_tokens: usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or_else(|| Self::estimate_tokens(prompt)),
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or_else(|| Self::estimate_tokens(&content)),
            },
            None => Usage {
                prompt_tokens: Self::estimate_tokens(prompt),
                completion_tokens: Self::estimate_tokens(&content),
            },
        };

        Ok(Completion { content, usage })
    }

    /// Render the template for one scene and return the raw completion.
    pub async fn analyze_scene(
        &self,
        template: &str,
        scene: &SceneData,
        extras: &[(&str, String)],
    ) -> Result<Completion> {
        let prompt = prompts::render_prompt(template, scene, extras);
        self.create_completion(&prompt, None).await
    }

    /// Render the template, request structured JSON, and parse into `T`.
    pub async fn analyze_scene_structured<T: DeserializeOwned>(
        &self,
        template: &str,
        scene: &SceneData,
        extras: &[(&str, String)],
        response_schema: &Value,
    ) -> Result<(T, Usage)> {
        let prompt = prompts::render_prompt(template, scene, extras);
        let completion = self.create_completion(&prompt, Some(response_schema)).await?;

        let parsed = parse_structured(&completion.content)?;
        Ok((parsed, completion.usage))
    }

    /// Analyze several scenes in one call. The response is a JSON object
    /// keyed by scene identifier; scenes the model skipped map to empty
    /// objects rather than failing the batch.
    pub async fn batch_analyze_scenes(
        &self,
        template: &str,
        scenes: &[SceneData],
        extras: &[(&str, String)],
    ) -> Result<(HashMap<String, Value>, Usage)> {
        let prompt = prompts::render_batch_prompt(template, scenes, extras);
        let completion = self.create_completion(&prompt, None).await?;

        let mut results: HashMap<String, Value> = match serde_json::from_str(&completion.content) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            Ok(_) | Err(_) => {
                debug!("batch response was not a JSON object; returning empty results");
                HashMap::new()
            }
        };

        for scene in scenes {
            results
                .entry(scene.id.to_string())
                .or_insert_with(|| json!({}));
        }

        Ok((results, completion.usage))
    }
}

/// Parse structured-output content, surfacing malformed payloads as
/// protocol errors.
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| {
        error!("structured AI response failed to parse: {e}");
        CuratorError::Protocol(format!("malformed structured AI response: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TagAnswer {
        tags: Vec<TagItem>,
    }

    #[derive(Debug, Deserialize)]
    struct TagItem {
        name: String,
        confidence: f64,
    }

    #[test]
    fn token_estimate_is_four_chars_each() {
        assert_eq!(AiClient::estimate_tokens("abcdefgh"), 2);
        assert_eq!(AiClient::estimate_tokens(""), 0);
    }

    #[test]
    fn structured_parse_accepts_conforming_json() {
        let parsed: TagAnswer =
            parse_structured(r#"{"tags":[{"name":"4K","confidence":0.9}]}"#).unwrap();
        assert_eq!(parsed.tags[0].name, "4K");
        assert!(parsed.tags[0].confidence > 0.8);
    }

    #[test]
    fn structured_parse_rejects_malformed_json() {
        let result: Result<TagAnswer> = parse_structured("not json at all");
        assert!(matches!(result, Err(CuratorError::Protocol(_))));
    }
}
