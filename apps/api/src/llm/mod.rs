/// LLM Gateway (C3) — the single point of entry for all model calls in this
/// backend.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All LLM interactions MUST go through this module.
use std::time::Instant;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod json_repair;
pub mod prompts;

use crate::config::Config;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Intentionally hardcoded default to prevent accidental drift; overridable
/// only through `Config.openai_model` (kept as an env-configurable toggle
/// per §6, named after the original implementation's env var).
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;
const MAX_OUTPUT_TOKENS_CAP: u32 = 8192;
const BULK_TRANSLATION_TOKEN_CLAMP: u32 = 4096;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("invalid JSON after repair: {0}")]
    InvalidJson(String),

    #[error("response did not conform to the requested schema: {0}")]
    SchemaMismatch(String),

    #[error("exhausted {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Schema,
    SchemaRepair,
}

impl CallPhase {
    fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Schema => "schema",
            CallPhase::SchemaRepair => "schema_repair",
        }
    }
}

/// A single call-site's tracing identity. Never includes the API key.
#[derive(Debug, Clone)]
pub struct TraceCtx {
    pub session_id: String,
    pub trace_id: String,
}

/// One tracing record per attempt, matching §4.3's required fields.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub session_id: String,
    pub stage: String,
    pub phase: String,
    pub duration_ms: u128,
    pub input_fingerprints: Vec<InputFingerprint>,
    pub response_id: Option<String>,
    pub status: String,
    pub output_len: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputFingerprint {
    pub len: usize,
    pub sha256: String,
}

fn fingerprint(input: &str) -> InputFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    InputFingerprint {
        len: input.chars().count(),
        sha256: hex::encode(hasher.finalize()),
    }
}

fn emit_trace(record: &TraceRecord) {
    // Secrets never appear here: only fingerprints and lengths are logged.
    info!(
        trace_id = %record.trace_id,
        session_id = %record.session_id,
        stage = %record.stage,
        phase = %record.phase,
        duration_ms = record.duration_ms,
        status = %record.status,
        output_len = record.output_len,
        "llm call trace"
    );
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<AnthropicPromptRef<'a>>,
}

/// A pre-registered dashboard prompt reference: the provider resolves
/// `id` to its own stored prompt text and only `variables` travels over
/// the wire (§4.3 "dashboard vs. legacy mode").
#[derive(Debug, Serialize)]
struct AnthropicPromptRef<'a> {
    id: &'a str,
    variables: std::collections::HashMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: Option<String>,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }

    fn incomplete_due_to_length(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Parameters for a single `call_schema` invocation. Owned (not borrowed) so
/// the dyn-safe `LlmGateway` trait below can pass them across an `async_trait`
/// boundary without fighting lifetimes — the wizard builds one of these per
/// call anyway, so the extra clone is free in practice.
#[derive(Clone)]
pub struct SchemaCallParams {
    pub stage: String,
    pub system_prompt: String,
    pub user_text: String,
    pub trace: TraceCtx,
    pub max_output_tokens: u32,
    pub is_bulk_translation: bool,
    pub max_attempts: Option<u32>,
}

/// Object-safe facade over the gateway, mirroring the teacher's
/// `Arc<dyn FitScorer>` pluggable-backend pattern (`generation/fit_scoring.rs`).
/// `AppState` carries `Arc<dyn LlmGateway>` so the wizard orchestrator and its
/// test suite can swap a scripted fake in for the real Anthropic-backed
/// client without touching call sites.
#[async_trait::async_trait]
pub trait LlmGateway: Send + Sync {
    async fn call_schema_json(&self, params: SchemaCallParams) -> Result<serde_json::Value, LlmError>;
}

#[async_trait::async_trait]
impl LlmGateway for LlmClient {
    async fn call_schema_json(&self, params: SchemaCallParams) -> Result<serde_json::Value, LlmError> {
        self.call_schema::<serde_json::Value>(params).await
    }
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    prompt_registry: std::collections::HashMap<String, String>,
    include_system_prompt_with_dashboard: bool,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("failed to build LLM HTTP client"),
            api_key: config.anthropic_api_key.clone(),
            model: config.openai_model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            prompt_registry: config.prompt_registry.clone(),
            include_system_prompt_with_dashboard: config.openai_dashboard_include_system_prompt,
        }
    }

    /// Resolves the dashboard prompt id registered for `stage`, falling
    /// back to the global `"*"` override (`OPENAI_PROMPT_ID` with no
    /// per-stage suffix) when no stage-specific id is registered.
    fn resolve_prompt_id(&self, stage: &str) -> Option<&str> {
        self.prompt_registry
            .get(stage)
            .or_else(|| self.prompt_registry.get("*"))
            .map(String::as_str)
    }

    /// Resolves the effective system prompt for `stage`. When a dashboard
    /// prompt id is registered for the stage (or globally), the raw prompt
    /// is suppressed unless the diagnostic flag requests sending both
    /// (§4.3) — the prompt id itself travels separately via `prompt` on
    /// the request body, built in `raw_call`.
    fn effective_system_prompt<'a>(&self, stage: &str, raw: &'a str) -> &'a str {
        if self.resolve_prompt_id(stage).is_some() && !self.include_system_prompt_with_dashboard {
            ""
        } else {
            raw
        }
    }

    /// Structured-output call with retry, token-budget bumping, and JSON
    /// repair (§4.3). Always enforces that the response parses as `T`;
    /// anything else is a failure, never silently accepted.
    pub async fn call_schema<T: DeserializeOwned>(
        &self,
        params: SchemaCallParams,
    ) -> Result<T, LlmError> {
        let max_attempts = params.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1);
        let mut budget = params.max_output_tokens.min(MAX_OUTPUT_TOKENS_CAP);
        let system_prompt = self.effective_system_prompt(&params.stage, &params.system_prompt);
        let prompt_id = self.resolve_prompt_id(&params.stage);

        let mut last_err: Option<LlmError> = None;

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let result = self
                .raw_call(system_prompt, &params.user_text, budget, prompt_id, &params.stage)
                .await;
            let duration_ms = started.elapsed().as_millis();

            match result {
                Err(e) => {
                    emit_trace(&TraceRecord {
                        trace_id: params.trace.trace_id.clone(),
                        session_id: params.trace.session_id.clone(),
                        stage: params.stage.to_string(),
                        phase: CallPhase::Schema.as_str().to_string(),
                        duration_ms,
                        input_fingerprints: vec![fingerprint(&params.user_text)],
                        response_id: None,
                        status: "error".to_string(),
                        output_len: 0,
                    });
                    warn!("llm call attempt {attempt}/{max_attempts} failed: {e}");
                    last_err = Some(e);
                    continue;
                }
                Ok(response) => {
                    if response.incomplete_due_to_length() {
                        if params.is_bulk_translation && budget > BULK_TRANSLATION_TOKEN_CLAMP {
                            budget = BULK_TRANSLATION_TOKEN_CLAMP;
                        } else {
                            budget = (((budget + 400) as f64) * 1.6) as u32;
                            budget = budget.min(MAX_OUTPUT_TOKENS_CAP);
                        }
                        emit_trace(&TraceRecord {
                            trace_id: params.trace.trace_id.clone(),
                            session_id: params.trace.session_id.clone(),
                            stage: params.stage.to_string(),
                            phase: CallPhase::Schema.as_str().to_string(),
                            duration_ms,
                            input_fingerprints: vec![fingerprint(&params.user_text)],
                            response_id: response.id.clone(),
                            status: "incomplete_max_tokens".to_string(),
                            output_len: response.text().map(str::len).unwrap_or(0),
                        });
                        continue;
                    }

                    let Some(text) = response.text() else {
                        emit_trace(&TraceRecord {
                            trace_id: params.trace.trace_id.clone(),
                            session_id: params.trace.session_id.clone(),
                            stage: params.stage.to_string(),
                            phase: CallPhase::Schema.as_str().to_string(),
                            duration_ms,
                            input_fingerprints: vec![fingerprint(&params.user_text)],
                            response_id: response.id.clone(),
                            status: "empty_output".to_string(),
                            output_len: 0,
                        });
                        last_err = Some(LlmError::EmptyContent);
                        continue;
                    };

                    match Self::parse_structured::<T>(text) {
                        Ok(value) => {
                            emit_trace(&TraceRecord {
                                trace_id: params.trace.trace_id.clone(),
                                session_id: params.trace.session_id.clone(),
                                stage: params.stage.to_string(),
                                phase: CallPhase::Schema.as_str().to_string(),
                                duration_ms,
                                input_fingerprints: vec![fingerprint(&params.user_text)],
                                response_id: response.id,
                                status: "ok".to_string(),
                                output_len: text.len(),
                            });
                            return Ok(value);
                        }
                        Err(parse_err) => {
                            emit_trace(&TraceRecord {
                                trace_id: params.trace.trace_id.clone(),
                                session_id: params.trace.session_id.clone(),
                                stage: params.stage.to_string(),
                                phase: CallPhase::Schema.as_str().to_string(),
                                duration_ms,
                                input_fingerprints: vec![fingerprint(&params.user_text)],
                                response_id: response.id,
                                status: "invalid_json".to_string(),
                                output_len: text.len(),
                            });
                            debug!("llm json parse failed on attempt {attempt}: {parse_err}");

                            if attempt == max_attempts {
                                if let Ok(value) = self
                                    .schema_repair_call::<T>(
                                        &params.trace,
                                        &params.stage,
                                        text,
                                        system_prompt,
                                        prompt_id,
                                    )
                                    .await
                                {
                                    return Ok(value);
                                }
                            }

                            last_err = Some(LlmError::InvalidJson(parse_err));
                        }
                    }
                }
            }
        }

        Err(last_err.unwrap_or(LlmError::RetriesExhausted { attempts: max_attempts }))
    }

    fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, String> {
        if let Ok(value) = serde_json::from_str::<T>(text) {
            return Ok(value);
        }
        let repaired =
            json_repair::repair_pipeline(text).ok_or_else(|| "no balanced JSON span found".to_string())?;
        serde_json::from_str::<T>(&repaired).map_err(|e| e.to_string())
    }

    async fn schema_repair_call<T: DeserializeOwned>(
        &self,
        trace: &TraceCtx,
        stage: &str,
        bad_output: &str,
        original_system_prompt: &str,
        prompt_id: Option<&str>,
    ) -> Result<T, LlmError> {
        let started = Instant::now();
        let repair_prompt = format!(
            "{}\n\nPREVIOUS_OUTPUT:\n{}",
            prompts::SCHEMA_REPAIR_INSTRUCTION,
            bad_output
        );
        let response = self
            .raw_call(original_system_prompt, &repair_prompt, DEFAULT_MAX_OUTPUT_TOKENS, prompt_id, stage)
            .await?;
        let duration_ms = started.elapsed().as_millis();
        let text = response.text().ok_or(LlmError::EmptyContent)?;

        let parsed = Self::parse_structured::<T>(text);
        emit_trace(&TraceRecord {
            trace_id: trace.trace_id.clone(),
            session_id: trace.session_id.clone(),
            stage: stage.to_string(),
            phase: CallPhase::SchemaRepair.as_str().to_string(),
            duration_ms,
            input_fingerprints: vec![fingerprint(&repair_prompt)],
            response_id: response.id,
            status: if parsed.is_ok() { "ok".to_string() } else { "invalid_json".to_string() },
            output_len: text.len(),
        });

        parsed.map_err(LlmError::InvalidJson)
    }

    /// Issues the raw provider call. When `prompt_id` is `Some`, the request
    /// carries `prompt: {id, variables}` so the provider resolves the
    /// pre-registered dashboard prompt itself — the minimal variables are
    /// `stage` and `phase`, matching the original implementation's
    /// `openai_client.py` (§4.3: "the gateway sends only that id plus
    /// minimal variables").
    async fn raw_call(
        &self,
        system: &str,
        user_text: &str,
        max_tokens: u32,
        prompt_id: Option<&str>,
        stage: &str,
    ) -> Result<AnthropicResponse, LlmError> {
        let prompt = prompt_id.map(|id| {
            let mut variables = std::collections::HashMap::new();
            variables.insert("stage", stage.to_string());
            variables.insert("phase", "preparation".to_string());
            AnthropicPromptRef { id, variables }
        });

        let body = AnthropicRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: vec![AnthropicMessage { role: "user", content: user_text }],
            prompt,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&raw_body)
                .map(|e| e.error.message)
                .unwrap_or(raw_body);
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
pub mod fake {
    //! A scripted, call-counting stand-in for [`LlmClient`] behind the same
    //! `LlmGateway` seam (SPEC_FULL.md §10 Test tooling), used to assert the
    //! work-tailor dedupe law (§8 property 8) without a live provider: the
    //! queue consumer / retry policy modeled in `llm::mod` is exercised
    //! through the trait, the transport underneath is not.

    use std::collections::VecDeque;

    use tokio::sync::Mutex;

    use super::{LlmError, LlmGateway, SchemaCallParams};

    #[derive(Default)]
    pub struct ScriptedLlmGateway {
        responses: Mutex<VecDeque<serde_json::Value>>,
        pub calls: Mutex<u32>,
    }

    impl ScriptedLlmGateway {
        pub fn with_responses(responses: Vec<serde_json::Value>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }

        pub async fn call_count(&self) -> u32 {
            *self.calls.lock().await
        }
    }

    #[async_trait::async_trait]
    impl LlmGateway for ScriptedLlmGateway {
        async fn call_schema_json(&self, _params: SchemaCallParams) -> Result<serde_json::Value, LlmError> {
            *self.calls.lock().await += 1;
            self.responses
                .lock()
                .await
                .pop_front()
                .ok_or(LlmError::EmptyContent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(registry: std::collections::HashMap<String, String>, diagnostic: bool) -> LlmClient {
        LlmClient {
            client: Client::new(),
            api_key: "test".to_string(),
            model: DEFAULT_MODEL.to_string(),
            prompt_registry: registry,
            include_system_prompt_with_dashboard: diagnostic,
        }
    }

    #[test]
    fn fingerprint_never_leaks_raw_content() {
        let fp = fingerprint("super secret api key stuff");
        assert_eq!(fp.len, "super secret api key stuff".chars().count());
        assert_eq!(fp.sha256.len(), 64);
    }

    #[test]
    fn effective_system_prompt_uses_raw_when_not_registered() {
        let client = test_client(Default::default(), false);
        assert_eq!(client.effective_system_prompt("work_experience", "raw prompt"), "raw prompt");
    }

    #[test]
    fn effective_system_prompt_suppressed_when_registered_and_not_diagnostic() {
        let mut registry = std::collections::HashMap::new();
        registry.insert("work_experience".to_string(), "pmpt_123".to_string());
        let client = test_client(registry, false);
        assert_eq!(client.effective_system_prompt("work_experience", "raw prompt"), "");
    }

    #[test]
    fn effective_system_prompt_included_in_diagnostic_mode() {
        let mut registry = std::collections::HashMap::new();
        registry.insert("work_experience".to_string(), "pmpt_123".to_string());
        let client = test_client(registry, true);
        assert_eq!(client.effective_system_prompt("work_experience", "raw prompt"), "raw prompt");
    }

    #[test]
    fn resolve_prompt_id_falls_back_to_global_registration() {
        let mut registry = std::collections::HashMap::new();
        registry.insert("*".to_string(), "pmpt_global".to_string());
        let client = test_client(registry, false);
        assert_eq!(client.resolve_prompt_id("work_experience"), Some("pmpt_global"));
        assert_eq!(client.effective_system_prompt("work_experience", "raw prompt"), "");
    }

    #[test]
    fn resolve_prompt_id_prefers_stage_specific_over_global() {
        let mut registry = std::collections::HashMap::new();
        registry.insert("*".to_string(), "pmpt_global".to_string());
        registry.insert("work_experience".to_string(), "pmpt_stage".to_string());
        let client = test_client(registry, false);
        assert_eq!(client.resolve_prompt_id("work_experience"), Some("pmpt_stage"));
    }

    #[test]
    fn parse_structured_falls_back_to_repair_pipeline() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Probe {
            a: i32,
        }
        let fenced = "```json\n{\"a\": 1}\n```";
        let parsed: Probe = LlmClient::parse_structured(fenced).unwrap();
        assert_eq!(parsed, Probe { a: 1 });
    }
}
