use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use tracing::warn;
use uuid::Uuid;

use lmrelay_protocol::claude::create_message::request::CreateMessageRequestBody;
use lmrelay_protocol::claude::create_message::response::CreateMessageResponse;
use lmrelay_protocol::gemini::generate_content::request::GenerateContentRequest;
use lmrelay_protocol::gemini::generate_content::response::GenerateContentResponse;
use lmrelay_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequestBody, RequestMessage,
};
use lmrelay_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use lmrelay_protocol::openai::create_chat_completions::types::StreamOptions;
use lmrelay_provider_core::{
    AttemptFailure, BlockScope, CancelSignal, EventSink, KeyPool, PoolSnapshot, RelayError,
    StateSink, UpstreamContext,
};
use lmrelay_transform::generate_content::claude2openai::{
    self, SystemMapping, ThinkingMapping, TransformOptions,
};
use lmrelay_transform::generate_content::{gemini2openai, openai2claude, openai2gemini};

use crate::client::shared_client;
use crate::pipeline::{
    relay_stream, synthesize_refusal_chunk, synthesize_refusal_stream, StreamOutcome,
    StreamTarget, UsageSummary,
};
use crate::sensitive::{body_has_marker, MAX_SENSITIVE_RETRIES};
use crate::upstream::{classify_status, read_body, send_with_logging};

pub const PROVIDER_NAME: &str = "openai_compat";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// One API key for a chat-completions-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ApiKeyCredential {
    pub api_key: String,
}

/// Where and how requests leave the relay: endpoint plus per-channel
/// translation knobs.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub base_url: String,
    /// Replaces the client-requested model on the wire when set.
    pub model_override: Option<String>,
    pub thinking: ThinkingMapping,
    pub system: SystemMapping,
}

impl UpstreamTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_override: None,
            thinking: ThinkingMapping::default(),
            system: SystemMapping::default(),
        }
    }
}

/// Relays Claude and Gemini surfaces onto one OpenAI-compatible
/// upstream, rotating across its keys.
#[derive(Debug)]
pub struct OpenAICompatProvider {
    pool: KeyPool<ApiKeyCredential>,
    target: UpstreamTarget,
}

impl OpenAICompatProvider {
    pub fn new(target: UpstreamTarget, sink: Option<Arc<dyn StateSink>>) -> Self {
        Self {
            pool: KeyPool::new(PROVIDER_NAME, PoolSnapshot::empty(), sink),
            target,
        }
    }

    pub fn pool(&self) -> &KeyPool<ApiKeyCredential> {
        &self.pool
    }

    pub fn replace_snapshot(&self, snapshot: PoolSnapshot<ApiKeyCredential>) {
        self.pool.replace_snapshot(snapshot);
    }

    fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            thinking: self.target.thinking,
            system: self.target.system,
            upstream_model: self.target.model_override.clone(),
        }
    }

    /// Streams a Claude `create_message` call. Frames are written to
    /// `sink`; on sensitive-content exhaustion a synthesized refusal
    /// sequence is written instead of an error.
    pub async fn create_message_stream(
        &self,
        request: &CreateMessageRequestBody,
        ctx: &UpstreamContext,
        cancel: &CancelSignal,
        sink: &mut dyn EventSink,
    ) -> Result<UsageSummary, RelayError> {
        if cancel.is_canceled() {
            return Ok(UsageSummary::default());
        }
        let mut body = claude2openai::transform_request(request, &self.transform_options());
        body.stream = Some(true);
        force_include_usage(&mut body);
        let model = body.model.clone();
        let target = StreamTarget::Claude {
            estimated_prompt_tokens: estimate_prompt_tokens(&body),
        };

        let mut exclude: Option<String> = None;
        for attempt in 0..=MAX_SENSITIVE_RETRIES {
            let (key_id, response) = self
                .dispatch(&body, &model, "chat.completions", true, exclude.as_deref(), ctx)
                .await?;
            let stream = Box::pin(response.bytes_stream());
            match relay_stream(stream, target, sink, cancel).await? {
                StreamOutcome::Completed(usage) => return Ok(usage),
                StreamOutcome::Sensitive => {
                    warn!(
                        event = "sensitive_content",
                        trace_id = %ctx.trace_id,
                        provider = PROVIDER_NAME,
                        attempt = attempt,
                        "upstream flagged the request, rotating key"
                    );
                    exclude = Some(key_id);
                }
            }
        }

        warn!(
            event = "sensitive_retries_exhausted",
            trace_id = %ctx.trace_id,
            provider = PROVIDER_NAME,
            retries = MAX_SENSITIVE_RETRIES
        );
        synthesize_refusal_stream(&request.model, sink).await?;
        Ok(UsageSummary::default())
    }

    /// Unary Claude `create_message`.
    pub async fn create_message(
        &self,
        request: &CreateMessageRequestBody,
        ctx: &UpstreamContext,
    ) -> Result<CreateMessageResponse, RelayError> {
        let mut body = claude2openai::transform_request(request, &self.transform_options());
        body.stream = None;
        let model = body.model.clone();
        let upstream = self
            .fetch_unary(&body, &model, "chat.completions", ctx)
            .await?;
        Ok(openai2claude::response::transform_response(&upstream))
    }

    /// Streams a Gemini `generateContent` call as bare `data:` chunks.
    pub async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
        ctx: &UpstreamContext,
        cancel: &CancelSignal,
        sink: &mut dyn EventSink,
    ) -> Result<UsageSummary, RelayError> {
        if cancel.is_canceled() {
            return Ok(UsageSummary::default());
        }
        let mut body = gemini2openai::transform_request(request, true);
        if let Some(model) = &self.target.model_override {
            body.model = model.clone();
        }
        force_include_usage(&mut body);
        let model = body.model.clone();
        let target = StreamTarget::Gemini {
            estimated_prompt_tokens: estimate_prompt_tokens(&body),
        };

        let mut exclude: Option<String> = None;
        for attempt in 0..=MAX_SENSITIVE_RETRIES {
            let (key_id, response) = self
                .dispatch(&body, &model, "chat.completions", true, exclude.as_deref(), ctx)
                .await?;
            let stream = Box::pin(response.bytes_stream());
            match relay_stream(stream, target, sink, cancel).await? {
                StreamOutcome::Completed(usage) => return Ok(usage),
                StreamOutcome::Sensitive => {
                    warn!(
                        event = "sensitive_content",
                        trace_id = %ctx.trace_id,
                        provider = PROVIDER_NAME,
                        attempt = attempt,
                        "upstream flagged the request, rotating key"
                    );
                    exclude = Some(key_id);
                }
            }
        }

        warn!(
            event = "sensitive_retries_exhausted",
            trace_id = %ctx.trace_id,
            provider = PROVIDER_NAME,
            retries = MAX_SENSITIVE_RETRIES
        );
        synthesize_refusal_chunk(&request.path.model, sink).await?;
        Ok(UsageSummary::default())
    }

    /// Unary Gemini `generateContent`.
    pub async fn generate_content(
        &self,
        request: &GenerateContentRequest,
        ctx: &UpstreamContext,
    ) -> Result<GenerateContentResponse, RelayError> {
        let mut body = gemini2openai::transform_request(request, false);
        if let Some(model) = &self.target.model_override {
            body.model = model.clone();
        }
        let model = body.model.clone();
        let upstream = self
            .fetch_unary(&body, &model, "chat.completions", ctx)
            .await?;
        Ok(openai2gemini::response::transform_response(&upstream))
    }

    /// Runs a unary request through the key pool with the bounded
    /// sensitive-retry loop.
    async fn fetch_unary(
        &self,
        body: &CreateChatCompletionRequestBody,
        model: &str,
        op: &'static str,
        ctx: &UpstreamContext,
    ) -> Result<CreateChatCompletionResponse, RelayError> {
        let scope = BlockScope::model(model);
        let mut exclude: Option<String> = None;
        for attempt in 0..=MAX_SENSITIVE_RETRIES {
            let (key_id, response) = self
                .dispatch(body, model, op, false, exclude.as_deref(), ctx)
                .await?;
            let text = read_body(response, &scope)
                .await
                .map_err(|failure| failure.error)?;
            if body_has_marker(&text) {
                warn!(
                    event = "sensitive_content",
                    trace_id = %ctx.trace_id,
                    provider = PROVIDER_NAME,
                    attempt = attempt,
                    "upstream flagged the request, rotating key"
                );
                exclude = Some(key_id);
                continue;
            }
            return Ok(serde_json::from_str(&text)?);
        }
        Err(RelayError::SensitiveContent {
            retries: MAX_SENSITIVE_RETRIES,
        })
    }

    /// One pool pass: pick a key, send, classify the status. Returns the
    /// id of the key actually used alongside the open response.
    async fn dispatch(
        &self,
        body: &CreateChatCompletionRequestBody,
        model: &str,
        op: &'static str,
        is_stream: bool,
        exclude: Option<&str>,
        ctx: &UpstreamContext,
    ) -> Result<(String, wreq::Response), RelayError> {
        let scope = BlockScope::model(model);
        let base_url = self.target.base_url.clone();
        self.pool
            .execute_excluding(scope.clone(), exclude, |key| {
                let ctx = ctx.clone();
                let scope = scope.clone();
                let body = body.clone();
                let model = model.to_string();
                let base_url = base_url.clone();
                async move {
                    let client =
                        shared_client(ctx.proxy.as_deref()).map_err(AttemptFailure::fatal)?;
                    let url = build_url(&base_url, CHAT_COMPLETIONS_PATH);
                    let req_headers = build_headers(&key.value().api_key, &ctx.trace_id)
                        .map_err(AttemptFailure::fatal)?;
                    let response = send_with_logging(
                        &ctx,
                        PROVIDER_NAME,
                        op,
                        "POST",
                        CHAT_COMPLETIONS_PATH,
                        &model,
                        is_stream,
                        &scope,
                        || {
                            client
                                .post(url)
                                .headers(req_headers.clone())
                                .json(&body)
                                .send()
                        },
                    )
                    .await?;

                    let status = response.status();
                    if !status.is_success() {
                        let resp_headers = response.headers().clone();
                        let text = read_body(response, &scope).await?;
                        return Err(classify_status(status, &resp_headers, text, &scope));
                    }
                    Ok((key.id.clone(), response))
                }
            })
            .await
    }
}

fn force_include_usage(body: &mut CreateChatCompletionRequestBody) {
    match &mut body.stream_options {
        Some(options) => {
            if options.include_usage.is_none() {
                options.include_usage = Some(true);
            }
        }
        None => {
            body.stream_options = Some(StreamOptions {
                include_usage: Some(true),
            });
        }
    }
}

fn build_headers(api_key: &str, trace_id: &str) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::new();
    let mut bearer = String::with_capacity(api_key.len() + 7);
    bearer.push_str("Bearer ");
    bearer.push_str(api_key);
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&bearer).map_err(|err| RelayError::InvalidKey(err.to_string()))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        headers.insert("x-request-id", value);
    }
    // fresh per attempt so upstream dedup never collapses a retry into
    // the flagged request
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        headers.insert("idempotency-key", value);
    }
    Ok(headers)
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") && (path == "v1" || path.starts_with("v1/")) {
        path = path.trim_start_matches("v1/").trim_start_matches("v1");
    }
    format!("{base}/{path}")
}

/// Rough prompt size, for stream events that must report input tokens
/// before the upstream delivers real usage.
fn estimate_prompt_tokens(body: &CreateChatCompletionRequestBody) -> u32 {
    let mut chars = 0usize;
    for message in &body.messages {
        let content = match message {
            RequestMessage::System { content }
            | RequestMessage::User { content }
            | RequestMessage::Tool { content, .. } => Some(content),
            RequestMessage::Assistant { content, .. } => content.as_ref(),
        };
        if let Some(content) = content {
            chars += content.joined_text().chars().count();
        }
    }
    (chars / 4).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_join_deduplicates_v1() {
        assert_eq!(
            build_url("https://api.example.com", "/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            build_url("https://api.example.com/v1/", "/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn include_usage_is_forced_without_clobbering_an_explicit_opt_out() {
        let mut body = CreateChatCompletionRequestBody::default();
        force_include_usage(&mut body);
        assert_eq!(
            body.stream_options.and_then(|options| options.include_usage),
            Some(true)
        );

        let mut body = CreateChatCompletionRequestBody {
            stream_options: Some(StreamOptions {
                include_usage: Some(false),
            }),
            ..CreateChatCompletionRequestBody::default()
        };
        force_include_usage(&mut body);
        assert_eq!(
            body.stream_options.and_then(|options| options.include_usage),
            Some(false)
        );
    }

    #[test]
    fn prompt_estimate_counts_all_message_text() {
        let body = CreateChatCompletionRequestBody {
            messages: vec![
                RequestMessage::system("a".repeat(40)),
                RequestMessage::user("b".repeat(40)),
            ],
            ..CreateChatCompletionRequestBody::default()
        };
        assert_eq!(estimate_prompt_tokens(&body), 20);
        assert_eq!(
            estimate_prompt_tokens(&CreateChatCompletionRequestBody::default()),
            1
        );
    }

    #[test]
    fn headers_carry_auth_and_fresh_idempotency_key() {
        let first = build_headers("sk-test", "trace-1").unwrap();
        assert_eq!(
            first.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(first.get("x-request-id").unwrap(), "trace-1");
        let second = build_headers("sk-test", "trace-1").unwrap();
        assert_ne!(
            first.get("idempotency-key").unwrap(),
            second.get("idempotency-key").unwrap()
        );
    }
}
