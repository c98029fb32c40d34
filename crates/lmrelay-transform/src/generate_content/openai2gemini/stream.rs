use lmrelay_protocol::gemini::generate_content::response::GenerateContentResponse;
use lmrelay_protocol::gemini::generate_content::types as gemini;
use lmrelay_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;

use super::response::{map_finish_reason, parse_call_arguments};

/// Reframes one chat-completion chunk as a Gemini streaming response.
/// Returns `None` for chunks with neither content nor a finish reason,
/// notably the role-only chunk OpenAI streams open with.
pub fn transform_chunk(
    chunk: &CreateChatCompletionStreamResponse,
    estimate_prompt_tokens: u32,
) -> Option<GenerateContentResponse> {
    let has_content = chunk.choices.iter().any(|choice| {
        choice.delta.content.as_deref().is_some_and(|text| !text.is_empty())
            || choice
                .delta
                .tool_calls
                .as_deref()
                .is_some_and(|calls| !calls.is_empty())
    });
    let has_finish = chunk
        .choices
        .iter()
        .any(|choice| choice.finish_reason.is_some());
    if !has_content && !has_finish {
        return None;
    }

    let mut usage = gemini::UsageMetadata {
        prompt_token_count: estimate_prompt_tokens,
        candidates_token_count: 0,
        total_token_count: estimate_prompt_tokens,
        cached_content_token_count: None,
    };
    if let Some(chunk_usage) = chunk.usage {
        usage.prompt_token_count = chunk_usage.prompt_tokens;
        usage.candidates_token_count = chunk_usage.completion_tokens;
        usage.total_token_count = chunk_usage.total_tokens;
    }

    let mut out = GenerateContentResponse {
        usage_metadata: Some(usage),
        ..GenerateContentResponse::default()
    };

    for choice in &chunk.choices {
        let mut parts: Vec<gemini::Part> = Vec::new();

        let tool_calls = choice.delta.tool_calls.as_deref().unwrap_or_default();
        if !tool_calls.is_empty() {
            for call in tool_calls {
                let function = call.function.as_ref();
                parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: None,
                        name: function
                            .and_then(|function| function.name.clone())
                            .unwrap_or_default(),
                        args: Some(parse_call_arguments(
                            function
                                .and_then(|function| function.arguments.as_deref())
                                .unwrap_or_default(),
                        )),
                    }),
                    ..gemini::Part::default()
                });
            }
        } else if let Some(text) = choice.delta.content.as_deref()
            && !text.is_empty()
        {
            parts.push(gemini::Part::text(text));
        }

        out.candidates.push(gemini::Candidate {
            content: Some(gemini::Content {
                parts,
                role: Some(gemini::ContentRole::Model),
            }),
            finish_reason: choice
                .finish_reason
                .as_ref()
                .map(|reason| map_finish_reason(Some(reason))),
            index: choice.index,
            safety_ratings: Vec::new(),
        });
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmrelay_protocol::openai::create_chat_completions::stream::{
        StreamChoice, StreamDelta,
    };
    use lmrelay_protocol::openai::create_chat_completions::types::FinishReason;

    fn chunk_with(delta: StreamDelta, finish: Option<FinishReason>) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            ..CreateChatCompletionStreamResponse::default()
        }
    }

    #[test]
    fn empty_leading_chunk_is_skipped() {
        let chunk = chunk_with(
            StreamDelta {
                role: Some("assistant".to_string()),
                ..StreamDelta::default()
            },
            None,
        );
        assert_eq!(transform_chunk(&chunk, 0), None);
    }

    #[test]
    fn text_chunk_carries_estimated_prompt_tokens() {
        let chunk = chunk_with(
            StreamDelta {
                content: Some("part".to_string()),
                ..StreamDelta::default()
            },
            None,
        );
        let out = transform_chunk(&chunk, 42).unwrap();
        let usage = out.usage_metadata.unwrap();
        assert_eq!(usage.prompt_token_count, 42);
        assert_eq!(usage.candidates_token_count, 0);
        assert_eq!(
            out.candidates[0].content.as_ref().unwrap().parts[0]
                .text
                .as_deref(),
            Some("part")
        );
        assert_eq!(out.candidates[0].finish_reason, None);
    }

    #[test]
    fn finish_chunk_maps_reason() {
        let chunk = chunk_with(StreamDelta::default(), Some(FinishReason::length()));
        let out = transform_chunk(&chunk, 0).unwrap();
        assert_eq!(
            out.candidates[0].finish_reason,
            Some(gemini::FinishReason::MaxTokens)
        );
    }
}
