use serde_json::{Value as JsonValue, json};

use lmrelay_protocol::gemini::generate_content::response::GenerateContentResponse;
use lmrelay_protocol::gemini::generate_content::types as gemini;
use lmrelay_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use lmrelay_protocol::openai::create_chat_completions::types::{
    FinishReason, FinishReasonKnown,
};

pub fn transform_response(response: &CreateChatCompletionResponse) -> GenerateContentResponse {
    let usage = response.usage.unwrap_or_default();
    let mut out = GenerateContentResponse {
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: usage.prompt_tokens,
            candidates_token_count: usage.completion_tokens,
            total_token_count: usage.prompt_tokens + usage.completion_tokens,
            cached_content_token_count: None,
        }),
        model_version: Some(response.model.clone()),
        response_id: (!response.id.is_empty()).then(|| response.id.clone()),
        ..GenerateContentResponse::default()
    };

    for choice in &response.choices {
        let mut parts: Vec<gemini::Part> = Vec::new();

        let tool_calls = choice.message.tool_calls.as_deref().unwrap_or_default();
        if !tool_calls.is_empty() {
            for call in tool_calls {
                parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: None,
                        name: call.function.name.clone(),
                        args: Some(parse_call_arguments(&call.function.arguments)),
                    }),
                    ..gemini::Part::default()
                });
            }
        } else {
            let text = choice.message.joined_text();
            if !text.is_empty() {
                parts.push(gemini::Part::text(text));
            }
        }

        out.candidates.push(gemini::Candidate {
            content: Some(gemini::Content {
                parts,
                role: Some(gemini::ContentRole::Model),
            }),
            finish_reason: Some(map_finish_reason(choice.finish_reason.as_ref())),
            index: choice.index,
            safety_ratings: Vec::new(),
        });
    }

    out
}

/// Anything the map does not know collapses to STOP, matching what
/// Gemini clients expect from a completed candidate.
pub(crate) fn map_finish_reason(reason: Option<&FinishReason>) -> gemini::FinishReason {
    match reason {
        Some(FinishReason::Known(FinishReasonKnown::Length)) => gemini::FinishReason::MaxTokens,
        Some(FinishReason::Known(FinishReasonKnown::ContentFilter)) => {
            gemini::FinishReason::Safety
        }
        _ => gemini::FinishReason::Stop,
    }
}

pub(crate) fn parse_call_arguments(arguments: &str) -> JsonValue {
    if arguments.is_empty() {
        return json!({});
    }
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(value @ JsonValue::Object(_)) => value,
        _ => json!({ "arguments": arguments }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmrelay_protocol::openai::create_chat_completions::response::{
        ResponseChoice, ResponseMessage,
    };
    use lmrelay_protocol::openai::create_chat_completions::types::{
        CompletionUsage, MessageContent, ToolCall, ToolCallFunction, ToolCallType,
    };
    use serde_json::json;

    #[test]
    fn text_choice_becomes_model_candidate() {
        let response = CreateChatCompletionResponse {
            id: "chatcmpl-2".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![ResponseChoice {
                index: 0,
                message: ResponseMessage {
                    content: Some(MessageContent::Text("hey".to_string())),
                    ..ResponseMessage::default()
                },
                finish_reason: Some(FinishReason::stop()),
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: 7,
                completion_tokens: 2,
                total_tokens: 9,
                prompt_tokens_details: None,
            }),
            ..CreateChatCompletionResponse::default()
        };

        let gemini_response = transform_response(&response);
        let candidate = &gemini_response.candidates[0];
        assert_eq!(candidate.finish_reason, Some(gemini::FinishReason::Stop));
        let content = candidate.content.as_ref().unwrap();
        assert_eq!(content.role, Some(gemini::ContentRole::Model));
        assert_eq!(content.parts[0].text.as_deref(), Some("hey"));
        let usage = gemini_response.usage_metadata.unwrap();
        assert_eq!(usage.prompt_token_count, 7);
        assert_eq!(usage.total_token_count, 9);
    }

    #[test]
    fn tool_calls_become_function_call_parts() {
        let response = CreateChatCompletionResponse {
            choices: vec![ResponseChoice {
                index: 0,
                message: ResponseMessage {
                    tool_calls: Some(vec![ToolCall {
                        id: "call_1".to_string(),
                        r#type: ToolCallType::Function,
                        function: ToolCallFunction {
                            name: "search".to_string(),
                            arguments: "oops".to_string(),
                        },
                    }]),
                    ..ResponseMessage::default()
                },
                finish_reason: Some(FinishReason::tool_calls()),
            }],
            ..CreateChatCompletionResponse::default()
        };

        let gemini_response = transform_response(&response);
        let parts = &gemini_response.candidates[0].content.as_ref().unwrap().parts;
        let call = parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.args, Some(json!({"arguments": "oops"})));
        // tool_calls finish maps to STOP on this surface
        assert_eq!(
            gemini_response.candidates[0].finish_reason,
            Some(gemini::FinishReason::Stop)
        );
    }
}
