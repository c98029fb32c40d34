use serde_json::{Value as JsonValue, json};

use lmrelay_protocol::claude::create_message::request::CreateMessageRequestBody;
use lmrelay_protocol::claude::create_message::types as claude;
use lmrelay_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequestBody, RequestMessage,
};
use lmrelay_protocol::openai::create_chat_completions::types as openai;

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Rebuilds a Claude request from the canonical shape. Inverse of the
/// claude2openai request mapping for everything both protocols can
/// express.
pub fn transform_request(request: &CreateChatCompletionRequestBody) -> CreateMessageRequestBody {
    let mut body = CreateMessageRequestBody {
        model: request.model.clone(),
        messages: Vec::new(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stop_sequences: map_stop(request.stop.as_ref()),
        stream: request.stream,
        system: None,
        temperature: request.temperature,
        thinking: request
            .reasoning
            .as_ref()
            .and_then(|reasoning| reasoning.max_tokens)
            .map(|budget_tokens| claude::ThinkingConfigParam::Enabled { budget_tokens }),
        tool_choice: map_tool_choice(request.tool_choice.as_ref(), request.parallel_tool_calls),
        tools: map_tools(request.tools.as_deref()),
        top_k: request.top_k,
        top_p: request.top_p,
    };

    let mut system_texts: Vec<String> = Vec::new();
    for message in &request.messages {
        match message {
            RequestMessage::System { content } => system_texts.push(content.joined_text()),
            RequestMessage::User { content } => {
                if let Some(param) = map_user_message(content) {
                    body.messages.push(param);
                }
            }
            RequestMessage::Assistant {
                content,
                reasoning_content,
                thinking,
                tool_calls,
            } => {
                if let Some(param) = map_assistant_message(
                    content.as_ref(),
                    reasoning_content.as_deref(),
                    thinking.as_ref(),
                    tool_calls.as_deref(),
                ) {
                    body.messages.push(param);
                }
            }
            RequestMessage::Tool {
                content,
                tool_call_id,
                ..
            } => body.messages.push(claude::MessageParam {
                role: claude::MessageRole::User,
                content: claude::MessageContent::Blocks(vec![
                    claude::ContentBlockParam::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: Some(claude::ToolResultContent::Text(content.joined_text())),
                        is_error: None,
                    },
                ]),
            }),
        }
    }

    if !system_texts.is_empty() {
        body.system = Some(claude::SystemParam::Text(system_texts.concat()));
    }

    body
}

fn map_stop(stop: Option<&openai::StopConfiguration>) -> Option<Vec<String>> {
    match stop? {
        openai::StopConfiguration::Single(single) => Some(vec![single.clone()]),
        openai::StopConfiguration::Many(many) => Some(many.clone()),
    }
}

fn map_tools(tools: Option<&[openai::ToolDefinition]>) -> Option<Vec<claude::ToolDefinition>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|openai::ToolDefinition::Function { function }| claude::ToolDefinition {
                name: function.name.clone(),
                description: function.description.clone(),
                input_schema: function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object"})),
                cache_control: None,
            })
            .collect(),
    )
}

fn map_tool_choice(
    choice: Option<&openai::ToolChoiceOption>,
    parallel_tool_calls: Option<bool>,
) -> Option<claude::ToolChoice> {
    let disable_parallel_tool_use = parallel_tool_calls.map(|value| !value);
    Some(match choice? {
        openai::ToolChoiceOption::Mode(openai::ToolChoiceMode::Auto) => claude::ToolChoice::Auto {
            disable_parallel_tool_use,
        },
        openai::ToolChoiceOption::Mode(openai::ToolChoiceMode::Required) => {
            claude::ToolChoice::Any {
                disable_parallel_tool_use,
            }
        }
        openai::ToolChoiceOption::Mode(openai::ToolChoiceMode::None) => claude::ToolChoice::None,
        openai::ToolChoiceOption::Named(openai::NamedToolChoice::Function { function }) => {
            claude::ToolChoice::Tool {
                name: function.name.clone(),
                disable_parallel_tool_use,
            }
        }
    })
}

fn map_user_message(content: &openai::MessageContent) -> Option<claude::MessageParam> {
    let content = match content {
        openai::MessageContent::Text(text) => {
            if text.is_empty() {
                return None;
            }
            claude::MessageContent::Text(text.clone())
        }
        openai::MessageContent::Parts(parts) => {
            let blocks: Vec<claude::ContentBlockParam> =
                parts.iter().map(map_user_part).collect();
            if blocks.is_empty() {
                return None;
            }
            claude::MessageContent::Blocks(blocks)
        }
    };
    Some(claude::MessageParam {
        role: claude::MessageRole::User,
        content,
    })
}

fn map_user_part(part: &openai::ContentPart) -> claude::ContentBlockParam {
    match part {
        openai::ContentPart::Text {
            text,
            cache_control,
        } => claude::ContentBlockParam::Text {
            text: text.clone(),
            cache_control: cache_control.clone(),
        },
        openai::ContentPart::ImageUrl { image_url } => claude::ContentBlockParam::Image {
            source: parse_image_url(&image_url.url),
        },
    }
}

/// `data:` URIs turn back into inline base64 sources; anything else is a
/// remote URL.
fn parse_image_url(url: &str) -> claude::ImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return claude::ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    claude::ImageSource::Url {
        url: url.to_string(),
    }
}

fn map_assistant_message(
    content: Option<&openai::MessageContent>,
    reasoning_content: Option<&str>,
    thinking: Option<&openai::ThinkingContent>,
    tool_calls: Option<&[openai::ToolCall]>,
) -> Option<claude::MessageParam> {
    let mut blocks: Vec<claude::ContentBlockParam> = Vec::new();

    let reasoning = reasoning_content
        .filter(|text| !text.is_empty())
        .or_else(|| thinking.map(|thinking| thinking.content.as_str()));
    if let Some(text) = reasoning {
        blocks.push(claude::ContentBlockParam::Thinking {
            thinking: text.to_string(),
            signature: thinking.map(|thinking| thinking.signature.clone()),
        });
    }

    match content {
        Some(openai::MessageContent::Text(text)) if !text.is_empty() => {
            blocks.push(claude::ContentBlockParam::text(text.clone()));
        }
        Some(openai::MessageContent::Parts(parts)) => {
            for part in parts {
                if let openai::ContentPart::Text {
                    text,
                    cache_control,
                } = part
                {
                    blocks.push(claude::ContentBlockParam::Text {
                        text: text.clone(),
                        cache_control: cache_control.clone(),
                    });
                }
            }
        }
        _ => {}
    }

    for call in tool_calls.unwrap_or_default() {
        blocks.push(claude::ContentBlockParam::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: parse_tool_arguments(&call.function.arguments),
        });
    }

    if blocks.is_empty() {
        return None;
    }
    let content = match blocks.as_slice() {
        [claude::ContentBlockParam::Text {
            text,
            cache_control: None,
        }] => claude::MessageContent::Text(text.clone()),
        _ => claude::MessageContent::Blocks(blocks),
    };
    Some(claude::MessageParam {
        role: claude::MessageRole::Assistant,
        content,
    })
}

/// Tool arguments should be a JSON document; a provider that emits
/// something unparsable gets its output carried under a fallback key.
pub(crate) fn parse_tool_arguments(arguments: &str) -> JsonValue {
    if arguments.is_empty() {
        return json!({});
    }
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(value @ JsonValue::Object(_)) => value,
        _ => json!({ "raw": arguments }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_content::claude2openai;
    use serde_json::json;

    #[test]
    fn round_trips_text_tools_and_thinking() {
        let original = CreateMessageRequestBody {
            model: "claude-sonnet-4".to_string(),
            messages: vec![
                claude::MessageParam::user("hello"),
                claude::MessageParam {
                    role: claude::MessageRole::Assistant,
                    content: claude::MessageContent::Blocks(vec![
                        claude::ContentBlockParam::Thinking {
                            thinking: "let me think".to_string(),
                            signature: Some("sig123".to_string()),
                        },
                        claude::ContentBlockParam::ToolUse {
                            id: "toolu_9".to_string(),
                            name: "lookup".to_string(),
                            input: json!({"q": "rust"}),
                        },
                    ]),
                },
                claude::MessageParam {
                    role: claude::MessageRole::User,
                    content: claude::MessageContent::Blocks(vec![
                        claude::ContentBlockParam::ToolResult {
                            tool_use_id: "toolu_9".to_string(),
                            content: Some(claude::ToolResultContent::Text("found".to_string())),
                            is_error: None,
                        },
                    ]),
                },
            ],
            max_tokens: 512,
            stop_sequences: Some(vec!["STOP".to_string()]),
            stream: Some(true),
            system: Some(claude::SystemParam::Text("sys".to_string())),
            temperature: Some(0.5),
            thinking: None,
            tool_choice: None,
            tools: None,
            top_k: Some(8),
            top_p: Some(0.9),
        };

        let canonical = claude2openai::request::transform_request(
            &original,
            &claude2openai::request::TransformOptions::default(),
        );
        let rebuilt = transform_request(&canonical);

        assert_eq!(rebuilt.model, original.model);
        assert_eq!(rebuilt.max_tokens, original.max_tokens);
        assert_eq!(rebuilt.stop_sequences, original.stop_sequences);
        assert_eq!(rebuilt.system, original.system);
        assert_eq!(rebuilt.top_k, original.top_k);
        assert_eq!(rebuilt.messages.len(), original.messages.len());
        assert_eq!(rebuilt.messages[0], original.messages[0]);

        match &rebuilt.messages[1].content {
            claude::MessageContent::Blocks(blocks) => {
                assert_eq!(
                    blocks[0],
                    claude::ContentBlockParam::Thinking {
                        thinking: "let me think".to_string(),
                        signature: Some("sig123".to_string()),
                    }
                );
                assert_eq!(
                    blocks[1],
                    claude::ContentBlockParam::ToolUse {
                        id: "toolu_9".to_string(),
                        name: "lookup".to_string(),
                        input: json!({"q": "rust"}),
                    }
                );
            }
            other => panic!("expected blocks, got {other:?}"),
        }
        match &rebuilt.messages[2].content {
            claude::MessageContent::Blocks(blocks) => match &blocks[0] {
                claude::ContentBlockParam::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    assert_eq!(tool_use_id, "toolu_9");
                    assert_eq!(
                        content,
                        &Some(claude::ToolResultContent::Text("found".to_string()))
                    );
                }
                other => panic!("expected tool_result, got {other:?}"),
            },
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_arguments_fall_back_to_raw() {
        assert_eq!(parse_tool_arguments(""), json!({}));
        assert_eq!(parse_tool_arguments("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(
            parse_tool_arguments("not json"),
            json!({"raw": "not json"})
        );
        assert_eq!(parse_tool_arguments("[1,2]"), json!({"raw": "[1,2]"}));
    }

    #[test]
    fn data_uri_restores_base64_source() {
        assert_eq!(
            parse_image_url("data:image/jpeg;base64,QUJD"),
            claude::ImageSource::Base64 {
                media_type: "image/jpeg".to_string(),
                data: "QUJD".to_string(),
            }
        );
        assert_eq!(
            parse_image_url("https://example.com/a.png"),
            claude::ImageSource::Url {
                url: "https://example.com/a.png".to_string(),
            }
        );
    }
}
