use lmrelay_protocol::claude::create_message::request::CreateMessageRequestBody;
use lmrelay_protocol::claude::create_message::types as claude;
use lmrelay_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequestBody, RequestMessage,
};
use lmrelay_protocol::openai::create_chat_completions::types as openai;

/// How a Claude thinking budget is presented to the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkingMapping {
    /// Tier the budget into `reasoning_effort`. Effort and `max_tokens`
    /// are mutually exclusive on these endpoints, so `max_tokens` is
    /// dropped.
    #[default]
    EffortTiers,
    /// Send the budget verbatim in a `reasoning` object.
    BudgetPassthrough,
}

/// How a multi-block system prompt is carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SystemMapping {
    /// Concatenate block texts into one system string.
    #[default]
    Concatenate,
    /// Keep the blocks as typed parts, preserving per-block
    /// cache_control.
    Parts,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub thinking: ThinkingMapping,
    pub system: SystemMapping,
    /// Upstream model name, when it differs from the requested one.
    pub upstream_model: Option<String>,
}

const THINKING_SUFFIX: &str = "-thinking";

pub fn transform_request(
    request: &CreateMessageRequestBody,
    options: &TransformOptions,
) -> CreateChatCompletionRequestBody {
    let mut body = CreateChatCompletionRequestBody {
        model: options
            .upstream_model
            .clone()
            .unwrap_or_else(|| request.model.clone()),
        messages: Vec::new(),
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stream: request.stream,
        ..CreateChatCompletionRequestBody::default()
    };

    if let Some(claude::ThinkingConfigParam::Enabled { budget_tokens }) = request.thinking {
        match options.thinking {
            ThinkingMapping::BudgetPassthrough => {
                body.reasoning = Some(openai::RequestReasoning {
                    max_tokens: Some(budget_tokens),
                });
            }
            ThinkingMapping::EffortTiers => {
                body.reasoning_effort =
                    Some(openai::ReasoningEffort::from_budget_tokens(budget_tokens));
                // reasoning_effort and max_tokens together make these
                // endpoints fail outright.
                body.max_tokens = None;
                if request.model.ends_with(THINKING_SUFFIX)
                    && !body.model.ends_with(THINKING_SUFFIX)
                {
                    body.model.push_str(THINKING_SUFFIX);
                }
            }
        }
    }

    body.stop = map_stop_sequences(request.stop_sequences.as_deref());
    body.tools = map_tools(request.tools.as_deref());
    if let Some(tool_choice) = &request.tool_choice {
        let (choice, parallel) = map_tool_choice(tool_choice);
        body.tool_choice = choice;
        body.parallel_tool_calls = parallel;
    }

    if let Some(system) = map_system(request.system.as_ref(), options.system) {
        body.messages.push(system);
    }

    for message in &request.messages {
        match message.role {
            claude::MessageRole::User => map_user_message(request, message, &mut body.messages),
            claude::MessageRole::Assistant => map_assistant_message(message, &mut body.messages),
        }
    }

    body
}

fn map_stop_sequences(sequences: Option<&[String]>) -> Option<openai::StopConfiguration> {
    match sequences {
        None | Some([]) => None,
        Some([single]) => Some(openai::StopConfiguration::Single(single.clone())),
        Some(many) => Some(openai::StopConfiguration::Many(many.to_vec())),
    }
}

fn map_tools(tools: Option<&[claude::ToolDefinition]>) -> Option<Vec<openai::ToolDefinition>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| openai::ToolDefinition::Function {
                function: openai::FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect(),
    )
}

fn map_tool_choice(
    choice: &claude::ToolChoice,
) -> (Option<openai::ToolChoiceOption>, Option<bool>) {
    let parallel = |disable: &Option<bool>| disable.map(|value| !value);
    match choice {
        claude::ToolChoice::Auto {
            disable_parallel_tool_use,
        } => (
            Some(openai::ToolChoiceOption::Mode(openai::ToolChoiceMode::Auto)),
            parallel(disable_parallel_tool_use),
        ),
        claude::ToolChoice::Any {
            disable_parallel_tool_use,
        } => (
            Some(openai::ToolChoiceOption::Mode(
                openai::ToolChoiceMode::Required,
            )),
            parallel(disable_parallel_tool_use),
        ),
        claude::ToolChoice::Tool {
            name,
            disable_parallel_tool_use,
        } => (
            Some(openai::ToolChoiceOption::Named(
                openai::NamedToolChoice::Function {
                    function: openai::NamedToolChoiceFunction { name: name.clone() },
                },
            )),
            parallel(disable_parallel_tool_use),
        ),
        claude::ToolChoice::None => (
            Some(openai::ToolChoiceOption::Mode(openai::ToolChoiceMode::None)),
            None,
        ),
    }
}

fn map_system(
    system: Option<&claude::SystemParam>,
    mapping: SystemMapping,
) -> Option<RequestMessage> {
    match system? {
        claude::SystemParam::Text(text) => {
            (!text.is_empty()).then(|| RequestMessage::system(text.clone()))
        }
        claude::SystemParam::Blocks(blocks) => {
            if blocks.is_empty() {
                return None;
            }
            match mapping {
                SystemMapping::Concatenate => {
                    let joined: String = blocks
                        .iter()
                        .filter_map(|block| match block {
                            claude::ContentBlockParam::Text { text, .. } => Some(text.as_str()),
                            _ => None,
                        })
                        .collect();
                    (!joined.is_empty()).then(|| RequestMessage::system(joined))
                }
                SystemMapping::Parts => {
                    let parts: Vec<openai::ContentPart> = blocks
                        .iter()
                        .filter_map(|block| match block {
                            claude::ContentBlockParam::Text {
                                text,
                                cache_control,
                            } => Some(openai::ContentPart::Text {
                                text: text.clone(),
                                cache_control: cache_control.clone(),
                            }),
                            _ => None,
                        })
                        .collect();
                    (!parts.is_empty()).then(|| RequestMessage::System {
                        content: openai::MessageContent::Parts(parts),
                    })
                }
            }
        }
    }
}

fn map_user_message(
    request: &CreateMessageRequestBody,
    message: &claude::MessageParam,
    out: &mut Vec<RequestMessage>,
) {
    let blocks = match &message.content {
        claude::MessageContent::Text(text) => {
            if !text.is_empty() {
                out.push(RequestMessage::user(text.clone()));
            }
            return;
        }
        claude::MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts: Vec<openai::ContentPart> = Vec::new();
    for block in blocks {
        match block {
            claude::ContentBlockParam::Text {
                text,
                cache_control,
            } => parts.push(openai::ContentPart::Text {
                text: text.clone(),
                cache_control: cache_control.clone(),
            }),
            claude::ContentBlockParam::Image { source } => parts.push(map_image_part(source)),
            claude::ContentBlockParam::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                // Tool results become standalone tool messages; flush the
                // parts gathered so far to keep ordering.
                flush_user_parts(&mut parts, out);
                out.push(map_tool_result(request, tool_use_id, content.as_ref()));
            }
            _ => {}
        }
    }
    flush_user_parts(&mut parts, out);
}

fn flush_user_parts(parts: &mut Vec<openai::ContentPart>, out: &mut Vec<RequestMessage>) {
    if parts.is_empty() {
        return;
    }
    let parts = std::mem::take(parts);
    let content = match parts.as_slice() {
        [openai::ContentPart::Text {
            text,
            cache_control: None,
        }] => openai::MessageContent::Text(text.clone()),
        _ => openai::MessageContent::Parts(parts),
    };
    out.push(RequestMessage::User { content });
}

fn map_image_part(source: &claude::ImageSource) -> openai::ContentPart {
    let url = match source {
        claude::ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
        claude::ImageSource::Url { url } => url.clone(),
    };
    openai::ContentPart::ImageUrl {
        image_url: openai::ImageUrl { url, detail: None },
    }
}

fn map_tool_result(
    request: &CreateMessageRequestBody,
    tool_use_id: &str,
    content: Option<&claude::ToolResultContent>,
) -> RequestMessage {
    let text = match content {
        Some(claude::ToolResultContent::Text(text)) => text.clone(),
        Some(claude::ToolResultContent::Blocks(blocks)) => {
            serde_json::to_string(blocks).unwrap_or_default()
        }
        None => String::new(),
    };
    RequestMessage::Tool {
        content: openai::MessageContent::Text(text),
        tool_call_id: tool_use_id.to_string(),
        name: request
            .tool_name_for_call_id(tool_use_id)
            .map(|name| name.to_string()),
    }
}

fn map_assistant_message(message: &claude::MessageParam, out: &mut Vec<RequestMessage>) {
    let blocks = match &message.content {
        claude::MessageContent::Text(text) => {
            if !text.is_empty() {
                out.push(RequestMessage::Assistant {
                    content: Some(openai::MessageContent::Text(text.clone())),
                    reasoning_content: None,
                    thinking: None,
                    tool_calls: None,
                });
            }
            return;
        }
        claude::MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts: Vec<openai::ContentPart> = Vec::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();
    let mut reasoning_content: Option<String> = None;
    let mut thinking: Option<openai::ThinkingContent> = None;

    for block in blocks {
        match block {
            claude::ContentBlockParam::Text {
                text,
                cache_control,
            } => parts.push(openai::ContentPart::Text {
                text: text.clone(),
                cache_control: cache_control.clone(),
            }),
            claude::ContentBlockParam::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id: id.clone(),
                    r#type: openai::ToolCallType::Function,
                    function: openai::ToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            claude::ContentBlockParam::Thinking {
                thinking: text,
                signature,
            } => {
                reasoning_content = Some(text.clone());
                if let Some(signature) = signature {
                    thinking = Some(openai::ThinkingContent {
                        content: text.clone(),
                        signature: signature.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    // Providers tend to ignore array content on assistant turns that
    // carry tool_calls, so collapse all-text content to a string there.
    let content = if parts.is_empty() {
        None
    } else if !tool_calls.is_empty() || matches!(parts.as_slice(), [openai::ContentPart::Text { .. }])
    {
        let joined: String = parts
            .iter()
            .filter_map(|part| match part {
                openai::ContentPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!joined.is_empty()).then_some(openai::MessageContent::Text(joined))
    } else {
        Some(openai::MessageContent::Parts(parts))
    };

    if content.is_none()
        && tool_calls.is_empty()
        && reasoning_content.is_none()
        && thinking.is_none()
    {
        return;
    }

    out.push(RequestMessage::Assistant {
        content,
        reasoning_content,
        thinking,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_request(messages: Vec<claude::MessageParam>) -> CreateMessageRequestBody {
        CreateMessageRequestBody {
            model: "claude-sonnet-4".to_string(),
            messages,
            max_tokens: 1024,
            stop_sequences: None,
            stream: None,
            system: None,
            temperature: None,
            thinking: None,
            tool_choice: None,
            tools: None,
            top_k: None,
            top_p: None,
        }
    }

    #[test]
    fn maps_simple_text_conversation() {
        let mut request = make_request(vec![
            claude::MessageParam::user("hello"),
            claude::MessageParam::assistant("hi there"),
        ]);
        request.system = Some(claude::SystemParam::Text("be brief".to_string()));
        request.stop_sequences = Some(vec!["END".to_string()]);

        let body = transform_request(&request, &TransformOptions::default());
        assert_eq!(body.model, "claude-sonnet-4");
        assert_eq!(body.max_tokens, Some(1024));
        assert_eq!(
            body.stop,
            Some(openai::StopConfiguration::Single("END".to_string()))
        );
        assert_eq!(body.messages.len(), 3);
        assert_eq!(body.messages[0], RequestMessage::system("be brief"));
        assert_eq!(body.messages[1], RequestMessage::user("hello"));
    }

    #[test]
    fn thinking_budget_becomes_effort_and_clears_max_tokens() {
        let mut request = make_request(vec![claude::MessageParam::user("q")]);
        request.thinking = Some(claude::ThinkingConfigParam::Enabled {
            budget_tokens: 2048,
        });

        let body = transform_request(&request, &TransformOptions::default());
        assert_eq!(body.reasoning_effort, Some(openai::ReasoningEffort::Medium));
        assert_eq!(body.max_tokens, None);
        assert!(body.reasoning.is_none());
    }

    #[test]
    fn thinking_budget_passes_through_when_requested() {
        let mut request = make_request(vec![claude::MessageParam::user("q")]);
        request.thinking = Some(claude::ThinkingConfigParam::Enabled {
            budget_tokens: 2048,
        });

        let options = TransformOptions {
            thinking: ThinkingMapping::BudgetPassthrough,
            ..TransformOptions::default()
        };
        let body = transform_request(&request, &options);
        assert_eq!(
            body.reasoning,
            Some(openai::RequestReasoning {
                max_tokens: Some(2048)
            })
        );
        assert_eq!(body.max_tokens, Some(1024));
        assert!(body.reasoning_effort.is_none());
    }

    #[test]
    fn thinking_suffix_propagates_to_renamed_model() {
        let mut request = make_request(vec![claude::MessageParam::user("q")]);
        request.model = "claude-sonnet-4-thinking".to_string();
        request.thinking = Some(claude::ThinkingConfigParam::Enabled { budget_tokens: 512 });

        let options = TransformOptions {
            upstream_model: Some("vendor-model".to_string()),
            ..TransformOptions::default()
        };
        let body = transform_request(&request, &options);
        assert_eq!(body.model, "vendor-model-thinking");
    }

    #[test]
    fn tool_result_becomes_tool_message_with_resolved_name() {
        let request = make_request(vec![
            claude::MessageParam {
                role: claude::MessageRole::Assistant,
                content: claude::MessageContent::Blocks(vec![
                    claude::ContentBlockParam::ToolUse {
                        id: "toolu_1".to_string(),
                        name: "get_weather".to_string(),
                        input: json!({"city": "Berlin"}),
                    },
                ]),
            },
            claude::MessageParam {
                role: claude::MessageRole::User,
                content: claude::MessageContent::Blocks(vec![
                    claude::ContentBlockParam::ToolResult {
                        tool_use_id: "toolu_1".to_string(),
                        content: Some(claude::ToolResultContent::Text("12C".to_string())),
                        is_error: None,
                    },
                    claude::ContentBlockParam::text("thanks"),
                ]),
            },
        ]);

        let body = transform_request(&request, &TransformOptions::default());
        assert_eq!(body.messages.len(), 3);
        match &body.messages[0] {
            RequestMessage::Assistant { tool_calls, .. } => {
                let calls = tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].id, "toolu_1");
                assert_eq!(calls[0].function.name, "get_weather");
                assert_eq!(calls[0].function.arguments, "{\"city\":\"Berlin\"}");
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
        match &body.messages[1] {
            RequestMessage::Tool {
                content,
                tool_call_id,
                name,
            } => {
                assert_eq!(content, &openai::MessageContent::Text("12C".to_string()));
                assert_eq!(tool_call_id, "toolu_1");
                assert_eq!(name.as_deref(), Some("get_weather"));
            }
            other => panic!("expected tool message, got {other:?}"),
        }
        assert_eq!(body.messages[2], RequestMessage::user("thanks"));
    }

    #[test]
    fn image_block_becomes_data_uri() {
        let request = make_request(vec![claude::MessageParam {
            role: claude::MessageRole::User,
            content: claude::MessageContent::Blocks(vec![
                claude::ContentBlockParam::text("what is this"),
                claude::ContentBlockParam::Image {
                    source: claude::ImageSource::Base64 {
                        media_type: "image/png".to_string(),
                        data: "AAAA".to_string(),
                    },
                },
            ]),
        }]);

        let body = transform_request(&request, &TransformOptions::default());
        match &body.messages[0] {
            RequestMessage::User {
                content: openai::MessageContent::Parts(parts),
            } => match &parts[1] {
                openai::ContentPart::ImageUrl { image_url } => {
                    assert_eq!(image_url.url, "data:image/png;base64,AAAA");
                }
                other => panic!("expected image part, got {other:?}"),
            },
            other => panic!("expected parts content, got {other:?}"),
        }
    }

    #[test]
    fn thinking_block_maps_to_reasoning_with_signature() {
        let request = make_request(vec![claude::MessageParam {
            role: claude::MessageRole::Assistant,
            content: claude::MessageContent::Blocks(vec![
                claude::ContentBlockParam::Thinking {
                    thinking: "chain".to_string(),
                    signature: Some("sig".to_string()),
                },
                claude::ContentBlockParam::text("answer"),
            ]),
        }]);

        let body = transform_request(&request, &TransformOptions::default());
        match &body.messages[0] {
            RequestMessage::Assistant {
                reasoning_content,
                thinking,
                content,
                ..
            } => {
                assert_eq!(reasoning_content.as_deref(), Some("chain"));
                assert_eq!(
                    thinking,
                    &Some(openai::ThinkingContent {
                        content: "chain".to_string(),
                        signature: "sig".to_string(),
                    })
                );
                assert_eq!(
                    content,
                    &Some(openai::MessageContent::Text("answer".to_string()))
                );
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn tool_choice_any_maps_to_required_and_parallel_flag_inverts() {
        let mut request = make_request(vec![claude::MessageParam::user("q")]);
        request.tool_choice = Some(claude::ToolChoice::Any {
            disable_parallel_tool_use: Some(true),
        });

        let body = transform_request(&request, &TransformOptions::default());
        assert_eq!(
            body.tool_choice,
            Some(openai::ToolChoiceOption::Mode(
                openai::ToolChoiceMode::Required
            ))
        );
        assert_eq!(body.parallel_tool_calls, Some(false));
    }
}
