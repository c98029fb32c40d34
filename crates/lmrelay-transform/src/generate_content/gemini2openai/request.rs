use lmrelay_protocol::gemini::generate_content::request::GenerateContentRequest;
use lmrelay_protocol::gemini::generate_content::types as gemini;
use lmrelay_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequestBody, RequestMessage,
};
use lmrelay_protocol::openai::create_chat_completions::types as openai;

/// Gemini allows five stop sequences, the chat-completions surface four.
const MAX_STOP_SEQUENCES: usize = 4;

pub fn transform_request(
    request: &GenerateContentRequest,
    stream: bool,
) -> CreateChatCompletionRequestBody {
    let mut body = CreateChatCompletionRequestBody {
        model: request.path.model.clone(),
        stream: stream.then_some(true),
        ..CreateChatCompletionRequestBody::default()
    };

    let mut messages: Vec<RequestMessage> = Vec::new();
    let mut synthetic_calls: u32 = 0;

    for content in &request.body.contents {
        map_content(content, &mut messages, &mut synthetic_calls);
    }

    if let Some(instruction) = &request.body.system_instruction {
        let text = joined_part_text(&instruction.parts);
        if !text.is_empty() {
            messages.insert(0, RequestMessage::system(text));
        }
    }
    body.messages = messages;

    if let Some(config) = &request.body.generation_config {
        body.temperature = config.temperature;
        body.top_p = config.top_p;
        body.top_k = config.top_k;
        body.max_tokens = config.max_output_tokens;
        body.n = config.candidate_count;
        if let Some(sequences) = &config.stop_sequences
            && !sequences.is_empty()
        {
            let mut sequences = sequences.clone();
            sequences.truncate(MAX_STOP_SEQUENCES);
            body.stop = Some(openai::StopConfiguration::Many(sequences));
        }
    }

    body.tools = map_tools(request.body.tools.as_deref());

    body
}

fn map_content(
    content: &gemini::Content,
    messages: &mut Vec<RequestMessage>,
    synthetic_calls: &mut u32,
) {
    let is_assistant = content.role == Some(gemini::ContentRole::Model);

    let mut parts: Vec<openai::ContentPart> = Vec::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();

    for part in &content.parts {
        if let Some(text) = &part.text {
            if !text.is_empty() {
                parts.push(openai::ContentPart::text(text.clone()));
            }
        } else if let Some(blob) = &part.inline_data {
            parts.push(openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl {
                    url: format!("data:{};base64,{}", blob.mime_type, blob.data),
                    detail: Some("auto".to_string()),
                },
            });
        } else if let Some(file) = &part.file_data {
            parts.push(openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl {
                    url: file.file_uri.clone(),
                    detail: Some("auto".to_string()),
                },
            });
        } else if let Some(call) = &part.function_call {
            *synthetic_calls += 1;
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{synthetic_calls}"));
            tool_calls.push(openai::ToolCall {
                id,
                r#type: openai::ToolCallType::Function,
                function: openai::ToolCallFunction {
                    name: call.name.clone(),
                    arguments: call
                        .args
                        .as_ref()
                        .and_then(|args| serde_json::to_string(args).ok())
                        .unwrap_or_else(|| "{}".to_string()),
                },
            });
        } else if let Some(response) = &part.function_response {
            let id = response
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{synthetic_calls}"));
            messages.push(RequestMessage::Tool {
                content: openai::MessageContent::Text(
                    serde_json::to_string(&response.response).unwrap_or_default(),
                ),
                tool_call_id: id,
                name: Some(response.name.clone()),
            });
        }
    }

    if !tool_calls.is_empty() {
        messages.push(RequestMessage::Assistant {
            content: None,
            reasoning_content: None,
            thinking: None,
            tool_calls: Some(tool_calls),
        });
        return;
    }

    if parts.is_empty() {
        return;
    }
    let content = match parts.as_slice() {
        [openai::ContentPart::Text { text, .. }] => openai::MessageContent::Text(text.clone()),
        _ => openai::MessageContent::Parts(parts),
    };
    if is_assistant {
        messages.push(RequestMessage::Assistant {
            content: Some(content),
            reasoning_content: None,
            thinking: None,
            tool_calls: None,
        });
    } else {
        messages.push(RequestMessage::User { content });
    }
}

fn joined_part_text(parts: &[gemini::Part]) -> String {
    parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn map_tools(tools: Option<&[gemini::Tool]>) -> Option<Vec<openai::ToolDefinition>> {
    let tools = tools?;
    let mapped: Vec<openai::ToolDefinition> = tools
        .iter()
        .flat_map(|tool| tool.function_declarations.as_deref().unwrap_or_default())
        .map(|declaration| openai::ToolDefinition::Function {
            function: openai::FunctionDefinition {
                name: declaration.name.clone(),
                description: declaration.description.clone(),
                parameters: declaration.parameters.clone(),
            },
        })
        .collect();
    (!mapped.is_empty()).then_some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmrelay_protocol::gemini::generate_content::request::{
        GenerateContentPath, GenerateContentRequestBody,
    };
    use serde_json::json;

    fn make_request(contents: Vec<gemini::Content>) -> GenerateContentRequest {
        GenerateContentRequest {
            path: GenerateContentPath {
                model: "gemini-2.0-flash".to_string(),
            },
            body: GenerateContentRequestBody {
                contents,
                ..GenerateContentRequestBody::default()
            },
        }
    }

    #[test]
    fn roles_map_and_system_instruction_leads() {
        let mut request = make_request(vec![
            gemini::Content {
                parts: vec![gemini::Part::text("hi")],
                role: Some(gemini::ContentRole::User),
            },
            gemini::Content {
                parts: vec![gemini::Part::text("hello")],
                role: Some(gemini::ContentRole::Model),
            },
        ]);
        request.body.system_instruction = Some(gemini::Content {
            parts: vec![gemini::Part::text("a"), gemini::Part::text("b")],
            role: None,
        });

        let body = transform_request(&request, true);
        assert_eq!(body.model, "gemini-2.0-flash");
        assert_eq!(body.stream, Some(true));
        assert_eq!(body.messages[0], RequestMessage::system("a\nb"));
        assert_eq!(body.messages[1], RequestMessage::user("hi"));
        assert!(matches!(body.messages[2], RequestMessage::Assistant { .. }));
    }

    #[test]
    fn function_call_gets_synthetic_id_and_response_matches() {
        let request = make_request(vec![
            gemini::Content {
                parts: vec![gemini::Part {
                    function_call: Some(gemini::FunctionCall {
                        id: None,
                        name: "get_time".to_string(),
                        args: Some(json!({"tz": "UTC"})),
                    }),
                    ..gemini::Part::default()
                }],
                role: Some(gemini::ContentRole::Model),
            },
            gemini::Content {
                parts: vec![gemini::Part {
                    function_response: Some(gemini::FunctionResponse {
                        id: None,
                        name: "get_time".to_string(),
                        response: json!({"time": "12:00"}),
                    }),
                    ..gemini::Part::default()
                }],
                role: Some(gemini::ContentRole::User),
            },
        ]);

        let body = transform_request(&request, false);
        match &body.messages[0] {
            RequestMessage::Assistant { tool_calls, .. } => {
                let calls = tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].function.name, "get_time");
                assert_eq!(calls[0].function.arguments, "{\"tz\":\"UTC\"}");
            }
            other => panic!("expected assistant, got {other:?}"),
        }
        match &body.messages[1] {
            RequestMessage::Tool {
                tool_call_id, name, ..
            } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(name.as_deref(), Some("get_time"));
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[test]
    fn generation_config_carries_over_and_stop_truncates() {
        let mut request = make_request(vec![gemini::Content {
            parts: vec![gemini::Part::text("q")],
            role: Some(gemini::ContentRole::User),
        }]);
        request.body.generation_config = Some(gemini::GenerationConfig {
            stop_sequences: Some(
                ["a", "b", "c", "d", "e"].map(str::to_string).to_vec(),
            ),
            candidate_count: Some(2),
            max_output_tokens: Some(256),
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            thinking_config: None,
        });

        let body = transform_request(&request, false);
        assert_eq!(body.temperature, Some(0.7));
        assert_eq!(body.top_k, Some(40));
        assert_eq!(body.max_tokens, Some(256));
        assert_eq!(body.n, Some(2));
        assert_eq!(
            body.stop,
            Some(openai::StopConfiguration::Many(
                ["a", "b", "c", "d"].map(str::to_string).to_vec()
            ))
        );
    }

    #[test]
    fn inline_data_becomes_data_uri_part() {
        let request = make_request(vec![gemini::Content {
            parts: vec![
                gemini::Part::text("see"),
                gemini::Part {
                    inline_data: Some(gemini::Blob {
                        mime_type: "image/webp".to_string(),
                        data: "Zm9v".to_string(),
                    }),
                    ..gemini::Part::default()
                },
            ],
            role: Some(gemini::ContentRole::User),
        }]);

        let body = transform_request(&request, false);
        match &body.messages[0] {
            RequestMessage::User {
                content: openai::MessageContent::Parts(parts),
            } => match &parts[1] {
                openai::ContentPart::ImageUrl { image_url } => {
                    assert_eq!(image_url.url, "data:image/webp;base64,Zm9v");
                }
                other => panic!("expected image part, got {other:?}"),
            },
            other => panic!("expected parts, got {other:?}"),
        }
    }
}
