use lmrelay_protocol::claude::create_message::response::{ContentBlock, CreateMessageResponse};
use lmrelay_protocol::claude::create_message::types::{
    MessageRole, MessageType, StopReason, StopReasonKnown, Usage,
};
use lmrelay_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use lmrelay_protocol::openai::create_chat_completions::types::{
    CompletionUsage, FinishReason, FinishReasonKnown,
};

use super::request::parse_tool_arguments;

pub fn transform_response(response: &CreateChatCompletionResponse) -> CreateMessageResponse {
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut stop_reason: Option<StopReason> = None;

    for choice in &response.choices {
        if let Some(reason) = &choice.finish_reason {
            stop_reason = Some(map_stop_reason(reason));
        }

        // Thinking precedes text, matching the order Claude models emit.
        let reasoning = choice
            .message
            .reasoning_content
            .as_deref()
            .filter(|text| !text.is_empty())
            .or_else(|| {
                choice
                    .message
                    .thinking
                    .as_ref()
                    .map(|thinking| thinking.content.as_str())
                    .filter(|text| !text.is_empty())
            });
        if let Some(thinking) = reasoning {
            content.push(ContentBlock::Thinking {
                thinking: thinking.to_string(),
                signature: choice
                    .message
                    .thinking
                    .as_ref()
                    .map(|thinking| thinking.signature.clone())
                    .filter(|signature| !signature.is_empty()),
            });
        }

        let text = choice.message.joined_text();
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }

        for call in choice.message.tool_calls.as_deref().unwrap_or_default() {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: parse_tool_arguments(&call.function.arguments),
            });
        }
    }

    CreateMessageResponse {
        id: response.id.clone(),
        r#type: MessageType::Message,
        role: MessageRole::Assistant,
        model: response.model.clone(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: map_usage(response.usage.as_ref()),
    }
}

pub(crate) fn map_stop_reason(reason: &FinishReason) -> StopReason {
    match reason {
        FinishReason::Known(known) => match known {
            FinishReasonKnown::Stop => StopReason::Known(StopReasonKnown::EndTurn),
            FinishReasonKnown::Length => StopReason::Known(StopReasonKnown::MaxTokens),
            FinishReasonKnown::ToolCalls | FinishReasonKnown::FunctionCall => {
                StopReason::Known(StopReasonKnown::ToolUse)
            }
            FinishReasonKnown::ContentFilter => StopReason::Other("content_filter".to_string()),
        },
        FinishReason::Other(other) => match other.as_str() {
            "stop_sequence" => StopReason::Known(StopReasonKnown::StopSequence),
            "max_tokens" => StopReason::Known(StopReasonKnown::MaxTokens),
            _ => StopReason::Other(other.clone()),
        },
    }
}

pub(crate) fn map_usage(usage: Option<&CompletionUsage>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let details = usage.prompt_tokens_details;
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_creation_input_tokens: details.and_then(|details| details.cached_creation_tokens),
        cache_read_input_tokens: details.and_then(|details| details.cached_tokens),
    }
}
