use serde::{Deserialize, Serialize};

use super::types::{
    ContentBlockParam, MessageContent, MessageParam, SystemParam, ThinkingConfigParam, ToolChoice,
    ToolDefinition,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequestBody {
    pub model: String,
    pub messages: Vec<MessageParam>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfigParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl CreateMessageRequestBody {
    /// Resolves the tool name behind a `tool_use` id by scanning earlier
    /// assistant turns. `tool_result` blocks do not carry the name, but
    /// the OpenAI tool-message shape wants it.
    pub fn tool_name_for_call_id(&self, tool_use_id: &str) -> Option<&str> {
        for message in &self.messages {
            let MessageContent::Blocks(blocks) = &message.content else {
                continue;
            };
            for block in blocks {
                if let ContentBlockParam::ToolUse { id, name, .. } = block
                    && id == tool_use_id
                {
                    return Some(name);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub body: CreateMessageRequestBody,
}
