use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Finish reasons the relay knows how to translate. Values outside this
/// set are carried through verbatim rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReasonKnown {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinishReason {
    Known(FinishReasonKnown),
    Other(String),
}

impl FinishReason {
    pub fn stop() -> Self {
        Self::Known(FinishReasonKnown::Stop)
    }

    pub fn length() -> Self {
        Self::Known(FinishReasonKnown::Length)
    }

    pub fn tool_calls() -> Self {
        Self::Known(FinishReasonKnown::ToolCalls)
    }
}

/// Discrete effort tiers understood by reasoning-capable OpenAI-style
/// endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Tiers a thinking token budget the way reasoning-effort endpoints
    /// expect: zero or negative disables reasoning, small budgets map to
    /// low, mid-size to medium, anything above 8192 to high.
    pub fn from_budget_tokens(budget_tokens: i64) -> Self {
        if budget_tokens <= 0 {
            Self::None
        } else if budget_tokens <= 1024 {
            Self::Low
        } else if budget_tokens <= 8192 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// Raw reasoning object for downstreams that accept a token budget
/// instead of an effort tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

/// Extended-thinking text carried alongside a message, with the opaque
/// signature needed to replay it on a later turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingContent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<JsonValue>,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }
}

/// Message content is either a bare string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Joins every text part into one string; image parts contribute
    /// nothing.
    pub fn joined_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text, .. } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallType {
    Function,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    #[serde(default)]
    pub name: String,
    /// Arguments as the provider produced them: a JSON document encoded
    /// as a string.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub r#type: ToolCallType,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function { function: FunctionDefinition },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedToolChoiceFunction {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NamedToolChoice {
    Function { function: NamedToolChoiceFunction },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoiceOption {
    Mode(ToolChoiceMode),
    Named(NamedToolChoice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopConfiguration {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_creation_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_finish_reason_round_trips() {
        let parsed: FinishReason = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(parsed, FinishReason::Other("blocked".to_string()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"blocked\"");

        let known: FinishReason = serde_json::from_str("\"tool_calls\"").unwrap();
        assert_eq!(known, FinishReason::tool_calls());
    }

    #[test]
    fn reasoning_effort_tiers() {
        assert_eq!(ReasoningEffort::from_budget_tokens(0), ReasoningEffort::None);
        assert_eq!(ReasoningEffort::from_budget_tokens(-5), ReasoningEffort::None);
        assert_eq!(ReasoningEffort::from_budget_tokens(1), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_budget_tokens(1024), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_budget_tokens(1025), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_budget_tokens(8192), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_budget_tokens(8193), ReasoningEffort::High);
    }

    #[test]
    fn message_content_joined_text_skips_images() {
        let content = MessageContent::Parts(vec![
            ContentPart::text("a"),
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/x.png".to_string(),
                    detail: None,
                },
            },
            ContentPart::text("b"),
        ]);
        assert_eq!(content.joined_text(), "ab");
    }
}
