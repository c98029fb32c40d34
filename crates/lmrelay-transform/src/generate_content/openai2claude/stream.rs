use std::collections::BTreeMap;

use serde_json::json;

use lmrelay_protocol::claude::create_message::response::ContentBlock;
use lmrelay_protocol::claude::create_message::stream::{
    ContentBlockDelta, MessageDeltaBody, StreamEvent, StreamMessage, StreamUsage,
};
use lmrelay_protocol::claude::create_message::types::{MessageRole, MessageType, StopReason};
use lmrelay_protocol::openai::create_chat_completions::stream::{
    CreateChatCompletionStreamResponse, ToolCallChunk,
};
use lmrelay_protocol::openai::create_chat_completions::types::CompletionUsage;

use super::response::map_stop_reason;

/// The one block allowed to be open at a time, with its Claude-side
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    None,
    Text { index: u32 },
    Thinking { index: u32 },
    Tool { slot: i64, index: u32 },
}

/// Replays an OpenAI chat-completion chunk stream as Claude message
/// events. Feed chunks in arrival order, then call [`finish`] once the
/// upstream signals end of stream.
///
/// Indices are allocated strictly increasing, and the first block reuses
/// index 0 rather than incrementing past it.
///
/// [`finish`]: ClaudeStreamState::finish
#[derive(Debug)]
pub struct ClaudeStreamState {
    id: String,
    model: String,
    message_started: bool,
    finish_emitted: bool,
    block: BlockState,
    opened_any: bool,
    current_index: u32,
    tool_slots: BTreeMap<i64, u32>,
    pending_signature: Option<String>,
    pending_finish: Option<StopReason>,
    last_usage: Option<CompletionUsage>,
    estimated_input_tokens: u32,
}

impl ClaudeStreamState {
    pub fn new() -> Self {
        Self {
            id: "unknown".to_string(),
            model: "unknown".to_string(),
            message_started: false,
            finish_emitted: false,
            block: BlockState::None,
            opened_any: false,
            current_index: 0,
            tool_slots: BTreeMap::new(),
            pending_signature: None,
            pending_finish: None,
            last_usage: None,
            estimated_input_tokens: 0,
        }
    }

    /// Seeds the input-token figure reported in `message_start`, before
    /// the upstream delivers real usage.
    pub fn with_estimated_input_tokens(mut self, tokens: u32) -> Self {
        self.estimated_input_tokens = tokens;
        self
    }

    pub fn transform_chunk(
        &mut self,
        chunk: &CreateChatCompletionStreamResponse,
    ) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finish_emitted {
            return events;
        }

        if !self.message_started {
            self.message_started = true;
            if !chunk.id.is_empty() {
                self.id = chunk.id.clone();
            }
            if !chunk.model.is_empty() {
                self.model = chunk.model.clone();
            }
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.id.clone(),
                    r#type: MessageType::Message,
                    role: MessageRole::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: StreamUsage {
                        input_tokens: Some(self.estimated_input_tokens),
                        ..StreamUsage::default()
                    },
                },
            });
        }

        if let Some(usage) = chunk.usage {
            self.last_usage = Some(usage);
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        // The signature may ride on any chunk, including the one that
        // carries finish_reason; it is buffered until the thinking block
        // closes.
        if let Some(thinking) = &choice.delta.thinking
            && let Some(signature) = &thinking.signature
            && !signature.is_empty()
        {
            self.pending_signature = Some(signature.clone());
        }

        let reasoning = choice
            .delta
            .reasoning_content
            .as_deref()
            .or_else(|| {
                choice
                    .delta
                    .thinking
                    .as_ref()
                    .and_then(|thinking| thinking.content.as_deref())
            });
        if let Some(text) = reasoning {
            self.emit_thinking(text, &mut events);
        }

        if let Some(text) = choice.delta.content.as_deref() {
            self.emit_text(text, &mut events);
        }

        if let Some(calls) = &choice.delta.tool_calls {
            for call in calls {
                self.emit_tool(call, &mut events);
            }
        }

        if let Some(reason) = &choice.finish_reason {
            if self.pending_finish.is_none() {
                self.pending_finish = Some(map_stop_reason(reason));
            }
            self.close_current_block(&mut events);
        }

        events
    }

    /// Emits the terminal sequence: closes the open block (flushing any
    /// buffered signature), then `message_delta` with cumulative usage
    /// and the recorded stop reason, then `message_stop`. Idempotent.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finish_emitted || !self.message_started {
            return events;
        }
        self.close_current_block(&mut events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.pending_finish.take().unwrap_or(StopReason::end_turn())),
                stop_sequence: None,
            },
            usage: self.usage_snapshot(),
        });
        events.push(StreamEvent::MessageStop);
        self.finish_emitted = true;
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finish_emitted
    }

    fn usage_snapshot(&self) -> StreamUsage {
        let usage = self.last_usage.unwrap_or_default();
        let details = usage.prompt_tokens_details;
        StreamUsage {
            input_tokens: Some(usage.prompt_tokens),
            output_tokens: Some(usage.completion_tokens),
            cache_creation_input_tokens: details
                .and_then(|details| details.cached_creation_tokens),
            cache_read_input_tokens: details.and_then(|details| details.cached_tokens),
        }
    }

    fn allocate_index(&mut self) -> u32 {
        if self.opened_any {
            self.current_index += 1;
        } else {
            self.opened_any = true;
        }
        self.current_index
    }

    fn close_current_block(&mut self, events: &mut Vec<StreamEvent>) {
        match std::mem::replace(&mut self.block, BlockState::None) {
            BlockState::None => {}
            BlockState::Thinking { index } => {
                if let Some(signature) = self.pending_signature.take() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentBlockDelta::SignatureDelta { signature },
                    });
                }
                events.push(StreamEvent::ContentBlockStop { index });
            }
            BlockState::Text { index } | BlockState::Tool { index, .. } => {
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }
    }

    fn emit_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match self.block {
            BlockState::Text { index } => index,
            _ => {
                self.close_current_block(events);
                let index = self.allocate_index();
                self.block = BlockState::Text { index };
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn emit_thinking(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match self.block {
            BlockState::Thinking { index } => index,
            _ => {
                self.close_current_block(events);
                let index = self.allocate_index();
                self.block = BlockState::Thinking { index };
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::ThinkingDelta {
                thinking: text.to_string(),
            },
        });
    }

    fn emit_tool(&mut self, call: &ToolCallChunk, events: &mut Vec<StreamEvent>) {
        let slot = call.index;
        let index = match self.tool_slots.get(&slot) {
            // A late fragment keeps the slot's original index. Its block
            // may already be closed; it must not be reopened or stopped a
            // second time, so the current block is left alone.
            Some(&index) => index,
            None => {
                self.close_current_block(events);
                let index = self.allocate_index();
                self.tool_slots.insert(slot, index);
                self.block = BlockState::Tool { slot, index };
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{slot}"));
                let name = call
                    .function
                    .as_ref()
                    .and_then(|function| function.name.clone())
                    .unwrap_or_else(|| format!("tool_{slot}"));
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id,
                        name,
                        input: json!({}),
                    },
                });
                index
            }
        };

        if let Some(function) = &call.function
            && let Some(arguments) = &function.arguments
            && !arguments.is_empty()
        {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta {
                    partial_json: arguments.clone(),
                },
            });
        }
    }
}

impl Default for ClaudeStreamState {
    fn default() -> Self {
        Self::new()
    }
}
