use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use uuid::Uuid;

use lmrelay_protocol::claude::create_message::response::ContentBlock;
use lmrelay_protocol::claude::create_message::stream::{
    ContentBlockDelta, MessageDeltaBody, StreamEvent, StreamMessage, StreamUsage,
};
use lmrelay_protocol::claude::create_message::types::{MessageRole, MessageType, StopReason};
use lmrelay_protocol::gemini::generate_content::response::GenerateContentResponse;
use lmrelay_protocol::gemini::generate_content::types as gemini;
use lmrelay_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
use lmrelay_protocol::openai::create_chat_completions::types::CompletionUsage;
use lmrelay_protocol::sse::{frame_event, SseEvent, SseParser};
use lmrelay_provider_core::{CancelSignal, EventSink, RelayError};
use lmrelay_transform::generate_content::openai2claude::stream::ClaudeStreamState;
use lmrelay_transform::generate_content::openai2gemini;

use crate::sensitive::{DetectionWindow, SENSITIVE_MARKER};

/// Which client-side protocol the relayed stream is rendered as. Both
/// carry a prompt-size estimate for the events that must report input
/// tokens before the upstream does.
#[derive(Debug, Clone, Copy)]
pub enum StreamTarget {
    Claude { estimated_prompt_tokens: u32 },
    Gemini { estimated_prompt_tokens: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSummary {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<CompletionUsage> for UsageSummary {
    fn from(usage: CompletionUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(UsageSummary),
    /// The upstream flagged the request; nothing was written to the
    /// sink, so the caller may retry on another key.
    Sensitive,
}

enum Transcoder {
    Claude(Box<ClaudeStreamState>),
    Gemini { estimated_prompt_tokens: u32 },
}

/// Replays an upstream chat-completion SSE body as the target protocol,
/// writing each rendered frame to `sink` in order. Returns the
/// cumulative usage once the upstream signals `[DONE]` or closes the
/// connection.
pub async fn relay_stream<S, E>(
    mut body: S,
    target: StreamTarget,
    sink: &mut dyn EventSink,
    cancel: &CancelSignal,
) -> Result<StreamOutcome, RelayError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut parser = SseParser::new();
    let mut window = DetectionWindow::new();
    let mut transcoder = match target {
        StreamTarget::Claude {
            estimated_prompt_tokens,
        } => Transcoder::Claude(Box::new(
            ClaudeStreamState::new().with_estimated_input_tokens(estimated_prompt_tokens),
        )),
        StreamTarget::Gemini {
            estimated_prompt_tokens,
        } => Transcoder::Gemini {
            estimated_prompt_tokens,
        },
    };
    let mut last_usage: Option<CompletionUsage> = None;
    let mut done = false;

    'body: while let Some(item) = body.next().await {
        if cancel.is_canceled() {
            return Ok(StreamOutcome::Completed(summary(last_usage)));
        }
        let bytes = item.map_err(|err| RelayError::Network(err.to_string()))?;
        for event in parser.push_bytes(&bytes) {
            if event.is_done() {
                done = true;
                break 'body;
            }
            if process_event(&event, &mut transcoder, &mut window, &mut last_usage, sink).await? {
                return Ok(StreamOutcome::Sensitive);
            }
        }
    }

    if !done {
        for event in parser.finish() {
            if event.is_done() {
                break;
            }
            if process_event(&event, &mut transcoder, &mut window, &mut last_usage, sink).await? {
                return Ok(StreamOutcome::Sensitive);
            }
        }
    }

    window.release(sink).await?;
    if let Transcoder::Claude(state) = &mut transcoder {
        for event in state.finish() {
            send_claude_event(&event, sink).await?;
        }
    }
    Ok(StreamOutcome::Completed(summary(last_usage)))
}

/// Returns true when the sensitive marker was observed.
async fn process_event(
    event: &SseEvent,
    transcoder: &mut Transcoder,
    window: &mut DetectionWindow,
    last_usage: &mut Option<CompletionUsage>,
    sink: &mut dyn EventSink,
) -> Result<bool, RelayError> {
    // keep-alives and vendor noise parse as nothing
    let Ok(chunk) = serde_json::from_str::<CreateChatCompletionStreamResponse>(&event.data) else {
        return Ok(false);
    };
    if let Some(usage) = chunk.usage {
        *last_usage = Some(usage);
    }
    if window.observe(&chunk_text(&chunk)) {
        return Ok(true);
    }

    match transcoder {
        Transcoder::Claude(state) => {
            for event in state.transform_chunk(&chunk) {
                let frame = frame_event(Some(event.name()), &serde_json::to_string(&event)?);
                window.forward(frame, sink).await?;
            }
        }
        Transcoder::Gemini {
            estimated_prompt_tokens,
        } => {
            if let Some(response) =
                openai2gemini::stream::transform_chunk(&chunk, *estimated_prompt_tokens)
            {
                let frame = frame_event(None, &serde_json::to_string(&response)?);
                window.forward(frame, sink).await?;
            }
        }
    }
    Ok(false)
}

fn chunk_text(chunk: &CreateChatCompletionStreamResponse) -> String {
    let mut text = String::new();
    for choice in &chunk.choices {
        if let Some(content) = &choice.delta.content {
            text.push_str(content);
        }
        if let Some(reasoning) = &choice.delta.reasoning_content {
            text.push_str(reasoning);
        }
    }
    text
}

fn summary(usage: Option<CompletionUsage>) -> UsageSummary {
    usage.map(UsageSummary::from).unwrap_or_default()
}

async fn send_claude_event(
    event: &StreamEvent,
    sink: &mut dyn EventSink,
) -> Result<(), RelayError> {
    sink.send(frame_event(Some(event.name()), &serde_json::to_string(event)?))
        .await
}

/// Writes a complete, self-consistent Claude event sequence carrying the
/// refusal text, so a client that already holds the connection sees a
/// normal end of turn instead of a dropped stream.
pub async fn synthesize_refusal_stream(
    model: &str,
    sink: &mut dyn EventSink,
) -> Result<(), RelayError> {
    let events = [
        StreamEvent::MessageStart {
            message: StreamMessage {
                id: format!("msg_{}", Uuid::new_v4().simple()),
                r#type: MessageType::Message,
                role: MessageRole::Assistant,
                model: model.to_string(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: StreamUsage::default(),
            },
        },
        StreamEvent::ContentBlockStart {
            index: 0,
            content_block: ContentBlock::Text {
                text: String::new(),
            },
        },
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentBlockDelta::TextDelta {
                text: SENSITIVE_MARKER.to_string(),
            },
        },
        StreamEvent::ContentBlockStop { index: 0 },
        StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(StopReason::end_turn()),
                stop_sequence: None,
            },
            usage: StreamUsage::default(),
        },
        StreamEvent::MessageStop,
    ];
    for event in &events {
        send_claude_event(event, sink).await?;
    }
    Ok(())
}

/// Gemini analogue of [`synthesize_refusal_stream`]: one final chunk
/// finishing with `SAFETY`.
pub async fn synthesize_refusal_chunk(
    model: &str,
    sink: &mut dyn EventSink,
) -> Result<(), RelayError> {
    let response = GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                parts: vec![gemini::Part::text(SENSITIVE_MARKER)],
                role: Some(gemini::ContentRole::Model),
            }),
            finish_reason: Some(gemini::FinishReason::Safety),
            index: 0,
            safety_ratings: Vec::new(),
        }],
        usage_metadata: None,
        model_version: Some(model.to_string()),
        response_id: None,
    };
    sink.send(frame_event(None, &serde_json::to_string(&response)?))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use lmrelay_provider_core::BufferSink;
    use std::convert::Infallible;

    fn body_stream(
        frames: Vec<&str>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        stream::iter(
            frames
                .into_iter()
                .map(|frame| Ok(Bytes::from(frame.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    fn event_names(sink: &BufferSink) -> Vec<String> {
        let mut parser = SseParser::new();
        let mut names = Vec::new();
        for frame in &sink.frames {
            for event in parser.push_bytes(frame) {
                names.push(event.event.unwrap_or_default());
            }
        }
        names
    }

    #[tokio::test]
    async fn simple_text_stream_renders_seven_claude_events() {
        let body = body_stream(vec![
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hello\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        ]);
        let mut sink = BufferSink::new();
        let outcome = relay_stream(
            body,
            StreamTarget::Claude {
                estimated_prompt_tokens: 3,
            },
            &mut sink,
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(
            event_names(&sink),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let first = String::from_utf8_lossy(&sink.frames[0]).into_owned();
        assert!(first.contains("\"input_tokens\":3"));
        assert_eq!(
            outcome,
            StreamOutcome::Completed(UsageSummary {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            })
        );
    }

    #[tokio::test]
    async fn stream_without_done_still_terminates_cleanly() {
        let body = body_stream(vec![
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
        ]);
        let mut sink = BufferSink::new();
        relay_stream(
            body,
            StreamTarget::Claude {
                estimated_prompt_tokens: 1,
            },
            &mut sink,
            &CancelSignal::never(),
        )
        .await
        .unwrap();
        let names = event_names(&sink);
        assert_eq!(names.last().map(String::as_str), Some("message_stop"));
    }

    #[tokio::test]
    async fn flagged_stream_writes_nothing_and_reports_sensitive() {
        let payload = serde_json::json!({
            "id": "c1",
            "model": "m",
            "choices": [{ "index": 0, "delta": { "content": SENSITIVE_MARKER } }]
        });
        let frame = format!("data: {payload}\n\n");
        let body = body_stream(vec![&frame]);
        let mut sink = BufferSink::new();
        let outcome = relay_stream(
            body,
            StreamTarget::Claude {
                estimated_prompt_tokens: 1,
            },
            &mut sink,
            &CancelSignal::never(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, StreamOutcome::Sensitive);
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn gemini_target_skips_role_only_chunks() {
        let body = body_stream(vec![
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hey\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let mut sink = BufferSink::new();
        relay_stream(
            body,
            StreamTarget::Gemini {
                estimated_prompt_tokens: 8,
            },
            &mut sink,
            &CancelSignal::never(),
        )
        .await
        .unwrap();
        assert_eq!(sink.frames.len(), 1);
        let text = sink.joined();
        assert!(text.contains("\"finishReason\":\"STOP\""));
        assert!(text.contains("hey"));
    }

    #[tokio::test]
    async fn canceled_stream_stops_without_error() {
        let (handle, signal) = CancelSignal::new();
        handle.cancel();
        let body = body_stream(vec![
            "data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
        ]);
        let mut sink = BufferSink::new();
        let outcome = relay_stream(
            body,
            StreamTarget::Claude {
                estimated_prompt_tokens: 1,
            },
            &mut sink,
            &signal,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StreamOutcome::Completed(UsageSummary::default()));
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn refusal_sequence_parses_back_as_valid_events() {
        let mut sink = BufferSink::new();
        synthesize_refusal_stream("claude-x", &mut sink).await.unwrap();
        assert_eq!(
            event_names(&sink),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let mut parser = SseParser::new();
        for frame in &sink.frames {
            for event in parser.push_bytes(frame) {
                let parsed: StreamEvent = serde_json::from_str(&event.data).unwrap();
                assert_eq!(Some(parsed.name()), event.event.as_deref());
            }
        }
        assert!(sink.joined().contains(SENSITIVE_MARKER));
    }
}
