use futures::stream::{BoxStream, StreamExt};

use weft_core::error::Result;
use weft_core::types::*;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One fully-received assistant turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
}

impl Turn {
    /// The assistant message to append to the conversation.
    pub fn to_message(&self) -> ChatMessage {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        for call in &self.tool_calls {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        ChatMessage {
            role: Role::Assistant,
            content,
            timestamp: Some(chrono::Utc::now()),
        }
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// Drain a delta stream into a single turn.
pub async fn collect_turn(mut stream: BoxStream<'_, Result<StreamDelta>>) -> Result<Turn> {
    let mut turn = Turn::default();
    let mut calls: Vec<ToolCallAccumulator> = Vec::new();

    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::TextDelta(text) => turn.text.push_str(&text),
            StreamDelta::ToolUseStart { index, id, name } => {
                while calls.len() <= index {
                    calls.push(ToolCallAccumulator::default());
                }
                calls[index].id = id;
                calls[index].name = name;
            }
            StreamDelta::ToolInputDelta { index, delta } => {
                if let Some(tc) = calls.get_mut(index) {
                    tc.input_json.push_str(&delta);
                }
            }
            StreamDelta::Stop(reason) => turn.stop_reason = Some(reason),
            StreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => turn.usage.add(TokenUsage {
                input_tokens,
                output_tokens,
            }),
        }
    }

    turn.tool_calls = calls
        .into_iter()
        .filter(|tc| !tc.name.is_empty())
        .enumerate()
        .map(|(i, tc)| ToolCall {
            id: if tc.id.is_empty() { format!("call_{}", i) } else { tc.id },
            name: tc.name,
            input: if tc.input_json.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&tc.input_json).unwrap_or(serde_json::Value::Null)
            },
        })
        .collect();

    Ok(turn)
}
