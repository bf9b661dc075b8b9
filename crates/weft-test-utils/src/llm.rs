use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::*;

enum Step {
    Reply(Vec<StreamDelta>),
    Fail(WeftError),
    Delay(Duration),
}

/// A request as seen by [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
    pub format: ResponseFormat,
}

impl RecordedRequest {
    /// Concatenated text of every message, for prompt assertions.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let mut s = m.text();
                for block in &m.content {
                    if let ContentBlock::ToolResult { content, .. } = block {
                        s.push_str(content);
                    }
                }
                s
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Step>,
    requests: Vec<RecordedRequest>,
}

/// LLM client that replays scripted turns and records every request.
///
/// Clones share the same script and request log.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Step) -> Self {
        self.inner.lock().unwrap().script.push_back(step);
        self
    }

    /// Next call answers with plain text.
    pub fn then_text(self, text: &str) -> Self {
        self.push(Step::Reply(vec![
            StreamDelta::TextDelta(text.to_string()),
            StreamDelta::Stop(StopReason::EndTurn),
            StreamDelta::Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        ]))
    }

    /// Next call requests one tool call.
    pub fn then_tool_call(self, name: &str, input: serde_json::Value) -> Self {
        let n = self.inner.lock().unwrap().script.len();
        self.push(Step::Reply(vec![
            StreamDelta::ToolUseStart {
                index: 0,
                id: format!("call_{}", n),
                name: name.to_string(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: input.to_string(),
            },
            StreamDelta::Stop(StopReason::ToolUse),
            StreamDelta::Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        ]))
    }

    /// Next call answers with raw deltas.
    pub fn then_deltas(self, deltas: Vec<StreamDelta>) -> Self {
        self.push(Step::Reply(deltas))
    }

    /// Next call fails before streaming.
    pub fn then_error(self, err: WeftError) -> Self {
        self.push(Step::Fail(err))
    }

    /// Next call sleeps before consuming the following step.
    pub fn then_delay(self, delay: Duration) -> Self {
        self.push(Step::Delay(delay))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        format: ResponseFormat,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let request = RecordedRequest {
            model_id: config.model_id.clone(),
            messages,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
            format,
        };

        Box::pin(async move {
            self.inner.lock().unwrap().requests.push(request);
            loop {
                let step = self.inner.lock().unwrap().script.pop_front();
                match step {
                    Some(Step::Delay(d)) => tokio::time::sleep(d).await,
                    Some(Step::Reply(deltas)) => {
                        let stream = futures::stream::iter(deltas.into_iter().map(Ok));
                        return Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>);
                    }
                    Some(Step::Fail(e)) => return Err(e),
                    None => return Err(WeftError::LlmRequest("scripted llm exhausted".into())),
                }
            }
        })
    }
}
