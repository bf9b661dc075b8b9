use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weft_core::config::{CheckerConfig, ModelConfig};
use weft_core::traits::LlmClient;
use weft_core::types::{ChatMessage, ResponseFormat, TokenUsage};
use weft_core::workflow::Block;
use weft_llm::collect_turn;

use crate::schema::extract_json;

/// Longest JSON rendering of inputs or outputs included in a check prompt.
const MAX_SECTION_CHARS: usize = 4_000;

/// The checker's judgment of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

/// What a check produced. `verdict` is `None` when the checker could not be
/// reached; the block is then left as it was.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub verdict: Option<Verdict>,
    pub usage: TokenUsage,
}

/// One block to check.
pub struct CheckRequest<'a> {
    pub block: &'a Block,
    pub inputs: &'a Map<String, Value>,
    pub outputs: &'a Map<String, Value>,
    pub goal: Option<&'a str>,
    /// Overrides the configured checker model for this run.
    pub model_id: Option<&'a str>,
    pub cancel: &'a CancellationToken,
}

/// Lightweight post-block verification against a small model.
///
/// Best effort: provider errors, timeouts, and unparsable replies never fail
/// the block being checked.
pub struct BlockChecker {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
    timeout: Duration,
}

impl BlockChecker {
    pub fn new(llm: Arc<dyn LlmClient>, model: &ModelConfig, checker: &CheckerConfig) -> Self {
        Self {
            llm,
            config: model.with_model(&checker.default_model_id),
            timeout: Duration::from_secs(checker.timeout_secs),
        }
    }

    pub async fn check(&self, request: CheckRequest<'_>) -> CheckOutcome {
        let config = match request.model_id {
            Some(id) if !id.is_empty() => self.config.with_model(id),
            _ => self.config.clone(),
        };
        let messages = vec![ChatMessage::user(check_prompt(&request))];

        let call = async {
            let stream = self.llm.chat_stream(&config, messages, &[], ResponseFormat::Json).await?;
            collect_turn(stream).await
        };

        let turn = tokio::select! {
            _ = request.cancel.cancelled() => return CheckOutcome::default(),
            result = tokio::time::timeout(self.timeout, call) => result,
        };

        match turn {
            Ok(Ok(turn)) => {
                let verdict = parse_verdict(&turn.text);
                debug!(block_id = %request.block.id, passed = verdict.passed, "Block check finished");
                CheckOutcome {
                    verdict: Some(verdict),
                    usage: turn.usage,
                }
            }
            Ok(Err(e)) => {
                warn!(block_id = %request.block.id, error = %e, "Block checker call failed");
                CheckOutcome::default()
            }
            Err(_) => {
                warn!(
                    block_id = %request.block.id,
                    timeout_secs = self.timeout.as_secs(),
                    "Block checker timed out"
                );
                CheckOutcome::default()
            }
        }
    }
}

fn section(map: &Map<String, Value>) -> String {
    let text = serde_json::to_string_pretty(&weft_core::strip_reserved(map)).unwrap_or_default();
    match text.char_indices().nth(MAX_SECTION_CHARS) {
        Some((cut, _)) => format!("{}\n... (truncated)", &text[..cut]),
        None => text,
    }
}

fn check_prompt(request: &CheckRequest<'_>) -> String {
    let goal = request
        .goal
        .filter(|g| !g.is_empty())
        .map(|g| format!("Workflow goal: {}\n\n", g))
        .unwrap_or_default();

    format!(
        r#"You are checking whether one step of an automated workflow did its job.

{}Step: {} ({})
Step intent: {}

Inputs the step received:
{}

Output the step produced:
{}

Did the step accomplish its intent given its inputs? Respond with ONLY valid JSON:
{{"passed": true | false, "reason": "brief explanation"}}"#,
        goal,
        request.block.name,
        request.block.block_type(),
        request.block.intent(),
        section(request.inputs),
        section(request.outputs),
    )
}

#[derive(Deserialize)]
struct CheckerResponse {
    passed: bool,
    #[serde(default)]
    reason: String,
}

/// Parse a verdict; anything unparsable counts as passed.
fn parse_verdict(response: &str) -> Verdict {
    match serde_json::from_str::<CheckerResponse>(extract_json(response)) {
        Ok(resp) => Verdict {
            passed: resp.passed,
            reason: resp.reason,
        },
        Err(e) => {
            warn!(error = %e, response = %response, "Failed to parse checker response");
            Verdict {
                passed: true,
                reason: String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::error::WeftError;
    use weft_test_utils::{llm_block, model_config, ScriptedLlm};

    fn checker(llm: &ScriptedLlm, timeout_secs: u64) -> BlockChecker {
        let config = CheckerConfig {
            timeout_secs,
            ..CheckerConfig::default()
        };
        BlockChecker::new(Arc::new(llm.clone()), &model_config("gpt-4o"), &config)
    }

    async fn run(checker: &BlockChecker, model_id: Option<&str>) -> CheckOutcome {
        let mut block = llm_block("Summarize", "Summarize {{input.text}}");
        block.description = "Summarize the text in one sentence".into();
        let inputs = json!({"input": {"text": "hello"}, "__user_id__": "u1"}).as_object().cloned().unwrap();
        let outputs = json!({"response": "Hi."}).as_object().cloned().unwrap();
        let cancel = CancellationToken::new();
        checker
            .check(CheckRequest {
                block: &block,
                inputs: &inputs,
                outputs: &outputs,
                goal: Some("Greet people"),
                model_id,
                cancel: &cancel,
            })
            .await
    }

    #[tokio::test]
    async fn negative_verdict() {
        let llm = ScriptedLlm::new().then_text(r#"{"passed": false, "reason": "not a summary"}"#);
        let outcome = run(&checker(&llm, 15), None).await;
        assert_eq!(
            outcome.verdict,
            Some(Verdict {
                passed: false,
                reason: "not a summary".into()
            })
        );
        assert_eq!(outcome.usage.total(), 15);

        let request = &llm.requests()[0];
        assert_eq!(request.model_id, "gpt-4o-mini");
        let prompt = request.transcript();
        assert!(prompt.contains("Summarize the text in one sentence"));
        assert!(prompt.contains("Greet people"));
        assert!(!prompt.contains("u1"));
    }

    #[tokio::test]
    async fn model_override() {
        let llm = ScriptedLlm::new().then_text(r#"{"passed": true}"#);
        let outcome = run(&checker(&llm, 15), Some("judge-model")).await;
        assert!(outcome.verdict.unwrap().passed);
        assert_eq!(llm.requests()[0].model_id, "judge-model");
    }

    #[tokio::test]
    async fn unparsable_reply_passes() {
        let llm = ScriptedLlm::new().then_text("Looks fine to me!");
        let outcome = run(&checker(&llm, 15), None).await;
        assert!(outcome.verdict.unwrap().passed);
    }

    #[tokio::test]
    async fn unreachable_checker_gives_no_verdict() {
        let llm = ScriptedLlm::new().then_error(WeftError::LlmRequest("connection refused".into()));
        assert!(run(&checker(&llm, 15), None).await.verdict.is_none());
    }

    #[tokio::test]
    async fn slow_checker_times_out() {
        let llm = ScriptedLlm::new()
            .then_delay(Duration::from_secs(60))
            .then_text(r#"{"passed": false}"#);
        assert!(run(&checker(&llm, 1), None).await.verdict.is_none());
    }

    #[test]
    fn long_sections_are_truncated() {
        let big = json!({"text": "x".repeat(10_000)}).as_object().cloned().unwrap();
        let text = section(&big);
        assert!(text.ends_with("(truncated)"));
        assert!(text.len() < 5_000);
    }
}
