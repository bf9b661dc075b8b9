//! Assembly of the standardized response from a finished run.
//!
//! The output depends only on its arguments, so building twice from the same
//! result yields identical responses.

use serde_json::{Map, Value};

use weft_core::config::ResultPolicy;
use weft_core::execution::*;
use weft_core::workflow::Workflow;

use crate::graph::ExecutionPlan;
use crate::template::value_to_text;

/// Output keys tried, in order, when picking a block's primary text.
const PRIMARY_KEYS: [&str; 5] = ["response", "result", "text", "output", "value"];

const ARTIFACT_KINDS: [&str; 2] = ["chart", "image"];

/// How deep into block outputs artifacts and files are searched for.
const MAX_SCAN_DEPTH: usize = 4;

pub fn build_api_response(
    result: &ExecutionResult,
    workflow: &Workflow,
    execution_id: &str,
    duration_ms: u64,
    policy: ResultPolicy,
) -> ExecutionApiResponse {
    let order = ExecutionPlan::build(workflow)
        .map(|plan| plan.order)
        .unwrap_or_else(|_| (0..workflow.blocks.len()).collect());

    let mut artifacts = Vec::new();
    let mut files: Vec<FileRef> = Vec::new();
    for &i in &order {
        let block = &workflow.blocks[i];
        if let Some(state) = result.block_states.get(&block.id) {
            for value in state.outputs.values() {
                scan(value, &block.id, 0, &mut artifacts, &mut files);
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    files.retain(|f| seen.insert(f.file_id.clone()));

    let metadata = ExecutionMetadata {
        execution_id: execution_id.to_string(),
        agent_id: None,
        workflow_id: workflow.id.clone(),
        workflow_version: workflow.version,
        duration_ms,
        input_tokens: result.usage.input_tokens,
        output_tokens: result.usage.output_tokens,
        blocks_total: workflow.blocks.len(),
        blocks_executed: result.count(BlockStatus::Completed) + result.count(BlockStatus::Failed),
        blocks_failed: result.count(BlockStatus::Failed),
        blocks_skipped: result.count(BlockStatus::Skipped),
    };

    ExecutionApiResponse {
        status: result.status,
        result: select_result(result, workflow, &order, policy),
        artifacts,
        files,
        blocks: result.block_states.clone(),
        metadata,
        error: match result.status {
            ExecutionStatus::Failed => result.error.clone(),
            _ => None,
        },
    }
}

fn select_result(result: &ExecutionResult, workflow: &Workflow, order: &[usize], policy: ResultPolicy) -> String {
    let completed = move |i: usize| {
        result
            .block_states
            .get(&workflow.blocks[i].id)
            .filter(|s| s.status == BlockStatus::Completed)
    };

    if policy == ResultPolicy::DesignatedOutput {
        let texts: Vec<String> = order
            .iter()
            .filter(|&&i| workflow.blocks[i].is_output)
            .filter_map(|&i| completed(i))
            .map(|s| primary_text(&s.outputs))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n\n");
        }
    }

    let is_sink = move |i: usize| workflow.outgoing(&workflow.blocks[i].id).next().is_none();
    order
        .iter()
        .rev()
        .filter(|&&i| is_sink(i))
        .find_map(|&i| completed(i))
        .or_else(|| order.iter().rev().find_map(|&i| completed(i)))
        .map(|s| primary_text(&s.outputs))
        .unwrap_or_default()
}

/// The human-facing text of one block's outputs.
pub fn primary_text(outputs: &Map<String, Value>) -> String {
    if let Some(value) = PRIMARY_KEYS
        .iter()
        .filter_map(|k| outputs.get(*k))
        .find(|v| !v.is_null())
    {
        return value_to_text(value);
    }
    match outputs.len() {
        0 => String::new(),
        1 => outputs.values().next().map(value_to_text).unwrap_or_default(),
        _ => Value::Object(outputs.clone()).to_string(),
    }
}

fn scan(value: &Value, source: &str, depth: usize, artifacts: &mut Vec<Artifact>, files: &mut Vec<FileRef>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    match value {
        Value::Object(obj) => {
            if let Some(artifact) = as_artifact(obj, source) {
                artifacts.push(artifact);
            } else if let Some(file) = as_file(obj, source) {
                files.push(file);
            } else {
                for v in obj.values() {
                    scan(v, source, depth + 1, artifacts, files);
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                scan(v, source, depth + 1, artifacts, files);
            }
        }
        _ => {}
    }
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn as_artifact(obj: &Map<String, Value>, source: &str) -> Option<Artifact> {
    let kind = obj.get("type").and_then(Value::as_str)?;
    if !ARTIFACT_KINDS.contains(&kind) {
        return None;
    }
    Some(Artifact {
        kind: kind.to_string(),
        format: str_field(obj, &["format"]),
        data: str_field(obj, &["data"])?,
        title: str_field(obj, &["title"]),
        source_block: source.to_string(),
    })
}

fn as_file(obj: &Map<String, Value>, source: &str) -> Option<FileRef> {
    Some(FileRef {
        file_id: str_field(obj, &["file_id", "fileId"])?,
        filename: str_field(obj, &["filename"])?,
        mime_type: str_field(obj, &["mime_type", "mimeType"]),
        size: obj.get("size").and_then(Value::as_u64),
        download_url: str_field(obj, &["download_url", "downloadUrl", "url"]),
        source_block: source.to_string(),
    })
}
