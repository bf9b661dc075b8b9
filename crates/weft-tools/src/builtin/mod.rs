pub mod api_request;
pub mod webhook;

pub use api_request::ApiRequestTool;
pub use webhook::SendWebhookTool;

/// Cap on response bodies echoed back into tool results.
pub(crate) const MAX_BODY_CHARS: usize = 10_000;

pub(crate) fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
