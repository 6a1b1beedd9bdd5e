//! Completion request interception.
//!
//! The host routes exactly one protocol method through this hook:
//! `textDocument/completion`. The middleware wraps the forward call to the
//! analysis server and may merge completions from a secondary, REPL-backed
//! source. The forward call's failure always propagates; the secondary
//! source degrades to the primary response, never fails the request.

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::CompletionItem;
use serde_json::Value as JsonValue;

use crate::Result;

/// The one method this middleware intercepts.
pub const COMPLETION_METHOD: &str = "textDocument/completion";

/// Completions computed inside a live REPL process, merged into the
/// server's static analysis results.
#[async_trait]
pub trait ReplCompletionSource: Send + Sync {
	/// Items for the current evaluator state. An error means the evaluator
	/// is busy or gone; the caller drops the merge, not the request.
	async fn completions(&self) -> Result<Vec<CompletionItem>>;
}

/// Wraps completion requests on their way to the analysis server.
#[derive(Default)]
pub struct CompletionMiddleware {
	secondary: Option<Arc<dyn ReplCompletionSource>>,
}

impl CompletionMiddleware {
	/// Middleware that passes responses through untouched.
	pub fn new() -> Self {
		Self::default()
	}

	/// Merge items from `source` into every completion response.
	pub fn with_secondary(source: Arc<dyn ReplCompletionSource>) -> Self {
		Self {
			secondary: Some(source),
		}
	}

	/// Whether `method` should be routed through [`Self::intercept`].
	pub fn handles(&self, method: &str) -> bool {
		method == COMPLETION_METHOD
	}

	/// Forward the request and post-process the response.
	pub async fn intercept<F, Fut>(&self, params: JsonValue, forward: F) -> Result<JsonValue>
	where
		F: FnOnce(JsonValue) -> Fut,
		Fut: Future<Output = Result<JsonValue>>,
	{
		let mut response = forward(params).await?;

		if let Some(secondary) = &self.secondary {
			match secondary.completions().await {
				Ok(items) if !items.is_empty() => merge_items(&mut response, items),
				Ok(_) => {}
				Err(error) => {
					tracing::debug!(%error, "secondary completion source unavailable");
				}
			}
		}

		Ok(response)
	}
}

/// Append `extra` to the response's item list, skipping labels the server
/// already produced. Handles both response shapes: a bare item array and a
/// `CompletionList` object. Anything else is left alone.
fn merge_items(response: &mut JsonValue, extra: Vec<CompletionItem>) {
	let items = match response {
		JsonValue::Array(items) => items,
		JsonValue::Object(list) => match list.get_mut("items") {
			Some(JsonValue::Array(items)) => items,
			_ => return,
		},
		_ => return,
	};

	let existing: std::collections::HashSet<&str> = items
		.iter()
		.filter_map(|item| item.get("label").and_then(JsonValue::as_str))
		.collect();
	let additions: Vec<JsonValue> = extra
		.into_iter()
		.filter(|item| !existing.contains(item.label.as_str()))
		.filter_map(|item| serde_json::to_value(item).ok())
		.collect();
	items.extend(additions);
}
