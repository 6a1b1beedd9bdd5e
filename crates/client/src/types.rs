//! JSON-RPC message types shared by the transport and the session layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Identifier of a JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Numeric id.
	Number(i64),
	/// String id.
	String(String),
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RequestId::Number(n) => write!(f, "{n}"),
			RequestId::String(s) => write!(f, "{s}"),
		}
	}
}

/// An untyped JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyRequest {
	/// Request id, assigned by the sending channel.
	pub id: RequestId,
	/// Method name.
	pub method: String,
	/// Parameters as raw JSON.
	#[serde(default)]
	pub params: JsonValue,
}

/// An untyped JSON-RPC notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyNotification {
	/// Method name.
	pub method: String,
	/// Parameters as raw JSON.
	#[serde(default)]
	pub params: JsonValue,
}

/// An untyped JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyResponse {
	/// Id of the request being answered.
	pub id: RequestId,
	/// Successful result, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Error, if the peer failed the request.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

/// Error object carried in a failed JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("jsonrpc error {code}: {message}")]
pub struct ResponseError {
	/// Error code defined by JSON-RPC or LSP.
	pub code: i64,
	/// Human-readable message.
	pub message: String,
	/// Optional structured data.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// Create an error with a code and message.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code: code as i64,
			message: message.into(),
			data: None,
		}
	}
}

/// Error codes used when replying to server-initiated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ErrorCode {
	/// The method does not exist or is not available.
	MethodNotFound = -32601,
	/// Invalid method parameters.
	InvalidParams = -32602,
	/// Internal JSON-RPC error.
	InternalError = -32603,
	/// The request was cancelled by the client.
	RequestCancelled = -32800,
}

/// A classified inbound message from the server.
#[derive(Debug, Clone)]
pub enum Message {
	/// Server-initiated request that expects a reply.
	Request(AnyRequest),
	/// Response to a client-initiated request.
	Response(AnyResponse),
	/// Server-initiated notification.
	Notification(AnyNotification),
}

impl Message {
	/// Classify a raw JSON value by the presence of `id` and `method`.
	pub fn classify(value: JsonValue) -> Option<Message> {
		let has_id = value.get("id").is_some();
		let has_method = value.get("method").is_some();
		match (has_id, has_method) {
			(true, false) => serde_json::from_value(value).ok().map(Message::Response),
			(false, true) => serde_json::from_value(value).ok().map(Message::Notification),
			(true, true) => serde_json::from_value(value).ok().map(Message::Request),
			(false, false) => None,
		}
	}
}
