//! Asynchronous client core for an out-of-process Python analysis server.
//!
//! The host editor raises document and configuration events; this crate
//! turns them into supervised server sessions. The pieces, in the order a
//! document flows through them:
//!
//! - [`DocumentRouter`]: resolves each document's owning scope (project,
//!   workspace, REPL evaluator, or loose file) to an identity key.
//! - [`SessionRegistry`]: at most one [`Session`] per key, with reservation
//!   semantics so concurrent lookups never race two servers into existence.
//! - [`Session`]: the state machine around one child process, from transport
//!   launch through the `initialize` handshake to teardown.
//! - [`build_initialization_options`]: the wire payload sent during the
//!   handshake, rebuilt fresh on every (re)start.
//! - [`CompletionMiddleware`]: wraps `textDocument/completion` and can merge
//!   live REPL completions into the server's response.
//!
//! Everything the core needs from the surrounding IDE is behind the traits
//! in [`host`]; nothing here parses project files or discovers interpreters.
#![warn(missing_docs)]

use std::path::Path;

/// Re-export of the [`lsp_types`] dependency of this crate.
pub use lsp_types;
pub use serde_json::Value as JsonValue;

pub mod host;
mod middleware;
mod options;
mod registry;
mod router;
mod scope;
mod session;
mod transport;
mod types;

#[cfg(test)]
mod testing;

pub use middleware::{COMPLETION_METHOD, CompletionMiddleware, ReplCompletionSource};
pub use options::{
	DEFAULT_EXCLUDE_FILES, DisplayOptions, InitializationOptions, InterpreterOptions,
	InterpreterProperties, build_initialization_options,
};
pub use registry::SessionRegistry;
pub use router::{DocumentEvent, DocumentId, DocumentInfo, DocumentRouter, ScopeLocator};
pub use scope::{
	IdentityKey, ResolvedInterpreter, ScopeSource, SourceKind, resolve_scope_config,
};
pub use session::{Session, SessionSettings, SessionState};
pub use transport::{
	LocalLauncher, RpcChannel, ServerPaths, ServerStartInfo, ServerTransport, TransportLauncher,
};
pub use types::{AnyNotification, AnyRequest, AnyResponse, ErrorCode, RequestId, ResponseError};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Neither a native server executable nor a runtime-hosted module was
	/// found in the install directory. Fatal for that activation attempt.
	#[error("no analysis server found in {}", dir.display())]
	TransportUnavailable {
		/// The install directory that was searched.
		dir: std::path::PathBuf,
	},
	/// The server process could not be spawned.
	#[error("failed to spawn {}: {reason}", program.display())]
	Spawn {
		/// The program that failed to start.
		program: std::path::PathBuf,
		/// The underlying failure.
		reason: String,
	},
	/// A custom message was sent before the handshake completed; a caller
	/// contract violation, not a server fault.
	#[error("protocol channel not attached; session is not initialized")]
	ChannelNotAttached,
	/// The connection to the server ended while traffic was outstanding.
	#[error("the channel to the analysis server closed")]
	ChannelClosed,
	/// The session failed or stopped before reaching `Initialized`.
	#[error("session stopped before initializing")]
	SessionStopped,
	/// A request exceeded the configured timeout.
	#[error("request {0} timed out")]
	RequestTimeout(String),
	/// The server replied undecodable or invalid JSON.
	#[error("deserialization failed: {0}")]
	Deserialize(#[from] serde_json::Error),
	/// The server replied an error.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The server violated the wire protocol.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// Input/output errors from the underlying streams.
	#[error("{0}")]
	Io(#[from] std::io::Error),
}

/// Build a `file://` URI from an absolute filesystem path.
///
/// Only the characters a URI path cannot carry are percent-encoded; drive
/// letters and forward slashes pass through.
pub fn uri_from_path(path: &Path) -> Result<lsp_types::Uri> {
	let raw = path
		.to_str()
		.ok_or_else(|| Error::Protocol(format!("non-UTF-8 path: {}", path.display())))?;

	let mut uri = String::with_capacity(raw.len() + 8);
	uri.push_str("file://");
	if !raw.starts_with('/') {
		uri.push('/');
	}
	for byte in raw.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => uri.push(byte as char),
			b'-' | b'.' | b'_' | b'~' | b'/' | b':' => uri.push(byte as char),
			b'\\' => uri.push('/'),
			_ => {
				uri.push('%');
				uri.push_str(&format!("{byte:02X}"));
			}
		}
	}

	uri.parse()
		.map_err(|_| Error::Protocol(format!("cannot express path as uri: {}", path.display())))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn uri_from_plain_path() {
		let uri = uri_from_path(Path::new("/home/user/project")).unwrap();
		assert_eq!(uri.as_str(), "file:///home/user/project");
	}

	#[test]
	fn uri_percent_encodes_spaces() {
		let uri = uri_from_path(Path::new("/home/user/my project")).unwrap();
		assert_eq!(uri.as_str(), "file:///home/user/my%20project");
	}

	#[test]
	fn uri_from_windows_style_path() {
		let uri = uri_from_path(Path::new("C:\\work\\proj")).unwrap();
		assert_eq!(uri.as_str(), "file:///C:/work/proj");
	}
}
