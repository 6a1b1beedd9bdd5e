//! Collaborator-facing interfaces supplied by the host editor.
//!
//! The session core never parses project files or discovers interpreters
//! itself. Everything it needs from the surrounding IDE is expressed as a
//! trait here: owning projects and workspaces, the process-wide interpreter
//! service, and REPL evaluator contexts. Configuration-change events flow in
//! through [`ConfigEventBus`].

use std::path::PathBuf;

use tokio::sync::broadcast;

/// Descriptor of a Python interpreter as reported by a configuration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
	/// Absolute path to the interpreter binary.
	pub path: PathBuf,
	/// Version string, e.g. `"3.12.1"`.
	pub version: String,
}

impl Interpreter {
	/// Create a descriptor from a path and version.
	pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			version: version.into(),
		}
	}

	/// A source only counts if it yields both a path and a version.
	pub fn is_usable(&self) -> bool {
		!self.path.as_os_str().is_empty() && !self.version.is_empty()
	}
}

/// A project that owns documents and carries its own active interpreter.
pub trait ProjectScope: Send + Sync {
	/// Display name of the project; used as the session identity key.
	fn display_name(&self) -> String;
	/// The project's currently active interpreter, if configured.
	fn active_interpreter(&self) -> Option<Interpreter>;
	/// Absolute module search paths configured on the project.
	fn absolute_search_paths(&self) -> Vec<PathBuf>;
	/// Project root directory, used as the root-path override.
	fn root_path(&self) -> Option<PathBuf>;
}

/// An open folder workspace with its own interpreter and search paths.
pub trait WorkspaceScope: Send + Sync {
	/// Display name of the workspace; used as the session identity key.
	fn display_name(&self) -> String;
	/// Interpreter resolved through the workspace's registry/options lookup.
	fn interpreter(&self) -> Option<Interpreter>;
	/// Absolute module search paths configured on the workspace.
	fn absolute_search_paths(&self) -> Vec<PathBuf>;
	/// Workspace location on disk.
	fn location(&self) -> Option<PathBuf>;
}

/// A live REPL evaluator whose interpreter takes priority over projects.
pub trait ReplScope: Send + Sync {
	/// Interpreter backing the evaluator process.
	fn interpreter(&self) -> Option<Interpreter>;
	/// Search paths configured on the evaluator.
	fn search_paths(&self) -> Vec<PathBuf>;
}

/// Process-wide interpreter options service.
pub trait InterpreterService: Send + Sync {
	/// The default interpreter used by documents with no owning scope.
	fn default_interpreter(&self) -> Option<Interpreter>;
}

/// Configuration-change events the host raises at runtime.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
	/// The process-wide default interpreter changed.
	DefaultInterpreterChanged,
	/// The active folder workspace changed.
	ActiveWorkspaceChanged,
	/// A project requested its analysis session be restarted.
	ProjectRestartRequested {
		/// Display name of the project.
		project: String,
	},
}

/// Broadcast bus for [`ConfigEvent`] values.
///
/// Sessions subscribe on creation and drop their receivers on stop, so
/// subscription lifetime is tied to session lifetime.
#[derive(Clone)]
pub struct ConfigEventBus {
	tx: broadcast::Sender<ConfigEvent>,
}

impl ConfigEventBus {
	/// Create a bus with a bounded replay buffer.
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(64);
		Self { tx }
	}

	/// Subscribe to future events.
	pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
		self.tx.subscribe()
	}

	/// Publish an event to all live subscribers.
	pub fn publish(&self, event: ConfigEvent) {
		// No subscribers is fine; nothing is listening yet.
		let _ = self.tx.send(event);
	}
}

impl Default for ConfigEventBus {
	fn default() -> Self {
		Self::new()
	}
}
