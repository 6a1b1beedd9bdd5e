//! Initialization payload sent once per session at handshake time.
//!
//! The wire shape is fixed by the analysis server. Building the payload is a
//! pure transform; it must be re-run on every session (re)start because the
//! interpreter and search paths can change between restarts of the same key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scope::ResolvedInterpreter;

/// Glob patterns the analysis server must never index.
///
/// Callers cannot currently extend this list.
pub const DEFAULT_EXCLUDE_FILES: &[&str] = &[
	"**/Lib/**",
	"**/site-packages/**",
	"**/node_modules",
	"**/bower_components",
	"**/.git",
	"**/.svn",
	"**/.hg",
	"**/CVS",
	"**/.DS_Store",
	"**/.git/objects/**",
	"**/.git/subtree-cache/**",
	"**/node_modules/*/**",
	".vscode/*.py",
	"**/site-packages/**/*.py",
];

/// `initializationOptions` member of the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializationOptions {
	/// Interpreter descriptor.
	pub interpreter: InterpreterOptions,
	/// Paths to search when resolving module imports.
	#[serde(rename = "searchPaths")]
	pub search_paths: Vec<PathBuf>,
	/// Paths to search for module stubs.
	#[serde(rename = "typeStubSearchPaths")]
	pub type_stub_search_paths: Vec<PathBuf>,
	/// Tooltip display appearance.
	#[serde(rename = "displayOptions")]
	pub display_options: DisplayOptions,
	/// Glob patterns excluded from analysis.
	#[serde(rename = "excludeFiles")]
	pub exclude_files: Vec<String>,
	/// Glob patterns under the root that should be analyzed.
	#[serde(rename = "includeFiles")]
	pub include_files: Vec<String>,
	/// Enables verbose logging via the logMessage event.
	#[serde(rename = "traceLogging")]
	pub trace_logging: bool,
	/// Overrides the workspace root the server analyzes.
	#[serde(rename = "rootPathOverride", skip_serializing_if = "Option::is_none")]
	pub root_path_override: Option<PathBuf>,
}

/// `interpreter` member of [`InitializationOptions`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterpreterOptions {
	/// Properties required to describe the interpreter.
	pub properties: InterpreterProperties,
}

/// Interpreter descriptor properties. Field names are part of the wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterpreterProperties {
	/// Absolute path to the interpreter binary.
	#[serde(rename = "InterpreterPath")]
	pub interpreter_path: PathBuf,
	/// Interpreter version string.
	#[serde(rename = "Version")]
	pub version: String,
	/// Directory the server stores its analysis database in.
	#[serde(rename = "DatabasePath")]
	pub database_path: PathBuf,
}

/// Tooltip display options. Defaults match the desktop IDE presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayOptions {
	/// Markup format the editor prefers for documentation.
	#[serde(rename = "preferredFormat")]
	pub preferred_format: String,
	/// Whether documentation is trimmed line-wise.
	#[serde(rename = "trimDocumentationLines")]
	pub trim_documentation_lines: bool,
	/// Maximum length of a documentation line.
	#[serde(rename = "maxDocumentationLineLength")]
	pub max_documentation_line_length: usize,
	/// Whether documentation text is trimmed as a whole.
	#[serde(rename = "trimDocumentationText")]
	pub trim_documentation_text: bool,
	/// Maximum length of documentation text.
	#[serde(rename = "maxDocumentationTextLength")]
	pub max_documentation_text_length: usize,
	/// Maximum number of documentation lines.
	#[serde(rename = "maxDocumentationLines")]
	pub max_documentation_lines: usize,
}

impl Default for DisplayOptions {
	fn default() -> Self {
		Self {
			preferred_format: "markdown".into(),
			trim_documentation_lines: false,
			max_documentation_line_length: 0,
			trim_documentation_text: true,
			max_documentation_text_length: 1024,
			max_documentation_lines: 100,
		}
	}
}

/// Build the initialization payload for a resolved configuration.
///
/// `database_path` is the server's working folder and `typeshed_path` its
/// bundled stub directory; both come from the transport launcher's start
/// info so the payload matches the binary actually spawned.
pub fn build_initialization_options(
	resolved: &ResolvedInterpreter,
	database_path: &Path,
	typeshed_path: &Path,
	display_options: DisplayOptions,
	trace_logging: bool,
) -> InitializationOptions {
	InitializationOptions {
		interpreter: InterpreterOptions {
			properties: InterpreterProperties {
				interpreter_path: resolved.interpreter.path.clone(),
				version: resolved.interpreter.version.clone(),
				database_path: database_path.to_path_buf(),
			},
		},
		search_paths: resolved.search_paths.clone(),
		type_stub_search_paths: vec![typeshed_path.to_path_buf()],
		display_options,
		exclude_files: DEFAULT_EXCLUDE_FILES.iter().map(|s| s.to_string()).collect(),
		include_files: Vec::new(),
		trace_logging,
		root_path_override: resolved.root_override.clone(),
	}
}
