//! Scope identity and interpreter resolution.
//!
//! A scope is whatever owns a document: a project, a folder workspace, a REPL
//! evaluator, or nothing at all (a loose file). Each scope maps to one
//! [`IdentityKey`], and each key maps to at most one running session.
//!
//! Resolution over the configuration sources is a pure function over an
//! ordered list of [`ScopeSource`] variants; the first source yielding a
//! usable interpreter wins and the rest are not consulted.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::host::{Interpreter, InterpreterService, ProjectScope, ReplScope, WorkspaceScope};

/// String that uniquely names a session within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
	/// Key for a project-owned scope, derived from the display name.
	pub fn project(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	/// Key for a workspace-owned scope, derived from the display name.
	pub fn workspace(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	/// Fallback key for documents with no owning scope, one per content type.
	pub fn loose(content_type: &str) -> Self {
		Self(format!("loose:{content_type}"))
	}

	/// Key for a REPL evaluator window.
	pub fn repl(name: impl Into<String>) -> Self {
		Self(format!("repl:{}", name.into()))
	}

	/// The raw key string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for IdentityKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// One configuration source a session may draw its interpreter from.
///
/// Order in the session's source list is the resolution priority:
/// REPL evaluator, then owning project, then owning workspace, then the
/// process-wide default interpreter.
#[derive(Clone)]
pub enum ScopeSource {
	/// Interactive-evaluator-backed configuration.
	Repl(Arc<dyn ReplScope>),
	/// Owning-project active interpreter.
	Project(Arc<dyn ProjectScope>),
	/// Owning-workspace interpreter via the registry/options lookup.
	Workspace(Arc<dyn WorkspaceScope>),
	/// Process-wide default interpreter.
	Default(Arc<dyn InterpreterService>),
}

impl ScopeSource {
	/// Which kind of source this is, for logging and restart decisions.
	pub fn kind(&self) -> SourceKind {
		match self {
			ScopeSource::Repl(_) => SourceKind::Repl,
			ScopeSource::Project(_) => SourceKind::Project,
			ScopeSource::Workspace(_) => SourceKind::Workspace,
			ScopeSource::Default(_) => SourceKind::Default,
		}
	}

	fn query(&self) -> Option<(Interpreter, Vec<PathBuf>, Option<PathBuf>)> {
		match self {
			ScopeSource::Repl(repl) => repl.interpreter().map(|i| (i, repl.search_paths(), None)),
			ScopeSource::Project(project) => project
				.active_interpreter()
				.map(|i| (i, project.absolute_search_paths(), project.root_path())),
			ScopeSource::Workspace(workspace) => workspace
				.interpreter()
				.map(|i| (i, workspace.absolute_search_paths(), workspace.location())),
			ScopeSource::Default(service) => {
				service.default_interpreter().map(|i| (i, Vec::new(), None))
			}
		}
	}
}

impl fmt::Debug for ScopeSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ScopeSource::{:?}", self.kind())
	}
}

/// The kind of configuration source a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
	/// Interactive evaluator.
	Repl,
	/// Owning project.
	Project,
	/// Owning workspace.
	Workspace,
	/// Process-wide default.
	Default,
}

/// Configuration snapshot a session activates with.
///
/// Rebuilt fresh on every (re)start; never cached across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterpreter {
	/// The interpreter the winning source yielded.
	pub interpreter: Interpreter,
	/// Absolute module search paths from the winning source.
	pub search_paths: Vec<PathBuf>,
	/// Root-path override from the winning source, if any.
	pub root_override: Option<PathBuf>,
	/// Which source won.
	pub origin: SourceKind,
}

/// Resolve the effective configuration over priority-ordered sources.
///
/// The first source yielding an interpreter with both a non-empty path and a
/// non-empty version wins. Returns `None` when no source does; the caller
/// treats that as a quiet no-op, not an error, since a document may have no
/// resolvable interpreter yet.
pub fn resolve_scope_config(sources: &[ScopeSource]) -> Option<ResolvedInterpreter> {
	for source in sources {
		if let Some((interpreter, search_paths, root_override)) = source.query()
			&& interpreter.is_usable()
		{
			return Some(ResolvedInterpreter {
				interpreter,
				search_paths,
				root_override,
				origin: source.kind(),
			});
		}
	}
	None
}
