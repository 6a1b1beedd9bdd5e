//! Document lifecycle routing.
//!
//! Listens to document events from the editor host and guarantees that every
//! document of the supported content type has a session for its owning
//! scope. The router never holds sessions itself; it derives identity keys
//! and asks the registry, which is safe to call redundantly.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::{InterpreterService, ProjectScope, ReplScope, WorkspaceScope};
use crate::registry::SessionRegistry;
use crate::scope::{IdentityKey, ScopeSource};
use crate::session::Session;

/// Stable identifier the host assigns to an open document.
pub type DocumentId = u64;

/// What the router needs to know about a document.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
	/// Host-assigned identifier, stable while the document stays open.
	pub id: DocumentId,
	/// Path on disk, absent for unsaved buffers.
	pub path: Option<PathBuf>,
	/// Host content-type name, e.g. `"Python"`.
	pub content_type: String,
}

/// Document lifecycle events raised by the editor host.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
	/// A document was opened.
	Opened {
		/// The opened document.
		doc: DocumentInfo,
	},
	/// A document became visible.
	Shown {
		/// The shown document.
		doc: DocumentInfo,
		/// Set the first time the document is shown after opening.
		first_show: bool,
	},
	/// A document was hidden. No session work follows.
	Hidden {
		/// The hidden document.
		doc: DocumentInfo,
	},
	/// The document's content type changed.
	ContentTypeChanged {
		/// The document, carrying the new content type.
		doc: DocumentInfo,
	},
	/// A document was closed.
	Closed {
		/// The closed document.
		doc: DocumentInfo,
	},
	/// A project is closing, not merely one of its documents.
	ProjectClosing {
		/// Display name of the closing project.
		project: String,
	},
}

/// Host-side scope lookup: which project or workspace owns a path.
pub trait ScopeLocator: Send + Sync {
	/// Projects that claim `path`. More than one means the file is linked.
	fn projects_for(&self, path: &std::path::Path) -> Vec<Arc<dyn ProjectScope>>;
	/// The active folder workspace, if one is open.
	fn active_workspace(&self) -> Option<Arc<dyn WorkspaceScope>>;
	/// The process-wide interpreter options service.
	fn interpreter_service(&self) -> Arc<dyn InterpreterService>;
}

/// Routes document events to registry operations.
pub struct DocumentRouter {
	registry: Arc<SessionRegistry>,
	locator: Arc<dyn ScopeLocator>,
	content_type: String,
	// Document-to-key cache; invalidated only on close or content-type
	// change, so repeated events for one document skip scope lookup.
	keys: Mutex<HashMap<DocumentId, IdentityKey>>,
}

impl DocumentRouter {
	/// Create a router for documents of `content_type`.
	pub fn new(
		registry: Arc<SessionRegistry>,
		locator: Arc<dyn ScopeLocator>,
		content_type: impl Into<String>,
	) -> Self {
		Self {
			registry,
			locator,
			content_type: content_type.into(),
			keys: Mutex::new(HashMap::new()),
		}
	}

	/// React to one lifecycle event.
	pub async fn handle_event(&self, event: DocumentEvent) {
		match event {
			DocumentEvent::Opened { doc } => {
				self.ensure_document(&doc);
			}
			DocumentEvent::Shown { doc, first_show } => {
				if first_show {
					self.ensure_document(&doc);
				}
			}
			DocumentEvent::Hidden { .. } => {}
			DocumentEvent::ContentTypeChanged { doc } => {
				self.keys.lock().remove(&doc.id);
				self.ensure_document(&doc);
			}
			DocumentEvent::Closed { doc } => {
				self.keys.lock().remove(&doc.id);
			}
			DocumentEvent::ProjectClosing { project } => {
				let key = IdentityKey::project(project);
				self.keys.lock().retain(|_, cached| *cached != key);
				self.registry.stop(&key).await;
			}
		}
	}

	/// Make sure a session exists for the document's owning scope.
	///
	/// Returns `None` for documents of another content type. The returned
	/// session may still be activating; await [`Session::wait_ready`] for
	/// an initialized one.
	pub fn ensure_document(&self, doc: &DocumentInfo) -> Option<Arc<Session>> {
		if !doc.content_type.eq_ignore_ascii_case(&self.content_type) {
			return None;
		}

		let key = self.key_for(doc);
		let locator = self.locator.clone();
		let doc = doc.clone();
		Some(
			self.registry
				.ensure(key, move || compute_scope(locator.as_ref(), &doc).1),
		)
	}

	/// Session for a REPL evaluator window. The evaluator's configuration
	/// outranks any project or workspace the window may also belong to.
	pub fn ensure_repl(&self, name: &str, repl: Arc<dyn ReplScope>) -> Arc<Session> {
		let key = IdentityKey::repl(name);
		let service = self.locator.interpreter_service();
		self.registry.ensure(key, move || {
			vec![ScopeSource::Repl(repl), ScopeSource::Default(service)]
		})
	}

	/// Bulk startup: group the restored documents by scope and issue one
	/// `ensure` per distinct key instead of one per document.
	pub fn restore_open_documents(&self, docs: &[DocumentInfo]) {
		let mut seen: HashSet<IdentityKey> = HashSet::new();
		for doc in docs {
			if !doc.content_type.eq_ignore_ascii_case(&self.content_type) {
				continue;
			}
			let key = self.key_for(doc);
			if seen.insert(key) {
				self.ensure_document(doc);
			}
		}
	}

	/// Cached key for the document, resolving and caching on first use.
	fn key_for(&self, doc: &DocumentInfo) -> IdentityKey {
		if let Some(key) = self.keys.lock().get(&doc.id) {
			return key.clone();
		}
		let (key, _) = compute_scope(self.locator.as_ref(), doc);
		self.keys.lock().insert(doc.id, key.clone());
		key
	}
}

/// Resolve a document's owning scope to a key and priority-ordered sources.
///
/// A file linked into more than one project is an ambiguity, not an error:
/// it is logged and the projects are ordered by display name so the choice
/// does not depend on enumeration order.
fn compute_scope(locator: &dyn ScopeLocator, doc: &DocumentInfo) -> (IdentityKey, Vec<ScopeSource>) {
	let service = locator.interpreter_service();

	if let Some(path) = &doc.path {
		let mut projects = locator.projects_for(path);
		if !projects.is_empty() {
			if projects.len() > 1 {
				projects.sort_by_key(|p| p.display_name());
				tracing::warn!(
					path = %path.display(),
					projects = projects.len(),
					"document is linked into multiple projects; picking first by name"
				);
			}
			let project = projects.swap_remove(0);
			let key = IdentityKey::project(project.display_name());
			let mut sources = vec![ScopeSource::Project(project)];
			if let Some(workspace) = locator.active_workspace() {
				sources.push(ScopeSource::Workspace(workspace));
			}
			sources.push(ScopeSource::Default(service));
			return (key, sources);
		}
	}

	if let Some(workspace) = locator.active_workspace() {
		let key = IdentityKey::workspace(workspace.display_name());
		return (
			key,
			vec![ScopeSource::Workspace(workspace), ScopeSource::Default(service)],
		);
	}

	(
		IdentityKey::loose(&doc.content_type),
		vec![ScopeSource::Default(service)],
	)
}

#[cfg(test)]
mod tests {
	use std::path::{Path, PathBuf};

	use super::*;
	use crate::session::{SessionSettings, SessionState};
	use crate::testing::{FixedDefault, FixedProject, FixedRepl, MockLauncher};

	struct MapLocator {
		projects: Mutex<Vec<(PathBuf, Arc<dyn ProjectScope>)>>,
	}

	impl MapLocator {
		fn new() -> Self {
			Self {
				projects: Mutex::new(Vec::new()),
			}
		}

		fn add_project(&self, root: &str, project: FixedProject) {
			self.projects
				.lock()
				.push((PathBuf::from(root), Arc::new(project)));
		}

		fn clear_projects(&self) {
			self.projects.lock().clear();
		}
	}

	impl ScopeLocator for MapLocator {
		fn projects_for(&self, path: &Path) -> Vec<Arc<dyn ProjectScope>> {
			self.projects
				.lock()
				.iter()
				.filter(|(root, _)| path.starts_with(root))
				.map(|(_, p)| p.clone())
				.collect()
		}

		fn active_workspace(&self) -> Option<Arc<dyn WorkspaceScope>> {
			None
		}

		fn interpreter_service(&self) -> Arc<dyn InterpreterService> {
			Arc::new(FixedDefault::new("/usr/bin/python3", "3.12.0"))
		}
	}

	fn python_doc(id: DocumentId, path: &str) -> DocumentInfo {
		DocumentInfo {
			id,
			path: Some(PathBuf::from(path)),
			content_type: "Python".into(),
		}
	}

	fn router_with(locator: Arc<MapLocator>) -> (DocumentRouter, Arc<MockLauncher>) {
		let launcher = Arc::new(MockLauncher::default());
		let registry = SessionRegistry::new(launcher.clone(), SessionSettings::default());
		(DocumentRouter::new(registry, locator, "Python"), launcher)
	}

	#[tokio::test]
	async fn two_projects_get_two_sessions_with_their_own_interpreters() {
		let locator = Arc::new(MapLocator::new());
		locator.add_project("/src/p1", FixedProject::new("P1", "/envs/p1/python", "3.11.0"));
		locator.add_project("/src/p2", FixedProject::new("P2", "/envs/p2/python", "3.12.0"));
		let (router, launcher) = router_with(locator);

		let a = router.ensure_document(&python_doc(1, "/src/p1/a.py")).unwrap();
		let b = router.ensure_document(&python_doc(2, "/src/p2/b.py")).unwrap();
		a.wait_ready().await.unwrap();
		b.wait_ready().await.unwrap();

		assert_eq!(a.key().as_str(), "P1");
		assert_eq!(b.key().as_str(), "P2");
		assert_eq!(
			a.snapshot().unwrap().interpreter.path,
			PathBuf::from("/envs/p1/python")
		);
		assert_eq!(
			b.snapshot().unwrap().interpreter.path,
			PathBuf::from("/envs/p2/python")
		);
		assert_eq!(launcher.launches(), 2);
	}

	#[tokio::test]
	async fn pathless_document_falls_back_to_the_loose_key() {
		let (router, _) = router_with(Arc::new(MapLocator::new()));
		let doc = DocumentInfo {
			id: 1,
			path: None,
			content_type: "Python".into(),
		};

		let session = router.ensure_document(&doc).unwrap();
		assert_eq!(session.key().as_str(), "loose:Python");
	}

	#[tokio::test]
	async fn other_content_types_are_ignored() {
		let (router, launcher) = router_with(Arc::new(MapLocator::new()));
		let doc = DocumentInfo {
			id: 1,
			path: Some(PathBuf::from("/src/main.rs")),
			content_type: "Rust".into(),
		};

		assert!(router.ensure_document(&doc).is_none());
		assert_eq!(launcher.launches(), 0);
	}

	#[tokio::test]
	async fn cached_key_survives_project_rename() {
		let locator = Arc::new(MapLocator::new());
		locator.add_project("/src/p1", FixedProject::new("P1", "/envs/p1/python", "3.11.0"));
		let (router, _) = router_with(locator.clone());
		let doc = python_doc(1, "/src/p1/a.py");

		let first = router.ensure_document(&doc).unwrap();
		assert_eq!(first.key().as_str(), "P1");

		// Rename the owning project; the still-open document keeps its key.
		locator.clear_projects();
		locator.add_project("/src/p1", FixedProject::new("Renamed", "/envs/p1/python", "3.11.0"));

		let second = router.ensure_document(&doc).unwrap();
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(second.key().as_str(), "P1");
	}

	#[tokio::test]
	async fn content_type_change_invalidates_the_cache() {
		let locator = Arc::new(MapLocator::new());
		locator.add_project("/src/p1", FixedProject::new("P1", "/envs/p1/python", "3.11.0"));
		let (router, _) = router_with(locator);
		let doc = python_doc(1, "/src/p1/a.py");

		router.ensure_document(&doc).unwrap();
		assert_eq!(router.keys.lock().len(), 1);

		let mut changed = doc.clone();
		changed.content_type = "PlainText".into();
		router
			.handle_event(DocumentEvent::ContentTypeChanged { doc: changed })
			.await;
		assert!(router.keys.lock().is_empty());
	}

	#[tokio::test]
	async fn project_closing_stops_its_session() {
		let locator = Arc::new(MapLocator::new());
		locator.add_project("/src/p1", FixedProject::new("P1", "/envs/p1/python", "3.11.0"));
		let (router, _) = router_with(locator);

		let session = router.ensure_document(&python_doc(1, "/src/p1/a.py")).unwrap();
		session.wait_ready().await.unwrap();

		router
			.handle_event(DocumentEvent::ProjectClosing {
				project: "P1".into(),
			})
			.await;
		assert_eq!(session.state(), SessionState::Stopped);
		assert_eq!(router.registry.active_count(), 0);
		assert!(router.keys.lock().is_empty());
	}

	#[tokio::test]
	async fn linked_file_ambiguity_resolves_by_name() {
		let locator = Arc::new(MapLocator::new());
		locator.add_project("/src", FixedProject::new("Zeta", "/envs/z/python", "3.11.0"));
		locator.add_project("/src", FixedProject::new("Alpha", "/envs/a/python", "3.12.0"));
		let (router, _) = router_with(locator);

		let session = router.ensure_document(&python_doc(1, "/src/shared.py")).unwrap();
		assert_eq!(session.key().as_str(), "Alpha");
	}

	#[tokio::test]
	async fn bulk_restore_issues_one_ensure_per_scope() {
		let locator = Arc::new(MapLocator::new());
		locator.add_project("/src/p1", FixedProject::new("P1", "/envs/p1/python", "3.11.0"));
		let (router, launcher) = router_with(locator);

		let docs = vec![
			python_doc(1, "/src/p1/a.py"),
			python_doc(2, "/src/p1/b.py"),
			python_doc(3, "/src/p1/c.py"),
		];
		router.restore_open_documents(&docs);

		assert_eq!(router.registry.active_count(), 1);
		let session = router.registry.find(&IdentityKey::project("P1")).unwrap();
		session.wait_ready().await.unwrap();
		assert_eq!(launcher.launches(), 1);
		// Every restored document got its key cached.
		assert_eq!(router.keys.lock().len(), 3);
	}

	#[tokio::test]
	async fn repl_configuration_outranks_the_default() {
		let (router, _) = router_with(Arc::new(MapLocator::new()));

		let session =
			router.ensure_repl("Interactive 1", Arc::new(FixedRepl::new("/envs/repl/python", "3.13.0")));
		session.wait_ready().await.unwrap();

		assert_eq!(session.key().as_str(), "repl:Interactive 1");
		assert_eq!(
			session.snapshot().unwrap().interpreter.path,
			PathBuf::from("/envs/repl/python")
		);
	}
}
