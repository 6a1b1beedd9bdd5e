//! Process-wide table mapping identity keys to sessions.
//!
//! The registry is the sole writer of the at-most-one-session-per-key
//! invariant. `ensure` reserves the key by inserting the new session into the
//! table before the lock is released, so concurrent callers for the same key
//! can never construct duplicates; the actual start sequence runs outside the
//! lock so one slow server never blocks registration of others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::{ConfigEvent, ConfigEventBus};
use crate::scope::{IdentityKey, ScopeSource, resolve_scope_config};
use crate::session::{Session, SessionSettings, SessionState, StartOutcome};
use crate::transport::TransportLauncher;

/// Registry of live analysis sessions, keyed by [`IdentityKey`].
pub struct SessionRegistry {
	sessions: Mutex<HashMap<IdentityKey, Arc<Session>>>,
	launcher: Arc<dyn TransportLauncher>,
	settings: SessionSettings,
	events: ConfigEventBus,
}

impl SessionRegistry {
	/// Create a registry that launches servers through `launcher`.
	pub fn new(launcher: Arc<dyn TransportLauncher>, settings: SessionSettings) -> Arc<Self> {
		Arc::new(Self {
			sessions: Mutex::new(HashMap::new()),
			launcher,
			settings,
			events: ConfigEventBus::new(),
		})
	}

	/// Bus the host publishes configuration-change events to.
	pub fn events(&self) -> &ConfigEventBus {
		&self.events
	}

	/// Lock-protected lookup; no side effects.
	pub fn find(&self, key: &IdentityKey) -> Option<Arc<Session>> {
		self.sessions.lock().get(key).cloned()
	}

	/// Number of sessions currently in the table.
	pub fn active_count(&self) -> usize {
		self.sessions.lock().len()
	}

	/// Return the session for `key`, creating and starting one if absent.
	///
	/// The existence check and insert happen under the table lock, so the
	/// key is reserved before any caller can observe its absence again.
	/// Startup runs asynchronously after the lock is released; callers
	/// needing an initialized session must await [`Session::wait_ready`].
	/// Safe to call redundantly.
	pub fn ensure(
		self: &Arc<Self>,
		key: IdentityKey,
		sources: impl FnOnce() -> Vec<ScopeSource>,
	) -> Arc<Session> {
		let session = {
			let mut table = self.sessions.lock();
			if let Some(existing) = table.get(&key) {
				return existing.clone();
			}
			let session = Session::new(
				key.clone(),
				sources(),
				self.settings.clone(),
				self.launcher.clone(),
			);
			table.insert(key, session.clone());
			session
		};

		self.attach_config_listener(&session);
		self.spawn_start(session.clone());
		session
	}

	/// Remove `key` from the table and tear the session down.
	///
	/// No-op if absent. Safe to call while startup is still in flight: the
	/// session cancels the in-flight attempt before releasing resources.
	pub async fn stop(&self, key: &IdentityKey) {
		let session = self.sessions.lock().remove(key);
		if let Some(session) = session {
			session.stop().await;
		}
	}

	/// Stop every session and clear the table.
	pub async fn shutdown_all(&self) {
		let sessions: Vec<Arc<Session>> = {
			let mut table = self.sessions.lock();
			table.drain().map(|(_, s)| s).collect()
		};
		for session in sessions {
			session.stop().await;
		}
	}

	/// Restart the session for `key` with freshly computed configuration.
	///
	/// External collaborators call this when the active interpreter or a
	/// project's effective interpreter changes. A session still activating
	/// is skipped: a restart fired during that window would interrupt the
	/// very startup that is already applying the new configuration.
	pub fn on_configuration_changed(self: &Arc<Self>, key: &IdentityKey) {
		let Some(session) = self.find(key) else {
			return;
		};
		if session.state() == SessionState::Activating {
			tracing::debug!(key = %key, "session is activating; suppressing restart");
			return;
		}

		tracing::info!(key = %key, "configuration changed; restarting session");
		let sources = session.sources();
		let this = self.clone();
		let key = key.clone();
		tokio::spawn(async move {
			this.stop(&key).await;
			this.ensure(key, move || sources);
		});
	}

	/// Restart `key` only if re-resolving its sources yields a different
	/// configuration than the one it activated with.
	fn restart_if_config_changed(self: &Arc<Self>, key: &IdentityKey) {
		let Some(session) = self.find(key) else {
			return;
		};
		if session.state() == SessionState::Activating {
			return;
		}

		let resolved = resolve_scope_config(&session.sources());
		if resolved == session.snapshot() {
			return;
		}
		self.on_configuration_changed(key);
	}

	fn spawn_start(self: &Arc<Self>, session: Arc<Session>) {
		let this = Arc::downgrade(self);
		tokio::spawn(async move {
			let outcome = session.run_start().await;
			let Some(registry) = this.upgrade() else {
				return;
			};
			match outcome {
				StartOutcome::Initialized => registry.watch_transport(&session),
				StartOutcome::Failed => registry.discard_failed(&session),
				// A quiet no-op keeps its reservation: a later configuration
				// change restarts it through the same resolution path.
				StartOutcome::NoInterpreter | StartOutcome::Cancelled => {}
			}
		});
	}

	/// Remove a failed reservation so a later `ensure` can attempt a fresh
	/// process. Only removes the entry if it still maps to this session.
	fn discard_failed(&self, session: &Arc<Session>) {
		let mut table = self.sessions.lock();
		if let Some(current) = table.get(session.key())
			&& Arc::ptr_eq(current, session)
		{
			table.remove(session.key());
			tracing::warn!(key = %session.key(), "session failed to initialize; entry discarded");
		}
	}

	/// Observe the transport ending (server exit or crash) and clean up.
	///
	/// Not part of the session's subscription set: the task terminates on
	/// its own once the token fires, and every stop path fires it.
	fn watch_transport(self: &Arc<Self>, session: &Arc<Session>) {
		let Some(closed) = session.closed_token() else {
			return;
		};
		let this = Arc::downgrade(self);
		let session_for_task = session.clone();
		tokio::spawn(async move {
			closed.cancelled().await;
			let Some(registry) = this.upgrade() else {
				return;
			};
			{
				let mut table = registry.sessions.lock();
				if let Some(current) = table.get(session_for_task.key())
					&& Arc::ptr_eq(current, &session_for_task)
				{
					table.remove(session_for_task.key());
					tracing::warn!(key = %session_for_task.key(), "analysis server exited; removed from registry");
				}
			}
			session_for_task.stop().await;
		});
	}

	/// Subscribe the session to configuration-change events. The listener
	/// task lives in the session's subscription set and is aborted on
	/// `stop`, whichever exit path triggered it.
	fn attach_config_listener(self: &Arc<Self>, session: &Arc<Session>) {
		let project_names: Vec<String> = session
			.sources()
			.iter()
			.filter_map(|source| match source {
				ScopeSource::Project(project) => Some(project.display_name()),
				_ => None,
			})
			.collect();
		let has_workspace_source = session
			.sources()
			.iter()
			.any(|source| matches!(source, ScopeSource::Workspace(_)));

		let this = Arc::downgrade(self);
		let key = session.key().clone();
		let mut rx = self.events.subscribe();
		let handle = tokio::spawn(async move {
			loop {
				let event = match rx.recv().await {
					Ok(event) => event,
					Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
					Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
				};
				let Some(registry) = this.upgrade() else {
					break;
				};
				match event {
					ConfigEvent::DefaultInterpreterChanged => {
						registry.restart_if_config_changed(&key);
					}
					ConfigEvent::ActiveWorkspaceChanged => {
						if has_workspace_source {
							registry.restart_if_config_changed(&key);
						}
					}
					ConfigEvent::ProjectRestartRequested { ref project } => {
						if project_names.iter().any(|name| name == project) {
							registry.on_configuration_changed(&key);
						}
					}
				}
			}
		});
		session.install_subscription(handle);
	}
}

impl std::fmt::Debug for SessionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRegistry")
			.field("active", &self.active_count())
			.finish_non_exhaustive()
	}
}
