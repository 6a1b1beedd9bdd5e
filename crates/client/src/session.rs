//! One supervised analysis-server instance bound to one identity key.
//!
//! A session moves through `Created → Activating → Initialized` on the
//! success path, `Created → Activating → Failed` when the transport or the
//! handshake fails, and from any state to the terminal `Stopped`. The
//! registry drives the start sequence; callers needing an initialized
//! session await [`Session::wait_ready`] instead of assuming `ensure`
//! completed synchronously.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::options::{DisplayOptions, build_initialization_options};
use crate::scope::{IdentityKey, ResolvedInterpreter, ScopeSource, resolve_scope_config};
use crate::transport::{RpcChannel, ServerTransport, TransportLauncher};
use crate::{Error, Result, uri_from_path};

/// Method name for the fire-and-forget custom notification.
const CUSTOM_NOTIFICATION_METHOD: &str = "OnCustomNotification";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Identity key and configuration sources known; no process yet.
	Created,
	/// Transport requested and protocol handshake in flight.
	Activating,
	/// Handshake acknowledged; custom messages may be forwarded.
	Initialized,
	/// Transport creation or handshake failed. Terminal; the registry
	/// discards the entry so a later `ensure` can retry.
	Failed,
	/// Transport terminated and resources released. Terminal.
	Stopped,
}

/// Outcome of one start attempt, consumed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
	/// Handshake acknowledged.
	Initialized,
	/// No configuration source yielded a usable interpreter; quiet no-op.
	NoInterpreter,
	/// Transport or handshake failure.
	Failed,
	/// `stop` raced the start and won.
	Cancelled,
}

/// Tunables applied to every session a registry creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
	/// Tooltip display options forwarded in the initialization payload.
	#[serde(default)]
	pub display_options: DisplayOptions,
	/// Enables verbose server-side logging.
	#[serde(default)]
	pub trace_logging: bool,
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self {
			display_options: DisplayOptions::default(),
			trace_logging: false,
		}
	}
}

/// Reversible set of background listener tasks owned by a session.
///
/// Every task registered here is aborted exactly once on `stop`, whichever
/// exit path triggered it, so repeated restarts cannot leak callbacks.
#[derive(Default)]
pub(crate) struct SubscriptionSet {
	handles: Vec<JoinHandle<()>>,
}

impl SubscriptionSet {
	pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
		self.handles.push(handle);
	}

	pub(crate) fn abort_all(&mut self) {
		for handle in self.handles.drain(..) {
			handle.abort();
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.handles.len()
	}
}

impl Drop for SubscriptionSet {
	fn drop(&mut self) {
		self.abort_all();
	}
}

struct SessionInner {
	transport: Option<ServerTransport>,
	snapshot: Option<ResolvedInterpreter>,
	subscriptions: SubscriptionSet,
}

/// One running (or starting, or stopped) analysis server.
pub struct Session {
	key: IdentityKey,
	sources: Vec<ScopeSource>,
	settings: SessionSettings,
	launcher: Arc<dyn TransportLauncher>,
	state_tx: watch::Sender<SessionState>,
	cancel: CancellationToken,
	inner: Mutex<SessionInner>,
}

impl Session {
	pub(crate) fn new(
		key: IdentityKey,
		sources: Vec<ScopeSource>,
		settings: SessionSettings,
		launcher: Arc<dyn TransportLauncher>,
	) -> Arc<Self> {
		let (state_tx, _) = watch::channel(SessionState::Created);
		Arc::new(Self {
			key,
			sources,
			settings,
			launcher,
			state_tx,
			cancel: CancellationToken::new(),
			inner: Mutex::new(SessionInner {
				transport: None,
				snapshot: None,
				subscriptions: SubscriptionSet::default(),
			}),
		})
	}

	/// The identity key this session is registered under.
	pub fn key(&self) -> &IdentityKey {
		&self.key
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		*self.state_tx.borrow()
	}

	/// Subscribe to state transitions.
	pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
		self.state_tx.subscribe()
	}

	/// The configuration snapshot the session activated with, if it did.
	pub fn snapshot(&self) -> Option<ResolvedInterpreter> {
		self.inner.lock().snapshot.clone()
	}

	/// Priority-ordered configuration sources recorded at creation.
	pub fn sources(&self) -> Vec<ScopeSource> {
		self.sources.clone()
	}

	fn set_state(&self, state: SessionState) {
		// send_replace updates the value even when no receiver is live;
		// state must track the session whether or not anyone is watching.
		self.state_tx.send_replace(state);
	}

	/// Wait until the session is initialized.
	///
	/// Returns `Err(Error::SessionStopped)` if the session fails or stops
	/// before reaching `Initialized`. A session whose activation was a quiet
	/// no-op stays `Created`, so callers of this method should only await it
	/// for sessions they expect to activate.
	pub async fn wait_ready(&self) -> Result<()> {
		let mut rx = self.state_tx.subscribe();
		loop {
			// Copy the state out so the watch::Ref is released before the
			// receiver is polled again.
			let state = *rx.borrow();
			match state {
				SessionState::Initialized => return Ok(()),
				SessionState::Failed | SessionState::Stopped => return Err(Error::SessionStopped),
				SessionState::Created | SessionState::Activating => {
					if rx.changed().await.is_err() {
						return Err(Error::SessionStopped);
					}
				}
			}
		}
	}

	fn channel(&self) -> Result<RpcChannel> {
		if self.state() != SessionState::Initialized {
			return Err(Error::ChannelNotAttached);
		}
		let inner = self.inner.lock();
		inner
			.transport
			.as_ref()
			.map(|t| t.channel.clone())
			.ok_or(Error::ChannelNotAttached)
	}

	/// Forward an application-defined notification to the server.
	///
	/// Fails with [`Error::ChannelNotAttached`] before the handshake
	/// completes; that is a caller contract violation, not a server fault.
	pub fn send_custom_notification(&self, payload: JsonValue) -> Result<()> {
		self.channel()?.notify(CUSTOM_NOTIFICATION_METHOD, payload)
	}

	/// Forward an application-defined request and await its response.
	pub async fn send_custom_request(&self, method: &str, payload: JsonValue) -> Result<JsonValue> {
		self.channel()?.request(method, payload).await
	}

	/// Token observing transport closure, once a transport is attached.
	pub(crate) fn closed_token(&self) -> Option<CancellationToken> {
		self.inner.lock().transport.as_ref().map(|t| t.closed.clone())
	}

	pub(crate) fn install_subscription(&self, handle: JoinHandle<()>) {
		self.inner.lock().subscriptions.push(handle);
	}

	/// Drive the full start sequence: resolve configuration, launch the
	/// transport, perform the handshake. Run by the registry outside its
	/// table lock.
	pub(crate) async fn run_start(self: &Arc<Self>) -> StartOutcome {
		// Consult the recorded scope sources in priority order. Nothing
		// usable is a quiet no-op: the document may have no resolvable
		// interpreter yet.
		let Some(resolved) = resolve_scope_config(&self.sources) else {
			tracing::debug!(key = %self.key, "no usable interpreter; session not activated");
			return StartOutcome::NoInterpreter;
		};

		// A stop that finished before this task first ran already made the
		// session terminal; it must not re-enter Activating.
		if self.cancel.is_cancelled() {
			self.set_state(SessionState::Stopped);
			return StartOutcome::Cancelled;
		}

		self.set_state(SessionState::Activating);
		tracing::info!(
			key = %self.key,
			interpreter = %resolved.interpreter.path.display(),
			version = %resolved.interpreter.version,
			origin = ?resolved.origin,
			"activating analysis session"
		);

		let mut transport = tokio::select! {
			_ = self.cancel.cancelled() => {
				self.set_state(SessionState::Stopped);
				return StartOutcome::Cancelled;
			}
			res = self.launcher.launch(&self.key) => match res {
				Ok(t) => t,
				Err(e) => {
					tracing::warn!(key = %self.key, error = %e, "transport launch failed");
					self.set_state(SessionState::Failed);
					return StartOutcome::Failed;
				}
			},
		};

		// The payload is rebuilt on every (re)start; configuration may have
		// changed since the previous instance under this key.
		let options = build_initialization_options(
			&resolved,
			&transport.paths.database_path,
			&transport.paths.typeshed_path,
			self.settings.display_options.clone(),
			self.settings.trace_logging,
		);

		let handshake = handshake(&transport.channel, &options, &resolved);
		let result = tokio::select! {
			_ = self.cancel.cancelled() => {
				transport.shutdown().await;
				self.set_state(SessionState::Stopped);
				return StartOutcome::Cancelled;
			}
			res = handshake => res,
		};

		if let Err(e) = result {
			tracing::warn!(key = %self.key, error = %e, "initialize handshake failed");
			transport.shutdown().await;
			self.set_state(SessionState::Failed);
			return StartOutcome::Failed;
		}

		// A stop that raced the handshake must win; a late success must not
		// resurrect a removed registry entry. The cancel re-check and the
		// install share one critical section with `stop`'s transport take,
		// and `stop` cancels before locking, so whichever side locks second
		// observes the other's effect.
		let cancelled = {
			let mut inner = self.inner.lock();
			if self.cancel.is_cancelled() {
				Some(transport)
			} else {
				inner.snapshot = Some(resolved);
				inner.transport = Some(transport);
				self.set_state(SessionState::Initialized);
				None
			}
		};
		if let Some(mut transport) = cancelled {
			transport.shutdown().await;
			self.set_state(SessionState::Stopped);
			return StartOutcome::Cancelled;
		}

		tracing::info!(key = %self.key, "analysis session initialized");
		StartOutcome::Initialized
	}

	/// Terminate the transport, release the channel, and tear down all
	/// event subscriptions. Idempotent; also cancels an in-flight start.
	pub async fn stop(&self) {
		self.cancel.cancel();

		let transport = {
			let mut inner = self.inner.lock();
			inner.subscriptions.abort_all();
			inner.transport.take()
		};
		if let Some(mut transport) = transport {
			transport.shutdown().await;
		}

		if self.state() != SessionState::Stopped {
			tracing::info!(key = %self.key, "analysis session stopped");
		}
		self.set_state(SessionState::Stopped);
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("key", &self.key)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

/// Send `initialize` with the payload and confirm with `initialized`.
async fn handshake(
	channel: &RpcChannel,
	options: &crate::options::InitializationOptions,
	resolved: &ResolvedInterpreter,
) -> Result<()> {
	let root_uri = resolved
		.root_override
		.as_deref()
		.and_then(|p| uri_from_path(p).ok());

	#[allow(
		deprecated,
		reason = "root_uri field deprecated but required by some servers"
	)]
	let params = lsp_types::InitializeParams {
		process_id: Some(std::process::id()),
		root_uri: root_uri.clone(),
		workspace_folders: root_uri.map(|uri| {
			vec![lsp_types::WorkspaceFolder {
				name: uri
					.as_str()
					.rsplit('/')
					.next()
					.unwrap_or_default()
					.to_string(),
				uri,
			}]
		}),
		initialization_options: Some(serde_json::to_value(options)?),
		capabilities: lsp_types::ClientCapabilities::default(),
		client_info: Some(lsp_types::ClientInfo {
			name: String::from("pyanalysis"),
			version: Some(String::from(env!("CARGO_PKG_VERSION"))),
		}),
		..Default::default()
	};

	let raw = channel.request("initialize", serde_json::to_value(params)?).await?;
	// The capabilities themselves are not consumed here, but an undecodable
	// acknowledgement means the handshake did not succeed.
	let _: lsp_types::InitializeResult = serde_json::from_value(raw)?;

	channel.notify(
		"initialized",
		serde_json::to_value(lsp_types::InitializedParams {})?,
	)?;
	Ok(())
}
