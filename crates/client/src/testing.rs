//! Shared fixtures for unit tests: canned scopes and an in-memory launcher.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::host::{Interpreter, InterpreterService, ProjectScope, ReplScope, WorkspaceScope};
use crate::scope::IdentityKey;
use crate::transport::{
	Outbound, RpcChannel, ServerPaths, ServerTransport, TransportLauncher,
};
use crate::types::AnyResponse;
use crate::{Error, Result};

/// Send test logs through tracing when `RUST_LOG` asks for them.
pub(crate) fn init_tracing() {
	use tracing_subscriber::EnvFilter;
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub(crate) struct FixedRepl {
	interpreter: Interpreter,
	search_paths: Vec<PathBuf>,
}

impl FixedRepl {
	pub(crate) fn new(path: &str, version: &str) -> Self {
		Self {
			interpreter: Interpreter::new(path, version),
			search_paths: Vec::new(),
		}
	}
}

impl ReplScope for FixedRepl {
	fn interpreter(&self) -> Option<Interpreter> {
		Some(self.interpreter.clone())
	}

	fn search_paths(&self) -> Vec<PathBuf> {
		self.search_paths.clone()
	}
}

pub(crate) struct FixedProject {
	name: String,
	pub(crate) interpreter: Option<Interpreter>,
	search_paths: Vec<PathBuf>,
	root: Option<PathBuf>,
}

impl FixedProject {
	pub(crate) fn new(name: &str, path: &str, version: &str) -> Self {
		Self {
			name: name.to_owned(),
			interpreter: Some(Interpreter::new(path, version)),
			search_paths: Vec::new(),
			root: None,
		}
	}

	pub(crate) fn with_search_paths<I, P>(mut self, paths: I) -> Self
	where
		I: IntoIterator<Item = P>,
		P: Into<PathBuf>,
	{
		self.search_paths = paths.into_iter().map(Into::into).collect();
		self
	}

	pub(crate) fn with_root(mut self, root: &str) -> Self {
		self.root = Some(PathBuf::from(root));
		self
	}
}

impl ProjectScope for FixedProject {
	fn display_name(&self) -> String {
		self.name.clone()
	}

	fn active_interpreter(&self) -> Option<Interpreter> {
		self.interpreter.clone()
	}

	fn absolute_search_paths(&self) -> Vec<PathBuf> {
		self.search_paths.clone()
	}

	fn root_path(&self) -> Option<PathBuf> {
		self.root.clone()
	}
}

pub(crate) struct FixedWorkspace {
	name: String,
	interpreter: Option<Interpreter>,
	location: Option<PathBuf>,
}

impl FixedWorkspace {
	pub(crate) fn new(name: &str, path: &str, version: &str) -> Self {
		Self {
			name: name.to_owned(),
			interpreter: Some(Interpreter::new(path, version)),
			location: None,
		}
	}
}

impl WorkspaceScope for FixedWorkspace {
	fn display_name(&self) -> String {
		self.name.clone()
	}

	fn interpreter(&self) -> Option<Interpreter> {
		self.interpreter.clone()
	}

	fn absolute_search_paths(&self) -> Vec<PathBuf> {
		Vec::new()
	}

	fn location(&self) -> Option<PathBuf> {
		self.location.clone()
	}
}

pub(crate) struct FixedDefault {
	interpreter: Option<Interpreter>,
}

impl FixedDefault {
	pub(crate) fn new(path: &str, version: &str) -> Self {
		Self {
			interpreter: Some(Interpreter::new(path, version)),
		}
	}

	pub(crate) fn none() -> Self {
		Self { interpreter: None }
	}
}

impl InterpreterService for FixedDefault {
	fn default_interpreter(&self) -> Option<Interpreter> {
		self.interpreter.clone()
	}
}

/// Interpreter service whose default can be swapped mid-test.
pub(crate) struct SwitchableDefault {
	interpreter: Mutex<Option<Interpreter>>,
}

impl SwitchableDefault {
	pub(crate) fn new(path: &str, version: &str) -> Self {
		Self {
			interpreter: Mutex::new(Some(Interpreter::new(path, version))),
		}
	}

	pub(crate) fn set(&self, path: &str, version: &str) {
		*self.interpreter.lock() = Some(Interpreter::new(path, version));
	}
}

impl InterpreterService for SwitchableDefault {
	fn default_interpreter(&self) -> Option<Interpreter> {
		self.interpreter.lock().clone()
	}
}

/// Launcher that connects sessions to an in-memory echo server.
///
/// The fake server acknowledges `initialize` with an empty result and echoes
/// the params of any other request, which is enough to drive the full
/// handshake without a child process.
#[derive(Default)]
pub(crate) struct MockLauncher {
	launches: AtomicUsize,
	fail: bool,
	gate: Option<Arc<Notify>>,
	last_closed: Mutex<Option<CancellationToken>>,
}

impl MockLauncher {
	pub(crate) fn failing() -> Self {
		Self {
			fail: true,
			..Self::default()
		}
	}

	/// Hold every launch until [`Notify::notify_one`] fires on the gate.
	pub(crate) fn gated() -> (Self, Arc<Notify>) {
		let gate = Arc::new(Notify::new());
		let launcher = Self {
			gate: Some(gate.clone()),
			..Self::default()
		};
		(launcher, gate)
	}

	pub(crate) fn launches(&self) -> usize {
		self.launches.load(Ordering::SeqCst)
	}

	/// Closed-token of the most recent transport, to simulate server exit.
	pub(crate) fn last_closed(&self) -> Option<CancellationToken> {
		self.last_closed.lock().clone()
	}
}

#[async_trait]
impl TransportLauncher for MockLauncher {
	async fn launch(&self, _key: &IdentityKey) -> Result<ServerTransport> {
		if let Some(gate) = &self.gate {
			gate.notified().await;
		}
		self.launches.fetch_add(1, Ordering::SeqCst);
		if self.fail {
			return Err(Error::Spawn {
				program: PathBuf::from("mock"),
				reason: "forced failure".into(),
			});
		}

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let closed = CancellationToken::new();
		*self.last_closed.lock() = Some(closed.clone());
		let io_task = tokio::spawn(run_echo_server(outbound_rx, closed.clone()));
		Ok(ServerTransport::detached(
			RpcChannel::new(outbound_tx, Duration::from_secs(5)),
			ServerPaths::for_dir(std::path::Path::new("/tmp/mock-server")),
			closed,
			io_task,
		))
	}
}

async fn run_echo_server(
	mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
	closed: CancellationToken,
) {
	while let Some(outbound) = outbound_rx.recv().await {
		if let Outbound::Request { pending } = outbound {
			let result = match pending.request.method.as_str() {
				"initialize" => serde_json::json!({ "capabilities": {} }),
				_ => pending.request.params.clone(),
			};
			let _ = pending.response_tx.send(Ok(AnyResponse {
				id: pending.request.id,
				result: Some(result),
				error: None,
			}));
		}
	}
	closed.cancel();
}

/// Await a condition, polling, with an overall deadline.
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while !condition() {
		if tokio::time::Instant::now() > deadline {
			panic!("condition not met within deadline");
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}
