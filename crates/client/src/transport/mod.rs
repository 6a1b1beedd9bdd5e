//! Child-process transport for the analysis server.
//!
//! The launcher resolves a server binary, spawns it with redirected
//! stdin/stdout, and hands back a [`ServerTransport`]: an [`RpcChannel`] for
//! JSON-RPC traffic plus the process supervision handles. The registry and
//! session layers only see the [`TransportLauncher`] trait, so tests can
//! substitute an in-memory transport.

mod channel;
mod io;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use channel::RpcChannel;
pub(crate) use channel::Outbound;

use crate::scope::IdentityKey;
use crate::{Error, Result};

/// Base name of the analysis server binary.
const SERVER_NAME: &str = "pyanalysis-server";
/// Runtime host used when only the hosted module is present.
const RUNTIME_HOST: &str = "dotnet";

/// Resolved command line for starting the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStartInfo {
	/// Program to execute.
	pub program: PathBuf,
	/// Arguments to pass.
	pub args: Vec<String>,
	/// Working directory; also the analysis database path.
	pub working_dir: PathBuf,
}

impl ServerStartInfo {
	/// Resolve the server binary inside `server_dir`.
	///
	/// Prefers the native executable; falls back to the runtime-hosted
	/// module when a host runtime is available on PATH. Fails fast with
	/// [`Error::TransportUnavailable`] when neither is found.
	pub fn resolve(server_dir: &Path) -> Result<Self> {
		let exe_name = if cfg!(windows) {
			format!("{SERVER_NAME}.exe")
		} else {
			SERVER_NAME.to_string()
		};
		let exe_path = server_dir.join(exe_name);
		if exe_path.is_file() {
			return Ok(Self {
				program: exe_path,
				args: Vec::new(),
				working_dir: server_dir.to_path_buf(),
			});
		}

		let module_path = server_dir.join(format!("{SERVER_NAME}.dll"));
		if module_path.is_file()
			&& let Ok(host) = which::which(RUNTIME_HOST)
		{
			return Ok(Self {
				program: host,
				args: vec![module_path.to_string_lossy().into_owned()],
				working_dir: server_dir.to_path_buf(),
			});
		}

		Err(Error::TransportUnavailable {
			dir: server_dir.to_path_buf(),
		})
	}
}

/// Paths the server derives from its install location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
	/// Directory the server stores its analysis database in.
	pub database_path: PathBuf,
	/// Bundled type-stub directory.
	pub typeshed_path: PathBuf,
}

impl ServerPaths {
	/// Paths for a server installed in `server_dir`.
	pub fn for_dir(server_dir: &Path) -> Self {
		Self {
			database_path: server_dir.to_path_buf(),
			typeshed_path: server_dir.join("Typeshed"),
		}
	}
}

/// A live duplex connection to one server process.
pub struct ServerTransport {
	/// JSON-RPC channel over the child's stdio.
	pub channel: RpcChannel,
	/// Install-derived paths for the initialization payload.
	pub paths: ServerPaths,
	/// Cancelled by the I/O task when the connection ends for any reason.
	pub closed: CancellationToken,
	child: Option<Child>,
	io_task: Option<JoinHandle<()>>,
}

impl ServerTransport {
	/// Transport with no child process; the I/O task is the whole peer.
	#[cfg(test)]
	pub(crate) fn detached(channel: RpcChannel, paths: ServerPaths, closed: CancellationToken, io_task: JoinHandle<()>) -> Self {
		Self { channel, paths, closed, child: None, io_task: Some(io_task) }
	}

	/// Terminate the process and release the channel. Idempotent.
	pub async fn shutdown(&mut self) {
		if let Some(task) = self.io_task.take() {
			task.abort();
		}
		if let Some(mut child) = self.child.take() {
			// Best-effort kill, then wait a bit so the pid is reaped.
			let _ = child.start_kill();
			let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
		}
		self.closed.cancel();
	}
}

/// Spawns a transport for a session.
#[async_trait]
pub trait TransportLauncher: Send + Sync {
	/// Start a server process for `key` and return its transport.
	async fn launch(&self, key: &IdentityKey) -> Result<ServerTransport>;
}

/// Launcher that spawns the analysis server from a local install directory.
pub struct LocalLauncher {
	server_dir: PathBuf,
	request_timeout: Duration,
}

impl LocalLauncher {
	/// Create a launcher for a server installed in `server_dir`.
	pub fn new(server_dir: impl Into<PathBuf>) -> Self {
		Self {
			server_dir: server_dir.into(),
			request_timeout: Duration::from_secs(30),
		}
	}

	/// Override the per-request timeout applied to the channel.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}
}

#[async_trait]
impl TransportLauncher for LocalLauncher {
	async fn launch(&self, key: &IdentityKey) -> Result<ServerTransport> {
		let info = ServerStartInfo::resolve(&self.server_dir)?;

		tracing::info!(key = %key, program = %info.program.display(), "starting analysis server");

		let mut cmd = Command::new(&info.program);
		cmd.args(&info.args)
			.current_dir(&info.working_dir)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|e| Error::Spawn {
			program: info.program.clone(),
			reason: e.to_string(),
		})?;

		let stdin = child.stdin.take().ok_or_else(|| Error::Spawn {
			program: info.program.clone(),
			reason: "failed to capture stdin".into(),
		})?;
		let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
			program: info.program.clone(),
			reason: "failed to capture stdout".into(),
		})?;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
		let closed = CancellationToken::new();
		let io_task = tokio::spawn(io::run_server_io(
			key.to_string(),
			stdin,
			stdout,
			outbound_rx,
			closed.clone(),
		));

		Ok(ServerTransport {
			channel: RpcChannel::new(outbound_tx, self.request_timeout),
			paths: ServerPaths::for_dir(&self.server_dir),
			closed,
			child: Some(child),
			io_task: Some(io_task),
		})
	}
}
