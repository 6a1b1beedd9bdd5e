//! JSON-RPC channel handle over a server process's stdio.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};

use crate::types::{AnyNotification, AnyRequest, AnyResponse, RequestId, ResponseError};
use crate::{Error, Result};

/// Outbound message envelope; the I/O task writes these in order.
pub(crate) enum Outbound {
	Notify {
		notif: AnyNotification,
	},
	Request {
		pending: PendingRequest,
	},
	Reply {
		id: RequestId,
		resp: std::result::Result<JsonValue, ResponseError>,
	},
}

/// A request awaiting its response.
pub(crate) struct PendingRequest {
	pub(crate) request: AnyRequest,
	pub(crate) response_tx: oneshot::Sender<Result<AnyResponse>>,
}

/// Handle for sending JSON-RPC traffic to one server process.
///
/// Cloneable; all clones feed the same ordered outbound queue. The channel
/// stays usable until the I/O task ends, after which sends fail with
/// [`Error::ChannelClosed`].
#[derive(Clone)]
pub struct RpcChannel {
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	next_id: Arc<AtomicI64>,
	timeout: Duration,
}

impl RpcChannel {
	pub(crate) fn new(outbound_tx: mpsc::UnboundedSender<Outbound>, timeout: Duration) -> Self {
		Self {
			outbound_tx,
			next_id: Arc::new(AtomicI64::new(0)),
			timeout,
		}
	}

	/// Send a request and await the server's response.
	pub async fn request(&self, method: impl Into<String>, params: JsonValue) -> Result<JsonValue> {
		let method = method.into();
		let request = AnyRequest {
			id: RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed)),
			method: method.clone(),
			params,
		};
		let (response_tx, response_rx) = oneshot::channel();
		self.outbound_tx
			.send(Outbound::Request {
				pending: PendingRequest {
					request,
					response_tx,
				},
			})
			.map_err(|_| Error::ChannelClosed)?;

		let resp = if self.timeout.is_zero() {
			response_rx.await.map_err(|_| Error::ChannelClosed)??
		} else {
			match tokio::time::timeout(self.timeout, response_rx).await {
				Ok(resp) => resp.map_err(|_| Error::ChannelClosed)??,
				Err(_) => return Err(Error::RequestTimeout(method)),
			}
		};

		match resp.error {
			None => Ok(resp.result.unwrap_or(JsonValue::Null)),
			Some(err) => Err(Error::Response(err)),
		}
	}

	/// Send a fire-and-forget notification.
	pub fn notify(&self, method: impl Into<String>, params: JsonValue) -> Result<()> {
		self.outbound_tx
			.send(Outbound::Notify {
				notif: AnyNotification {
					method: method.into(),
					params,
				},
			})
			.map_err(|_| Error::ChannelClosed)
	}

	/// Reply to a server-initiated request.
	pub fn reply(
		&self,
		id: RequestId,
		resp: std::result::Result<JsonValue, ResponseError>,
	) -> Result<()> {
		self.outbound_tx
			.send(Outbound::Reply { id, resp })
			.map_err(|_| Error::ChannelClosed)
	}
}

impl std::fmt::Debug for RpcChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RpcChannel")
			.field("closed", &self.outbound_tx.is_closed())
			.finish_non_exhaustive()
	}
}
