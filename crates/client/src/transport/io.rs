//! Per-process I/O task: ordered outbound writes and framed inbound reads.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::Outbound;
use crate::types::{AnyResponse, ErrorCode, Message, RequestId, ResponseError};
use crate::{Error, Result};

/// Runs the I/O loop for a single server process until EOF, a write failure,
/// or channel closure. Cancels `closed` on the way out so the owning session
/// can observe the transport ending.
///
/// Reading runs in its own task; the loop below only polls channel receives,
/// which are safe to abandon mid-poll, so no frame is ever half-read.
pub(super) async fn run_server_io(
	label: String,
	mut stdin: tokio::process::ChildStdin,
	stdout: tokio::process::ChildStdout,
	mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
	closed: CancellationToken,
) {
	let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<JsonValue>();
	let reader_label = label.clone();
	let reader_task = tokio::spawn(async move {
		let mut reader = BufReader::new(stdout);
		let mut buf = String::new();
		loop {
			match read_frame(&mut reader, &mut buf).await {
				Ok(Some(value)) => {
					if inbound_tx.send(value).is_err() {
						break;
					}
				}
				Ok(None) => {
					tracing::info!(session = %reader_label, "analysis server closed the connection");
					break;
				}
				Err(e) => {
					tracing::error!(session = %reader_label, error = %e, "error reading from analysis server");
					break;
				}
			}
		}
	});

	let mut pending: HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>> = HashMap::new();

	loop {
		tokio::select! {
			// All outbound messages pass through one queue for total ordering.
			out = outbound_rx.recv() => {
				let Some(out) = out else {
					break;
				};
				let write_res = match out {
					Outbound::Notify { notif } => {
						write_frame(&mut stdin, &serde_json::json!({
							"jsonrpc": "2.0",
							"method": notif.method,
							"params": notif.params,
						})).await
					}
					Outbound::Request { pending: pending_req } => {
						let req_id = pending_req.request.id.clone();
						let res = write_frame(&mut stdin, &serde_json::json!({
							"jsonrpc": "2.0",
							"id": pending_req.request.id,
							"method": pending_req.request.method,
							"params": pending_req.request.params,
						})).await;
						match res {
							Ok(()) => {
								pending.insert(req_id, pending_req.response_tx);
								Ok(())
							}
							Err(e) => {
								let _ = pending_req.response_tx.send(Err(Error::ChannelClosed));
								Err(e)
							}
						}
					}
					Outbound::Reply { id, resp } => {
						let obj = match resp {
							Ok(result) => serde_json::json!({
								"jsonrpc": "2.0",
								"id": id,
								"result": result,
							}),
							Err(err) => serde_json::json!({
								"jsonrpc": "2.0",
								"id": id,
								"error": err,
							}),
						};
						write_frame(&mut stdin, &obj).await
					}
				};

				if let Err(e) = write_res {
					tracing::error!(session = %label, error = %e, "outbound write failed; terminating transport");
					break;
				}
			}

			inbound = inbound_rx.recv() => {
				let Some(value) = inbound else {
					// Reader ended: EOF or read error.
					break;
				};
				if let Some(reply) = handle_inbound(&label, value, &mut pending)
					&& let Err(e) = write_frame(&mut stdin, &reply).await
				{
					tracing::error!(session = %label, error = %e, "failed to answer server request");
					break;
				}
			}
		}
	}

	reader_task.abort();

	// Fail anything still waiting so callers don't hang.
	for (_, tx) in pending {
		let _ = tx.send(Err(Error::ChannelClosed));
	}
	while let Ok(out) = outbound_rx.try_recv() {
		if let Outbound::Request { pending: p } = out {
			let _ = p.response_tx.send(Err(Error::ChannelClosed));
		}
	}

	closed.cancel();
}

/// Dispatch one inbound message; returns a reply frame when the server sent
/// a request this core does not handle.
fn handle_inbound(
	label: &str,
	value: JsonValue,
	pending: &mut HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>>,
) -> Option<JsonValue> {
	match Message::classify(value) {
		Some(Message::Response(resp)) => {
			if let Some(tx) = pending.remove(&resp.id) {
				let _ = tx.send(Ok(resp));
			} else {
				tracing::debug!(session = %label, id = %resp.id, "response for unknown request");
			}
			None
		}
		Some(Message::Notification(notif)) => {
			// Server-initiated notifications carry no session semantics here.
			tracing::debug!(session = %label, method = %notif.method, "server notification");
			None
		}
		Some(Message::Request(req)) => {
			// Server-initiated requests are outside this core's contract;
			// answer so the server is not left waiting.
			tracing::debug!(session = %label, method = %req.method, "unsupported server request");
			let err = ResponseError::new(
				ErrorCode::MethodNotFound,
				format!("unsupported method: {}", req.method),
			);
			Some(serde_json::json!({
				"jsonrpc": "2.0",
				"id": req.id,
				"error": err,
			}))
		}
		None => {
			tracing::warn!(session = %label, "undecodable message from server");
			None
		}
	}
}

/// Writes one `Content-Length`-framed JSON value.
async fn write_frame(stdin: &mut tokio::process::ChildStdin, value: &JsonValue) -> Result<()> {
	let json = serde_json::to_string(value)?;
	let msg = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
	stdin.write_all(msg.as_bytes()).await?;
	stdin.flush().await?;
	Ok(())
}

/// Reads one `Content-Length`-framed JSON value; `None` on EOF.
async fn read_frame(
	reader: &mut BufReader<tokio::process::ChildStdout>,
	buf: &mut String,
) -> Result<Option<JsonValue>> {
	let mut content_length: Option<usize> = None;
	loop {
		buf.clear();
		let bytes_read = reader.read_line(buf).await?;
		if bytes_read == 0 {
			return Ok(None);
		}

		let line = buf.trim();
		if line.is_empty() {
			break;
		}

		if let Some(len_str) = line.strip_prefix("Content-Length: ") {
			content_length = len_str.parse().ok();
		}
	}

	let length = content_length.ok_or_else(|| Error::Protocol("missing Content-Length".into()))?;

	let mut body = vec![0u8; length];
	reader.read_exact(&mut body).await?;

	let json: JsonValue = serde_json::from_slice(&body)?;
	Ok(Some(json))
}
