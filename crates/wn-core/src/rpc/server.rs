//! Line-delimited JSON-RPC server.
//!
//! Reads one message per line from the inbound channel and dispatches each
//! in arrival order. Dispatch does not hold up the read loop: responses are
//! written in completion order, which lets an `abort` land while an `input`
//! turn is still in flight. Serializing the actual work is the handler's
//! business.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;

use crate::errors::AgentError;
use crate::rpc::protocol::{
    decode_incoming, encode_error, encode_notification, encode_response, RpcDecodeError,
    RpcIncoming, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};

/// Dispatch target for both requests and notifications.
///
/// Returning [`AgentError::MethodNotFound`] produces a `-32601` response;
/// any other error becomes `-32603` with the error's message.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, AgentError>;
}

pub struct RpcServer {
    handler: Arc<dyn RpcHandler>,
    out: mpsc::UnboundedSender<String>,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl RpcServer {
    pub fn new(handler: Arc<dyn RpcHandler>, out: mpsc::UnboundedSender<String>) -> Self {
        Self {
            handler,
            out,
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// Read lines until the input ends or [`RpcServer::stop`] is called.
    /// The stopped flag resets on entry, so `start` may be called again.
    /// Dispatches still in flight at loop end are drained before returning.
    pub async fn start(&self, lines: &mut mpsc::Receiver<String>) {
        self.stopped.store(false, Ordering::SeqCst);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let line = tokio::select! {
                _ = self.stop_notify.notified() => continue,
                line = lines.recv() => line,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            match decode_incoming(&line) {
                Err(RpcDecodeError::Parse) => {
                    self.write(encode_error(None, PARSE_ERROR, "Parse error"));
                }
                Err(RpcDecodeError::Invalid(reason)) => {
                    self.write(encode_error(
                        None,
                        INVALID_REQUEST,
                        &format!("Invalid Request: {}", reason),
                    ));
                }
                Ok(RpcIncoming::Request { id, method, params }) => {
                    let handler = self.handler.clone();
                    let out = self.out.clone();
                    in_flight.spawn(async move {
                        let line = match handler.handle(&method, params).await {
                            Ok(result) => encode_response(&id, &result),
                            Err(AgentError::MethodNotFound(method)) => encode_error(
                                Some(&id),
                                METHOD_NOT_FOUND,
                                &format!("Method not found: {}", method),
                            ),
                            Err(e @ AgentError::InvalidParams(_)) => {
                                encode_error(Some(&id), INVALID_PARAMS, &e.to_string())
                            }
                            Err(e) => encode_error(Some(&id), INTERNAL_ERROR, &e.to_string()),
                        };
                        let _ = out.send(line);
                    });
                }
                Ok(RpcIncoming::Notification { method, params }) => {
                    let handler = self.handler.clone();
                    let out = self.out.clone();
                    in_flight.spawn(async move {
                        if let Err(e) = handler.handle(&method, params).await {
                            // Notification errors go out as a warning; they
                            // never terminate the read loop.
                            let _ = out.send(encode_notification(
                                "log",
                                Some(&serde_json::json!({
                                    "level": "warn",
                                    "message": format!(
                                        "notification '{}' failed: {}",
                                        method, e
                                    ),
                                })),
                            ));
                        }
                    });
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    /// Write a server-initiated notification immediately.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        self.write(encode_notification(method, params.as_ref()));
    }

    /// Resolve the pending read and make `start` return.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_one();
    }

    fn write(&self, line: String) {
        // The receiver dropping means the client is gone; nothing to do.
        let _ = self.out.send(line);
    }
}
