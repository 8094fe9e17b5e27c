//! Batch-aware decoding of inbound JSON-RPC payloads.
//!
//! A JSON-RPC body is either a single message or a non-empty array of
//! messages. Decoding failures keep their distinct codes: malformed JSON
//! is a parse error (−32700), an empty batch or a broken envelope is an
//! invalid request (−32600), and params of the wrong shape are invalid
//! params (−32602).

use serde_json::Value;

use super::core::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, RequestId};
use crate::error::{GatewayResult, ProtocolError};

/// An inbound payload: one message or an ordered batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcPayload {
    /// A single JSON-RPC message.
    Single(InboundCall),
    /// A batch of messages, processed in declaration order.
    Batch(Vec<InboundCall>),
}

/// A single decoded element of a payload.
///
/// Requests expect a response; notifications are processed but produce
/// none. Elements that fail validation are kept so the batch response
/// can carry a per-element error in position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCall {
    /// A well-formed request.
    Request(JsonRpcRequest),
    /// A well-formed notification.
    Notification(JsonRpcNotification),
    /// A rejected element, with the error ready for the response slot:
    /// −32600 for a broken envelope, −32602 for misshapen params.
    Invalid {
        /// The id, when one could be salvaged from the element.
        id: Option<RequestId>,
        /// The error the response will carry.
        error: JsonRpcError,
    },
}

impl RpcPayload {
    /// Decode a raw body into a payload.
    ///
    /// Returns `ProtocolError::Parse` when the body is not JSON at all and
    /// `ProtocolError::InvalidRequest` for an empty batch. Individual batch
    /// elements never fail the whole payload.
    pub fn from_slice(body: &[u8]) -> GatewayResult<Self> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ProtocolError::Parse {
                reason: e.to_string(),
            })?;

        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(ProtocolError::InvalidRequest {
                        reason: "batch must contain at least one request".to_string(),
                    }
                    .into());
                }
                Ok(Self::Batch(items.into_iter().map(decode_call).collect()))
            }
            other => Ok(Self::Single(decode_call(other))),
        }
    }

    /// All calls in declaration order, regardless of single/batch shape.
    pub fn calls(&self) -> &[InboundCall] {
        match self {
            Self::Single(call) => std::slice::from_ref(call),
            Self::Batch(calls) => calls,
        }
    }

    /// Whether the payload was a batch on the wire.
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

/// Decode one JSON value into an [`InboundCall`], validating the envelope.
fn decode_call(value: Value) -> InboundCall {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            return InboundCall::Invalid {
                id: None,
                error: JsonRpcError::invalid_request("request must be a JSON object"),
            }
        }
    };

    let id = obj.get("id").and_then(|v| decode_id(v.clone()));

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        Some(other) => {
            return InboundCall::Invalid {
                id,
                error: JsonRpcError::invalid_request(format!(
                    "unsupported jsonrpc version '{other}'"
                )),
            }
        }
        None => {
            return InboundCall::Invalid {
                id,
                error: JsonRpcError::invalid_request("missing jsonrpc version"),
            }
        }
    }

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        Some(_) => {
            return InboundCall::Invalid {
                id,
                error: JsonRpcError::invalid_request("method must be non-empty"),
            }
        }
        None => {
            return InboundCall::Invalid {
                id,
                error: JsonRpcError::invalid_request("missing method"),
            }
        }
    };

    // The envelope itself is sound past this point, so a bad params
    // shape is an invalid-params rejection, not an invalid request.
    if let Some(params) = obj.get("params") {
        if !params.is_object() && !params.is_array() && !params.is_null() {
            return InboundCall::Invalid {
                id,
                error: JsonRpcError::invalid_params("params must be an object or array"),
            };
        }
    }

    let params = obj.get("params").cloned();

    match obj.get("id") {
        // `"id": null` is treated as a request with a null id, not a
        // notification; the response echoes the null back.
        Some(raw) => {
            let id = decode_id(raw.clone()).unwrap_or(RequestId::Null);
            InboundCall::Request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id,
                method,
                params,
            })
        }
        None => InboundCall::Notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method,
            params,
        }),
    }
}

fn decode_id(value: Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s)),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        Value::Null => Some(RequestId::Null),
        _ => None,
    }
}
