//! # Gateway Encodings
//!
//! The JSON shapes crossing the broker boundary: the request envelope sent
//! to workers, and the `[status, [k1, v1, ...]]` reply head coming back.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// The JSON envelope describing one inbound HTTP request. The body is not
/// carried here; it is delivered separately to `body_addr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Request target as received, e.g. `/orders?page=2`.
    pub url: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Request headers. Later duplicates overwrite earlier ones.
    pub headers: BTreeMap<String, String>,
    /// Address the raw request body is delivered to.
    pub body_addr: String,
}

/// Parsed worker reply head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHead {
    /// Response status.
    pub status: StatusCode,
    /// Response header pairs, in worker order.
    pub headers: Vec<(String, String)>,
}

/// Parse a worker reply head: a two-element JSON array of a status string
/// and a flat `[k1, v1, k2, v2, ...]` header array.
pub(crate) fn parse_reply_head(body: &[u8]) -> Result<ReplyHead, GatewayError> {
    let (status_text, fields): (String, Vec<String>) = serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadReply(format!("expected [status, headers] array: {e}")))?;

    let status_code: u16 = status_text
        .parse()
        .map_err(|_| GatewayError::BadReply(format!("not a valid status code: {status_text}")))?;
    let status = StatusCode::from_u16(status_code)
        .map_err(|_| GatewayError::BadReply(format!("not a valid status code: {status_text}")))?;

    if fields.len() % 2 != 0 {
        return Err(GatewayError::BadReply(
            "headers array had odd number of items".into(),
        ));
    }
    let headers = fields
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    Ok(ReplyHead { status, headers })
}
