//! DDP frame codec.
//!
//! The feed speaks DDP: the client sends `connect` and `sub` frames, the
//! server pushes document lifecycle frames (`added`, `ready`, ...) and
//! keep-alive `ping`s that must be answered with `pong`.
//!
//! Inbound decoding only looks at the frame types the collector consumes;
//! everything else (including the `{"server_id": ...}` banner, which has no
//! `msg` field) decodes to [`Inbound::Other`].

use cf_core::config::SubscriptionConfig;
use cf_core::error::CfError;
use serde_json::{Map, Value, json};

use crate::json_util::str_field;

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Handshake accepted.
    Connected { session: Option<String> },
    /// A document was added to a collection.
    Added { collection: String, id: String, fields: Map<String, Value> },
    /// The listed subscriptions have delivered their initial document set.
    Ready { subs: Vec<String> },
    /// Protocol-level keep-alive.
    Ping { id: Option<String> },
    /// A subscription failed or was stopped by the server.
    NoSub { id: String, error: Option<String> },
    /// Any frame type the collector does not act on.
    Other(Option<String>),
}

/// Decode one text frame.
///
/// Returns [`CfError::Decode`] when the frame is not a JSON object or when a
/// consumed frame type is missing a required field.
pub fn parse_frame(text: &str) -> Result<Inbound, CfError> {
    let v: Value = serde_json::from_str(text).map_err(|e| CfError::Decode(e.to_string()))?;
    if !v.is_object() {
        return Err(CfError::Decode(format!("expected object frame, got {text}")));
    }

    let Some(msg) = str_field(&v, "msg") else {
        return Ok(Inbound::Other(None));
    };

    match msg {
        "connected" => Ok(Inbound::Connected { session: str_field(&v, "session").map(str::to_string) }),
        "added" => {
            let collection = required_str(&v, "collection", msg)?;
            let id = required_str(&v, "id", msg)?;
            let fields = match v.get("fields") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            Ok(Inbound::Added { collection, id, fields })
        }
        "ready" => {
            let subs = v
                .get("subs")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            Ok(Inbound::Ready { subs })
        }
        "ping" => Ok(Inbound::Ping { id: str_field(&v, "id").map(str::to_string) }),
        "nosub" => {
            let id = required_str(&v, "id", msg)?;
            let error = v.get("error").map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.get("reason").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| other.to_string()),
            });
            Ok(Inbound::NoSub { id, error })
        }
        other => Ok(Inbound::Other(Some(other.to_string()))),
    }
}

fn required_str(v: &Value, key: &str, msg: &str) -> Result<String, CfError> {
    str_field(v, key)
        .map(str::to_string)
        .ok_or_else(|| CfError::Decode(format!("'{msg}' frame without '{key}'")))
}

/// Build the opening `connect` frame.
pub fn build_connect(versions: &[String]) -> String {
    let version = versions.first().cloned().unwrap_or_else(|| "1".to_string());
    json!({
        "msg": "connect",
        "version": version,
        "support": versions,
    })
    .to_string()
}

/// Build a `sub` frame for one subscription.
pub fn build_sub(sub: &SubscriptionConfig) -> String {
    json!({
        "msg": "sub",
        "id": sub.id,
        "name": sub.name,
        "params": [],
    })
    .to_string()
}

/// Build the `pong` reply, echoing the ping id when one was sent.
pub fn build_pong(id: Option<&str>) -> String {
    match id {
        Some(id) => json!({"msg": "pong", "id": id}).to_string(),
        None => json!({"msg": "pong"}).to_string(),
    }
}
