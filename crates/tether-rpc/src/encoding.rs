//! Candidate wire encodings for outgoing requests.
//!
//! Peers differ in the request envelope they accept, so the dispatcher is
//! given an ordered list of [`RequestEncoding`]s and tries them in turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC protocol version sent in `JsonRpc` envelopes.
pub const JSONRPC_VERSION: &str = "2.0";

/// Field names used when building and reading request envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeFields {
    /// Correlation id field.
    pub id: String,
    /// Method field of JSON-RPC envelopes.
    pub method: String,
    /// Method field of bare envelopes.
    pub kind: String,
    /// Parameters field.
    pub params: String,
}

impl Default for EnvelopeFields {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            method: "method".to_string(),
            kind: "type".to_string(),
            params: "params".to_string(),
        }
    }
}

/// One request envelope shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestEncoding {
    /// `{"jsonrpc": "2.0", "id": .., "method": .., "params": ..}`
    JsonRpc,
    /// `{"type": .., "id": .., "params": ..}`
    Bare,
    /// A bare envelope nested under `key`, e.g. `{"request": {...}}`.
    Wrapped { key: String },
}

/// Method, id and params read back out of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEnvelope {
    pub id: String,
    pub method: String,
    pub params: Option<Value>,
}

impl RequestEncoding {
    /// Short name for logs and error reports.
    pub fn label(&self) -> String {
        match self {
            RequestEncoding::JsonRpc => "json_rpc".to_string(),
            RequestEncoding::Bare => "bare".to_string(),
            RequestEncoding::Wrapped { key } => format!("wrapped({key})"),
        }
    }

    /// Build the request body for this encoding.
    pub fn encode(
        &self,
        fields: &EnvelopeFields,
        id: &str,
        method: &str,
        params: Option<&Value>,
    ) -> Value {
        match self {
            RequestEncoding::JsonRpc => {
                let mut envelope = Map::new();
                envelope.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
                envelope.insert(fields.id.clone(), Value::from(id));
                envelope.insert(fields.method.clone(), Value::from(method));
                if let Some(params) = params {
                    envelope.insert(fields.params.clone(), params.clone());
                }
                Value::Object(envelope)
            }
            RequestEncoding::Bare => bare_envelope(fields, id, method, params),
            RequestEncoding::Wrapped { key } => {
                let mut outer = Map::new();
                outer.insert(key.clone(), bare_envelope(fields, id, method, params));
                Value::Object(outer)
            }
        }
    }

    /// Read an envelope produced by [`encode`](Self::encode) back.
    ///
    /// Returns `None` if `envelope` does not have this encoding's shape.
    pub fn decode(&self, fields: &EnvelopeFields, envelope: &Value) -> Option<DecodedEnvelope> {
        match self {
            RequestEncoding::JsonRpc => {
                if envelope.get("jsonrpc")?.as_str()? != JSONRPC_VERSION {
                    return None;
                }
                read_envelope(envelope, fields, &fields.method)
            }
            RequestEncoding::Bare => read_envelope(envelope, fields, &fields.kind),
            RequestEncoding::Wrapped { key } => {
                read_envelope(envelope.get(key)?, fields, &fields.kind)
            }
        }
    }
}

fn bare_envelope(fields: &EnvelopeFields, id: &str, method: &str, params: Option<&Value>) -> Value {
    let mut envelope = Map::new();
    envelope.insert(fields.kind.clone(), Value::from(method));
    envelope.insert(fields.id.clone(), Value::from(id));
    if let Some(params) = params {
        envelope.insert(fields.params.clone(), params.clone());
    }
    Value::Object(envelope)
}

fn read_envelope(
    envelope: &Value,
    fields: &EnvelopeFields,
    method_field: &str,
) -> Option<DecodedEnvelope> {
    Some(DecodedEnvelope {
        id: envelope.get(&fields.id)?.as_str()?.to_string(),
        method: envelope.get(method_field)?.as_str()?.to_string(),
        params: envelope.get(&fields.params).cloned(),
    })
}

/// The default candidate order: JSON-RPC first, then the bare envelope.
pub fn default_encodings() -> Vec<RequestEncoding> {
    vec![RequestEncoding::JsonRpc, RequestEncoding::Bare]
}
