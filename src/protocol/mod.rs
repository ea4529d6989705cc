//! Line protocol for the embedding bridge
//!
//! Requests and responses are single-line JSON objects. A request names an
//! `action` (`info`, `embed` or `embed_batch`), the `model` identifier and the
//! action payload. An optional `id` is copied onto the response.
//!
//! ```text
//! -> {"id": 1, "action": "embed", "model": "all-MiniLM-L6-v2", "text": "hello"}
//! <- {"embedding": [0.01, ...], "model": "all-MiniLM-L6-v2", "id": 1}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Embedding;

/// `info` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InfoRequest {
    pub model: String,
}

/// `embed` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub text: String,
}

/// `embed_batch` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedBatchRequest {
    pub model: String,
    pub texts: Vec<String>,
}

/// A request with a recognized action and a well-formed payload
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Info(InfoRequest),
    Embed(EmbedRequest),
    EmbedBatch(EmbedBatchRequest),
}

/// Why a line could not be turned into a `Request`
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// A parsed line: the correlation id, if any, and the request or the reason
/// it was rejected. The id is kept even when the payload is rejected.
#[derive(Debug)]
pub struct Envelope {
    pub id: Option<Value>,
    pub request: Result<Request, RequestError>,
}

/// Parse one input line.
///
/// Only a JSON syntax error fails outright; no id can be recovered from such
/// a line. Every other problem is reported inside the returned `Envelope`.
pub fn parse_line(line: &str) -> Result<Envelope, RequestError> {
    let value: Value = serde_json::from_str(line).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
    Ok(Envelope::from_value(value))
}

impl Envelope {
    pub fn from_value(value: Value) -> Self {
        let Value::Object(fields) = &value else {
            return Self {
                id: None,
                request: Err(RequestError::Unexpected("request must be a JSON object".to_string())),
            };
        };

        let id = fields.get("id").filter(|id| is_truthy(id)).cloned();

        let request = match fields.get("action") {
            Some(Value::String(action)) => match action.as_str() {
                "info" => payload(value.clone()).map(Request::Info),
                "embed" => payload(value.clone()).map(Request::Embed),
                "embed_batch" => payload(value.clone()).map(Request::EmbedBatch),
                other => Err(RequestError::UnknownAction(other.to_string())),
            },
            Some(other) => Err(RequestError::UnknownAction(other.to_string())),
            None => Err(RequestError::UnknownAction(Value::Null.to_string())),
        };

        Self { id, request }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, RequestError> {
    serde_json::from_value(value).map_err(|e| RequestError::Unexpected(e.to_string()))
}

/// JSON truthiness: `null`, `false`, zero, `""`, `[]` and `{}` are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Action-specific response fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Info { model: String, dimension: usize },
    Embedding { embedding: Embedding, model: String },
    Embeddings { embeddings: Vec<Embedding>, model: String },
    Error { error: String },
}

impl ResponseBody {
    pub fn error(message: impl Into<String>) -> Self {
        ResponseBody::Error { error: message.into() }
    }
}

/// One output line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(flatten)]
    pub body: ResponseBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Response {
    pub fn new(body: ResponseBody, id: Option<Value>) -> Self {
        Self { body, id }
    }

    /// Serialize as a single line, without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_embed_request() {
        let envelope = parse_line(r#"{"id": 1, "action": "embed", "model": "demo-model", "text": "hello"}"#).unwrap();
        assert_eq!(envelope.id, Some(json!(1)));
        assert_eq!(
            envelope.request.unwrap(),
            Request::Embed(EmbedRequest {
                model: "demo-model".to_string(),
                text: "hello".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_batch_and_info() {
        let envelope = parse_line(r#"{"action": "embed_batch", "model": "m", "texts": ["a", "b"]}"#).unwrap();
        assert_eq!(envelope.id, None);
        match envelope.request.unwrap() {
            Request::EmbedBatch(batch) => assert_eq!(batch.texts, vec!["a", "b"]),
            other => panic!("unexpected request: {:?}", other),
        }

        let envelope = parse_line(r#"{"action": "info", "model": "m", "extra": true}"#).unwrap();
        assert!(matches!(envelope.request, Ok(Request::Info(_))));
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_line("{not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn test_unknown_and_missing_action() {
        let envelope = parse_line(r#"{"action": "bogus", "model": "m"}"#).unwrap();
        assert_eq!(envelope.request.unwrap_err().to_string(), "Unknown action: bogus");

        let envelope = parse_line(r#"{"model": "m", "id": "abc"}"#).unwrap();
        assert_eq!(envelope.id, Some(json!("abc")));
        assert_eq!(envelope.request.unwrap_err().to_string(), "Unknown action: null");

        let envelope = parse_line(r#"{"action": 7}"#).unwrap();
        assert_eq!(envelope.request.unwrap_err().to_string(), "Unknown action: 7");
    }

    #[test]
    fn test_missing_or_mistyped_fields_are_unexpected() {
        let envelope = parse_line(r#"{"id": 3, "action": "embed", "model": "m"}"#).unwrap();
        assert_eq!(envelope.id, Some(json!(3)));
        let message = envelope.request.unwrap_err().to_string();
        assert!(message.starts_with("Unexpected error: "));
        assert!(message.contains("text"));

        let envelope = parse_line(r#"{"action": "embed_batch", "model": "m", "texts": "a"}"#).unwrap();
        assert!(envelope.request.unwrap_err().to_string().starts_with("Unexpected error: "));

        let envelope = parse_line("[1, 2, 3]").unwrap();
        assert_eq!(envelope.id, None);
        assert!(envelope.request.unwrap_err().to_string().starts_with("Unexpected error: "));
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{} should be falsy", falsy);
        }
        for truthy in [json!(true), json!(-1), json!("x"), json!([0]), json!({"k": 1})] {
            assert!(is_truthy(&truthy), "{} should be truthy", truthy);
        }

        let envelope = parse_line(r#"{"id": 0, "action": "info", "model": "m"}"#).unwrap();
        assert_eq!(envelope.id, None);
    }

    #[test]
    fn test_response_lines() {
        let response = Response::new(
            ResponseBody::Info {
                model: "demo-model".to_string(),
                dimension: 8,
            },
            None,
        );
        assert_eq!(response.to_line().unwrap(), r#"{"model":"demo-model","dimension":8}"#);

        let response = Response::new(
            ResponseBody::Embedding {
                embedding: vec![0.5, 1.0],
                model: "demo-model".to_string(),
            },
            Some(json!({"req": [1, 2]})),
        );
        assert_eq!(
            response.to_line().unwrap(),
            r#"{"embedding":[0.5,1.0],"model":"demo-model","id":{"req":[1,2]}}"#
        );

        let response = Response::new(ResponseBody::error("boom"), Some(json!("x")));
        assert!(matches!(response.body, ResponseBody::Error { .. }));
        assert_eq!(response.to_line().unwrap(), r#"{"error":"boom","id":"x"}"#);
    }
}
