//! Upload endpoint response bodies.
//!
//! The endpoint answers `{"response":{"status":"OK"}}` on success and
//! `{"error":{"code":..,"message":..,"stackTrace":..}}` when it refuses a batch.

use log::error;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadResponse {
    Accepted,
    Rejected {
        code: Option<String>,
        message: Option<String>,
        stack_trace: Option<String>,
    },
    /// Valid or invalid JSON that is neither an acceptance nor an error object.
    Unrecognized,
}

impl UploadResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UploadResponse::Accepted)
    }
}

#[derive(Deserialize)]
struct Envelope {
    error: Option<ErrorBody>,
    response: Option<ResponseBody>,
}

#[derive(Deserialize)]
struct ResponseBody {
    status: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: Option<Value>,
    message: Option<Value>,
    stack_trace: Option<Value>,
}

fn text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Classify an upload response body. Rejections are logged at error level.
pub fn parse_upload_response(body: &str) -> UploadResponse {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Cannot parse upload response '{body}': {e}");
            return UploadResponse::Unrecognized;
        }
    };

    if let Some(err) = envelope.error {
        let code = text(err.code);
        let message = text(err.message);
        let stack_trace = text(err.stack_trace);
        error!(
            "Batch upload rejected, code: {}, message: {}",
            code.as_deref().unwrap_or("-"),
            message.as_deref().unwrap_or("-")
        );
        if let Some(stack_trace) = &stack_trace {
            error!("stackTrace:\n{stack_trace}");
        }
        return UploadResponse::Rejected {
            code,
            message,
            stack_trace,
        };
    }

    match envelope.response.and_then(|r| r.status) {
        Some(Value::String(status)) if status.eq_ignore_ascii_case("OK") => UploadResponse::Accepted,
        Some(status) => {
            error!("Upload response status is {status}");
            UploadResponse::Unrecognized
        }
        None => {
            error!("Unknown upload response '{body}'");
            UploadResponse::Unrecognized
        }
    }
}
