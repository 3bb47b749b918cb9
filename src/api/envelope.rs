use serde::{Deserialize, Serialize};

/// Machine-readable failure carried in an error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

/// Response wrapper shared by every JSON endpoint.
///
/// Success is `{"ok": true, "data": ...}`, failure is
/// `{"ok": false, "error": {"message": ..., "code": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                code: code.into(),
            }),
        }
    }

    /// Split into the payload or the error body.
    ///
    /// An `ok` envelope without data, or a failed one without an error body,
    /// comes back as a synthetic `MALFORMED_ENVELOPE` error.
    pub fn into_result(self) -> Result<T, ErrorBody> {
        match (self.ok, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (false, _, Some(error)) => Err(error),
            _ => Err(ErrorBody {
                message: "response envelope is missing its payload".to_string(),
                code: "MALFORMED_ENVELOPE".to_string(),
            }),
        }
    }
}
