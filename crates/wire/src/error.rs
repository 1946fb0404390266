use crate::body::BodyKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("wrong body kind: expected {expected}, found {actual}")]
    WrongBodyKind { expected: BodyKind, actual: BodyKind },

    #[error("request body is not valid JSON: {source}")]
    InvalidJson {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid base64 content: {source}")]
    InvalidBase64 {
        #[from]
        source: base64::DecodeError,
    },

    #[error("invalid form data: {reason}")]
    InvalidForm { reason: String },

    #[error("invalid wire payload: {reason}")]
    InvalidPayload { reason: String },
}

impl WireError {
    pub fn wrong_body_kind(expected: BodyKind, actual: BodyKind) -> Self {
        Self::WrongBodyKind { expected, actual }
    }

    pub fn invalid_form<S: ToString>(str: S) -> Self {
        Self::InvalidForm { reason: str.to_string() }
    }

    pub fn invalid_payload<S: ToString>(str: S) -> Self {
        Self::InvalidPayload { reason: str.to_string() }
    }
}
