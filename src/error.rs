//! Error types for the external processing filter.

use thiserror::Error;
use tonic::Status;

/// Every fault the filter can hit while serving one stream or starting up.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Malformed length prefix or a frame that runs past the end of the body.
    #[error("framing error at byte {offset}: {reason}")]
    Framing { offset: usize, reason: String },

    /// Message type name not present in any loaded descriptor set.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Field name not declared by the resolved message type.
    #[error("message type {message_type} has no field named {field}")]
    UnknownField { message_type: String, field: String },

    /// Frame payload does not decode against its schema.
    #[error("cannot decode {message_type}: {source}")]
    Decode {
        message_type: String,
        #[source]
        source: prost::DecodeError,
    },

    /// Descriptor set could not be turned into a schema pool, or a field
    /// could not take the value it was given.
    #[error("schema error: {0}")]
    Schema(String),

    /// Event arrived in a phase that does not expect it. Never fatal.
    #[error("unexpected {event} event while {phase}")]
    UnexpectedEvent { phase: String, event: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rules file error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer went away before the stream finished.
    #[error("stream cancelled")]
    Cancelled,

    /// Inbound side of the gRPC stream failed.
    #[error("cannot receive stream request: {0}")]
    Transport(#[from] Status),
}

impl From<prost_reflect::DescriptorError> for FilterError {
    fn from(err: prost_reflect::DescriptorError) -> Self {
        FilterError::Schema(err.to_string())
    }
}

impl From<&FilterError> for Status {
    fn from(err: &FilterError) -> Self {
        match err {
            FilterError::Cancelled => Status::cancelled(err.to_string()),
            FilterError::Transport(status) => {
                Status::unknown(format!("cannot receive stream request: {}", status.message()))
            }
            other => Status::internal(other.to_string()),
        }
    }
}

impl From<FilterError> for Status {
    fn from(err: FilterError) -> Self {
        Status::from(&err)
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
