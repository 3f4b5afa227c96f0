use thiserror::Error;

/// Unified error type for the stepflow library
#[derive(Debug, Error)]
pub enum StepflowError {
    /// Session lifecycle errors (unknown id, duplicate start, ...)
    #[error("Session error: {session_id} - {message}")]
    Session {
        session_id: String,
        message: String,
    },

    /// A step handler failed; the session is left in its last consistent state
    #[error("Handler failed at {step}: {message}")]
    Handler {
        step: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Extraction submission errors
    #[error("Extraction error: {document_id} - {message}")]
    Extraction {
        document_id: String,
        message: String,
    },

    /// The same document id was submitted while still in flight
    #[error("Document already in flight: {document_id}")]
    DuplicateDocument { document_id: String },

    /// Verification made no progress for too many consecutive visits
    #[error("Verification stalled for session {session_id} after {visits} visits")]
    Stalled { session_id: String, visits: u32 },

    /// Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        schema: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StepflowError {
    /// Create a session error
    pub fn session<S: Into<String>, M: Into<String>>(session_id: S, message: M) -> Self {
        Self::Session {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn session_not_found<S: Into<String>>(session_id: S) -> Self {
        Self::session(session_id, "session not found")
    }

    pub fn session_exists<S: Into<String>>(session_id: S) -> Self {
        Self::session(session_id, "session already exists")
    }

    /// Create a handler error without an underlying cause
    pub fn handler<S: Into<String>, M: Into<String>>(step: S, message: M) -> Self {
        Self::Handler {
            step: step.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a handler error wrapping the handler's own error
    pub fn handler_with_source<S: Into<String>>(step: S, source: anyhow::Error) -> Self {
        Self::Handler {
            step: step.into(),
            message: source.to_string(),
            source: Some(source.into()),
        }
    }

    /// Create an extraction error
    pub fn extraction<S: Into<String>, M: Into<String>>(document_id: S, message: M) -> Self {
        Self::Extraction {
            document_id: document_id.into(),
            message: message.into(),
        }
    }

    pub fn duplicate_document<S: Into<String>>(document_id: S) -> Self {
        Self::DuplicateDocument {
            document_id: document_id.into(),
        }
    }

    pub fn stalled<S: Into<String>>(session_id: S, visits: u32) -> Self {
        Self::Stalled {
            session_id: session_id.into(),
            visits,
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
            schema: None,
        }
    }

    pub fn validation_schema<S: Into<String>, C: Into<String>>(message: S, schema: C) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
            schema: Some(schema.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Check if the caller may retry the same operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Handler { .. } => true,
            Self::Extraction { .. } | Self::DuplicateDocument { .. } => false,
            Self::Stalled { .. } => false,
            Self::Validation { .. } | Self::Configuration { .. } => false,
            Self::Session { .. } => false,
            Self::Serialization { .. } => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Handler { .. } => "handler",
            Self::Extraction { .. } => "extraction",
            Self::DuplicateDocument { .. } => "extraction",
            Self::Stalled { .. } => "routing",
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StepflowError>;

impl From<serde_json::Error> for StepflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}
