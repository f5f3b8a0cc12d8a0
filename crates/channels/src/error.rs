use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors shared across the channel, registry and store traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// No instance is registered under this name.
    #[error("unknown instance: {name}")]
    InstanceNotFound { name: String },

    /// No instance carries the default flag.
    #[error("no default instance configured")]
    NoDefaultInstance,

    /// Inbound request failed channel-level authentication.
    #[error("request rejected: {message}")]
    Unauthorized { message: String },

    /// Operation is currently unavailable (not configured/ready).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl std::fmt::Display) -> Self {
        Self::Unauthorized {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn instance_not_found(name: impl std::fmt::Display) -> Self {
        Self::InstanceNotFound {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True for the two "tenant could not be resolved" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InstanceNotFound { .. } | Self::NoDefaultInstance)
    }
}
