//! Error types for session repository operations.

/// Error type for session repository operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The repository was built without a sessions region.
    #[error("The sessions region could not be resolved")]
    MissingRegion,

    /// A session id was empty or whitespace only.
    #[error("Session id is required, got {0:?}")]
    InvalidSessionId(String),

    /// Ring capacity outside of the supported range.
    #[error("Ring capacity must be between 1 and {max}, got {requested}")]
    InvalidCapacity { requested: usize, max: usize },

    /// Error raised by the cache region. Passed through unmodified.
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// A session or attribute could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Neither a session nor a session id was available for an event.
    #[error("The session or the session id [{0:?}] must be known to trigger a session event")]
    UnresolvableSessionEvent(Option<String>),

    /// Failed to parse configuration.
    #[error("Failed to parse session config: {0}")]
    Config(#[from] toml::de::Error),

    /// Failed to render configuration.
    #[error("Failed to serialize session config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Failures of the session codecs.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// An attribute value has no serialized form.
    #[error("Attribute '{name}' holds a value of type {type_name} that cannot be serialized")]
    NotSerializable { name: String, type_name: String },

    /// Input ended before a complete field could be read.
    #[error("Unexpected end of input while reading {0}")]
    Truncated(&'static str),

    /// A string field was not valid UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// An attribute value was not a valid JSON document.
    #[error("Invalid attribute value for '{name}': {source}")]
    InvalidValue {
        name: String,
        source: serde_json::Error,
    },

    /// A timestamp could not be represented.
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),

    /// An interval could not be represented.
    #[error("Interval out of range: {0}s")]
    IntervalOutOfRange(i64),
}

/// Result type for session repository operations.
pub type Result<T> = std::result::Result<T, Error>;
