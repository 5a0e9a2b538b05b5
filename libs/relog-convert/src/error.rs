use relog_api::error::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{path}: a converter file may define only one converter")]
    DuplicateDefinition { path: String },

    #[error("{path}: cannot parse '{date}' as a timestamp")]
    UnparseableDate { path: String, date: String },

    #[error("{path}: {message}")]
    Script { path: String, message: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Add context to the error.
    ///
    /// For `Schema` variant, context is added to the inner `SchemaError`.
    /// For `Script`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            ConvertError::Schema(e) => ConvertError::Schema(e.with_context(ctx)),
            ConvertError::Script { path, message } => ConvertError::Script {
                path,
                message: format!("{ctx}: {message}"),
            },
            other => other,
        }
    }
}
