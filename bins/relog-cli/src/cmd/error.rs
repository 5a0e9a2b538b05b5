use relog_api::error::SchemaError;
use relog_convert::error::ConvertError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Convert(#[from] ConvertError),

    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
