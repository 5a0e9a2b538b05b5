use serde::Deserialize;

use super::error::CliError;

/// Optional config file (TOML). CLI flags take precedence over anything
/// set here.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Default directory scanned by `check-converters`.
    pub converters_dir: Option<String>,
    /// Default output directory for `create-converter`.
    pub output_dir: Option<String>,
}

pub fn load_config(path: &str) -> Result<Config, CliError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        // A missing config file is fine; everything can come from flags.
        Err(_) if !std::path::Path::new(path).exists() => return Ok(Config::default()),
        Err(e) => {
            return Err(CliError::Config(format!("cannot read config {path}: {e}")));
        }
    };
    toml::from_str(&content).map_err(|e| CliError::Config(format!("bad config {path}: {e}")))
}
