use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("Config file not found: {}\n\nHint:\n  • Unset CONVOY_CONFIG_PATH or point it at an existing file", .0.display())]
    ConfigFileNotFound(PathBuf),

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error(
        "Not inside a Convoy workspace (no .convoy/ directory found)\n\nHint:\n  • Run `convoy app init` first"
    )]
    WorkspaceNotFound,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
