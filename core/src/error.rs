//! Error types for the harness utilities.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{} doesn't exist!", .0.display())]
    MissingPath(PathBuf),

    #[error("the register-id of the environment must be provided under the \"id\" key")]
    MissingEnvironmentId,

    #[error(
        "environment {id} not registered (import_module: {}). The environment module should be \
         specified by the \"import_module\" key of the environment configuration",
        .import_module.as_deref().unwrap_or("None")
    )]
    UnregisteredEnvironment {
        id: String,
        import_module: Option<String>,
    },

    #[error("environment module {0} is not registered")]
    UnknownModule(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("checkpoint error in {}: {message}", .path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("media conversion failed: {0}")]
    Media(String),

    #[error("failed to {action} {}: {source}", .path.display())]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment {id} failed: {source}")]
    Environment {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn file(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
