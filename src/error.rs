use crate::remap::Origin;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed safetensors in {}: {source}", .path.display())]
    SafeTensors {
        path: PathBuf,
        #[source]
        source: safetensors::SafeTensorError,
    },
    #[error("no {what} found for `{id}`")]
    MissingSource { id: String, what: &'static str },
    #[error("tensor `{key}` missing from the {origin} mapping")]
    MissingKey { origin: Origin, key: String },
    #[error("token `{token}` has id {id}, outside a vocabulary of {size}")]
    TokenOutOfRange { token: String, id: u32, size: usize },
    #[error("num_attention_heads is zero")]
    ZeroHeads,
    #[error("encoder has no layers")]
    NoLayers,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>) -> impl FnOnce(serde_json::Error) -> Self {
        let path = path.into();
        move |source| Self::Json { path, source }
    }
}
