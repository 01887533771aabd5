use thiserror::Error;

/// Failure reported by a [`CacheStore`](super::CacheStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {message}")]
    Backend { message: String },
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to {stage} cache entry `{key}`: {source}")]
    Codec {
        stage: CodecStage,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request finished with {depth} unclosed cache scope(s)")]
    ResidualScopes { depth: usize },
}

/// Direction of a failed content conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    Freeze,
    Warmup,
}

impl std::fmt::Display for CodecStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Freeze => f.write_str("freeze"),
            Self::Warmup => f.write_str("warm up"),
        }
    }
}

impl CacheError {
    pub fn freeze(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Codec {
            stage: CodecStage::Freeze,
            key: key.into(),
            source,
        }
    }

    pub fn warmup(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Codec {
            stage: CodecStage::Warmup,
            key: key.into(),
            source,
        }
    }
}
