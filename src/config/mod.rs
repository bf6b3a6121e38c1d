//! Configuration loading and validation.
//!
//! Defines the [`ConfigSource`] trait for pluggable config backends and the
//! [`ConfigVersion`] enum identifying the loaded content. Submodules provide
//! the data model, validation logic and the file-based sources.

pub mod model;
pub mod sources;
pub mod validation;

use std::path::Path;

use async_trait::async_trait;

use crate::error::TapwireError;
use model::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigVersion {
    Hash(String),
}

impl ConfigVersion {
    /// First 12 hex characters, enough to tell deployments apart in logs.
    #[must_use]
    pub fn short(&self) -> &str {
        match self {
            Self::Hash(hash) => &hash[..hash.len().min(12)],
        }
    }
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "sha256:{hash}"),
        }
    }
}

// async_trait is required here because ConfigSource is used as Box<dyn ConfigSource>
// and native async fn in traits (Rust 1.75+) does not support dyn dispatch.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self) -> Result<(Config, ConfigVersion), TapwireError>;
}

/// Pick a file source from the path's extension.
pub fn source_for_path(path: &Path) -> Result<Box<dyn ConfigSource>, TapwireError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let path = path.to_path_buf();
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => Ok(Box::new(sources::FileSource::yaml(path))),
        #[cfg(feature = "json")]
        "json" => Ok(Box::new(sources::FileSource::json(path))),
        #[cfg(feature = "toml")]
        "toml" => Ok(Box::new(sources::FileSource::toml(path))),
        other => Err(TapwireError::UnsupportedFormat(other.to_string())),
    }
}
