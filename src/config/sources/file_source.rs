//! Async file-based config source.
//!
//! [`FileSource`] implements [`ConfigSource`] for any file format by
//! accepting a deserialization function at construction time. It reads the
//! file through Tokio, validates the result and hashes the raw content so
//! the running version can be reported by the health endpoint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::sha256_hex;
use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::{BoxError, TapwireError};

type Deserialize = fn(&str) -> Result<Config, BoxError>;

pub struct FileSource {
    path: PathBuf,
    name: &'static str,
    deserialize: Deserialize,
}

impl FileSource {
    #[must_use]
    pub fn new(path: PathBuf, name: &'static str, deserialize: Deserialize) -> Self {
        Self {
            path,
            name,
            deserialize,
        }
    }

    #[cfg(feature = "yaml")]
    #[must_use]
    pub fn yaml(path: PathBuf) -> Self {
        Self::new(path, "yaml", |content| {
            serde_yml::from_str::<Config>(content).map_err(BoxError::from)
        })
    }

    #[cfg(feature = "json")]
    #[must_use]
    pub fn json(path: PathBuf) -> Self {
        Self::new(path, "json", |content| {
            serde_json::from_str::<Config>(content).map_err(BoxError::from)
        })
    }

    #[cfg(feature = "toml")]
    #[must_use]
    pub fn toml(path: PathBuf) -> Self {
        Self::new(path, "toml", |content| {
            toml::from_str::<Config>(content).map_err(BoxError::from)
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_content(&self) -> Result<String, TapwireError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TapwireError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                TapwireError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), TapwireError> {
        let content = self.read_content().await?;

        let config = (self.deserialize)(&content).map_err(|e| TapwireError::ConfigParse {
            path: self.path.display().to_string(),
            source: e,
        })?;

        if let Err(errors) = validate(&config) {
            return Err(TapwireError::ConfigValidation { errors });
        }

        let hash = sha256_hex(content.as_bytes());
        Ok((config, ConfigVersion::Hash(hash)))
    }
}

#[cfg(all(test, feature = "yaml"))]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tapwire-{}-{name}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn loads_and_hashes_yaml() {
        let content = "routes:\n  - path: /\n    upstream: https://api.openai.com\n";
        let path = write_temp("load.yaml", content);

        let (config, version) = FileSource::yaml(path.clone()).load().await.unwrap();
        assert_eq!(config.routes[0].upstream, "https://api.openai.com");
        assert_eq!(version, ConfigVersion::Hash(sha256_hex(content.as_bytes())));

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let source = FileSource::yaml(PathBuf::from("/nonexistent/tapwire.yaml"));
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, TapwireError::ConfigFileNotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_config_fails_validation() {
        let path = write_temp("invalid.yaml", "routes: []\n");
        let err = FileSource::yaml(path.clone()).load().await.unwrap_err();
        assert!(matches!(err, TapwireError::ConfigValidation { .. }));
        std::fs::remove_file(path).unwrap();
    }
}
