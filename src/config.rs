use derive_builder::Builder;
use log::{debug, info};
use serde::Deserialize;

use std::{ffi::OsString, fs::File, io::Read, path::PathBuf, str::FromStr};

use crate::{MaxThreadCount, Repository};

/// Configuration needed to construct a [Repository].
///
/// The config can be built with [RepositoryConfigBuilder] or deserialized
/// from a file. Currently only toml files are supported, with the following
/// format:
///
/// ```toml,ignore
/// # Max number of threads to be spawned when building student term trees.
/// # If not set the max parallelism of the underlying machine will be used.
/// max-thread-count = 4
/// ```
///
/// Example how to use the builder:
/// ```
/// use credacc::{MaxThreadCount, RepositoryConfigBuilder};
///
/// let config = RepositoryConfigBuilder::default()
///     .max_thread_count(MaxThreadCount::from(4u8))
///     .build();
///
/// let repository = config.parse();
/// assert_eq!(repository.max_thread_count().as_u8(), 4);
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(build_fn(skip))]
pub struct RepositoryConfig {
    #[serde(default)]
    max_thread_count: MaxThreadCount,
}

// -------------------------------------------------------------------------------------------------
// Builder.

impl RepositoryConfigBuilder {
    /// Build the config struct, using defaults for unset values.
    pub fn build(&self) -> RepositoryConfig {
        RepositoryConfig {
            max_thread_count: self.max_thread_count.unwrap_or_default(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Deserialization & parsing.

impl RepositoryConfig {
    /// Open the file, then try to create the [RepositoryConfig] struct.
    ///
    /// An error is returned if:
    /// 1. The file cannot be opened.
    /// 2. The file cannot be read.
    /// 3. The file type is not supported.
    /// 4. The file content is not a valid config.
    pub fn deserialize(config_file_path: PathBuf) -> Result<Self, RepositoryConfigError> {
        debug!(
            "Attempting to deserialize {:?} as a file containing repository config",
            config_file_path.clone().into_os_string()
        );

        let ext = config_file_path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or(RepositoryConfigError::UnknownFileType(
                config_file_path.clone().into_os_string(),
            ))?;

        let config = match FileType::from_str(ext)? {
            FileType::Toml => {
                let mut buf = String::new();
                File::open(config_file_path)?.read_to_string(&mut buf)?;
                let config: RepositoryConfig = toml::from_str(&buf)?;
                config
            }
        };

        debug!("Successfully deserialized repository config file");

        Ok(config)
    }

    /// Construct an empty [Repository] from the config.
    pub fn parse(self) -> Repository {
        info!(
            "Creating repository with max thread count {}",
            self.max_thread_count.as_u8()
        );
        Repository::new(self.max_thread_count)
    }

    pub fn max_thread_count(&self) -> MaxThreadCount {
        self.max_thread_count
    }
}

/// Supported file types for deserialization.
enum FileType {
    Toml,
}

impl FromStr for FileType {
    type Err = RepositoryConfigError;

    fn from_str(ext: &str) -> Result<FileType, Self::Err> {
        match ext {
            "toml" => Ok(FileType::Toml),
            _ => Err(RepositoryConfigError::UnsupportedFileType { ext: ext.into() }),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Errors encountered when parsing [RepositoryConfig].
#[derive(thiserror::Error, Debug)]
pub enum RepositoryConfigError {
    #[error("Unable to find file extension for path {0:?}")]
    UnknownFileType(OsString),
    #[error("The file type with extension {ext:?} is not supported")]
    UnsupportedFileType { ext: String },
    #[error("Error reading the file")]
    FileReadError(#[from] std::io::Error),
    #[error("Deserialization process failed")]
    DeserializationError(#[from] toml::de::Error),
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::assert_err;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("credacc_config_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn builder_without_values_uses_defaults() {
        let config = RepositoryConfigBuilder::default().build();
        assert_eq!(config.max_thread_count(), MaxThreadCount::default());
    }

    #[test]
    fn toml_file_is_deserialized() {
        let path = temp_file("with_threads.toml", "max-thread-count = 3\n");
        let config = RepositoryConfig::deserialize(path).unwrap();
        assert_eq!(config.max_thread_count().as_u8(), 3);
        assert_eq!(config.parse().max_thread_count().as_u8(), 3);
    }

    #[test]
    fn empty_toml_file_gives_defaults() {
        let path = temp_file("empty.toml", "");
        let config = RepositoryConfig::deserialize(path).unwrap();
        assert_eq!(config.max_thread_count(), MaxThreadCount::default());
    }

    #[test]
    fn unsupported_extension_fails() {
        let path = temp_file("config.json", "{}");
        assert_err!(
            RepositoryConfig::deserialize(path),
            Err(RepositoryConfigError::UnsupportedFileType { .. })
        );
    }

    #[test]
    fn missing_extension_fails() {
        assert_err!(
            RepositoryConfig::deserialize(PathBuf::from("config")),
            Err(RepositoryConfigError::UnknownFileType(_))
        );
    }

    #[test]
    fn malformed_toml_fails() {
        let path = temp_file("bad.toml", "max-thread-count = \"many\"\n");
        assert_err!(
            RepositoryConfig::deserialize(path),
            Err(RepositoryConfigError::DeserializationError(_))
        );
    }
}
