use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use medivault_privacy::EngineConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dataset: DatasetSection,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct DatasetSection {
    /// JSON array of encoded records the `query` command runs over.
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
        }
    }
}

fn default_records_path() -> PathBuf {
    PathBuf::from("data/records.json")
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.records_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "dataset records-path must not be empty".into(),
            ));
        }
        self.engine
            .validate()
            .map_err(|err| ConfigError::Validation(err.to_string()))
    }

    pub fn sample() -> Self {
        Self {
            engine: EngineConfig::sample(),
            dataset: DatasetSection::default(),
        }
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let parse_err = |details: String| ConfigError::Parse { format, details };
    match format {
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| parse_err(err.to_string()))
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(contents).map_err(|err| parse_err(err.to_string()))
        }
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use medivault_privacy::IntegrityMode;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sample_validates() {
        assert!(Config::sample().validate().is_ok());
    }

    #[test]
    fn rejects_empty_codec_key() {
        let mut config = Config::sample();
        config.engine.codec.key.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn parses_toml_config() {
        let contents = r#"
            [codec]
            key = "clinic-shared-key"

            [budget]
            default-total-budget = 4.0

            [matcher]
            integrity-mode = "strict"

            [dataset]
            records-path = "/srv/medivault/records.json"

            [telemetry]
            component = "medivault-cli"
        "#;

        let config = parse_config(contents, ConfigFormat::Toml).unwrap();
        assert_eq!(config.engine.budget.default_total_budget, 4.0);
        assert_eq!(config.engine.matcher.integrity_mode, IntegrityMode::Strict);
        assert_eq!(
            config.dataset.records_path,
            PathBuf::from("/srv/medivault/records.json")
        );
    }

    #[test]
    fn parses_yaml_config() {
        let contents = r#"
            codec:
              key: clinic-shared-key
            noise:
              seed-hex: "0101010101010101010101010101010101010101010101010101010101010101"
        "#;
        let config = parse_config(contents, ConfigFormat::Yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.matcher.integrity_mode, IntegrityMode::Lenient);
        assert_eq!(config.dataset, DatasetSection::default());
    }

    #[test]
    fn resolves_format_from_extension() {
        assert_eq!(
            resolve_format(Path::new("medivault.yml"), ConfigFormat::Auto),
            ConfigFormat::Yaml
        );
        assert_eq!(
            resolve_format(Path::new("medivault.conf"), ConfigFormat::Auto),
            ConfigFormat::Toml
        );
        assert_eq!(
            resolve_format(Path::new("medivault.yml"), ConfigFormat::Toml),
            ConfigFormat::Toml
        );
    }
}
