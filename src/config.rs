use crate::preprocessing::{ChannelOrder, Interpolation};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub classifier: ClassifierConfig,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), String> {
        self.classifier.validate()?;
        self.model.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Target height in pixels; the width follows the aspect ratio.
    #[serde(rename = "image-resize", default)]
    pub image_resize: Option<u32>,
    /// URL or local path of the class-index document.
    #[serde(rename = "image-classifier-classes")]
    pub image_classifier_classes: String,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub channel_order: ChannelOrder,
}

impl Validatable for ClassifierConfig {
    fn validate(&self) -> Result<(), String> {
        if self.image_resize == Some(0) {
            return Err("image-resize must be greater than 0".to_string());
        }
        if self.image_classifier_classes.trim().is_empty() {
            return Err("image-classifier-classes must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub models_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
    /// Upper bound on a downloaded image body.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_inference_timeout_ms() -> u64 {
    30_000
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

impl ModelConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.models_dir.is_dir() {
            return Err(format!("Models directory not found: {:?}", self.models_dir));
        }
        if self.num_instances == 0 {
            return Err("num_instances must be greater than 0".to_string());
        }
        if self.max_image_bytes == 0 {
            return Err("max_image_bytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("current directory: {}", e)))?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&base_path.join("configuration"), &environment)
}

/// Layers `base.yaml`, the optional `{environment}.yaml` and `APP_*`
/// variables, then validates.
///
/// Runs before the subscriber is installed, so failures are only returned.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = settings.try_deserialize::<Config>()?;
    config
        .validate()
        .map_err(|e| config::ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()
    }

    const BASE: &str = r#"
server:
  host: 0.0.0.0
  port: 8080
log_level: info
classifier:
  image-resize: 224
  image-classifier-classes: https://example.com/imagenet_class_index.json
model:
  models_dir: ./models
  num_instances: 2
"#;

    #[test]
    fn test_parse_classifier_keys() {
        let config = parse(BASE).unwrap();

        assert_eq!(config.classifier.image_resize, Some(224));
        assert_eq!(
            config.classifier.image_classifier_classes,
            "https://example.com/imagenet_class_index.json"
        );
        assert_eq!(config.classifier.interpolation, Interpolation::Area);
        assert_eq!(config.classifier.channel_order, ChannelOrder::Rgb);
        assert_eq!(config.model.num_instances, 2);
        assert_eq!(config.model.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.model.max_image_bytes, 20 * 1024 * 1024);
        assert_eq!(config.server.get_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_parse_interpolation_and_channel_order() {
        let yaml = BASE.replace(
            "  image-resize: 224\n",
            "  image-resize: 224\n  interpolation: lanczos3\n  channel_order: bgr\n",
        );
        let config = parse(&yaml).unwrap();

        assert_eq!(config.classifier.interpolation, Interpolation::Lanczos3);
        assert_eq!(config.classifier.channel_order, ChannelOrder::Bgr);
    }

    #[test]
    fn test_rejects_zero_resize() {
        let yaml = BASE.replace("image-resize: 224", "image-resize: 0");
        let config = parse(&yaml).unwrap();

        assert!(config.classifier.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let yaml = BASE.replace("log_level: info", "log_level: trace");

        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_environment_from_string() {
        let env: Result<Environment, _> = "Production".to_string().try_into();
        assert!(matches!(env, Ok(Environment::Production)));

        let env: Result<Environment, _> = "staging".to_string().try_into();
        assert!(env.is_err());
    }

    #[test]
    fn test_load_configuration_returns_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = BASE.replace("./models", "/nonexistent/onnx-models");
        std::fs::write(dir.path().join("base.yaml"), yaml).unwrap();

        let err = load_configuration(dir.path(), &Environment::Local).unwrap_err();

        assert!(err.to_string().contains("Models directory not found"), "{}", err);
    }

    #[test]
    fn test_load_configuration_layers_environment_file() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir(&models).unwrap();
        let yaml = BASE.replace("./models", models.to_str().unwrap());
        std::fs::write(dir.path().join("base.yaml"), yaml).unwrap();
        std::fs::write(
            dir.path().join("production.yaml"),
            "classifier:\n  image-resize: 299\n",
        )
        .unwrap();

        let config = load_configuration(dir.path(), &Environment::Production).unwrap();

        assert_eq!(config.classifier.image_resize, Some(299));
        assert_eq!(config.model.num_instances, 2);
    }
}
