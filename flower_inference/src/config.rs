use serde::Deserialize;
use std::path::PathBuf;

use crate::session::{InputSpec, OutputActivation, TensorLayout};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
}

pub fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub activation: OutputActivation,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_input_size() -> u32 {
    192
}

fn default_scale() -> f32 {
    1.0
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_intra_threads() -> usize {
    1
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn input_spec(&self) -> InputSpec {
        InputSpec {
            size: self.input_size,
            layout: self.layout,
            scale: self.scale,
        }
    }
}

/// Where the class table comes from. Without a file the built-in flower table is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LabelsConfig {
    pub labels_dir: Option<PathBuf>,
    pub labels_file: Option<String>,
}

impl LabelsConfig {
    pub fn get_path(&self) -> Option<PathBuf> {
        let file = self.labels_file.as_ref()?;
        Some(match &self.labels_dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

pub fn default_queue_capacity() -> usize {
    8
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let settings = configuration_builder()?.build()?;
    settings.try_deserialize::<Config>()
}

/// Layered sources shared by every binary in the workspace: `base.yaml`, the
/// environment file picked by `APP_ENVIRONMENT`, then `APP_` variables.
pub fn configuration_builder(
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    Ok(config::Config::builder()
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
        ))
}

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
