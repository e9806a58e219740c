use flower_inference::config::{
    configuration_builder, default_queue_capacity, deserialize_log_level, LabelsConfig,
    LogLevel, ModelConfig,
};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    /// A fixed colour, for running without a capture device.
    #[default]
    Pattern,
    /// A single image file served as every frame.
    Still,
    /// A V4L2/AVFoundation/MSMF device through OpenCV.
    Webcam,
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub source: CameraSource,
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_pattern_rgb")]
    pub pattern_rgb: [u8; 3],
}

fn default_pattern_rgb() -> [u8; 3] {
    [0, 128, 0]
}

#[derive(Clone, Deserialize, Debug)]
pub struct ControllerConfig {
    #[serde(default = "default_predict_timeout_ms")]
    pub predict_timeout_ms: u64,
}

fn default_predict_timeout_ms() -> u64 {
    10_000
}

impl ControllerConfig {
    pub fn get_predict_timeout(&self) -> Duration {
        Duration::from_millis(self.predict_timeout_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            predict_timeout_ms: default_predict_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    #[default]
    InProcess,
    Subprocess,
}

#[derive(Clone, Deserialize, Debug)]
pub struct WorkerConfig {
    #[serde(default)]
    pub mode: WorkerMode,
    #[serde(default = "default_worker_program")]
    pub program: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_worker_program() -> PathBuf {
    PathBuf::from("target/release/flower_inference")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: WorkerMode::default(),
            program: default_worker_program(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let config = configuration_builder()?.build()?;
    config.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_default_when_missing() {
        let config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
log_level: info
model:
  model_dir: models
  onnx_file: flowers_512.onnx
  input_size: 512
camera:
  source: still
  image_path: samples/rose.jpg
"#,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap();

        assert_eq!(config.model.input_size, 512);
        assert_eq!(config.camera.source, CameraSource::Still);
        assert_eq!(config.camera.device_index, 0);
        assert_eq!(
            config.controller.get_predict_timeout(),
            Duration::from_secs(10)
        );
        assert_eq!(config.worker.mode, WorkerMode::InProcess);
        assert_eq!(config.worker.queue_capacity, 8);
    }

    #[test]
    fn test_subprocess_worker() {
        let config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
log_level: debug
model:
  model_dir: models
  onnx_file: flowers_192.onnx
camera:
  source: pattern
  pattern_rgb: [255, 0, 0]
controller:
  predict_timeout_ms: 2500
worker:
  mode: subprocess
  program: bin/flower_inference
"#,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap();

        assert_eq!(config.camera.pattern_rgb, [255, 0, 0]);
        assert_eq!(config.worker.mode, WorkerMode::Subprocess);
        assert_eq!(config.worker.program, PathBuf::from("bin/flower_inference"));
        assert_eq!(
            config.controller.get_predict_timeout(),
            Duration::from_millis(2500)
        );
    }
}
