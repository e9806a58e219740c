mod bridge;
mod camera;
mod controller;
mod triggers;
mod view;

pub mod app;
pub mod config;

pub use app::{start_app, ControllerLoop};
pub use bridge::{BridgeError, WorkerBridge};
pub use camera::{CameraError, CaptureDevice, SolidColorCamera, StillImageCamera};
pub use controller::{Controller, Phase};
pub use triggers::{line_triggers, parse_trigger, Trigger};
pub use view::{Renderer, TerminalRenderer, View};
