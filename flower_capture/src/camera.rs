use crate::config::{CameraConfig, CameraSource};
use flower_proto::{Frame, FrameError};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(String),
    #[error("Camera returned an empty frame")]
    EmptyFrame,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),
    #[cfg(feature = "webcam")]
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Source of video frames.
pub trait CaptureDevice {
    /// The current frame at the device's native resolution.
    fn grab(&mut self) -> Result<DynamicImage, CameraError>;

    /// The current frame downsampled to `width`x`height` RGB samples.
    fn get_frame(&mut self, width: u32, height: u32) -> Result<Frame, CameraError> {
        let image = self.grab()?;
        downsample(&image, width, height)
    }
}

impl<T: CaptureDevice + ?Sized> CaptureDevice for Box<T> {
    fn grab(&mut self) -> Result<DynamicImage, CameraError> {
        (**self).grab()
    }

    fn get_frame(&mut self, width: u32, height: u32) -> Result<Frame, CameraError> {
        (**self).get_frame(width, height)
    }
}

/// Scales the whole image to `width`x`height` and drops any alpha channel.
pub fn downsample(image: &DynamicImage, width: u32, height: u32) -> Result<Frame, CameraError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CameraError::EmptyFrame);
    }
    let resized = image.resize_exact(width, height, FilterType::Triangle);
    let rgb = resized.to_rgb8();
    Ok(Frame::new(width, height, rgb.into_raw())?)
}

/// Serves one decoded image as every frame.
pub struct StillImageCamera {
    image: DynamicImage,
}

impl StillImageCamera {
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        let image = image::open(path)?;
        tracing::info!(
            "Opened still image {:?} ({}x{})",
            path,
            image.width(),
            image.height()
        );
        Ok(Self { image })
    }
}

impl CaptureDevice for StillImageCamera {
    fn grab(&mut self) -> Result<DynamicImage, CameraError> {
        Ok(self.image.clone())
    }
}

/// A uniformly coloured test pattern.
pub struct SolidColorCamera {
    width: u32,
    height: u32,
    rgb: [u8; 3],
}

impl SolidColorCamera {
    pub fn new(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self { width, height, rgb }
    }
}

impl CaptureDevice for SolidColorCamera {
    fn grab(&mut self) -> Result<DynamicImage, CameraError> {
        let image = RgbImage::from_pixel(self.width, self.height, Rgb(self.rgb));
        Ok(DynamicImage::ImageRgb8(image))
    }
}

#[cfg(feature = "webcam")]
pub use webcam::OpenCvCamera;

#[cfg(feature = "webcam")]
mod webcam {
    use super::{CameraError, CaptureDevice};
    use image::{DynamicImage, RgbImage};
    use opencv::{core::Mat, imgproc, prelude::*, videoio};

    pub struct OpenCvCamera {
        capture: videoio::VideoCapture,
    }

    impl OpenCvCamera {
        pub fn new(device_index: i32) -> Result<Self, CameraError> {
            let capture = videoio::VideoCapture::new(device_index, videoio::CAP_ANY)
                .map_err(|e| CameraError::OpenCameraFailed(e.to_string()))?;
            if !capture.is_opened()? {
                return Err(CameraError::OpenCameraFailed(format!(
                    "device {} is not available",
                    device_index
                )));
            }
            Ok(Self { capture })
        }
    }

    impl CaptureDevice for OpenCvCamera {
        fn grab(&mut self) -> Result<DynamicImage, CameraError> {
            let mut frame = Mat::default();
            let grabbed = self
                .capture
                .read(&mut frame)
                .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))?;
            if !grabbed || frame.empty() {
                return Err(CameraError::EmptyFrame);
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color_def(&frame, &mut rgb, imgproc::COLOR_BGR2RGB)?;

            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            let data = rgb.data_bytes()?.to_vec();
            let image = RgbImage::from_raw(width, height, data).ok_or(CameraError::EmptyFrame)?;
            Ok(DynamicImage::ImageRgb8(image))
        }
    }
}

/// Opens the capture source selected in the configuration.
pub fn open(config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
    match config.source {
        CameraSource::Pattern => Ok(Box::new(SolidColorCamera::new(
            640,
            480,
            config.pattern_rgb,
        ))),
        CameraSource::Still => {
            let path = config.image_path.as_ref().ok_or_else(|| {
                CameraError::OpenCameraFailed(
                    "camera.image_path is required for the still source".to_string(),
                )
            })?;
            Ok(Box::new(StillImageCamera::open(path)?))
        }
        #[cfg(feature = "webcam")]
        CameraSource::Webcam => Ok(Box::new(OpenCvCamera::new(config.device_index)?)),
        #[cfg(not(feature = "webcam"))]
        CameraSource::Webcam => Err(CameraError::OpenCameraFailed(
            "built without the `webcam` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_frame_downsamples_to_square() {
        let mut camera = SolidColorCamera::new(1280, 720, [12, 34, 56]);

        let frame = camera.get_frame(192, 192).unwrap();

        assert_eq!((frame.width(), frame.height()), (192, 192));
        assert_eq!(frame.data().len(), 192 * 192 * 3);
        assert_eq!(frame.pixel(0, 0), [12, 34, 56]);
        assert_eq!(frame.pixel(191, 191), [12, 34, 56]);
    }

    #[test]
    fn test_alpha_is_dropped() {
        let rgba = image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 128]));
        let frame = downsample(&DynamicImage::ImageRgba8(rgba), 2, 2).unwrap();
        assert_eq!(frame.pixel(1, 1), [1, 2, 3]);
    }

    #[test]
    fn test_still_image_camera_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flower.png");
        RgbImage::from_pixel(64, 48, Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();

        let mut camera = StillImageCamera::open(&path).unwrap();
        let frame = camera.get_frame(16, 16).unwrap();

        assert_eq!(frame.pixel(8, 8), [200, 10, 10]);
    }

    #[test]
    fn test_still_source_requires_a_path() {
        let config = CameraConfig {
            source: CameraSource::Still,
            image_path: None,
            device_index: 0,
            pattern_rgb: [0, 0, 0],
        };
        assert!(matches!(
            open(&config),
            Err(CameraError::OpenCameraFailed(_))
        ));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            downsample(&image, 8, 8),
            Err(CameraError::EmptyFrame)
        ));
    }
}
