use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Colour channels per pixel sample (RGB).
pub const CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {width}x{height} needs {expected} samples, got {actual}")]
    LengthMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    Empty { width: u32, height: u32 },
}

/// A downsampled RGB pixel grid, 8 bits per channel, row-major.
///
/// Lives for exactly one prediction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFrame")]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

#[derive(Deserialize)]
struct RawFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl TryFrom<RawFrame> for Frame {
    type Error = FrameError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        Frame::new(raw.width, raw.height, raw.data)
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A black square frame of `size`x`size`.
    pub fn zeros(size: u32) -> Self {
        let len = size as usize * size as usize * CHANNELS;
        Self {
            width: size,
            height: size,
            data: vec![0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The `[r, g, b]` sample at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; CHANNELS] {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Frame::new(2, 2, vec![0; 11]).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                width: 2,
                height: 2,
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn test_new_rejects_empty_dimensions() {
        assert!(matches!(
            Frame::new(0, 4, vec![]),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn test_pixel_is_row_major() {
        let data = (0..12).collect::<Vec<u8>>();
        let frame = Frame::new(2, 2, data).unwrap();
        assert_eq!(frame.pixel(0, 0), [0, 1, 2]);
        assert_eq!(frame.pixel(1, 0), [3, 4, 5]);
        assert_eq!(frame.pixel(0, 1), [6, 7, 8]);
    }

    #[test]
    fn test_deserialize_validates_length() {
        let json = r#"{"width":2,"height":2,"data":[1,2,3]}"#;
        let result = serde_json::from_str::<Frame>(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_zeros() {
        let frame = Frame::zeros(4);
        assert_eq!(frame.data().len(), 4 * 4 * CHANNELS);
        assert!(frame.data().iter().all(|&v| v == 0));
    }
}
