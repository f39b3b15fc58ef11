use crate::error::FrameError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use uuid::Uuid;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUV 4:2:0 with interleaved VU plane, the usual camera preview format.
    Nv21,
    Rgb8,
    Rgba8,
    Luma8,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` buffer, `None` if that does not fit in `usize`.
    pub fn required_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Nv21 => pixels.checked_mul(3).map(|len| len / 2),
            PixelFormat::Rgb8 => pixels.checked_mul(3),
            PixelFormat::Rgba8 => pixels.checked_mul(4),
            PixelFormat::Luma8 => Some(pixels),
        }
    }
}

/// Clockwise rotation needed to bring the frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = FrameError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(FrameError::InvalidRotation(other)),
        }
    }
}

/// One captured image. Immutable once built; clones share the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    id: Uuid,
    data: Bytes,
    width: u32,
    height: u32,
    rotation: Rotation,
    format: PixelFormat,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let data = data.into();
        let expected = format
            .required_len(width, height)
            .ok_or(FrameError::TooLarge { width, height })?;
        if data.len() < expected {
            return Err(FrameError::BufferTooSmall {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            data,
            width,
            height,
            rotation: Rotation::Deg0,
            format,
            captured_at: Utc::now(),
        })
    }

    pub fn from_image(image: &DynamicImage) -> Result<Self, FrameError> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height, PixelFormat::Rgb8)
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Decodes the buffer into an `image` type. NV21 frames have no direct mapping and return `None`.
    pub fn to_image(&self) -> Option<DynamicImage> {
        let len = self.format.required_len(self.width, self.height)?;
        let raw = self.data.get(..len)?.to_vec();
        match self.format {
            PixelFormat::Rgb8 => {
                RgbImage::from_raw(self.width, self.height, raw).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Rgba8 => {
                RgbaImage::from_raw(self.width, self.height, raw).map(DynamicImage::ImageRgba8)
            }
            PixelFormat::Luma8 => {
                GrayImage::from_raw(self.width, self.height, raw).map(DynamicImage::ImageLuma8)
            }
            PixelFormat::Nv21 => None,
        }
    }
}
