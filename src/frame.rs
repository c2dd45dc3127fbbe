//! Zero-copy image views over completed frame buffers.
//!
//! A [`FrameView`] borrows the bytes of a [`FrameDescriptor`] directly; nothing is copied
//! or reallocated. The borrow ends before the buffer can be queued to the device again,
//! so a consumer that needs the image afterwards must take an owned copy with
//! [`FrameView::to_owned_frame`].

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use thiserror::Error;

use crate::buffer::FrameDescriptor;
use crate::traits::{FrameStatus, PixelFormat};

/// Single-channel 8-bit view.
pub type GrayView<'a> = ImageBuffer<Luma<u8>, &'a [u8]>;

/// Three-channel 8-bit view. The channel order follows the frame's [`PixelFormat`].
pub type ColorView<'a> = ImageBuffer<Rgb<u8>, &'a [u8]>;

/// Why a completed buffer could not be viewed as an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer does not hold a successfully completed frame.
    #[error("frame not complete ({0:?})")]
    NotComplete(FrameStatus),
    /// The pixel format has no direct 8-bit layout.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(PixelFormat),
    /// Fewer bytes were delivered than the dimensions require.
    #[error("frame truncated: {expected} bytes expected, {actual} delivered")]
    Truncated {
        /// Bytes required by width, height and channel count.
        expected: usize,
        /// Bytes the device wrote.
        actual: usize,
    },
}

/// Image data of a frame in one of the two admitted layouts.
#[derive(Debug)]
pub enum FrameImage<'a> {
    /// One byte per pixel.
    Mono8(GrayView<'a>),
    /// Three bytes per pixel.
    Color8(ColorView<'a>),
}

/// A decoded frame borrowing its buffer.
#[derive(Debug)]
pub struct FrameView<'a> {
    format: PixelFormat,
    frame_count: u64,
    image: FrameImage<'a>,
}

impl<'a> FrameView<'a> {
    /// Interpret a completed descriptor as an image without copying.
    pub fn decode(frame: &'a FrameDescriptor) -> Result<Self, DecodeError> {
        let status = frame.status();
        if status != FrameStatus::Complete {
            return Err(DecodeError::NotComplete(status));
        }

        // A complete frame always carries a format.
        let format = frame.format().ok_or(DecodeError::NotComplete(status))?;
        let channels = format
            .channels()
            .ok_or(DecodeError::UnsupportedFormat(format))?;

        let (width, height) = (frame.width(), frame.height());
        let expected = usize::try_from(u64::from(width) * u64::from(height) * u64::from(channels))
            .unwrap_or(usize::MAX);
        let data = frame.data();
        let pixels = data.get(..expected).ok_or(DecodeError::Truncated {
            expected,
            actual: data.len(),
        })?;

        let truncated = || DecodeError::Truncated {
            expected,
            actual: data.len(),
        };
        let image = if channels == 1 {
            FrameImage::Mono8(ImageBuffer::from_raw(width, height, pixels).ok_or_else(truncated)?)
        } else {
            FrameImage::Color8(ImageBuffer::from_raw(width, height, pixels).ok_or_else(truncated)?)
        };

        Ok(Self {
            format,
            frame_count: frame.frame_count(),
            image,
        })
    }

    /// Pixel format reported by the device.
    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Device frame counter.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The image data.
    #[must_use]
    pub const fn image(&self) -> &FrameImage<'a> {
        &self.image
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match &self.image {
            FrameImage::Mono8(img) => img.width(),
            FrameImage::Color8(img) => img.width(),
        }
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match &self.image {
            FrameImage::Mono8(img) => img.height(),
            FrameImage::Color8(img) => img.height(),
        }
    }

    /// Channels per pixel, 1 or 3.
    #[must_use]
    pub const fn channels(&self) -> u32 {
        match self.image {
            FrameImage::Mono8(_) => 1,
            FrameImage::Color8(_) => 3,
        }
    }

    /// The raw pixel bytes backing the view.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        match &self.image {
            FrameImage::Mono8(img) => *img.as_raw(),
            FrameImage::Color8(img) => *img.as_raw(),
        }
    }

    /// Luma of the pixel at `(x, y)`, or the RGB triple for color frames.
    ///
    /// Color values are returned in red, green, blue order regardless of the buffer's
    /// channel order.
    #[must_use]
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        match &self.image {
            FrameImage::Mono8(img) => {
                let Luma([v]) = *img.get_pixel(x, y);
                Some((v, v, v))
            }
            FrameImage::Color8(img) => {
                let Rgb([a, b, c]) = *img.get_pixel(x, y);
                if self.format == PixelFormat::Bgr24 {
                    Some((c, b, a))
                } else {
                    Some((a, b, c))
                }
            }
        }
    }

    /// Copy the frame into an owned image with red, green, blue channel order.
    #[must_use]
    pub fn to_dynamic(&self) -> DynamicImage {
        match &self.image {
            FrameImage::Mono8(img) => {
                let owned: GrayImage = ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
                    *img.get_pixel(x, y)
                });
                DynamicImage::ImageLuma8(owned)
            }
            FrameImage::Color8(img) => {
                let bgr = self.format == PixelFormat::Bgr24;
                let owned: RgbImage = ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
                    let Rgb([a, b, c]) = *img.get_pixel(x, y);
                    if bgr {
                        Rgb([c, b, a])
                    } else {
                        Rgb([a, b, c])
                    }
                });
                DynamicImage::ImageRgb8(owned)
            }
        }
    }

    /// Copy the frame so it can outlive the buffer.
    #[must_use]
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            format: self.format,
            frame_count: self.frame_count,
            image: self.to_dynamic(),
        }
    }
}

/// A frame copied out of its buffer.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    /// Pixel format reported by the device.
    pub format: PixelFormat,
    /// Device frame counter.
    pub frame_count: u64,
    /// Image data in red, green, blue order for color frames.
    pub image: DynamicImage,
}
